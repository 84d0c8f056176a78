//! MUD 終端機客戶端

mod config;
mod console;
mod gateway;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use mudlink::{Connection, TriggerEngine};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::Profile;
use console::Console;
use gateway::CommandGateway;

/// 連線到 MUD 伺服器，逐行轉送標準輸入
#[derive(Parser, Debug)]
#[command(name = "mudlink", version, about)]
struct Cli {
    /// 主機名稱或 IP
    host: Option<String>,

    /// 連接埠
    port: Option<u16>,

    /// Profile 設定檔（JSON）
    #[arg(long)]
    profile: Option<PathBuf>,

    /// 伺服器編碼，例如 utf-8、big5
    #[arg(long)]
    encoding: Option<String>,

    /// 不移除控制序列，直接輸出原始位元組
    #[arg(long)]
    raw: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日誌
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let profile = match &cli.profile {
        Some(path) => Profile::load(path)?,
        None => Profile::default(),
    };

    let Some(host) = cli.host.clone().or_else(|| profile.host.clone()) else {
        bail!("需要指定主機（參數或 Profile 的 host）");
    };
    let port = cli.port.or(profile.port).unwrap_or(4000);

    let mut config = profile.connection.clone();
    if let Some(encoding) = cli.encoding {
        config.encoding = encoding;
    }
    if cli.raw {
        config.strip_ansi = false;
    }
    config.login_commands.extend(profile.login_commands());

    let triggers = Arc::new(TriggerEngine::with_triggers(profile.build_triggers()));
    let console = Arc::new(Console::new());

    let connection = Connection::builder(config, console.clone())
        .triggers(triggers)
        .gateway(Arc::new(CommandGateway))
        .connect(&host, port)
        .await
        .with_context(|| format!("無法連線到 {}:{}", host, port))?;
    connection.start();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = console.closed() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if let Err(e) = connection.write(&line).await {
                        error!("送出失敗: {}", e);
                    }
                }
                Ok(None) => {
                    connection.disconnect().await;
                    break;
                }
                Err(e) => {
                    error!("讀取標準輸入失敗: {}", e);
                    connection.disconnect().await;
                    break;
                }
            },
        }
    }

    Ok(())
}
