//! 最小的腳本閘道
//!
//! 支援 `echo <文字>`（本地顯示）、`send <文字>`（送到伺服器）與 `disconnect`

use mudlink::{Connection, ScriptGateway};
use tracing::warn;

pub struct CommandGateway;

impl ScriptGateway for CommandGateway {
    fn execute(&self, command: &str, connection: &Connection) {
        let (verb, rest) = command
            .trim()
            .split_once(char::is_whitespace)
            .unwrap_or((command.trim(), ""));

        match verb {
            "echo" => connection.display(rest, None),
            "send" => {
                let connection = connection.clone();
                let text = rest.to_string();
                tokio::spawn(async move {
                    if let Err(e) = connection.write(&text).await {
                        warn!("腳本命令送出失敗: {}", e);
                    }
                });
            }
            "disconnect" => {
                let connection = connection.clone();
                tokio::spawn(async move { connection.disconnect().await });
            }
            _ => warn!("未知的腳本命令: {}", command),
        }
    }
}
