//! Profile 設定檔
//!
//! 單一帳號/伺服器的連線資訊、登入命令與觸發器，以 JSON 儲存

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use mudlink::{ConnectionConfig, Trigger, TriggerAction, TriggerPattern};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// 觸發器設定（可序列化版本）
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TriggerConfig {
    pub name: String,
    pub pattern: String,
    pub action: String,
    #[serde(default)]
    pub is_script: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

/// 單一帳號/伺服器的完整設定
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Profile {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    /// 登入帳號
    #[serde(default)]
    pub username: Option<String>,
    /// 登入密碼
    #[serde(default)]
    pub password: Option<String>,
    /// 登入後的其他命令（每行一個）
    #[serde(default)]
    pub other_commands: Option<String>,
    /// 連線引擎設定
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub triggers: Vec<TriggerConfig>,
}

impl Profile {
    /// 從檔案載入
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("無法讀取設定檔 {}", path.display()))?;
        let profile: Self = serde_json::from_str(&content)
            .with_context(|| format!("設定檔格式錯誤 {}", path.display()))?;
        Ok(profile)
    }

    /// 登入命令：帳號、密碼、其他命令，依序逐行
    pub fn login_commands(&self) -> Vec<String> {
        [&self.username, &self.password, &self.other_commands]
            .into_iter()
            .flatten()
            .flat_map(|text| text.lines())
            .map(str::to_string)
            .collect()
    }

    /// 建立觸發器；無法編譯的設定會被略過並記錄
    pub fn build_triggers(&self) -> Vec<Trigger> {
        self.triggers
            .iter()
            .filter_map(|config| match create_trigger_from_config(config) {
                Ok(trigger) => Some(trigger),
                Err(e) => {
                    warn!("略過觸發器 '{}': {}", config.name, e);
                    None
                }
            })
            .collect()
    }
}

/// 從設定建立觸發器
fn create_trigger_from_config(config: &TriggerConfig) -> Result<Trigger, mudlink::TriggerError> {
    // 自動偵測正則表達式模式
    let looks_like_regex = ["(.+)", "(.*)", "\\d", "\\s", "\\w", "[", "$", "^", "|", "?"]
        .iter()
        .any(|marker| config.pattern.contains(marker));
    let pattern = if looks_like_regex {
        TriggerPattern::Regex(config.pattern.clone())
    } else {
        TriggerPattern::Contains(config.pattern.clone())
    };

    let mut trigger = Trigger::new(&config.name, pattern)?;
    if !config.action.is_empty() {
        let action = if config.is_script {
            TriggerAction::Script(config.action.clone())
        } else {
            TriggerAction::Send(config.action.clone())
        };
        trigger = trigger.add_action(action);
    }
    trigger.enabled = config.enabled;
    Ok(trigger)
}
