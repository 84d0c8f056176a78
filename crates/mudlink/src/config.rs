//! 連線設定
//!
//! 明確傳入連線引擎，不使用任何全域狀態

use std::time::Duration;

use encoding_rs::Encoding;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::encoding::{self, EncodingError, EscapeGrammar};

/// 設定錯誤
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("設定格式錯誤: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Encoding(#[from] EncodingError),
}

/// 連線引擎設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// 伺服器編碼（WHATWG 標籤）
    pub encoding: String,
    /// 輪詢間隔（毫秒）
    pub poll_interval_ms: u64,
    /// 連線逾時（毫秒）
    pub connect_timeout_ms: u64,
    /// 讀取緩衝區大小
    pub read_buffer_size: usize,
    /// 腳本命令的跳脫字元
    pub escape_marker: char,
    /// 是否移除控制序列；關閉時送出未解碼的原始位元組
    pub strip_ansi: bool,
    /// 控制序列引導字元
    pub escape_introducer: char,
    /// 控制序列結束字元
    pub escape_terminator: char,
    /// 送出命令時附加的行結尾
    pub line_terminator: String,
    /// 連線後依序送出的命令（帳號、密碼、其他）
    pub login_commands: Vec<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        let grammar = EscapeGrammar::default();
        Self {
            encoding: "utf-8".to_string(),
            poll_interval_ms: 100,
            connect_timeout_ms: 30_000,
            read_buffer_size: 8192,
            escape_marker: '#',
            strip_ansi: true,
            escape_introducer: grammar.introducer,
            escape_terminator: grammar.terminator,
            line_terminator: "\r\n".to_string(),
            login_commands: Vec::new(),
        }
    }
}

impl ConnectionConfig {
    /// 從 JSON 讀取並驗證
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.resolve_encoding()?;
        Ok(config)
    }

    pub fn resolve_encoding(&self) -> Result<&'static Encoding, EncodingError> {
        encoding::resolve(&self.encoding)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn grammar(&self) -> EscapeGrammar {
        EscapeGrammar {
            introducer: self.escape_introducer,
            terminator: self.escape_terminator,
        }
    }
}
