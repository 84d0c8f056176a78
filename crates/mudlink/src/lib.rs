//! MUD 連線引擎
//!
//! 提供 MUD 客戶端的連線核心：
//! - `connection`: 背景輪詢、寫入與斷線
//! - `buffer`: 行切割（跨讀取保留未結束的尾段）
//! - `encoding`: 編解碼與控制序列移除
//! - `telnet`: Telnet 協定解析與選項協商
//! - `trigger`: 觸發器系統
//! - `script`: 腳本閘道介面
//! - `consumer`: 顯示層介面
//! - `config`: 連線設定

pub mod buffer;
pub mod config;
pub mod connection;
pub mod consumer;
pub mod encoding;
pub mod script;
pub mod telnet;
pub mod trigger;

pub use buffer::{split_lines, Line, LineEnding, LineSplitter};
pub use config::{ConfigError, ConnectionConfig};
pub use connection::{ConnectError, Connection, ConnectionBuilder, WriteError};
pub use consumer::{ChannelConsumer, Consumer, ConsumerEvent, Message, MessageBody};
pub use encoding::{normalize, EscapeGrammar};
pub use script::ScriptGateway;
pub use telnet::{OptionNegotiator, ProtocolSignal};
pub use trigger::{
    ActionError, ActionSink, Trigger, TriggerAction, TriggerEngine, TriggerError, TriggerMatch,
    TriggerPattern,
};
