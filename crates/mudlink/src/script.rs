//! 腳本閘道
//!
//! 以跳脫字元開頭的輸出文字不會送到伺服器，而是交給腳本閘道。
//! 閘道的內部實作（直譯器）不屬於本 crate。

use crate::connection::Connection;

/// 腳本閘道介面
///
/// `execute` 不回傳結果；閘道之後可以透過 `connection` 呼叫
/// [`Connection::write`] 送出命令，或 [`Connection::display`] 顯示輸出。
/// 需要非同步寫入時請 clone 連線並自行 `tokio::spawn`。
pub trait ScriptGateway: Send + Sync {
    /// 執行一段腳本命令（已去除跳脫字元）
    fn execute(&self, command: &str, connection: &Connection);
}
