//! Telnet 選項協商
//!
//! 只對 ECHO 產生介面訊號，其餘選項在傳輸層回應或忽略

use serde::{Deserialize, Serialize};

use super::protocol::{TelnetCommand, TelnetOption, IAC};

/// 協定訊號：伺服器要求介面隱藏或顯示輸入
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProtocolSignal {
    /// 伺服器接手回顯（通常是輸入密碼）
    HideInput,
    /// 伺服器停止回顯
    ShowInput,
}

/// 一次協商的結果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Negotiation {
    /// 需要回送給伺服器的位元組
    pub reply: Option<[u8; 3]>,
    /// 交給介面的訊號
    pub signal: Option<ProtocolSignal>,
}

impl Negotiation {
    fn reply(cmd: TelnetCommand, option: TelnetOption) -> Self {
        Self {
            reply: Some([IAC, cmd as u8, option.as_byte()]),
            signal: None,
        }
    }

    fn with_signal(mut self, signal: ProtocolSignal) -> Self {
        self.signal = Some(signal);
        self
    }
}

/// 選項協商器
///
/// 記錄 ECHO/SGA 的狀態，只在狀態改變時回應，避免協商迴圈。
/// 訊號本身無狀態：每次收到 WILL/WONT ECHO 都會產生。
#[derive(Debug, Default)]
pub struct OptionNegotiator {
    remote_echo: bool,
    remote_sga: bool,
    local_sga: bool,
}

impl OptionNegotiator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 伺服器目前是否負責回顯
    pub fn remote_echo(&self) -> bool {
        self.remote_echo
    }

    /// 處理一個協商命令
    pub fn handle(&mut self, cmd: TelnetCommand, option: TelnetOption) -> Negotiation {
        use TelnetCommand::{Do, Dont, Will, Wont};

        match (cmd, option) {
            (Will, TelnetOption::Echo) => {
                let result = if self.remote_echo {
                    Negotiation::default()
                } else {
                    self.remote_echo = true;
                    Negotiation::reply(Do, option)
                };
                result.with_signal(ProtocolSignal::HideInput)
            }
            (Wont, TelnetOption::Echo) => {
                let result = if self.remote_echo {
                    self.remote_echo = false;
                    Negotiation::reply(Dont, option)
                } else {
                    Negotiation::default()
                };
                result.with_signal(ProtocolSignal::ShowInput)
            }
            (Will, TelnetOption::SuppressGoAhead) => {
                if self.remote_sga {
                    Negotiation::default()
                } else {
                    self.remote_sga = true;
                    Negotiation::reply(Do, option)
                }
            }
            (Wont, TelnetOption::SuppressGoAhead) => {
                if self.remote_sga {
                    self.remote_sga = false;
                    Negotiation::reply(Dont, option)
                } else {
                    Negotiation::default()
                }
            }
            (Do, TelnetOption::SuppressGoAhead) => {
                if self.local_sga {
                    Negotiation::default()
                } else {
                    self.local_sga = true;
                    Negotiation::reply(Will, option)
                }
            }
            (Dont, TelnetOption::SuppressGoAhead) => {
                if self.local_sga {
                    self.local_sga = false;
                    Negotiation::reply(Wont, option)
                } else {
                    Negotiation::default()
                }
            }
            // 其他選項一律拒絕
            (Will, _) => Negotiation::reply(Dont, option),
            (Do, _) => Negotiation::reply(Wont, option),
            _ => Negotiation::default(),
        }
    }
}
