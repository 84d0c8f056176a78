//! Telnet 協定模組
//!
//! 解析 IAC 序列並處理選項協商

mod negotiator;
mod protocol;

pub use negotiator::{Negotiation, OptionNegotiator, ProtocolSignal};
pub use protocol::{TelnetCommand, TelnetEvent, TelnetOption, TelnetParser, IAC};
