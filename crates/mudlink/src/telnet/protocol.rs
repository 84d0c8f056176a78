//! Telnet 協定常數和解析
//!
//! 實作 RFC 854 Telnet 協定的基本命令，並能處理被讀取切斷的 IAC 序列

use tracing::warn;

/// Telnet IAC (Interpret As Command) - 0xFF
pub const IAC: u8 = 255;

/// Telnet 命令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TelnetCommand {
    /// Sub-negotiation End
    Se = 240,
    /// No Operation
    Nop = 241,
    /// Data Mark
    DataMark = 242,
    /// Break
    Break = 243,
    /// Interrupt Process
    InterruptProcess = 244,
    /// Abort Output
    AbortOutput = 245,
    /// Are You There
    AreYouThere = 246,
    /// Erase Character
    EraseCharacter = 247,
    /// Erase Line
    EraseLine = 248,
    /// Go Ahead
    GoAhead = 249,
    /// Sub-negotiation Begin
    Sb = 250,
    /// Will
    Will = 251,
    /// Won't
    Wont = 252,
    /// Do
    Do = 253,
    /// Don't
    Dont = 254,
}

impl TelnetCommand {
    /// 從位元組解析 Telnet 命令
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            240 => Some(Self::Se),
            241 => Some(Self::Nop),
            242 => Some(Self::DataMark),
            243 => Some(Self::Break),
            244 => Some(Self::InterruptProcess),
            245 => Some(Self::AbortOutput),
            246 => Some(Self::AreYouThere),
            247 => Some(Self::EraseCharacter),
            248 => Some(Self::EraseLine),
            249 => Some(Self::GoAhead),
            250 => Some(Self::Sb),
            251 => Some(Self::Will),
            252 => Some(Self::Wont),
            253 => Some(Self::Do),
            254 => Some(Self::Dont),
            _ => None,
        }
    }

    /// 是否為選項協商命令（WILL/WONT/DO/DONT）
    pub fn is_negotiation(&self) -> bool {
        matches!(self, Self::Will | Self::Wont | Self::Do | Self::Dont)
    }
}

/// Telnet 選項
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelnetOption {
    /// Binary Transmission
    BinaryTransmission,
    /// Echo
    Echo,
    /// Suppress Go Ahead
    SuppressGoAhead,
    /// Terminal Type
    TerminalType,
    /// Window Size (NAWS)
    Naws,
    /// Charset
    Charset,
    /// MCCP2 (MUD Client Compression Protocol)
    Mccp2,
    /// GMCP (Generic MUD Communication Protocol)
    Gmcp,
    /// Unknown option
    Unknown(u8),
}

impl TelnetOption {
    /// 從位元組解析 Telnet 選項
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0 => Self::BinaryTransmission,
            1 => Self::Echo,
            3 => Self::SuppressGoAhead,
            24 => Self::TerminalType,
            31 => Self::Naws,
            42 => Self::Charset,
            86 => Self::Mccp2,
            201 => Self::Gmcp,
            other => Self::Unknown(other),
        }
    }

    /// 獲取選項的位元組值
    pub fn as_byte(&self) -> u8 {
        match self {
            Self::BinaryTransmission => 0,
            Self::Echo => 1,
            Self::SuppressGoAhead => 3,
            Self::TerminalType => 24,
            Self::Naws => 31,
            Self::Charset => 42,
            Self::Mccp2 => 86,
            Self::Gmcp => 201,
            Self::Unknown(b) => *b,
        }
    }
}

/// Telnet 資料解析產生的協定事件
#[derive(Debug, Clone, PartialEq)]
pub enum TelnetEvent {
    /// 選項協商（WILL, WONT, DO, DONT）
    Negotiation(TelnetCommand, TelnetOption),
    /// 其他雙位元組命令（NOP, GA 等）
    Command(TelnetCommand),
    /// Sub-negotiation 資料
    Subnegotiation(TelnetOption, Vec<u8>),
}

/// 解析單一完整序列的結果
enum Step {
    /// 消耗了 n 個位元組
    Consumed(usize),
    /// 序列不完整，需要更多資料
    Incomplete,
}

/// 未結束的 Sub-negotiation 預設最多保留的位元組數
pub const DEFAULT_SUBNEGOTIATION_LIMIT: usize = 8192;

/// 上限的最小值，確保一般的 IAC 序列不會被誤丟
const MIN_SUBNEGOTIATION_LIMIT: usize = 16;

/// 增量式 Telnet 解析器
///
/// 分離文字與協定命令；不完整的 IAC 序列保留到下一次 `feed`。
/// 遲遲沒有 `IAC SE` 的 Sub-negotiation 超過上限時整段丟棄，回到文字模式。
#[derive(Debug)]
pub struct TelnetParser {
    pending: Vec<u8>,
    subnegotiation_limit: usize,
}

impl Default for TelnetParser {
    fn default() -> Self {
        Self::with_subnegotiation_limit(DEFAULT_SUBNEGOTIATION_LIMIT)
    }
}

impl TelnetParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// 指定未結束 Sub-negotiation 的保留上限
    pub fn with_subnegotiation_limit(limit: usize) -> Self {
        Self {
            pending: Vec::new(),
            subnegotiation_limit: limit.max(MIN_SUBNEGOTIATION_LIMIT),
        }
    }

    /// 解析新到的位元組，返回 (純文字資料, 協定事件)
    pub fn feed(&mut self, input: &[u8]) -> (Vec<u8>, Vec<TelnetEvent>) {
        let mut buffer = std::mem::take(&mut self.pending);
        buffer.extend_from_slice(input);

        let mut data = Vec::with_capacity(buffer.len());
        let mut events = Vec::new();
        let mut i = 0;

        while i < buffer.len() {
            if buffer[i] != IAC {
                data.push(buffer[i]);
                i += 1;
                continue;
            }

            match parse_sequence(&buffer[i..], &mut data, &mut events) {
                Step::Consumed(n) => i += n,
                Step::Incomplete if buffer.len() - i > self.subnegotiation_limit => {
                    warn!(
                        "Sub-negotiation 超過 {} bytes 仍未結束，丟棄 {} bytes",
                        self.subnegotiation_limit,
                        buffer.len() - i
                    );
                    break;
                }
                Step::Incomplete => {
                    self.pending = buffer[i..].to_vec();
                    break;
                }
            }
        }

        (data, events)
    }

    /// 是否有尚未完成的 IAC 序列
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

/// 解析以 IAC 開頭的序列
fn parse_sequence(input: &[u8], data: &mut Vec<u8>, events: &mut Vec<TelnetEvent>) -> Step {
    let Some(&second) = input.get(1) else {
        return Step::Incomplete;
    };

    if second == IAC {
        // IAC IAC = 轉義的 0xFF
        data.push(IAC);
        return Step::Consumed(2);
    }

    let Some(cmd) = TelnetCommand::from_byte(second) else {
        // 未知命令，跳過
        return Step::Consumed(2);
    };

    if cmd.is_negotiation() {
        return match input.get(2) {
            Some(&option) => {
                events.push(TelnetEvent::Negotiation(cmd, TelnetOption::from_byte(option)));
                Step::Consumed(3)
            }
            None => Step::Incomplete,
        };
    }

    if cmd == TelnetCommand::Sb {
        let Some(&option) = input.get(2) else {
            return Step::Incomplete;
        };

        // 尋找 Sub-negotiation 結束 (IAC SE)
        let mut sub_data = Vec::new();
        let mut j = 3;
        while j + 1 < input.len() {
            if input[j] == IAC {
                if input[j + 1] == TelnetCommand::Se as u8 {
                    events.push(TelnetEvent::Subnegotiation(
                        TelnetOption::from_byte(option),
                        sub_data,
                    ));
                    return Step::Consumed(j + 2);
                }
                if input[j + 1] == IAC {
                    sub_data.push(IAC);
                    j += 2;
                    continue;
                }
            }
            sub_data.push(input[j]);
            j += 1;
        }
        return Step::Incomplete;
    }

    events.push(TelnetEvent::Command(cmd));
    Step::Consumed(2)
}
