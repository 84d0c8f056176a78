//! 訊息接收端
//!
//! 連線引擎只透過這兩個回呼與顯示層互動

use tokio::sync::mpsc;

use crate::telnet::ProtocolSignal;

/// 送達接收端的內容
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    /// 已解碼並移除控制序列的文字
    Text(String),
    /// 未解碼的原始位元組（關閉控制序列移除時）
    Raw(Vec<u8>),
}

impl MessageBody {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(text) => text.is_empty(),
            Self::Raw(bytes) => bytes.is_empty(),
        }
    }
}

/// 一次送達的訊息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub body: MessageBody,
    /// 協定訊號（隱藏/顯示輸入）
    pub signal: Option<ProtocolSignal>,
    /// 游標應移動到的位置，只由腳本輸出提供
    ///
    /// 以 `text` 的 UTF-8 位元組（code unit）計算，必定落在字元邊界上
    /// （可直接用於 `str::split_at`）
    pub caret_offset: Option<usize>,
}

impl Message {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            body: MessageBody::Text(text.into()),
            signal: None,
            caret_offset: None,
        }
    }

    /// 文字內容（原始位元組模式下為 None）
    pub fn as_text(&self) -> Option<&str> {
        match &self.body {
            MessageBody::Text(text) => Some(text),
            MessageBody::Raw(_) => None,
        }
    }
}

/// 接收端能力介面，任何顯示層都可以實作
pub trait Consumer: Send + Sync {
    /// 收到訊息
    fn on_message(&self, message: Message);

    /// 連線中斷（每個連線只呼叫一次）
    fn on_disconnected(&self, reason: Option<String>);
}

/// 接收端事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumerEvent {
    Message(Message),
    Disconnected(Option<String>),
}

/// 將回呼轉成 channel 事件的接收端
#[derive(Debug, Clone)]
pub struct ChannelConsumer {
    tx: mpsc::UnboundedSender<ConsumerEvent>,
}

impl ChannelConsumer {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ConsumerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Consumer for ChannelConsumer {
    fn on_message(&self, message: Message) {
        if self.tx.send(ConsumerEvent::Message(message)).is_err() {
            tracing::debug!("接收端已關閉，訊息被丟棄");
        }
    }

    fn on_disconnected(&self, reason: Option<String>) {
        if self.tx.send(ConsumerEvent::Disconnected(reason)).is_err() {
            tracing::debug!("接收端已關閉，斷線通知被丟棄");
        }
    }
}
