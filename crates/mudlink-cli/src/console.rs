//! 終端機接收端：把收到的訊息印到標準輸出

use std::io::{self, Write};

use mudlink::{Consumer, Message, MessageBody, ProtocolSignal};
use tokio::sync::Notify;
use tracing::debug;

#[derive(Default)]
pub struct Console {
    closed: Notify,
}

impl Console {
    pub fn new() -> Self {
        Self::default()
    }

    /// 等待連線中斷
    pub async fn closed(&self) {
        self.closed.notified().await
    }
}

impl Consumer for Console {
    fn on_message(&self, message: Message) {
        let mut stdout = io::stdout().lock();
        let result = match &message.body {
            MessageBody::Text(text) if text.is_empty() => Ok(()),
            MessageBody::Text(text) => writeln!(stdout, "{}", text),
            MessageBody::Raw(bytes) => stdout.write_all(bytes),
        };
        if let Err(e) = result.and_then(|_| stdout.flush()) {
            debug!("寫入標準輸出失敗: {}", e);
        }

        match message.signal {
            Some(ProtocolSignal::HideInput) => eprintln!("[輸入隱藏]"),
            Some(ProtocolSignal::ShowInput) => eprintln!("[輸入顯示]"),
            None => {}
        }
        if let Some(offset) = message.caret_offset {
            debug!("游標位置: {}", offset);
        }
    }

    fn on_disconnected(&self, reason: Option<String>) {
        match reason {
            Some(reason) => println!("--- 已斷線: {} ---", reason),
            None => println!("--- 已斷線 ---"),
        }
        self.closed.notify_one();
    }
}
