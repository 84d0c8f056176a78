//! 行切割緩衝區模組
//!
//! 將每次讀到的位元組區塊切成完整的行，未結束的尾段保留到下一次再接上

use bytes::{Buf, BytesMut};

/// 行結尾
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEnding {
    /// `\n`
    Lf,
    /// `\r\n`
    CrLf,
}

impl LineEnding {
    /// 行結尾的原始位元組
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            Self::Lf => b"\n",
            Self::CrLf => b"\r\n",
        }
    }
}

/// 一條完整的行（不含行結尾）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub content: Vec<u8>,
    pub ending: LineEnding,
}

impl Line {
    /// 還原成線路上的原始位元組（內容 + 行結尾）
    pub fn to_wire(&self) -> Vec<u8> {
        let mut bytes = self.content.clone();
        bytes.extend_from_slice(self.ending.as_bytes());
        bytes
    }
}

/// 將上次的尾段與新區塊合併後切行
///
/// 返回 (完整的行, 新的尾段)。沒有任何行結尾時，整段輸入都成為尾段。
///
/// # Example
/// ```
/// use mudlink::buffer::split_lines;
///
/// let (lines, rest) = split_lines(b"hel", b"lo\r\nwor");
/// assert_eq!(lines.len(), 1);
/// assert_eq!(lines[0].content, b"hello");
/// assert_eq!(rest, b"wor");
/// ```
pub fn split_lines(remainder: &[u8], chunk: &[u8]) -> (Vec<Line>, Vec<u8>) {
    let mut splitter = LineSplitter::with_remainder(remainder);
    let lines = splitter.push(chunk);
    (lines, splitter.take_remainder())
}

/// 帶狀態的行切割器
///
/// 由連線引擎獨佔，跨讀取保存未結束的尾段
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: BytesMut,
}

impl LineSplitter {
    /// 創建空的切割器
    pub fn new() -> Self {
        Self::default()
    }

    /// 從既有尾段開始
    pub fn with_remainder(remainder: &[u8]) -> Self {
        Self {
            pending: BytesMut::from(remainder),
        }
    }

    /// 接上新區塊並取出所有完整的行
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Line> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let raw = self.pending.split_to(pos);
            self.pending.advance(1);

            let (content, ending) = match raw.last() {
                Some(&b'\r') => (raw[..raw.len() - 1].to_vec(), LineEnding::CrLf),
                _ => (raw.to_vec(), LineEnding::Lf),
            };
            lines.push(Line { content, ending });
        }

        lines
    }

    /// 目前保留的尾段
    pub fn remainder(&self) -> &[u8] {
        &self.pending
    }

    /// 取出並清空尾段
    pub fn take_remainder(&mut self) -> Vec<u8> {
        self.pending.split().to_vec()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
