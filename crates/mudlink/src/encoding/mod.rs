//! 文字編解碼與正規化模組
//!
//! 依設定的編碼（UTF-8、Big5 等）解碼伺服器資料，移除控制序列，
//! 無法解碼的位元組以 U+FFFD 取代，從不失敗。

mod ansi;

pub use ansi::EscapeGrammar;

use encoding_rs::Encoding;
use thiserror::Error;
use tracing::debug;

/// 編碼錯誤
#[derive(Debug, Error)]
pub enum EncodingError {
    #[error("未知的編碼: {0}")]
    Unknown(String),
}

/// 依名稱查找編碼（WHATWG 標籤，如 `utf-8`、`big5`）
pub fn resolve(label: &str) -> Result<&'static Encoding, EncodingError> {
    Encoding::for_label(label.trim().as_bytes())
        .ok_or_else(|| EncodingError::Unknown(label.to_string()))
}

/// 將位元組解碼為字串（無效字元會被替換為 U+FFFD）
///
/// # Example
/// ```
/// use mudlink::encoding::decode;
///
/// let text = decode(&[0xa7, 0x41, 0xa6, 0x6e], encoding_rs::BIG5);
/// assert_eq!(text, "你好");
/// ```
pub fn decode(bytes: &[u8], encoding: &'static Encoding) -> String {
    let (decoded, had_errors) = encoding.decode_without_bom_handling(bytes);
    if had_errors {
        debug!("{} 解碼時遇到無效位元組，已以替代字元取代", encoding.name());
    }
    decoded.into_owned()
}

/// 將字串編碼為指定編碼的位元組（無法編碼的字元會被替換）
pub fn encode(text: &str, encoding: &'static Encoding) -> Vec<u8> {
    let (encoded, _, had_unmappable) = encoding.encode(text);
    if had_unmappable {
        debug!("部分字元無法以 {} 編碼", encoding.name());
    }
    encoded.into_owned()
}

/// 正規化一個區塊：解碼、移除控制序列、整理行
///
/// 空行會被移除，其餘以 `\n` 連接；純函式，可在任何執行緒呼叫。
///
/// # Example
/// ```
/// use mudlink::encoding::{normalize, EscapeGrammar};
///
/// let text = normalize(
///     b"Hello \x1b[31mworld\x1b[0m\r\nSecond line\r\n",
///     encoding_rs::UTF_8,
///     &EscapeGrammar::default(),
/// );
/// assert_eq!(text, "Hello world\nSecond line");
/// ```
pub fn normalize(bytes: &[u8], encoding: &'static Encoding, grammar: &EscapeGrammar) -> String {
    let decoded = decode(bytes, encoding);
    let stripped = grammar.strip(&decoded);

    stripped
        .split('\n')
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use encoding_rs::{BIG5, UTF_8};

    #[test]
    fn test_resolve_labels() {
        assert_eq!(resolve("utf-8").unwrap(), UTF_8);
        assert_eq!(resolve("Big5").unwrap(), BIG5);
        assert!(matches!(resolve("klingon"), Err(EncodingError::Unknown(_))));
    }

    #[test]
    fn test_decode_big5_chinese() {
        // "你好" in Big5: 0xa7 0x41 0xa6 0x6e
        let result = decode(&[0xa7, 0x41, 0xa6, 0x6e], BIG5);
        assert_eq!(result, "你好");
    }

    #[test]
    fn test_encode_big5_chinese() {
        assert_eq!(encode("你好", BIG5), vec![0xa7, 0x41, 0xa6, 0x6e]);
    }

    #[test]
    fn test_decode_invalid_utf8_uses_placeholder() {
        let result = decode(b"ab\xffcd", UTF_8);
        assert_eq!(result, "ab\u{FFFD}cd");
    }

    #[test]
    fn test_normalize_scenario() {
        let text = normalize(
            b"Hello \x1b[31mworld\x1b[0m\r\nSecond line\r\n",
            UTF_8,
            &EscapeGrammar::default(),
        );
        assert_eq!(text, "Hello world\nSecond line");
        assert!(!text.contains('\x1b'));
    }

    #[test]
    fn test_normalize_never_fails_on_garbage() {
        let grammar = EscapeGrammar::default();
        for encoding in [UTF_8, BIG5] {
            let garbage: Vec<u8> = (0..=255u8).rev().collect();
            let text = normalize(&garbage, encoding, &grammar);
            assert!(!text.is_empty());
        }
    }

    #[test]
    fn test_normalize_invalid_sequence_is_not_truncated() {
        let text = normalize(b"before\xc3(after", UTF_8, &EscapeGrammar::default());
        assert_eq!(text, "before\u{FFFD}(after");
    }

    #[test]
    fn test_normalize_drops_blank_lines() {
        let text = normalize(b"\r\n\r\nroom\r\n\r\nexits\r\n", UTF_8, &EscapeGrammar::default());
        assert_eq!(text, "room\nexits");
    }
}
