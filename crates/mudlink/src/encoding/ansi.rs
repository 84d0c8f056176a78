//! 控制序列（ANSI 顏色碼）移除
//!
//! 序列以引導字元開始，到第一個結束字元為止，兩端連同中間內容一併移除。

/// 控制序列文法：引導字元與結束字元
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscapeGrammar {
    pub introducer: char,
    pub terminator: char,
}

impl Default for EscapeGrammar {
    fn default() -> Self {
        Self {
            introducer: '\x1b',
            terminator: 'm',
        }
    }
}

impl EscapeGrammar {
    /// 移除所有完整的控制序列
    ///
    /// 找不到結束字元的引導字元保持原樣
    ///
    /// # Example
    /// ```
    /// use mudlink::encoding::EscapeGrammar;
    ///
    /// let grammar = EscapeGrammar::default();
    /// assert_eq!(grammar.strip("\x1b[1;31mred\x1b[0m"), "red");
    /// ```
    pub fn strip(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;

        while let Some(start) = rest.find(self.introducer) {
            out.push_str(&rest[..start]);
            let body = &rest[start + self.introducer.len_utf8()..];
            match body.find(self.terminator) {
                Some(end) => rest = &body[end + self.terminator.len_utf8()..],
                None => {
                    rest = &rest[start..];
                    break;
                }
            }
        }

        out.push_str(rest);
        out
    }

    /// 位元組層級：最後一個引導字元之後若沒有結束字元，返回它的位置
    ///
    /// 連線引擎用它把被讀取切斷的序列留到下一次
    pub fn unterminated_tail(&self, bytes: &[u8]) -> Option<usize> {
        // 只處理 ASCII 範圍的文法，其他情況不做保留
        if !self.introducer.is_ascii() || !self.terminator.is_ascii() {
            return None;
        }
        let introducer = self.introducer as u8;
        let terminator = self.terminator as u8;

        let start = bytes.iter().rposition(|&b| b == introducer)?;
        if bytes[start + 1..].contains(&terminator) {
            None
        } else {
            Some(start)
        }
    }
}
