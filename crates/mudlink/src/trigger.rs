//! Trigger（觸發器）模組
//!
//! 對每一條收到的原始行（未移除控制序列）比對所有觸發器並執行動作。
//! 觸發器集合採寫入時複製：輪詢迴圈每批次取一份不可變快照，
//! 前景修改時發布新的列表，不會影響正在比對中的快照。

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

use regex::Regex;
use thiserror::Error;
use tracing::{debug, warn};

/// 觸發器錯誤
#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("無效的正則表達式 '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// 動作執行錯誤
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("動作失敗: {0}")]
    Failed(String),

    #[error("動作發生 panic: {0}")]
    Panicked(String),
}

/// 自訂動作的回呼
pub type ActionCallback = Arc<dyn Fn(&TriggerMatch) -> Result<(), ActionError> + Send + Sync>;

/// 觸發器動作
#[derive(Clone)]
pub enum TriggerAction {
    /// 發送命令到 MUD（`$1`..`$9` 以捕獲群組取代）
    Send(String),
    /// 交給腳本閘道執行
    Script(String),
    /// 任意副作用
    Callback(ActionCallback),
}

impl TriggerAction {
    /// 由閉包建立自訂動作
    pub fn callback<F>(f: F) -> Self
    where
        F: Fn(&TriggerMatch) -> Result<(), ActionError> + Send + Sync + 'static,
    {
        Self::Callback(Arc::new(f))
    }
}

impl fmt::Debug for TriggerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Send(cmd) => f.debug_tuple("Send").field(cmd).finish(),
            Self::Script(code) => f.debug_tuple("Script").field(code).finish(),
            Self::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

/// 觸發器匹配模式
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerPattern {
    /// 純文字匹配（包含）
    Contains(String),
    /// 純文字匹配（開頭）
    StartsWith(String),
    /// 純文字匹配（結尾）
    EndsWith(String),
    /// 正則表達式
    Regex(String),
}

/// 觸發器定義
#[derive(Debug, Clone)]
pub struct Trigger {
    /// 觸發器名稱
    pub name: String,
    /// 匹配模式
    pub pattern: TriggerPattern,
    /// 執行動作列表（依序執行）
    pub actions: Vec<TriggerAction>,
    /// 是否啟用
    pub enabled: bool,
    compiled_regex: Option<Regex>,
}

impl Trigger {
    /// 創建新的觸發器，正則模式必須能編譯
    pub fn new(name: impl Into<String>, pattern: TriggerPattern) -> Result<Self, TriggerError> {
        let compiled = match &pattern {
            TriggerPattern::Regex(re) => {
                Some(Regex::new(re).map_err(|source| TriggerError::InvalidPattern {
                    pattern: re.clone(),
                    source,
                })?)
            }
            _ => None,
        };

        Ok(Self {
            name: name.into(),
            pattern,
            actions: Vec::new(),
            enabled: true,
            compiled_regex: compiled,
        })
    }

    /// 正則觸發器的簡寫
    pub fn regex(name: impl Into<String>, pattern: impl Into<String>) -> Result<Self, TriggerError> {
        Self::new(name, TriggerPattern::Regex(pattern.into()))
    }

    /// 添加動作
    pub fn add_action(mut self, action: TriggerAction) -> Self {
        self.actions.push(action);
        self
    }

    /// 嘗試匹配訊息，停用的觸發器永遠不匹配
    pub fn try_match(&self, line: &str) -> Option<TriggerMatch> {
        if !self.enabled {
            return None;
        }

        let literal = |matched: bool, s: &String| {
            matched.then(|| TriggerMatch {
                trigger_name: self.name.clone(),
                line: line.to_string(),
                matched_text: s.clone(),
                captures: vec![],
            })
        };

        match &self.pattern {
            TriggerPattern::Contains(s) => literal(line.contains(s.as_str()), s),
            TriggerPattern::StartsWith(s) => literal(line.starts_with(s.as_str()), s),
            TriggerPattern::EndsWith(s) => literal(line.ends_with(s.as_str()), s),
            TriggerPattern::Regex(_) => {
                let regex = self.compiled_regex.as_ref()?;
                let captures = regex.captures(line)?;

                let groups: Vec<String> = captures
                    .iter()
                    .skip(1)
                    .map(|m| m.map(|m| m.as_str().to_string()).unwrap_or_default())
                    .collect();

                Some(TriggerMatch {
                    trigger_name: self.name.clone(),
                    line: line.to_string(),
                    matched_text: captures.get(0)?.as_str().to_string(),
                    captures: groups,
                })
            }
        }
    }
}

/// 觸發器匹配結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerMatch {
    /// 觸發器名稱
    pub trigger_name: String,
    /// 被比對的整行
    pub line: String,
    /// 匹配的文字
    pub matched_text: String,
    /// 捕獲的群組（僅 Regex 模式；未參與匹配的群組為空字串）
    pub captures: Vec<String>,
}

impl TriggerMatch {
    /// 以捕獲群組替換 `$1`、`$2`…
    ///
    /// 只掃描模板一次，捕獲內容裡的 `$N` 不會再被替換。
    /// 數字取最長的有效群組編號，超出範圍的 `$N` 原樣保留。
    pub fn expand(&self, template: &str) -> String {
        let mut expanded = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(pos) = rest.find('$') {
            expanded.push_str(&rest[..pos]);
            let after = &rest[pos + 1..];
            let digits = after.bytes().take_while(u8::is_ascii_digit).count();

            let group = (1..=digits).rev().find_map(|len| {
                let index: usize = after[..len].parse().ok()?;
                let cap = self.captures.get(index.checked_sub(1)?)?;
                Some((len, cap))
            });

            match group {
                Some((len, cap)) => {
                    expanded.push_str(cap);
                    rest = &after[len..];
                }
                None => {
                    expanded.push('$');
                    rest = after;
                }
            }
        }

        expanded.push_str(rest);
        expanded
    }
}

/// 動作的執行端：由連線引擎實作
pub trait ActionSink {
    /// 送出命令
    fn send(&mut self, command: String) -> Result<(), ActionError>;
    /// 執行腳本
    fn script(&mut self, command: String) -> Result<(), ActionError>;
}

/// 對一份快照比對單行，返回觸發的觸發器名稱
///
/// 每個觸發器最多比對一次；某個動作失敗只會記錄，不影響其他動作與觸發器
pub fn evaluate(triggers: &[Trigger], line: &str, sink: &mut dyn ActionSink) -> Vec<String> {
    let mut fired = Vec::new();

    for trigger in triggers {
        let Some(m) = trigger.try_match(line) else {
            continue;
        };
        debug!("觸發器 '{}' 匹配: {:?}", trigger.name, m.matched_text);

        for action in &trigger.actions {
            if let Err(e) = run_action(action, &m, sink) {
                warn!("觸發器 '{}' 動作 {:?} 失敗: {}", trigger.name, action, e);
            }
        }
        fired.push(trigger.name.clone());
    }

    fired
}

fn run_action(
    action: &TriggerAction,
    m: &TriggerMatch,
    sink: &mut dyn ActionSink,
) -> Result<(), ActionError> {
    let result = catch_unwind(AssertUnwindSafe(|| match action {
        TriggerAction::Send(cmd) => sink.send(m.expand(cmd)),
        TriggerAction::Script(code) => sink.script(m.expand(code)),
        TriggerAction::Callback(f) => f(m),
    }));

    match result {
        Ok(outcome) => outcome,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown".to_string());
            Err(ActionError::Panicked(message))
        }
    }
}

/// 觸發器管理器
///
/// 可在多個執行緒間共享；修改時發布新的列表
#[derive(Debug, Default)]
pub struct TriggerEngine {
    triggers: RwLock<Arc<Vec<Trigger>>>,
}

impl TriggerEngine {
    /// 創建新的觸發器管理器
    pub fn new() -> Self {
        Self::default()
    }

    /// 由既有列表建立
    pub fn with_triggers(triggers: Vec<Trigger>) -> Self {
        let engine = Self::new();
        engine.replace_all(triggers);
        engine
    }

    /// 取得目前的不可變快照
    pub fn snapshot(&self) -> Arc<Vec<Trigger>> {
        self.triggers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn update<R>(&self, f: impl FnOnce(&mut Vec<Trigger>) -> R) -> R {
        let mut guard = self.triggers.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = guard.as_ref().clone();
        let result = f(&mut next);
        *guard = Arc::new(next);
        result
    }

    /// 添加觸發器；同名者就地取代，保留原本的順序
    pub fn add(&self, trigger: Trigger) {
        self.update(|list| match list.iter_mut().find(|t| t.name == trigger.name) {
            Some(existing) => *existing = trigger,
            None => list.push(trigger),
        });
    }

    /// 移除觸發器
    pub fn remove(&self, name: &str) -> Option<Trigger> {
        self.update(|list| {
            let index = list.iter().position(|t| t.name == name)?;
            Some(list.remove(index))
        })
    }

    /// 啟用或停用觸發器，返回是否找到
    pub fn set_enabled(&self, name: &str, enabled: bool) -> bool {
        self.update(|list| match list.iter_mut().find(|t| t.name == name) {
            Some(trigger) => {
                trigger.enabled = enabled;
                true
            }
            None => false,
        })
    }

    /// 整批取代（同名者只保留第一個）
    pub fn replace_all(&self, triggers: Vec<Trigger>) {
        self.update(|list| {
            list.clear();
            for trigger in triggers {
                if !list.iter().any(|t| t.name == trigger.name) {
                    list.push(trigger);
                }
            }
        });
    }

    /// 依註冊順序列出觸發器名稱
    pub fn list(&self) -> Vec<String> {
        self.snapshot().iter().map(|t| t.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// 以目前快照比對單行
    pub fn feed(&self, line: &str, sink: &mut dyn ActionSink) -> Vec<String> {
        evaluate(&self.snapshot(), line, sink)
    }
}
