//! 短期记忆：对话日志（Message Store）
//!
//! Turn 为不可变记录；MessageStore 只允许追加或按 id 删除。删除以墓碑条目（tombstone）追加到日志，
//! 同时维护一份去除墓碑后的实时视图，供模型调用与恢复扫描使用。

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 工具失败结果的固定前缀；以此开头的 ToolResult 计为错误
pub const TOOL_ERROR_MARKER: &str = "Error:";

/// Turn 唯一标识，创建时分配
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TurnId(Uuid);

impl TurnId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TurnId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TurnId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// 消息角色（用于展示与存储列）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    ToolResult,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::ToolResult => "tool_result",
        }
    }
}

/// 模型请求的一次工具调用
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// 调用 id，ToolResult 通过它与调用配对
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// Turn 的具体内容：封闭的三种变体
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum TurnKind {
    User {
        content: String,
    },
    Assistant {
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },
    ToolResult {
        call_id: String,
        tool: String,
        content: String,
    },
}

/// 对话日志中的一条不可变记录
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub id: TurnId,
    #[serde(flatten)]
    pub kind: TurnKind,
    pub created_at: DateTime<Utc>,
}

impl Turn {
    fn with_kind(kind: TurnKind) -> Self {
        Self {
            id: TurnId::new(),
            kind,
            created_at: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_kind(TurnKind::User {
            content: content.into(),
        })
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::assistant_with_calls(content, Vec::new())
    }

    pub fn assistant_with_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self::with_kind(TurnKind::Assistant {
            content: content.into(),
            tool_calls,
        })
    }

    pub fn tool_result(
        call_id: impl Into<String>,
        tool: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self::with_kind(TurnKind::ToolResult {
            call_id: call_id.into(),
            tool: tool.into(),
            content: content.into(),
        })
    }

    pub fn role(&self) -> Role {
        match self.kind {
            TurnKind::User { .. } => Role::User,
            TurnKind::Assistant { .. } => Role::Assistant,
            TurnKind::ToolResult { .. } => Role::ToolResult,
        }
    }

    pub fn content(&self) -> &str {
        match &self.kind {
            TurnKind::User { content }
            | TurnKind::Assistant { content, .. }
            | TurnKind::ToolResult { content, .. } => content,
        }
    }

    /// Assistant 的工具调用；其它角色为空
    pub fn tool_calls(&self) -> &[ToolCall] {
        match &self.kind {
            TurnKind::Assistant { tool_calls, .. } => tool_calls,
            TurnKind::User { .. } | TurnKind::ToolResult { .. } => &[],
        }
    }

    pub fn is_user(&self) -> bool {
        matches!(self.kind, TurnKind::User { .. })
    }

    /// 携带工具调用的 Assistant：一个工具轮次的起点
    pub fn requests_tools(&self) -> bool {
        !self.tool_calls().is_empty()
    }

    /// 仅对 ToolResult 有意义：内容以错误前缀开头
    pub fn is_error(&self) -> bool {
        match &self.kind {
            TurnKind::ToolResult { content, .. } => content.starts_with(TOOL_ERROR_MARKER),
            TurnKind::User { .. } | TurnKind::Assistant { .. } => false,
        }
    }
}

/// 日志条目：追加一条 Turn，或以墓碑标记删除
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StoreEntry {
    Append { turn: Turn },
    Remove { id: TurnId },
}

/// 追加式对话日志 + 实时视图
#[derive(Clone, Debug, Default)]
pub struct MessageStore {
    log: Vec<StoreEntry>,
    live: Vec<Turn>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 由已持久化的 Turn 序列重建
    pub fn from_turns(turns: Vec<Turn>) -> Self {
        let mut store = Self::new();
        for turn in turns {
            store.append(turn);
        }
        store
    }

    pub fn append(&mut self, turn: Turn) -> TurnId {
        let id = turn.id;
        self.log.push(StoreEntry::Append { turn: turn.clone() });
        self.live.push(turn);
        id
    }

    /// 按 id 批量删除；不存在的 id 视为无操作。返回实际删除的 id（保持日志顺序）
    pub fn remove_by_ids(&mut self, ids: &[TurnId]) -> Vec<TurnId> {
        let wanted: HashSet<TurnId> = ids.iter().copied().collect();
        let removed: Vec<TurnId> = self
            .live
            .iter()
            .filter(|t| wanted.contains(&t.id))
            .map(|t| t.id)
            .collect();
        if removed.is_empty() {
            return removed;
        }
        self.log
            .extend(removed.iter().map(|&id| StoreEntry::Remove { id }));
        self.live.retain(|t| !wanted.contains(&t.id));
        removed
    }

    pub fn turns(&self) -> &[Turn] {
        &self.live
    }

    pub fn get(&self, id: TurnId) -> Option<&Turn> {
        self.live.iter().find(|t| t.id == id)
    }

    pub fn last(&self) -> Option<&Turn> {
        self.live.last()
    }

    /// 完整日志（含墓碑）
    pub fn log(&self) -> &[StoreEntry] {
        &self.log
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_marker_only_on_tool_results() {
        assert!(Turn::tool_result("c1", "read_file", "Error: no such file").is_error());
        assert!(!Turn::tool_result("c1", "read_file", "contents").is_error());
        assert!(!Turn::user("Error: user typed this").is_error());
        assert!(!Turn::assistant("Error: model said this").is_error());
    }

    #[test]
    fn test_requests_tools() {
        let call = ToolCall::new("c1", "ls", serde_json::json!({}));
        assert!(Turn::assistant_with_calls("", vec![call]).requests_tools());
        assert!(!Turn::assistant("done").requests_tools());
        assert!(!Turn::user("hi").requests_tools());
    }

    #[test]
    fn test_remove_appends_tombstones() {
        let mut store = MessageStore::new();
        let a = store.append(Turn::user("a"));
        let b = store.append(Turn::assistant("b"));
        let c = store.append(Turn::user("c"));

        let removed = store.remove_by_ids(&[c, b]);
        assert_eq!(removed, vec![b, c]);
        assert_eq!(store.len(), 1);
        assert_eq!(store.turns()[0].id, a);
        assert_eq!(store.log().len(), 5);
        assert!(matches!(store.log()[3], StoreEntry::Remove { id } if id == b));
    }

    #[test]
    fn test_remove_absent_id_is_noop() {
        let mut store = MessageStore::new();
        let a = store.append(Turn::user("a"));
        assert_eq!(store.remove_by_ids(&[a]).len(), 1);
        assert!(store.remove_by_ids(&[a]).is_empty());
        assert!(store.remove_by_ids(&[TurnId::new()]).is_empty());
        assert_eq!(store.log().len(), 2);
    }

    #[test]
    fn test_turn_serde_shape() {
        let turn = Turn::tool_result("call_1", "read_file", "Error: denied");
        let json = serde_json::to_value(&turn).unwrap();
        assert_eq!(json["role"], "tool_result");
        assert_eq!(json["call_id"], "call_1");
        let back: Turn = serde_json::from_value(json).unwrap();
        assert_eq!(back, turn);
    }
}
