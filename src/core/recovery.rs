//! 错误恢复：将致命错误映射为 RecoveryAction，并对会话历史做回滚修复
//!
//! 回滚总是删除一段连续尾部，至少回到（含）最近一条 User Turn，一次性写入一批墓碑。
//! 若更早处还有未被应答的工具调用，则继续回到发起该调用的那条 User Turn。
//! 没有 User Turn 时不做任何修改，返回 false，调用方将其报告为无法恢复。

use std::collections::HashSet;

use crate::core::{AgentError, ConversationThread, RecoveryAction};
use crate::memory::{Turn, TurnId, TurnKind};

#[derive(Debug, Default)]
pub struct RecoveryManager;

impl RecoveryManager {
    pub fn new() -> Self {
        Self
    }

    /// 根据错误类型返回恢复动作
    pub fn handle(&self, err: &AgentError) -> RecoveryAction {
        match err {
            AgentError::StepLimitExceeded { .. } => RecoveryAction::RollbackRequest,
            // 落盘失败时内存与存储都可能停在工具轮中间，同样需要回滚
            AgentError::Transport(_)
            | AgentError::Protocol(_)
            | AgentError::Cancelled
            | AgentError::Persistence(_) => RecoveryAction::Repair,
        }
    }

    /// 计算需删除的尾部；没有 User Turn 返回 None
    pub fn plan(&self, turns: &[Turn]) -> Option<Vec<TurnId>> {
        let last_user = turns.iter().rposition(Turn::is_user)?;
        let start = match first_unanswered_call(turns) {
            Some(orphan) if orphan < last_user => turns[..orphan]
                .iter()
                .rposition(Turn::is_user)
                .unwrap_or(orphan),
            _ => last_user,
        };
        Some(turns[start..].iter().map(|t| t.id).collect())
    }

    /// 执行回滚；返回是否删除了内容
    pub async fn repair(
        &self,
        thread: &mut ConversationThread,
        action: RecoveryAction,
    ) -> Result<bool, AgentError> {
        let Some(ids) = self.plan(thread.turns()) else {
            tracing::warn!(thread_id = %thread.thread_id(), ?action, "Rollback found no user turn");
            return Ok(false);
        };
        let removed = thread.remove(&ids).await?;
        tracing::info!(
            thread_id = %thread.thread_id(),
            ?action,
            removed = removed.len(),
            "Conversation rolled back"
        );
        Ok(!removed.is_empty())
    }
}

/// 第一条存在未应答调用的 Assistant Turn 的位置；应答必须紧随其后
fn first_unanswered_call(turns: &[Turn]) -> Option<usize> {
    turns.iter().enumerate().find_map(|(i, turn)| {
        if !turn.requests_tools() {
            return None;
        }
        let answered: HashSet<&str> = turns[i + 1..]
            .iter()
            .map_while(|t| match &t.kind {
                TurnKind::ToolResult { call_id, .. } => Some(call_id.as_str()),
                TurnKind::User { .. } | TurnKind::Assistant { .. } => None,
            })
            .collect();
        turn.tool_calls()
            .iter()
            .any(|c| !answered.contains(c.id.as_str()))
            .then_some(i)
    })
}
