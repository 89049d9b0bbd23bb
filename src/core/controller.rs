//! Turn Controller：决定「调用模型」还是「熔断」，并维护 error_count
//!
//! 规则（每次 advance）：
//! 1. 最后一条是 User -> error_count 归零；
//! 2. 否则从尾部反向扫描当前工具轮，统计错误 ToolResult，遇到 Assistant 即停，也不越过 User；
//! 3. 有错误 -> 累加；无错误且最后一条是成功的 ToolResult -> 归零；
//! 4. error_count 达到阈值 -> 不调用模型，返回固定的熔断通知；
//! 5. 否则用完整 Turn 序列调用模型。

use std::sync::Arc;

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::core::{AgentError, ConversationState};
use crate::llm::{LlmClient, LlmError, TurnAssembler};
use crate::memory::{Turn, TurnKind};
use crate::react::{StagedFragment, StreamingRelay};

/// 默认熔断阈值
pub const DEFAULT_ERROR_THRESHOLD: u32 = 5;

/// 熔断时返回给用户的固定通知
pub const CIRCUIT_BREAKER_NOTICE: &str =
    "Stopped: repeated consecutive tool errors. Please rephrase the request or check the tool setup.";

/// 当前工具轮的反向扫描结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RoundScan {
    /// 本轮错误 ToolResult 数
    pub errors: u32,
    /// 最后一条是 User
    pub last_is_user: bool,
    /// 最后一条是成功的 ToolResult
    pub last_is_success: bool,
}

/// 反向扫描尾部工具轮；遇到 Assistant 或 User 即停
pub fn scan_current_round(turns: &[Turn]) -> RoundScan {
    let mut scan = RoundScan::default();
    match turns.last() {
        None => return scan,
        Some(last) if last.is_user() => {
            scan.last_is_user = true;
            return scan;
        }
        Some(last) => {
            scan.last_is_success = matches!(last.kind, TurnKind::ToolResult { .. }) && !last.is_error();
        }
    }
    for turn in turns.iter().rev() {
        match &turn.kind {
            TurnKind::ToolResult { .. } => {
                if turn.is_error() {
                    scan.errors += 1;
                }
            }
            TurnKind::Assistant { .. } | TurnKind::User { .. } => break,
        }
    }
    scan
}

/// 由上一次的计数与当前 Turn 序列得出新的 error_count
pub fn next_error_count(previous: u32, turns: &[Turn]) -> u32 {
    let scan = scan_current_round(turns);
    if scan.last_is_user {
        0
    } else if scan.errors > 0 {
        previous.saturating_add(scan.errors)
    } else if scan.last_is_success {
        0
    } else {
        previous
    }
}

/// 从零重放：在每个「其后紧跟 Assistant」的位置（即一次 advance 发生处）应用规则
pub fn recompute_error_count(turns: &[Turn]) -> u32 {
    let mut count = 0;
    for (i, next) in turns.iter().enumerate().skip(1) {
        if matches!(next.kind, TurnKind::Assistant { .. }) {
            count = next_error_count(count, &turns[..i]);
        }
    }
    count
}

/// 一次 advance 的结果
#[derive(Debug, Clone)]
pub struct Advance {
    pub turn: Turn,
    pub error_count: u32,
    /// 是否因熔断而未调用模型
    pub tripped: bool,
}

pub struct TurnController {
    llm: Arc<dyn LlmClient>,
    error_threshold: u32,
}

impl TurnController {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            error_threshold: DEFAULT_ERROR_THRESHOLD,
        }
    }

    pub fn with_error_threshold(mut self, threshold: u32) -> Self {
        self.error_threshold = threshold.max(1);
        self
    }

    pub fn error_threshold(&self) -> u32 {
        self.error_threshold
    }

    pub fn llm(&self) -> &Arc<dyn LlmClient> {
        &self.llm
    }

    /// 计算下一条 Assistant Turn；不修改 state，由调用方追加并写回 error_count
    pub async fn advance(
        &self,
        state: &ConversationState,
        relay: Option<&mut StreamingRelay>,
        cancel: &CancellationToken,
    ) -> Result<Advance, AgentError> {
        let turns = state.turns();
        let error_count = next_error_count(state.error_count, turns);

        if error_count >= self.error_threshold {
            tracing::warn!(
                thread_id = %state.thread_id,
                error_count,
                threshold = self.error_threshold,
                "Circuit breaker tripped, model not called"
            );
            if let Some(relay) = relay {
                relay.notice(CIRCUIT_BREAKER_NOTICE);
            }
            return Ok(Advance {
                turn: Turn::assistant(CIRCUIT_BREAKER_NOTICE),
                error_count,
                tripped: true,
            });
        }

        let turn = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AgentError::Cancelled),
            res = self.call_model(turns, relay) => res?,
        };
        Ok(Advance {
            turn,
            error_count,
            tripped: false,
        })
    }

    async fn call_model(
        &self,
        turns: &[Turn],
        relay: Option<&mut StreamingRelay>,
    ) -> Result<Turn, LlmError> {
        let Some(relay) = relay else {
            return self.llm.invoke(turns).await;
        };
        let mut stream = self.llm.stream(turns).await?;
        let mut assembler = TurnAssembler::new();
        while let Some(fragment) = stream.next().await {
            let fragment = fragment?;
            assembler.push(&fragment);
            relay.relay(StagedFragment::model(fragment));
        }
        assembler.finish()
    }
}
