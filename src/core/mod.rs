//! 核心层：错误与恢复、会话状态、Turn Controller、会话监管、构建器

pub mod builder;
pub mod controller;
pub mod error;
pub mod recovery;
pub mod session_supervisor;
pub mod state;

pub use builder::{create_llm_from_config, open_store, AgentBuilder, DEFAULT_SYSTEM_PROMPT};
pub use controller::{
    next_error_count, recompute_error_count, scan_current_round, Advance, RoundScan,
    TurnController, CIRCUIT_BREAKER_NOTICE, DEFAULT_ERROR_THRESHOLD,
};
pub use error::{AgentError, RecoveryAction};
pub use recovery::RecoveryManager;
pub use session_supervisor::SessionSupervisor;
pub use state::{ConversationState, ConversationThread};
