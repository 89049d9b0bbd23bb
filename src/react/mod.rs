//! 执行层：Agent 主循环、Streaming Relay 与展示事件

pub mod events;
pub mod loop_;
pub mod relay;

pub use events::DisplayEvent;
pub use loop_::{AgentLoop, LoopOutcome, DEFAULT_MAX_STEPS};
pub use relay::{Stage, StagedFragment, StreamingRelay};
