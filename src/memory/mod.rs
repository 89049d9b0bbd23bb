//! 记忆层：对话日志（Message Store）与按线程持久化

pub mod conversation;
pub mod persistence;

pub use conversation::{
    MessageStore, Role, StoreEntry, ToolCall, Turn, TurnId, TurnKind, TOOL_ERROR_MARKER,
};
pub use persistence::{ConversationStore, InMemoryStore, PersistenceError, SqliteStore};
