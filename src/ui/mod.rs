//! 终端交互层：多行输入读取（input）与 crossterm 着色输出（render）

pub mod input;
pub mod render;

pub use input::{classify, InputReader, UserInput};
pub use render::{ai_header, banner, render_event, render_outcome, user_prompt};
