//! 终端渲染：把 DisplayEvent 与请求结果着色输出
//!
//! 工具开始为蓝色，参数为灰色；诊断为红色，修复成功为绿色，无可清理为黄色。

use std::io::{self, Write};

use crossterm::style::Stylize;

use crate::agent::SubmitOutcome;
use crate::core::RecoveryAction;
use crate::react::DisplayEvent;

pub fn render_event<W: Write>(out: &mut W, event: &DisplayEvent) -> io::Result<()> {
    match event {
        DisplayEvent::Text { text } => write!(out, "{text}")?,
        DisplayEvent::ToolStarted { name, .. } => {
            write!(out, "\n\n{}\n", format!("> Executing Tool: {name}").blue())?
        }
        DisplayEvent::ToolArgs { delta, .. } => write!(out, "{}", delta.as_str().dark_grey())?,
        DisplayEvent::RoundSeparator => writeln!(out)?,
        DisplayEvent::Notice { text } => write!(out, "{}", text.as_str().yellow())?,
    }
    out.flush()
}

pub fn ai_header<W: Write>(out: &mut W) -> io::Result<()> {
    write!(out, "{} ", "[AI]:".green().bold())?;
    out.flush()
}

pub fn banner<W: Write>(out: &mut W, name: &str, tools: usize) -> io::Result<()> {
    writeln!(out, "{}", format!("Loaded {tools} tools.").green())?;
    writeln!(out, "\n--- {name} Agent Started ---")?;
    writeln!(
        out,
        "Type 'exit' or 'quit' to leave. Finish a message with an empty line."
    )
}

pub fn user_prompt<W: Write>(out: &mut W) -> io::Result<()> {
    write!(out, "\n{} ", "[User]:".cyan().bold())?;
    out.flush()
}

/// 请求结束后的状态行：完成时打印分隔线，失败时打印诊断与恢复结果
pub fn render_outcome<W: Write>(out: &mut W, outcome: &SubmitOutcome) -> io::Result<()> {
    match outcome {
        SubmitOutcome::Completed { .. } => writeln!(out, "\n{}", "=".repeat(50)),
        SubmitOutcome::Failed {
            error,
            action,
            repaired,
        } => {
            writeln!(out, "\n{}", format!("Error: {error}").red())?;
            match (action, repaired) {
                (RecoveryAction::RollbackRequest, true) => writeln!(
                    out,
                    "{}",
                    "Step limit reached: the request and its context were removed. You can ask again."
                        .green()
                ),
                (_, true) => writeln!(
                    out,
                    "{}",
                    "Conversation cleaned up. You can enter the next message.".green()
                ),
                (_, false) => writeln!(
                    out,
                    "{}",
                    "Nothing to clean up; continuing with the conversation as is.".yellow()
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::AgentError;

    fn rendered(f: impl FnOnce(&mut Vec<u8>) -> io::Result<()>) -> String {
        let mut buf = Vec::new();
        f(&mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_tool_started_line() {
        let s = rendered(|out| {
            render_event(
                out,
                &DisplayEvent::ToolStarted {
                    index: 0,
                    name: "git_log".into(),
                },
            )
        });
        assert!(s.contains("Executing Tool: git_log"));
    }

    #[test]
    fn test_failed_outcome_messages() {
        let cleaned = rendered(|out| {
            render_outcome(
                out,
                &SubmitOutcome::Failed {
                    error: AgentError::Transport("reset".into()),
                    action: RecoveryAction::Repair,
                    repaired: true,
                },
            )
        });
        assert!(cleaned.contains("Transport error: reset"));
        assert!(cleaned.contains("cleaned up"));

        let nothing = rendered(|out| {
            render_outcome(
                out,
                &SubmitOutcome::Failed {
                    error: AgentError::Protocol("bad".into()),
                    action: RecoveryAction::Repair,
                    repaired: false,
                },
            )
        });
        assert!(nothing.contains("Nothing to clean up"));
    }
}
