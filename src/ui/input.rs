//! 多行输入：逐行读取，直到整行等于结束标记（默认空行）或 EOF

use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};

/// 一次读取的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserInput {
    Message(String),
    /// 用户输入 exit / quit 或输入流结束
    Exit,
    Empty,
}

/// 将一段原始输入归类
pub fn classify(raw: &str) -> UserInput {
    let text = raw.trim();
    if text.is_empty() {
        UserInput::Empty
    } else if text.eq_ignore_ascii_case("exit") || text.eq_ignore_ascii_case("quit") {
        UserInput::Exit
    } else {
        UserInput::Message(text.to_string())
    }
}

pub struct InputReader<R> {
    lines: Lines<R>,
    terminator: String,
    eof: bool,
}

impl<R: AsyncBufRead + Unpin> InputReader<R> {
    pub fn new(reader: R, terminator: impl Into<String>) -> Self {
        Self {
            lines: reader.lines(),
            terminator: terminator.into(),
            eof: false,
        }
    }

    /// 读取一条多行输入
    pub async fn read(&mut self) -> std::io::Result<UserInput> {
        if self.eof {
            return Ok(UserInput::Exit);
        }
        let mut buf: Vec<String> = Vec::new();
        loop {
            match self.lines.next_line().await? {
                Some(line) => {
                    if line.trim_end() == self.terminator {
                        break;
                    }
                    buf.push(line);
                }
                None => {
                    self.eof = true;
                    if buf.is_empty() {
                        return Ok(UserInput::Exit);
                    }
                    break;
                }
            }
        }
        Ok(classify(&buf.join("\n")))
    }
}
