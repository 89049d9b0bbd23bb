//! 会话监管：中断管理
//!
//! 会话级 CancellationToken 在退出时取消全部工作；每次用户请求派生一个子 token，
//! Ctrl+C 只取消当前请求，会话继续等待下一条输入。

use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
pub struct SessionSupervisor {
    cancel_token: CancellationToken,
    current: Mutex<Option<CancellationToken>>,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为新请求创建子 token，并记为当前请求
    pub fn begin_request(&self) -> CancellationToken {
        let token = self.cancel_token.child_token();
        if let Ok(mut current) = self.current.lock() {
            *current = Some(token.clone());
        }
        token
    }

    /// 请求结束
    pub fn end_request(&self) {
        if let Ok(mut current) = self.current.lock() {
            *current = None;
        }
    }

    /// 取消当前请求；没有进行中的请求时返回 false
    pub fn cancel_request(&self) -> bool {
        let current = self.current.lock().ok().and_then(|mut c| c.take());
        match current {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.current.lock().map(|c| c.is_some()).unwrap_or(false)
    }

    /// 取消整个会话（含进行中的请求）
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }
}
