//! MCP（Model Context Protocol）stdio 客户端
//!
//! 启动服务器进程，按行收发 JSON-RPC 2.0：initialize 握手、tools/list（分页）、tools/call。
//! 后台读取任务按请求 id 把响应交给等待方；服务器退出时所有等待方收到 Transport 错误。

use std::collections::{BTreeMap, HashMap};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, Mutex};

use crate::config::McpServerConfig;
use crate::tools::{ToolCollaborator, ToolError, ToolRegistry, ToolSpec};

const PROTOCOL_VERSION: &str = "2024-11-05";

type Waiter = oneshot::Sender<Result<Value, ToolError>>;
type PendingMap = Arc<std::sync::Mutex<HashMap<u64, Waiter>>>;

/// 登记中的请求；被丢弃时（完成、写失败或调用方取消）从等待表移除
struct PendingGuard {
    pending: PendingMap,
    id: u64,
}

impl PendingGuard {
    fn register(pending: &PendingMap, id: u64) -> (Self, oneshot::Receiver<Result<Value, ToolError>>) {
        let (tx, rx) = oneshot::channel();
        if let Ok(mut map) = pending.lock() {
            map.insert(id, tx);
        }
        let guard = Self {
            pending: Arc::clone(pending),
            id,
        };
        (guard, rx)
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if let Ok(mut map) = self.pending.lock() {
            map.remove(&self.id);
        }
    }
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct ToolsListResult {
    #[serde(default)]
    tools: Vec<ToolSpec>,
    #[serde(rename = "nextCursor")]
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentItem {
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct CallToolResult {
    #[serde(default)]
    content: Vec<ContentItem>,
    #[serde(default, rename = "isError")]
    is_error: bool,
}

impl CallToolResult {
    fn text(&self) -> String {
        self.content
            .iter()
            .map(|item| match item {
                ContentItem::Text { text } => text.as_str(),
                ContentItem::Other => "[non-text content]",
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// 单个 MCP 服务器连接
pub struct McpClient {
    name: String,
    stdin: Mutex<ChildStdin>,
    pending: PendingMap,
    next_id: AtomicU64,
    _child: Mutex<Child>,
}

impl McpClient {
    /// 启动服务器进程并完成 initialize 握手
    pub async fn connect(name: &str, cfg: &McpServerConfig) -> Result<Self, ToolError> {
        if cfg.transport != "stdio" {
            return Err(ToolError::Transport(format!(
                "server '{name}': unsupported transport '{}'",
                cfg.transport
            )));
        }
        let mut command = Command::new(&cfg.command);
        command
            .args(&cfg.args)
            .envs(&cfg.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &cfg.cwd {
            command.current_dir(cwd);
        }
        let mut child = command
            .spawn()
            .map_err(|e| ToolError::Transport(format!("server '{name}' spawn failed: {e}")))?;

        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(i), Some(o)) => (i, o),
            _ => {
                return Err(ToolError::Transport(format!(
                    "server '{name}': stdio not captured"
                )))
            }
        };
        if let Some(stderr) = child.stderr.take() {
            let server = name.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(server = %server, "{}", line);
                }
            });
        }

        let pending: PendingMap = Arc::new(std::sync::Mutex::new(HashMap::new()));
        tokio::spawn(read_loop(name.to_string(), stdout, Arc::clone(&pending)));

        let client = Self {
            name: name.to_string(),
            stdin: Mutex::new(stdin),
            pending,
            next_id: AtomicU64::new(1),
            _child: Mutex::new(child),
        };
        client.initialize().await?;
        tracing::info!(server = %name, "MCP server connected");
        Ok(client)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn write_message(&self, message: &Value) -> Result<(), ToolError> {
        let mut line = message.to_string();
        line.push('\n');
        let mut stdin = self.stdin.lock().await;
        let written = match stdin.write_all(line.as_bytes()).await {
            Ok(()) => stdin.flush().await,
            Err(e) => Err(e),
        };
        written.map_err(|e| ToolError::Transport(format!("server '{}' write failed: {e}", self.name)))
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, ToolError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (_guard, rx) = PendingGuard::register(&self.pending, id);

        let message = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        self.write_message(&message).await?;
        rx.await.map_err(|_| {
            ToolError::Transport(format!("server '{}' dropped request {method}", self.name))
        })?
    }

    async fn notify(&self, method: &str) -> Result<(), ToolError> {
        self.write_message(&json!({ "jsonrpc": "2.0", "method": method }))
            .await
    }

    async fn initialize(&self) -> Result<(), ToolError> {
        let result = self
            .request(
                "initialize",
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": { "name": "scout", "version": env!("CARGO_PKG_VERSION") },
                }),
            )
            .await?;
        tracing::debug!(server = %self.name, info = %result["serverInfo"], "initialize ok");
        self.notify("notifications/initialized").await
    }
}

/// 读取服务器输出，按 id 唤醒等待方；EOF 时通知所有未完成请求
async fn read_loop(server: String, stdout: ChildStdout, pending: PendingMap) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(server = %server, "MCP read failed: {}", e);
                break;
            }
        };
        let message: Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(_) => {
                tracing::debug!(server = %server, "non JSON-RPC output: {}", line);
                continue;
            }
        };
        let Some(id) = message.get("id").and_then(Value::as_u64) else {
            if let Some(method) = message.get("method").and_then(Value::as_str) {
                tracing::debug!(server = %server, method, "MCP notification");
            }
            continue;
        };
        if message.get("method").is_some() {
            tracing::warn!(server = %server, "unexpected request from MCP server");
            continue;
        }
        let outcome = match message.get("error") {
            Some(err) => {
                let err: RpcError = serde_json::from_value(err.clone()).unwrap_or(RpcError {
                    code: 0,
                    message: err.to_string(),
                });
                Err(ToolError::Execution(format!("{} (code {})", err.message, err.code)))
            }
            None => Ok(message.get("result").cloned().unwrap_or(Value::Null)),
        };
        let waiter = pending.lock().ok().and_then(|mut map| map.remove(&id));
        match waiter {
            Some(waiter) => {
                let _ = waiter.send(outcome);
            }
            None => tracing::warn!(server = %server, id, "response for unknown request"),
        }
    }
    tracing::warn!(server = %server, "MCP server closed its output");
    let waiters: Vec<Waiter> = match pending.lock() {
        Ok(mut map) => map.drain().map(|(_, waiter)| waiter).collect(),
        Err(_) => Vec::new(),
    };
    for waiter in waiters {
        let _ = waiter.send(Err(ToolError::Transport(format!("server '{server}' exited"))));
    }
}

#[async_trait]
impl ToolCollaborator for McpClient {
    async fn list_tools(&self) -> Result<Vec<ToolSpec>, ToolError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = match &cursor {
                Some(c) => json!({ "cursor": c }),
                None => json!({}),
            };
            let page: ToolsListResult = serde_json::from_value(self.request("tools/list", params).await?)
                .map_err(|e| ToolError::Transport(format!("bad tools/list result: {e}")))?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }
        Ok(tools)
    }

    async fn execute(&self, name: &str, arguments: Value) -> Result<String, ToolError> {
        let raw = self
            .request("tools/call", json!({ "name": name, "arguments": arguments }))
            .await?;
        let result: CallToolResult = serde_json::from_value(raw)
            .map_err(|e| ToolError::Transport(format!("bad tools/call result: {e}")))?;
        if result.is_error {
            Err(ToolError::Execution(result.text()))
        } else {
            Ok(result.text())
        }
    }
}

/// 依次连接全部服务器并汇总工具；任一服务器失败即返回错误
pub async fn connect_all(
    servers: &BTreeMap<String, McpServerConfig>,
) -> Result<ToolRegistry, ToolError> {
    let mut registry = ToolRegistry::new();
    for (name, cfg) in servers {
        let client = Arc::new(McpClient::connect(name, cfg).await?);
        let count = registry.register_collaborator(client).await?;
        tracing::info!(server = %name, tools = count, "MCP tools loaded");
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_result_text_joins_items() {
        let result: CallToolResult = serde_json::from_value(json!({
            "content": [
                {"type": "text", "text": "line one"},
                {"type": "image", "data": "...", "mimeType": "image/png"},
                {"type": "text", "text": "line two"}
            ],
            "isError": false
        }))
        .unwrap();
        assert_eq!(result.text(), "line one\n[non-text content]\nline two");
        assert!(!result.is_error);
    }

    #[test]
    fn test_tools_list_page_parses() {
        let page: ToolsListResult = serde_json::from_value(json!({
            "tools": [{"name": "read_file", "inputSchema": {"type": "object"}}],
            "nextCursor": "abc"
        }))
        .unwrap();
        assert_eq!(page.tools[0].name, "read_file");
        assert_eq!(page.next_cursor.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn test_abandoned_request_leaves_no_waiter() {
        let pending: PendingMap = Arc::new(std::sync::Mutex::new(HashMap::new()));
        let (guard, rx) = PendingGuard::register(&pending, 7);
        assert!(pending.lock().unwrap().contains_key(&7));

        // 调用方在响应到达前被取消
        let waiting = tokio::spawn(async move {
            let _guard = guard;
            rx.await
        });
        waiting.abort();
        assert!(waiting.await.unwrap_err().is_cancelled());
        assert!(pending.lock().unwrap().is_empty());
    }

    #[test]
    fn test_answered_request_is_unregistered() {
        let pending: PendingMap = Arc::new(std::sync::Mutex::new(HashMap::new()));
        let (guard, mut rx) = PendingGuard::register(&pending, 1);
        let waiter = pending.lock().unwrap().remove(&1).unwrap();
        waiter.send(Ok(json!({"ok": true}))).unwrap();
        drop(guard);
        assert_eq!(rx.try_recv().unwrap().unwrap(), json!({"ok": true}));
        assert!(pending.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_transport_is_rejected() {
        let cfg = McpServerConfig {
            command: "npx".to_string(),
            args: vec![],
            env: HashMap::new(),
            cwd: None,
            transport: "sse".to_string(),
        };
        assert!(matches!(
            McpClient::connect("remote", &cfg).await,
            Err(ToolError::Transport(_))
        ));
    }
}
