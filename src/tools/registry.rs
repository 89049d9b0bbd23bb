//! 工具注册表
//!
//! ToolCollaborator 是工具子系统的外部接口（list_tools / execute）。ToolRegistry 聚合多个协作方
//! （如多个 MCP 服务器）与进程内 Tool，按工具名路由调用。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// 工具描述：名称、说明、参数 JSON Schema
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "empty_object_schema", rename = "inputSchema")]
    pub input_schema: Value,
}

fn empty_object_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {},
        "required": []
    })
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

/// 单次工具调用失败
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("{0}")]
    Execution(String),

    /// 工具服务器连接 / 协议故障
    #[error("tool transport failed: {0}")]
    Transport(String),
}

/// 工具子系统接口
#[async_trait]
pub trait ToolCollaborator: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<ToolSpec>, ToolError>;

    async fn execute(&self, name: &str, arguments: Value) -> Result<String, ToolError>;
}

/// 进程内工具：名称、描述、参数 schema、异步执行
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn parameters_schema(&self) -> Value {
        empty_object_schema()
    }

    async fn execute(&self, args: Value) -> Result<String, String>;
}

/// 单个进程内工具包装为协作方
struct LocalTool(Arc<dyn Tool>);

#[async_trait]
impl ToolCollaborator for LocalTool {
    async fn list_tools(&self) -> Result<Vec<ToolSpec>, ToolError> {
        Ok(vec![ToolSpec::new(
            self.0.name(),
            self.0.description(),
            self.0.parameters_schema(),
        )])
    }

    async fn execute(&self, _name: &str, arguments: Value) -> Result<String, ToolError> {
        self.0.execute(arguments).await.map_err(ToolError::Execution)
    }
}

/// 工具名 -> 协作方 的路由表；保持工具登记顺序
#[derive(Default)]
pub struct ToolRegistry {
    routes: HashMap<String, Arc<dyn ToolCollaborator>>,
    specs: Vec<ToolSpec>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        let tool: Arc<dyn Tool> = Arc::new(tool);
        let spec = ToolSpec::new(tool.name(), tool.description(), tool.parameters_schema());
        self.insert(spec, Arc::new(LocalTool(tool)));
    }

    /// 登记一个协作方提供的全部工具；同名工具以后登记者为准
    pub async fn register_collaborator(
        &mut self,
        collaborator: Arc<dyn ToolCollaborator>,
    ) -> Result<usize, ToolError> {
        let specs = collaborator.list_tools().await?;
        let count = specs.len();
        for spec in specs {
            self.insert(spec, Arc::clone(&collaborator));
        }
        Ok(count)
    }

    fn insert(&mut self, spec: ToolSpec, route: Arc<dyn ToolCollaborator>) {
        if self.routes.insert(spec.name.clone(), route).is_some() {
            tracing::warn!(tool = %spec.name, "duplicate tool name, later registration wins");
            self.specs.retain(|s| s.name != spec.name);
        }
        self.specs.push(spec);
    }

    pub fn specs(&self) -> &[ToolSpec] {
        &self.specs
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.specs.iter().map(|s| s.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

#[async_trait]
impl ToolCollaborator for ToolRegistry {
    async fn list_tools(&self) -> Result<Vec<ToolSpec>, ToolError> {
        Ok(self.specs.clone())
    }

    async fn execute(&self, name: &str, arguments: Value) -> Result<String, ToolError> {
        let route = self
            .routes
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        route.execute(name, arguments).await
    }
}
