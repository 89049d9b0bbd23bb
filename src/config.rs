//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `SCOUT__*` 覆盖（双下划线表示嵌套，如 `SCOUT__LLM__MODEL=gpt-4o-mini`）。
//! MCP 服务器清单单独放在 JSON 文件（`{"mcpServers": {...}}`），其中 `${VAR}` 形式的值在加载时替换为环境变量。

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::core::DEFAULT_ERROR_THRESHOLD;
use crate::react::DEFAULT_MAX_STEPS;
use crate::tools::DEFAULT_MAX_CONCURRENT_TOOLS;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub mcp: McpSection,
    pub persistence: PersistenceSection,
}

/// [app] 段：会话线程、步数上限、熔断阈值、工具并发、输入结束标记
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
    pub thread_id: String,
    /// 单次用户请求内模型 / 工具往返上限
    pub max_steps: usize,
    /// 连续工具错误达到该值时不再调用模型
    pub error_threshold: u32,
    pub max_concurrent_tools: usize,
    /// 多行输入的结束标记（整行等于该值即提交），默认空行
    pub input_terminator: String,
    pub system_prompt_path: Option<PathBuf>,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "Scout".to_string(),
            thread_id: "thread_1".to_string(),
            max_steps: DEFAULT_MAX_STEPS,
            error_threshold: DEFAULT_ERROR_THRESHOLD,
            max_concurrent_tools: DEFAULT_MAX_CONCURRENT_TOOLS,
            input_terminator: String::new(),
            system_prompt_path: None,
        }
    }
}

/// [llm] 段：模型与端点
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    /// 存放 API Key 的环境变量名
    pub api_key_env: String,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-5-nano".to_string(),
            base_url: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
        }
    }
}

/// [mcp] 段：握手超时、服务器清单文件、内联服务器
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct McpSection {
    pub connect_timeout_secs: u64,
    pub config_path: Option<PathBuf>,
    pub servers: BTreeMap<String, McpServerConfig>,
}

impl Default for McpSection {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 120,
            config_path: Some(PathBuf::from("config/mcp_servers.json")),
            servers: BTreeMap::new(),
        }
    }
}

/// 单个 MCP 服务器的启动参数
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct McpServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default = "default_transport")]
    pub transport: String,
}

fn default_transport() -> String {
    "stdio".to_string()
}

/// [persistence] 段：memory / sqlite
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PersistenceSection {
    pub backend: String,
    pub path: PathBuf,
}

impl Default for PersistenceSection {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            path: PathBuf::from("workspace/conversations.db"),
        }
    }
}

/// MCP 清单加载错误
#[derive(Error, Debug)]
pub enum McpConfigError {
    #[error("cannot read MCP config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid MCP config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("environment variable {var} is not set (server '{server}')")]
    MissingEnv { var: String, server: String },

    #[error("cannot load .env: {0}")]
    Env(#[from] dotenvy::Error),
}

/// 加载 .env 到进程环境（不覆盖已存在的变量），供 `${VAR}` 展开使用
///
/// 未指定路径时从当前目录向上查找 .env，找不到不算错误。返回实际加载的文件。
pub fn load_dotenv(path: Option<&Path>) -> Result<Option<PathBuf>, McpConfigError> {
    match path {
        Some(path) => {
            dotenvy::from_path(path)?;
            Ok(Some(path.to_path_buf()))
        }
        None => match dotenvy::dotenv() {
            Ok(found) => Ok(Some(found)),
            Err(e) if e.not_found() => Ok(None),
            Err(e) => Err(e.into()),
        },
    }
}

/// 从 config 目录加载配置，环境变量 SCOUT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 SCOUT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("SCOUT")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

#[derive(Deserialize)]
struct McpFile {
    #[serde(rename = "mcpServers", default)]
    mcp_servers: BTreeMap<String, McpServerConfig>,
}

/// 汇总 MCP 服务器：清单文件（存在时）+ 内联配置（同名时内联优先），并解析 `${VAR}`
pub fn load_mcp_servers(
    section: &McpSection,
) -> Result<BTreeMap<String, McpServerConfig>, McpConfigError> {
    let mut servers = BTreeMap::new();
    if let Some(path) = section.config_path.as_ref().filter(|p| p.exists()) {
        let raw = std::fs::read_to_string(path).map_err(|source| McpConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let file: McpFile = serde_json::from_str(&raw)?;
        servers.extend(file.mcp_servers);
    }
    servers.extend(section.servers.clone());
    resolve_env_vars(servers, |var| std::env::var(var).ok())
}

/// 将 env / args / cwd 中 `${VAR}` 形式的值替换为 lookup 结果；未设置即报错
pub fn resolve_env_vars<F>(
    mut servers: BTreeMap<String, McpServerConfig>,
    lookup: F,
) -> Result<BTreeMap<String, McpServerConfig>, McpConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let resolve = |server: &str, value: &mut String| -> Result<(), McpConfigError> {
        if let Some(var) = value.strip_prefix("${").and_then(|v| v.strip_suffix('}')) {
            *value = lookup(var).ok_or_else(|| McpConfigError::MissingEnv {
                var: var.to_string(),
                server: server.to_string(),
            })?;
        }
        Ok(())
    };

    for (name, cfg) in servers.iter_mut() {
        for value in cfg.env.values_mut() {
            resolve(name, value)?;
        }
        for arg in cfg.args.iter_mut() {
            resolve(name, arg)?;
        }
        if let Some(cwd) = cfg.cwd.as_mut() {
            let mut s = cwd.to_string_lossy().into_owned();
            resolve(name, &mut s)?;
            *cwd = PathBuf::from(s);
        }
    }
    Ok(servers)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(args: &[&str], env: &[(&str, &str)], cwd: Option<&str>) -> McpServerConfig {
        McpServerConfig {
            command: "npx".to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            env: env
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            cwd: cwd.map(PathBuf::from),
            transport: default_transport(),
        }
    }

    fn lookup(var: &str) -> Option<String> {
        match var {
            "PROJECT_DIR" => Some("/home/me/projects".to_string()),
            "NCBI_API_KEY" => Some("secret".to_string()),
            _ => None,
        }
    }

    #[test]
    fn test_resolve_env_vars_in_env_args_and_cwd() {
        let mut servers = BTreeMap::new();
        servers.insert(
            "filesystem".to_string(),
            server(
                &["-y", "@modelcontextprotocol/server-filesystem", "${PROJECT_DIR}"],
                &[("NCBI_API_KEY", "${NCBI_API_KEY}"), ("PLAIN", "value")],
                Some("${PROJECT_DIR}"),
            ),
        );
        let resolved = resolve_env_vars(servers, lookup).unwrap();
        let fs = &resolved["filesystem"];
        assert_eq!(fs.args[2], "/home/me/projects");
        assert_eq!(fs.env["NCBI_API_KEY"], "secret");
        assert_eq!(fs.env["PLAIN"], "value");
        assert_eq!(fs.cwd.as_deref(), Some(Path::new("/home/me/projects")));
    }

    #[test]
    fn test_missing_env_var_names_variable_and_server() {
        let mut servers = BTreeMap::new();
        servers.insert("pubmed".to_string(), server(&["${UNSET_VAR}"], &[], None));
        match resolve_env_vars(servers, lookup) {
            Err(McpConfigError::MissingEnv { var, server }) => {
                assert_eq!(var, "UNSET_VAR");
                assert_eq!(server, "pubmed");
            }
            other => panic!("expected MissingEnv, got {other:?}"),
        }
    }

    #[test]
    fn test_dotenv_values_feed_server_expansion() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "SCOUT_DOTENV_DATA_DIR=/srv/data\n").unwrap();

        assert_eq!(load_dotenv(Some(path.as_path())).unwrap(), Some(path.clone()));
        let mut servers = BTreeMap::new();
        servers.insert("files".to_string(), server(&["${SCOUT_DOTENV_DATA_DIR}"], &[], None));
        let resolved = resolve_env_vars(servers, |var| std::env::var(var).ok()).unwrap();
        assert_eq!(resolved["files"].args[0], "/srv/data");
    }

    #[test]
    fn test_missing_explicit_dotenv_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_dotenv(Some(dir.path().join("absent.env").as_path())),
            Err(McpConfigError::Env(_))
        ));
    }

    #[test]
    fn test_mcp_file_shape() {
        let file: McpFile = serde_json::from_str(
            r#"{"mcpServers": {"git": {"command": "uvx", "args": ["mcp-server-git"]}}}"#,
        )
        .unwrap();
        assert_eq!(file.mcp_servers["git"].transport, "stdio");
        assert!(file.mcp_servers["git"].env.is_empty());
    }

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.app.max_steps, 50);
        assert_eq!(cfg.app.error_threshold, 5);
        assert_eq!(cfg.mcp.connect_timeout_secs, 120);
        assert_eq!(cfg.persistence.backend, "memory");
    }
}
