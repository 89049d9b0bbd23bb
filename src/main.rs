//! Scout - 终端对话智能体
//!
//! 入口：初始化日志与配置，连接 MCP 工具服务器，构建 Agent，运行交互循环。
//! 用法：`scout [config.toml]`

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use scout::config::{load_config, load_dotenv, load_mcp_servers};
use scout::core::{AgentBuilder, SessionSupervisor};
use scout::react::StreamingRelay;
use scout::tools::connect_all;
use scout::ui::{ai_header, banner, render_event, render_outcome, user_prompt, InputReader, UserInput};
use tokio::io::BufReader;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 日志写 stderr：默认 warn，可通过 RUST_LOG 覆盖
    scout::observability::init();

    // .env 需在展开 MCP 配置里的 ${VAR} 之前载入
    if let Some(path) = load_dotenv(None).context("Failed to load .env")? {
        tracing::info!(path = %path.display(), "Loaded .env");
    }

    let cfg = load_config(std::env::args().nth(1).map(PathBuf::from))
        .context("Failed to load config")?;
    let servers = load_mcp_servers(&cfg.mcp).context("Failed to load MCP server config")?;

    println!("CONNECTING MCP SERVER...");
    let timeout = Duration::from_secs(cfg.mcp.connect_timeout_secs);
    let tools = match tokio::time::timeout(timeout, connect_all(&servers)).await {
        Err(_) => bail!("MCP server connection timed out after {}s", timeout.as_secs()),
        Ok(Err(e)) => bail!("MCP connection failed: {e}"),
        Ok(Ok(tools)) => tools,
    };
    if tools.is_empty() {
        bail!("No MCP tools loaded");
    }
    let tool_count = tools.len();

    let mut agent = AgentBuilder::new(cfg.clone(), tools)
        .build()
        .await
        .context("Failed to create agent")?;

    let mut stdout = std::io::stdout();
    banner(&mut stdout, &cfg.app.name, tool_count)?;

    let supervisor = Arc::new(SessionSupervisor::new());
    let mut reader = InputReader::new(
        BufReader::new(tokio::io::stdin()),
        cfg.app.input_terminator.clone(),
    );

    loop {
        user_prompt(&mut stdout)?;
        let input = tokio::select! {
            read = reader.read() => read.context("Failed to read input")?,
            _ = tokio::signal::ctrl_c() => UserInput::Exit,
        };
        let text = match input {
            UserInput::Exit => break,
            UserInput::Empty => continue,
            UserInput::Message(text) => text,
        };

        println!();
        ai_header(&mut stdout)?;
        let (mut relay, mut events) = StreamingRelay::channel();
        let render_task = tokio::spawn(async move {
            let mut out = std::io::stdout();
            while let Some(event) = events.recv().await {
                if render_event(&mut out, &event).is_err() {
                    break;
                }
            }
        });

        let cancel = supervisor.begin_request();
        let outcome = {
            let submit = agent.submit(&text, Some(&mut relay), &cancel);
            tokio::pin!(submit);
            loop {
                tokio::select! {
                    outcome = &mut submit => break outcome,
                    _ = tokio::signal::ctrl_c() => {
                        if supervisor.cancel_request() {
                            tracing::info!("Request cancelled by user");
                        }
                    }
                }
            }
        };
        supervisor.end_request();

        drop(relay);
        let _ = render_task.await;
        render_outcome(&mut stdout, &outcome)?;
    }

    supervisor.shutdown();
    writeln!(stdout, "Bye.")?;
    Ok(())
}
