//! Streaming Relay：模型片段 -> 展示事件
//!
//! - 文本增量按到达顺序原样转发；
//! - 每轮中每个调用序号仅在第一次带名字的增量时发出一次 ToolStarted；
//! - 参数增量原样转发，并按序号缓存；
//! - Finish(ToolCalls) 发出分隔事件并重置本轮状态；
//! - 工具执行阶段的片段整体丢弃，只渲染模型产出的内容。

use std::collections::{BTreeMap, BTreeSet};

use tokio::sync::mpsc;

use crate::llm::{FinishReason, StreamFragment};
use crate::react::DisplayEvent;

/// 片段来源阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// 模型决策阶段
    Model,
    /// 工具执行阶段
    Tools,
}

/// 带阶段标签的片段
#[derive(Debug, Clone)]
pub struct StagedFragment {
    pub stage: Stage,
    pub fragment: StreamFragment,
}

impl StagedFragment {
    pub fn model(fragment: StreamFragment) -> Self {
        Self {
            stage: Stage::Model,
            fragment,
        }
    }

    pub fn tools(fragment: StreamFragment) -> Self {
        Self {
            stage: Stage::Tools,
            fragment,
        }
    }
}

/// 每个流式会话独占一个 relay；状态只在轮次边界重置
#[derive(Debug)]
pub struct StreamingRelay {
    tx: mpsc::UnboundedSender<DisplayEvent>,
    started: BTreeSet<u32>,
    args: BTreeMap<u32, String>,
}

impl StreamingRelay {
    pub fn new(tx: mpsc::UnboundedSender<DisplayEvent>) -> Self {
        Self {
            tx,
            started: BTreeSet::new(),
            args: BTreeMap::new(),
        }
    }

    /// 创建 relay 及其事件接收端
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<DisplayEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn relay(&mut self, staged: StagedFragment) {
        if staged.stage == Stage::Tools {
            return;
        }
        match staged.fragment {
            StreamFragment::Text(text) => {
                if !text.is_empty() {
                    self.emit(DisplayEvent::Text { text });
                }
            }
            StreamFragment::ToolCall {
                index,
                name,
                arguments,
                ..
            } => {
                if let Some(name) = name.filter(|n| !n.is_empty()) {
                    if self.started.insert(index) {
                        self.emit(DisplayEvent::ToolStarted { index, name });
                    }
                }
                if let Some(delta) = arguments.filter(|a| !a.is_empty()) {
                    self.args.entry(index).or_default().push_str(&delta);
                    self.emit(DisplayEvent::ToolArgs { index, delta });
                }
            }
            StreamFragment::Finish(FinishReason::ToolCalls) => {
                self.emit(DisplayEvent::RoundSeparator);
                self.started.clear();
                self.args.clear();
            }
            StreamFragment::Finish(_) => {}
        }
    }

    /// 本轮某个调用序号已累积的参数文本
    pub fn buffered_args(&self, index: u32) -> Option<&str> {
        self.args.get(&index).map(String::as_str)
    }

    pub fn notice(&self, text: impl Into<String>) {
        self.emit(DisplayEvent::Notice { text: text.into() });
    }

    fn emit(&self, event: DisplayEvent) {
        // 接收端关闭时静默丢弃
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(index: u32, name: Option<&str>, args: Option<&str>) -> StreamFragment {
        StreamFragment::ToolCall {
            index,
            id: name.map(|_| format!("call_{index}")),
            name: name.map(str::to_string),
            arguments: args.map(str::to_string),
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<DisplayEvent>) -> Vec<DisplayEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    #[test]
    fn test_tool_started_once_per_index() {
        let (mut relay, mut rx) = StreamingRelay::channel();
        relay.relay(StagedFragment::model(call(0, Some("read_file"), None)));
        relay.relay(StagedFragment::model(call(0, None, Some("{\"pa"))));
        relay.relay(StagedFragment::model(call(0, Some("read_file"), Some("th\":1}"))));
        relay.relay(StagedFragment::model(call(1, Some("git_status"), Some("{}"))));

        let events = drain(&mut rx);
        let started: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, DisplayEvent::ToolStarted { .. }))
            .collect();
        assert_eq!(started.len(), 2);
        assert_eq!(relay.buffered_args(0), Some("{\"path\":1}"));
        assert_eq!(
            events[1],
            DisplayEvent::ToolArgs {
                index: 0,
                delta: "{\"pa".to_string()
            }
        );
    }

    #[test]
    fn test_separator_resets_round() {
        let (mut relay, mut rx) = StreamingRelay::channel();
        relay.relay(StagedFragment::model(call(0, Some("search"), None)));
        relay.relay(StagedFragment::model(StreamFragment::Finish(FinishReason::ToolCalls)));
        relay.relay(StagedFragment::model(call(0, Some("search"), None)));

        let events = drain(&mut rx);
        assert_eq!(
            events,
            vec![
                DisplayEvent::ToolStarted {
                    index: 0,
                    name: "search".to_string()
                },
                DisplayEvent::RoundSeparator,
                DisplayEvent::ToolStarted {
                    index: 0,
                    name: "search".to_string()
                },
            ]
        );
        assert_eq!(relay.buffered_args(0), None);
    }

    #[test]
    fn test_tools_stage_is_dropped_and_text_kept_in_order() {
        let (mut relay, mut rx) = StreamingRelay::channel();
        relay.relay(StagedFragment::model(StreamFragment::Text("Hel".into())));
        relay.relay(StagedFragment::tools(StreamFragment::Text("tool output".into())));
        relay.relay(StagedFragment::tools(call(3, Some("x"), Some("{}"))));
        relay.relay(StagedFragment::model(StreamFragment::Text("lo".into())));
        relay.relay(StagedFragment::model(StreamFragment::Finish(FinishReason::Stop)));

        assert_eq!(
            drain(&mut rx),
            vec![
                DisplayEvent::Text { text: "Hel".into() },
                DisplayEvent::Text { text: "lo".into() },
            ]
        );
    }

    #[test]
    fn test_closed_receiver_does_not_panic() {
        let (mut relay, rx) = StreamingRelay::channel();
        drop(rx);
        relay.relay(StagedFragment::model(StreamFragment::Text("x".into())));
        relay.notice("still fine");
    }
}
