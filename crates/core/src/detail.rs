#![forbid(unsafe_code)]

use crate::ids::NodeId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub role: String,
    pub content: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentInfo {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub plan_state: Value,
    #[serde(default)]
    pub emotion: Value,
    #[serde(default)]
    pub short_memory: Vec<MemoryEntry>,
}

/// Agent entry as returned by the node state endpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub name: String,
    #[serde(flatten)]
    pub info: AgentInfo,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeState {
    #[serde(default)]
    pub turns: u64,
    #[serde(default)]
    pub agents: Vec<AgentRecord>,
}

/// Deltas pushed on the node-scoped stream.
#[derive(Clone, Debug, PartialEq)]
pub enum NodeEvent {
    AgentCtxDelta {
        agent: String,
        role: String,
        content: String,
    },
    EmotionUpdate {
        agent: String,
        emotion: Value,
    },
    PlanUpdate {
        agent: String,
        plan: Value,
    },
    /// Anything else; kept verbatim in the event log.
    Other(Value),
}

#[derive(Deserialize)]
struct CtxDelta {
    agent: String,
    #[serde(default)]
    role: String,
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct EmotionDelta {
    agent: String,
    #[serde(default)]
    emotion: Value,
}

#[derive(Deserialize)]
struct PlanDelta {
    agent: String,
    #[serde(default)]
    plan: Value,
}

/// Decodes one node-stream message. Unknown types come back as [`NodeEvent::Other`] with the
/// whole message; malformed known types and non-JSON input are errors.
pub fn decode_node_event(text: &str) -> Result<NodeEvent, serde_json::Error> {
    let message: Value = serde_json::from_str(text)?;
    let kind = message.get("type").and_then(Value::as_str).unwrap_or_default();
    let data = message.get("data").cloned().unwrap_or(Value::Null);
    let event = match kind {
        "agent_ctx_delta" => {
            let CtxDelta {
                agent,
                role,
                content,
            } = serde_json::from_value(data)?;
            NodeEvent::AgentCtxDelta {
                agent,
                role,
                content,
            }
        }
        "emotion_update" => {
            let EmotionDelta { agent, emotion } = serde_json::from_value(data)?;
            NodeEvent::EmotionUpdate { agent, emotion }
        }
        "plan_update" => {
            let PlanDelta { agent, plan } = serde_json::from_value(data)?;
            NodeEvent::PlanUpdate { agent, plan }
        }
        _ => NodeEvent::Other(message),
    };
    Ok(event)
}

/// Auxiliary state of the selected node: ordered event log, agent registry, turn counter.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeDetail {
    pub node: NodeId,
    pub turns: u64,
    pub agents: BTreeMap<String, AgentInfo>,
    pub events: Vec<Value>,
}

impl NodeDetail {
    pub fn new(node: NodeId) -> Self {
        Self {
            node,
            turns: 0,
            agents: BTreeMap::new(),
            events: Vec::new(),
        }
    }

    pub fn replace_events(&mut self, events: Vec<Value>) {
        self.events = events;
    }

    pub fn replace_state(&mut self, state: NodeState) {
        self.turns = state.turns;
        self.agents = state
            .agents
            .into_iter()
            .map(|record| (record.name, record.info))
            .collect();
    }

    /// Returns `true` when the detail changed. Deltas for agents this client has not loaded
    /// are dropped; the next full refresh brings them in.
    pub fn apply(&mut self, event: NodeEvent) -> bool {
        match event {
            NodeEvent::AgentCtxDelta {
                agent,
                role,
                content,
            } => match self.agents.get_mut(&agent) {
                Some(info) => {
                    info.short_memory.push(MemoryEntry { role, content });
                    true
                }
                None => false,
            },
            NodeEvent::EmotionUpdate { agent, emotion } => match self.agents.get_mut(&agent) {
                Some(info) => {
                    info.emotion = emotion;
                    true
                }
                None => false,
            },
            NodeEvent::PlanUpdate { agent, plan } => match self.agents.get_mut(&agent) {
                Some(info) => {
                    info.plan_state = plan;
                    true
                }
                None => false,
            },
            NodeEvent::Other(value) => {
                self.events.push(value);
                true
            }
        }
    }
}

/// One-line summary of an event-log entry, e.g. `[public_event] narrator: The gate opens.`
pub fn format_event(event: &Value) -> String {
    let kind = event
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("event");
    let body = event.get("data").unwrap_or(event);
    let agent = ["agent", "speaker", "name"]
        .iter()
        .find_map(|key| body.get(*key).and_then(Value::as_str));
    let text = ["content", "text", "message"]
        .iter()
        .find_map(|key| body.get(*key).and_then(Value::as_str));

    match (agent, text) {
        (Some(agent), Some(text)) => format!("[{kind}] {agent}: {}", one_line(text)),
        (None, Some(text)) => format!("[{kind}] {}", one_line(text)),
        (Some(agent), None) => format!("[{kind}] {agent}"),
        (None, None) => format!("[{kind}]"),
    }
}

fn one_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
