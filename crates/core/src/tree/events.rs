#![forbid(unsafe_code)]

use super::types::EdgeKind;
use crate::ids::NodeId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Structural and lifecycle events pushed on the tree-scoped stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TreeEvent {
    Attached(Attached),
    RunStart { node: NodeId },
    RunFinish { node: NodeId },
    Deleted { node: NodeId },
    /// A well-formed envelope whose `type` this client does not know.
    Unknown { kind: String },
}

impl TreeEvent {
    pub fn kind(&self) -> &str {
        match self {
            Self::Attached(_) => "attached",
            Self::RunStart { .. } => "run_start",
            Self::RunFinish { .. } => "run_finish",
            Self::Deleted { .. } => "deleted",
            Self::Unknown { kind } => kind.as_str(),
        }
    }

    /// The node the event is about, if any.
    pub fn node(&self) -> Option<NodeId> {
        match self {
            Self::Attached(attached) => Some(attached.node),
            Self::RunStart { node } | Self::RunFinish { node } | Self::Deleted { node } => {
                Some(*node)
            }
            Self::Unknown { .. } => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attached {
    pub node: NodeId,
    #[serde(default)]
    pub parent: Option<NodeId>,
    /// Absent on some older servers; the reducer then derives it from the parent.
    #[serde(default)]
    pub depth: Option<u32>,
    #[serde(default, alias = "edgeKind", alias = "edge_type")]
    pub edge_kind: EdgeKind,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize)]
struct NodeRef {
    node: NodeId,
}

#[derive(Debug, thiserror::Error)]
pub enum EventDecodeError {
    #[error("event is not a JSON envelope: {0}")]
    Envelope(#[source] serde_json::Error),
    #[error("event `{kind}` has a malformed payload: {source}")]
    Payload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Decodes one `{type, data}` message from the tree-scoped stream.
///
/// Unknown `type` values decode to [`TreeEvent::Unknown`]; only unparseable input is an error.
pub fn decode_tree_event(text: &str) -> Result<TreeEvent, EventDecodeError> {
    let envelope: Envelope = serde_json::from_str(text).map_err(EventDecodeError::Envelope)?;
    let payload_err = |kind: &str| {
        let kind = kind.to_string();
        move |source| EventDecodeError::Payload { kind, source }
    };
    let node_ref = |data: Value, kind: &str| {
        serde_json::from_value::<NodeRef>(data)
            .map(|r| r.node)
            .map_err(payload_err(kind))
    };

    let event = match envelope.kind.as_str() {
        "attached" => TreeEvent::Attached(
            serde_json::from_value(envelope.data).map_err(payload_err("attached"))?,
        ),
        "run_start" => TreeEvent::RunStart {
            node: node_ref(envelope.data, "run_start")?,
        },
        "run_finish" => TreeEvent::RunFinish {
            node: node_ref(envelope.data, "run_finish")?,
        },
        "deleted" => TreeEvent::Deleted {
            node: node_ref(envelope.data, "deleted")?,
        },
        _ => TreeEvent::Unknown {
            kind: envelope.kind,
        },
    };
    Ok(event)
}
