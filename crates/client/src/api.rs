#![forbid(unsafe_code)]

use crate::error::ClientError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use simtree_core::detail::NodeState;
use simtree_core::ids::{NodeId, TreeId};
use simtree_core::tree::Snapshot;
use std::time::Duration;

/// Result of a lookup where "not there (yet)" is an expected answer rather than a failure.
#[derive(Clone, Debug, PartialEq)]
pub enum Fetched<T> {
    Found(T),
    NotFound,
}

impl<T> Fetched<T> {
    pub fn found(self) -> Option<T> {
        match self {
            Self::Found(value) => Some(value),
            Self::NotFound => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedTree {
    pub id: TreeId,
    pub root: NodeId,
}

/// One edit applied when branching a child off a parent state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum BranchOp {
    PublicBroadcast { text: String },
    AgentCtx { agent: String, content: String },
    AgentPlan { agent: String, plan: Value },
    AgentProps { agent: String, props: Value },
    SceneState { state: Value },
}

/// The backend's request/response surface. Streams live in [`crate::stream`].
pub trait TreeApi {
    fn fetch_snapshot(&self, tree: &TreeId) -> Result<Fetched<Snapshot>, ClientError>;
    fn node_events(&self, tree: &TreeId, node: NodeId) -> Result<Vec<Value>, ClientError>;
    fn node_state(&self, tree: &TreeId, node: NodeId) -> Result<NodeState, ClientError>;

    fn create_tree(&self, scenario: &Value) -> Result<CreatedTree, ClientError>;
    fn advance_frontier(
        &self,
        tree: &TreeId,
        turns: u32,
        only_max_depth: bool,
    ) -> Result<Vec<NodeId>, ClientError>;
    fn advance_multi(
        &self,
        tree: &TreeId,
        parent: NodeId,
        turns: u32,
        count: u32,
    ) -> Result<Vec<NodeId>, ClientError>;
    fn advance_chain(
        &self,
        tree: &TreeId,
        parent: NodeId,
        turns: u32,
    ) -> Result<NodeId, ClientError>;
    fn branch(&self, tree: &TreeId, parent: NodeId, ops: &[BranchOp])
    -> Result<NodeId, ClientError>;
    fn delete_node(&self, tree: &TreeId, node: NodeId) -> Result<bool, ClientError>;
}

#[derive(Deserialize)]
struct ChildrenReply {
    #[serde(default)]
    children: Vec<NodeId>,
}

#[derive(Deserialize)]
struct ChildReply {
    child: NodeId,
}

#[derive(Deserialize)]
struct OkReply {
    #[serde(default)]
    ok: bool,
}

/// Blocking HTTP implementation on a shared `ureq` agent.
#[derive(Clone)]
pub struct HttpTreeApi {
    agent: ureq::Agent,
    base: String,
}

impl HttpTreeApi {
    pub fn new(base: &str, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout.min(Duration::from_secs(5)))
            .timeout(timeout)
            .build();
        Self {
            agent,
            base: base.trim_end_matches('/').to_string(),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let url = self.url(path);
        tracing::debug!(%url, "GET");
        let response = self.agent.get(&url).call()?;
        read_json(response)
    }

    fn post_json<T: DeserializeOwned>(&self, path: &str, body: Value) -> Result<T, ClientError> {
        let url = self.url(path);
        tracing::debug!(%url, "POST");
        let response = self.agent.post(&url).send_json(body)?;
        read_json(response)
    }
}

fn read_json<T: DeserializeOwned>(response: ureq::Response) -> Result<T, ClientError> {
    response
        .into_json::<T>()
        .map_err(|err| ClientError::Decode(err.to_string()))
}

impl TreeApi for HttpTreeApi {
    fn fetch_snapshot(&self, tree: &TreeId) -> Result<Fetched<Snapshot>, ClientError> {
        match self.get_json::<Snapshot>(&format!("/simtree/{tree}")) {
            Ok(snapshot) => Ok(Fetched::Found(snapshot)),
            Err(err) if err.is_not_found() => Ok(Fetched::NotFound),
            Err(err) => Err(err),
        }
    }

    fn node_events(&self, tree: &TreeId, node: NodeId) -> Result<Vec<Value>, ClientError> {
        self.get_json(&format!("/simtree/{tree}/sim/{node}/events"))
    }

    fn node_state(&self, tree: &TreeId, node: NodeId) -> Result<NodeState, ClientError> {
        self.get_json(&format!("/simtree/{tree}/sim/{node}/state"))
    }

    fn create_tree(&self, scenario: &Value) -> Result<CreatedTree, ClientError> {
        self.post_json("/simtree/open", json!({ "scenario": scenario }))
    }

    fn advance_frontier(
        &self,
        tree: &TreeId,
        turns: u32,
        only_max_depth: bool,
    ) -> Result<Vec<NodeId>, ClientError> {
        let reply: ChildrenReply = self.post_json(
            &format!("/simtree/{tree}/advance_frontier"),
            json!({ "turns": turns, "only_max_depth": only_max_depth }),
        )?;
        Ok(reply.children)
    }

    fn advance_multi(
        &self,
        tree: &TreeId,
        parent: NodeId,
        turns: u32,
        count: u32,
    ) -> Result<Vec<NodeId>, ClientError> {
        let reply: ChildrenReply = self.post_json(
            &format!("/simtree/{tree}/advance_multi"),
            json!({ "parent": parent, "turns": turns, "count": count }),
        )?;
        Ok(reply.children)
    }

    fn advance_chain(
        &self,
        tree: &TreeId,
        parent: NodeId,
        turns: u32,
    ) -> Result<NodeId, ClientError> {
        let reply: ChildReply = self.post_json(
            &format!("/simtree/{tree}/advance_chain"),
            json!({ "parent": parent, "turns": turns }),
        )?;
        Ok(reply.child)
    }

    fn branch(
        &self,
        tree: &TreeId,
        parent: NodeId,
        ops: &[BranchOp],
    ) -> Result<NodeId, ClientError> {
        if ops.is_empty() {
            return Err(ClientError::InvalidInput("branch needs at least one op"));
        }
        let reply: ChildReply = self.post_json(
            &format!("/simtree/{tree}/branch"),
            json!({ "parent": parent, "ops": ops }),
        )?;
        Ok(reply.child)
    }

    fn delete_node(&self, tree: &TreeId, node: NodeId) -> Result<bool, ClientError> {
        let url = self.url(&format!("/simtree/{tree}/node/{node}"));
        tracing::debug!(%url, "DELETE");
        let response = self.agent.delete(&url).call()?;
        let reply: OkReply = read_json(response)?;
        Ok(reply.ok)
    }
}
