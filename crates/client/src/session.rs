#![forbid(unsafe_code)]

//! One viewer's worth of sync state: the open tree, its stream, the selected node and its
//! stream, and the auxiliary detail for that node.
//!
//! The host drives [`Session::pump`]; nothing here spawns threads. Fetches whose results land
//! in session state carry a ticket, and the ticket is checked against the current tree and
//! selection before the result is installed, so a response that arrives after the user moved
//! on is dropped.

use crate::api::{BranchOp, CreatedTree, TreeApi};
use crate::config::SyncConfig;
use crate::error::ClientError;
use crate::snapshot::fetch_with_retry;
use crate::stream::{Reconnect, StreamConnector, StreamKey, Subscription};
use serde_json::Value;
use simtree_core::detail::{NodeDetail, NodeState, decode_node_event};
use simtree_core::ids::{NodeId, TreeId};
use simtree_core::layout::{NodeClass, Position, classify, layout};
use simtree_core::tree::{
    DeletionPlan, Snapshot, TreeEvent, TreeStore, ValidateReport, decode_tree_event,
    next_selection, validate_snapshot,
};
use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

const POLL_BUDGET: usize = 256;
const RESYNC_HOLD_OFF: Duration = Duration::from_secs(1);

/// Issued when a snapshot fetch starts; installing its result requires the tree to be unchanged.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SnapshotTicket {
    pub tree: TreeId,
    pub generation: u64,
}

/// Issued when a detail fetch starts; installing its result requires the same selection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DetailTicket {
    pub tree: TreeId,
    pub node: NodeId,
    pub generation: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TreeStatus {
    Loaded,
    /// Every snapshot attempt came back "not found"; the tree fills in from the stream.
    Initializing,
}

/// What a [`Session::pump`] call did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PumpReport {
    pub tree_events: usize,
    pub node_events: usize,
    /// Messages that did not decode.
    pub dropped: usize,
    pub structural: bool,
    pub running_changed: bool,
    pub detail_changed: bool,
    pub selection_changed: bool,
    pub resynced: bool,
    pub reconnected: bool,
}

impl PumpReport {
    pub fn changed(&self) -> bool {
        self.structural
            || self.running_changed
            || self.detail_changed
            || self.selection_changed
            || self.resynced
    }
}

pub struct Session<A, C: StreamConnector> {
    api: A,
    connector: C,
    config: SyncConfig,
    tree: Option<TreeId>,
    status: Option<TreeStatus>,
    store: TreeStore,
    tree_stream: Subscription<C::Connection>,
    node_stream: Subscription<C::Connection>,
    selected: Option<NodeId>,
    detail: Option<NodeDetail>,
    tree_generation: u64,
    selection_generation: u64,
    resync_after: Option<Instant>,
    positions: BTreeMap<NodeId, Position>,
    positions_revision: Option<u64>,
}

impl<A: TreeApi, C: StreamConnector> Session<A, C> {
    pub fn new(api: A, connector: C, config: SyncConfig) -> Self {
        Self {
            api,
            connector,
            config,
            tree: None,
            status: None,
            store: TreeStore::new(),
            tree_stream: Subscription::new(),
            node_stream: Subscription::new(),
            selected: None,
            detail: None,
            tree_generation: 0,
            selection_generation: 0,
            resync_after: None,
            positions: BTreeMap::new(),
            positions_revision: None,
        }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn tree(&self) -> Option<&TreeId> {
        self.tree.as_ref()
    }

    pub fn status(&self) -> Option<TreeStatus> {
        self.status
    }

    pub fn store(&self) -> &TreeStore {
        &self.store
    }

    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.store.snapshot()
    }

    pub fn selected(&self) -> Option<NodeId> {
        self.selected
    }

    pub fn detail(&self) -> Option<&NodeDetail> {
        self.detail.as_ref()
    }

    pub fn tree_stream_key(&self) -> Option<&StreamKey> {
        self.tree_stream.key()
    }

    pub fn node_stream_key(&self) -> Option<&StreamKey> {
        self.node_stream.key()
    }

    pub fn is_tree_stream_live(&self) -> bool {
        self.tree_stream.is_live()
    }

    pub fn is_node_stream_live(&self) -> bool {
        self.node_stream.is_live()
    }

    /// Switches to `tree`: both streams of the previous tree are closed first, the tree stream
    /// is subscribed, then the snapshot is fetched with the configured retry.
    pub fn open_tree(&mut self, tree: TreeId) -> Result<TreeStatus, ClientError> {
        self.reset();
        tracing::info!(%tree, "opening tree");
        self.tree = Some(tree.clone());
        self.tree_stream
            .open(&self.connector, StreamKey::Tree(tree))?;
        self.resync()
    }

    pub fn close_tree(&mut self) {
        if let Some(tree) = &self.tree {
            tracing::info!(%tree, "closing tree");
        }
        self.reset();
    }

    fn reset(&mut self) {
        self.node_stream.close();
        self.tree_stream.close();
        self.tree = None;
        self.status = None;
        self.store.clear();
        self.selected = None;
        self.detail = None;
        self.tree_generation += 1;
        self.selection_generation += 1;
        self.resync_after = None;
    }

    pub fn begin_resync(&self) -> Option<SnapshotTicket> {
        self.tree.as_ref().map(|tree| SnapshotTicket {
            tree: tree.clone(),
            generation: self.tree_generation,
        })
    }

    /// Installs a fetched snapshot (`None` = still not found). Returns `false` when the ticket
    /// is stale and the result was discarded.
    pub fn complete_resync(&mut self, ticket: SnapshotTicket, fetched: Option<Snapshot>) -> bool {
        if self.tree.as_ref() != Some(&ticket.tree) || ticket.generation != self.tree_generation {
            tracing::debug!(tree = %ticket.tree, "discarding stale snapshot");
            return false;
        }
        match fetched {
            Some(snapshot) => {
                self.store.replace(snapshot);
                self.status = Some(TreeStatus::Loaded);
            }
            None => {
                self.status = Some(TreeStatus::Initializing);
            }
        }
        self.reconcile_selection();
        true
    }

    /// Refetches the snapshot of the open tree now.
    pub fn resync(&mut self) -> Result<TreeStatus, ClientError> {
        let Some(ticket) = self.begin_resync() else {
            return Err(ClientError::InvalidInput("no tree open"));
        };
        let fetched = fetch_with_retry(&self.api, &ticket.tree, &self.config.snapshot_retry)?;
        self.complete_resync(ticket, fetched);
        Ok(self.status.unwrap_or(TreeStatus::Initializing))
    }

    fn reconcile_selection(&mut self) {
        let vanished = self
            .selected
            .filter(|selected| !self.store.contains_node(*selected));
        if let Some(selected) = vanished {
            let removed = BTreeSet::from([selected]);
            let next = next_selection(Some(selected), &removed, self.store.root());
            self.set_selection(next);
        }
        self.auto_select_root();
    }

    fn auto_select_root(&mut self) -> bool {
        if !self.config.auto_select_root || self.selected.is_some() {
            return false;
        }
        match self.store.root() {
            Some(root) => {
                self.set_selection(Some(root));
                true
            }
            None => false,
        }
    }

    /// Selects `node` and follows its stream. Unknown nodes are refused with `Ok(false)`.
    pub fn select_node(&mut self, node: NodeId) -> Result<bool, ClientError> {
        if self.tree.is_none() || !self.store.contains_node(node) {
            return Ok(false);
        }
        if self.selected == Some(node) {
            return Ok(true);
        }
        self.node_stream.close();
        self.selection_generation += 1;
        self.selected = Some(node);
        self.detail = Some(NodeDetail::new(node));
        self.follow_selected()?;
        self.refresh_detail()?;
        Ok(true)
    }

    pub fn clear_selection(&mut self) {
        self.drop_selection();
    }

    /// Internal selection change; failures are logged rather than returned.
    fn set_selection(&mut self, node: Option<NodeId>) {
        if self.selected == node {
            return;
        }
        let Some(node) = node else {
            self.drop_selection();
            return;
        };
        match self.select_node(node) {
            Ok(true) => {}
            Ok(false) => self.drop_selection(),
            Err(err) => tracing::warn!(%node, error = %err, "selection follow-up failed"),
        }
    }

    fn drop_selection(&mut self) {
        self.node_stream.close();
        self.selection_generation += 1;
        self.selected = None;
        self.detail = None;
    }

    fn follow_selected(&mut self) -> Result<(), ClientError> {
        let (Some(tree), Some(node)) = (self.tree.clone(), self.selected) else {
            return Ok(());
        };
        self.node_stream
            .open(&self.connector, StreamKey::Node(tree, node))
    }

    pub fn begin_detail_refresh(&self) -> Option<DetailTicket> {
        Some(DetailTicket {
            tree: self.tree.clone()?,
            node: self.selected?,
            generation: self.selection_generation,
        })
    }

    /// Installs a fetched event log and node state. Returns `false` for a stale ticket.
    pub fn complete_detail_refresh(
        &mut self,
        ticket: DetailTicket,
        events: Vec<Value>,
        state: NodeState,
    ) -> bool {
        let current = self.tree.as_ref() == Some(&ticket.tree)
            && self.selected == Some(ticket.node)
            && self.selection_generation == ticket.generation;
        if !current {
            tracing::debug!(node = %ticket.node, "discarding stale node detail");
            return false;
        }
        let detail = self
            .detail
            .get_or_insert_with(|| NodeDetail::new(ticket.node));
        detail.replace_events(events);
        detail.replace_state(state);
        true
    }

    /// Reloads the event log and state of the selected node.
    pub fn refresh_detail(&mut self) -> Result<bool, ClientError> {
        let Some(ticket) = self.begin_detail_refresh() else {
            return Ok(false);
        };
        let events = self.api.node_events(&ticket.tree, ticket.node)?;
        let state = self.api.node_state(&ticket.tree, ticket.node)?;
        Ok(self.complete_detail_refresh(ticket, events, state))
    }

    /// Drains both streams, applies what arrived, and keeps the streams and snapshot healthy.
    pub fn pump(&mut self) -> PumpReport {
        let mut report = PumpReport::default();
        let now = Instant::now();

        if self.tree_stream.maintain(&self.connector, &self.config.reconnect, now)
            == Reconnect::Reconnected
        {
            report.reconnected = true;
            self.store.request_resync();
        }
        let batch = self.tree_stream.poll(POLL_BUDGET);
        for message in &batch.messages {
            match decode_tree_event(message) {
                Ok(event) => {
                    report.tree_events += 1;
                    self.handle_tree_event(&event, &mut report);
                }
                Err(err) => {
                    report.dropped += 1;
                    tracing::debug!(error = %err, "dropping tree event");
                }
            }
        }

        if self.node_stream.maintain(&self.connector, &self.config.reconnect, now)
            == Reconnect::Reconnected
        {
            report.reconnected = true;
            match self.refresh_detail() {
                Ok(changed) => report.detail_changed |= changed,
                Err(err) => tracing::warn!(error = %err, "detail refresh after reconnect failed"),
            }
        }
        let batch = self.node_stream.poll(POLL_BUDGET);
        for message in &batch.messages {
            match decode_node_event(message) {
                Ok(event) => {
                    report.node_events += 1;
                    if let Some(detail) = self.detail.as_mut() {
                        report.detail_changed |= detail.apply(event);
                    }
                }
                Err(err) => {
                    report.dropped += 1;
                    tracing::debug!(error = %err, "dropping node event");
                }
            }
        }

        if self.store.needs_resync() && self.resync_due(now) {
            match self.resync() {
                Ok(_) => {
                    report.resynced = true;
                    self.resync_after = self
                        .store
                        .needs_resync()
                        .then(|| now + RESYNC_HOLD_OFF);
                }
                Err(err) => {
                    tracing::warn!(error = %err, "resync failed");
                    self.resync_after = Some(now + RESYNC_HOLD_OFF);
                }
            }
        }
        report
    }

    fn resync_due(&self, now: Instant) -> bool {
        self.tree.is_some() && self.resync_after.is_none_or(|after| now >= after)
    }

    fn handle_tree_event(&mut self, event: &TreeEvent, report: &mut PumpReport) {
        let outcome = self.store.apply(event);
        report.structural |= outcome.is_structural();
        report.running_changed |= outcome.running_changed;
        if self.status == Some(TreeStatus::Initializing) && self.store.has_nodes() {
            tracing::info!("tree populated from the stream");
            self.status = Some(TreeStatus::Loaded);
        }
        if outcome.ignored {
            tracing::debug!(kind = event.kind(), node = ?event.node(), "event ignored");
            return;
        }

        let before = self.selected;
        match event {
            TreeEvent::RunStart { node } | TreeEvent::RunFinish { node }
                if self.selected == Some(*node) =>
            {
                match self.refresh_detail() {
                    Ok(changed) => report.detail_changed |= changed,
                    Err(err) => tracing::warn!(%node, error = %err, "detail refresh failed"),
                }
            }
            TreeEvent::Deleted { .. } if !outcome.nodes_removed.is_empty() => {
                let removed: BTreeSet<NodeId> = outcome.nodes_removed.iter().copied().collect();
                let next = next_selection(self.selected, &removed, self.store.root());
                self.set_selection(next);
            }
            TreeEvent::Attached(_) => {
                self.auto_select_root();
            }
            _ => {}
        }
        report.selection_changed |= self.selected != before;
    }

    pub fn preview_delete(&self, node: NodeId) -> Option<DeletionPlan> {
        self.store.preview_delete(node)
    }

    /// Deletes `node` and its subtree on the server, then applies the same cascade locally.
    /// The `deleted` event that follows on the stream is then a no-op.
    pub fn delete_node(&mut self, node: NodeId) -> Result<Vec<NodeId>, ClientError> {
        let tree = self.open_tree_id()?;
        if !self.api.delete_node(&tree, node)? {
            return Err(ClientError::Rejected("delete"));
        }
        let removed: Vec<NodeId> = self
            .store
            .preview_delete(node)
            .map(|plan| plan.nodes.into_iter().collect())
            .unwrap_or_default();
        let mut report = PumpReport::default();
        self.handle_tree_event(&TreeEvent::Deleted { node }, &mut report);
        tracing::info!(%node, removed = removed.len(), "node deleted");
        Ok(removed)
    }

    fn open_tree_id(&self) -> Result<TreeId, ClientError> {
        self.tree
            .clone()
            .ok_or(ClientError::InvalidInput("no tree open"))
    }

    pub fn create_tree(&self, scenario: &Value) -> Result<CreatedTree, ClientError> {
        self.api.create_tree(scenario)
    }

    pub fn advance_frontier(
        &self,
        turns: u32,
        only_max_depth: bool,
    ) -> Result<Vec<NodeId>, ClientError> {
        let tree = self.open_tree_id()?;
        self.api.advance_frontier(&tree, turns, only_max_depth)
    }

    pub fn advance_multi(
        &self,
        parent: NodeId,
        turns: u32,
        count: u32,
    ) -> Result<Vec<NodeId>, ClientError> {
        let tree = self.open_tree_id()?;
        self.api.advance_multi(&tree, parent, turns, count)
    }

    pub fn advance_chain(&self, parent: NodeId, turns: u32) -> Result<NodeId, ClientError> {
        let tree = self.open_tree_id()?;
        self.api.advance_chain(&tree, parent, turns)
    }

    pub fn branch(&self, parent: NodeId, ops: &[BranchOp]) -> Result<NodeId, ClientError> {
        let tree = self.open_tree_id()?;
        self.api.branch(&tree, parent, ops)
    }

    /// Node positions for the current structure, recomputed only when it changed.
    pub fn positions(&mut self) -> &BTreeMap<NodeId, Position> {
        let revision = self.store.revision();
        if self.positions_revision != Some(revision) {
            self.positions = match self.store.snapshot() {
                Some(snapshot) => layout(&snapshot.nodes, &snapshot.edges),
                None => BTreeMap::new(),
            };
            self.positions_revision = Some(revision);
        }
        &self.positions
    }

    /// Checks the current tree against its structural invariants and logs each problem found.
    pub fn check_consistency(&self, max_errors: usize) -> Option<ValidateReport> {
        let snapshot = self.store.snapshot()?;
        let report = validate_snapshot(snapshot, max_errors);
        for error in &report.errors {
            tracing::warn!(code = error.code, message = %error.message, "tree inconsistent");
        }
        Some(report)
    }

    pub fn classes(&self) -> BTreeMap<NodeId, NodeClass> {
        match self.store.snapshot() {
            Some(snapshot) => classify(snapshot, self.selected),
            None => BTreeMap::new(),
        }
    }
}
