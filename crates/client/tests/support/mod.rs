#![forbid(unsafe_code)]
#![allow(dead_code)]

use serde_json::Value;
use simtree_client::{
    BranchOp, ClientError, CreatedTree, Fetched, PollBatch, StreamConnection, StreamConnector,
    StreamKey, TreeApi,
};
use simtree_core::detail::NodeState;
use simtree_core::ids::{NodeId, TreeId};
use simtree_core::tree::{Edge, EdgeKind, Node, Snapshot};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

pub(crate) fn tree_id(value: &str) -> TreeId {
    TreeId::try_new(value).expect("tree id")
}

pub(crate) fn node(id: u64, depth: u32) -> Node {
    Node {
        id: NodeId(id),
        depth,
    }
}

pub(crate) fn edge(from: u64, to: u64, kind: EdgeKind) -> Edge {
    Edge::new(NodeId(from), NodeId(to), kind)
}

/// Root 1 with children 2 and 3, and 4 under 2.
pub(crate) fn small_tree() -> Snapshot {
    Snapshot {
        root: Some(NodeId(1)),
        nodes: vec![node(1, 0), node(2, 1), node(3, 1), node(4, 2)],
        edges: vec![
            edge(1, 2, EdgeKind::Advance),
            edge(1, 3, EdgeKind::PublicEvent),
            edge(2, 4, EdgeKind::Advance),
        ],
        running: Vec::new(),
    }
}

pub(crate) fn attached(node: u64, parent: Option<u64>, depth: u32) -> String {
    serde_json::json!({
        "type": "attached",
        "data": { "node": node, "parent": parent, "depth": depth, "edge_kind": "advance" }
    })
    .to_string()
}

pub(crate) fn lifecycle(kind: &str, node: u64) -> String {
    serde_json::json!({ "type": kind, "data": { "node": node } }).to_string()
}

pub(crate) enum Scripted {
    Found(Snapshot),
    NotFound,
    Fail,
}

/// In-memory backend. Snapshot answers are scripted; once the script runs out the fallback
/// answer repeats.
pub(crate) struct FakeApi {
    pub(crate) script: RefCell<VecDeque<Scripted>>,
    pub(crate) fallback: RefCell<Option<Snapshot>>,
    pub(crate) snapshot_calls: Cell<usize>,
    pub(crate) detail_calls: Cell<usize>,
    pub(crate) events: RefCell<BTreeMap<NodeId, Vec<Value>>>,
    pub(crate) states: RefCell<BTreeMap<NodeId, NodeState>>,
    pub(crate) delete_ok: Cell<bool>,
    pub(crate) deleted: RefCell<Vec<NodeId>>,
    pub(crate) branched: RefCell<Vec<(NodeId, Vec<BranchOp>)>>,
}

impl FakeApi {
    pub(crate) fn new() -> Self {
        Self {
            script: RefCell::new(VecDeque::new()),
            fallback: RefCell::new(None),
            snapshot_calls: Cell::new(0),
            detail_calls: Cell::new(0),
            events: RefCell::new(BTreeMap::new()),
            states: RefCell::new(BTreeMap::new()),
            delete_ok: Cell::new(true),
            deleted: RefCell::new(Vec::new()),
            branched: RefCell::new(Vec::new()),
        }
    }

    pub(crate) fn serving(snapshot: Snapshot) -> Self {
        let api = Self::new();
        *api.fallback.borrow_mut() = Some(snapshot);
        api
    }

    pub(crate) fn push(&self, answer: Scripted) {
        self.script.borrow_mut().push_back(answer);
    }
}

impl TreeApi for FakeApi {
    fn fetch_snapshot(&self, _tree: &TreeId) -> Result<Fetched<Snapshot>, ClientError> {
        self.snapshot_calls.set(self.snapshot_calls.get() + 1);
        match self.script.borrow_mut().pop_front() {
            Some(Scripted::Found(snapshot)) => Ok(Fetched::Found(snapshot)),
            Some(Scripted::NotFound) => Ok(Fetched::NotFound),
            Some(Scripted::Fail) => Err(ClientError::Transport("connection refused".to_string())),
            None => Ok(match self.fallback.borrow().clone() {
                Some(snapshot) => Fetched::Found(snapshot),
                None => Fetched::NotFound,
            }),
        }
    }

    fn node_events(&self, _tree: &TreeId, node: NodeId) -> Result<Vec<Value>, ClientError> {
        self.detail_calls.set(self.detail_calls.get() + 1);
        Ok(self.events.borrow().get(&node).cloned().unwrap_or_default())
    }

    fn node_state(&self, _tree: &TreeId, node: NodeId) -> Result<NodeState, ClientError> {
        Ok(self.states.borrow().get(&node).cloned().unwrap_or_default())
    }

    fn create_tree(&self, _scenario: &Value) -> Result<CreatedTree, ClientError> {
        Ok(CreatedTree {
            id: tree_id("created"),
            root: NodeId(1),
        })
    }

    fn advance_frontier(
        &self,
        _tree: &TreeId,
        _turns: u32,
        _only_max_depth: bool,
    ) -> Result<Vec<NodeId>, ClientError> {
        Ok(vec![NodeId(10), NodeId(11)])
    }

    fn advance_multi(
        &self,
        _tree: &TreeId,
        _parent: NodeId,
        _turns: u32,
        count: u32,
    ) -> Result<Vec<NodeId>, ClientError> {
        Ok((0..u64::from(count)).map(|i| NodeId(20 + i)).collect())
    }

    fn advance_chain(
        &self,
        _tree: &TreeId,
        _parent: NodeId,
        _turns: u32,
    ) -> Result<NodeId, ClientError> {
        Ok(NodeId(30))
    }

    fn branch(
        &self,
        _tree: &TreeId,
        parent: NodeId,
        ops: &[BranchOp],
    ) -> Result<NodeId, ClientError> {
        self.branched.borrow_mut().push((parent, ops.to_vec()));
        Ok(NodeId(40))
    }

    fn delete_node(&self, _tree: &TreeId, node: NodeId) -> Result<bool, ClientError> {
        self.deleted.borrow_mut().push(node);
        Ok(self.delete_ok.get())
    }
}

/// Shared state behind [`FakeConnector`]: queued messages per stream and an open/close log.
#[derive(Default)]
pub(crate) struct FakeHub {
    pub(crate) queues: HashMap<StreamKey, VecDeque<String>>,
    pub(crate) opened: Vec<StreamKey>,
    pub(crate) closed: Vec<StreamKey>,
    pub(crate) live: Vec<StreamKey>,
    pub(crate) drop_next_poll: HashSet<StreamKey>,
    pub(crate) refuse: bool,
    /// Opens that happened while another stream of the same kind was still live.
    pub(crate) overlaps: usize,
}

#[derive(Clone, Default)]
pub(crate) struct FakeConnector {
    pub(crate) hub: Rc<RefCell<FakeHub>>,
}

impl FakeConnector {
    pub(crate) fn send(&self, key: &StreamKey, message: String) {
        self.hub
            .borrow_mut()
            .queues
            .entry(key.clone())
            .or_default()
            .push_back(message);
    }

    pub(crate) fn live(&self) -> Vec<StreamKey> {
        self.hub.borrow().live.clone()
    }

    pub(crate) fn opened(&self) -> Vec<StreamKey> {
        self.hub.borrow().opened.clone()
    }

    pub(crate) fn closed(&self) -> Vec<StreamKey> {
        self.hub.borrow().closed.clone()
    }

    pub(crate) fn drop_stream(&self, key: &StreamKey) {
        self.hub.borrow_mut().drop_next_poll.insert(key.clone());
    }

    pub(crate) fn overlaps(&self) -> usize {
        self.hub.borrow().overlaps
    }

    pub(crate) fn refuse(&self, refuse: bool) {
        self.hub.borrow_mut().refuse = refuse;
    }
}

pub(crate) struct FakeConnection {
    key: StreamKey,
    hub: Rc<RefCell<FakeHub>>,
    closed: bool,
}

impl StreamConnection for FakeConnection {
    fn poll(&mut self, budget: usize) -> PollBatch {
        let mut hub = self.hub.borrow_mut();
        let mut batch = PollBatch::default();
        if let Some(queue) = hub.queues.get_mut(&self.key) {
            while batch.messages.len() < budget {
                match queue.pop_front() {
                    Some(message) => batch.messages.push(message),
                    None => break,
                }
            }
        }
        if hub.drop_next_poll.remove(&self.key) {
            batch.closed = true;
        }
        batch
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let mut hub = self.hub.borrow_mut();
        hub.closed.push(self.key.clone());
        if let Some(index) = hub.live.iter().position(|key| key == &self.key) {
            hub.live.remove(index);
        }
    }
}

impl StreamConnector for FakeConnector {
    type Connection = FakeConnection;

    fn open(&self, key: &StreamKey) -> Result<FakeConnection, ClientError> {
        let mut hub = self.hub.borrow_mut();
        if hub.refuse {
            return Err(ClientError::Transport("stream refused".to_string()));
        }
        let same_kind = |live: &StreamKey| {
            matches!(
                (live, key),
                (StreamKey::Tree(_), StreamKey::Tree(_)) | (StreamKey::Node(..), StreamKey::Node(..))
            )
        };
        if hub.live.iter().any(same_kind) {
            hub.overlaps += 1;
        }
        hub.opened.push(key.clone());
        hub.live.push(key.clone());
        Ok(FakeConnection {
            key: key.clone(),
            hub: Rc::clone(&self.hub),
            closed: false,
        })
    }
}

pub(crate) type Responder = dyn Fn(&str, &str, &str) -> (u16, String) + Send + Sync;

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct SeenRequest {
    pub(crate) method: String,
    pub(crate) path: String,
    pub(crate) body: String,
}

/// Throwaway HTTP/1.1 server answering every request through `respond(method, path, body)`.
pub(crate) struct HttpServer {
    pub(crate) base: String,
    pub(crate) seen: Arc<Mutex<Vec<SeenRequest>>>,
}

impl HttpServer {
    pub(crate) fn seen(&self) -> Vec<SeenRequest> {
        self.seen.lock().expect("seen lock").clone()
    }
}

/// `None` when loopback bind is not allowed in this environment.
pub(crate) fn spawn_http_server<F>(respond: F) -> Option<HttpServer>
where
    F: Fn(&str, &str, &str) -> (u16, String) + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").ok()?;
    let addr = listener.local_addr().ok()?;
    let seen = Arc::new(Mutex::new(Vec::new()));
    let respond: Arc<Responder> = Arc::new(respond);
    let log = Arc::clone(&seen);
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { continue };
            let respond = Arc::clone(&respond);
            let log = Arc::clone(&log);
            thread::spawn(move || serve_http(stream, respond.as_ref(), &log));
        }
    });
    Some(HttpServer {
        base: format!("http://{addr}"),
        seen,
    })
}

fn serve_http(stream: TcpStream, respond: &Responder, log: &Mutex<Vec<SeenRequest>>) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
    let Ok(write_half) = stream.try_clone() else {
        return;
    };
    let mut reader = BufReader::new(stream);
    let mut request_line = String::new();
    if reader.read_line(&mut request_line).is_err() {
        return;
    }
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or_default().to_string();

    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).is_err() {
            return;
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap_or(0);
            }
        }
    }
    let mut body = vec![0u8; content_length];
    if reader.read_exact(&mut body).is_err() {
        return;
    }
    let body = String::from_utf8_lossy(&body).to_string();

    let (status, payload) = respond(&method, &path, &body);
    log.lock().expect("seen lock").push(SeenRequest { method, path, body });

    let reason = match status {
        200 => "OK",
        404 => "Not Found",
        _ => "Error",
    };
    let response = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{payload}",
        payload.len()
    );
    let mut write_half = write_half;
    let _ = write_half.write_all(response.as_bytes());
    let _ = write_half.flush();
}

/// Throwaway WebSocket server. Each connection records its path and the first message it
/// receives, then pushes `messages` and stays open until the client leaves.
pub(crate) struct WsServer {
    pub(crate) base: String,
    pub(crate) handshakes: Arc<Mutex<Vec<(String, String)>>>,
}

impl WsServer {
    pub(crate) fn handshakes(&self) -> Vec<(String, String)> {
        self.handshakes.lock().expect("handshake lock").clone()
    }

    pub(crate) fn wait_for_handshakes(&self, count: usize) -> Vec<(String, String)> {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let seen = self.handshakes();
            if seen.len() >= count || Instant::now() >= deadline {
                return seen;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }
}

pub(crate) fn spawn_ws_server(messages: Vec<String>) -> Option<WsServer> {
    let listener = TcpListener::bind("127.0.0.1:0").ok()?;
    let addr = listener.local_addr().ok()?;
    let handshakes = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&handshakes);
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { continue };
            let messages = messages.clone();
            let log = Arc::clone(&log);
            thread::spawn(move || serve_ws(stream, messages, &log));
        }
    });
    Some(WsServer {
        base: format!("ws://{addr}"),
        handshakes,
    })
}

fn serve_ws(stream: TcpStream, messages: Vec<String>, log: &Mutex<Vec<(String, String)>>) {
    use tungstenite::Message;
    use tungstenite::handshake::server::{ErrorResponse, Request, Response};

    let path = Arc::new(Mutex::new(String::new()));
    let seen_path = Arc::clone(&path);
    let callback = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        *seen_path.lock().expect("path lock") = request.uri().path().to_string();
        Ok(response)
    };
    let Ok(mut socket) = tungstenite::accept_hdr(stream, callback) else {
        return;
    };

    let token = match socket.read() {
        Ok(Message::Text(text)) => text.as_str().to_string(),
        _ => return,
    };
    let path = path.lock().expect("path lock").clone();
    log.lock().expect("handshake lock").push((path, token));

    for message in messages {
        if socket.send(Message::text(message)).is_err() {
            return;
        }
    }
    while socket.read().is_ok() {}
}
