#![forbid(unsafe_code)]

mod render;

use clap::Parser;
use simtree_client::config::{DEFAULT_HTTP_BASE, DEFAULT_READY_TOKEN};
use simtree_client::{
    HttpTreeApi, ReconnectPolicy, RetryPolicy, Session, SyncConfig, TreeStatus, WsConnector,
};
use simtree_core::ids::{NodeId, TreeId};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// Follows one simulation tree live and prints it whenever it changes.
#[derive(Debug, Parser)]
#[command(name = "simtree-viewer", version)]
struct Args {
    /// HTTP base URL of the simulation service.
    #[arg(long, env = "SIMTREE_BASE_URL", default_value = DEFAULT_HTTP_BASE)]
    base_url: String,

    /// WebSocket base URL; derived from --base-url when omitted.
    #[arg(long, env = "SIMTREE_WS_URL")]
    ws_url: Option<String>,

    /// Tree to open.
    #[arg(long, env = "SIMTREE_TREE", conflicts_with = "scenario")]
    tree: Option<String>,

    /// Create a new tree from this scenario JSON file and open it.
    #[arg(long, env = "SIMTREE_SCENARIO")]
    scenario: Option<PathBuf>,

    #[arg(long, env = "SIMTREE_READY_TOKEN", default_value = DEFAULT_READY_TOKEN)]
    ready_token: String,

    /// Stream read timeout per poll.
    #[arg(long, env = "SIMTREE_POLL_MS", default_value_t = 20)]
    poll_ms: u64,

    #[arg(long, env = "SIMTREE_SNAPSHOT_ATTEMPTS", default_value_t = 6)]
    snapshot_attempts: u32,

    #[arg(long, env = "SIMTREE_SNAPSHOT_INTERVAL_MS", default_value_t = 300)]
    snapshot_interval_ms: u64,

    /// Reconnect dropped streams with exponential backoff instead of leaving them down.
    #[arg(long)]
    reconnect: bool,

    /// Node to select after opening (defaults to the root).
    #[arg(long)]
    select: Option<u64>,

    /// Advance every frontier node by this many turns after opening.
    #[arg(long, value_name = "TURNS")]
    advance: Option<u32>,

    /// Delete this node (and its subtree) after opening.
    #[arg(long, value_name = "NODE")]
    delete: Option<u64>,

    /// Print the current tree once and exit.
    #[arg(long)]
    once: bool,

    /// Stop following after this many seconds.
    #[arg(long, env = "SIMTREE_MAX_RUNTIME_S")]
    max_runtime_s: Option<u64>,
}

impl Args {
    fn sync_config(&self) -> SyncConfig {
        let mut config = SyncConfig::with_base(&self.base_url);
        if let Some(ws_url) = &self.ws_url {
            config.ws_base = ws_url.trim_end_matches('/').to_string();
        }
        config.ready_token = self.ready_token.clone();
        config.poll_timeout = Duration::from_millis(self.poll_ms.max(1));
        config.snapshot_retry = RetryPolicy::fixed(
            self.snapshot_attempts,
            Duration::from_millis(self.snapshot_interval_ms),
        );
        if self.reconnect {
            config.reconnect = ReconnectPolicy::exponential();
        }
        config
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("SIMTREE_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

type Viewer = Session<HttpTreeApi, WsConnector>;

const MAX_REPORTED_ERRORS: usize = 16;

fn print_view(session: &mut Viewer) {
    let tree = session
        .tree()
        .map(|tree| tree.to_string())
        .unwrap_or_default();
    let initializing = session.status() == Some(TreeStatus::Initializing);
    println!(
        "{}",
        render::status_line(&tree, session.snapshot(), initializing)
    );
    let positions = session.positions().clone();
    let classes = session.classes();
    if let Some(snapshot) = session.snapshot() {
        print!("{}", render::render_tree(snapshot, &classes, &positions));
    }
    if let Some(detail) = session.detail() {
        print!("{}", render::render_detail(detail));
    }
}

fn resolve_tree(args: &Args, session: &Viewer) -> Result<TreeId, Box<dyn std::error::Error>> {
    if let Some(path) = &args.scenario {
        let raw = std::fs::read_to_string(path)?;
        let scenario: serde_json::Value = serde_json::from_str(&raw)?;
        let created = session.create_tree(&scenario)?;
        tracing::info!(tree = %created.id, root = %created.root, "tree created");
        return Ok(created.id);
    }
    let Some(tree) = &args.tree else {
        return Err("pass --tree or --scenario".into());
    };
    TreeId::try_new(tree.as_str()).map_err(|err| err.message().into())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing();

    let config = args.sync_config();
    let api = HttpTreeApi::new(&config.http_base, config.http_timeout);
    let connector = WsConnector::new(&config.ws_base, &config.ready_token)
        .with_timeouts(config.http_timeout, config.poll_timeout);
    let poll = config.poll_timeout;
    let mut session = Session::new(api, connector, config);

    let tree = resolve_tree(&args, &session)?;
    if session.open_tree(tree)? == TreeStatus::Initializing {
        tracing::warn!("tree not readable yet; following the stream");
    }
    session.check_consistency(MAX_REPORTED_ERRORS);
    if let Some(node) = args.select {
        if !session.select_node(NodeId(node))? {
            tracing::warn!(node, "no such node; keeping the current selection");
        }
    }
    if let Some(turns) = args.advance {
        let children = session.advance_frontier(turns, false)?;
        tracing::info!(count = children.len(), "frontier advanced");
    }
    if let Some(node) = args.delete {
        let removed = session.delete_node(NodeId(node))?;
        tracing::info!(node, removed = removed.len(), "subtree deleted");
    }

    print_view(&mut session);
    if args.once {
        return Ok(());
    }

    let deadline = args
        .max_runtime_s
        .map(|secs| Instant::now() + Duration::from_secs(secs));
    loop {
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            break;
        }
        let report = session.pump();
        if report.structural || report.resynced {
            session.check_consistency(MAX_REPORTED_ERRORS);
        }
        if report.changed() {
            println!();
            print_view(&mut session);
        } else if report.tree_events == 0 && report.node_events == 0 {
            std::thread::sleep(poll);
        }
    }
    session.close_tree();
    Ok(())
}
