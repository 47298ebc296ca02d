#![forbid(unsafe_code)]

use crate::retry::{ReconnectPolicy, RetryPolicy};
use std::time::Duration;

pub const DEFAULT_HTTP_BASE: &str = "http://127.0.0.1:8000";
pub const DEFAULT_READY_TOKEN: &str = "ready";

#[derive(Clone, Debug, PartialEq)]
pub struct SyncConfig {
    /// Base URL of the request/response API, without a trailing slash.
    pub http_base: String,
    /// Base URL of the streaming endpoints (`ws://...`).
    pub ws_base: String,
    /// Literal the client sends right after a stream handshake; the server does not start
    /// pushing until it sees it.
    pub ready_token: String,
    pub snapshot_retry: RetryPolicy,
    pub reconnect: ReconnectPolicy,
    /// How long one stream poll may wait for a message.
    pub poll_timeout: Duration,
    pub http_timeout: Duration,
    /// Select the root as soon as the tree has one and nothing else is selected.
    pub auto_select_root: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::with_base(DEFAULT_HTTP_BASE)
    }
}

impl SyncConfig {
    /// Defaults with both bases derived from one `http(s)://` URL.
    pub fn with_base(http_base: &str) -> Self {
        let http_base = http_base.trim().trim_end_matches('/').to_string();
        Self {
            ws_base: ws_base_for(&http_base),
            http_base,
            ready_token: DEFAULT_READY_TOKEN.to_string(),
            snapshot_retry: RetryPolicy::default(),
            reconnect: ReconnectPolicy::Never,
            poll_timeout: Duration::from_millis(20),
            http_timeout: Duration::from_secs(10),
            auto_select_root: true,
        }
    }
}

/// `http://host` -> `ws://host`, `https://host` -> `wss://host`; anything else is kept.
pub fn ws_base_for(http_base: &str) -> String {
    if let Some(rest) = http_base.strip_prefix("https://") {
        return format!("wss://{rest}");
    }
    if let Some(rest) = http_base.strip_prefix("http://") {
        return format!("ws://{rest}");
    }
    http_base.to_string()
}
