#![forbid(unsafe_code)]

//! Client side of the simulation-tree service: snapshot fetch, live streams, and the session
//! that keeps a local tree in step with both.

pub mod api;
pub mod config;
pub mod error;
pub mod retry;
pub mod session;
pub mod snapshot;
pub mod stream;

pub use api::{BranchOp, CreatedTree, Fetched, HttpTreeApi, TreeApi};
pub use config::SyncConfig;
pub use error::ClientError;
pub use retry::{Backoff, ReconnectPolicy, RetryPolicy};
pub use session::{DetailTicket, PumpReport, Session, SnapshotTicket, TreeStatus};
pub use snapshot::{fetch_with_retry, fetch_with_retry_using};
pub use stream::{
    PollBatch, Reconnect, StreamConnection, StreamConnector, StreamKey, Subscription, WsConnection,
    WsConnector,
};
