//! Offline-capable client for the order service.
//!
//! Keeps a SQLite mirror of tables and menu, queues writes while the server
//! is out of reach and replays them once it comes back.

pub mod config;
pub mod db;
pub mod error;
pub mod mirror;
pub mod models;
pub mod ordering;
pub mod queue;
pub mod sync;
pub mod transport;

pub use config::{ClientConfig, RetryPolicy};
pub use db::LocalDatabase;
pub use error::{ClientError, ClientResult, StoreError, SyncError};
pub use mirror::LocalMirror;
pub use ordering::{Delivery, OrderingClient, PlacedOrder};
pub use queue::{ActionQueue, DrainReport};
pub use sync::SyncCoordinator;
pub use transport::{HttpTransport, SyncTransport};
