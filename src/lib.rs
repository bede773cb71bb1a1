// src/lib.rs
//! Server directory client for r1 master servers.
//!
//! [`ServerDirectoryClient`] enumerates server lists, probes every listed
//! server and answers direct ping, player and rules queries. Work is tracked
//! through generation-checked handles and results reach caller-supplied
//! listeners from [`ServerDirectoryClient::run_callbacks`].

pub mod backend;
pub mod client;
pub mod config;
pub mod error;
pub mod models;
pub mod storage;
pub mod utils;

pub use backend::master::MasterServerBackend;
pub use backend::Backend;
pub use client::listener::{PingListener, PlayersListener, RulesListener, ServerListListener};
pub use client::{ListResponse, ServerDirectoryClient, ServerListRequest, ServerQuery};
pub use config::Config;
pub use error::{BackendError, DirectoryError};
pub use models::filter::{Filter, KeyValuePair};
pub use models::server::{AppId, ListKind, PlayerDetail, ServerId, ServerRecord, ServerRule};
pub use storage::memory::ServerBook;
