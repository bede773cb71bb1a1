// src/client/listener.rs
//! Listener contracts.
//!
//! Every method runs on the thread that calls
//! [`run_callbacks`](super::ServerDirectoryClient::run_callbacks), never
//! concurrently with another listener method of the same client. Listeners
//! may call back into the client, cancel and release included.
//!
//! # Outstanding queries
//!
//! A listener must not be torn down while a query it was handed to is still
//! outstanding: cancel the query (or release the list request) first. The
//! client keeps a strong reference to the listener until the terminal event,
//! cancellation or release, so dropping your own `Arc` does not stop
//! delivery. Whatever state the listener points at has to stay usable until
//! then.

use crate::client::{ListResponse, ServerListRequest};
use crate::models::server::ServerRecord;

/// Receives the results of a server list request, and of every
/// `refresh_query` / `refresh_server` issued on it later.
pub trait ServerListListener: Send + Sync {
    /// The server at `index` answered. `server` is the merged snapshot, the
    /// same value `server_details(request, index)` now returns.
    fn server_responded(&self, request: ServerListRequest, index: usize, server: &ServerRecord);

    fn server_failed_to_respond(&self, request: ServerListRequest, index: usize);

    /// Terminal event of a pass. Release, cancel and shutdown suppress it.
    fn refresh_complete(&self, request: ServerListRequest, response: ListResponse, server_count: usize);
}

/// Receives the single outcome of `ping_server`.
pub trait PingListener: Send + Sync {
    fn server_responded(&self, server: &ServerRecord);

    fn server_failed_to_respond(&self);
}

/// Receives the outcome of `player_details`: zero or more players, then
/// either `players_refresh_complete` or `players_failed_to_respond`.
pub trait PlayersListener: Send + Sync {
    /// `time_played` is in seconds.
    fn add_player(&self, name: &str, score: i32, time_played: f32);

    fn players_failed_to_respond(&self);

    fn players_refresh_complete(&self);
}

/// Receives the outcome of `server_rules`: zero or more rules, then either
/// `rules_refresh_complete` or `rules_failed_to_respond`.
pub trait RulesListener: Send + Sync {
    fn rules_responded(&self, rule: &str, value: &str);

    fn rules_failed_to_respond(&self);

    fn rules_refresh_complete(&self);
}
