// src/client/tasks.rs
//! Futures spawned on the client's I/O runtime. They talk to the backend
//! and queue events; they never call listeners.

use log::{debug, warn};
use std::net::SocketAddrV4;
use std::sync::mpsc::Sender;
use std::sync::Arc;
use tokio::task::JoinSet;
use crate::client::state::Event;
use crate::client::Shared;
use crate::models::filter::Filter;
use crate::models::server::{AppId, ListKind, ServerRecord};
use crate::storage::handles::Handle;

async fn ping(shared: &Shared, addr: SocketAddrV4) -> Option<ServerRecord> {
    shared.limiter.until_ready().await;
    match shared.backend.ping(addr).await {
        Ok(record) => Some(record),
        Err(e) => {
            debug!("Ping to {} failed: {}", addr, e);
            None
        }
    }
}

pub(crate) async fn enumerate(
    shared: Arc<Shared>,
    events: Sender<Event>,
    request: Handle,
    pass: u64,
    kind: ListKind,
    app_id: AppId,
    filters: Arc<Vec<Filter>>,
) {
    let seeds = match shared.backend.enumerate(kind, app_id, &filters).await {
        Ok(seeds) => Some(seeds),
        Err(e) => {
            warn!("Could not enumerate {} servers for app {}: {}", kind, app_id, e);
            None
        }
    };

    let targets: Vec<(usize, SocketAddrV4)> = {
        let mut state = shared.state.lock();
        let Some(entry) = state.lists.get_mut(request).filter(|e| e.pass == pass) else {
            return;
        };
        match seeds {
            Some(seeds) => {
                entry.enumerated = true;
                entry.enumeration_failed = false;
                entry.servers = seeds;
                entry.pending = entry.servers.len();
                entry.servers.iter().map(ServerRecord::addr).enumerate().collect()
            }
            None => {
                entry.enumeration_failed = true;
                entry.pending = 0;
                Vec::new()
            }
        }
    };
    debug!("{} list for app {} has {} servers to probe", kind, app_id, targets.len());
    probe_all(shared, events, request, pass, targets).await;
}

/// Pings every target of one pass. A pass with nothing to probe completes
/// straight away.
pub(crate) async fn probe_all(
    shared: Arc<Shared>,
    events: Sender<Event>,
    request: Handle,
    pass: u64,
    targets: Vec<(usize, SocketAddrV4)>,
) {
    if targets.is_empty() {
        let _ = events.send(Event::ListComplete { request, pass });
        return;
    }

    let mut probes = JoinSet::new();
    for (index, addr) in targets {
        let shared = shared.clone();
        let events = events.clone();
        probes.spawn(async move {
            let result = ping(&shared, addr).await;
            let _ = events.send(Event::ListServer { request, pass, index, result, counted: true });
        });
    }
    // Dropping the set when this task is aborted aborts every probe.
    while probes.join_next().await.is_some() {}
}

pub(crate) async fn probe_one(
    shared: Arc<Shared>,
    events: Sender<Event>,
    request: Handle,
    pass: u64,
    index: usize,
    addr: SocketAddrV4,
) {
    let result = ping(&shared, addr).await;
    let _ = events.send(Event::ListServer { request, pass, index, result, counted: false });
}

pub(crate) async fn ping_query(shared: Arc<Shared>, events: Sender<Event>, query: Handle, addr: SocketAddrV4) {
    let result = ping(&shared, addr).await;
    let _ = events.send(Event::Ping { query, result });
}

pub(crate) async fn players_query(shared: Arc<Shared>, events: Sender<Event>, query: Handle, addr: SocketAddrV4) {
    shared.limiter.until_ready().await;
    match shared.backend.players(addr).await {
        Ok(players) => {
            for player in players {
                let _ = events.send(Event::Player { query, player });
            }
            let _ = events.send(Event::PlayersDone { query, responded: true });
        }
        Err(e) => {
            debug!("Player query to {} failed: {}", addr, e);
            let _ = events.send(Event::PlayersDone { query, responded: false });
        }
    }
}

pub(crate) async fn rules_query(shared: Arc<Shared>, events: Sender<Event>, query: Handle, addr: SocketAddrV4) {
    shared.limiter.until_ready().await;
    match shared.backend.rules(addr).await {
        Ok(rules) => {
            for rule in rules {
                let _ = events.send(Event::Rule { query, rule });
            }
            let _ = events.send(Event::RulesDone { query, responded: true });
        }
        Err(e) => {
            debug!("Rules query to {} failed: {}", addr, e);
            let _ = events.send(Event::RulesDone { query, responded: false });
        }
    }
}
