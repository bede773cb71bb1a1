// src/client/state.rs
use std::net::SocketAddrV4;
use std::sync::Arc;
use tokio::task::JoinHandle;
use crate::client::listener::{PingListener, PlayersListener, RulesListener, ServerListListener};
use crate::client::ListResponse;
use crate::models::filter::Filter;
use crate::models::server::{AppId, ListKind, PlayerDetail, ServerRecord, ServerRule};
use crate::storage::handles::{Handle, Slots};

pub(crate) struct ListEntry {
    pub kind: ListKind,
    pub app_id: AppId,
    pub filters: Arc<Vec<Filter>>,
    pub listener: Arc<dyn ServerListListener>,
    pub servers: Vec<ServerRecord>,
    /// Set once the directory has been read successfully.
    pub enumerated: bool,
    pub enumeration_failed: bool,
    /// Bumped by refresh and cancel; events of older passes are dropped.
    pub pass: u64,
    /// Probes of the current pass still to be delivered.
    pub pending: usize,
    pub responded: usize,
    pub refreshing: bool,
    pub tasks: Vec<JoinHandle<()>>,
}

impl ListEntry {
    pub fn new(
        kind: ListKind,
        app_id: AppId,
        filters: Vec<Filter>,
        listener: Arc<dyn ServerListListener>,
    ) -> Self {
        Self {
            kind,
            app_id,
            filters: Arc::new(filters),
            listener,
            servers: Vec::new(),
            enumerated: false,
            enumeration_failed: false,
            pass: 0,
            pending: 0,
            responded: 0,
            refreshing: true,
            tasks: Vec::new(),
        }
    }

    /// Starts a new pass, stopping whatever the previous one had in flight.
    pub fn next_pass(&mut self) -> u64 {
        self.abort_tasks();
        self.pass += 1;
        self.pending = 0;
        self.responded = 0;
        self.pass
    }

    pub fn abort_tasks(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }

    pub fn track(&mut self, task: JoinHandle<()>) {
        self.tasks.retain(|t| !t.is_finished());
        self.tasks.push(task);
    }

    pub fn response(&self) -> ListResponse {
        if self.enumeration_failed {
            ListResponse::ServersFailedToRespond
        } else if self.servers.is_empty() {
            ListResponse::NoServersListed
        } else if self.responded > 0 {
            ListResponse::ServersResponded
        } else {
            ListResponse::ServersFailedToRespond
        }
    }
}

#[derive(Clone)]
pub(crate) enum QueryListener {
    Ping(Arc<dyn PingListener>),
    Players(Arc<dyn PlayersListener>),
    Rules(Arc<dyn RulesListener>),
}

pub(crate) struct QueryEntry {
    pub addr: SocketAddrV4,
    pub listener: QueryListener,
    pub task: Option<JoinHandle<()>>,
}

impl QueryEntry {
    pub fn abort(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[derive(Default)]
pub(crate) struct State {
    pub lists: Slots<ListEntry>,
    pub queries: Slots<QueryEntry>,
    pub shut_down: bool,
}

/// Results produced on the I/O runtime, waiting for delivery.
pub(crate) enum Event {
    ListServer {
        request: Handle,
        pass: u64,
        index: usize,
        result: Option<ServerRecord>,
        /// False for `refresh_server`, which does not take part in the pass.
        counted: bool,
    },
    ListComplete {
        request: Handle,
        pass: u64,
    },
    Ping {
        query: Handle,
        result: Option<ServerRecord>,
    },
    Player {
        query: Handle,
        player: PlayerDetail,
    },
    PlayersDone {
        query: Handle,
        responded: bool,
    },
    Rule {
        query: Handle,
        rule: ServerRule,
    },
    RulesDone {
        query: Handle,
        responded: bool,
    },
}
