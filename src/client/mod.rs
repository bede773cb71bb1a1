// src/client/mod.rs
//! Asynchronous server directory client.
//!
//! Queries return a handle at once; network work happens on an I/O runtime
//! owned by the client. Results are queued and handed to listeners only when
//! the caller runs [`ServerDirectoryClient::run_callbacks`], which makes the
//! calling thread the single delivery context.
//!
//! Cancel and release take the same lock delivery holds, so once they return
//! nothing more reaches the listener for that handle, even when a response
//! was already queued.

pub mod listener;
mod state;
mod tasks;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::RateLimiter;
use log::{debug, info, warn};
use parking_lot::{Mutex, ReentrantMutex};
use std::net::SocketAddrV4;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::{Builder, Runtime};
use uuid::Uuid;
use crate::backend::Backend;
use crate::config::Config;
use crate::error::{DirectoryError, Result};
use crate::models::filter::{self, KeyValuePair};
use crate::models::server::{AppId, ListKind, ServerRecord};
use crate::storage::handles::Handle;
use self::listener::{PingListener, PlayersListener, RulesListener, ServerListListener};
use self::state::{Event, ListEntry, QueryEntry, QueryListener, State};

/// Handle to a server list request. Stays valid until released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServerListRequest(Handle);

impl ServerListRequest {
    pub const INVALID: ServerListRequest = ServerListRequest(Handle::NULL);

    /// False only for the sentinel; a released handle still reports true
    /// here and is rejected by the client.
    pub fn is_valid(&self) -> bool {
        self.0 != Handle::NULL
    }
}

/// Handle to a direct ping, player or rules query. Ends with the terminal
/// listener event or with cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServerQuery(Handle);

impl ServerQuery {
    pub const INVALID: ServerQuery = ServerQuery(Handle::SENTINEL);

    pub fn is_valid(&self) -> bool {
        self.0 != Handle::SENTINEL
    }
}

/// Outcome carried by `refresh_complete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListResponse {
    /// At least one server answered during the pass.
    ServersResponded,
    /// Servers were listed but none answered, or the directory itself could
    /// not be read.
    ServersFailedToRespond,
    /// The directory was read and listed nothing.
    NoServersListed,
}

pub(crate) struct Shared {
    pub(crate) backend: Arc<dyn Backend>,
    pub(crate) limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    pub(crate) state: Mutex<State>,
    delivery: ReentrantMutex<()>,
}

pub struct ServerDirectoryClient {
    id: Uuid,
    shared: Arc<Shared>,
    runtime: Mutex<Option<Runtime>>,
    handle: tokio::runtime::Handle,
    events_tx: Mutex<Sender<Event>>,
    events_rx: Mutex<Receiver<Event>>,
}

impl ServerDirectoryClient {
    pub fn new(config: Config, backend: Arc<dyn Backend>) -> Result<Self> {
        config.validate()?;
        let runtime = Builder::new_multi_thread()
            .worker_threads(config.io_worker_threads)
            .thread_name("r1browser-io")
            .enable_all()
            .build()?;
        let handle = runtime.handle().clone();
        let (events_tx, events_rx) = mpsc::channel();
        let id = Uuid::new_v4();

        info!("Directory client {} started with {} I/O threads", id, config.io_worker_threads);
        Ok(Self {
            id,
            shared: Arc::new(Shared {
                backend,
                limiter: RateLimiter::direct(config.probe_quota()?),
                state: Mutex::new(State::default()),
                delivery: ReentrantMutex::new(()),
            }),
            runtime: Mutex::new(Some(runtime)),
            handle,
            events_tx: Mutex::new(events_tx),
            events_rx: Mutex::new(events_rx),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    fn sender(&self) -> Sender<Event> {
        self.events_tx.lock().clone()
    }

    fn live(state: &State) -> Result<()> {
        if state.shut_down {
            Err(DirectoryError::ShutDown)
        } else {
            Ok(())
        }
    }

    /// Starts enumerating one directory. `filters` is the flat prefix
    /// encoding described in [`crate::models::filter`]; a malformed encoding
    /// is rejected here, before anything goes on the network.
    pub fn request_server_list(
        &self,
        kind: ListKind,
        app_id: AppId,
        filters: &[KeyValuePair],
        listener: Arc<dyn ServerListListener>,
    ) -> Result<ServerListRequest> {
        let filters = filter::decode(filters)?;
        let mut state = self.shared.state.lock();
        Self::live(&state)?;

        let entry = ListEntry::new(kind, app_id, filters, listener);
        let filters = entry.filters.clone();
        let request = state.lists.insert(entry);
        let task = self.handle.spawn(tasks::enumerate(
            self.shared.clone(),
            self.sender(),
            request,
            0,
            kind,
            app_id,
            filters,
        ));
        if let Some(entry) = state.lists.get_mut(request) {
            entry.track(task);
        }
        debug!("Requested {} server list for app {} as {:?}", kind, app_id, request);
        Ok(ServerListRequest(request))
    }

    fn with_list<T>(&self, request: ServerListRequest, f: impl FnOnce(&ListEntry) -> Result<T>) -> Result<T> {
        let state = self.shared.state.lock();
        Self::live(&state)?;
        let entry = state.lists.get(request.0).ok_or(DirectoryError::InvalidHandle)?;
        f(entry)
    }

    pub fn server_details(&self, request: ServerListRequest, index: usize) -> Result<ServerRecord> {
        self.with_list(request, |entry| {
            entry
                .servers
                .get(index)
                .cloned()
                .ok_or(DirectoryError::IndexOutOfRange { index, count: entry.servers.len() })
        })
    }

    pub fn server_count(&self, request: ServerListRequest) -> Result<usize> {
        self.with_list(request, |entry| Ok(entry.servers.len()))
    }

    pub fn is_refreshing(&self, request: ServerListRequest) -> Result<bool> {
        self.with_list(request, |entry| Ok(entry.refreshing))
    }

    /// Pings every listed server again without re-reading the directory.
    /// Servers marked do-not-refresh are skipped. If the directory was never
    /// read successfully it is read again.
    pub fn refresh_query(&self, request: ServerListRequest) -> Result<()> {
        let _delivery = self.shared.delivery.lock();
        let mut state = self.shared.state.lock();
        Self::live(&state)?;
        let entry = state.lists.get_mut(request.0).ok_or(DirectoryError::InvalidHandle)?;

        let pass = entry.next_pass();
        entry.refreshing = true;
        let task = if entry.enumerated {
            let targets: Vec<(usize, SocketAddrV4)> = entry
                .servers
                .iter()
                .enumerate()
                .filter(|(_, server)| !server.do_not_refresh)
                .map(|(index, server)| (index, server.addr()))
                .collect();
            entry.pending = targets.len();
            debug!("Refreshing {} of {} servers in {:?}", targets.len(), entry.servers.len(), request);
            self.handle
                .spawn(tasks::probe_all(self.shared.clone(), self.sender(), request.0, pass, targets))
        } else {
            self.handle.spawn(tasks::enumerate(
                self.shared.clone(),
                self.sender(),
                request.0,
                pass,
                entry.kind,
                entry.app_id,
                entry.filters.clone(),
            ))
        };
        entry.track(task);
        Ok(())
    }

    /// Pings one server of the list. Only the per-server event is delivered.
    pub fn refresh_server(&self, request: ServerListRequest, index: usize) -> Result<()> {
        let mut state = self.shared.state.lock();
        Self::live(&state)?;
        let entry = state.lists.get_mut(request.0).ok_or(DirectoryError::InvalidHandle)?;
        let addr = entry
            .servers
            .get(index)
            .map(ServerRecord::addr)
            .ok_or(DirectoryError::IndexOutOfRange { index, count: entry.servers.len() })?;

        let task = self.handle.spawn(tasks::probe_one(
            self.shared.clone(),
            self.sender(),
            request.0,
            entry.pass,
            index,
            addr,
        ));
        entry.track(task);
        Ok(())
    }

    /// Stops network activity for the request. Handle and collected servers
    /// stay; no further events arrive until the next refresh.
    pub fn cancel_query(&self, request: ServerListRequest) -> Result<()> {
        let _delivery = self.shared.delivery.lock();
        let mut state = self.shared.state.lock();
        Self::live(&state)?;
        let entry = state.lists.get_mut(request.0).ok_or(DirectoryError::InvalidHandle)?;
        entry.next_pass();
        entry.refreshing = false;
        debug!("Canceled {:?}", request);
        Ok(())
    }

    /// Frees the request. No further callbacks fire for it, including the
    /// `refresh_complete` of a pass still in flight.
    pub fn release_request(&self, request: ServerListRequest) -> Result<()> {
        let _delivery = self.shared.delivery.lock();
        let removed = {
            let mut state = self.shared.state.lock();
            Self::live(&state)?;
            state.lists.remove(request.0)
        };
        match removed {
            Some(mut entry) => {
                entry.abort_tasks();
                debug!("Released {:?}", request);
                Ok(())
            }
            None => {
                warn!("Release of invalid server list request {:?}", request);
                Err(DirectoryError::InvalidHandle)
            }
        }
    }

    fn start_query<F>(&self, addr: SocketAddrV4, listener: QueryListener, spawn: F) -> Result<ServerQuery>
    where
        F: FnOnce(Arc<Shared>, Sender<Event>, Handle) -> tokio::task::JoinHandle<()>,
    {
        let mut state = self.shared.state.lock();
        Self::live(&state)?;
        let query = state.queries.insert(QueryEntry { addr, listener, task: None });
        let task = spawn(self.shared.clone(), self.sender(), query);
        if let Some(entry) = state.queries.get_mut(query) {
            entry.task = Some(task);
        }
        Ok(ServerQuery(query))
    }

    /// Asks one server for fresh details and ping time.
    pub fn ping_server(&self, addr: SocketAddrV4, listener: Arc<dyn PingListener>) -> Result<ServerQuery> {
        let handle = self.handle.clone();
        self.start_query(addr, QueryListener::Ping(listener), move |shared, events, query| {
            handle.spawn(tasks::ping_query(shared, events, query, addr))
        })
    }

    pub fn player_details(&self, addr: SocketAddrV4, listener: Arc<dyn PlayersListener>) -> Result<ServerQuery> {
        let handle = self.handle.clone();
        self.start_query(addr, QueryListener::Players(listener), move |shared, events, query| {
            handle.spawn(tasks::players_query(shared, events, query, addr))
        })
    }

    pub fn server_rules(&self, addr: SocketAddrV4, listener: Arc<dyn RulesListener>) -> Result<ServerQuery> {
        let handle = self.handle.clone();
        self.start_query(addr, QueryListener::Rules(listener), move |shared, events, query| {
            handle.spawn(tasks::rules_query(shared, events, query, addr))
        })
    }

    /// Aborts a direct query. Its listener is not invoked afterwards. Queries
    /// that already delivered their terminal event are gone and report
    /// `InvalidHandle`.
    pub fn cancel_server_query(&self, query: ServerQuery) -> Result<()> {
        let _delivery = self.shared.delivery.lock();
        let removed = {
            let mut state = self.shared.state.lock();
            Self::live(&state)?;
            state.queries.remove(query.0)
        };
        match removed {
            Some(mut entry) => {
                entry.abort();
                debug!("Canceled query {:?} to {}", query, entry.addr);
                Ok(())
            }
            None => Err(DirectoryError::InvalidHandle),
        }
    }

    /// Delivers every queued event on the calling thread. Returns the number
    /// of events that reached a listener.
    pub fn run_callbacks(&self) -> usize {
        let _delivery = self.shared.delivery.lock();
        let mut delivered = 0;
        loop {
            let event = match self.events_rx.lock().try_recv() {
                Ok(event) => event,
                Err(_) => break,
            };
            if self.shared.deliver(event) {
                delivered += 1;
            }
        }
        delivered
    }

    /// Like [`run_callbacks`](Self::run_callbacks), but first waits up to
    /// `timeout` for an event to arrive.
    pub fn run_callbacks_timeout(&self, timeout: Duration) -> usize {
        let first = self.events_rx.lock().recv_timeout(timeout);
        let _delivery = self.shared.delivery.lock();
        let mut delivered = 0;
        if let Ok(event) = first {
            if self.shared.deliver(event) {
                delivered += 1;
            }
        }
        delivered + self.run_callbacks()
    }

    /// Stops all network activity and invalidates every handle. Pending
    /// events are discarded. Also runs on drop.
    pub fn shutdown(&self) {
        let _delivery = self.shared.delivery.lock();
        let (lists, queries) = {
            let mut state = self.shared.state.lock();
            if state.shut_down {
                return;
            }
            state.shut_down = true;
            (state.lists.drain(), state.queries.drain())
        };
        let (list_count, query_count) = (lists.len(), queries.len());
        for mut entry in lists {
            entry.abort_tasks();
        }
        for mut entry in queries {
            entry.abort();
        }
        while self.events_rx.lock().try_recv().is_ok() {}
        if let Some(runtime) = self.runtime.lock().take() {
            runtime.shutdown_background();
        }
        info!(
            "Directory client {} shut down ({} requests, {} queries outstanding)",
            self.id, list_count, query_count
        );
    }
}

impl Drop for ServerDirectoryClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Shared {
    /// Hands one event to its listener if the handle is still live and the
    /// event belongs to its current pass. The delivery lock is held by the
    /// caller; the state lock is never held while a listener runs.
    fn deliver(&self, event: Event) -> bool {
        match event {
            Event::ListServer { request, pass, index, result, counted } => {
                self.deliver_list_server(request, pass, index, result, counted)
            }
            Event::ListComplete { request, pass } => self.finish_list(request, pass),
            Event::Ping { query, result } => {
                let Some(QueryListener::Ping(listener)) = self.finish_query(query) else {
                    return false;
                };
                match result {
                    Some(server) => listener.server_responded(&server),
                    None => listener.server_failed_to_respond(),
                }
                true
            }
            Event::Player { query, player } => {
                let Some(QueryListener::Players(listener)) = self.query_listener(query) else {
                    return false;
                };
                listener.add_player(&player.name, player.score, player.time_played);
                true
            }
            Event::PlayersDone { query, responded } => {
                let Some(QueryListener::Players(listener)) = self.finish_query(query) else {
                    return false;
                };
                if responded {
                    listener.players_refresh_complete();
                } else {
                    listener.players_failed_to_respond();
                }
                true
            }
            Event::Rule { query, rule } => {
                let Some(QueryListener::Rules(listener)) = self.query_listener(query) else {
                    return false;
                };
                listener.rules_responded(&rule.key, &rule.value);
                true
            }
            Event::RulesDone { query, responded } => {
                let Some(QueryListener::Rules(listener)) = self.finish_query(query) else {
                    return false;
                };
                if responded {
                    listener.rules_refresh_complete();
                } else {
                    listener.rules_failed_to_respond();
                }
                true
            }
        }
    }

    fn query_listener(&self, query: Handle) -> Option<QueryListener> {
        let listener = self.state.lock().queries.get(query).map(|entry| entry.listener.clone());
        if listener.is_none() {
            debug!("Dropping event for finished or canceled query {:?}", query);
        }
        listener
    }

    /// Removes a query on its terminal event.
    fn finish_query(&self, query: Handle) -> Option<QueryListener> {
        let entry = self.state.lock().queries.remove(query);
        if entry.is_none() {
            debug!("Dropping terminal event for finished or canceled query {:?}", query);
        }
        entry.map(|entry| entry.listener)
    }

    fn deliver_list_server(
        &self,
        request: Handle,
        pass: u64,
        index: usize,
        result: Option<ServerRecord>,
        counted: bool,
    ) -> bool {
        let (listener, snapshot, completes) = {
            let mut state = self.state.lock();
            let Some(entry) = state.lists.get_mut(request).filter(|e| e.pass == pass) else {
                debug!("Dropping stale server event for {:?}", request);
                return false;
            };
            let Some(server) = entry.servers.get_mut(index) else {
                return false;
            };
            let snapshot = match result {
                Some(fresh) => {
                    server.merge_response(fresh);
                    if counted {
                        entry.responded += 1;
                    }
                    Some(server.clone())
                }
                None => {
                    server.do_not_refresh = true;
                    None
                }
            };
            let completes = counted && {
                entry.pending = entry.pending.saturating_sub(1);
                entry.pending == 0
            };
            (entry.listener.clone(), snapshot, completes)
        };

        let request_handle = ServerListRequest(request);
        match snapshot {
            Some(server) => listener.server_responded(request_handle, index, &server),
            None => listener.server_failed_to_respond(request_handle, index),
        }
        if completes {
            self.finish_list(request, pass);
        }
        true
    }

    fn finish_list(&self, request: Handle, pass: u64) -> bool {
        let (listener, response, count) = {
            let mut state = self.state.lock();
            // The listener may have canceled, refreshed or released the
            // request from inside the last server callback.
            let Some(entry) = state.lists.get_mut(request).filter(|e| e.pass == pass) else {
                return false;
            };
            entry.refreshing = false;
            (entry.listener.clone(), entry.response(), entry.servers.len())
        };
        debug!("{:?} complete: {:?} with {} servers", request, response, count);
        listener.refresh_complete(ServerListRequest(request), response, count);
        true
    }
}
