// tests/common/mod.rs
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use r1browser::{
    AppId, Backend, BackendError, Config, Filter, ListKind, ListResponse, PingListener,
    PlayerDetail, PlayersListener, RulesListener, ServerDirectoryClient, ServerListListener,
    ServerListRequest, ServerRecord, ServerRule,
};
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

pub const APP: AppId = AppId(1454890);

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn addr(last: u8) -> SocketAddrV4 {
    SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, last), 37015)
}

pub fn record(last: u8, name: &str, map: &str) -> ServerRecord {
    ServerRecord {
        server_name: name.into(),
        map: map.into(),
        max_players: 12,
        players: 4,
        ping: 20 + last as u32,
        ..ServerRecord::unknown(addr(last))
    }
}

/// How a scripted server behaves when queried.
#[derive(Clone)]
pub enum Script {
    Respond {
        record: ServerRecord,
        players: Vec<PlayerDetail>,
        rules: Vec<ServerRule>,
    },
    Fail,
    /// Answers only after the gate receives a permit.
    Gated {
        gate: Arc<Semaphore>,
        record: ServerRecord,
    },
    /// Never answers.
    Silent,
}

pub fn respond(record: ServerRecord) -> Script {
    Script::Respond { record, players: Vec::new(), rules: Vec::new() }
}

#[derive(Default)]
pub struct ScriptedBackend {
    lists: Mutex<HashMap<ListKind, Result<Vec<ServerRecord>, ()>>>,
    servers: Mutex<HashMap<SocketAddrV4, Script>>,
    pub seen_filters: Mutex<Vec<Vec<Filter>>>,
    pub enumerations: AtomicUsize,
    pub pings: AtomicUsize,
    pub answered: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn list(&self, kind: ListKind, servers: Vec<ServerRecord>) {
        self.lists.lock().insert(kind, Ok(servers));
    }

    pub fn fail_list(&self, kind: ListKind) {
        self.lists.lock().insert(kind, Err(()));
    }

    pub fn script(&self, addr: SocketAddrV4, script: Script) {
        self.servers.lock().insert(addr, script);
    }

    fn script_for(&self, addr: SocketAddrV4) -> Script {
        self.servers.lock().get(&addr).cloned().unwrap_or(Script::Fail)
    }

    async fn answer(&self, addr: SocketAddrV4) -> Result<Script, BackendError> {
        let script = self.script_for(addr);
        let result = match &script {
            Script::Fail => Err(BackendError::NoResponse),
            Script::Silent => std::future::pending().await,
            Script::Gated { gate, .. } => match gate.acquire().await {
                Ok(permit) => {
                    permit.forget();
                    Ok(script.clone())
                }
                Err(_) => Err(BackendError::NoResponse),
            },
            Script::Respond { .. } => Ok(script.clone()),
        };
        self.answered.fetch_add(1, Ordering::SeqCst);
        result
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    async fn enumerate(
        &self,
        kind: ListKind,
        _app_id: AppId,
        filters: &[Filter],
    ) -> Result<Vec<ServerRecord>, BackendError> {
        self.enumerations.fetch_add(1, Ordering::SeqCst);
        self.seen_filters.lock().push(filters.to_vec());
        let listed = self.lists.lock().get(&kind).cloned().unwrap_or_else(|| Ok(Vec::new()));
        listed
            .map(|servers| servers.iter().map(|s| ServerRecord::unknown(s.addr())).collect())
            .map_err(|_| BackendError::Protocol("directory unavailable".into()))
    }

    async fn ping(&self, addr: SocketAddrV4) -> Result<ServerRecord, BackendError> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        match self.answer(addr).await? {
            Script::Respond { record, .. } | Script::Gated { record, .. } => Ok(record),
            _ => Err(BackendError::NoResponse),
        }
    }

    async fn players(&self, addr: SocketAddrV4) -> Result<Vec<PlayerDetail>, BackendError> {
        match self.answer(addr).await? {
            Script::Respond { players, .. } => Ok(players),
            Script::Gated { .. } => Ok(Vec::new()),
            _ => Err(BackendError::NoResponse),
        }
    }

    async fn rules(&self, addr: SocketAddrV4) -> Result<Vec<ServerRule>, BackendError> {
        match self.answer(addr).await? {
            Script::Respond { rules, .. } => Ok(rules),
            Script::Gated { .. } => Ok(Vec::new()),
            _ => Err(BackendError::NoResponse),
        }
    }
}

pub fn client(backend: Arc<ScriptedBackend>) -> ServerDirectoryClient {
    init_logging();
    let config = Config { probe_period_ms: 1, probe_burst_limit: 1000, ..Config::default() };
    ServerDirectoryClient::new(config, backend).expect("client starts")
}

/// Runs callbacks until `done` holds or two seconds pass.
pub fn pump_until(client: &ServerDirectoryClient, done: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        client.run_callbacks_timeout(Duration::from_millis(10));
    }
    done()
}

/// Runs callbacks for a fixed time, for asserting that nothing arrives.
pub fn pump_for(client: &ServerDirectoryClient, period: Duration) {
    let deadline = Instant::now() + period;
    while Instant::now() < deadline {
        client.run_callbacks_timeout(Duration::from_millis(10));
    }
}

/// Waits until the backend has produced `count` answers, without delivering.
pub fn wait_answered(backend: &ScriptedBackend, count: usize) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while backend.answered.load(Ordering::SeqCst) < count && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    // Let the task queue the event it is about to send.
    std::thread::sleep(Duration::from_millis(50));
}

#[derive(Debug, Clone, PartialEq)]
pub enum Seen {
    Responded(usize, ServerRecord),
    Failed(usize),
    Complete(ListResponse, usize),
    Ping(ServerRecord),
    PingFailed,
    Player(String, i32),
    PlayersFailed,
    PlayersComplete,
    Rule(String, String),
    RulesFailed,
    RulesComplete,
}

impl Seen {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Seen::Complete(..)
                | Seen::Ping(_)
                | Seen::PingFailed
                | Seen::PlayersFailed
                | Seen::PlayersComplete
                | Seen::RulesFailed
                | Seen::RulesComplete
        )
    }
}

/// Listener that records everything it is told.
#[derive(Default)]
pub struct Recorder {
    pub seen: Mutex<Vec<Seen>>,
    pub requests: Mutex<Vec<ServerListRequest>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Seen> {
        self.seen.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn terminals(&self) -> usize {
        self.seen.lock().iter().filter(|s| s.is_terminal()).count()
    }

    fn push(&self, seen: Seen) {
        self.seen.lock().push(seen);
    }
}

impl ServerListListener for Recorder {
    fn server_responded(&self, request: ServerListRequest, index: usize, server: &ServerRecord) {
        self.requests.lock().push(request);
        self.push(Seen::Responded(index, server.clone()));
    }

    fn server_failed_to_respond(&self, request: ServerListRequest, index: usize) {
        self.requests.lock().push(request);
        self.push(Seen::Failed(index));
    }

    fn refresh_complete(&self, request: ServerListRequest, response: ListResponse, server_count: usize) {
        self.requests.lock().push(request);
        self.push(Seen::Complete(response, server_count));
    }
}

impl PingListener for Recorder {
    fn server_responded(&self, server: &ServerRecord) {
        self.push(Seen::Ping(server.clone()));
    }

    fn server_failed_to_respond(&self) {
        self.push(Seen::PingFailed);
    }
}

impl PlayersListener for Recorder {
    fn add_player(&self, name: &str, score: i32, _time_played: f32) {
        self.push(Seen::Player(name.to_string(), score));
    }

    fn players_failed_to_respond(&self) {
        self.push(Seen::PlayersFailed);
    }

    fn players_refresh_complete(&self) {
        self.push(Seen::PlayersComplete);
    }
}

impl RulesListener for Recorder {
    fn rules_responded(&self, rule: &str, value: &str) {
        self.push(Seen::Rule(rule.to_string(), value.to_string()));
    }

    fn rules_failed_to_respond(&self) {
        self.push(Seen::RulesFailed);
    }

    fn rules_refresh_complete(&self) {
        self.push(Seen::RulesComplete);
    }
}
