// src/main.rs
use env_logger::Env;
use log::{error, info};
use r1browser::utils::parse_ip_or_socket;
use r1browser::{
    AppId, Config, KeyValuePair, ListKind, ListResponse, MasterServerBackend, PingListener,
    PlayersListener, RulesListener, ServerBook, ServerDirectoryClient, ServerListListener,
    ServerListRequest, ServerRecord,
};
use std::net::SocketAddrV4;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const USAGE: &str = "usage:
  r1browser list <internet|lan|friends|favorites|history|spectator> [key value]...
  r1browser ping <ip:port>
  r1browser players <ip:port>
  r1browser rules <ip:port>";

#[derive(Default)]
struct Printer {
    done: AtomicBool,
}

fn print_server(index: Option<usize>, server: &ServerRecord) {
    let index = index.map(|i| format!("{:>3}", i)).unwrap_or_else(|| "  -".into());
    println!(
        "{}  {:<32} {:<20} {:>2}/{:<2} {:>5}ms  {}",
        index,
        server.name(),
        server.map,
        server.players,
        server.max_players,
        server.ping,
        server.address_string()
    );
}

impl ServerListListener for Printer {
    fn server_responded(&self, _request: ServerListRequest, index: usize, server: &ServerRecord) {
        print_server(Some(index), server);
    }

    fn server_failed_to_respond(&self, _request: ServerListRequest, index: usize) {
        info!("Server {} did not respond", index);
    }

    fn refresh_complete(&self, _request: ServerListRequest, response: ListResponse, server_count: usize) {
        println!("{:?}, {} servers listed", response, server_count);
        self.done.store(true, Ordering::SeqCst);
    }
}

impl PingListener for Printer {
    fn server_responded(&self, server: &ServerRecord) {
        print_server(None, server);
        self.done.store(true, Ordering::SeqCst);
    }

    fn server_failed_to_respond(&self) {
        println!("No response");
        self.done.store(true, Ordering::SeqCst);
    }
}

impl PlayersListener for Printer {
    fn add_player(&self, name: &str, score: i32, time_played: f32) {
        println!("{:<24} {:>6} {:>8.0}s", name, score, time_played);
    }

    fn players_failed_to_respond(&self) {
        println!("No response");
        self.done.store(true, Ordering::SeqCst);
    }

    fn players_refresh_complete(&self) {
        self.done.store(true, Ordering::SeqCst);
    }
}

impl RulesListener for Printer {
    fn rules_responded(&self, rule: &str, value: &str) {
        println!("{} = {}", rule, value);
    }

    fn rules_failed_to_respond(&self) {
        println!("No response");
        self.done.store(true, Ordering::SeqCst);
    }

    fn rules_refresh_complete(&self) {
        self.done.store(true, Ordering::SeqCst);
    }
}

fn parse_target(arg: Option<&String>) -> Result<SocketAddrV4, String> {
    let arg = arg.ok_or("missing <ip:port>")?;
    match parse_ip_or_socket(arg)? {
        (ip, Some(port)) => Ok(SocketAddrV4::new(ip, port)),
        (_, None) => Err(format!("'{}' needs a port", arg)),
    }
}

fn parse_filters(args: &[String]) -> Result<Vec<KeyValuePair>, String> {
    if args.len() % 2 != 0 {
        return Err("filters must come as key value pairs".into());
    }
    Ok(args.chunks(2).map(|kv| KeyValuePair::new(kv[0].as_str(), kv[1].as_str())).collect())
}

fn run(args: &[String]) -> Result<bool, String> {
    let config = Config::from_env();
    let app_id = AppId(
        std::env::var("APP_ID")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
    );
    let book = Arc::new(ServerBook::new(config.max_history_entries));
    let backend = MasterServerBackend::new(config.clone(), book).map_err(|e| e.to_string())?;
    let client = ServerDirectoryClient::new(config, Arc::new(backend)).map_err(|e| e.to_string())?;
    let printer = Arc::new(Printer::default());

    let command = args.first().map(String::as_str).ok_or("missing command")?;
    match command {
        "list" => {
            let kind: ListKind = args.get(1).ok_or("missing list kind")?.parse()?;
            let filters = parse_filters(&args[2..])?;
            client
                .request_server_list(kind, app_id, &filters, printer.clone())
                .map_err(|e| e.to_string())?;
        }
        "ping" => {
            client.ping_server(parse_target(args.get(1))?, printer.clone()).map_err(|e| e.to_string())?;
        }
        "players" => {
            client.player_details(parse_target(args.get(1))?, printer.clone()).map_err(|e| e.to_string())?;
        }
        "rules" => {
            client.server_rules(parse_target(args.get(1))?, printer.clone()).map_err(|e| e.to_string())?;
        }
        other => return Err(format!("unknown command '{}'", other)),
    }

    // The client imposes no timeout of its own; give up after a minute.
    let deadline = Instant::now() + Duration::from_secs(60);
    while !printer.done.load(Ordering::SeqCst) && Instant::now() < deadline {
        client.run_callbacks_timeout(Duration::from_millis(100));
    }
    client.shutdown();
    Ok(printer.done.load(Ordering::SeqCst))
}

fn main() -> ExitCode {
    dotenv::dotenv().ok();
    env_logger::init_from_env(Env::default().default_filter_or("info"));

    let args: Vec<String> = std::env::args().skip(1).collect();
    match run(&args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => {
            error!("Gave up waiting for results");
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("{}\n\n{}", e, USAGE);
            ExitCode::from(2)
        }
    }
}
