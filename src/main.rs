//! The rpkirtrd daemon.
//!
//! Startup wires the pieces together: configuration, the append-only log
//! file, the first ingest (which is the only fatal one), the TCP
//! listener, and the background tasks. Everything after that is driven by
//! the server and refresh modules.

use std::fs::OpenOptions;
use std::io;
use std::net::{Ipv6Addr, SocketAddr};
use std::process;
use clap::Parser;
use env_logger::Target;
use log::info;
use rand::Rng;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::mpsc;
use tokio::task::spawn;
use rpkirtrd::config::{Args, Config, ConfigError};
use rpkirtrd::payload::RoaSet;
use rpkirtrd::refresh;
use rpkirtrd::server::Server;
use rpkirtrd::server::notify::Registry;
use rpkirtrd::store::Cache;
use rpkirtrd::vrp::{Fetcher, IngestError};


//------------ StartupError --------------------------------------------------

#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("unable to open logfile: {0}")]
    Log(io::Error),

    #[error("unable to download initial ROAs: {0}")]
    Ingest(#[from] IngestError),

    #[error("unable to start server: {0}")]
    Listen(io::Error),
}


//------------ main ----------------------------------------------------------

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if let Err(err) = run(args).await {
        eprintln!("rpkirtrd: {}", err);
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), StartupError> {
    let config = Config::load(&args)?;
    init_logging(&config)?;
    info!("starting rpkirtrd");

    // The session id stays fixed for the process lifetime; a different
    // one after a restart tells routers their serials are void.
    let session = rand::thread_rng().gen::<u16>();

    let fetcher = Fetcher::new(config.urls.clone())?;
    info!(
        "downloading initial ROAs from {} source(s)", config.urls.len()
    );
    let set = RoaSet::from_raw(fetcher.fetch_all().await?);
    info!("initial set holds {} ROAs", set.len());
    let cache = Cache::new(session, set, config.timing);

    let listener = TcpListener::bind(
        SocketAddr::from((Ipv6Addr::UNSPECIFIED, config.port))
    ).await.map_err(StartupError::Listen)?;
    info!("listening on port {}", config.port);

    let registry = Registry::new();
    let (status_tx, status_rx) = mpsc::channel(16);
    spawn(refresh::run(
        cache.clone(),
        fetcher,
        registry.clone(),
        config.refresh_period,
        status_tx,
    ));
    spawn(refresh::run_status(
        cache.clone(), registry.clone(), status_rx
    ));

    let server = Server::new(listener, registry, cache);
    tokio::select! {
        _ = server.run() => {}
        _ = signal::ctrl_c() => {
            info!("shutting down");
        }
    }
    Ok(())
}

fn init_logging(config: &Config) -> Result<(), StartupError> {
    let logfile = OpenOptions::new()
        .append(true)
        .create(true)
        .open(&config.log_path)
        .map_err(StartupError::Log)?;
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info")
    ).target(Target::Pipe(Box::new(logfile))).init();
    Ok(())
}
