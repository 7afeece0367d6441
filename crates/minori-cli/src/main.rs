//! Daemon entry point: wires the player pollers, the browser ingress and
//! the presence engine together and tears everything down on CTRL+C.

mod ingress;

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::Parser;
use minori_api::MetadataClient;
use minori_core::config::DEFAULT_APPLICATION_ID;
use minori_core::{
    poll_source, ConfigWatcher, DiscordPresence, Reconciler, UpdateTimer, ViewingState,
};
use minori_players::{
    PlayerOptions, PlayerSource, DEFAULT_IPC_PATH, DEFAULT_MPC_PORT, DEFAULT_WEBUI_PORT,
};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const STATE_QUEUE_DEPTH: usize = 64;

#[derive(Parser, Debug)]
#[command(name = "minori", about = "Discord rich presence for local media players")]
struct Args {
    /// Players to poll (mpc, mpv, mpv-webui)
    #[arg(long, num_args = 0.., value_delimiter = ',', default_value = "mpc")]
    players: Vec<String>,

    /// Clear the presence while playback is paused
    #[arg(long)]
    clear_on_pause: bool,

    /// Re-push an unchanged presence every N seconds (0 disables)
    #[arg(long, value_name = "SECS", default_value_t = 0)]
    periodic_updates: u64,

    /// Look up per-episode titles on the metadata service
    #[arg(long)]
    fetch_episode_titles: bool,

    /// Do not accept states from browser extensions
    #[arg(long)]
    no_ingress: bool,

    /// Port the WebSocket ingress listens on
    #[arg(long, default_value_t = ingress::DEFAULT_PORT)]
    ingress_port: u16,

    /// Port of the MPC-HC web interface
    #[arg(long, default_value_t = DEFAULT_MPC_PORT)]
    mpc_port: u16,

    /// Path of the mpv JSON IPC socket
    #[arg(long, default_value = DEFAULT_IPC_PATH)]
    mpv_socket: PathBuf,

    /// Port of the simple-mpv-webui instance
    #[arg(long, default_value_t = DEFAULT_WEBUI_PORT)]
    mpv_webui_port: u16,

    /// Application id for ingress states that do not carry one
    #[arg(long, default_value_t = DEFAULT_APPLICATION_ID)]
    application_id: u64,

    /// Default log level (RUST_LOG overrides)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    if args.players.is_empty() && args.no_ingress {
        error!("Nothing's running. Exiting...");
        process::exit(1);
    }

    let options = PlayerOptions {
        mpc_port: args.mpc_port,
        mpv_socket: args.mpv_socket.clone(),
        mpv_webui_port: args.mpv_webui_port,
    };
    let mut sources = Vec::new();
    for name in &args.players {
        match PlayerSource::from_name(name, &options) {
            Some(source) => sources.push(source),
            None => {
                error!("Unknown player `{name}`, expected mpc, mpv or mpv-webui");
                process::exit(1);
            }
        }
    }

    let presence = DiscordPresence::spawn();
    let watcher = ConfigWatcher::spawn()?;
    let metadata = match MetadataClient::new() {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            warn!("Metadata client unavailable: {e}");
            None
        }
    };

    let (states_tx, states_rx) = mpsc::channel(STATE_QUEUE_DEPTH);
    let (status_tx, status_rx) = watch::channel(ViewingState::default());
    let cancel = CancellationToken::new();

    let mut tasks = Vec::new();
    for source in sources {
        tasks.push(tokio::spawn(poll_source(
            source,
            watcher.clone(),
            metadata.clone(),
            states_tx.clone(),
            cancel.clone(),
        )));
    }
    if !args.no_ingress {
        tasks.push(tokio::spawn(ingress::serve(
            args.ingress_port,
            args.application_id,
            states_tx.clone(),
            status_rx,
            cancel.clone(),
        )));
    }
    // The reconciler treats a closed queue as the end of input, so the
    // producers spawned above must hold the only senders left.
    drop(states_tx);

    let interrupted = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received CTRL+C");
        }
        interrupted.cancel();
    });

    info!("Waiting for activity feed updates...");
    info!("Press CTRL+C to exit");

    let reconciler = Reconciler::new(
        presence.clone(),
        args.clear_on_pause,
        UpdateTimer::from_secs(args.periodic_updates),
        metadata,
        args.fetch_episode_titles,
        status_tx,
    );
    let result = reconciler.run(states_rx, cancel.clone()).await;

    info!("Shutting down...");
    cancel.cancel();
    for task in tasks {
        let _ = task.await;
    }
    presence.shutdown();

    result?;
    Ok(())
}
