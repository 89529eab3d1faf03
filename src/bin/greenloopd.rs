//! GreenLoop ingestion daemon.
//!
//! Hosts the submission API and the leaderboard listing over a sqlite
//! store. Configuration comes from the JSON file named by
//! `GREENLOOP_CONFIG`, env overrides, then command-line flags.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use greenloop::api::ApiServer;
use greenloop::config::ServiceConfig;

#[derive(Parser, Debug)]
#[command(name = "greenloopd", about = "GreenLoop submission ingestion daemon")]
struct Args {
    /// Listen address, e.g. 127.0.0.1:5001
    #[arg(long)]
    addr: Option<String>,

    /// Path to the sqlite database
    #[arg(long)]
    db: Option<String>,

    /// Directory for uploaded media blobs
    #[arg(long)]
    media_dir: Option<String>,

    /// Where to write the generated demo token when no owners are configured
    #[arg(long)]
    token_path: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = ServiceConfig::load()?;
    if let Some(addr) = args.addr {
        cfg.api_addr = addr;
    }
    if let Some(db) = args.db {
        cfg.db_path = db;
    }
    if let Some(media_dir) = args.media_dir {
        cfg.media_dir = media_dir;
    }
    if let Some(token_path) = args.token_path {
        cfg.api_token_path = Some(token_path);
    }

    log::info!(
        "starting ingestion daemon: db={} media_dir={} addr={}",
        cfg.db_path,
        cfg.media_dir,
        cfg.api_addr
    );

    let handle = ApiServer::new(cfg).spawn()?;
    log::info!("submission api listening on {}", handle.addr);

    let running = Arc::new(AtomicBool::new(true));
    let running_handler = running.clone();
    ctrlc::set_handler(move || {
        running_handler.store(false, Ordering::SeqCst);
    })?;

    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(200));
    }

    log::info!("shutting down");
    handle.stop()?;
    Ok(())
}
