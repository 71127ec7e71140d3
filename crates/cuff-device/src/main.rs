//! # cuff-device
//!
//! Firmware entry point for the cuff.
//!
//! This binary provides:
//! - The detection/command poll loop
//! - A TCP link speaking the framed device protocol
//! - Structured logging to file and stdout
//!
//! ## Running
//!
//! ```bash
//! # Development, test mode on
//! CUFF_TEST_MODE=true cargo run --package cuff-device
//!
//! # Production
//! CUFF_ENV=production ./cuff-device
//! ```
//!
//! `CUFF_CONFIG` points at the TOML config file, `CUFF_DATA_DIR` at the
//! settings directory and `CUFF_LINK_ADDR` overrides the listen address.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::time::{Duration, Instant};

use anyhow::Context;
use cuff_device::{
    build_controller, logging, serve, DeviceOptions, FrameSink, Runtime, TickOutcome,
    OUTBOUND_QUEUE_LEN,
};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let options = DeviceOptions::from_env();
    logging::init(options.is_production)?;

    info!(version = env!("CARGO_PKG_VERSION"), "starting cuff-device");

    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_LEN);
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

    let controller = build_controller(&options, FrameSink::new(outbound_tx))?;
    let mut runtime = Runtime::new(controller, inbound_rx);

    let listener = TcpListener::bind(&options.link_addr)
        .await
        .with_context(|| format!("binding {}", options.link_addr))?;
    info!("link listening on {}", options.link_addr);

    tokio::spawn(async move {
        if let Err(e) = serve(listener, inbound_tx, outbound_rx).await {
            error!(error = %e, "link stopped");
        }
    });

    let started = Instant::now();
    let mut interval = tokio::time::interval(Duration::from_millis(cuff_device::TICK_INTERVAL_MS));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let now_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                if let TickOutcome::Restart(reason) = runtime.tick(now_ms) {
                    info!(reason = %reason, "restarting");
                    break;
                }
            }
            _ = &mut shutdown => {
                info!("shutting down");
                break;
            }
        }
    }

    Ok(())
}
