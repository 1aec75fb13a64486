//! Omnivox speech server entry point.
//!
//! Reads commands from stdin (and TCP when `OMNIVOX_LISTEN` is set), turns
//! them into engine calls, and plays the result on the default output device.
//!
//! ## Runtime note
//!
//! Engine calls block (synthesis, device open, `sync`). They run on
//! `spawn_blocking` threads so the Tokio executor stays free for I/O.

mod commands;
mod dispatch;
mod listener;
mod settings;

use std::sync::Arc;

use anyhow::Context;
use omnivox_core::{
    audio::device::{list_output_devices, pick_output},
    EngineStatus, StubSynthesizer, SynthHandle, VoxEngine,
};
use tokio::sync::{broadcast::error::RecvError, watch};
use tracing::{debug, info, warn};

use dispatch::{Dispatcher, Flow};
use settings::{load_settings, settings_path};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "omnivox=info,omnivox_core=info".into()),
        )
        .init();

    info!("Omnivox starting");

    let path = settings_path();
    let mut settings = load_settings(&path);
    settings.apply_env_overrides();
    info!(
        settings_path = ?path,
        sample_rate = settings.sample_rate,
        channels = settings.channels,
        queue_capacity = settings.queue_capacity,
        buffering = ?settings.buffering,
        listen = settings.listen,
        port = settings.port,
        "settings loaded"
    );

    let devices = list_output_devices();
    for device in &devices {
        debug!(name = device.name.as_str(), is_default = device.is_default, "output device");
    }
    match pick_output(&devices, settings.preferred_output_device.as_deref()) {
        Some(idx) => info!(device = devices[idx].name.as_str(), "output device selected"),
        None => warn!("no output devices enumerated"),
    }

    // ── Engine setup ──────────────────────────────────────────────────────
    let engine = Arc::new(VoxEngine::new(
        settings.engine_config(),
        SynthHandle::new(StubSynthesizer::new()),
    ));
    spawn_event_logging(&engine);

    {
        let engine = Arc::clone(&engine);
        let rate = settings.rate_wpm;
        tokio::task::spawn_blocking(move || -> omnivox_core::Result<()> {
            engine.warm_up()?;
            engine.set_rate(rate)?;
            engine.start()
        })
        .await?
        .context("failed to initialize audio output")?;
    }

    // ── Command sources ───────────────────────────────────────────────────
    let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&engine), settings.sync_timeout()));
    let (quit_tx, mut quit_rx) = watch::channel(false);
    let quit = Arc::new(quit_tx);

    if settings.listen {
        let (d, q) = (Arc::clone(&dispatcher), Arc::clone(&quit));
        let (address, port) = (settings.bind_address.clone(), settings.port);
        tokio::spawn(async move {
            if let Err(e) = listener::serve_tcp(&address, port, d, Arc::clone(&q)).await {
                tracing::error!("listen error: {e}");
                let _ = q.send(true);
            }
        });
    }

    let stdin_task = {
        let (d, q) = (Arc::clone(&dispatcher), Arc::clone(&quit));
        let keep_serving = settings.listen;
        tokio::spawn(async move {
            match listener::serve_stdin(d, Arc::clone(&q)).await {
                Ok(Flow::Continue) if keep_serving => info!("stdin closed; still serving TCP"),
                Ok(_) => {
                    let _ = q.send(true);
                }
                Err(e) => {
                    warn!("stdin read error: {e}");
                    let _ = q.send(true);
                }
            }
        })
    };

    info!("Omnivox initialized. Enter commands");

    tokio::select! {
        _ = quit_rx.wait_for(|quit| *quit) => info!("quit received"),
        _ = tokio::signal::ctrl_c() => info!("interrupted"),
    }
    stdin_task.abort();

    // ── Teardown ──────────────────────────────────────────────────────────
    let snapshot = engine.diagnostics_snapshot();
    info!(
        blocks = snapshot.blocks_rendered,
        underruns = snapshot.underruns,
        items_finished = snapshot.items_finished,
        items_rejected = snapshot.items_rejected,
        "playback diagnostics snapshot on exit"
    );
    tokio::task::spawn_blocking(move || {
        engine.stop();
        if let Err(e) = engine.shutdown() {
            warn!("shutdown: {e}");
        }
        engine.close();
    })
    .await?;

    info!("Omnivox exiting");
    Ok(())
}

/// Forward status changes and pipeline events into the log.
fn spawn_event_logging(engine: &VoxEngine) {
    let mut status_rx = engine.subscribe_status();
    tokio::spawn(async move {
        loop {
            match status_rx.recv().await {
                Ok(event) if event.status == EngineStatus::Error => {
                    tracing::error!(detail = ?event.detail, "engine error");
                }
                Ok(event) => info!(status = ?event.status, "engine status"),
                Err(RecvError::Lagged(n)) => warn!(missed = n, "status events lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut event_rx = engine.subscribe_events();
    tokio::spawn(async move {
        loop {
            match event_rx.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => debug!(event = json.as_str(), "pipeline event"),
                    Err(e) => warn!("failed to serialize pipeline event: {e}"),
                },
                Err(RecvError::Lagged(n)) => debug!(missed = n, "pipeline events lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });
}
