//! Background loops that keep the real-time callback's promises for it.
//!
//! - `run_reclaimer` drops items the callback retired and wakes producers
//!   waiting for space or for `sync`.
//! - `watch_stream` runs on the device thread after the output opens: it
//!   checks `is_active()` every interval and logs diagnostics and underrun
//!   growth, since the callback itself never logs.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::{
    audio::AudioOutput,
    buffering::AudioItemQueue,
    ipc::events::{EngineStatus, EngineStatusEvent, PipelineEventKind},
    playback::{PlaybackControl, PlaybackDiagnostics},
    synthesis::SynthesisWorker,
};

/// Longest the reclaimer blocks before re-checking the running flag.
const RECLAIM_POLL: Duration = Duration::from_millis(50);

/// Sleep granularity of the monitor, so shutdown is noticed promptly.
const MONITOR_SLICE: Duration = Duration::from_millis(50);

/// Drop retired items until `running` clears, then drain what is left.
pub fn run_reclaimer(queue: &AudioItemQueue, worker: &SynthesisWorker, running: &AtomicBool) {
    debug!("reclaimer started");
    while running.load(Ordering::Acquire) {
        if let Some(id) = queue.reclaim_one(RECLAIM_POLL) {
            debug!(%id, "audio item reclaimed");
            worker.emit(PipelineEventKind::Finished { id });
        }
    }
    for id in queue.reclaim() {
        worker.emit(PipelineEventKind::Finished { id });
    }
    debug!("reclaimer exited");
}

/// Everything `watch_stream` needs, passed as one struct so the closure stays tidy.
pub struct MonitorContext {
    pub running: Arc<AtomicBool>,
    pub control: Arc<PlaybackControl>,
    pub diagnostics: Arc<PlaybackDiagnostics>,
    pub status: Arc<Mutex<EngineStatus>>,
    pub status_tx: broadcast::Sender<EngineStatusEvent>,
    pub interval: Duration,
}

/// Block until shutdown or until the stream dies.
pub fn watch_stream(output: &AudioOutput, ctx: &MonitorContext) {
    let mut last_underruns = 0usize;
    let mut next_check = Instant::now() + ctx.interval;

    while ctx.running.load(Ordering::Acquire) && !ctx.control.is_shutdown() {
        std::thread::sleep(MONITOR_SLICE);
        if Instant::now() < next_check {
            continue;
        }
        next_check += ctx.interval;

        if !output.is_active() {
            error!(device = output.device_name.as_str(), "output stream is no longer active");
            *ctx.status.lock() = EngineStatus::Error;
            let _ = ctx.status_tx.send(EngineStatusEvent {
                status: EngineStatus::Error,
                detail: Some("output stream stopped unexpectedly".into()),
            });
            return;
        }

        let snap = ctx.diagnostics.snapshot();
        if snap.underruns > last_underruns {
            warn!(
                new = snap.underruns - last_underruns,
                total = snap.underruns,
                "playback underruns"
            );
        }
        last_underruns = snap.underruns;

        debug!(
            blocks = snap.blocks_rendered,
            frames = snap.frames_emitted,
            silent = snap.silent_blocks,
            started = snap.items_started,
            finished = snap.items_finished,
            rejected = snap.items_rejected,
            dropped = snap.stream_frames_dropped,
            "playback diagnostics"
        );
    }
    info!("stream monitor exiting");
}
