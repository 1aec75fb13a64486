//! `VoxEngine` — top-level lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! VoxEngine::new()
//!     └─► warm_up()          → synthesizer started, status = Starting → Idle
//!         └─► start()        → output open, reclaimer + monitor spawned, status = Running
//!             ├─► stop()     → queue cleared, ring flushed, device keeps running
//!             └─► shutdown() → callback completes, threads joined, status = Stopped
//! ```
//!
//! `start()`/`shutdown()` report misuse as errors rather than panicking;
//! `stop()` may be called any number of times.
//!
//! ## Threading
//!
//! `cpal::Stream` is `!Send` on Windows/macOS (COM / CoreAudio thread affinity).
//! `AudioOutput` is therefore created *inside* the device thread so it never
//! crosses a thread boundary. A sync oneshot channel propagates any open-device
//! errors back to the `start()` caller. The same thread then doubles as the
//! stream monitor.

pub mod monitor;

use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::{
    audio::{AudioOutput, OutputConfig},
    buffering::{ring_store, AudioItemQueue, ItemId, DEFAULT_QUEUE_CAPACITY, DEFAULT_RING_FRAMES},
    error::{Result, VoxError},
    ipc::events::{EngineStatus, EngineStatusEvent, PipelineEvent, PipelineEventKind},
    playback::{
        DiagnosticsSnapshot, FrameSource, PlaybackControl, PlaybackDiagnostics, QueuePlayback,
        StreamPlayback,
    },
    synthesis::{SynthHandle, SynthesisWorker, VoiceChannel, WorkerConfig},
};

/// Broadcast channel capacity: events buffered for slow consumers.
const BROADCAST_CAP: usize = 256;

/// Poll interval while `sync` waits for the sample ring to drain.
const SYNC_POLL: Duration = Duration::from_millis(5);

/// How synthesized audio reaches the device callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BufferingMode {
    /// Whole items on the bounded queue; full queue rejects.
    #[default]
    Queue,
    /// Samples streamed into the ring; full ring waits, then drops.
    Stream,
}

/// Configuration for `VoxEngine`.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Pipeline and device sample rate (Hz). Default: 11025.
    pub sample_rate: u32,
    /// Device channel count. Default: 2.
    pub channels: u16,
    /// Frames per device callback block. Default: 256.
    pub frames_per_buffer: u32,
    /// Items (pending + playing) the queue holds. Default: 5.
    pub queue_capacity: usize,
    pub buffering: BufferingMode,
    /// Ring slots in frames, one reserved. Only used in `Stream` mode.
    pub ring_capacity_frames: usize,
    /// How long a streaming write waits for ring space before dropping.
    pub stream_write_timeout: Duration,
    /// Channel that carries a mono voice on a stereo device. Default: Right.
    pub voice_channel: VoiceChannel,
    /// Write `output_N.wav` / `processed_N.wav` for every utterance.
    pub dump_dir: Option<PathBuf>,
    /// `None` selects the system default output.
    pub preferred_output_device: Option<String>,
    /// Period of the stream health check. Default: 5 s.
    pub monitor_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 11_025,
            channels: 2,
            frames_per_buffer: 256,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            buffering: BufferingMode::Queue,
            ring_capacity_frames: DEFAULT_RING_FRAMES,
            stream_write_timeout: Duration::from_secs(2),
            voice_channel: VoiceChannel::Right,
            dump_dir: None,
            preferred_output_device: None,
            monitor_interval: Duration::from_secs(5),
        }
    }
}

impl EngineConfig {
    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            sample_rate: self.sample_rate,
            channels: self.channels,
            voice_channel: self.voice_channel,
            dump_dir: self.dump_dir.clone(),
            stream_write_timeout: self.stream_write_timeout,
        }
    }

    pub fn output_config(&self) -> OutputConfig {
        OutputConfig {
            sample_rate: self.sample_rate,
            channels: self.channels,
            frames_per_buffer: self.frames_per_buffer,
            preferred_device: self.preferred_output_device.clone(),
        }
    }
}

/// The top-level engine handle.
///
/// `VoxEngine` is `Send + Sync` — all fields use interior mutability.
/// Wrap in `Arc<VoxEngine>` to share between the dispatcher tasks.
pub struct VoxEngine {
    config: EngineConfig,
    synth: SynthHandle,
    queue: Arc<AudioItemQueue>,
    worker: Arc<SynthesisWorker>,
    control: Arc<PlaybackControl>,
    diagnostics: Arc<PlaybackDiagnostics>,
    /// `true` while a playback source is attached.
    running: Arc<AtomicBool>,
    /// Canonical status (written atomically via Mutex, read from commands).
    status: Arc<Mutex<EngineStatus>>,
    status_tx: broadcast::Sender<EngineStatusEvent>,
    event_tx: broadcast::Sender<PipelineEvent>,
    /// Reclaimer and device threads of the current run.
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl VoxEngine {
    /// Create a new engine. Does not open the device — call `warm_up()` then `start()`.
    pub fn new(config: EngineConfig, synth: SynthHandle) -> Self {
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (event_tx, _) = broadcast::channel(BROADCAST_CAP);
        let queue = Arc::new(AudioItemQueue::new(config.queue_capacity));
        let diagnostics = Arc::new(PlaybackDiagnostics::default());
        let running = Arc::new(AtomicBool::new(false));
        let control = Arc::new(PlaybackControl::default());

        let worker = SynthesisWorker::new(
            synth.clone(),
            Arc::clone(&queue),
            Arc::clone(&diagnostics),
            config.worker_config(),
            event_tx.clone(),
            Arc::new(AtomicU64::new(0)),
        );
        let worker = match config.buffering {
            BufferingMode::Queue => worker,
            BufferingMode::Stream => worker.streaming(Arc::clone(&running), Arc::clone(&control)),
        };

        Self {
            config,
            synth,
            queue,
            worker: Arc::new(worker),
            control,
            diagnostics,
            running,
            status: Arc::new(Mutex::new(EngineStatus::Idle)),
            status_tx,
            event_tx,
            threads: Mutex::new(Vec::new()),
        }
    }

    /// Bring the synthesizer up.
    ///
    /// Call once at application startup, before `start()`.
    ///
    /// # Errors
    /// `VoxError::EngineInit` when the synthesizer cannot start.
    pub fn warm_up(&self) -> Result<()> {
        self.set_status(EngineStatus::Starting, None);
        info!("starting speech synthesizer");
        if let Err(e) = self.synth.0.lock().start() {
            let err = match e {
                VoxError::EngineInit(msg) => VoxError::EngineInit(msg),
                other => VoxError::EngineInit(other.to_string()),
            };
            self.set_status(EngineStatus::Error, Some(err.to_string()));
            return Err(err);
        }
        self.set_status(EngineStatus::Idle, None);
        info!("speech synthesizer ready");
        Ok(())
    }

    /// Open the output device and start playback.
    ///
    /// Blocks until the device is confirmed open (or fails), then returns.
    ///
    /// # Errors
    /// - `VoxError::AlreadyRunning` if already started.
    /// - `VoxError::NoDefaultOutputDevice` / `AudioDevice` / `AudioStream` on device error.
    pub fn start(&self) -> Result<()> {
        let source = self.attach_source()?;
        let output_config = self.config.output_config();
        let ctx = monitor::MonitorContext {
            running: Arc::clone(&self.running),
            control: Arc::clone(&self.control),
            diagnostics: Arc::clone(&self.diagnostics),
            status: Arc::clone(&self.status),
            status_tx: self.status_tx.clone(),
            interval: self.config.monitor_interval,
        };

        // Sync oneshot: device thread signals open success/failure to start().
        let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<String>>();

        let spawned = std::thread::Builder::new()
            .name("omnivox-output".into())
            .spawn(move || {
                // ── Open device (must happen on THIS thread — cpal::Stream is !Send) ──
                let output = match AudioOutput::open(&output_config, source)
                    .and_then(|o| o.start().map(|()| o))
                {
                    Ok(o) => {
                        let _ = open_tx.send(Ok(o.device_name.clone()));
                        o
                    }
                    Err(e) => {
                        let _ = open_tx.send(Err(e));
                        return;
                    }
                };

                monitor::watch_stream(&output, &ctx);

                if let Err(e) = output.stop() {
                    warn!("failed to pause output stream: {e}");
                }
                // Stream drops here, releasing the device on this thread.
                drop(output);
            });

        let handle = match spawned {
            Ok(h) => h,
            Err(e) => {
                self.abort_start();
                return Err(VoxError::Io(e));
            }
        };
        self.threads.lock().push(handle);

        match open_rx.recv() {
            Ok(Ok(device)) => {
                self.set_status(EngineStatus::Running, None);
                info!(device = device.as_str(), "engine started — output running");
                Ok(())
            }
            Ok(Err(e)) => {
                self.abort_start();
                self.set_status(EngineStatus::Error, Some(e.to_string()));
                Err(e)
            }
            Err(_) => {
                // Channel closed before a message was sent — device thread panicked?
                self.abort_start();
                self.set_status(EngineStatus::Error, Some("output failed to start".into()));
                Err(VoxError::Other(anyhow::anyhow!(
                    "output thread died unexpectedly"
                )))
            }
        }
    }

    /// Prepare a fresh playback source and spawn the reclaimer, without
    /// opening a device. `start()` hands the source to `AudioOutput`; tests
    /// and custom hosts drive `FrameSource::render` themselves.
    ///
    /// # Errors
    /// `VoxError::AlreadyRunning` if a source is already attached.
    pub fn attach_source(&self) -> Result<Box<dyn FrameSource>> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(VoxError::AlreadyRunning);
        }
        self.control.reset();
        self.diagnostics.reset();

        let source: Box<dyn FrameSource> = match self.config.buffering {
            BufferingMode::Queue => Box::new(QueuePlayback::new(
                Arc::clone(&self.queue),
                Arc::clone(&self.control),
                Arc::clone(&self.diagnostics),
                self.config.channels,
            )),
            BufferingMode::Stream => {
                let (writer, reader) =
                    ring_store(self.config.ring_capacity_frames, self.config.channels);
                self.worker.attach_ring(writer);
                Box::new(StreamPlayback::new(
                    reader,
                    Arc::clone(&self.control),
                    Arc::clone(&self.diagnostics),
                ))
            }
        };

        let queue = Arc::clone(&self.queue);
        let worker = Arc::clone(&self.worker);
        let running = Arc::clone(&self.running);
        let spawned = std::thread::Builder::new()
            .name("omnivox-reclaim".into())
            .spawn(move || monitor::run_reclaimer(&queue, &worker, &running));
        match spawned {
            Ok(handle) => self.threads.lock().push(handle),
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(VoxError::Io(e));
            }
        }

        info!(mode = ?self.config.buffering, "playback source attached");
        Ok(source)
    }

    /// Stop speech: drop everything queued, silence the current item, flush
    /// the ring. The device stream keeps running. Idempotent; returns how
    /// many queued or playing items were discarded.
    pub fn stop(&self) -> usize {
        let discarded = self.queue.clear();
        self.control.request_flush();
        self.worker
            .emit(PipelineEventKind::Cleared { discarded });
        info!(discarded, "speech stopped");
        discarded
    }

    /// Tear playback down: the callback completes, the device closes, the
    /// background threads are joined.
    ///
    /// # Errors
    /// `VoxError::NotRunning` if no source is attached.
    pub fn shutdown(&self) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(VoxError::NotRunning);
        }
        self.control.request_shutdown();
        self.running.store(false, Ordering::SeqCst);

        let handles: Vec<_> = self.threads.lock().drain(..).collect();
        for handle in handles {
            if handle.join().is_err() {
                warn!("pipeline thread panicked during shutdown");
            }
        }
        self.queue.clear();
        self.queue.reclaim();

        self.set_status(EngineStatus::Stopped, None);
        info!("engine shut down");
        Ok(())
    }

    /// Release the synthesizer. Call after `shutdown()` when exiting.
    pub fn close(&self) {
        self.synth.0.lock().shutdown();
    }

    // ── Requests ─────────────────────────────────────────────────────────────

    /// Synthesize `text` and queue it for playback.
    ///
    /// # Errors
    /// `QueueFull`, `EmptyUtterance`, or the synthesizer's own error. The
    /// request is dropped either way; nothing is retried.
    pub fn submit_text(&self, text: &str) -> Result<ItemId> {
        self.worker.submit_text(text)
    }

    /// Speak the first non-blank character of `text` on its own.
    pub fn submit_letter(&self, text: &str) -> Result<ItemId> {
        let letter = text
            .chars()
            .find(|c| !c.is_whitespace())
            .ok_or(VoxError::EmptyUtterance)?;
        self.worker.submit_text(letter.encode_utf8(&mut [0u8; 4]))
    }

    pub fn submit_tone(&self, frequency: f32, duration_ms: u32) -> Result<ItemId> {
        self.worker.submit_tone(frequency, duration_ms)
    }

    pub fn submit_silence(&self, duration_ms: u32) -> Result<ItemId> {
        self.worker.submit_silence(duration_ms)
    }

    /// Queue a WAV file for playback.
    pub fn submit_file(&self, path: &Path) -> Result<ItemId> {
        self.worker.submit_file(path)
    }

    pub fn set_rate(&self, words_per_minute: u32) -> Result<()> {
        self.worker.set_rate(words_per_minute)?;
        info!(words_per_minute, "speaking rate changed");
        Ok(())
    }

    /// Block until everything submitted so far has played.
    ///
    /// # Errors
    /// `VoxError::Timeout` when audio is still pending after `timeout`.
    pub fn sync(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        if !self.queue.wait_until_idle(timeout) {
            return Err(VoxError::Timeout);
        }
        while !self.worker.stream_drained() {
            if Instant::now() >= deadline {
                return Err(VoxError::Timeout);
            }
            std::thread::sleep(SYNC_POLL);
        }
        Ok(())
    }

    // ── Observation ──────────────────────────────────────────────────────────

    /// Current engine status (snapshot).
    pub fn status(&self) -> EngineStatus {
        *self.status.lock()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn queue(&self) -> &Arc<AudioItemQueue> {
        &self.queue
    }

    /// Subscribe to live status change events.
    pub fn subscribe_status(&self) -> broadcast::Receiver<EngineStatusEvent> {
        self.status_tx.subscribe()
    }

    /// Subscribe to queued / rejected / finished / cleared events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<PipelineEvent> {
        self.event_tx.subscribe()
    }

    /// Snapshot of playback counters for observability.
    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    // ── Internal helpers ─────────────────────────────────────────────────────

    fn abort_start(&self) {
        self.control.request_shutdown();
        self.running.store(false, Ordering::SeqCst);
        let handles: Vec<_> = self.threads.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
    }

    fn set_status(&self, new_status: EngineStatus, detail: Option<String>) {
        *self.status.lock() = new_status;
        let _ = self.status_tx.send(EngineStatusEvent {
            status: new_status,
            detail,
        });
    }
}

impl Drop for VoxEngine {
    fn drop(&mut self) {
        if self.running.load(Ordering::SeqCst) {
            let _ = self.shutdown();
        }
    }
}
