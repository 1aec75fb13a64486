//! Producer side of the pipeline.
//!
//! ## Stages (per request)
//!
//! ```text
//! 1. SpeechSynthesizer::synthesize (blocking, under the engine lock)
//! 2. Empty output → EmptyUtterance
//! 3. Resample to the pipeline rate (rubato, only when rates differ)
//! 4. Upmix / downmix to the device channel count
//! 5. Package as an AudioItem (Processed)
//! 6. Queue mode:  try_enqueue, full → QueueFull
//!    Stream mode: write into the sample ring, wait then drop on overflow
//! ```
//!
//! Errors are returned to the caller. Nothing here retries.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::{tone, SynthHandle, SynthesizedAudio};
use crate::{
    audio::{resample::RateConverter, wav},
    buffering::{AudioItem, AudioItemQueue, ItemId, RingWriter},
    error::{Result, VoxError},
    ipc::events::{PipelineEvent, PipelineEventKind, RejectReason},
    playback::{bump, PlaybackControl, PlaybackDiagnostics},
};

/// Which output channel carries a mono voice when the device is stereo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceChannel {
    Left,
    /// Left stays silent, voice on the right.
    #[default]
    Right,
    /// Duplicate the voice onto both channels.
    Both,
}

/// Output format and post-processing policy for the worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Pipeline / device sample rate (Hz).
    pub sample_rate: u32,
    /// Device channel count (1 or 2).
    pub channels: u16,
    pub voice_channel: VoiceChannel,
    /// When set, raw and processed audio of every utterance is written here.
    pub dump_dir: Option<PathBuf>,
    /// How long a streaming write may wait for ring space before dropping.
    pub stream_write_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            sample_rate: 11_025,
            channels: 2,
            voice_channel: VoiceChannel::Right,
            dump_dir: None,
            stream_write_timeout: Duration::from_secs(2),
        }
    }
}

/// Convert interleaved `samples` with `source_channels` to `target_channels`.
///
/// Mono → stereo places the voice per `voice`; the other channel is zero.
/// Stereo → mono averages. Equal counts are returned unchanged.
pub fn remix_channels(
    samples: &[f32],
    source_channels: u16,
    target_channels: u16,
    voice: VoiceChannel,
) -> Result<Vec<f32>> {
    match (source_channels, target_channels) {
        (s, t) if s == t => Ok(samples.to_vec()),
        (1, 2) => {
            let mut out = Vec::with_capacity(samples.len() * 2);
            for &s in samples {
                let (left, right) = match voice {
                    VoiceChannel::Left => (s, 0.0),
                    VoiceChannel::Right => (0.0, s),
                    VoiceChannel::Both => (s, s),
                };
                out.push(left);
                out.push(right);
            }
            Ok(out)
        }
        (s, 1) if s > 1 => {
            let ch = s as usize;
            Ok(samples
                .chunks_exact(ch)
                .map(|frame| frame.iter().sum::<f32>() / ch as f32)
                .collect())
        }
        (s, t) => Err(VoxError::InvalidFormat(format!(
            "cannot remix {s} channels to {t}"
        ))),
    }
}

/// Where packaged items go.
enum Sink {
    Queue,
    Stream {
        writer: Mutex<Option<RingWriter>>,
        running: Arc<AtomicBool>,
        /// Its flush generation moves on `stop()`; a write in flight gives up.
        control: Arc<PlaybackControl>,
    },
}

pub struct SynthesisWorker {
    synth: SynthHandle,
    queue: Arc<AudioItemQueue>,
    diagnostics: Arc<PlaybackDiagnostics>,
    config: WorkerConfig,
    sink: Sink,
    event_tx: broadcast::Sender<PipelineEvent>,
    seq: Arc<AtomicU64>,
}

impl SynthesisWorker {
    /// Worker that enqueues whole items on `queue`.
    pub fn new(
        synth: SynthHandle,
        queue: Arc<AudioItemQueue>,
        diagnostics: Arc<PlaybackDiagnostics>,
        config: WorkerConfig,
        event_tx: broadcast::Sender<PipelineEvent>,
        seq: Arc<AtomicU64>,
    ) -> Self {
        Self {
            synth,
            queue,
            diagnostics,
            config,
            sink: Sink::Queue,
            event_tx,
            seq,
        }
    }

    /// Switch to streaming mode: items are written into a sample ring whose
    /// writer is installed later with [`attach_ring`](Self::attach_ring).
    ///
    /// Writes give up when `running` clears or `control`'s flush generation
    /// changes under them.
    pub fn streaming(mut self, running: Arc<AtomicBool>, control: Arc<PlaybackControl>) -> Self {
        self.sink = Sink::Stream {
            writer: Mutex::new(None),
            running,
            control,
        };
        self
    }

    /// Install (or replace) the ring writer used in streaming mode.
    pub fn attach_ring(&self, writer: RingWriter) {
        if let Sink::Stream { writer: slot, .. } = &self.sink {
            *slot.lock() = Some(writer);
        }
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.sink, Sink::Stream { .. })
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// `true` once the ring holds no unplayed frames (always `true` in queue mode).
    pub fn stream_drained(&self) -> bool {
        match &self.sink {
            Sink::Queue => true,
            Sink::Stream { writer: slot, .. } => slot
                .lock()
                .as_ref()
                .map(|w| w.vacant_frames() + 1 >= w.capacity_frames())
                .unwrap_or(true),
        }
    }

    /// Synthesize and post-process `text` into a Processed item without
    /// submitting it.
    pub fn synthesize(&self, text: &str) -> Result<AudioItem> {
        let text = text.trim();
        if text.is_empty() {
            return Err(VoxError::EmptyUtterance);
        }

        let raw = {
            let mut synth = self.synth.0.lock();
            synth.synthesize(text)
        }
        .inspect_err(|_| bump(&self.diagnostics.synthesis_errors, 1))?;

        if raw.is_empty() {
            return Err(VoxError::EmptyUtterance);
        }

        let id = self.queue.next_item_id();
        if let Some(dir) = &self.config.dump_dir {
            self.dump(dir, &format!("output_{}.wav", id.0), &raw.samples, raw.channels, raw.sample_rate);
        }

        let item = self.package(id, raw)?;
        if let Some(dir) = &self.config.dump_dir {
            self.dump(
                dir,
                &format!("processed_{}.wav", id.0),
                item.samples(),
                item.channels(),
                item.sample_rate(),
            );
        }
        debug!(
            %id,
            frames = item.frame_count(),
            secs = format_args!("{:.2}", item.duration_secs()),
            "utterance synthesized"
        );
        Ok(item)
    }

    /// Resample + remix raw audio into a Processed item at the pipeline format.
    pub fn package(&self, id: ItemId, raw: SynthesizedAudio) -> Result<AudioItem> {
        let resampled = if raw.sample_rate == self.config.sample_rate {
            raw.samples
        } else {
            RateConverter::new(raw.sample_rate, self.config.sample_rate, raw.channels)?
                .convert(&raw.samples)?
        };
        let samples = remix_channels(
            &resampled,
            raw.channels,
            self.config.channels,
            self.config.voice_channel,
        )?;
        let mut item = AudioItem::new(id, samples, self.config.channels, self.config.sample_rate);
        item.mark_processed();
        Ok(item)
    }

    /// Synthesize `text` and hand it to playback.
    pub fn submit_text(&self, text: &str) -> Result<ItemId> {
        let item = match self.synthesize(text) {
            Ok(item) => item,
            Err(e) => {
                self.emit(PipelineEventKind::Rejected {
                    id: None,
                    reason: RejectReason::from(&e),
                });
                return Err(e);
            }
        };
        self.submit_item(item)
    }

    /// Sine beep on every channel.
    pub fn submit_tone(&self, frequency: f32, duration_ms: u32) -> Result<ItemId> {
        self.check_request(tone::validate_tone(frequency, duration_ms))?;
        let samples = tone::generate_tone(
            frequency,
            duration_ms,
            self.config.sample_rate,
            self.config.channels,
        );
        self.submit_samples(samples)
    }

    /// A gap of digital silence that occupies a queue slot like speech does.
    pub fn submit_silence(&self, duration_ms: u32) -> Result<ItemId> {
        self.check_request(tone::validate_duration(duration_ms))?;
        let samples =
            tone::generate_silence(duration_ms, self.config.sample_rate, self.config.channels);
        self.submit_samples(samples)
    }

    /// Decode a WAV file and play it through the same post-processing.
    pub fn submit_file(&self, path: &Path) -> Result<ItemId> {
        let raw = wav::read_wav(path)?;
        if raw.is_empty() {
            return Err(VoxError::EmptyUtterance);
        }
        let item = self.package(self.queue.next_item_id(), raw)?;
        self.submit_item(item)
    }

    fn check_request(&self, verdict: Result<()>) -> Result<()> {
        verdict.inspect_err(|e| {
            warn!("{e}");
            self.emit(PipelineEventKind::Rejected {
                id: None,
                reason: RejectReason::from(e),
            });
        })
    }

    fn submit_samples(&self, samples: Vec<f32>) -> Result<ItemId> {
        let mut item = AudioItem::new(
            self.queue.next_item_id(),
            samples,
            self.config.channels,
            self.config.sample_rate,
        );
        item.mark_processed();
        self.submit_item(item)
    }

    /// Hand a Processed item to the configured sink.
    pub fn submit_item(&self, item: AudioItem) -> Result<ItemId> {
        // Free whatever the callback has retired before competing for a slot.
        for finished in self.queue.reclaim() {
            self.emit(PipelineEventKind::Finished { id: finished });
        }

        let id = item.id();
        let frames = item.frame_count();
        match &self.sink {
            Sink::Queue => {
                if let Err(item) = self.queue.try_enqueue(item) {
                    bump(&self.diagnostics.items_rejected, 1);
                    warn!(id = %item.id(), capacity = self.queue.capacity(), "audio queue full, rejecting item");
                    self.emit(PipelineEventKind::Rejected {
                        id: Some(item.id()),
                        reason: RejectReason::QueueFull,
                    });
                    return Err(VoxError::QueueFull);
                }
            }
            Sink::Stream {
                writer: slot,
                running,
                control,
            } => {
                // Taken before the writer lock: a stop() while another item
                // is still being written also cancels this one.
                let generation = control.flush_generation();
                let mut guard = slot.lock();
                let Some(writer) = guard.as_mut() else {
                    return Err(VoxError::NotRunning);
                };
                let written = writer.write_blocking(
                    item.samples(),
                    self.config.stream_write_timeout,
                    || running.load(Ordering::Relaxed) && control.flush_generation() == generation,
                );
                if control.flush_generation() != generation {
                    // The callback may already have flushed before our last
                    // push landed; flush again while we still hold the writer.
                    control.request_flush();
                    debug!(%id, written, frames, "stream write cut short by stop");
                } else if written < frames {
                    bump(&self.diagnostics.stream_frames_dropped, frames - written);
                }
                drop(guard);

                bump(&self.diagnostics.items_enqueued, 1);
                debug!(%id, frames, "audio item streamed");
                self.emit(PipelineEventKind::Queued { id, frames });
                // Samples now live in the ring; the item itself is retired.
                drop(item);
                self.emit(PipelineEventKind::Finished { id });
                return Ok(id);
            }
        }

        bump(&self.diagnostics.items_enqueued, 1);
        debug!(%id, frames, "audio item queued");
        self.emit(PipelineEventKind::Queued { id, frames });
        Ok(id)
    }

    /// Forward a rate change to the engine.
    pub fn set_rate(&self, words_per_minute: u32) -> Result<()> {
        self.synth.0.lock().set_rate(words_per_minute)
    }

    pub(crate) fn emit(&self, kind: PipelineEventKind) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let _ = self.event_tx.send(PipelineEvent { seq, kind });
    }

    fn dump(&self, dir: &Path, name: &str, samples: &[f32], channels: u16, sample_rate: u32) {
        let path = dir.join(name);
        match wav::write_wav(&path, samples, channels, sample_rate) {
            Ok(()) => debug!(path = %path.display(), "wrote audio dump"),
            Err(e) => warn!(path = %path.display(), error = %e, "failed to write audio dump"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffering::ItemState;
    use crate::synthesis::{SpeechSynthesizer, StubSynthesizer};

    fn worker(capacity: usize, config: WorkerConfig) -> (SynthesisWorker, Arc<AudioItemQueue>) {
        let mut stub = StubSynthesizer::new();
        stub.start().unwrap();
        let queue = Arc::new(AudioItemQueue::new(capacity));
        let (event_tx, _) = broadcast::channel(16);
        let w = SynthesisWorker::new(
            SynthHandle::new(stub),
            Arc::clone(&queue),
            Arc::new(PlaybackDiagnostics::default()),
            config,
            event_tx,
            Arc::new(AtomicU64::new(0)),
        );
        (w, queue)
    }

    #[test]
    fn mono_upmix_keeps_frame_count_and_voice() {
        let mono: Vec<f32> = (0..50).map(|i| (i as f32 * 0.1).sin()).collect();
        let stereo = remix_channels(&mono, 1, 2, VoiceChannel::Right).unwrap();
        assert_eq!(stereo.len(), mono.len() * 2);
        for (frame, src) in stereo.chunks_exact(2).zip(&mono) {
            assert_eq!(frame[0], 0.0, "left channel must be silent");
            assert_eq!(frame[1], *src);
        }
    }

    #[test]
    fn left_voice_and_duplicate_policies() {
        let left = remix_channels(&[0.5], 1, 2, VoiceChannel::Left).unwrap();
        assert_eq!(left, vec![0.5, 0.0]);
        let both = remix_channels(&[0.5], 1, 2, VoiceChannel::Both).unwrap();
        assert_eq!(both, vec![0.5, 0.5]);
    }

    #[test]
    fn stereo_downmix_averages() {
        let mono = remix_channels(&[0.2, 0.4, -1.0, 1.0], 2, 1, VoiceChannel::Right).unwrap();
        assert_eq!(mono.len(), 2);
        assert!((mono[0] - 0.3).abs() < 1e-6);
        assert_eq!(mono[1], 0.0);
    }

    #[test]
    fn unsupported_remix_is_rejected() {
        assert!(remix_channels(&[0.0; 6], 2, 3, VoiceChannel::Right).is_err());
    }

    #[test]
    fn synthesized_item_is_processed_stereo() {
        let (w, _q) = worker(5, WorkerConfig::default());
        let item = w.synthesize("hello there").unwrap();
        assert_eq!(item.state(), ItemState::Processed);
        assert_eq!(item.channels(), 2);
        assert!(item.frame_count() > 0);
        assert!(item.samples().chunks_exact(2).all(|f| f[0] == 0.0));
    }

    #[test]
    fn blank_text_is_an_empty_utterance() {
        let (w, q) = worker(5, WorkerConfig::default());
        assert!(matches!(w.submit_text("  \t "), Err(VoxError::EmptyUtterance)));
        assert!(q.is_empty());
    }

    #[test]
    fn full_queue_rejects_with_queue_full() {
        let (w, q) = worker(2, WorkerConfig::default());
        w.submit_text("one").unwrap();
        w.submit_text("two").unwrap();
        assert!(matches!(w.submit_text("three"), Err(VoxError::QueueFull)));
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn synthesis_errors_propagate_without_retry() {
        let queue = Arc::new(AudioItemQueue::new(5));
        let (event_tx, mut event_rx) = broadcast::channel(16);
        let diag = Arc::new(PlaybackDiagnostics::default());
        // Never started → every call fails.
        let w = SynthesisWorker::new(
            SynthHandle::new(StubSynthesizer::new()),
            Arc::clone(&queue),
            Arc::clone(&diag),
            WorkerConfig::default(),
            event_tx,
            Arc::new(AtomicU64::new(0)),
        );
        assert!(matches!(w.submit_text("hi"), Err(VoxError::EngineNotStarted)));
        assert_eq!(diag.snapshot().synthesis_errors, 1);
        let event = event_rx.try_recv().expect("rejection event");
        assert!(matches!(event.kind, PipelineEventKind::Rejected { id: None, .. }));
    }

    #[test]
    fn resamples_to_pipeline_rate() {
        let config = WorkerConfig {
            sample_rate: 44_100,
            ..WorkerConfig::default()
        };
        let (w, _q) = worker(5, config);
        let raw = SynthesizedAudio::mono(vec![0.1; 1_000], 11_025);
        let item = w.package(ItemId(0), raw).unwrap();
        assert_eq!(item.sample_rate(), 44_100);
        assert_eq!(item.frame_count(), 4_000);
    }

    #[test]
    fn tone_and_silence_items_use_device_format() {
        let (w, q) = worker(5, WorkerConfig::default());
        w.submit_tone(440.0, 100).unwrap();
        w.submit_silence(50).unwrap();
        assert_eq!(q.len(), 2);
        let head = q.peek_head().unwrap();
        assert_eq!(head.channels, 2);
        assert_eq!(head.frame_count, 1_102);
    }

    #[test]
    fn unbounded_tone_and_silence_are_refused_before_allocating() {
        let (w, q) = worker(5, WorkerConfig::default());
        assert!(matches!(
            w.submit_tone(440.0, u32::MAX),
            Err(VoxError::InvalidRequest(_))
        ));
        assert!(matches!(
            w.submit_tone(f32::INFINITY, 100),
            Err(VoxError::InvalidRequest(_))
        ));
        assert!(matches!(
            w.submit_silence(u32::MAX),
            Err(VoxError::InvalidRequest(_))
        ));
        assert!(q.is_empty());
    }

    #[test]
    fn streaming_writes_into_ring() {
        let running = Arc::new(AtomicBool::new(true));
        let (w, q) = worker(5, WorkerConfig::default());
        let w = w.streaming(Arc::clone(&running), Arc::new(PlaybackControl::default()));
        assert!(matches!(w.submit_silence(10), Err(VoxError::NotRunning)));

        let (writer, reader) = crate::buffering::ring_store(4_096, 2);
        w.attach_ring(writer);
        w.submit_tone(440.0, 100).unwrap();
        assert_eq!(reader.occupied_frames(), 1_102);
        assert!(q.is_empty());
        assert!(!w.stream_drained());
    }

    struct Streaming {
        worker: Arc<SynthesisWorker>,
        reader: crate::buffering::RingReader,
        control: Arc<PlaybackControl>,
        diagnostics: Arc<PlaybackDiagnostics>,
        events: broadcast::Receiver<PipelineEvent>,
    }

    fn streaming_worker(ring_frames: usize, write_timeout: Duration) -> Streaming {
        let mut stub = StubSynthesizer::new();
        stub.start().unwrap();
        let (event_tx, events) = broadcast::channel(16);
        let diagnostics = Arc::new(PlaybackDiagnostics::default());
        let control = Arc::new(PlaybackControl::default());
        let config = WorkerConfig {
            stream_write_timeout: write_timeout,
            ..WorkerConfig::default()
        };
        let w = SynthesisWorker::new(
            SynthHandle::new(stub),
            Arc::new(AudioItemQueue::new(5)),
            Arc::clone(&diagnostics),
            config,
            event_tx,
            Arc::new(AtomicU64::new(0)),
        )
        .streaming(Arc::new(AtomicBool::new(true)), Arc::clone(&control));
        let (writer, reader) = crate::buffering::ring_store(ring_frames, 2);
        w.attach_ring(writer);
        Streaming {
            worker: Arc::new(w),
            reader,
            control,
            diagnostics,
            events,
        }
    }

    #[test]
    fn streamed_item_is_queued_then_finished() {
        let mut s = streaming_worker(4_096, Duration::from_secs(1));
        let id = s.worker.submit_silence(20).unwrap();
        let queued = s.events.try_recv().unwrap();
        assert!(matches!(queued.kind, PipelineEventKind::Queued { id: q, .. } if q == id));
        let finished = s.events.try_recv().unwrap();
        assert_eq!(finished.kind, PipelineEventKind::Finished { id });
        assert!(finished.seq > queued.seq);
    }

    #[test]
    fn full_ring_drops_the_remainder_after_the_timeout() {
        let s = streaming_worker(1_024, Duration::from_millis(20));
        // 100 ms at 11025 Hz is 1102 frames; 1023 fit.
        s.worker.submit_tone(440.0, 100).unwrap();
        assert_eq!(s.reader.occupied_frames(), 1_023);
        assert_eq!(s.diagnostics.snapshot().stream_frames_dropped, 79);
    }

    #[test]
    fn flush_abandons_a_write_in_flight() {
        let s = streaming_worker(256, Duration::from_secs(10));
        let producer = {
            let w = Arc::clone(&s.worker);
            std::thread::spawn(move || w.submit_tone(440.0, 1_000))
        };
        std::thread::sleep(Duration::from_millis(30));
        let before = s.control.flush_generation();
        s.control.request_flush();

        let started = std::time::Instant::now();
        let result = producer.join().expect("producer panicked");
        assert!(result.is_ok());
        assert!(started.elapsed() < Duration::from_secs(2), "writer kept waiting");
        // The writer flushed again on its way out.
        assert_eq!(s.control.flush_generation(), before + 2);
        assert_eq!(s.diagnostics.snapshot().stream_frames_dropped, 0);
    }

    #[test]
    fn dumps_raw_and_processed_audio() {
        let dir = std::env::temp_dir().join(format!("omnivox-dump-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let config = WorkerConfig {
            dump_dir: Some(dir.clone()),
            ..WorkerConfig::default()
        };
        let (w, _q) = worker(5, config);
        let item = w.synthesize("dump me").unwrap();
        let raw = wav::read_wav(&dir.join(format!("output_{}.wav", item.id().0))).unwrap();
        let processed = wav::read_wav(&dir.join(format!("processed_{}.wav", item.id().0))).unwrap();
        std::fs::remove_dir_all(&dir).ok();
        assert_eq!(raw.channels, 1);
        assert_eq!(processed.channels, 2);
        assert_eq!(processed.frame_count, raw.frame_count);
    }
}
