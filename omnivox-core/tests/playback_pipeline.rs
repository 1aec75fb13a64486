use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use omnivox_core::buffering::AudioItemQueue;
use omnivox_core::playback::{PlaybackControl, PlaybackDiagnostics, QueuePlayback};
use omnivox_core::synthesis::SynthesizedAudio;
use omnivox_core::{
    AudioItem, EngineConfig, FrameSource, ItemId, PipelineEvent, PipelineEventKind,
    SpeechSynthesizer, StreamFlow, SynthHandle, VoxEngine, VoxError,
};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;

const BLOCK_FRAMES: usize = 256;

/// Mono ramp of a fixed length; "fail" makes the engine error out.
struct RampSynth {
    frames: usize,
}

impl SpeechSynthesizer for RampSynth {
    fn start(&mut self) -> omnivox_core::Result<()> {
        Ok(())
    }

    fn synthesize(&mut self, text: &str) -> omnivox_core::Result<SynthesizedAudio> {
        if text == "fail" {
            return Err(VoxError::Synthesis("engine crashed".into()));
        }
        let samples = (0..self.frames)
            .map(|i| (i + 1) as f32 / self.frames as f32)
            .collect();
        Ok(SynthesizedAudio::mono(samples, 11_025))
    }

    fn set_rate(&mut self, _words_per_minute: u32) -> omnivox_core::Result<()> {
        Ok(())
    }

    fn shutdown(&mut self) {}
}

fn ramp_engine(frames: usize) -> VoxEngine {
    let engine = VoxEngine::new(
        EngineConfig::default(),
        SynthHandle::new(RampSynth { frames }),
    );
    engine.warm_up().expect("warm up");
    engine
}

fn render_block(source: &mut dyn FrameSource) -> (Vec<f32>, StreamFlow) {
    let mut block = vec![f32::NAN; BLOCK_FRAMES * source.channels() as usize];
    let flow = source.render(&mut block);
    (block, flow)
}

fn recv_event_with_timeout(
    rx: &mut broadcast::Receiver<PipelineEvent>,
    timeout: Duration,
) -> PipelineEvent {
    let start = Instant::now();
    loop {
        match rx.try_recv() {
            Ok(ev) => return ev,
            Err(TryRecvError::Empty) => {
                if start.elapsed() >= timeout {
                    panic!("timed out waiting for pipeline event");
                }
                thread::sleep(Duration::from_millis(5));
            }
            Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Closed) => panic!("event channel closed unexpectedly"),
        }
    }
}

#[test]
fn full_queue_rejects_until_head_drains() {
    let engine = ramp_engine(600);
    let mut source = engine.attach_source().expect("attach");

    for i in 0..5 {
        engine
            .submit_text(&format!("utterance {i}"))
            .expect("queue has room");
    }
    assert!(matches!(
        engine.submit_text("sixth"),
        Err(VoxError::QueueFull)
    ));
    assert_eq!(engine.queue().len(), 5);

    // 600 frames drain in the third 256-frame block.
    for _ in 0..3 {
        render_block(source.as_mut());
    }
    assert_eq!(engine.queue().len(), 4);
    engine.submit_text("seventh").expect("slot freed by drained head");
    assert_eq!(engine.queue().len(), 5);

    let diag = engine.diagnostics_snapshot();
    assert_eq!(diag.items_rejected, 1);
    assert_eq!(diag.items_finished, 1);
    engine.shutdown().expect("shutdown");
}

#[test]
fn items_finish_in_submission_order() {
    let engine = ramp_engine(300);
    let mut events = engine.subscribe_events();
    let mut source = engine.attach_source().expect("attach");

    let ids: Vec<ItemId> = (0..3)
        .map(|i| engine.submit_text(&format!("word {i}")).expect("submit"))
        .collect();
    assert!(ids.windows(2).all(|w| w[0] < w[1]));

    for _ in 0..8 {
        render_block(source.as_mut());
    }
    engine.sync(Duration::from_secs(1)).expect("queue idle");

    let mut finished = Vec::new();
    while finished.len() < ids.len() {
        if let PipelineEventKind::Finished { id } =
            recv_event_with_timeout(&mut events, Duration::from_secs(2)).kind
        {
            finished.push(id);
        }
    }
    assert_eq!(finished, ids);
    engine.shutdown().expect("shutdown");
}

#[test]
fn short_item_is_zero_padded_and_exhausted() {
    let queue = Arc::new(AudioItemQueue::new(5));
    let diagnostics = Arc::new(PlaybackDiagnostics::default());
    let mut source = QueuePlayback::new(
        Arc::clone(&queue),
        Arc::new(PlaybackControl::default()),
        Arc::clone(&diagnostics),
        2,
    );

    let mut item = AudioItem::new(queue.next_item_id(), vec![0.5; 100 * 2], 2, 11_025);
    item.mark_processed();
    queue.try_enqueue(item).expect("enqueue");

    let (block, flow) = render_block(&mut source);
    assert_eq!(flow, StreamFlow::Continue);
    assert!(block[..200].iter().all(|s| *s == 0.5));
    assert!(block[200..].iter().all(|s| *s == 0.0));
    assert_eq!(block[200..].len(), 156 * 2);

    assert!(queue.is_empty(), "exhausted head must free its slot");
    assert_eq!(queue.reclaim().len(), 1);
    assert_eq!(diagnostics.snapshot().items_finished, 1);
}

#[test]
fn empty_queue_renders_silence_and_continues() {
    let engine = ramp_engine(100);
    let mut source = engine.attach_source().expect("attach");
    for _ in 0..3 {
        let (block, flow) = render_block(source.as_mut());
        assert_eq!(flow, StreamFlow::Continue);
        assert!(block.iter().all(|s| *s == 0.0));
    }
    assert_eq!(engine.diagnostics_snapshot().silent_blocks, 3);
    engine.shutdown().expect("shutdown");
}

#[test]
fn mono_voice_reaches_right_channel_only() {
    let engine = ramp_engine(200);
    let mut source = engine.attach_source().expect("attach");
    engine.submit_text("hello").expect("submit");

    let (block, _) = render_block(source.as_mut());
    let frames: Vec<&[f32]> = block.chunks_exact(2).collect();
    assert!(frames.iter().all(|f| f[0] == 0.0), "left channel must be silent");
    for (i, frame) in frames.iter().take(200).enumerate() {
        assert_eq!(frame[1], (i + 1) as f32 / 200.0);
    }
    assert!(frames[200..].iter().all(|f| f[1] == 0.0));
    engine.shutdown().expect("shutdown");
}

#[test]
fn synthesis_failure_leaves_queue_untouched() {
    let engine = ramp_engine(100);
    engine.submit_text("fine").expect("submit");
    assert!(matches!(engine.submit_text("fail"), Err(VoxError::Synthesis(_))));
    assert!(matches!(engine.submit_text("   "), Err(VoxError::EmptyUtterance)));
    assert_eq!(engine.queue().len(), 1);
    assert_eq!(engine.diagnostics_snapshot().synthesis_errors, 1);
}

#[test]
fn stop_twice_then_resume() {
    let engine = ramp_engine(10_000);
    let mut source = engine.attach_source().expect("attach");
    engine.submit_text("long").expect("submit");
    engine.submit_text("longer").expect("submit");
    render_block(source.as_mut());

    engine.stop();
    engine.stop();
    let (block, flow) = render_block(source.as_mut());
    assert_eq!(flow, StreamFlow::Continue);
    assert!(block.iter().all(|s| *s == 0.0));

    engine.submit_text("after stop").expect("queue usable after stop");
    let (block, _) = render_block(source.as_mut());
    assert!(block.chunks_exact(2).any(|f| f[1] != 0.0));
    engine.shutdown().expect("shutdown");
}

#[test]
fn concurrent_producer_and_device_thread_lose_nothing() {
    let engine = Arc::new(ramp_engine(700));
    let source = engine.attach_source().expect("attach");

    let device = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || {
            let mut source = source;
            let mut block = vec![0f32; BLOCK_FRAMES * 2];
            while engine.is_running() {
                source.render(&mut block);
                thread::sleep(Duration::from_millis(1));
            }
        })
    };

    let total = 20;
    let mut accepted = 0;
    let deadline = Instant::now() + Duration::from_secs(10);
    while accepted < total {
        assert!(Instant::now() < deadline, "producer starved");
        match engine.submit_text("tick") {
            Ok(_) => accepted += 1,
            Err(VoxError::QueueFull) => {
                engine.queue().wait_for_space(Duration::from_millis(50));
            }
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    engine.sync(Duration::from_secs(10)).expect("all audio played");

    let diag = engine.diagnostics_snapshot();
    assert_eq!(diag.items_finished, total);
    assert_eq!(diag.frames_emitted, total * 700);

    engine.shutdown().expect("shutdown");
    device.join().expect("device thread");
}
