//! Playback callback over the continuous sample ring.

use std::sync::Arc;

use crate::buffering::RingReader;

use super::{bump, FrameSource, PlaybackControl, PlaybackDiagnostics, StreamFlow};

pub struct StreamPlayback {
    reader: RingReader,
    control: Arc<PlaybackControl>,
    diagnostics: Arc<PlaybackDiagnostics>,
    generation: u64,
    /// Audio was flowing on the previous block; a short block now is an underrun.
    flowing: bool,
}

impl StreamPlayback {
    pub fn new(
        reader: RingReader,
        control: Arc<PlaybackControl>,
        diagnostics: Arc<PlaybackDiagnostics>,
    ) -> Self {
        let generation = control.flush_generation();
        Self {
            reader,
            control,
            diagnostics,
            generation,
            flowing: false,
        }
    }
}

impl FrameSource for StreamPlayback {
    fn render(&mut self, out: &mut [f32]) -> StreamFlow {
        bump(&self.diagnostics.blocks_rendered, 1);

        if self.control.is_shutdown() {
            out.fill(0.0);
            return StreamFlow::Complete;
        }

        let generation = self.control.flush_generation();
        if generation != self.generation {
            self.generation = generation;
            self.reader.clear();
            self.flowing = false;
        }

        let ch = self.reader.channels();
        let wanted = out.len() / ch;
        let frames = self.reader.read(out);
        out[frames * ch..].fill(0.0);

        if frames == 0 {
            bump(&self.diagnostics.silent_blocks, 1);
        } else {
            bump(&self.diagnostics.frames_emitted, frames);
        }
        if self.flowing && frames < wanted {
            bump(&self.diagnostics.underruns, 1);
        }
        self.flowing = frames == wanted && frames > 0;

        StreamFlow::Continue
    }

    fn channels(&self) -> u16 {
        self.reader.channels() as u16
    }
}
