use thiserror::Error;

/// All errors produced by omnivox-core.
#[derive(Debug, Error)]
pub enum VoxError {
    #[error("speech engine failed to initialize: {0}")]
    EngineInit(String),

    #[error("speech engine is not running")]
    EngineNotStarted,

    #[error("synthesis error: {0}")]
    Synthesis(String),

    #[error("synthesis produced no audio")]
    EmptyUtterance,

    #[error("audio queue is full — submission rejected")]
    QueueFull,

    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default output device found")]
    NoDefaultOutputDevice,

    #[error("invalid audio format: {0}")]
    InvalidFormat(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("pipeline is already running")]
    AlreadyRunning,

    #[error("pipeline is not running")]
    NotRunning,

    #[error("timed out waiting for playback")]
    Timeout,

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl VoxError {
    /// Whether the caller may keep using the pipeline after this error.
    ///
    /// Engine-init and device failures take the output path down; everything
    /// else only drops the request that produced it.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            VoxError::EngineInit(_)
                | VoxError::AudioDevice(_)
                | VoxError::AudioStream(_)
                | VoxError::NoDefaultOutputDevice
        )
    }
}

pub type Result<T> = std::result::Result<T, VoxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backpressure_and_synthesis_errors_are_recoverable() {
        assert!(VoxError::QueueFull.is_recoverable());
        assert!(VoxError::EmptyUtterance.is_recoverable());
        assert!(VoxError::Synthesis("bad text".into()).is_recoverable());
        assert!(VoxError::InvalidRequest("tone too long".into()).is_recoverable());
    }

    #[test]
    fn device_and_engine_errors_are_fatal() {
        assert!(!VoxError::EngineInit("no voice data".into()).is_recoverable());
        assert!(!VoxError::NoDefaultOutputDevice.is_recoverable());
        assert!(!VoxError::AudioStream("gone".into()).is_recoverable());
    }
}
