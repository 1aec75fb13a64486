//! Event types broadcast by the engine.
//!
//! | Event | Stream |
//! |-------|--------|
//! | `PipelineEvent` | `VoxEngine::subscribe_events` |
//! | `EngineStatusEvent` | `VoxEngine::subscribe_status` |
//!
//! Both serialize to camelCase JSON so a network client can consume them
//! verbatim.

use serde::{Deserialize, Serialize};

use crate::buffering::ItemId;
use crate::error::VoxError;

// ---------------------------------------------------------------------------
// Pipeline events
// ---------------------------------------------------------------------------

/// One step in an item's life, tagged with a monotonically increasing sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineEvent {
    pub seq: u64,
    pub kind: PipelineEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PipelineEventKind {
    /// Item accepted by the queue (or written into the sample ring).
    Queued { id: ItemId, frames: usize },
    /// Request refused; `id` is `None` when it failed before packaging.
    Rejected {
        id: Option<ItemId>,
        reason: RejectReason,
    },
    /// Playback of an item reached its last frame.
    Finished { id: ItemId },
    /// A stop discarded `discarded` queued or playing items.
    Cleared { discarded: usize },
}

/// Why a request never reached the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RejectReason {
    QueueFull,
    EmptyUtterance,
    SynthesisFailed,
    NotRunning,
    InvalidRequest,
    Other,
}

impl From<&VoxError> for RejectReason {
    fn from(err: &VoxError) -> Self {
        match err {
            VoxError::QueueFull => RejectReason::QueueFull,
            VoxError::EmptyUtterance => RejectReason::EmptyUtterance,
            VoxError::Synthesis(_) | VoxError::EngineNotStarted => RejectReason::SynthesisFailed,
            VoxError::NotRunning => RejectReason::NotRunning,
            VoxError::InvalidRequest(_) => RejectReason::InvalidRequest,
            _ => RejectReason::Other,
        }
    }
}

// ---------------------------------------------------------------------------
// Engine status events
// ---------------------------------------------------------------------------

/// Emitted whenever the engine changes state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatusEvent {
    pub status: EngineStatus,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}

/// Current state of the speech engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    /// Engine created but `start()` not yet called.
    Idle,
    /// Synthesizer warming up and output stream opening.
    Starting,
    /// Output stream open; requests are accepted.
    Running,
    /// Stream closed; engine may be restarted.
    Stopped,
    /// Unrecoverable error — restart required.
    Error,
}
