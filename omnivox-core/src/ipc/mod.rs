//! Serializable event types published by the engine.
//!
//! All types derive `serde::Serialize` + `serde::Deserialize` so the CLI can
//! log them or forward them to a connected client as JSON.

pub mod events;
