//! Serialisable event types.
//!
//! All types derive `serde::Serialize` + `serde::Deserialize` so consumers
//! can forward them over any IPC channel (the CLI prints them as JSON lines).

pub mod events;
