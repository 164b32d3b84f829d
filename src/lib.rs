//! MQTT capture and timed replay.
//!
//! This crate provides the core types and logic used by the `mqtt_recorder`
//! binary and the `player` tool:
//!
//! - `record`: the log data model and the BEGIN_PLAY status message
//! - `codec`: the line-oriented text format, with a streaming reader and an
//!   append-only writer
//! - `recorder` / `player`: the capture loop and the timed replay loop,
//!   written against the `client::BusClient` capability
//! - `mqtt`: that capability over a real broker via `rumqttc`
//!
//! The binaries in this repository (`src/main.rs` and `src/bin/player.rs`)
//! only parse arguments, install the interrupt handler and call
//! [`recorder::record`] or [`player::play`].
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod mqtt;
pub mod player;
pub mod record;
pub mod recorder;
pub mod shutdown;
