//! Test doubles shared by unit tests across the crate.

pub mod recording_sink;
pub mod scripted;
pub mod socket_guard;
