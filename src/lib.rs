// Muzzle: live term-dictionary masking for user-submitted text
//
// This is the library root. Each module corresponds to a major subsystem:
// term storage, the dictionary cache that does the masking, the pub/sub
// plumbing that carries reload commands, and the coordinator tying them
// together.

pub mod config;
pub mod db;
pub mod dictionary;
pub mod output;
pub mod pubsub;
pub mod reload;
pub mod status;

#[cfg(feature = "web")]
pub mod web;
