//! Multi-source PCM audio relay
//!
//! Capture agents accumulate live PCM into ~20ms chunks and post them to the
//! relay. The relay keeps a registry of sources and connected viewers and
//! fans each chunk out to the viewers that selected its source.
//!
//! ```text
//! capture source -> accumulator -> normalizer -> POST /audio
//!                                                   |
//!                                  registry <- dispatcher -> /ws viewers
//!                                     ^
//!                                  sweeper
//! ```

pub mod agent;
pub mod audio;
pub mod config;
pub mod constants;
pub mod error;
pub mod protocol;
pub mod relay;
pub mod server;

pub use error::{Error, Result};
