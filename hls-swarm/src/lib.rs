//! hls-swarm: HLS load-generation swarm.
//!
//! Spawns and supervises N concurrent player children pulling an HLS stream
//! from an origin under test, and reports how those players perceive the
//! origin: segment and manifest latency, TCP health, playback health,
//! wall-clock drift. Parsing is lossy by design so the measurement can never
//! distort the experiment.

pub mod aggregator;
pub mod cli;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod logging;
pub mod manager;
pub mod metrics;
pub mod preflight;
pub mod ramp;
pub mod supervisor;

pub use error::{Error, Result};
