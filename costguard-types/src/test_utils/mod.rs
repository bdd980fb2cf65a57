//! Test doubles for the costguard contracts.
//!
//! Available behind the `test-utils` feature flag. These are minimal
//! implementations that prove the trait APIs are usable.

mod manual_clock;
mod recording_emitter;

pub use manual_clock::ManualClock;
pub use recording_emitter::{RecordedMetric, RecordingEmitter};
