//! Antenna Pattern Recorder
//!
//! Turntable control and ADC acquisition over a serial link, shared by the
//! recorder front ends.

pub mod acquisition;
pub mod command;
pub mod config_loader;
pub mod error;
pub mod export;
pub mod serial_link;
pub mod series;
pub mod sweep;
pub mod turntable;

#[cfg(test)]
mod mock;

pub use acquisition::{RunHandle, RunOutcome, RunReport};
pub use command::{CommandEncoding, MotionCommand, MotorState};
pub use config_loader::{LinkSettings, RecorderSettings};
pub use error::{RecorderError, Result};
pub use series::{Sample, SampleSeries, SeriesEvent};
pub use serial_link::{PortIo, PortOpener, RawSample, SerialLink, SystemPortOpener};
pub use turntable::Turntable;
