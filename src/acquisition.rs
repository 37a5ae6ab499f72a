//! Bounded polling loop that fills the sample series while the turntable rotates

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::config_loader::validate_max_angle;
use crate::error::{RecorderError, Result};
use crate::serial_link::RawSample;
use crate::series::{Sample, SeriesEvent};
use crate::turntable::Turntable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every angle up to max_angle was recorded
    Completed,
    /// Stop was requested or the motor went inactive
    Stopped,
    /// The link closed or failed mid-run
    LinkFailed,
    /// The acquisition thread panicked
    Aborted,
}

/// What a finished run hands back to the flow that started it
#[derive(Debug)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub samples: Vec<Sample>,
    pub malformed_lines: usize,
    /// Set when `outcome` is `LinkFailed`
    pub error: Option<RecorderError>,
}

impl RunReport {
    fn aborted() -> Self {
        Self {
            outcome: RunOutcome::Aborted,
            samples: Vec::new(),
            malformed_lines: 0,
            error: None,
        }
    }

    /// Samples of a run that ended normally or by request; the link error otherwise
    pub fn into_result(self) -> Result<Vec<Sample>> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.samples),
        }
    }
}

impl std::fmt::Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {} values, {} malformed lines", self.outcome, self.samples.len(), self.malformed_lines)?;
        if let Some(e) = &self.error {
            write!(f, " ({})", e)?;
        }
        Ok(())
    }
}

pub struct RunHandle {
    thread: JoinHandle<RunReport>,
}

impl RunHandle {
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the run to end
    pub fn join(self) -> RunReport {
        self.thread.join().unwrap_or_else(|_| {
            log::error!(target: "acquisition", "Acquisition thread panicked");
            RunReport::aborted()
        })
    }
}

pub(crate) fn start(ctx: &Arc<Turntable>, max_angle: u32) -> Result<Option<RunHandle>> {
    validate_max_angle(max_angle)?;
    {
        let mut state = ctx.lock_state();
        if !state.motor.is_active() {
            log::info!(target: "acquisition", "Motor is not rotating, acquisition not started");
            return Ok(None);
        }
        if state.run_active {
            log::debug!(target: "acquisition", "Acquisition already running, start ignored");
            return Ok(None);
        }
        state.run_active = true;
        state.series.clear();
    }

    let worker = Arc::clone(ctx);
    let spawned = thread::Builder::new()
        .name("acquisition".to_string())
        .spawn(move || run(&worker, max_angle));
    match spawned {
        Ok(thread) => Ok(Some(RunHandle { thread })),
        Err(e) => {
            ctx.lock_state().run_active = false;
            Err(RecorderError::Spawn(e))
        }
    }
}

/// Resets the run state even if the loop unwinds
struct RunGuard<'a> {
    ctx: &'a Turntable,
    finished: bool,
}

impl RunGuard<'_> {
    fn finish(&mut self) -> Vec<Sample> {
        self.finished = true;
        self.ctx.finish_run()
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.ctx.finish_run();
        }
    }
}

fn run(ctx: &Turntable, max_angle: u32) -> RunReport {
    let mut guard = RunGuard { ctx, finished: false };
    let settings = ctx.acquisition_settings().clone();
    let mut malformed_lines = 0usize;
    let mut error = None;
    log::info!(target: "acquisition", "Run started, recording angles 0..={}", max_angle);

    let outcome = loop {
        {
            let state = ctx.lock_state();
            if state.should_stop() {
                break RunOutcome::Stopped;
            }
            if state.series.next_angle() > max_angle {
                break RunOutcome::Completed;
            }
        }

        let polled = {
            let mut link = ctx.lock_link();
            if settings.flush_before_read {
                link.flush_input();
            }
            link.read_sample()
        };

        match polled {
            Ok(RawSample::Reading(raw)) => {
                let value = settings.scale.to_volts(raw);
                let sample = {
                    let mut state = ctx.lock_state();
                    // A stop raised while we were reading wins over the sample
                    if state.should_stop() {
                        break RunOutcome::Stopped;
                    }
                    state.series.record(value)
                };
                log::debug!(target: "acquisition", "angle {:>3}: raw {:>4} -> {:.3} V", sample.angle, raw, value);
                ctx.notify(SeriesEvent::Recorded(sample));
            }
            Ok(RawSample::NoData) => {
                log::trace!(target: "acquisition", "No sample within read timeout");
            }
            Err(e @ RecorderError::MalformedSample { .. }) => {
                malformed_lines += 1;
                log::warn!(target: "acquisition", "Skipping line: {}", e);
            }
            Err(e) => {
                log::error!(target: "acquisition", "Run ended by link failure: {}", e);
                error = Some(e);
                break RunOutcome::LinkFailed;
            }
        }
    };

    let samples = guard.finish();
    log::info!(target: "acquisition", "Run finished: {:?}, {} samples, {} malformed lines",
               outcome, samples.len(), malformed_lines);
    ctx.notify(SeriesEvent::RunFinished {
        outcome,
        samples: samples.clone(),
    });

    RunReport {
        outcome,
        samples,
        malformed_lines,
        error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::MotorState;
    use crate::config_loader::{AcquisitionSettings, RecorderSettings};
    use crate::mock::{test_settings, MockDevice, MockOpener};
    use crate::series::VoltageScale;
    use crossbeam_channel::Receiver;
    use std::io;
    use std::time::Duration;

    fn table(device: &MockDevice) -> Arc<Turntable> {
        table_with(device, AcquisitionSettings::default())
    }

    fn table_with(device: &MockDevice, acquisition: AcquisitionSettings) -> Arc<Turntable> {
        let settings = RecorderSettings {
            link: test_settings(),
            acquisition,
        };
        Arc::new(Turntable::new(settings, Box::new(MockOpener::new(device.clone()))).unwrap())
    }

    fn wait_recorded(rx: &Receiver<SeriesEvent>, count: usize) -> Vec<Sample> {
        let mut seen = Vec::new();
        while seen.len() < count {
            match rx.recv_timeout(Duration::from_secs(2)).expect("sample event") {
                SeriesEvent::Recorded(sample) => seen.push(sample),
                other => panic!("unexpected event {:?}", other),
            }
        }
        seen
    }

    #[test]
    fn test_run_completes_at_max_angle() {
        let device = MockDevice::new();
        let table = table(&device);
        table.rotate_right().unwrap();
        let lines: Vec<String> = (0..15).map(|i| (i * 50).to_string()).collect();
        device.push_streamed_lines(lines.iter().map(String::as_str));

        let report = table.start_acquisition(10).unwrap().unwrap().join();
        assert_eq!(report.outcome, RunOutcome::Completed);
        assert_eq!(report.samples.len(), 11);
        let angles: Vec<u32> = report.samples.iter().map(|s| s.angle).collect();
        assert_eq!(angles, (0..=10).collect::<Vec<u32>>());
        let scale = VoltageScale::default();
        assert_eq!(report.samples[3].value, scale.to_volts(150));
        assert!(report.error.is_none());

        // Transient buffer: cleared at run end
        assert!(table.snapshot().is_empty());
        assert!(!table.is_running());
        // Each poll consumes a cut tail and one line
        assert_eq!(device.queued(), 8);
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let device = MockDevice::new();
        let table = table(&device);
        table.rotate_left().unwrap();
        device.push_streamed_lines(["512", "abc", "", "1023", "0"]);

        let report = table.start_acquisition(2).unwrap().unwrap().join();
        assert_eq!(report.outcome, RunOutcome::Completed);
        assert_eq!(report.malformed_lines, 2);
        let values: Vec<f64> = report.samples.iter().map(|s| s.value).collect();
        assert_eq!(values, vec![VoltageScale::default().to_volts(512), 5.0, 0.0]);
        let angles: Vec<u32> = report.samples.iter().map(|s| s.angle).collect();
        assert_eq!(angles, vec![0, 1, 2]);
    }

    #[test]
    fn test_stop_mid_run() {
        let device = MockDevice::new();
        let table = table(&device);
        table.rotate_right().unwrap();
        let rx = table.subscribe();
        device.push_streamed_lines(["10", "20", "30"]);

        let handle = table.start_acquisition(180).unwrap().unwrap();
        wait_recorded(&rx, 3);
        assert_eq!(table.snapshot().len(), 3);

        table.request_stop().unwrap();
        let report = handle.join();
        assert_eq!(report.outcome, RunOutcome::Stopped);
        assert_eq!(report.samples.len(), 3);
        assert!(table.snapshot().is_empty());
        assert_eq!(table.motor_state(), MotorState::Inactive);
        assert_eq!(*device.written().last().unwrap(), 0);

        match rx.recv_timeout(Duration::from_secs(2)).unwrap() {
            SeriesEvent::RunFinished { outcome, samples } => {
                assert_eq!(outcome, RunOutcome::Stopped);
                assert_eq!(samples.len(), 3);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_second_start_is_noop() {
        let device = MockDevice::new();
        let table = table(&device);
        table.rotate_left().unwrap();
        let first = table.start_acquisition(180).unwrap().unwrap();
        assert!(table.is_running());
        assert!(table.start_acquisition(180).unwrap().is_none());

        table.request_stop().unwrap();
        assert_eq!(first.join().outcome, RunOutcome::Stopped);
        assert!(!table.is_running());
    }

    #[test]
    fn test_transport_failure_ends_run() {
        let device = MockDevice::new();
        let table = table(&device);
        table.rotate_left().unwrap();
        device.push_streamed_line("100");
        device.push_error(io::ErrorKind::BrokenPipe);

        let report = table.start_acquisition(10).unwrap().unwrap().join();
        assert_eq!(report.outcome, RunOutcome::LinkFailed);
        assert_eq!(report.samples.len(), 1);
        assert!(matches!(report.error, Some(RecorderError::Transport { .. })));
        assert!(report.to_string().contains("transport error"));
        assert!(report.into_result().is_err());
        assert!(!table.is_open());
    }

    #[test]
    fn test_closed_link_ends_run() {
        let device = MockDevice::new();
        let table = table(&device);
        table.rotate_left().unwrap();
        let handle = table.start_acquisition(180).unwrap().unwrap();
        table.close();
        let report = handle.join();
        assert_eq!(report.outcome, RunOutcome::LinkFailed);
        assert!(matches!(report.error, Some(RecorderError::LinkClosed(_))));
    }

    #[test]
    fn test_stale_input_is_flushed() {
        let device = MockDevice::new();
        let table = table(&device);
        table.rotate_right().unwrap();
        // "999\n" arrived earlier; "512\n" is cut by the first flush after "51"
        device.push_stale(b"999\n51");
        device.push_bytes(b"2\n");
        device.push_line("600");
        device.push_streamed_line("700");
        let clears_before = device.clear_count();

        let report = table.start_acquisition(1).unwrap().unwrap().join();
        let scale = VoltageScale::default();
        let values: Vec<f64> = report.samples.iter().map(|s| s.value).collect();
        assert_eq!(values, vec![scale.to_volts(600), scale.to_volts(700)]);
        assert_eq!(report.malformed_lines, 0);
        assert!(device.clear_count() >= clears_before + 2);
    }

    #[test]
    fn test_clear_during_run_restarts_angles() {
        let device = MockDevice::new();
        let table = table(&device);
        table.rotate_right().unwrap();
        let rx = table.subscribe();
        device.push_streamed_lines(["1", "2"]);
        let handle = table.start_acquisition(180).unwrap().unwrap();
        wait_recorded(&rx, 2);

        table.clear();
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), SeriesEvent::Cleared);
        device.push_streamed_line("3");
        let after = wait_recorded(&rx, 1);
        assert_eq!(after[0].angle, 0);

        table.request_stop().unwrap();
        let report = handle.join();
        assert_eq!(report.samples.len(), 1);
    }

    #[test]
    fn test_run_uses_configured_full_scale() {
        let device = MockDevice::new();
        let scale = VoltageScale { full_scale: 4095, reference_volts: 3.3 };
        let acquisition = AcquisitionSettings { scale, ..AcquisitionSettings::default() };
        let table = table_with(&device, acquisition);
        table.rotate_right().unwrap();
        device.push_streamed_lines(["2048", "5000", "4095"]);

        let report = table.start_acquisition(1).unwrap().unwrap().join();
        assert_eq!(report.outcome, RunOutcome::Completed);
        assert_eq!(report.malformed_lines, 1);
        let values: Vec<f64> = report.samples.iter().map(|s| s.value).collect();
        assert_eq!(values, vec![scale.to_volts(2048), scale.to_volts(4095)]);
        assert!((values[1] - 3.3).abs() < 1e-12);
    }
}
