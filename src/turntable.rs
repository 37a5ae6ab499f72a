//! Recorder context shared by the command flow, the acquisition thread
//! and display subscribers.
//!
//! Motor state, the stop flag, the run flag and the sample series live
//! behind one mutex. The serial link has its own mutex so commands and
//! reads never interleave on the wire. Lock order is link, then state.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::acquisition::{self, RunHandle};
use crate::command::{MotionCommand, MotorState};
use crate::config_loader::{AcquisitionSettings, RecorderSettings};
use crate::error::Result;
use crate::serial_link::{PortOpener, SerialLink, SystemPortOpener};
use crate::series::{Sample, SampleSeries, SeriesEvent};

#[derive(Debug, Default)]
pub(crate) struct SharedState {
    pub(crate) motor: MotorState,
    pub(crate) stop_requested: bool,
    pub(crate) run_active: bool,
    pub(crate) series: SampleSeries,
}

impl SharedState {
    pub(crate) fn should_stop(&self) -> bool {
        self.stop_requested || !self.motor.is_active()
    }
}

#[derive(Debug)]
pub struct Turntable {
    link: Mutex<SerialLink>,
    state: Mutex<SharedState>,
    subscribers: Mutex<Vec<Sender<SeriesEvent>>>,
    acquisition: AcquisitionSettings,
}

impl Turntable {
    pub fn new(settings: RecorderSettings, opener: Box<dyn PortOpener>) -> Result<Self> {
        settings.validate()?;
        let link = SerialLink::new(settings.link, opener)?
            .with_full_scale(settings.acquisition.scale.full_scale);
        Ok(Self {
            link: Mutex::new(link),
            state: Mutex::new(SharedState::default()),
            subscribers: Mutex::new(Vec::new()),
            acquisition: settings.acquisition,
        })
    }

    /// Context on a real serial port
    pub fn with_system_port(settings: RecorderSettings) -> Result<Self> {
        Self::new(settings, Box::new(SystemPortOpener))
    }

    // A panic on another thread must not wedge the recorder, so poisoned locks are recovered.
    pub(crate) fn lock_link(&self) -> MutexGuard<'_, SerialLink> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, SharedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn acquisition_settings(&self) -> &AcquisitionSettings {
        &self.acquisition
    }

    pub fn port_name(&self) -> String {
        self.lock_link().port_name().to_string()
    }

    pub fn configure(
        &self,
        port: &str,
        baud_rate: u32,
        read_timeout: Duration,
        write_timeout: Duration,
    ) -> Result<()> {
        self.lock_link().configure(port, baud_rate, read_timeout, write_timeout)
    }

    pub fn open(&self) -> Result<()> {
        self.lock_link().open()
    }

    pub fn close(&self) {
        self.lock_link().close();
    }

    pub fn is_open(&self) -> bool {
        self.lock_link().is_open()
    }

    /// Send a motion command and commit the new motor state if the write succeeded.
    /// A rotation command clears a pending stop request.
    pub fn send_command(&self, cmd: MotionCommand) -> Result<MotorState> {
        let mut link = self.lock_link();
        let next = link.send_command(cmd)?;
        let mut state = self.lock_state();
        state.motor = next;
        if cmd.is_rotation() {
            state.stop_requested = false;
        }
        Ok(next)
    }

    pub fn rotate_left(&self) -> Result<MotorState> {
        self.send_command(MotionCommand::RotateLeft)
    }

    pub fn rotate_right(&self) -> Result<MotorState> {
        self.send_command(MotionCommand::RotateRight)
    }

    /// Flag the running acquisition to stop, then send STOP to the motor.
    /// The flag is set even when the STOP write fails.
    pub fn request_stop(&self) -> Result<MotorState> {
        self.lock_state().stop_requested = true;
        log::info!(target: "turntable", "Stop requested");
        self.send_command(MotionCommand::Stop)
    }

    /// Begin an acquisition run on its own thread.
    ///
    /// Returns `Ok(None)` without doing anything when the motor is not
    /// rotating or a run is already active.
    pub fn start_acquisition(self: &Arc<Self>, max_angle: u32) -> Result<Option<RunHandle>> {
        acquisition::start(self, max_angle)
    }

    /// Empty the series. During a run the angle index restarts at 0.
    pub fn clear(&self) {
        self.lock_state().series.clear();
        self.notify(SeriesEvent::Cleared);
    }

    pub fn snapshot(&self) -> Vec<Sample> {
        self.lock_state().series.as_slice().to_vec()
    }

    pub fn motor_state(&self) -> MotorState {
        self.lock_state().motor
    }

    pub fn is_running(&self) -> bool {
        self.lock_state().run_active
    }

    pub fn stop_requested(&self) -> bool {
        self.lock_state().stop_requested
    }

    /// Channel receiving one event per recorded sample, clear and finished run
    pub fn subscribe(&self) -> Receiver<SeriesEvent> {
        let (tx, rx) = unbounded();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    pub(crate) fn notify(&self, event: SeriesEvent) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Take the collected samples and mark the run finished
    pub(crate) fn finish_run(&self) -> Vec<Sample> {
        let mut state = self.lock_state();
        state.run_active = false;
        state.series.take()
    }

    /// Stop the motor and release the port
    pub fn shutdown(&self) -> Result<()> {
        let stopped = self.request_stop().map(|_| ());
        self.close();
        stopped
    }
}
