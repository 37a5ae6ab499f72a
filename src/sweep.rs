//! Unattended pattern recording: return to the zero point, sweep while
//! recording, then go back to zero.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::acquisition::{RunOutcome, RunReport};
use crate::command::MotionCommand;
use crate::config_loader::AcquisitionSettings;
use crate::error::{RecorderError, Result};
use crate::turntable::Turntable;

/// Direction that drives the turntable back to its zero point
pub const HOME_DIRECTION: MotionCommand = MotionCommand::RotateLeft;
/// Direction recorded during a sweep
pub const SWEEP_DIRECTION: MotionCommand = MotionCommand::RotateRight;

#[derive(Debug, Clone)]
pub struct SweepPlan {
    pub max_angle: u32,
    /// Time given to the homing move before the sweep starts
    pub settle: Duration,
    pub return_home: bool,
}

impl SweepPlan {
    pub fn from_settings(settings: &AcquisitionSettings) -> Self {
        Self {
            max_angle: settings.max_angle,
            settle: Duration::from_secs(2),
            return_home: true,
        }
    }
}

pub fn run_sweep(table: &Arc<Turntable>, plan: &SweepPlan) -> Result<RunReport> {
    log::info!(target: "sweep", "Sweep: homing, then recording 0..={} ({:?} settle)", plan.max_angle, plan.settle);

    table.send_command(HOME_DIRECTION)?;
    thread::sleep(plan.settle);
    table.send_command(SWEEP_DIRECTION)?;

    let handle = table
        .start_acquisition(plan.max_angle)?
        .ok_or(RecorderError::Busy)?;
    let report = handle.join();

    match report.outcome {
        RunOutcome::Stopped => {
            log::info!(target: "sweep", "Sweep stopped after {} samples", report.samples.len());
        }
        _ => {
            let finish = if plan.return_home { HOME_DIRECTION } else { MotionCommand::Stop };
            if let Err(e) = table.send_command(finish) {
                log::warn!(target: "sweep", "Could not send {} after sweep: {}", finish, e);
            }
        }
    }
    Ok(report)
}
