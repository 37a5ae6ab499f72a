//! Sample series filled by an acquisition run

use crate::error::{RecorderError, Result};

pub const MAX_ADC: u16 = 1023;
pub const MAX_VOLTAGE: f64 = 5.0;

/// Linear ADC count to volts mapping: `raw / full_scale * reference_volts`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoltageScale {
    pub full_scale: u16,
    pub reference_volts: f64,
}

impl Default for VoltageScale {
    fn default() -> Self {
        Self {
            full_scale: MAX_ADC,
            reference_volts: MAX_VOLTAGE,
        }
    }
}

impl VoltageScale {
    pub fn to_volts(&self, raw: u16) -> f64 {
        (f64::from(raw) / f64::from(self.full_scale)) * self.reference_volts
    }

    pub fn validate(&self) -> Result<()> {
        if self.full_scale == 0 {
            return Err(RecorderError::config("ADC_FULL_SCALE must be non-zero"));
        }
        if !(self.reference_volts.is_finite() && self.reference_volts > 0.0) {
            return Err(RecorderError::config("ADC_REF_VOLTS must be a positive number"));
        }
        Ok(())
    }
}

/// One recorded point. `value` is in volts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub angle: u32,
    pub value: f64,
}

/// Ordered samples with contiguous angle indices starting at 0
#[derive(Debug, Default, Clone)]
pub struct SampleSeries {
    samples: Vec<Sample>,
}

impl SampleSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Angle index the next recorded value will get
    pub fn next_angle(&self) -> u32 {
        self.samples.len() as u32
    }

    /// Append `value` at the next angle index
    pub fn record(&mut self, value: f64) -> Sample {
        let sample = Sample {
            angle: self.next_angle(),
            value,
        };
        self.samples.push(sample);
        sample
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Move all samples out, leaving the series empty at angle 0
    pub fn take(&mut self) -> Vec<Sample> {
        std::mem::take(&mut self.samples)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn as_slice(&self) -> &[Sample] {
        &self.samples
    }

    pub fn last(&self) -> Option<&Sample> {
        self.samples.last()
    }
}

/// Notifications pushed to display subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum SeriesEvent {
    Recorded(Sample),
    Cleared,
    RunFinished {
        outcome: crate::acquisition::RunOutcome,
        samples: Vec<Sample>,
    },
}
