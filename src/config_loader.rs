use serde::Deserialize;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{anyhow, Context, Result};
use dotenvy::dotenv;
use gethostname::gethostname;

use crate::command::CommandEncoding;
use crate::error::RecorderError;
use crate::series::VoltageScale;

/// Baud rates the turntable sketches are known to run at
pub const ALLOWED_BAUD_RATES: [u32; 9] = [300, 1200, 2400, 4800, 9600, 19200, 38400, 57600, 115200];

pub const DEFAULT_BAUD_RATE: u32 = 9600;
pub const DEFAULT_MAX_ANGLE: u32 = 180;
/// Upper bound accepted for MAX_ANGLE (ten full turns at one sample per degree)
pub const MAX_ANGLE_LIMIT: u32 = 3600;

const CONFIG_FILE_NAME: &str = "antenna_recorder.yaml";
const OS_SECTIONS: [&str; 4] = ["Windows", "Ubuntu", "macOS", "RaspberryPi"];

// -------------------- Serial link --------------------

#[derive(Debug, Clone, PartialEq)]
pub struct LinkSettings {
    pub port: String,
    pub baud_rate: u32,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    /// Boards with an auto-reset circuit reboot when the port opens
    pub reset_delay: Duration,
    pub open_attempts: u32,
    pub open_retry_delay: Duration,
    pub encoding: CommandEncoding,
}

impl LinkSettings {
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout: Duration::from_millis(1000),
            write_timeout: Duration::from_millis(1000),
            reset_delay: Duration::from_millis(2000),
            open_attempts: 1,
            open_retry_delay: Duration::from_millis(500),
            encoding: CommandEncoding::Binary,
        }
    }

    pub fn validate(&self) -> crate::error::Result<()> {
        if self.port.trim().is_empty() {
            return Err(RecorderError::config("serial port must not be empty"));
        }
        if !ALLOWED_BAUD_RATES.contains(&self.baud_rate) {
            return Err(RecorderError::config(format!(
                "baud rate {} not in {:?}",
                self.baud_rate, ALLOWED_BAUD_RATES
            )));
        }
        if self.read_timeout.is_zero() || self.write_timeout.is_zero() {
            return Err(RecorderError::config("read and write timeouts must be non-zero"));
        }
        if self.open_attempts == 0 {
            return Err(RecorderError::config("OPEN_ATTEMPTS must be at least 1"));
        }
        Ok(())
    }
}

// -------------------- Acquisition --------------------

#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionSettings {
    pub max_angle: u32,
    /// Drop buffered input before every poll so a run never sees bytes from before it started
    pub flush_before_read: bool,
    pub scale: VoltageScale,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            max_angle: DEFAULT_MAX_ANGLE,
            flush_before_read: true,
            scale: VoltageScale::default(),
        }
    }
}

pub fn validate_max_angle(max_angle: u32) -> crate::error::Result<()> {
    if max_angle == 0 || max_angle > MAX_ANGLE_LIMIT {
        return Err(RecorderError::config(format!(
            "max angle {} outside 1..={}",
            max_angle, MAX_ANGLE_LIMIT
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecorderSettings {
    pub link: LinkSettings,
    pub acquisition: AcquisitionSettings,
}

impl RecorderSettings {
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            link: LinkSettings::new(port),
            acquisition: AcquisitionSettings::default(),
        }
    }

    pub fn validate(&self) -> crate::error::Result<()> {
        self.link.validate()?;
        validate_max_angle(self.acquisition.max_angle)?;
        self.acquisition.scale.validate()
    }
}

// -------------------- YAML loading --------------------

/// One host block of antenna_recorder.yaml. Keys match the file exactly.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
struct HostBlock {
    ard_port: Option<String>,
    ard_baud: Option<u32>,
    max_angle: Option<u32>,
    read_timeout_ms: Option<u64>,
    write_timeout_ms: Option<u64>,
    reset_delay_ms: Option<u64>,
    open_attempts: Option<u32>,
    open_retry_ms: Option<u64>,
    command_encoding: Option<CommandEncoding>,
    adc_full_scale: Option<u16>,
    adc_ref_volts: Option<f64>,
    flush_before_read: Option<bool>,
}

impl HostBlock {
    fn into_settings(self, hostname: &str) -> Result<RecorderSettings> {
        let port = self.ard_port
            .ok_or_else(|| anyhow!("ARD_PORT missing for '{}' in {}", hostname, CONFIG_FILE_NAME))?;
        let mut settings = RecorderSettings::new(port);

        let link = &mut settings.link;
        if let Some(baud) = self.ard_baud { link.baud_rate = baud; }
        if let Some(ms) = self.read_timeout_ms { link.read_timeout = Duration::from_millis(ms); }
        if let Some(ms) = self.write_timeout_ms { link.write_timeout = Duration::from_millis(ms); }
        if let Some(ms) = self.reset_delay_ms { link.reset_delay = Duration::from_millis(ms); }
        if let Some(n) = self.open_attempts { link.open_attempts = n; }
        if let Some(ms) = self.open_retry_ms { link.open_retry_delay = Duration::from_millis(ms); }
        if let Some(enc) = self.command_encoding { link.encoding = enc; }

        let acq = &mut settings.acquisition;
        if let Some(max) = self.max_angle { acq.max_angle = max; }
        if let Some(flush) = self.flush_before_read { acq.flush_before_read = flush; }
        if let Some(full_scale) = self.adc_full_scale { acq.scale.full_scale = full_scale; }
        if let Some(volts) = self.adc_ref_volts { acq.scale.reference_volts = volts; }

        Ok(settings)
    }
}

/// Config file next to Cargo.toml
pub fn default_config_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join(CONFIG_FILE_NAME)
}

pub fn current_hostname() -> String {
    gethostname().to_string_lossy().to_string()
}

/// Search the OS sections for a block named after the host, then fall back to `default`
fn find_host_block<'a>(yaml: &'a serde_yaml::Value, hostname: &str) -> Option<&'a serde_yaml::Value> {
    for os_key in OS_SECTIONS.iter() {
        if let Some(block) = yaml.get(*os_key).and_then(|os| os.get(hostname)) {
            log::debug!(target: "config_loader", "Using {}/{} block", os_key, hostname);
            return Some(block);
        }
    }
    let fallback = yaml.get("default");
    if fallback.is_some() {
        log::debug!(target: "config_loader", "No block for host '{}', using default", hostname);
    }
    fallback
}

/// Parse settings for `hostname` out of an already loaded YAML document
pub fn parse_recorder_settings(yaml: &serde_yaml::Value, hostname: &str) -> Result<RecorderSettings> {
    let block = find_host_block(yaml, hostname)
        .ok_or_else(|| anyhow!("No host entry for '{}' and no default block in {}", hostname, CONFIG_FILE_NAME))?;
    let host: HostBlock = serde_yaml::from_value(block.clone())
        .with_context(|| format!("Invalid settings block for '{}'", hostname))?;
    let settings = host.into_settings(hostname)?;
    settings.validate()?;
    Ok(settings)
}

/// Load settings for a host from a YAML file. Fails loudly if the file or ARD_PORT is missing.
pub fn load_recorder_settings(path: &Path, hostname: &str) -> Result<RecorderSettings> {
    let file = File::open(path)
        .map_err(|e| anyhow!("Missing required {} at {:?}: {}", CONFIG_FILE_NAME, path, e))?;
    let yaml: serde_yaml::Value = serde_yaml::from_reader(file)?;
    let settings = parse_recorder_settings(&yaml, hostname)?;
    log::info!(target: "config_loader", "Recorder settings for '{}': port={} baud={} max_angle={}",
               hostname, settings.link.port, settings.link.baud_rate, settings.acquisition.max_angle);
    Ok(settings)
}

/// Apply RECORDER_PORT / RECORDER_BAUD using the given variable lookup
pub fn apply_overrides<F>(settings: &mut RecorderSettings, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(port) = lookup("RECORDER_PORT") {
        log::info!(target: "config_loader", "RECORDER_PORT override: {}", port);
        settings.link.port = port;
    }
    if let Some(baud) = lookup("RECORDER_BAUD") {
        settings.link.baud_rate = baud.trim().parse()
            .with_context(|| format!("RECORDER_BAUD '{}' is not a number", baud))?;
    }
    settings.validate()?;
    Ok(())
}

/// Load `.env` once and apply overrides from the process environment
pub fn apply_env_overrides(settings: &mut RecorderSettings) -> Result<()> {
    let _ = dotenv();
    apply_overrides(settings, |key| std::env::var(key).ok())
}
