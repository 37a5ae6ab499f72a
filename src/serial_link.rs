//! Serial link to the turntable microcontroller
//!
//! Owns the port, writes one-byte motion commands and reads newline
//! terminated ADC counts. Opening goes through a `PortOpener` so the
//! link can run against a real port or a scripted one.

use std::io::{self, Read, Write};
use std::thread;
use std::time::{Duration, Instant};

use crate::command::{MotionCommand, MotorState};
use crate::config_loader::LinkSettings;
use crate::error::{RecorderError, Result};
use crate::series::MAX_ADC;

/// Longest partial line kept while waiting for a newline
const MAX_LINE_LEN: usize = 64;

/// Byte stream to the device
pub trait PortIo: Read + Write + Send {
    /// Discard bytes received but not yet read
    fn clear_input(&mut self) -> io::Result<()>;
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()>;
}

impl PortIo for Box<dyn serialport::SerialPort> {
    fn clear_input(&mut self) -> io::Result<()> {
        self.clear(serialport::ClearBuffer::Input).map_err(io::Error::from)
    }

    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        serialport::SerialPort::set_timeout(self.as_mut(), timeout).map_err(io::Error::from)
    }
}

/// Opens the byte stream described by `LinkSettings`
pub trait PortOpener: Send {
    fn open(&self, settings: &LinkSettings) -> io::Result<Box<dyn PortIo>>;
}

/// Opens OS serial devices through the serialport crate (8N1, no flow control)
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPortOpener;

impl PortOpener for SystemPortOpener {
    fn open(&self, settings: &LinkSettings) -> io::Result<Box<dyn PortIo>> {
        let port = serialport::new(settings.port.as_str(), settings.baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .flow_control(serialport::FlowControl::None)
            .timeout(settings.read_timeout)
            .open()?;
        Ok(Box::new(port))
    }
}

/// Ports the OS currently reports, for the front end's port picker
pub fn available_ports() -> Vec<String> {
    match serialport::available_ports() {
        Ok(ports) => ports.into_iter().map(|p| p.port_name).collect(),
        Err(e) => {
            log::warn!(target: "serial_link", "Could not enumerate serial ports: {}", e);
            Vec::new()
        }
    }
}

/// Result of one poll of the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawSample {
    Reading(u16),
    /// Read timeout elapsed before a full line arrived
    NoData,
}

/// Parse one line sent by the device into a raw ADC count in `0..=full_scale`
pub fn parse_sample(line: &[u8], full_scale: u16) -> Result<u16> {
    if !line.is_ascii() {
        return Err(RecorderError::malformed(line, "not ASCII"));
    }
    // ASCII checked above, so this cannot fail
    let text = std::str::from_utf8(line).unwrap_or_default().trim();
    if text.is_empty() {
        return Err(RecorderError::malformed(line, "empty line"));
    }
    let raw: u16 = text
        .parse()
        .map_err(|e| RecorderError::malformed(line, format!("not an integer ({})", e)))?;
    if raw > full_scale {
        return Err(RecorderError::malformed(line, format!("above ADC range 0..={}", full_scale)));
    }
    Ok(raw)
}

/// Split the first newline-terminated line off `pending`
fn take_line(pending: &mut Vec<u8>) -> Option<Vec<u8>> {
    let pos = pending.iter().position(|&b| b == b'\n')?;
    let mut line: Vec<u8> = pending.drain(..=pos).collect();
    line.pop();
    Some(line)
}

pub struct SerialLink {
    settings: LinkSettings,
    opener: Box<dyn PortOpener>,
    port: Option<Box<dyn PortIo>>,
    pending: Vec<u8>,
    /// Set by a flush; the next bytes up to a newline belong to a cut line
    resync: bool,
    full_scale: u16,
}

impl std::fmt::Debug for SerialLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialLink")
            .field("settings", &self.settings)
            .field("open", &self.is_open())
            .field("pending", &self.pending.len())
            .field("resync", &self.resync)
            .finish()
    }
}

impl SerialLink {
    /// Create a closed link. Settings are validated, the port is not touched.
    pub fn new(settings: LinkSettings, opener: Box<dyn PortOpener>) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            settings,
            opener,
            port: None,
            pending: Vec::new(),
            resync: false,
            full_scale: MAX_ADC,
        })
    }

    /// Largest count `read_sample` accepts
    pub fn with_full_scale(mut self, full_scale: u16) -> Self {
        self.full_scale = full_scale;
        self
    }

    pub fn settings(&self) -> &LinkSettings {
        &self.settings
    }

    pub fn port_name(&self) -> &str {
        &self.settings.port
    }

    /// Store new connection parameters. An open link is closed; the
    /// parameters apply on the next `open()`.
    pub fn configure(
        &mut self,
        port: &str,
        baud_rate: u32,
        read_timeout: Duration,
        write_timeout: Duration,
    ) -> Result<()> {
        let mut next = self.settings.clone();
        next.port = port.to_string();
        next.baud_rate = baud_rate;
        next.read_timeout = read_timeout;
        next.write_timeout = write_timeout;
        next.validate()?;

        if self.is_open() {
            log::info!(target: "serial_link", "Reconfiguring {}, closing current connection", self.settings.port);
            self.close();
        }
        self.settings = next;
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.port.is_some()
    }

    /// Open the port if it is not already open
    pub fn open(&mut self) -> Result<()> {
        if self.is_open() {
            return Ok(());
        }

        let attempts = self.settings.open_attempts.max(1);
        let mut last_err: Option<io::Error> = None;
        for attempt in 1..=attempts {
            log::info!(target: "serial_link", "Opening {} @{} (attempt {}/{})",
                       self.settings.port, self.settings.baud_rate, attempt, attempts);
            match self.opener.open(&self.settings) {
                Ok(port) => {
                    self.port = Some(port);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    log::warn!(target: "serial_link", "Open of {} failed: {}", self.settings.port, e);
                    last_err = Some(e);
                    if attempt < attempts {
                        thread::sleep(self.settings.open_retry_delay);
                    }
                }
            }
        }

        if !self.is_open() {
            return Err(RecorderError::LinkUnavailable {
                port: self.settings.port.clone(),
                reason: last_err.map(|e| e.to_string()).unwrap_or_else(|| "unknown error".to_string()),
            });
        }

        if !self.settings.reset_delay.is_zero() {
            log::debug!(target: "serial_link", "Waiting {:?} for board reset", self.settings.reset_delay);
            thread::sleep(self.settings.reset_delay);
        }
        // Boot banner and anything sent during reset is stale
        self.flush_input();
        log::info!(target: "serial_link", "Connected to {}", self.settings.port);
        Ok(())
    }

    /// Release the port. Safe to call when already closed.
    pub fn close(&mut self) {
        if self.port.take().is_some() {
            log::info!(target: "serial_link", "Closed {}", self.settings.port);
        }
        self.pending.clear();
    }

    /// Drop buffered input, including a partially received line.
    ///
    /// The OS buffer can be cleared mid-line, so the next read skips
    /// everything up to the first newline before parsing.
    pub fn flush_input(&mut self) {
        self.pending.clear();
        self.resync = true;
        if let Some(port) = self.port.as_mut() {
            if let Err(e) = port.clear_input() {
                log::warn!(target: "serial_link", "Failed to clear input on {}: {}", self.settings.port, e);
            }
        }
    }

    fn transport_error(&mut self, source: io::Error) -> RecorderError {
        let port = self.settings.port.clone();
        log::error!(target: "serial_link", "Transport failure on {}: {}", port, source);
        self.close();
        RecorderError::Transport { port, source }
    }

    /// Write one motion command, opening the link first if needed.
    ///
    /// Returns the motor state the device is in after the write; callers
    /// commit it only when this returns `Ok`. A write failure closes the link.
    pub fn send_command(&mut self, cmd: MotionCommand) -> Result<MotorState> {
        if !self.is_open() {
            self.open()?;
        }
        self.flush_input();

        let byte = cmd.encode(self.settings.encoding);
        let write_timeout = self.settings.write_timeout;
        let read_timeout = self.settings.read_timeout;
        let written = match self.port.as_mut() {
            Some(port) => port
                .set_timeout(write_timeout)
                .and_then(|_| port.write_all(&[byte]))
                .and_then(|_| port.flush())
                .and_then(|_| port.set_timeout(read_timeout)),
            None => return Err(RecorderError::LinkClosed(self.settings.port.clone())),
        };
        if let Err(e) = written {
            return Err(self.transport_error(e));
        }

        log::info!(target: "serial_link", "SEND {} (0x{:02x}) to {}", cmd, byte, self.settings.port);
        Ok(cmd.resulting_state())
    }

    /// Read one line and parse it as an ADC count.
    ///
    /// A timeout is `Ok(RawSample::NoData)`. An unparseable line is consumed
    /// and reported as `MalformedSample`; the link stays usable.
    pub fn read_sample(&mut self) -> Result<RawSample> {
        if self.port.is_none() {
            return Err(RecorderError::LinkClosed(self.settings.port.clone()));
        }
        let deadline = Instant::now() + self.settings.read_timeout;
        let mut chunk = [0u8; MAX_LINE_LEN];

        loop {
            if self.resync {
                self.skip_cut_line();
            }
            if !self.resync {
                if let Some(line) = take_line(&mut self.pending) {
                    log::trace!(target: "serial_link", "RECV {:?}", String::from_utf8_lossy(&line));
                    return parse_sample(&line, self.full_scale).map(RawSample::Reading);
                }
                if self.pending.len() > MAX_LINE_LEN {
                    let garbage = std::mem::take(&mut self.pending);
                    return Err(RecorderError::malformed(&garbage, "no line terminator"));
                }
            }
            if Instant::now() >= deadline {
                return Ok(RawSample::NoData);
            }

            let read = match self.port.as_mut() {
                Some(port) => port.read(&mut chunk),
                None => return Err(RecorderError::LinkClosed(self.settings.port.clone())),
            };
            match read {
                Ok(0) => thread::sleep(Duration::from_millis(1)),
                Ok(n) => self.pending.extend_from_slice(&chunk[..n]),
                Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                    return Ok(RawSample::NoData);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(self.transport_error(e)),
            }
        }
    }

    fn skip_cut_line(&mut self) {
        match self.pending.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                let skipped: Vec<u8> = self.pending.drain(..=pos).collect();
                log::trace!(target: "serial_link", "Skipped {:?} after flush", String::from_utf8_lossy(&skipped));
                self.resync = false;
            }
            None => self.pending.clear(),
        }
    }
}

impl Drop for SerialLink {
    fn drop(&mut self) {
        self.close();
    }
}
