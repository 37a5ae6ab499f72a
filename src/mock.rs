//! Scripted serial device for tests

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config_loader::LinkSettings;
use crate::serial_link::{PortIo, PortOpener};

enum Incoming {
    Bytes(Vec<u8>),
    Error(io::ErrorKind),
}

#[derive(Default)]
struct DeviceState {
    /// Already received by the OS; dropped by `clear_input`
    stale: Vec<u8>,
    /// Delivered one entry per read, after the poll that asks for it
    incoming: VecDeque<Incoming>,
    written: Vec<u8>,
    fail_writes: bool,
    clears: usize,
}

/// Handle shared between a test and the ports opened on it
#[derive(Clone, Default)]
pub struct MockDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut DeviceState) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn push_bytes(&self, bytes: &[u8]) {
        self.with(|s| s.incoming.push_back(Incoming::Bytes(bytes.to_vec())));
    }

    pub fn push_line(&self, line: &str) {
        self.push_bytes(format!("{}\n", line).as_bytes());
    }

    pub fn push_lines<'a>(&self, lines: impl IntoIterator<Item = &'a str>) {
        for line in lines {
            self.push_line(line);
        }
    }

    /// Queue `line` as a streaming device delivers it after an input flush:
    /// the tail of the line the flush cut through, then the line itself
    pub fn push_streamed_line(&self, line: &str) {
        self.push_bytes(b"9\n");
        self.push_line(line);
    }

    pub fn push_streamed_lines<'a>(&self, lines: impl IntoIterator<Item = &'a str>) {
        for line in lines {
            self.push_streamed_line(line);
        }
    }

    pub fn push_error(&self, kind: io::ErrorKind) {
        self.with(|s| s.incoming.push_back(Incoming::Error(kind)));
    }

    pub fn push_stale(&self, bytes: &[u8]) {
        self.with(|s| s.stale.extend_from_slice(bytes));
    }

    pub fn written(&self) -> Vec<u8> {
        self.with(|s| s.written.clone())
    }

    pub fn fail_writes(&self, fail: bool) {
        self.with(|s| s.fail_writes = fail);
    }

    pub fn clear_count(&self) -> usize {
        self.with(|s| s.clears)
    }

    pub fn queued(&self) -> usize {
        self.with(|s| s.incoming.len())
    }
}

pub struct MockPort {
    device: MockDevice,
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let next = self.device.with(|s| {
            if !s.stale.is_empty() {
                let n = buf.len().min(s.stale.len());
                buf[..n].copy_from_slice(&s.stale[..n]);
                s.stale.drain(..n);
                return Some(Ok(n));
            }
            match s.incoming.pop_front() {
                Some(Incoming::Bytes(mut bytes)) => {
                    let n = buf.len().min(bytes.len());
                    buf[..n].copy_from_slice(&bytes[..n]);
                    if n < bytes.len() {
                        s.incoming.push_front(Incoming::Bytes(bytes.split_off(n)));
                    }
                    Some(Ok(n))
                }
                Some(Incoming::Error(kind)) => Some(Err(io::Error::new(kind, "scripted failure"))),
                None => None,
            }
        });
        match next {
            Some(result) => result,
            None => {
                std::thread::sleep(Duration::from_millis(1));
                Err(io::Error::new(io::ErrorKind::TimedOut, "no data"))
            }
        }
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.device.with(|s| {
            if s.fail_writes {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
            }
            s.written.extend_from_slice(buf);
            Ok(buf.len())
        })
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl PortIo for MockPort {
    fn clear_input(&mut self) -> io::Result<()> {
        self.device.with(|s| {
            s.stale.clear();
            s.clears += 1;
        });
        Ok(())
    }

    fn set_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Clone)]
pub struct MockOpener {
    device: MockDevice,
    available: Arc<AtomicBool>,
    opens: Arc<AtomicUsize>,
}

impl MockOpener {
    pub fn new(device: MockDevice) -> Self {
        Self {
            device,
            available: Arc::new(AtomicBool::new(true)),
            opens: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl PortOpener for MockOpener {
    fn open(&self, _settings: &LinkSettings) -> io::Result<Box<dyn PortIo>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if !self.available.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no such device"));
        }
        Ok(Box::new(MockPort { device: self.device.clone() }))
    }
}

/// Short timeouts and no reset delay
pub fn test_settings() -> LinkSettings {
    let mut settings = LinkSettings::new("MOCK0");
    settings.read_timeout = Duration::from_millis(20);
    settings.write_timeout = Duration::from_millis(20);
    settings.reset_delay = Duration::ZERO;
    settings.open_retry_delay = Duration::from_millis(1);
    settings
}
