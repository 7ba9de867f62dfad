use super::serial::DeviceChannel;
use std::{
    collections::VecDeque,
    io::{self, Read, Write},
    time::Duration,
};

/// In-memory stand-in for a serial device. Each `discard_stale` call throws
/// away unread bytes and loads the next scripted burst, the way a real
/// device keeps streaming records between cycles.
#[derive(Debug, Default)]
pub struct MockDevice {
    name: String,
    bursts: VecDeque<Vec<u8>>,
    pending: VecDeque<u8>,
    written: Vec<u8>,
    latency: Duration,
    failure: Option<io::ErrorKind>,
}

impl MockDevice {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Queue a burst that becomes readable after the next `discard_stale`.
    pub fn with_burst(mut self, burst: &[u8]) -> Self {
        self.bursts.push_back(burst.to_vec());
        self
    }

    /// Bytes readable straight away, before any `discard_stale`.
    pub fn with_pending(mut self, bytes: &[u8]) -> Self {
        self.pending.extend(bytes);
        self
    }

    /// Time each `discard_stale` takes, to stand in for a slow device.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Make reads fail with `kind` once the readable bytes run out.
    pub fn failing_with(mut self, kind: io::ErrorKind) -> Self {
        self.failure = Some(kind);
        self
    }

    pub fn written(&self) -> &[u8] {
        &self.written
    }
}

impl Read for MockDevice {
    fn read(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            return match self.failure {
                Some(kind) => Err(io::Error::new(kind, "mock device failure")),
                None => Ok(0),
            };
        }
        let count = buffer.len().min(self.pending.len());
        for (slot, byte) in buffer.iter_mut().zip(self.pending.drain(..count)) {
            *slot = byte;
        }
        Ok(count)
    }
}

impl Write for MockDevice {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.written.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl DeviceChannel for MockDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn discard_stale(&mut self) -> io::Result<()> {
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        self.pending.clear();
        if let Some(burst) = self.bursts.pop_front() {
            self.pending.extend(burst);
        }
        Ok(())
    }
}
