use crate::error::{Result, TestbedError};
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::{
    io::{self, Read, Write},
    time::Duration,
};
use tracing::{debug, info};

/// Baud rate the Arduino sketches on the rig are flashed with.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// How long a single driver read waits before reporting a timeout. Reads
/// through `SerialDevice` retry on that timeout, so this only bounds how
/// often the driver is polled, not how long a read can block.
const POLL_TIMEOUT: Duration = Duration::from_millis(500);

/// Ordered byte stream attached to one piece of hardware: a measurement
/// source on the receiver side or the spray controller on the transmitter side.
pub trait DeviceChannel: Read + Write + Send {
    /// Name used in logs and errors, normally the device path.
    fn name(&self) -> &str;

    /// Drop whatever the device sent before now, so the next read sees a
    /// fresh record.
    fn discard_stale(&mut self) -> io::Result<()>;
}

/// A USB serial device, opened 8N1 without flow control.
pub struct SerialDevice {
    /// Path the device was opened from, e.g. /dev/ttyUSB0.
    path: String,
    port: Box<dyn SerialPort>,
}

impl SerialDevice {
    /// Open a serial device.
    ///
    /// * `path`: device path, e.g. /dev/ttyUSB0.
    /// * `baud_rate`: line speed, normally `DEFAULT_BAUD_RATE`.
    pub fn open(path: &str, baud_rate: u32) -> Result<Self> {
        let port = serialport::new(path, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(POLL_TIMEOUT)
            .open()?;

        info!(path, baud_rate, "opened serial device");
        Ok(Self {
            path: path.to_string(),
            port,
        })
    }

    /// Open every device in order, failing on the first one that cannot be opened.
    pub fn open_all<P: AsRef<str>>(paths: &[P], baud_rate: u32) -> Result<Vec<Self>> {
        paths
            .iter()
            .map(|path| Self::open(path.as_ref(), baud_rate))
            .collect()
    }
}

impl Read for SerialDevice {
    fn read(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.port.read(buffer) {
                Err(e) if e.kind() == io::ErrorKind::TimedOut => continue,
                other => return other,
            }
        }
    }
}

impl Write for SerialDevice {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.port.write(data)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl DeviceChannel for SerialDevice {
    fn name(&self) -> &str {
        &self.path
    }

    fn discard_stale(&mut self) -> io::Result<()> {
        let pending = self.port.bytes_to_read().unwrap_or(0);
        self.port
            .clear(ClearBuffer::Input)
            .map_err(io::Error::from)?;
        debug!(path = %self.path, pending, "discarded stale input");
        Ok(())
    }
}

/// Read into `buffer` until it is full, retrying reads that return early.
/// A stream that ends first is reported as a device failure.
pub fn read_exact_from<D>(device: &mut D, buffer: &mut [u8]) -> Result<()>
where
    D: DeviceChannel + ?Sized,
{
    let name = device.name().to_string();
    device
        .read_exact(buffer)
        .map_err(|e| TestbedError::device(name, e))
}

#[cfg(all(test, feature = "hardware_test"))]
mod tests {
    use super::*;

    /// Needs an Arduino running the rig firmware on /dev/ttyUSB0.
    #[test]
    fn test_open_and_flush_controller() {
        let mut device = SerialDevice::open("/dev/ttyUSB0", DEFAULT_BAUD_RATE).unwrap();
        device.discard_stale().unwrap();
        assert_eq!(device.name(), "/dev/ttyUSB0");
    }
}
