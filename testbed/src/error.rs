use std::time::Duration;

/// Result type used across the testbed crate.
pub type Result<T> = std::result::Result<T, TestbedError>;

/// Failures that can surface from building, encoding, transmitting or
/// sampling an experiment.
#[derive(Debug, thiserror::Error)]
pub enum TestbedError {
    /// A configuration value was rejected when a component was built.
    /// Nothing is opened or spawned once this has been returned.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A payload did not follow the line protocol grammar.
    #[error("malformed frame at line {line}: {reason}")]
    MalformedFrame {
        /// 1-based line number of the payload where decoding stopped.
        line: usize,
        /// What was wrong with that line.
        reason: String,
    },

    /// Reading from, or writing to, a device channel failed.
    #[error("device {device} failed: {source}")]
    DeviceIoFailure {
        /// Path or name of the device.
        device: String,
        #[source]
        source: std::io::Error,
    },

    /// The serial driver could not open or configure a port.
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// A config file could not be read or deserialised.
    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),

    /// Any other transport level failure, such as the termination socket.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TestbedError {
    /// Helper for building a `MalformedFrame`.
    pub(crate) fn malformed(line: usize, reason: impl Into<String>) -> Self {
        Self::MalformedFrame {
            line,
            reason: reason.into(),
        }
    }

    /// Helper for wrapping an I/O error with the device it came from.
    pub(crate) fn device(device: impl Into<String>, source: std::io::Error) -> Self {
        Self::DeviceIoFailure {
            device: device.into(),
            source,
        }
    }
}

/// A sampling cycle took longer than its target period. This is reported,
/// never returned as an error, and sampling carries on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("sampler missed its target rate: cycle took {elapsed:?}, period is {period:?}")]
pub struct RateMissed {
    /// How long the cycle's device reads took.
    pub elapsed: Duration,
    /// The target cycle period.
    pub period: Duration,
}
