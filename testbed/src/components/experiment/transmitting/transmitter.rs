use crate::{
    devices::hardware::serial::{read_exact_from, DeviceChannel, SerialDevice, DEFAULT_BAUD_RATE},
    error::{Result, TestbedError},
    messages::{
        control::{codec::LineCodec, command::CommandSequence},
        signal::CONTROLLER_READY,
    },
    utils::config::from_yaml_file,
};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use std::{ffi::OsStr, time::Duration};
use tracing::{info, warn};
use uuid::Uuid;

/// The Arduino resets when its port is opened and drops anything sent
/// while it boots.
const DEFAULT_RESET_DELAY: Duration = Duration::from_secs(2);

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_reset_delay() -> Duration {
    DEFAULT_RESET_DELAY
}

/// Configuration for the transmitting side of an experiment: the spray
/// controller's port and the program it should run.
#[serde_as]
#[derive(Deserialize, Serialize, Clone, PartialEq, Eq, Debug)]
pub struct TransmitterConfig {
    /// Serial device of the spray controller.
    device_path: String,
    #[serde(default = "default_baud_rate")]
    baud_rate: u32,
    /// Time to let the controller reset after opening the port.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "reset_delay_ms", default = "default_reset_delay")]
    reset_delay: Duration,
    /// Wait for the controller's readiness marker before writing.
    #[serde(default)]
    await_ready: bool,
    /// Spray mask width the controller firmware expects. Defaults to the
    /// number of declared sprays.
    #[serde(default)]
    mask_width: Option<usize>,
    /// Commands to run, in order.
    #[serde(default)]
    program: CommandSequence,
}

impl TransmitterConfig {
    /// * `device_path`: controller device, e.g. /dev/ttyUSB0.
    /// * `program`: commands for the controller.
    pub fn new(device_path: String, program: CommandSequence) -> Self {
        Self {
            device_path,
            program,
            baud_rate: default_baud_rate(),
            reset_delay: default_reset_delay(),
            await_ready: false,
            mask_width: None,
        }
    }

    pub fn with_mask_width(mut self, mask_width: usize) -> Self {
        self.mask_width = Some(mask_width);
        self
    }

    pub fn with_await_ready(mut self, await_ready: bool) -> Self {
        self.await_ready = await_ready;
        self
    }

    pub fn with_reset_delay(mut self, reset_delay: Duration) -> Self {
        self.reset_delay = reset_delay;
        self
    }

    /// Build the config by reading a YAML file.
    ///
    /// * `filepath`: path to config.
    pub fn from_file<F: AsRef<OsStr>>(filepath: F) -> Result<Self> {
        from_yaml_file(filepath)
    }

    pub fn program(&self) -> &CommandSequence {
        &self.program
    }

    /// Codec matching the configured mask width.
    pub fn codec(&self) -> Result<LineCodec> {
        match self.mask_width {
            Some(width) => LineCodec::with_mask_width(width),
            None => Ok(LineCodec::new()),
        }
    }
}

/// Writes encoded programs to the spray controller.
pub struct Transmitter<D: DeviceChannel> {
    /// Unique identifier, used to tell runs apart in the logs.
    uuid: Uuid,
    device: D,
    codec: LineCodec,
}

impl Transmitter<SerialDevice> {
    /// Open the controller port described by `config`, give the controller
    /// time to reset and, if asked, wait for it to report ready.
    ///
    /// * `config`: transmitter parameters.
    pub fn from_config(config: &TransmitterConfig) -> Result<Self> {
        let codec = config.codec()?;
        let device = SerialDevice::open(&config.device_path, config.baud_rate)?;
        std::thread::sleep(config.reset_delay);

        let mut transmitter = Self::new(device, codec);
        if config.await_ready {
            transmitter.wait_until_ready()?;
        }
        Ok(transmitter)
    }
}

impl<D: DeviceChannel> Transmitter<D> {
    /// * `device`: byte stream to the controller.
    /// * `codec`: encoder for the controller's line protocol.
    pub fn new(device: D, codec: LineCodec) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            device,
            codec,
        }
    }

    /// Block until the controller has printed its readiness marker. The
    /// content is logged but not enforced: boot noise on the line can garble it.
    pub fn wait_until_ready(&mut self) -> Result<()> {
        let mut marker = [0u8; CONTROLLER_READY.len()];
        read_exact_from(&mut self.device, &mut marker)?;
        if marker == CONTROLLER_READY.as_bytes() {
            info!(uuid = %self.uuid, device = self.device.name(), "controller ready");
        } else {
            warn!(
                uuid = %self.uuid,
                device = self.device.name(),
                received = %String::from_utf8_lossy(&marker),
                "unexpected readiness marker from controller"
            );
        }
        Ok(())
    }

    /// Encode `sequence` and write it to the controller in one go.
    /// Returns the number of bytes written.
    pub fn transmit(&mut self, sequence: &CommandSequence) -> Result<usize> {
        let payload = self.codec.encode(sequence);
        let name = self.device.name().to_string();
        self.device
            .write_all(payload.as_bytes())
            .and_then(|()| self.device.flush())
            .map_err(|e| TestbedError::device(name, e))?;

        info!(
            uuid = %self.uuid,
            commands = sequence.len(),
            bytes = payload.len(),
            execution_time_ms = sequence.execution_time(),
            "program sent to controller"
        );
        Ok(payload.len())
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Give the device back, e.g. to close the port.
    pub fn into_device(self) -> D {
        self.device
    }
}
