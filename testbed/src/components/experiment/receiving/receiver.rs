use crate::{
    components::experiment::receiving::sampler::{
        SampleFrequency, SampleValue, Sampler, ValueFormat, DEFAULT_SEPARATOR,
    },
    devices::{
        hardware::serial::{DeviceChannel, SerialDevice, DEFAULT_BAUD_RATE},
        software::termination::{
            ExperimentEndedFlag, TerminationHandle, TerminationListener, DEFAULT_ACCEPT_POLL,
        },
    },
    error::{Result, TestbedError},
    messages::signal::DEFAULT_TERMINATION_PORT,
    utils::config::from_yaml_file,
};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use std::{ffi::OsStr, net::SocketAddr, time::Duration};
use tracing::info;
use uuid::Uuid;

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_port() -> u16 {
    DEFAULT_TERMINATION_PORT
}

fn default_separator() -> char {
    DEFAULT_SEPARATOR as char
}

fn default_accept_poll() -> Duration {
    DEFAULT_ACCEPT_POLL
}

/// Configuration for the receiving side of an experiment: which
/// measurement devices to sample, how fast, and where to listen for the
/// end of the experiment.
#[serde_as]
#[derive(Deserialize, Serialize, Clone, PartialEq, Debug)]
pub struct ReceiverConfig {
    /// Measurement devices, sampled in this order every cycle.
    device_paths: Vec<String>,
    /// Line speed shared by all measurement devices.
    #[serde(default = "default_baud_rate")]
    baud_rate: u32,
    /// Target cycles per second, must be positive.
    sample_frequency: f64,
    /// TCP port the end of experiment notification arrives on.
    #[serde(default = "default_port")]
    port: u16,
    /// Whether values are reported as raw bytes or text.
    #[serde(default)]
    value_format: ValueFormat,
    /// Single ASCII byte that ends each value in the device framing.
    #[serde(default = "default_separator")]
    separator: char,
    /// Send `start_of_experiment` to the first peer on the termination port.
    #[serde(default)]
    handshake: bool,
    /// Wait between accept polls on the termination port.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "accept_poll_ms", default = "default_accept_poll")]
    accept_poll: Duration,
}

impl ReceiverConfig {
    /// Receiver configuration with defaults for everything but the devices
    /// and the rate.
    ///
    /// * `device_paths`: ordered measurement devices, e.g. /dev/ttyACM0.
    /// * `sample_frequency`: cycles per second.
    pub fn new(device_paths: Vec<String>, sample_frequency: f64) -> Self {
        Self {
            device_paths,
            sample_frequency,
            baud_rate: default_baud_rate(),
            port: default_port(),
            value_format: ValueFormat::default(),
            separator: default_separator(),
            handshake: false,
            accept_poll: default_accept_poll(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_value_format(mut self, value_format: ValueFormat) -> Self {
        self.value_format = value_format;
        self
    }

    pub fn with_handshake(mut self, handshake: bool) -> Self {
        self.handshake = handshake;
        self
    }

    pub fn with_separator(mut self, separator: char) -> Self {
        self.separator = separator;
        self
    }

    /// Build the config by reading a YAML file.
    ///
    /// * `filepath`: path to config.
    pub fn from_file<F: AsRef<OsStr>>(filepath: F) -> Result<Self> {
        from_yaml_file(filepath)
    }

    pub fn device_paths(&self) -> &[String] {
        &self.device_paths
    }

    pub fn value_format(&self) -> ValueFormat {
        self.value_format
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Validated sample frequency.
    pub fn frequency(&self) -> Result<SampleFrequency> {
        SampleFrequency::new(self.sample_frequency)
    }

    /// Validated separator byte.
    pub fn separator_byte(&self) -> Result<u8> {
        u8::try_from(self.separator)
            .ok()
            .filter(u8::is_ascii)
            .ok_or_else(|| {
                TestbedError::InvalidConfiguration(format!(
                    "separator {:?} must be a single ASCII character",
                    self.separator
                ))
            })
    }
}

/// Receiving side of an experiment. Starts the termination listener, then
/// samples its devices one cycle per `next` call until the listener reports
/// that the experiment has ended.
pub struct Receiver<D: DeviceChannel, V: SampleValue> {
    /// Unique identifier, used to tell runs apart in the logs.
    uuid: Uuid,
    sampler: Sampler<D, V>,
    termination: TerminationHandle,
    ended: ExperimentEndedFlag,
}

impl<V: SampleValue> Receiver<SerialDevice, V> {
    /// Build a receiver on real serial devices. The configuration is
    /// checked before the termination port is bound or any device is opened.
    ///
    /// * `config`: receiver parameters.
    pub fn from_config(config: &ReceiverConfig) -> Result<Self> {
        let frequency = config.frequency()?;
        let separator = config.separator_byte()?;
        let listener = TerminationListener::bind(
            ("0.0.0.0", config.port),
            config.accept_poll,
            config.handshake,
        )?;
        let devices = SerialDevice::open_all(&config.device_paths, config.baud_rate)?;
        Self::new(devices, frequency, separator, listener)
    }

    /// Build a receiver from a config file.
    ///
    /// * `filepath`: path to config file.
    pub fn from_config_file<F: AsRef<OsStr>>(filepath: F) -> Result<Self> {
        Self::from_config(&ReceiverConfig::from_file(filepath)?)
    }
}

impl<D: DeviceChannel, V: SampleValue> Receiver<D, V> {
    /// Assemble a receiver from already opened parts and start listening
    /// for the end of the experiment.
    ///
    /// * `devices`: measurement devices in sampling order.
    /// * `frequency`: target cycles per second.
    /// * `separator`: device framing separator.
    /// * `listener`: bound termination listener.
    pub fn new(
        devices: Vec<D>,
        frequency: SampleFrequency,
        separator: u8,
        listener: TerminationListener,
    ) -> Result<Self> {
        let uuid = Uuid::new_v4();
        let ended = ExperimentEndedFlag::new();
        let termination = listener.spawn(ended.clone())?;
        info!(
            %uuid,
            devices = devices.len(),
            hz = frequency.hz(),
            termination = %termination.local_addr(),
            "receiver started"
        );

        Ok(Self {
            uuid,
            sampler: Sampler::new(devices, frequency, separator, ended.clone()),
            termination,
            ended,
        })
    }

    /// One sampling cycle: `(ended, values)` with one value per device.
    pub fn next(&mut self) -> Result<(bool, Vec<V>)> {
        self.sampler.next()
    }

    pub fn is_ended(&self) -> bool {
        self.ended.is_set()
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Where the termination listener is bound.
    pub fn termination_addr(&self) -> SocketAddr {
        self.termination.local_addr()
    }

    pub fn sampler(&self) -> &Sampler<D, V> {
        &self.sampler
    }

    /// Stop listening, if still armed, and wait for the listener thread.
    pub fn shutdown(self) -> Result<()> {
        info!(
            uuid = %self.uuid,
            cycles = self.sampler.cycles(),
            rate_misses = self.sampler.rate_misses(),
            ended = self.ended.is_set(),
            "receiver stopped"
        );
        self.termination.shutdown()
    }
}
