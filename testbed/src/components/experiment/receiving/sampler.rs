use crate::{
    devices::{hardware::serial::DeviceChannel, software::termination::ExperimentEndedFlag},
    error::{RateMissed, Result, TestbedError},
};
use serde::{Deserialize, Serialize};
use std::{
    io::{self, Read},
    marker::PhantomData,
    time::{Duration, Instant},
};
use tracing::{debug, warn};

/// Bytes of record terminator (CR LF) between a record's separator and the
/// start of the next value.
const RECORD_TERMINATOR_LEN: usize = 2;

/// Separator the measurement sketches put after every value.
pub const DEFAULT_SEPARATOR: u8 = b',';

/// Target sampling rate in cycles per second. Always finite and positive,
/// with a period that fits in a `Duration`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleFrequency {
    hz: f64,
    period: Duration,
}

impl SampleFrequency {
    /// * `hz`: cycles per second, must be finite and greater than zero.
    pub fn new(hz: f64) -> Result<Self> {
        let invalid = || {
            TestbedError::InvalidConfiguration(format!(
                "sample frequency must be a positive number of cycles per second \
                 with a representable period, got {hz}"
            ))
        };
        if !(hz.is_finite() && hz > 0.0) {
            return Err(invalid());
        }
        let period = Duration::try_from_secs_f64(1.0 / hz).map_err(|_| invalid())?;
        Ok(Self { hz, period })
    }

    pub fn hz(&self) -> f64 {
        self.hz
    }

    /// Target duration of one cycle.
    pub fn period(&self) -> Duration {
        self.period
    }
}

impl TryFrom<f64> for SampleFrequency {
    type Error = TestbedError;

    fn try_from(hz: f64) -> Result<Self> {
        Self::new(hz)
    }
}

/// How a record's payload is handed back to the caller.
#[derive(Deserialize, Serialize, Copy, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ValueFormat {
    /// The payload bytes untouched.
    Raw,
    /// The payload as UTF-8 text.
    #[default]
    Text,
}

/// Conversion from a record payload into the value a cycle reports.
pub trait SampleValue: Sized {
    /// * `device`: name of the device the payload came from, for errors.
    /// * `payload`: bytes between the two separators.
    fn from_payload(device: &str, payload: Vec<u8>) -> Result<Self>;
}

impl SampleValue for Vec<u8> {
    fn from_payload(_device: &str, payload: Vec<u8>) -> Result<Self> {
        Ok(payload)
    }
}

impl SampleValue for String {
    fn from_payload(device: &str, payload: Vec<u8>) -> Result<Self> {
        String::from_utf8(payload).map_err(|e| {
            TestbedError::device(device, io::Error::new(io::ErrorKind::InvalidData, e))
        })
    }
}

/// Read one record in the device's native framing:
///
/// ```text
/// ...<partial>SEP CR LF <payload> SEP
/// ```
///
/// Everything up to the first separator is the tail of a record that was
/// already in flight, so it is dropped along with the two terminator bytes
/// after it. The payload runs to the next separator, which is consumed.
pub fn read_record<R: Read + ?Sized>(reader: &mut R, separator: u8) -> io::Result<Vec<u8>> {
    read_until(reader, separator, &mut Vec::new())?;
    let mut terminator = [0u8; RECORD_TERMINATOR_LEN];
    reader.read_exact(&mut terminator)?;

    let mut payload = Vec::new();
    read_until(reader, separator, &mut payload)?;
    Ok(payload)
}

/// Collect bytes into `into` until `separator`, which is consumed but not stored.
fn read_until<R: Read + ?Sized>(
    reader: &mut R,
    separator: u8,
    into: &mut Vec<u8>,
) -> io::Result<()> {
    let mut byte = [0u8; 1];
    loop {
        match reader.read(&mut byte) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "device stream ended inside a record",
                ))
            }
            Ok(_) if byte[0] == separator => return Ok(()),
            Ok(_) => into.push(byte[0]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
}

/// Polls every device once per cycle and paces cycles to a target rate.
/// Blocking and not reentrant: drive it from one thread.
pub struct Sampler<D: DeviceChannel, V: SampleValue> {
    devices: Vec<D>,
    separator: u8,
    period: Duration,
    ended: ExperimentEndedFlag,
    cycles: u64,
    rate_misses: u64,
    last_miss: Option<RateMissed>,
    _value: PhantomData<fn() -> V>,
}

impl<D: DeviceChannel, V: SampleValue> Sampler<D, V> {
    /// * `devices`: read in this order every cycle.
    /// * `frequency`: target cycles per second.
    /// * `separator`: field separator of the device framing.
    /// * `ended`: flag reported with every cycle.
    pub fn new(
        devices: Vec<D>,
        frequency: SampleFrequency,
        separator: u8,
        ended: ExperimentEndedFlag,
    ) -> Self {
        Self {
            devices,
            separator,
            period: frequency.period(),
            ended,
            cycles: 0,
            rate_misses: 0,
            last_miss: None,
            _value: PhantomData,
        }
    }

    /// Run one cycle: read a fresh record from every device, sleep out the
    /// rest of the period, then report whether the experiment has ended
    /// along with the values. A device error ends the cycle and is returned.
    pub fn next(&mut self) -> Result<(bool, Vec<V>)> {
        let started = Instant::now();

        let mut values = Vec::with_capacity(self.devices.len());
        for device in &mut self.devices {
            values.push(Self::sample(device, self.separator)?);
        }

        let elapsed = started.elapsed();
        match self.period.checked_sub(elapsed) {
            Some(remaining) if !remaining.is_zero() => std::thread::sleep(remaining),
            _ => {
                let miss = RateMissed {
                    elapsed,
                    period: self.period,
                };
                warn!(cycle = self.cycles, "{miss}");
                self.rate_misses += 1;
                self.last_miss = Some(miss);
            }
        }

        self.cycles += 1;
        let ended = self.ended.is_set();
        debug!(cycle = self.cycles, ended, devices = values.len(), ?elapsed, "sampled");
        Ok((ended, values))
    }

    fn sample(device: &mut D, separator: u8) -> Result<V> {
        device
            .discard_stale()
            .and_then(|()| read_record(device, separator))
            .map_err(|e| TestbedError::device(device.name(), e))
            .and_then(|payload| V::from_payload(device.name(), payload))
    }

    /// Target duration of a cycle.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Cycles completed so far.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Cycles that overran their period.
    pub fn rate_misses(&self) -> u64 {
        self.rate_misses
    }

    pub fn last_miss(&self) -> Option<RateMissed> {
        self.last_miss
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::hardware::mock::MockDevice;
    use rstest::rstest;
    use std::io::Cursor;

    fn sampler<V: SampleValue>(
        devices: Vec<MockDevice>,
        hz: f64,
    ) -> (Sampler<MockDevice, V>, ExperimentEndedFlag) {
        let ended = ExperimentEndedFlag::new();
        let sampler = Sampler::new(
            devices,
            SampleFrequency::new(hz).unwrap(),
            DEFAULT_SEPARATOR,
            ended.clone(),
        );
        (sampler, ended)
    }

    #[rstest]
    #[case(0.0)]
    #[case(-5.0)]
    #[case(f64::NAN)]
    #[case(f64::INFINITY)]
    #[case(1e-20)]
    #[case(f64::MIN_POSITIVE / 4.0)]
    fn test_frequency_rejects_unusable(#[case] hz: f64) {
        assert!(matches!(
            SampleFrequency::new(hz),
            Err(TestbedError::InvalidConfiguration(_))
        ));
    }

    #[rstest]
    #[case(5.0, Duration::from_millis(200))]
    #[case(0.5, Duration::from_secs(2))]
    #[case(1000.0, Duration::from_millis(1))]
    fn test_frequency_period(#[case] hz: f64, #[case] period: Duration) {
        assert_eq!(SampleFrequency::try_from(hz).unwrap().period(), period);
    }

    #[test]
    fn test_read_record_skips_partial_and_terminator() {
        let mut stream = Cursor::new(b"12,\r\n345,\r\n678,\r\n9,".to_vec());
        assert_eq!(read_record(&mut stream, b',').unwrap(), b"345");
        // The next read treats "\r\n678" as a partial record.
        assert_eq!(read_record(&mut stream, b',').unwrap(), b"9");
    }

    #[test]
    fn test_read_record_from_aligned_stream() {
        let mut stream = Cursor::new(b",\r\n-0.25;\r\n".to_vec());
        assert_eq!(
            read_record(&mut stream, b';').unwrap_err().kind(),
            io::ErrorKind::UnexpectedEof
        );

        let mut stream = Cursor::new(b";\r\n-0.25;\r\n".to_vec());
        assert_eq!(read_record(&mut stream, b';').unwrap(), b"-0.25");
    }

    #[test]
    fn test_read_record_truncated() {
        let mut stream = Cursor::new(b"7,\r\n81".to_vec());
        assert_eq!(
            read_record(&mut stream, b',').unwrap_err().kind(),
            io::ErrorKind::UnexpectedEof
        );
    }

    #[test]
    fn test_values_follow_device_order() {
        let devices = vec![
            MockDevice::new("first").with_burst(b"9,\r\n101,\r\n"),
            MockDevice::new("second").with_burst(b"3,\r\n202,\r\n"),
            MockDevice::new("third").with_burst(b"0,\r\n303,\r\n"),
        ];
        let (mut sampler, _) = sampler::<String>(devices, 1000.0);

        let (ended, values) = sampler.next().unwrap();
        assert!(!ended);
        assert_eq!(values, vec!["101", "202", "303"]);
        assert_eq!(sampler.cycles(), 1);
    }

    #[test]
    fn test_stale_input_is_discarded_each_cycle() {
        let device = MockDevice::new("probe")
            .with_pending(b"x,\r\nstale,")
            .with_burst(b"1,\r\nfresh,")
            .with_burst(b"2,\r\nfresher,");
        let (mut sampler, _) = sampler::<Vec<u8>>(vec![device], 1000.0);

        assert_eq!(sampler.next().unwrap().1, vec![b"fresh".to_vec()]);
        assert_eq!(sampler.next().unwrap().1, vec![b"fresher".to_vec()]);
    }

    #[test]
    fn test_no_devices_still_paced() {
        let (mut sampler, _) = sampler::<Vec<u8>>(Vec::new(), 20.0);
        let started = Instant::now();
        for _ in 0..3 {
            let (ended, values) = sampler.next().unwrap();
            assert!(!ended);
            assert!(values.is_empty());
        }
        assert!(started.elapsed() >= Duration::from_millis(145));
        assert_eq!(sampler.rate_misses(), 0);
    }

    #[test]
    fn test_cycles_spaced_by_period() {
        let device = MockDevice::new("probe")
            .with_burst(b"0,\r\n1,")
            .with_burst(b"0,\r\n2,")
            .with_burst(b"0,\r\n3,");
        let (mut sampler, _) = sampler::<String>(vec![device], 5.0);

        let mut stamps = Vec::new();
        for _ in 0..3 {
            sampler.next().unwrap();
            stamps.push(Instant::now());
        }
        for pair in stamps.windows(2) {
            // Allow a little scheduler jitter below the 200 ms period.
            assert!(pair[1] - pair[0] >= Duration::from_millis(190));
        }
        assert_eq!(sampler.rate_misses(), 0);
    }

    #[test]
    fn test_slow_device_reports_rate_miss() {
        let device = MockDevice::new("slow")
            .with_latency(Duration::from_millis(40))
            .with_burst(b"0,\r\n1,");
        let (mut sampler, _) = sampler::<String>(vec![device], 100.0);

        let started = Instant::now();
        let (_, values) = sampler.next().unwrap();
        let elapsed = started.elapsed();

        assert_eq!(values, vec!["1"]);
        // No sleep after the overrun.
        assert!(elapsed < Duration::from_millis(40) + Duration::from_millis(100));
        assert_eq!(sampler.rate_misses(), 1);
        let miss = sampler.last_miss().unwrap();
        assert_eq!(miss.period, Duration::from_millis(10));
        assert!(miss.elapsed >= Duration::from_millis(40));
    }

    #[test]
    fn test_ended_reported_after_flag_flips() {
        let device = MockDevice::new("probe")
            .with_burst(b"0,\r\n1,")
            .with_burst(b"0,\r\n2,")
            .with_burst(b"0,\r\n3,");
        let (mut sampler, ended) = sampler::<String>(vec![device], 1000.0);

        assert!(!sampler.next().unwrap().0);
        ended.set();
        assert_eq!(sampler.next().unwrap(), (true, vec!["2".to_string()]));
        assert!(sampler.next().unwrap().0);
    }

    #[test]
    fn test_device_failure_propagates() {
        let device = MockDevice::new("unplugged").failing_with(io::ErrorKind::BrokenPipe);
        let (mut sampler, _) = sampler::<String>(vec![device], 1000.0);

        match sampler.next() {
            Err(TestbedError::DeviceIoFailure { device, source }) => {
                assert_eq!(device, "unplugged");
                assert_eq!(source.kind(), io::ErrorKind::BrokenPipe);
            }
            other => panic!("expected DeviceIoFailure, got {other:?}"),
        }
        assert_eq!(sampler.cycles(), 0);
    }

    #[test]
    fn test_text_values_must_be_utf8() {
        let device = MockDevice::new("noisy").with_burst(b"0,\r\n\xff\xfe,");
        let (mut sampler, _) = sampler::<String>(vec![device], 1000.0);
        assert!(matches!(
            sampler.next(),
            Err(TestbedError::DeviceIoFailure { .. })
        ));
    }
}
