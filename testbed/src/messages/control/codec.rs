use crate::{
    error::{Result, TestbedError},
    messages::control::command::{Command, CommandSequence, Spray, SpraySet},
};
use strum::EnumCount;

/// Marker that opens a program on the controller's line.
pub const START_DELIMITER: &str = "start_delimiter";
/// Marker that closes a program on the controller's line.
pub const END_DELIMITER: &str = "end_delimiter";

const EMIT: &str = "emit";
const WAIT: &str = "wait";
const FAN: &str = "fan";

/// Text codec for the controller's line protocol. Every token sits on its
/// own line:
///
/// ```text
/// \n start_delimiter \n (emit \n <mask> \n <ms> | wait \n <ms> | fan \n <rpm>) \n ... end_delimiter \n
/// ```
///
/// The spray mask holds one `0`/`1` character per mask position, in
/// `Spray` declaration order. Its width is fixed by the codec, not by the
/// sprays in a given `Emit`, so the controller can read it without any
/// other context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineCodec {
    mask_width: usize,
}

impl Default for LineCodec {
    fn default() -> Self {
        Self {
            mask_width: Spray::COUNT,
        }
    }
}

impl LineCodec {
    /// Codec whose mask width is the number of declared sprays.
    pub fn new() -> Self {
        Self::default()
    }

    /// Codec for a controller that expects a wider mask than this build
    /// declares, for example firmware already wired for extra heads. The
    /// positions past the last declared spray always encode as `0`.
    ///
    /// * `mask_width`: characters per spray mask, at least `Spray::COUNT`.
    pub fn with_mask_width(mask_width: usize) -> Result<Self> {
        if mask_width < Spray::COUNT {
            return Err(TestbedError::InvalidConfiguration(format!(
                "spray mask width {mask_width} cannot hold {} declared sprays",
                Spray::COUNT
            )));
        }
        Ok(Self { mask_width })
    }

    pub fn mask_width(&self) -> usize {
        self.mask_width
    }

    /// Serialise a program into one payload. Total over `Command`, so it
    /// cannot fail, and the same program always gives the same bytes.
    pub fn encode(&self, sequence: &CommandSequence) -> String {
        let mut output = format!("\n{START_DELIMITER}\n");
        for command in sequence {
            self.encode_command(command, &mut output);
            output.push('\n');
        }
        output.push_str(END_DELIMITER);
        output.push('\n');
        output
    }

    fn encode_command(&self, command: &Command, output: &mut String) {
        match command {
            Command::Emit {
                sprays,
                duration_ms,
            } => {
                output.push_str(EMIT);
                output.push('\n');
                output.push_str(&self.encode_mask(sprays));
                output.push('\n');
                output.push_str(&duration_ms.to_string());
            }
            Command::Wait { duration_ms } => {
                output.push_str(WAIT);
                output.push('\n');
                output.push_str(&duration_ms.to_string());
            }
            Command::SetFanRpm { rpm } => {
                output.push_str(FAN);
                output.push('\n');
                output.push_str(&rpm.to_string());
            }
        }
    }

    fn encode_mask(&self, sprays: &SpraySet) -> String {
        (0..self.mask_width)
            .map(|position| match Spray::from_ordinal(position) {
                Some(spray) if sprays.contains(spray) => '1',
                _ => '0',
            })
            .collect()
    }

    /// Parse a payload back into a program. This is what the controller
    /// firmware does with the line, so it is strict: anything outside the
    /// grammar is a `MalformedFrame` naming the offending line.
    pub fn decode(&self, payload: &str) -> Result<CommandSequence> {
        let mut lines = Lines::new(payload);

        let (number, first) = lines.next_line()?;
        if !first.is_empty() {
            return Err(TestbedError::malformed(
                number,
                "payload must open with an empty line",
            ));
        }

        let (number, marker) = lines.next_line()?;
        if marker != START_DELIMITER {
            return Err(TestbedError::malformed(
                number,
                format!("expected `{START_DELIMITER}`, found `{marker}`"),
            ));
        }

        let mut sequence = CommandSequence::new();
        loop {
            let (number, keyword) = lines.next_line()?;
            match keyword {
                END_DELIMITER => break,
                EMIT => {
                    let sprays = self.decode_mask(lines.next_line()?)?;
                    let duration_ms = decode_number(lines.next_line()?)?;
                    sequence.emit(sprays, duration_ms);
                }
                WAIT => {
                    let duration_ms = decode_number(lines.next_line()?)?;
                    sequence.wait(duration_ms);
                }
                FAN => {
                    let rpm = decode_number(lines.next_line()?)?;
                    sequence.set_fan_rpm(rpm);
                }
                START_DELIMITER => {
                    return Err(TestbedError::malformed(
                        number,
                        format!("`{START_DELIMITER}` repeated before `{END_DELIMITER}`"),
                    ))
                }
                unknown => {
                    return Err(TestbedError::malformed(
                        number,
                        format!("unknown command `{unknown}`"),
                    ))
                }
            }
        }

        // The payload ends with a newline, so blank lines are all that may follow.
        for (number, line) in lines.rest() {
            if !line.is_empty() {
                return Err(TestbedError::malformed(
                    number,
                    format!("unexpected `{line}` after `{END_DELIMITER}`"),
                ));
            }
        }

        Ok(sequence)
    }

    fn decode_mask(&self, (number, mask): (usize, &str)) -> Result<SpraySet> {
        if mask.len() != self.mask_width {
            return Err(TestbedError::malformed(
                number,
                format!(
                    "spray mask `{mask}` has {} positions, expected {}",
                    mask.len(),
                    self.mask_width
                ),
            ));
        }

        let mut sprays = SpraySet::empty();
        for (position, flag) in mask.chars().enumerate() {
            match (flag, Spray::from_ordinal(position)) {
                ('0', _) => {}
                ('1', Some(spray)) => sprays.insert(spray),
                ('1', None) => {
                    return Err(TestbedError::malformed(
                        number,
                        format!("spray mask sets position {position}, which has no spray"),
                    ))
                }
                (other, _) => {
                    return Err(TestbedError::malformed(
                        number,
                        format!("spray mask character `{other}` is not 0 or 1"),
                    ))
                }
            }
        }
        Ok(sprays)
    }
}

/// Decimal, unsigned, no sign and no leading zeros other than `0` itself.
fn decode_number((number, field): (usize, &str)) -> Result<u32> {
    let canonical = !field.is_empty()
        && field.bytes().all(|byte| byte.is_ascii_digit())
        && (field == "0" || !field.starts_with('0'));
    if !canonical {
        return Err(TestbedError::malformed(
            number,
            format!("`{field}` is not a non-negative integer"),
        ));
    }
    field
        .parse::<u32>()
        .map_err(|e| TestbedError::malformed(number, format!("`{field}` is out of range: {e}")))
}

/// Line cursor that remembers 1-based line numbers for error reports.
struct Lines<'a> {
    inner: std::iter::Enumerate<std::str::Split<'a, char>>,
    last: usize,
}

impl<'a> Lines<'a> {
    fn new(payload: &'a str) -> Self {
        Self {
            inner: payload.split('\n').enumerate(),
            last: 0,
        }
    }

    fn next_line(&mut self) -> Result<(usize, &'a str)> {
        match self.inner.next() {
            Some((index, line)) => {
                self.last = index + 1;
                Ok((self.last, line))
            }
            None => Err(TestbedError::malformed(
                self.last + 1,
                format!("payload ended before `{END_DELIMITER}`"),
            )),
        }
    }

    fn rest(self) -> impl Iterator<Item = (usize, &'a str)> {
        self.inner.map(|(index, line)| (index + 1, line))
    }
}
