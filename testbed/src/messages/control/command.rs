use serde::{Deserialize, Serialize};
use static_assertions::const_assert;
use strum::{EnumCount, IntoEnumIterator};
use strum_macros::{EnumCount as EnumCountMacro, EnumIter};

/// Spray heads fitted to the rig. The declaration order is the wire order:
/// a spray's ordinal is its bit position in a `SpraySet` and its character
/// position in an encoded spray mask. Only append new heads at the end.
#[derive(
    Serialize,
    Deserialize,
    EnumCountMacro,
    EnumIter,
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
)]
#[repr(u8)]
pub enum Spray {
    /// First spray head on the controller.
    #[serde(rename = "spray_1")]
    Spray1,
    /// Second spray head on the controller.
    #[serde(rename = "spray_2")]
    Spray2,
}

// SpraySet stores one bit per head.
const_assert!(Spray::COUNT <= u32::BITS as usize);

impl Spray {
    /// Position of the spray in the enumeration.
    pub fn ordinal(self) -> usize {
        self as usize
    }

    /// Look a spray up by its ordinal.
    pub fn from_ordinal(ordinal: usize) -> Option<Self> {
        Self::iter().nth(ordinal)
    }
}

/// Set of spray heads that fire together. Backed by a bit mask indexed by
/// `Spray::ordinal`, so iteration is always in declaration order.
#[derive(Serialize, Deserialize, Copy, Clone, Default, PartialEq, Eq, Hash)]
#[serde(from = "Vec<Spray>", into = "Vec<Spray>")]
pub struct SpraySet(u32);

impl SpraySet {
    /// A set with no sprays, legal for an `Emit` that only takes time.
    pub fn empty() -> Self {
        Self(0)
    }

    /// Every declared spray.
    pub fn all() -> Self {
        Spray::iter().collect()
    }

    pub fn insert(&mut self, spray: Spray) {
        self.0 |= 1 << spray.ordinal();
    }

    pub fn remove(&mut self, spray: Spray) {
        self.0 &= !(1 << spray.ordinal());
    }

    pub fn contains(&self, spray: Spray) -> bool {
        self.0 & (1 << spray.ordinal()) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Sprays in the set, in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = Spray> + '_ {
        Spray::iter().filter(move |spray| self.contains(*spray))
    }
}

impl std::fmt::Debug for SpraySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl From<Spray> for SpraySet {
    fn from(spray: Spray) -> Self {
        let mut set = Self::empty();
        set.insert(spray);
        set
    }
}

impl<const N: usize> From<[Spray; N]> for SpraySet {
    fn from(sprays: [Spray; N]) -> Self {
        sprays.into_iter().collect()
    }
}

impl From<Vec<Spray>> for SpraySet {
    fn from(sprays: Vec<Spray>) -> Self {
        sprays.into_iter().collect()
    }
}

impl From<SpraySet> for Vec<Spray> {
    fn from(set: SpraySet) -> Self {
        set.iter().collect()
    }
}

impl FromIterator<Spray> for SpraySet {
    fn from_iter<I: IntoIterator<Item = Spray>>(iter: I) -> Self {
        let mut set = Self::empty();
        for spray in iter {
            set.insert(spray);
        }
        set
    }
}

/// A single step of a controller program. The variant set is closed; the
/// codec matches on it exhaustively.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// Open the given sprays together for `duration_ms`.
    Emit { sprays: SpraySet, duration_ms: u32 },
    /// Do nothing for `duration_ms`.
    Wait { duration_ms: u32 },
    /// Set the fan speed.
    SetFanRpm { rpm: u32 },
}

/// Ordered program handed to the controller. Commands are appended while the
/// program is being built and read, never changed, by the codec.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(transparent)]
pub struct CommandSequence {
    commands: Vec<Command>,
}

impl CommandSequence {
    /// Start an empty program.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an `Emit`.
    ///
    /// * `sprays`: heads to open, anything that converts into a `SpraySet`.
    /// * `duration_ms`: how long the heads stay open.
    pub fn emit(&mut self, sprays: impl Into<SpraySet>, duration_ms: u32) -> &mut Self {
        self.commands.push(Command::Emit {
            sprays: sprays.into(),
            duration_ms,
        });
        self
    }

    /// Append a `Wait`.
    pub fn wait(&mut self, duration_ms: u32) -> &mut Self {
        self.commands.push(Command::Wait { duration_ms });
        self
    }

    /// Append a `SetFanRpm`.
    pub fn set_fan_rpm(&mut self, rpm: u32) -> &mut Self {
        self.commands.push(Command::SetFanRpm { rpm });
        self
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Command> {
        self.commands.iter()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Total time the sprays are open, in milliseconds.
    pub fn emit_time(&self) -> u64 {
        self.commands
            .iter()
            .map(|command| match command {
                Command::Emit { duration_ms, .. } => u64::from(*duration_ms),
                Command::Wait { .. } | Command::SetFanRpm { .. } => 0,
            })
            .sum()
    }

    /// Time the controller needs to run the whole program, in milliseconds.
    /// Fan changes are treated as instantaneous.
    pub fn execution_time(&self) -> u64 {
        let waits: u64 = self
            .commands
            .iter()
            .map(|command| match command {
                Command::Wait { duration_ms } => u64::from(*duration_ms),
                Command::Emit { .. } | Command::SetFanRpm { .. } => 0,
            })
            .sum();
        self.emit_time() + waits
    }
}

impl From<Vec<Command>> for CommandSequence {
    fn from(commands: Vec<Command>) -> Self {
        Self { commands }
    }
}

impl<'a> IntoIterator for &'a CommandSequence {
    type Item = &'a Command;
    type IntoIter = std::slice::Iter<'a, Command>;

    fn into_iter(self) -> Self::IntoIter {
        self.commands.iter()
    }
}
