//! Process-wide execution phase.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Phase of the host process, advanced monotonically by the loader.
///
/// `BOOT -> INIT -> CONFIG -> RUN -> STOP`. A phase is never revisited.
/// Before `Run`, the bus buffers messages addressed to modules that have
/// not subscribed yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
#[repr(u8)]
pub enum ExecutionStep {
    Boot = 0,
    Init = 1,
    Config = 2,
    Run = 3,
    Stop = 4,
}

impl ExecutionStep {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Boot),
            1 => Some(Self::Init),
            2 => Some(Self::Config),
            3 => Some(Self::Run),
            4 => Some(Self::Stop),
            _ => None,
        }
    }

    /// Whether the host is still bootstrapping (buffered delivery allowed).
    pub fn is_before_run(self) -> bool {
        self < Self::Run
    }
}

impl fmt::Display for ExecutionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boot => write!(f, "BOOT"),
            Self::Init => write!(f, "INIT"),
            Self::Config => write!(f, "CONFIG"),
            Self::Run => write!(f, "RUN"),
            Self::Stop => write!(f, "STOP"),
        }
    }
}
