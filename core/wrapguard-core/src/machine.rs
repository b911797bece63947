use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// One of the two wrapping machines this supervisor watches. The set is
/// closed and the member is immutable for the lifetime of every stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MachineId {
    A,
    B,
}

impl MachineId {
    pub const ALL: [MachineId; 2] = [MachineId::A, MachineId::B];

    /// Directory-safe label used for capture paths, e.g. `MachineA`.
    pub fn folder_label(self) -> &'static str {
        match self {
            MachineId::A => "MachineA",
            MachineId::B => "MachineB",
        }
    }
}

impl fmt::Display for MachineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MachineId::A => write!(f, "A"),
            MachineId::B => write!(f, "B"),
        }
    }
}

impl FromStr for MachineId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "A" | "a" => Ok(MachineId::A),
            "B" | "b" => Ok(MachineId::B),
            other => Err(CoreError::InvalidMachineId(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_both_members() {
        assert_eq!("A".parse::<MachineId>().unwrap(), MachineId::A);
        assert_eq!("b".parse::<MachineId>().unwrap(), MachineId::B);
    }

    #[test]
    fn rejects_anything_else() {
        assert!("C".parse::<MachineId>().is_err());
    }

    #[test]
    fn folder_labels_are_stable() {
        assert_eq!(MachineId::A.folder_label(), "MachineA");
        assert_eq!(MachineId::B.folder_label(), "MachineB");
    }
}
