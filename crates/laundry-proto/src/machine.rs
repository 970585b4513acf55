//! Machine addressing.
//!
//! A machine is identified by its [`MachineClass`] and a 1-based slot number
//! that is stable for the lifetime of the process.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The two kinds of machine in the laundry room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MachineClass {
    Washer,
    Dryer,
}

impl MachineClass {
    /// Every class, in display order.
    pub const ALL: [MachineClass; 2] = [MachineClass::Washer, MachineClass::Dryer];

    /// Lowercase wire name, as used in topics and commands.
    pub fn as_str(self) -> &'static str {
        match self {
            MachineClass::Washer => "washer",
            MachineClass::Dryer => "dryer",
        }
    }

    /// Capitalized singular label ("Washer").
    pub fn label(self) -> &'static str {
        match self {
            MachineClass::Washer => "Washer",
            MachineClass::Dryer => "Dryer",
        }
    }

    /// Capitalized plural label ("Washers"), used for section headers.
    pub fn plural_label(self) -> &'static str {
        match self {
            MachineClass::Washer => "Washers",
            MachineClass::Dryer => "Dryers",
        }
    }
}

impl fmt::Display for MachineClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A class name outside {washer, dryer}.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown machine class '{0}' (expected washer or dryer)")]
pub struct ParseClassError(pub String);

impl FromStr for MachineClass {
    type Err = ParseClassError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("washer") {
            Ok(MachineClass::Washer)
        } else if s.eq_ignore_ascii_case("dryer") {
            Ok(MachineClass::Dryer)
        } else {
            Err(ParseClassError(s.to_string()))
        }
    }
}

/// A (class, slot) pair. `slot` is 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlotKey {
    pub class: MachineClass,
    pub slot: u32,
}

impl SlotKey {
    pub fn new(class: MachineClass, slot: u32) -> Self {
        Self { class, slot }
    }

    pub fn washer(slot: u32) -> Self {
        Self::new(MachineClass::Washer, slot)
    }

    pub fn dryer(slot: u32) -> Self {
        Self::new(MachineClass::Dryer, slot)
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.class, self.slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_parses_case_insensitively() {
        assert_eq!("washer".parse::<MachineClass>(), Ok(MachineClass::Washer));
        assert_eq!("DRYER".parse::<MachineClass>(), Ok(MachineClass::Dryer));
        assert_eq!("Washer".parse::<MachineClass>(), Ok(MachineClass::Washer));
    }

    #[test]
    fn class_rejects_unknown_names() {
        let err = "ironer".parse::<MachineClass>().unwrap_err();
        assert_eq!(err, ParseClassError("ironer".to_string()));
        assert!(err.to_string().contains("ironer"));
    }

    #[test]
    fn slot_keys_order_washers_before_dryers() {
        let mut keys = vec![SlotKey::dryer(1), SlotKey::washer(2), SlotKey::washer(1)];
        keys.sort();
        assert_eq!(
            keys,
            vec![SlotKey::washer(1), SlotKey::washer(2), SlotKey::dryer(1)]
        );
    }

    #[test]
    fn class_serializes_lowercase() {
        let json = serde_json::to_string(&SlotKey::washer(3)).unwrap();
        assert_eq!(json, r#"{"class":"washer","slot":3}"#);
    }
}
