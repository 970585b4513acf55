//! Authoritative per-machine state.
//!
//! [`MachineRegistry`] is plain data: it performs no synchronization of its
//! own. The engine owns the only instance and applies every mutation from a
//! single task, so snapshots are always taken between mutations.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use laundry_proto::{MachineClass, SlotKey};
use serde::Serialize;
use thiserror::Error;

/// Errors from registry access.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The slot is not part of the configured bank.
    #[error("{class} {slot} is not configured ({count} {class}s available)")]
    OutOfRange {
        class: MachineClass,
        slot: u32,
        count: u32,
    },

    /// Remaining minutes must be a non-negative number that fits the counter.
    #[error("invalid remaining time {minutes} (must be between 0 and {max})")]
    InvalidValue { minutes: i64, max: u32 },
}

/// Number of configured slots per class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BankLayout {
    pub washers: u32,
    pub dryers: u32,
}

impl BankLayout {
    pub fn new(washers: u32, dryers: u32) -> Self {
        Self { washers, dryers }
    }

    pub fn count(&self, class: MachineClass) -> u32 {
        match class {
            MachineClass::Washer => self.washers,
            MachineClass::Dryer => self.dryers,
        }
    }

    /// Checks that a 1-based slot exists.
    pub fn check(&self, class: MachineClass, slot: u32) -> Result<(), RegistryError> {
        let count = self.count(class);
        if slot == 0 || slot > count {
            return Err(RegistryError::OutOfRange { class, slot, count });
        }
        Ok(())
    }
}

impl Default for BankLayout {
    fn default() -> Self {
        Self::new(10, 10)
    }
}

/// One machine and its remaining run time. Zero means free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MachineRecord {
    pub class: MachineClass,
    pub slot: u32,
    pub remaining_minutes: u32,
}

impl MachineRecord {
    pub fn key(&self) -> SlotKey {
        SlotKey::new(self.class, self.slot)
    }

    pub fn is_free(&self) -> bool {
        self.remaining_minutes == 0
    }
}

/// Slots whose remaining time changed, with their new values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    changes: BTreeMap<SlotKey, u32>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a new value for a slot, replacing any earlier one.
    pub fn record(&mut self, key: SlotKey, remaining_minutes: u32) {
        self.changes.insert(key, remaining_minutes);
    }

    /// Folds a later change set into this one. Later values win.
    pub fn merge(&mut self, later: ChangeSet) {
        self.changes.extend(later.changes);
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn get(&self, key: SlotKey) -> Option<u32> {
        self.changes.get(&key).copied()
    }

    pub fn clear(&mut self) {
        self.changes.clear();
    }
}

impl FromIterator<(SlotKey, u32)> for ChangeSet {
    fn from_iter<I: IntoIterator<Item = (SlotKey, u32)>>(iter: I) -> Self {
        Self {
            changes: iter.into_iter().collect(),
        }
    }
}

/// Immutable copy of every record at one instant.
#[derive(Debug, Clone, Serialize)]
pub struct RegistrySnapshot {
    records: Vec<MachineRecord>,
    taken_at: DateTime<Utc>,
}

impl RegistrySnapshot {
    /// All records, washers first, each class in slot order.
    pub fn records(&self) -> &[MachineRecord] {
        &self.records
    }

    pub fn class(&self, class: MachineClass) -> impl Iterator<Item = &MachineRecord> + '_ {
        self.records.iter().filter(move |r| r.class == class)
    }

    pub fn remaining(&self, key: SlotKey) -> Option<u32> {
        self.records
            .iter()
            .find(|r| r.key() == key)
            .map(|r| r.remaining_minutes)
    }

    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }

    /// Compares machine state only, ignoring when each snapshot was taken.
    pub fn same_state(&self, other: &RegistrySnapshot) -> bool {
        self.records == other.records
    }
}

/// The fixed bank of washers and dryers.
#[derive(Debug, Clone)]
pub struct MachineRegistry {
    layout: BankLayout,
    washers: Vec<MachineRecord>,
    dryers: Vec<MachineRecord>,
}

impl MachineRegistry {
    /// Creates every configured slot, all free.
    pub fn new(layout: BankLayout) -> Self {
        let bank = |class: MachineClass| {
            (1..=layout.count(class))
                .map(|slot| MachineRecord {
                    class,
                    slot,
                    remaining_minutes: 0,
                })
                .collect()
        };
        Self {
            layout,
            washers: bank(MachineClass::Washer),
            dryers: bank(MachineClass::Dryer),
        }
    }

    pub fn layout(&self) -> BankLayout {
        self.layout
    }

    pub fn get(&self, class: MachineClass, slot: u32) -> Result<u32, RegistryError> {
        self.layout.check(class, slot)?;
        Ok(self.bank(class)[slot as usize - 1].remaining_minutes)
    }

    /// Overwrites a slot's remaining time.
    ///
    /// Returns the change, which is empty when the value was already set.
    pub fn set_remaining(
        &mut self,
        class: MachineClass,
        slot: u32,
        minutes: i64,
    ) -> Result<ChangeSet, RegistryError> {
        self.layout.check(class, slot)?;
        let minutes = u32::try_from(minutes).map_err(|_| RegistryError::InvalidValue {
            minutes,
            max: u32::MAX,
        })?;

        let record = &mut self.bank_mut(class)[slot as usize - 1];
        let mut changes = ChangeSet::new();
        if record.remaining_minutes != minutes {
            record.remaining_minutes = minutes;
            changes.record(record.key(), minutes);
        }
        Ok(changes)
    }

    /// Ages every running machine by `delta_minutes`, flooring at zero.
    ///
    /// Free machines are untouched and never appear in the result.
    pub fn apply_decay(&mut self, delta_minutes: u32) -> ChangeSet {
        let mut changes = ChangeSet::new();
        if delta_minutes == 0 {
            return changes;
        }
        for record in self.washers.iter_mut().chain(self.dryers.iter_mut()) {
            if record.remaining_minutes > 0 {
                record.remaining_minutes = record.remaining_minutes.saturating_sub(delta_minutes);
                changes.record(record.key(), record.remaining_minutes);
            }
        }
        changes
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            records: self.washers.iter().chain(&self.dryers).copied().collect(),
            taken_at: Utc::now(),
        }
    }

    fn bank(&self, class: MachineClass) -> &[MachineRecord] {
        match class {
            MachineClass::Washer => &self.washers,
            MachineClass::Dryer => &self.dryers,
        }
    }

    fn bank_mut(&mut self, class: MachineClass) -> &mut [MachineRecord] {
        match class {
            MachineClass::Washer => &mut self.washers,
            MachineClass::Dryer => &mut self.dryers,
        }
    }
}
