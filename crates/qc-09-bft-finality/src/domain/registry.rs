//! Validator vote bookkeeping
//!
//! Tracks, per validator, the first height its votes count for and the
//! highest height it has precommitted. Both survive validator-set rotation so
//! that a validator leaving and rejoining cannot replay old precommits.
//!
//! Announced sets wait in a schedule until the chain reaches the height
//! before they take effect. Headers below that height are still tallied
//! against the bookkeeping of the set governing them.

use crate::error::{BftError, BftResult};
use serde::{Deserialize, Serialize};
use shared_types::{short_hex, Address, ValidatorWeight};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// Vote bookkeeping for one validator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveValidatorVoteInfo {
    pub address: Address,
    /// First height at which this validator's votes are valid
    pub min_active_height: u32,
    /// Highest height this validator has precommitted. Never decreases
    /// while headers are applied; reverting a header rewinds it together
    /// with the votes that header cast.
    pub largest_height_precommit: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Entry {
    info: ActiveValidatorVoteInfo,
    /// Rotation height at which the validator left the active set
    deactivated_at: Option<u32>,
}

/// Bookkeeping as it was before one or more scheduled rotations ran.
///
/// Restoring it puts the rotations back in the schedule.
#[derive(Clone, Debug)]
pub(crate) struct RotationUndo {
    entries: BTreeMap<Address, Entry>,
    active: BTreeSet<Address>,
    applied: Vec<(u32, Vec<ValidatorWeight>)>,
}

impl RotationUndo {
    /// Combine with rotations that ran after `self` at the same tip.
    pub(crate) fn merge(mut self, later: RotationUndo) -> Self {
        self.applied.extend(later.applied);
        self
    }
}

/// Per-validator vote bookkeeping across validator-set changes.
#[derive(Clone, Debug, Default)]
pub struct ValidatorWeightRegistry {
    entries: BTreeMap<Address, Entry>,
    active: BTreeSet<Address>,
    /// Announced sets keyed by rotation height (effective height - 1)
    scheduled: BTreeMap<u32, Vec<ValidatorWeight>>,
}

impl ValidatorWeightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if `address` has bookkeeping and `height` is at or above its
    /// minimum active height.
    ///
    /// Set membership at `height` is a property of the parameters effective
    /// there, not of the registry.
    pub fn is_eligible_voter(&self, address: &Address, height: u32) -> bool {
        self.entries
            .get(address)
            .is_some_and(|e| height >= e.info.min_active_height)
    }

    /// Record a precommit by `address` for `height`.
    ///
    /// Returns `Ok(true)` if the largest precommitted height advanced and
    /// `Ok(false)` for re-delivery of the current largest height.
    pub fn record_precommit(&mut self, address: &Address, height: u32) -> BftResult<bool> {
        let entry = self
            .entries
            .get_mut(address)
            .ok_or(BftError::UnknownValidator { address: *address })?;
        let largest = entry.info.largest_height_precommit;
        if height < largest {
            return Err(BftError::StaleVote { height, largest });
        }
        if height == largest {
            return Ok(false);
        }
        entry.info.largest_height_precommit = height;
        Ok(true)
    }

    /// Install the validator set that governs heights after `rotation_height`.
    ///
    /// Validators that were not active before get
    /// `min_active_height = rotation_height + 1`. Validators that stay active
    /// are untouched. Everyone keeps `largest_height_precommit`.
    pub fn rotate(&mut self, validators: &[ValidatorWeight], rotation_height: u32) {
        let min_active_height = rotation_height.saturating_add(1);
        let incoming: BTreeSet<Address> = validators.iter().map(|v| v.address).collect();

        let mut activated = 0usize;
        for address in &incoming {
            if self.active.contains(address) {
                continue;
            }
            activated += 1;
            match self.entries.get_mut(address) {
                Some(entry) => {
                    entry.info.min_active_height = min_active_height;
                    entry.deactivated_at = None;
                    debug!(
                        "[qc-09] Validator {} reactivated from height {}",
                        short_hex(address),
                        min_active_height
                    );
                }
                None => {
                    self.entries.insert(
                        *address,
                        Entry {
                            info: ActiveValidatorVoteInfo {
                                address: *address,
                                min_active_height,
                                largest_height_precommit: rotation_height,
                            },
                            deactivated_at: None,
                        },
                    );
                }
            }
        }

        let mut deactivated = 0usize;
        for address in self.active.difference(&incoming) {
            if let Some(entry) = self.entries.get_mut(address) {
                entry.deactivated_at = Some(rotation_height);
                deactivated += 1;
            }
        }

        self.active = incoming;
        info!(
            "[qc-09] Validator set rotated at height {}: {} active, {} activated, {} deactivated",
            rotation_height,
            self.active.len(),
            activated,
            deactivated
        );
    }

    /// Queue `validators` to be installed once the tip reaches
    /// `rotation_height`. A later announcement for the same height replaces
    /// the earlier one.
    pub fn schedule(&mut self, validators: Vec<ValidatorWeight>, rotation_height: u32) {
        debug!(
            "[qc-09] Scheduled rotation to {} validators at height {}",
            validators.len(),
            rotation_height
        );
        self.scheduled.insert(rotation_height, validators);
    }

    /// Rotation heights still waiting for the chain, ascending.
    pub fn scheduled_rotations(&self) -> impl Iterator<Item = u32> + '_ {
        self.scheduled.keys().copied()
    }

    /// Run every scheduled rotation at or below `tip`, in height order.
    ///
    /// Returns what is needed to take them back, or `None` if nothing was
    /// due.
    pub(crate) fn rotate_due(&mut self, tip: u32) -> Option<RotationUndo> {
        let due = match tip.checked_add(1) {
            Some(next) => {
                let later = self.scheduled.split_off(&next);
                std::mem::replace(&mut self.scheduled, later)
            }
            None => std::mem::take(&mut self.scheduled),
        };
        if due.is_empty() {
            return None;
        }

        let mut undo = RotationUndo {
            entries: self.entries.clone(),
            active: self.active.clone(),
            applied: Vec::with_capacity(due.len()),
        };
        for (rotation_height, validators) in due {
            self.rotate(&validators, rotation_height);
            undo.applied.push((rotation_height, validators));
        }
        Some(undo)
    }

    /// Restore the bookkeeping from before `undo`'s rotations and put them
    /// back in the schedule.
    pub(crate) fn undo_rotation(&mut self, undo: RotationUndo) {
        self.entries = undo.entries;
        self.active = undo.active;
        for (rotation_height, validators) in undo.applied {
            debug!(
                "[qc-09] Rotation at height {} reverted; rescheduled",
                rotation_height
            );
            self.scheduled.insert(rotation_height, validators);
        }
    }

    /// Put `address`'s largest precommitted height back to `height` after
    /// the header that raised it was reverted.
    pub(crate) fn rewind_precommit(&mut self, address: &Address, height: u32) {
        if let Some(entry) = self.entries.get_mut(address) {
            entry.info.largest_height_precommit = height;
        }
    }

    /// Drop bookkeeping for validators that left the active set below
    /// `finalized_height`. Returns the number of entries removed.
    pub fn prune(&mut self, finalized_height: u32) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, e| e.deactivated_at.map_or(true, |h| h >= finalized_height));
        before - self.entries.len()
    }

    /// Copy with every `largest_height_precommit` capped at `ceiling`.
    ///
    /// Used as the scratch registry when replaying a window: precommits
    /// recorded for replayed heights must not make the replay drop them.
    pub fn with_precommits_capped(&self, ceiling: u32) -> Self {
        let mut scratch = self.clone();
        for entry in scratch.entries.values_mut() {
            let lhp = &mut entry.info.largest_height_precommit;
            *lhp = (*lhp).min(ceiling);
        }
        scratch
    }

    /// Raise every `largest_height_precommit` to at least the value in
    /// `other`. Never lowers anything.
    pub fn absorb_precommits(&mut self, other: &Self) {
        for (address, theirs) in &other.entries {
            if let Some(ours) = self.entries.get_mut(address) {
                let lhp = &mut ours.info.largest_height_precommit;
                *lhp = (*lhp).max(theirs.info.largest_height_precommit);
            }
        }
    }

    pub fn get(&self, address: &Address) -> Option<&ActiveValidatorVoteInfo> {
        self.entries.get(address).map(|e| &e.info)
    }

    pub fn is_active(&self, address: &Address) -> bool {
        self.active.contains(address)
    }

    /// Addresses of the current set, ascending.
    pub fn active_validators(&self) -> impl Iterator<Item = &Address> {
        self.active.iter()
    }

    /// All tracked validators, active or not.
    pub fn iter(&self) -> impl Iterator<Item = &ActiveValidatorVoteInfo> {
        self.entries.values().map(|e| &e.info)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
