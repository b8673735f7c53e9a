//! Differences between consecutive cache revisions.
//!
//! A [`SerialDiff`] describes exactly the transition from one cache
//! revision to the next: the ROAs a client at the old serial has to add
//! and the ones it has to drop. Only the diff between the two most recent
//! revisions is ever kept around.

use log::debug;
use crate::payload::{Roa, RoaSet};
use crate::serial::Serial;


//------------ SerialDiff ----------------------------------------------------

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SerialDiff {
    pub old_serial: Serial,
    pub new_serial: Serial,
    pub announce: Vec<Roa>,
    pub withdraw: Vec<Roa>,
    pub has_changes: bool,
}

impl SerialDiff {
    /// Computes the diff leading from `old` to `new` at serial `serial`.
    ///
    /// Membership is by full-value equality, so the result does not depend
    /// on the order either set was built in. The new serial is always the
    /// increment of the old one, wrapping at `u32::MAX`.
    pub fn compute(new: &RoaSet, old: &RoaSet, serial: Serial) -> Self {
        let announce: Vec<Roa> = new.iter().filter(|roa| {
            !old.contains(roa)
        }).copied().collect();
        let withdraw: Vec<Roa> = old.iter().filter(|roa| {
            !new.contains(roa)
        }).copied().collect();
        let has_changes = !announce.is_empty() || !withdraw.is_empty();
        debug!(
            "diff {} -> {}: {} to announce, {} to withdraw",
            serial, serial.next(), announce.len(), withdraw.len()
        );
        SerialDiff {
            old_serial: serial,
            new_serial: serial.next(),
            announce,
            withdraw,
            has_changes,
        }
    }
}


//============ Tests =========================================================
