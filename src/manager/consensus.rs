//! Threshold consensus over per-nameserver status rows.
//!
//! A pure function of the current record set; callers recompute it every time
//! a row changes.

use super::serial::{serial_gte, sort_newest_first};
use crate::model::Status;
use crate::pool::required_successes;
use crate::status::StatusRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consensus {
    /// Enough nameservers converged; `serial` is held by at least `required` of them
    Success { serial: u32 },
    /// The threshold can no longer be reached
    Error { serial: u32 },
    /// Still undecided
    Pending {
        successes: usize,
        required: usize,
        outstanding: usize,
    },
}

impl Consensus {
    pub fn status(&self) -> Status {
        match self {
            Consensus::Success { .. } => Status::Success,
            Consensus::Error { .. } => Status::Error,
            Consensus::Pending { .. } => Status::Pending,
        }
    }

    pub fn is_final(&self) -> bool {
        !matches!(self, Consensus::Pending { .. })
    }
}

/// Evaluate `records` for a pool of `total` nameservers.
///
/// Nameservers without a row, or whose row is PENDING, count as outstanding.
/// A SUCCESS row whose serial is behind `expected_serial` counts as a failure.
/// A SUCCESS row without a serial (a confirmed DELETE) counts as holding
/// `expected_serial`.
pub fn evaluate(
    records: &[StatusRecord],
    total: usize,
    threshold_percentage: u8,
    expected_serial: u32,
) -> Consensus {
    let required = required_successes(total, threshold_percentage);
    if required == 0 {
        return Consensus::Success {
            serial: expected_serial,
        };
    }

    let mut success_serials: Vec<u32> = records
        .iter()
        .filter(|r| r.status == Status::Success)
        .map(|r| r.serial.unwrap_or(expected_serial))
        .filter(|s| serial_gte(*s, expected_serial))
        .collect();
    let successes = success_serials.len();
    let settled = records.iter().filter(|r| r.status != Status::Pending).count();
    let errors = settled - successes;
    let outstanding = total.saturating_sub(successes + errors);

    if successes >= required {
        sort_newest_first(&mut success_serials, expected_serial);
        return Consensus::Success {
            serial: success_serials[required - 1],
        };
    }

    if successes + outstanding < required {
        return Consensus::Error {
            serial: expected_serial,
        };
    }

    Consensus::Pending {
        successes,
        required,
        outstanding,
    }
}
