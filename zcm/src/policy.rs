// SPDX-License-Identifier: GPL-3.0-only

//! Retention checks and victim selection
//!
//! Pure functions over clone counts; the manager feeds them its partitions.

use zcm_types::{CloneId, RetentionLimits};

use crate::error::{Result, ZcmError};

fn check(limit: &'static str, count: usize, max: Option<usize>) -> Result<()> {
    match max {
        Some(max) if count > max => Err(ZcmError::PolicyViolation { limit, count, max }),
        _ => Ok(()),
    }
}

/// Whether one more clone fits next to `newer` newer clones and `total` clones.
pub fn check_clone(newer: usize, total: usize, limits: &RetentionLimits) -> Result<()> {
    check("newer", newer + 1, limits.max_newer)?;
    check("total", total + 1, limits.max_total)
}

/// Whether activating a clone with `older` clones before it and `newer` after
/// it respects the limits.
pub fn check_activate(
    older: usize,
    newer: usize,
    total: usize,
    limits: &RetentionLimits,
) -> Result<()> {
    check("older", older, limits.max_older)?;
    check("newer", newer, limits.max_newer)?;
    check("total", total, limits.max_total)
}

/// The next clone retention removes, or `None` once every limit holds.
///
/// `older` and `newer` are the partitions around the active clone, in id
/// order. Newer clones go closest to the active one first.
pub fn next_victim(
    older: &[CloneId],
    newer: &[CloneId],
    limits: &RetentionLimits,
) -> Result<Option<CloneId>> {
    if let Some(max) = limits.max_older
        && older.len() > max
    {
        return Ok(older.first().copied());
    }

    if let Some(max) = limits.max_newer
        && newer.len() > max
    {
        return Ok(newer.first().copied());
    }

    if let Some(max) = limits.max_total {
        let count = older.len() + newer.len() + 1;
        if count > max {
            return older
                .first()
                .or(newer.first())
                .copied()
                .map(Some)
                .ok_or(ZcmError::PolicyUnsatisfiable { count, max });
        }
    }

    Ok(None)
}
