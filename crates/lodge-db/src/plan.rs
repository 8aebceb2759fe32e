//! Pending-set computation. Pure functions over the unit list and the
//! ledger's applied versions; nothing here touches the database.

use std::collections::HashSet;

use lodge_common::{MigrationError, Result, VersionKey};

use crate::migrations::MigrationUnit;

/// Units must be declared in strictly ascending version order.
pub fn check_declared_order(units: &[MigrationUnit]) -> Result<()> {
    for pair in units.windows(2) {
        if pair[0].version >= pair[1].version {
            return Err(MigrationError::OutOfOrder(format!(
                "migration {} is declared after {}",
                pair[1].version, pair[0].version
            )));
        }
    }
    Ok(())
}

/// Number of leading units recorded in the ledger.
///
/// `applied` must be in ascending order. Fails when the applied set is not
/// exactly a prefix of `units`: a gap, or a version the list does not know.
pub fn applied_prefix(units: &[MigrationUnit], applied: &[VersionKey]) -> Result<usize> {
    let known: HashSet<&VersionKey> = units.iter().map(|u| &u.version).collect();
    if let Some(unknown) = applied.iter().find(|v| !known.contains(v)) {
        return Err(MigrationError::OutOfOrder(format!(
            "ledger contains version {unknown} which is not in the migration list"
        )));
    }

    for (i, version) in applied.iter().enumerate() {
        let expected = &units[i].version;
        if version != expected {
            return Err(MigrationError::OutOfOrder(format!(
                "migration {expected} is pending but later version {version} is already applied"
            )));
        }
    }
    Ok(applied.len())
}

/// The units to apply: everything after the applied prefix, optionally
/// stopping at `target` (inclusive).
pub fn pending<'u>(
    units: &'u [MigrationUnit],
    applied_count: usize,
    target: Option<&VersionKey>,
) -> Result<&'u [MigrationUnit]> {
    let end = match target {
        None => units.len(),
        Some(target) => {
            let idx = units
                .iter()
                .position(|u| &u.version == target)
                .ok_or_else(|| MigrationError::UnknownVersion(target.clone()))?;
            idx + 1
        }
    };
    if end <= applied_count {
        return Ok(&[]);
    }
    Ok(&units[applied_count..end])
}

/// The `steps` most recently applied units, newest first. Refuses up front
/// when any of them has no reverse action.
pub fn rollback_targets(
    units: &[MigrationUnit],
    applied_count: usize,
    steps: usize,
) -> Result<Vec<&MigrationUnit>> {
    let targets: Vec<&MigrationUnit> = units[..applied_count].iter().rev().take(steps).collect();
    if let Some(blocked) = targets.iter().find(|u| !u.is_reversible()) {
        return Err(MigrationError::IrreversibleUnit {
            version: blocked.version.clone(),
        });
    }
    Ok(targets)
}
