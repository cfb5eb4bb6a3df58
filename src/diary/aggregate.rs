//! Daily totals computed from ledger entries.

use crate::diary::data::{DailyAggregate, LedgerEntry};
use std::collections::BTreeMap;

/// Sum every entry logged on `date`.
///
/// Dates are matched by exact string equality. A date with no entries gets
/// an all-zero aggregate.
pub fn aggregate(entries: &[LedgerEntry], date: &str) -> DailyAggregate {
    entries
        .iter()
        .filter(|entry| entry.date() == date)
        .fold(DailyAggregate::empty(date), |mut acc, entry| {
            acc.totals += entry.nutrients();
            acc.entry_count += 1;
            acc
        })
}

/// One aggregate per distinct date present in `entries`, ordered by date.
pub fn aggregate_all(entries: &[LedgerEntry]) -> Vec<DailyAggregate> {
    let mut by_date: BTreeMap<&str, DailyAggregate> = BTreeMap::new();
    for entry in entries {
        let acc = by_date
            .entry(entry.date())
            .or_insert_with(|| DailyAggregate::empty(entry.date()));
        acc.totals += entry.nutrients();
        acc.entry_count += 1;
    }
    by_date.into_values().collect()
}
