use super::mode::{CycleMode, EdgeSource};

/// Whether `code` was entered between two observations.
///
/// An unknown previous state never produces an edge; the first observation
/// only captures the state.
pub fn entered(last: Option<i64>, current: i64, code: i64) -> bool {
    matches!(last, Some(previous) if previous != code) && current == code
}

/// Cycle modes entered on `source` between `last` and `current`
pub fn edges(source: EdgeSource, last: Option<i64>, current: i64) -> Vec<CycleMode> {
    CycleMode::ALL
        .into_iter()
        .filter(|m| m.source() == source && entered(last, current, m.code()))
        .collect()
}
