//! Strategy selection over the attempt history.
//!
//! Escalation walks the configured table one step per failure, two steps when
//! the failure class repeats or the session is stagnant. It is capped at the
//! hold rank (the last non-hybrid entry) and never moves backwards. `Hybrid`
//! is entered only from the hold rank, and only under stagnation.

use crate::domain::{Strategy, StrategyTable};

use super::session::AttemptRecord;

/// Pick the strategy for the correction that follows the last attempt.
///
/// `history` holds every executed attempt, the most recent last, each tagged
/// with the strategy that produced its artifact.
pub fn select(history: &[AttemptRecord], stagnant: bool, table: &StrategyTable) -> Strategy {
    let first = table.first();
    let [.., previous, last] = history else {
        return first;
    };

    let hold = table.hold_rank();
    let current = table.rank(last.strategy).unwrap_or(0);

    if Some(current) == table.hybrid_rank() {
        return last.strategy;
    }
    if current >= hold {
        return match (stagnant, table.hybrid_rank()) {
            (true, Some(hybrid)) => table.at(hybrid).unwrap_or(last.strategy),
            _ => table.at(hold).unwrap_or(last.strategy),
        };
    }

    let repeated = last.diagnosis.kind() == previous.diagnosis.kind();
    let step = if repeated || stagnant { 2 } else { 1 };
    table
        .at((current + step).min(hold))
        .unwrap_or(last.strategy)
}
