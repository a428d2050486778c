//! Correction strategies and the ordered intrusiveness table.

use serde::{Deserialize, Serialize};

/// How drastically the next correction may change the artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Minimal patch to the failing lines.
    Conservative,
    /// Normal fix keeping structure and logic.
    Standard,
    /// Major changes allowed.
    Aggressive,
    /// Regenerate from scratch.
    Rewrite,
    /// Regenerate while keeping working fragments of the best prior attempt.
    Hybrid,
}

impl Strategy {
    pub const ALL: [Strategy; 5] = [
        Strategy::Conservative,
        Strategy::Standard,
        Strategy::Aggressive,
        Strategy::Rewrite,
        Strategy::Hybrid,
    ];

    /// Built-in directive text sent with correction requests.
    pub fn default_directive(&self) -> &'static str {
        match self {
            Strategy::Conservative => "Make minimal changes to fix only the critical errors.",
            Strategy::Standard => {
                "Fix the errors while maintaining the original code structure and logic."
            }
            Strategy::Aggressive => {
                "Fix the errors and improve the code significantly, even if it requires major changes."
            }
            Strategy::Rewrite => {
                "Completely rewrite the code to fix all issues while keeping the requested functionality."
            }
            Strategy::Hybrid => {
                "Regenerate the project, keeping the working fragments of the reference attempt and replacing the parts that keep failing."
            }
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Strategy::Conservative => "conservative",
            Strategy::Standard => "standard",
            Strategy::Aggressive => "aggressive",
            Strategy::Rewrite => "rewrite",
            Strategy::Hybrid => "hybrid",
        };
        write!(f, "{s}")
    }
}

/// One row of the intrusiveness table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyEntry {
    pub strategy: Strategy,
    pub directive: String,
}

/// Strategies ordered by increasing intrusiveness.
///
/// Escalation moves along table positions. The last non-`Hybrid` entry is the
/// hold point; `Hybrid`, when present, must be the final entry and is only
/// reachable from the hold point under stagnation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StrategyTable {
    entries: Vec<StrategyEntry>,
}

impl Default for StrategyTable {
    fn default() -> Self {
        Self {
            entries: Strategy::ALL
                .iter()
                .map(|s| StrategyEntry {
                    strategy: *s,
                    directive: s.default_directive().to_string(),
                })
                .collect(),
        }
    }
}

impl StrategyTable {
    pub fn new(entries: Vec<StrategyEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[StrategyEntry] {
        &self.entries
    }

    /// Intrusiveness rank of a strategy (its table position).
    pub fn rank(&self, strategy: Strategy) -> Option<usize> {
        self.entries.iter().position(|e| e.strategy == strategy)
    }

    pub fn directive(&self, strategy: Strategy) -> &str {
        self.entries
            .iter()
            .find(|e| e.strategy == strategy)
            .map(|e| e.directive.as_str())
            .unwrap_or_else(|| strategy.default_directive())
    }

    /// First (least intrusive) strategy.
    pub fn first(&self) -> Strategy {
        self.entries
            .first()
            .map(|e| e.strategy)
            .unwrap_or(Strategy::Conservative)
    }

    /// Rank of the last non-hybrid entry.
    pub fn hold_rank(&self) -> usize {
        self.entries
            .iter()
            .rposition(|e| e.strategy != Strategy::Hybrid)
            .unwrap_or(0)
    }

    pub fn hybrid_rank(&self) -> Option<usize> {
        self.rank(Strategy::Hybrid)
    }

    pub fn at(&self, rank: usize) -> Option<Strategy> {
        self.entries.get(rank).map(|e| e.strategy)
    }

    /// Check structural invariants; returns a reason on failure.
    pub fn check(&self) -> std::result::Result<(), String> {
        if self.entries.is_empty() {
            return Err("strategy table must not be empty".to_string());
        }
        for (i, entry) in self.entries.iter().enumerate() {
            if self.entries[..i].iter().any(|e| e.strategy == entry.strategy) {
                return Err(format!("strategy {} listed twice", entry.strategy));
            }
            if entry.strategy == Strategy::Hybrid && i + 1 != self.entries.len() {
                return Err("hybrid must be the last strategy in the table".to_string());
            }
        }
        if self.entries.iter().all(|e| e.strategy == Strategy::Hybrid) {
            return Err("strategy table needs at least one non-hybrid strategy".to_string());
        }
        Ok(())
    }
}
