//! Domain-specific identifier newtypes.

use std::fmt;

/// A round number within an epoch. Monotonically increasing; one designated
/// leader may propose per view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct View(pub u64);

impl View {
    /// The genesis view of an epoch.
    pub const GENESIS: Self = View(0);

    /// The next view.
    pub fn next(self) -> Self {
        View(self.0 + 1)
    }

    /// The previous view, or None at genesis.
    pub fn prev(self) -> Option<Self> {
        self.0.checked_sub(1).map(View)
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "View({})", self.0)
    }
}

/// Epoch identifier. An epoch is a contiguous range of views governed by one
/// fixed validator set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct EpochId(pub u64);

impl EpochId {
    /// The first epoch.
    pub const GENESIS: Self = EpochId(0);

    /// The next epoch.
    pub fn next(self) -> Self {
        EpochId(self.0 + 1)
    }
}

impl fmt::Display for EpochId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Epoch({})", self.0)
    }
}

/// Cumulative count of committed transactions (the ledger accumulator
/// version). Strictly increasing across commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct StateVersion(pub u64);

impl StateVersion {
    /// Advance by a number of committed transactions.
    pub fn advanced_by(self, count: u64) -> Self {
        StateVersion(self.0 + count)
    }
}

impl fmt::Display for StateVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Validator identity within an epoch's committee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValidatorId(pub u64);

impl fmt::Display for ValidatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Validator({})", self.0)
    }
}
