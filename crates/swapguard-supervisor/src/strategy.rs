//! Restart strategies

use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Which siblings restart together with a crashed process
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisionStrategy {
    /// Only the crashed process
    #[default]
    OneForOne,
    /// Every process
    OneForAll,
    /// The crashed process and every process registered after it
    RestForOne,
}

impl SupervisionStrategy {
    /// Registration indices restarted when process `crashed` of `len` fails
    #[must_use]
    pub fn affected(self, crashed: usize, len: usize) -> Range<usize> {
        match self {
            Self::OneForOne => crashed..crashed + 1,
            Self::OneForAll => 0..len,
            Self::RestForOne => crashed..len,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn affected_ranges() {
        assert_eq!(SupervisionStrategy::OneForOne.affected(1, 3), 1..2);
        assert_eq!(SupervisionStrategy::OneForAll.affected(1, 3), 0..3);
        assert_eq!(SupervisionStrategy::RestForOne.affected(1, 3), 1..3);
    }
}
