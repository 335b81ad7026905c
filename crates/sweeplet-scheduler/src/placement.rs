//! Resource placement decisions

use rand::seq::SliceRandom;
use sweeplet_core::ResourceId;

/// Strategy for picking one resource among those tied at the minimum load
pub trait PlacementStrategy: Send + Sync {
    /// Choose from `tied`, which is never empty when called by the admission
    /// controller
    fn choose(&self, tied: &[ResourceId]) -> Option<ResourceId>;
}

/// Uniform random choice; the default
pub struct RandomTieBreak;

impl PlacementStrategy for RandomTieBreak {
    fn choose(&self, tied: &[ResourceId]) -> Option<ResourceId> {
        tied.choose(&mut rand::thread_rng()).copied()
    }
}

/// First resource in configuration order
pub struct FirstTieBreak;

impl PlacementStrategy for FirstTieBreak {
    fn choose(&self, tied: &[ResourceId]) -> Option<ResourceId> {
        tied.first().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_random_stays_within_tied() {
        let tied = [1, 4, 6];
        let mut seen = HashSet::new();
        for _ in 0..200 {
            let choice = RandomTieBreak.choose(&tied).unwrap();
            assert!(tied.contains(&choice));
            seen.insert(choice);
        }
        // 200 uniform draws over three ids miss one with negligible probability
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn test_first_tie_break() {
        assert_eq!(FirstTieBreak.choose(&[3, 0]), Some(3));
    }

    #[test]
    fn test_empty_tied() {
        assert_eq!(RandomTieBreak.choose(&[]), None);
        assert_eq!(FirstTieBreak.choose(&[]), None);
    }
}
