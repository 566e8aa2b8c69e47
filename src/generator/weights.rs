//! Weighted random action selection

use crate::error::ConfigError;
use crate::protocol::Action;
use rand::Rng;
use std::collections::BTreeMap;

/// Required total of all weights
pub const WEIGHT_TOTAL: u32 = 100;

/// Validated action → weight table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionWeights {
    entries: Vec<(Action, u32)>,
}

impl ActionWeights {
    /// Build a weight table; the weights must sum to exactly 100
    pub fn new(entries: impl IntoIterator<Item = (Action, u32)>) -> Result<Self, ConfigError> {
        let mut merged: BTreeMap<Action, u32> = BTreeMap::new();
        for (action, weight) in entries {
            *merged.entry(action).or_default() += weight;
        }
        let total: u32 = merged.values().sum();
        if total != WEIGHT_TOTAL {
            return Err(ConfigError::WeightSum { total });
        }
        Ok(Self {
            entries: merged.into_iter().filter(|(_, w)| *w > 0).collect(),
        })
    }

    /// Build from action names as found in a config file
    pub fn from_names(names: &BTreeMap<String, u32>) -> Result<Self, ConfigError> {
        let entries = names
            .iter()
            .map(|(name, weight)| name.parse::<Action>().map(|a| (a, *weight)))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(entries)
    }

    /// Weight of one action (0 when absent)
    pub fn weight(&self, action: Action) -> u32 {
        self.entries
            .iter()
            .find(|(a, _)| *a == action)
            .map(|(_, w)| *w)
            .unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Action, u32)> + '_ {
        self.entries.iter().copied()
    }
}

impl Default for ActionWeights {
    fn default() -> Self {
        Self {
            entries: vec![
                (Action::Mkdir, 5),
                (Action::Touch, 20),
                (Action::Stat, 15),
                (Action::List, 10),
                (Action::Read, 15),
                (Action::Write, 15),
                (Action::Delete, 5),
                (Action::Rename, 5),
                (Action::RenameExist, 5),
                (Action::Truncate, 5),
            ],
        }
    }
}

/// Cumulative weight table sampled by binary search
#[derive(Debug, Clone)]
pub struct WeightedChoice<T> {
    items: Vec<T>,
    cumulative: Vec<u32>,
}

impl<T: Copy> WeightedChoice<T> {
    /// Build from `(item, weight)` pairs; zero weights are dropped
    ///
    /// Returns `None` when every weight is zero.
    pub fn new(pairs: impl IntoIterator<Item = (T, u32)>) -> Option<Self> {
        let mut items = Vec::new();
        let mut cumulative = Vec::new();
        let mut running = 0u32;
        for (item, weight) in pairs {
            if weight == 0 {
                continue;
            }
            running += weight;
            items.push(item);
            cumulative.push(running);
        }
        if items.is_empty() {
            None
        } else {
            Some(Self { items, cumulative })
        }
    }

    /// Sum of all weights
    pub fn total(&self) -> u32 {
        self.cumulative.last().copied().unwrap_or(0)
    }

    /// Item owning `draw` in `[0, total)`
    pub fn pick(&self, draw: u32) -> T {
        let idx = self.cumulative.partition_point(|&c| c <= draw);
        self.items[idx.min(self.items.len() - 1)]
    }

    /// Draw uniformly and pick
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> T {
        self.pick(rng.gen_range(0..self.total()))
    }
}

impl WeightedChoice<Action> {
    pub fn from_weights(weights: &ActionWeights) -> Self {
        // ActionWeights guarantees a total of 100
        Self::new(weights.iter()).unwrap_or_else(|| Self {
            items: vec![Action::Mkdir],
            cumulative: vec![WEIGHT_TOTAL],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_default_weights_valid() {
        let defaults = ActionWeights::default();
        let total: u32 = defaults.iter().map(|(_, w)| w).sum();
        assert_eq!(total, WEIGHT_TOTAL);
        assert!(ActionWeights::new(defaults.iter()).is_ok());
    }

    #[test]
    fn test_weights_must_sum_to_100() {
        let err = ActionWeights::new([(Action::Mkdir, 50), (Action::Touch, 49)]).unwrap_err();
        assert!(matches!(err, ConfigError::WeightSum { total: 99 }));

        let err = ActionWeights::new([(Action::Mkdir, 60), (Action::Touch, 41)]).unwrap_err();
        assert!(matches!(err, ConfigError::WeightSum { total: 101 }));
    }

    #[test]
    fn test_from_names_rejects_unknown() {
        let mut names = BTreeMap::new();
        names.insert("mkdir".to_string(), 50);
        names.insert("symlink".to_string(), 50);
        let err = ActionWeights::from_names(&names).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownAction { .. }));
    }

    #[test]
    fn test_pick_boundaries() {
        let choice = WeightedChoice::new([('a', 1), ('b', 4), ('c', 0), ('d', 5)]).unwrap();
        assert_eq!(choice.total(), 10);
        assert_eq!(choice.pick(0), 'a');
        assert_eq!(choice.pick(1), 'b');
        assert_eq!(choice.pick(4), 'b');
        assert_eq!(choice.pick(5), 'd');
        assert_eq!(choice.pick(9), 'd');
    }

    #[test]
    fn test_all_zero_weights() {
        assert!(WeightedChoice::new([('a', 0)]).is_none());
    }

    #[test]
    fn test_sampling_follows_weights() {
        let weights = ActionWeights::new([(Action::Touch, 90), (Action::Stat, 10)]).unwrap();
        let choice = WeightedChoice::from_weights(&weights);
        let mut rng = StdRng::seed_from_u64(42);
        let touches = (0..10_000)
            .filter(|_| choice.sample(&mut rng) == Action::Touch)
            .count();
        assert!((8_500..9_500).contains(&touches), "touches = {}", touches);
    }
}
