use rand::Rng;
use rand_core::RngCore;
use thiserror::Error;

/// Weight given to every item entering a pool.
pub const INITIAL_WEIGHT: u32 = 1;

/// Errors that can occur while drawing from a [`WeightedPool`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// Nothing is left to draw from.
    #[error("Weighted pool is empty, nothing left to schedule")]
    PoolEmpty,
}

/// A pool of items, each carrying an integer weight that says how eagerly it
/// should still be explored.
///
/// Weights act as multiplicities: sampling draws from the multiset in which
/// every item appears `weight` times, without replacement, and reports each
/// distinct item once.
#[derive(Debug, Clone)]
pub struct WeightedPool<T> {
    entries: Vec<(T, u32)>,
}

impl<T: Clone + PartialEq> WeightedPool<T> {
    /// Creates a pool where every distinct item starts at [`INITIAL_WEIGHT`].
    pub fn new(items: impl IntoIterator<Item = T>) -> Self {
        let mut entries: Vec<(T, u32)> = Vec::new();
        for item in items {
            if !entries.iter().any(|(existing, _)| *existing == item) {
                entries.push((item, INITIAL_WEIGHT));
            }
        }
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, item: &T) -> bool {
        self.entries.iter().any(|(existing, _)| existing == item)
    }

    pub fn weight(&self, item: &T) -> Option<u32> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == item)
            .map(|(_, weight)| *weight)
    }

    pub fn items(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().map(|(item, _)| item)
    }

    /// Draws up to `amount` times from the weighted multiset without
    /// replacement and returns the distinct items in draw order.
    pub fn sample(&self, amount: usize, rng: &mut dyn RngCore) -> Result<Vec<T>, SchedulerError> {
        if self.entries.is_empty() {
            return Err(SchedulerError::PoolEmpty);
        }
        let mut remaining: Vec<u64> = self.entries.iter().map(|(_, w)| u64::from(*w)).collect();
        let mut total: u64 = remaining.iter().sum();
        let mut picked: Vec<usize> = Vec::with_capacity(amount);

        for _ in 0..amount {
            if total == 0 {
                break;
            }
            let mut ticket = rng.random_range(0..total);
            let mut index = 0;
            while ticket >= remaining[index] {
                ticket -= remaining[index];
                index += 1;
            }
            remaining[index] -= 1;
            total -= 1;
            if !picked.contains(&index) {
                picked.push(index);
            }
        }
        Ok(picked
            .into_iter()
            .map(|index| self.entries[index].0.clone())
            .collect())
    }

    /// Removes every item matching `predicate`, returning how many went.
    pub fn remove_where<F: FnMut(&T) -> bool>(&mut self, mut predicate: F) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(item, _)| !predicate(item));
        before - self.entries.len()
    }

    /// Rewrites every weight through `update`. Weights never drop below one.
    pub fn reweight<F: FnMut(&T, u32) -> u32>(&mut self, mut update: F) {
        for (item, weight) in self.entries.iter_mut() {
            *weight = update(item, *weight).max(1);
        }
    }
}
