use super::entity::WorldState;

/// Fixed ring of recent world states indexed by `tick % capacity`.
#[derive(Debug)]
pub struct SnapshotHistory {
    slots: Vec<Option<WorldState>>,
    latest_tick: Option<u32>,
}

impl SnapshotHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity.max(1)],
            latest_tick: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn push(&mut self, state: WorldState) {
        let index = state.tick as usize % self.slots.len();
        let tick = state.tick;
        self.slots[index] = Some(state);
        if self
            .latest_tick
            .is_none_or(|latest| crate::net::sequence_greater_than(tick, latest))
        {
            self.latest_tick = Some(tick);
        }
    }

    /// The state for `tick`, if it has not been overwritten yet.
    pub fn get(&self, tick: u32) -> Option<&WorldState> {
        self.slots[tick as usize % self.slots.len()]
            .as_ref()
            .filter(|state| state.tick == tick)
    }

    pub fn latest(&self) -> Option<&WorldState> {
        self.latest_tick.and_then(|tick| self.get(tick))
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.latest_tick = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_by_tick() {
        let mut history = SnapshotHistory::new(4);
        for tick in 10..14 {
            history.push(WorldState::new(tick));
        }

        assert_eq!(history.get(11).map(|s| s.tick), Some(11));
        assert_eq!(history.latest().map(|s| s.tick), Some(13));
    }

    #[test]
    fn test_overwritten_tick_is_gone() {
        let mut history = SnapshotHistory::new(4);
        for tick in 0..6 {
            history.push(WorldState::new(tick));
        }

        assert!(history.get(1).is_none());
        assert!(history.get(5).is_some());
    }

    #[test]
    fn test_clear() {
        let mut history = SnapshotHistory::new(2);
        history.push(WorldState::new(1));
        history.clear();
        assert!(history.latest().is_none());
    }
}
