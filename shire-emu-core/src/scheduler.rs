//! Hart scheduling: the `active`, `awaking`, and `sleeping` sets.
//!
//! Single-threaded cooperative model: one scheduler visits `active` and executes exactly one
//! instruction per hart per pass. External events move sleepers to `awaking`, a transient set
//! promoted to `active` at the start of the next pass, so wake-ups always take effect at an
//! instruction boundary.

use crate::hart::SchedSet;
use crate::topology::HartIndex;

/// The three scheduler sets. Membership is mirrored in each hart's `sched_set` tag so the
/// invariant "a hart is in exactly one set" can be enforced cheaply.
#[derive(Debug, Default)]
pub struct Scheduler {
    active: Vec<HartIndex>,
    awaking: Vec<HartIndex>,
    sleeping: Vec<HartIndex>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn set_mut(&mut self, set: SchedSet) -> &mut Vec<HartIndex> {
        match set {
            SchedSet::Active => &mut self.active,
            SchedSet::Awaking => &mut self.awaking,
            SchedSet::Sleeping => &mut self.sleeping,
            SchedSet::None => panic!("SchedSet::None has no backing set"),
        }
    }

    /// Moves `hart` (currently in `from`) into `to`. `from` must match the hart's tag.
    pub fn transfer(&mut self, hart: HartIndex, from: SchedSet, to: SchedSet) {
        if from == to {
            return;
        }
        if from != SchedSet::None {
            let set = self.set_mut(from);
            let position = set
                .iter()
                .position(|&h| h == hart)
                .expect("hart missing from its tagged scheduler set");
            set.swap_remove(position);
        }
        if to != SchedSet::None {
            self.set_mut(to).push(hart);
        }
    }

    /// Snapshot of the active set for one pass.
    pub fn active_snapshot(&self) -> Vec<HartIndex> {
        self.active.clone()
    }

    /// Promotes every awaking hart to active, returning how many moved.
    pub fn promote_awaking(&mut self) -> usize {
        let count = self.awaking.len();
        self.active.append(&mut self.awaking);
        count
    }

    pub fn has_active(&self) -> bool {
        !self.active.is_empty() || !self.awaking.is_empty()
    }

    pub fn has_sleepers(&self) -> bool {
        !self.sleeping.is_empty()
    }

    pub fn sleeping_snapshot(&self) -> Vec<HartIndex> {
        self.sleeping.clone()
    }

    pub fn clear(&mut self) {
        self.active.clear();
        self.awaking.clear();
        self.sleeping.clear();
    }

    #[cfg(test)]
    pub fn counts(&self) -> (usize, usize, usize) {
        (self.active.len(), self.awaking.len(), self.sleeping.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_and_promote() {
        let mut scheduler = Scheduler::new();
        let a = HartIndex::new(0, 0, 0);
        let b = HartIndex::new(0, 1, 0);
        scheduler.transfer(a, SchedSet::None, SchedSet::Active);
        scheduler.transfer(b, SchedSet::None, SchedSet::Sleeping);
        assert_eq!((1, 0, 1), scheduler.counts());
        scheduler.transfer(b, SchedSet::Sleeping, SchedSet::Awaking);
        assert_eq!((1, 1, 0), scheduler.counts());
        assert_eq!(1, scheduler.promote_awaking());
        assert_eq!((2, 0, 0), scheduler.counts());
    }

    #[test]
    #[should_panic(expected = "missing")]
    fn test_transfer_from_wrong_set_panics() {
        let mut scheduler = Scheduler::new();
        let a = HartIndex::new(0, 0, 0);
        scheduler.transfer(a, SchedSet::Sleeping, SchedSet::Active);
    }
}
