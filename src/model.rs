//! Simulation data types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identifier of a species within one run.
///
/// An index into the metacommunity abundance table. Only equality matters to
/// the simulation; the derived letter label exists for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SpeciesId(pub u32);

impl SpeciesId {
    /// Base-26 letter label (`AAA`, `AAB`, ...), at least three letters wide.
    pub fn label(&self) -> String {
        let mut letters = Vec::new();
        let mut rem = self.0;
        loop {
            letters.push((b'A' + (rem % 26) as u8) as char);
            rem /= 26;
            if rem == 0 {
                break;
            }
        }
        while letters.len() < 3 {
            letters.push('A');
        }
        letters.iter().rev().collect()
    }
}

impl fmt::Display for SpeciesId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Local community of fixed size.
///
/// An ordered sequence of individual records, each holding one species,
/// plus a count map maintained incrementally so richness stays cheap to
/// query. The length never changes after construction: deaths are always
/// immediately replaced.
#[derive(Clone, Serialize, Deserialize)]
pub struct Community {
    members: Vec<SpeciesId>,
    counts: BTreeMap<SpeciesId, u32>,
}

impl Community {
    pub fn new(members: Vec<SpeciesId>) -> Self {
        let mut counts = BTreeMap::new();
        for &id in &members {
            *counts.entry(id).or_insert(0) += 1;
        }
        Self { members, counts }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Number of distinct species currently present.
    pub fn richness(&self) -> usize {
        self.counts.len()
    }

    pub fn member(&self, pos: usize) -> SpeciesId {
        self.members[pos]
    }

    /// Species counts, zero-count species pruned.
    pub fn counts(&self) -> &BTreeMap<SpeciesId, u32> {
        &self.counts
    }

    /// Replace the individual at `pos` and return the species it held.
    pub fn replace(&mut self, pos: usize, id: SpeciesId) -> SpeciesId {
        let old = self.members[pos];
        self.members[pos] = id;

        let count = self
            .counts
            .get_mut(&old)
            .expect("count map covers every member");
        *count -= 1;
        if *count == 0 {
            self.counts.remove(&old);
        }
        *self.counts.entry(id).or_insert(0) += 1;

        old
    }
}

/// State of the simulation at a given step.
#[derive(Clone, Serialize, Deserialize)]
pub struct State {
    /// Number of steps performed so far.
    pub step: u64,

    /// Current local community.
    pub community: Community,
}

/// Single replacement event, sufficient for an external renderer to animate
/// the community without the core knowing about coordinates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StepEvent {
    pub step: u64,
    pub position: usize,
    pub died: SpeciesId,
    pub recruited: SpeciesId,
    pub immigrant: bool,
}

/// Record of the simulation over one save block.
///
/// Contains the per-step richness values of the block, the replacement
/// events (when event recording is enabled), the absorption flag and a
/// snapshot of the state at the end of the block.
#[derive(Serialize, Deserialize)]
pub struct Record {
    /// Step count at the end of the block.
    pub step: u64,

    /// Richness after each step of the block.
    pub richness: Vec<u32>,

    /// Replacement events of the block (empty unless enabled).
    pub events: Vec<StepEvent>,

    /// Community reached fixation at the end of this block.
    pub absorbed: bool,

    /// Snapshot at the end of the block.
    pub state: State,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_follow_base_26_order() {
        assert_eq!(SpeciesId(0).label(), "AAA");
        assert_eq!(SpeciesId(1).label(), "AAB");
        assert_eq!(SpeciesId(25).label(), "AAZ");
        assert_eq!(SpeciesId(26).label(), "ABA");
        assert_eq!(SpeciesId(676).label(), "BAA");
        assert_eq!(SpeciesId(17576).label(), "BAAA");
    }

    #[test]
    fn replace_maintains_counts() {
        let mut com = Community::new(vec![SpeciesId(0), SpeciesId(0), SpeciesId(1)]);
        assert_eq!(com.len(), 3);
        assert_eq!(com.richness(), 2);

        let old = com.replace(2, SpeciesId(0));
        assert_eq!(old, SpeciesId(1));
        assert_eq!(com.len(), 3);
        assert_eq!(com.richness(), 1);
        assert_eq!(com.counts()[&SpeciesId(0)], 3);
        assert!(!com.counts().contains_key(&SpeciesId(1)));

        let old = com.replace(0, SpeciesId(2));
        assert_eq!(old, SpeciesId(0));
        assert_eq!(com.richness(), 2);
        assert_eq!(com.counts()[&SpeciesId(0)], 2);
        assert_eq!(com.counts()[&SpeciesId(2)], 1);
    }
}
