//! Bijection between dense index positions and stable fragment identifiers.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::core::errors::RagError;

#[derive(Debug, Clone, Default)]
pub struct IdentityMap {
    forward: Vec<String>,
    reverse: HashMap<String, usize>,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns the next free position to `fragment_id`.
    pub fn assign(&mut self, fragment_id: &str) -> Result<usize, RagError> {
        if self.reverse.contains_key(fragment_id) {
            return Err(RagError::DuplicateIdentifier(fragment_id.to_string()));
        }
        let position = self.forward.len();
        self.forward.push(fragment_id.to_string());
        self.reverse.insert(fragment_id.to_string(), position);
        Ok(position)
    }

    /// Checks that every id in `ids` could be assigned, without assigning any.
    pub fn check_assignable<'a, I>(&self, ids: I) -> Result<(), RagError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut seen = std::collections::HashSet::new();
        for id in ids {
            if self.reverse.contains_key(id) || !seen.insert(id) {
                return Err(RagError::DuplicateIdentifier(id.to_string()));
            }
        }
        Ok(())
    }

    pub fn forward_lookup(&self, position: usize) -> Result<&str, RagError> {
        self.forward
            .get(position)
            .map(String::as_str)
            .ok_or_else(|| RagError::NotFound(format!("dense position {position}")))
    }

    pub fn reverse_lookup(&self, fragment_id: &str) -> Result<usize, RagError> {
        self.reverse
            .get(fragment_id)
            .copied()
            .ok_or_else(|| RagError::NotFound(format!("fragment id {fragment_id}")))
    }

    pub fn contains(&self, fragment_id: &str) -> bool {
        self.reverse.contains_key(fragment_id)
    }

    pub fn next_free_position(&self) -> usize {
        self.forward.len()
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    pub fn to_record(&self, snapshot_id: &str) -> IdentityRecord {
        IdentityRecord {
            snapshot_id: snapshot_id.to_string(),
            forward: self
                .forward
                .iter()
                .enumerate()
                .map(|(pos, id)| (pos.to_string(), id.clone()))
                .collect(),
            reverse: self
                .reverse
                .iter()
                .map(|(id, pos)| (id.clone(), *pos))
                .collect(),
            next_position: self.next_free_position(),
        }
    }

    /// Rebuilds the map from its persisted form, rejecting anything that is
    /// not a dense bijection `0..next_position`.
    pub fn from_record(record: &IdentityRecord) -> Result<Self, RagError> {
        let size = record.forward.len();
        if record.reverse.len() != size {
            return Err(RagError::integrity(format!(
                "identity map forward has {size} entries, reverse has {}",
                record.reverse.len()
            )));
        }
        if record.next_position != size {
            return Err(RagError::integrity(format!(
                "identity map next position {} does not equal its size {size}",
                record.next_position
            )));
        }

        let mut slots: Vec<Option<String>> = vec![None; size];
        for (key, id) in &record.forward {
            let position: usize = key.parse().map_err(|_| {
                RagError::integrity(format!("identity map key {key:?} is not a position"))
            })?;
            let slot = slots.get_mut(position).ok_or_else(|| {
                RagError::integrity(format!("position {position} is outside 0..{size}"))
            })?;
            *slot = Some(id.clone());
        }

        let mut map = IdentityMap::new();
        for (position, slot) in slots.into_iter().enumerate() {
            let id = slot.ok_or_else(|| {
                RagError::integrity(format!("identity map has no entry for position {position}"))
            })?;
            if record.reverse.get(&id) != Some(&position) {
                return Err(RagError::integrity(format!(
                    "reverse mapping for {id} disagrees with forward position {position}"
                )));
            }
            map.assign(&id).map_err(RagError::integrity)?;
        }
        Ok(map)
    }
}

/// On-disk form of [`IdentityMap`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub snapshot_id: String,
    /// dense position (as a decimal string key) -> fragment id
    pub forward: BTreeMap<String, String>,
    /// fragment id -> dense position
    pub reverse: BTreeMap<String, usize>,
    pub next_position: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_of(ids: &[&str]) -> IdentityMap {
        let mut map = IdentityMap::new();
        for id in ids {
            map.assign(id).unwrap();
        }
        map
    }

    #[test]
    fn positions_are_sequential_from_zero() {
        let mut map = IdentityMap::new();
        assert_eq!(map.assign("a").unwrap(), 0);
        assert_eq!(map.assign("b").unwrap(), 1);
        assert_eq!(map.assign("c").unwrap(), 2);
        assert_eq!(map.next_free_position(), 3);
        assert_eq!(map.forward_lookup(1).unwrap(), "b");
        assert_eq!(map.reverse_lookup("c").unwrap(), 2);
    }

    #[test]
    fn duplicate_assignment_fails_without_consuming_a_position() {
        let mut map = map_of(&["a"]);
        let err = map.assign("a").unwrap_err();
        assert!(matches!(err, RagError::DuplicateIdentifier(id) if id == "a"));
        assert_eq!(map.assign("b").unwrap(), 1);
    }

    #[test]
    fn lookups_outside_domain_are_not_found() {
        let map = map_of(&["a"]);
        assert!(matches!(map.forward_lookup(1), Err(RagError::NotFound(_))));
        assert!(matches!(map.reverse_lookup("zz"), Err(RagError::NotFound(_))));
    }

    #[test]
    fn check_assignable_catches_duplicates_within_a_batch() {
        let map = map_of(&["a"]);
        assert!(map.check_assignable(["b", "c"]).is_ok());
        assert!(map.check_assignable(["b", "b"]).is_err());
        assert!(map.check_assignable(["a"]).is_err());
    }

    #[test]
    fn record_round_trip_restores_next_position() {
        let map = map_of(&["a", "b", "c"]);
        let record = map.to_record("snap");
        let restored = IdentityMap::from_record(&record).unwrap();
        assert_eq!(restored.next_free_position(), 3);
        assert_eq!(restored.forward_lookup(2).unwrap(), "c");
    }

    #[test]
    fn record_with_gap_is_rejected() {
        let mut record = map_of(&["a", "b"]).to_record("snap");
        record.forward.remove("1");
        record.forward.insert("5".to_string(), "b".to_string());
        assert!(matches!(
            IdentityMap::from_record(&record),
            Err(RagError::Integrity(_))
        ));
    }

    #[test]
    fn record_with_stale_counter_is_rejected() {
        let mut record = map_of(&["a", "b"]).to_record("snap");
        record.next_position = 7;
        assert!(matches!(
            IdentityMap::from_record(&record),
            Err(RagError::Integrity(_))
        ));
    }

    #[test]
    fn record_with_crossed_reverse_is_rejected() {
        let mut record = map_of(&["a", "b"]).to_record("snap");
        record.reverse.insert("a".to_string(), 1);
        record.reverse.insert("b".to_string(), 0);
        assert!(IdentityMap::from_record(&record).is_err());
    }
}
