//! Latest-state reduction: one current record per entity.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use pitwall_contracts::{EventRecord, ResourceKind};

pub const RANK_FIELD: &str = "position";

/// Parses raw upstream records, dropping the ones without a usable entity key or timestamp.
pub fn parse_records(resource: ResourceKind, raw: Vec<serde_json::Value>) -> Vec<EventRecord> {
    let mut records = Vec::with_capacity(raw.len());
    for value in raw {
        match EventRecord::from_value(value) {
            Ok(record) => records.push(record),
            Err(err) => {
                crate::metrics::inc_dropped_record(resource.as_str(), err.as_str());
                tracing::warn!(
                    resource = resource.as_str(),
                    reason = err.as_str(),
                    "reduce.record_dropped"
                );
            }
        }
    }
    records
}

/// Latest record per entity key, iterated in ascending key order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LatestState {
    by_entity: BTreeMap<u32, EventRecord>,
}

impl LatestState {
    /// Keeps the record with the greatest timestamp for each entity. On equal timestamps
    /// the record seen first stays.
    pub fn reduce(records: impl IntoIterator<Item = EventRecord>) -> Self {
        let mut by_entity = BTreeMap::new();
        for record in records {
            match by_entity.entry(record.entity_key) {
                Entry::Vacant(slot) => {
                    slot.insert(record);
                }
                Entry::Occupied(mut slot) => {
                    if record.timestamp > slot.get().timestamp {
                        slot.insert(record);
                    }
                }
            }
        }
        Self { by_entity }
    }

    pub fn len(&self) -> usize {
        self.by_entity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_entity.is_empty()
    }

    pub fn get(&self, entity_key: u32) -> Option<&EventRecord> {
        self.by_entity.get(&entity_key)
    }

    pub fn take(mut self, entity_key: u32) -> Option<EventRecord> {
        self.by_entity.remove(&entity_key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EventRecord> {
        self.by_entity.values()
    }

    pub fn into_records(self) -> Vec<EventRecord> {
        self.by_entity.into_values().collect()
    }

    pub fn into_ranked(self, rank_field: &str) -> Vec<EventRecord> {
        let mut records = self.into_records();
        rank_order(&mut records, rank_field);
        records
    }
}

/// Sorts ascending by `rank_field`; records without a numeric rank go last. Equal ranks
/// fall back to entity key so the order never depends on input order.
pub fn rank_order(records: &mut [EventRecord], rank_field: &str) {
    records.sort_by_key(|record| {
        let rank = record.rank(rank_field);
        (rank.is_none(), rank, record.entity_key)
    });
}
