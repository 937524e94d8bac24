//! Trajectory downsampling for location streams.

use std::collections::BTreeMap;

use pitwall_contracts::{EventRecord, ResourceKind};

pub const COORDINATE_FIELDS: [&str; 3] = ["x", "y", "z"];

/// Downsampled path per entity, each path ascending in time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampledTrajectory {
    by_entity: BTreeMap<u32, Vec<EventRecord>>,
}

impl SampledTrajectory {
    /// Groups `records` by entity and downsamples each group to about `target_cap` points.
    ///
    /// Records with a missing or non-numeric coordinate are discarded before the stride is
    /// computed, so they never count against the cap.
    pub fn build(resource: ResourceKind, records: Vec<EventRecord>, target_cap: usize) -> Self {
        let mut grouped: BTreeMap<u32, Vec<EventRecord>> = BTreeMap::new();
        for record in records {
            if let Some(axis) = COORDINATE_FIELDS
                .iter()
                .find(|axis| record.number(axis).is_none())
            {
                crate::metrics::inc_dropped_record(resource.as_str(), "invalid_coordinate");
                tracing::warn!(
                    resource = resource.as_str(),
                    entity_key = record.entity_key,
                    axis = *axis,
                    "sample.record_dropped"
                );
                continue;
            }
            grouped.entry(record.entity_key).or_default().push(record);
        }

        let by_entity = grouped
            .into_iter()
            .map(|(entity_key, mut path)| {
                path.sort_by_key(|record| record.timestamp);
                (entity_key, downsample(path, target_cap))
            })
            .collect();

        Self { by_entity }
    }

    pub fn path(&self, entity_key: u32) -> Option<&[EventRecord]> {
        self.by_entity.get(&entity_key).map(Vec::as_slice)
    }

    pub fn entity_count(&self) -> usize {
        self.by_entity.len()
    }

    /// All sampled records, by entity key and then by time.
    pub fn flatten(self) -> Vec<EventRecord> {
        self.by_entity.into_values().flatten().collect()
    }
}

/// Keeps every `stride`-th record of a time-sorted path plus the final record.
///
/// `stride = ceil(len / target_cap)`, which keeps at most `target_cap` strided points, so
/// the result never exceeds `target_cap + 1`. Paths no longer than `target_cap` come back
/// unchanged.
pub fn downsample(path: Vec<EventRecord>, target_cap: usize) -> Vec<EventRecord> {
    let len = path.len();
    let stride = len.div_ceil(target_cap.max(1)).max(1);
    if stride == 1 {
        return path;
    }

    let last_idx = len - 1;
    let mut out = Vec::with_capacity(len / stride + 2);
    for (idx, record) in path.into_iter().enumerate() {
        if idx % stride == 0 || idx == last_idx {
            out.push(record);
        }
    }
    out
}
