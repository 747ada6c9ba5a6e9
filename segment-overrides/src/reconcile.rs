use std::collections::{HashMap, HashSet};

use tracing::{debug, instrument};

use crate::api::OverrideError;
use crate::merge::{ChangeSetMerger, SequentialMerger};
use crate::models::{
    ChangeRequest, FeatureSegmentRef, FeatureState, Override, Segment, UNKNOWN_SEGMENT_NAME,
};
use crate::value::typed_value_of;

/// Overlays the pending change sets of a change request on the persisted overrides.
///
/// Persisted overrides keep their relative order. Overrides the change request modifies are
/// replaced in place, overrides it deletes stay in the list flagged `to_remove`, and overrides
/// it introduces are appended in the order the merger returns them.
#[derive(Debug, Clone)]
pub struct Reconciler<M = SequentialMerger> {
    merger: M,
}

impl Default for Reconciler<SequentialMerger> {
    fn default() -> Self {
        Reconciler::new(SequentialMerger)
    }
}

impl<M: ChangeSetMerger> Reconciler<M> {
    pub fn new(merger: M) -> Self {
        Reconciler { merger }
    }

    #[instrument(skip_all, fields(assembled = assembled.len()))]
    pub fn reconcile(
        &self,
        assembled: &[Override],
        records: &[FeatureState],
        change_request: Option<&ChangeRequest>,
        catalog: &[Segment],
        drafts: &[Override],
    ) -> Result<Vec<Override>, OverrideError> {
        let change_request = match change_request {
            Some(cr) if cr.is_active() => cr,
            _ => {
                let mut overrides = assembled.to_vec();
                overrides.extend_from_slice(drafts);
                return Ok(overrides);
            }
        };

        if !drafts.is_empty() {
            debug!(
                drafts = drafts.len(),
                "ignoring local drafts while a change request is shown"
            );
        }

        let tagged = tag_records(assembled, records);
        let merged = self.merger.merge(
            change_request.change_sets(),
            &tagged,
            &change_request.conflicts,
        )?;
        let segments_to_delete = change_request.segments_to_delete();

        let mut overrides: Vec<Override> = assembled
            .iter()
            .map(|o| {
                let to_remove = segments_to_delete.contains(&o.segment);
                // records the merger passed through untouched leave the override as it is
                let changed = merged
                    .iter()
                    .find(|r| r.target_segment() == Some(o.segment))
                    .filter(|r| !tagged.contains(*r));
                match changed {
                    Some(changed) => overlay(o, changed, to_remove),
                    None => Override {
                        to_remove,
                        ..o.clone()
                    },
                }
            })
            .collect();

        let mut present: HashSet<i64> = assembled.iter().map(|o| o.segment).collect();
        let names: HashMap<i64, &str> = catalog
            .iter()
            .map(|s| (s.id, s.name.as_str()))
            .collect();

        for record in &merged {
            let Some(segment) = record.target_segment() else {
                continue;
            };
            if !present.insert(segment) {
                continue;
            }
            let name = names.get(&segment).copied().unwrap_or(UNKNOWN_SEGMENT_NAME);
            overrides.push(synthesize(record, name));
        }

        debug!(
            reconciled = overrides.len(),
            deleted = segments_to_delete.len(),
            "reconciled overrides with change request"
        );

        Ok(overrides)
    }
}

// Feature states reference stored overrides by id; the merger needs the target segment.
fn tag_records(assembled: &[Override], records: &[FeatureState]) -> Vec<FeatureState> {
    records
        .iter()
        .map(|record| {
            let target = record
                .override_id()
                .and_then(|id| assembled.iter().find(|o| o.id == Some(id)))
                .map(Override::target);
            match target {
                Some(target) => FeatureState {
                    feature_segment: Some(FeatureSegmentRef::Target(target)),
                    ..record.clone()
                },
                None => record.clone(),
            }
        })
        .collect()
}

fn overlay(o: &Override, changed: &FeatureState, to_remove: bool) -> Override {
    let Some(target) = changed.target() else {
        return o.clone();
    };

    Override {
        id: changed.id.or(o.id),
        segment: target.segment,
        segment_name: target
            .segment_name
            .clone()
            .unwrap_or_else(|| o.segment_name.clone()),
        priority: target.priority.unwrap_or_default(),
        enabled: changed.enabled,
        value: typed_value_of(changed.feature_state_value.as_ref()),
        multivariate_options: changed.multivariate_feature_state_values.clone(),
        is_feature_specific: target.is_feature_specific,
        uuid: target.uuid.or(o.uuid),
        to_remove,
        ..o.clone()
    }
}

fn synthesize(record: &FeatureState, segment_name: &str) -> Override {
    let target = record.target();
    let priority = target.and_then(|t| t.priority).unwrap_or_default();

    Override {
        id: record.id,
        segment: target.map(|t| t.segment).unwrap_or_default(),
        segment_name: segment_name.to_string(),
        priority,
        original_priority: priority,
        enabled: record.enabled,
        value: typed_value_of(record.feature_state_value.as_ref()),
        multivariate_options: record.multivariate_feature_state_values.clone(),
        is_feature_specific: target.is_some_and(|t| t.is_feature_specific),
        uuid: target.and_then(|t| t.uuid),
        to_remove: false,
    }
}
