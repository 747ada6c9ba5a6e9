use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::value::{FeatureStateValue, FlagValue};

pub const UNKNOWN_SEGMENT_NAME: &str = "Unknown Segment";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Segment {
    pub id: i64,
    pub name: String,
    /// Set when the segment was created for a single feature.
    #[serde(default)]
    pub feature: Option<i64>,
}

/// Weight given to one multivariate option, in percent.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MultivariateOption {
    pub multivariate_feature_option: i64,
    pub percentage_allocation: f64,
}

/// A persisted segment override, as listed for a feature/environment pair.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FeatureSegment {
    pub id: i64,
    #[serde(default)]
    pub uuid: Option<Uuid>,
    pub segment: i64,
    #[serde(default)]
    pub segment_name: Option<String>,
    #[serde(default)]
    pub priority: Option<usize>,
    #[serde(default)]
    pub is_feature_specific: bool,
}

/// The override a change-set record targets. The override may not exist yet.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SegmentTarget {
    /// Id of the stored override, when there is one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub segment: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<usize>,
    #[serde(default)]
    pub is_feature_specific: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum FeatureSegmentRef {
    Id(i64),
    Target(SegmentTarget),
}

/// A stored enabled/value tuple ("feature state"). Without a segment reference or identity
/// it is the environment default.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct FeatureState {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub feature_segment: Option<FeatureSegmentRef>,
    #[serde(default)]
    pub identity: Option<i64>,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub feature_state_value: Option<FeatureStateValue>,
    #[serde(default)]
    pub multivariate_feature_state_values: Vec<MultivariateOption>,
}

impl FeatureState {
    pub fn is_environment_default(&self) -> bool {
        self.feature_segment.is_none() && self.identity.is_none()
    }

    /// Id of the stored override this record configures, when referenced by id.
    pub fn override_id(&self) -> Option<i64> {
        match self.feature_segment {
            Some(FeatureSegmentRef::Id(id)) => Some(id),
            _ => None,
        }
    }

    pub fn target(&self) -> Option<&SegmentTarget> {
        match &self.feature_segment {
            Some(FeatureSegmentRef::Target(target)) => Some(target),
            _ => None,
        }
    }

    pub fn target_segment(&self) -> Option<i64> {
        self.target().map(|t| t.segment)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Override {
    /// Feature segment id of a persisted override. When a change request modifies or
    /// introduces the override this is the id of the changed feature state instead, and it
    /// is absent for unsaved drafts.
    pub id: Option<i64>,
    pub segment: i64,
    pub segment_name: String,
    pub priority: usize,
    pub original_priority: usize,
    pub enabled: bool,
    pub value: FlagValue,
    pub multivariate_options: Vec<MultivariateOption>,
    pub is_feature_specific: bool,
    pub uuid: Option<Uuid>,
    pub to_remove: bool,
}

impl Override {
    /// Builds an override with its persisted defaults: disabled and without a value.
    pub fn from_feature_segment(feature_segment: &FeatureSegment) -> Self {
        let priority = feature_segment.priority.unwrap_or_default();
        Override {
            id: Some(feature_segment.id),
            segment: feature_segment.segment,
            segment_name: feature_segment
                .segment_name
                .clone()
                .unwrap_or_else(|| UNKNOWN_SEGMENT_NAME.to_string()),
            priority,
            original_priority: priority,
            enabled: false,
            value: FlagValue::Null,
            multivariate_options: Vec::new(),
            is_feature_specific: feature_segment.is_feature_specific,
            uuid: feature_segment.uuid,
            to_remove: false,
        }
    }

    pub fn target(&self) -> SegmentTarget {
        SegmentTarget {
            id: self.id,
            segment: self.segment,
            segment_name: Some(self.segment_name.clone()),
            uuid: self.uuid,
            priority: Some(self.priority),
            is_feature_specific: self.is_feature_specific,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ChangeSet {
    #[serde(default)]
    pub feature_states_to_update: Vec<FeatureState>,
    #[serde(default)]
    pub feature_states_to_create: Vec<FeatureState>,
    #[serde(default)]
    pub segment_ids_to_delete_overrides: Vec<i64>,
}

impl ChangeSet {
    pub fn modified_or_added(&self) -> impl Iterator<Item = &FeatureState> {
        self.feature_states_to_update
            .iter()
            .chain(self.feature_states_to_create.iter())
    }
}

/// Conflict data computed elsewhere. It is carried along untouched.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct Conflicts(pub serde_json::Value);

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ChangeRequest {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub change_sets: Option<Vec<ChangeSet>>,
    #[serde(default)]
    pub conflicts: Conflicts,
}

impl ChangeRequest {
    pub fn change_sets(&self) -> &[ChangeSet] {
        self.change_sets.as_deref().unwrap_or_default()
    }

    /// Only a change request carrying change sets takes part in reconciliation.
    pub fn is_active(&self) -> bool {
        !self.change_sets().is_empty()
    }

    pub fn segments_to_delete(&self) -> HashSet<i64> {
        self.change_sets()
            .iter()
            .flat_map(|cs| cs.segment_ids_to_delete_overrides.iter().copied())
            .collect()
    }
}

/// Envelope of the paginated list endpoints.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Paginated<T> {
    #[serde(default)]
    pub count: Option<u64>,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub previous: Option<String>,
    pub results: Vec<T>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IntegrityWarning {
    /// More than one feature state referenced the same override. The first one was used.
    DuplicateRecordsForOverride { override_id: i64, records: usize },
}

/// The merged override view together with what the surrounding UI needs next to it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OverrideView {
    pub token: u64,
    pub overrides: Vec<Override>,
    /// Default multivariate weights of the environment, used to seed new overrides.
    pub environment_variations: Vec<MultivariateOption>,
    pub conflicts: Option<Conflicts>,
    pub integrity_warnings: Vec<IntegrityWarning>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_feature_segment_ref_accepts_id_or_target() {
        let by_id: FeatureState = serde_json::from_value(json!({
            "id": 10,
            "feature_segment": 3,
            "enabled": true,
        }))
        .unwrap();
        assert_eq!(by_id.override_id(), Some(3));
        assert_eq!(by_id.target_segment(), None);
        assert!(!by_id.is_environment_default());

        let by_target: FeatureState = serde_json::from_value(json!({
            "feature_segment": {"segment": 7, "priority": 2, "is_feature_specific": true},
            "enabled": false,
        }))
        .unwrap();
        assert_eq!(by_target.override_id(), None);
        assert_eq!(by_target.target_segment(), Some(7));
        assert_eq!(by_target.target().unwrap().priority, Some(2));
        assert_eq!(by_target.id, None);
    }

    #[test]
    fn test_environment_default_has_no_segment_or_identity() {
        let state: FeatureState = serde_json::from_value(json!({"id": 1})).unwrap();
        assert!(state.is_environment_default());

        let identity: FeatureState =
            serde_json::from_value(json!({"id": 2, "identity": 99})).unwrap();
        assert!(!identity.is_environment_default());
    }

    #[test]
    fn test_change_request_activity() {
        let empty = ChangeRequest::default();
        assert!(!empty.is_active());

        let no_sets = ChangeRequest {
            change_sets: Some(vec![]),
            ..Default::default()
        };
        assert!(!no_sets.is_active());

        let cr: ChangeRequest = serde_json::from_value(json!({
            "id": 5,
            "change_sets": [
                {"segment_ids_to_delete_overrides": [1, 2]},
                {"segment_ids_to_delete_overrides": [2, 4]}
            ],
            "conflicts": [{"segment_id": 1, "original_cr_id": 9}]
        }))
        .unwrap();
        assert!(cr.is_active());
        assert_eq!(cr.segments_to_delete(), HashSet::from([1, 2, 4]));
        assert_eq!(
            cr.conflicts,
            Conflicts(json!([{"segment_id": 1, "original_cr_id": 9}]))
        );
    }

    #[test]
    fn test_override_defaults_from_feature_segment() {
        let feature_segment: FeatureSegment = serde_json::from_value(json!({
            "id": 11,
            "segment": 4,
            "segment_name": "power-users",
        }))
        .unwrap();

        let o = Override::from_feature_segment(&feature_segment);
        assert_eq!(o.id, Some(11));
        assert_eq!(o.segment_name, "power-users");
        assert_eq!(o.priority, 0);
        assert!(!o.enabled);
        assert_eq!(o.value, FlagValue::Null);
        assert!(!o.to_remove);
    }
}
