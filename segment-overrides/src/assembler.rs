use std::collections::HashMap;

use tracing::warn;

use crate::models::{FeatureSegment, FeatureState, IntegrityWarning, MultivariateOption, Override};
use crate::value::typed_value_of;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Assembly {
    pub overrides: Vec<Override>,
    pub environment_variations: Vec<MultivariateOption>,
    pub integrity_warnings: Vec<IntegrityWarning>,
}

/// Attaches each override's enabled flag, value and multivariate weights from the feature
/// state that references it. Overrides without a feature state keep their persisted defaults.
pub fn assemble(base: &[FeatureSegment], records: &[FeatureState]) -> Assembly {
    let mut overrides: Vec<Override> = base.iter().map(Override::from_feature_segment).collect();
    let mut environment_variations = Vec::new();
    let mut seen: HashMap<i64, usize> = HashMap::new();

    for record in records {
        if record.is_environment_default() {
            environment_variations = record.multivariate_feature_state_values.clone();
            continue;
        }

        let Some(override_id) = record.override_id() else {
            continue;
        };

        let count = seen.entry(override_id).or_default();
        *count += 1;
        if *count > 1 {
            // first record wins
            continue;
        }

        if let Some(o) = overrides.iter_mut().find(|o| o.id == Some(override_id)) {
            o.enabled = record.enabled;
            o.value = typed_value_of(record.feature_state_value.as_ref());
            o.multivariate_options = record.multivariate_feature_state_values.clone();
        }
    }

    let mut integrity_warnings: Vec<IntegrityWarning> = seen
        .into_iter()
        .filter(|(_, records)| *records > 1)
        .map(|(override_id, records)| IntegrityWarning::DuplicateRecordsForOverride {
            override_id,
            records,
        })
        .collect();
    integrity_warnings.sort_by_key(|w| match w {
        IntegrityWarning::DuplicateRecordsForOverride { override_id, .. } => *override_id,
    });

    for warning in &integrity_warnings {
        warn!(?warning, "feature states share a segment override");
    }
    if !integrity_warnings.is_empty() {
        metrics::counter!("segment_overrides_integrity_warnings_total")
            .increment(integrity_warnings.len() as u64);
    }

    Assembly {
        overrides,
        environment_variations,
        integrity_warnings,
    }
}
