use tracing::debug;

use crate::api::OverrideError;
use crate::models::{ChangeSet, Conflicts, FeatureSegmentRef, FeatureState};

/// Applies the change sets of a change request, in order, on top of a list of feature states.
///
/// Implementations must keep unmodified records as they are and must tag every record they
/// return with the override it targets, including overrides that do not exist yet.
pub trait ChangeSetMerger: Send + Sync {
    fn merge(
        &self,
        change_sets: &[ChangeSet],
        base: &[FeatureState],
        conflicts: &Conflicts,
    ) -> Result<Vec<FeatureState>, OverrideError>;
}

/// Replaces records target by target, appending records whose target is new.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialMerger;

impl ChangeSetMerger for SequentialMerger {
    fn merge(
        &self,
        change_sets: &[ChangeSet],
        base: &[FeatureState],
        _conflicts: &Conflicts,
    ) -> Result<Vec<FeatureState>, OverrideError> {
        let mut merged = base.to_vec();

        for change_set in change_sets {
            for incoming in change_set.modified_or_added() {
                let incoming = resolve_target(incoming, &merged)?;

                match merged.iter_mut().find(|existing| same_target(existing, &incoming)) {
                    Some(existing) => {
                        let id = incoming.id.or(existing.id);
                        let override_id = existing.target().and_then(|t| t.id);
                        let mut replacement = FeatureState { id, ..incoming };
                        if let Some(FeatureSegmentRef::Target(target)) =
                            &mut replacement.feature_segment
                        {
                            target.id = target.id.or(override_id);
                        }
                        *existing = replacement;
                    }
                    None => merged.push(incoming),
                }
            }
        }

        debug!(
            change_sets = change_sets.len(),
            base = base.len(),
            merged = merged.len(),
            "merged change sets"
        );

        Ok(merged)
    }
}

// A record pointing at a stored override by id borrows the target carrying that override id,
// or else the target of the record it updates.
fn resolve_target(
    incoming: &FeatureState,
    merged: &[FeatureState],
) -> Result<FeatureState, OverrideError> {
    let Some(override_id) = incoming.override_id() else {
        return Ok(incoming.clone());
    };

    let target = merged
        .iter()
        .filter_map(FeatureState::target)
        .find(|t| t.id == Some(override_id))
        .or_else(|| {
            incoming
                .id
                .and_then(|id| merged.iter().find(|r| r.id == Some(id)))
                .and_then(FeatureState::target)
        })
        .ok_or_else(|| {
            OverrideError::ChangeSetMerge(format!(
                "feature state {:?} references segment override {} without target metadata",
                incoming.id, override_id
            ))
        })?;

    Ok(FeatureState {
        feature_segment: Some(FeatureSegmentRef::Target(target.clone())),
        ..incoming.clone()
    })
}

fn same_target(existing: &FeatureState, incoming: &FeatureState) -> bool {
    match (existing.target_segment(), incoming.target_segment()) {
        (Some(a), Some(b)) => a == b,
        (None, None) if existing.is_environment_default() && incoming.is_environment_default() => {
            true
        }
        (None, None) => incoming.id.is_some() && existing.id == incoming.id,
        _ => false,
    }
}
