use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::api::OverrideError;
use crate::assembler::{assemble, Assembly};
use crate::client::OverridesApi;
use crate::merge::{ChangeSetMerger, SequentialMerger};
use crate::models::{ChangeRequest, FeatureSegment, FeatureState, Override, OverrideView, Segment};
use crate::reconcile::Reconciler;
use crate::reindex::reindex;
use crate::value::FlagValue;

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverrideEvent {
    /// A computation finished and its view replaced the previous one.
    Computed { token: u64, overrides: usize },
    /// The current view was edited locally.
    Updated { overrides: usize },
    /// A computation failed; the previous view is still in place.
    LoadFailed { token: u64, error_code: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshTrigger {
    EnvironmentChanged(String),
    /// The feature's overrides were saved from somewhere else.
    FeatureSaved,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Computation {
    Applied(OverrideView),
    /// A newer computation was started while this one was fetching. Its result was dropped.
    Superseded { token: u64, latest: u64 },
}

#[derive(Debug, Clone, PartialEq)]
struct Context {
    feature: i64,
    environment: String,
    change_request: Option<ChangeRequest>,
}

struct Sources {
    feature_segments: Vec<FeatureSegment>,
    feature_states: Vec<FeatureState>,
    catalog: Vec<Segment>,
}

#[derive(Debug, Default)]
struct State {
    view: Option<OverrideView>,
    drafts: Vec<Override>,
    context: Option<Context>,
}

/// Holds the last computed override view of one editing session.
///
/// Each computation takes a new token; only the computation holding the latest token may
/// replace the view, so overlapping computations resolve to the one started last.
pub struct OverrideSession<M = SequentialMerger> {
    api: Arc<dyn OverridesApi>,
    reconciler: Reconciler<M>,
    project: i64,
    segment_page_size: usize,
    latest_token: AtomicU64,
    state: RwLock<State>,
    events: broadcast::Sender<OverrideEvent>,
}

impl OverrideSession<SequentialMerger> {
    pub fn new(api: Arc<dyn OverridesApi>, project: i64, segment_page_size: usize) -> Self {
        Self::with_merger(api, SequentialMerger, project, segment_page_size)
    }
}

impl<M: ChangeSetMerger> OverrideSession<M> {
    pub fn with_merger(
        api: Arc<dyn OverridesApi>,
        merger: M,
        project: i64,
        segment_page_size: usize,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        OverrideSession {
            api,
            reconciler: Reconciler::new(merger),
            project,
            segment_page_size,
            latest_token: AtomicU64::new(0),
            state: RwLock::new(State::default()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OverrideEvent> {
        self.events.subscribe()
    }

    pub async fn view(&self) -> Option<OverrideView> {
        self.state.read().await.view.clone()
    }

    /// Fetches overrides, feature states and, when a change request with change sets is
    /// given, the segment catalog, then assembles, reconciles and re-indexes them.
    #[instrument(skip(self, change_request), fields(token))]
    pub async fn compute_overrides(
        &self,
        feature: i64,
        environment: &str,
        change_request: Option<ChangeRequest>,
    ) -> Result<Computation, OverrideError> {
        let token = self.latest_token.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::Span::current().record("token", token);

        let context = Context {
            feature,
            environment: environment.to_string(),
            change_request,
        };

        let sources = match self.fetch(&context).await {
            Ok(sources) => sources,
            Err(e) => return Err(self.fail(token, e)),
        };

        let mut state = self.state.write().await;
        let latest = self.latest_token.load(Ordering::SeqCst);
        if token != latest {
            warn!(token, latest, "discarding superseded override computation");
            metrics::counter!("segment_overrides_computations_total", "outcome" => "superseded")
                .increment(1);
            return Ok(Computation::Superseded { token, latest });
        }

        // Drafts are read under the write lock so edits made during the fetch are kept.
        let same_context = matches!(
            &state.context,
            Some(c) if c.feature == feature && c.environment == environment
        );
        if !same_context {
            state.drafts.clear();
        }

        let assembly = assemble(&sources.feature_segments, &sources.feature_states);
        // a draft whose segment was saved elsewhere is now a persisted override
        state
            .drafts
            .retain(|d| !assembly.overrides.iter().any(|o| o.segment == d.segment));

        let view = match self.build_view(token, &context, sources, assembly, &state.drafts) {
            Ok(view) => view,
            Err(e) => return Err(self.fail(token, e)),
        };

        let overrides = view.overrides.len();
        state.view = Some(view.clone());
        state.context = Some(context);
        drop(state);

        info!(overrides, "computed override view");
        metrics::counter!("segment_overrides_computations_total", "outcome" => "applied")
            .increment(1);
        self.emit(OverrideEvent::Computed { token, overrides });

        Ok(Computation::Applied(view))
    }

    /// Recomputes the view of the last computation, switching environment if asked to.
    pub async fn refresh(&self, trigger: RefreshTrigger) -> Result<Computation, OverrideError> {
        let context = self
            .state
            .read()
            .await
            .context
            .clone()
            .ok_or(OverrideError::NothingComputed)?;

        let environment = match trigger {
            RefreshTrigger::EnvironmentChanged(environment) => environment,
            RefreshTrigger::FeatureSaved => context.environment,
        };
        debug!(feature = context.feature, environment, "refreshing overrides");

        self.compute_overrides(context.feature, &environment, context.change_request)
            .await
    }

    /// Adds an unsaved override for `segment`, seeded with the environment's default weights.
    pub async fn add_draft_override(
        &self,
        segment: &Segment,
    ) -> Result<Vec<Override>, OverrideError> {
        let mut state = self.state.write().await;
        let State { view, drafts, .. } = &mut *state;
        let view = view.as_mut().ok_or(OverrideError::NothingComputed)?;

        if view.overrides.iter().any(|o| o.segment == segment.id) {
            return Err(OverrideError::DuplicateSegment(segment.id));
        }

        let draft = Override {
            id: None,
            segment: segment.id,
            segment_name: segment.name.clone(),
            priority: view.overrides.len(),
            original_priority: view.overrides.len(),
            enabled: false,
            value: FlagValue::Null,
            multivariate_options: view.environment_variations.clone(),
            is_feature_specific: segment.feature.is_some(),
            uuid: Some(Uuid::now_v7()),
            to_remove: false,
        };
        drafts.push(draft.clone());
        view.overrides.push(draft);

        Ok(self.updated(view))
    }

    pub async fn remove_multivariate_option(
        &self,
        option_id: i64,
    ) -> Result<Vec<Override>, OverrideError> {
        let mut state = self.state.write().await;
        let State { view, drafts, .. } = &mut *state;
        let view = view.as_mut().ok_or(OverrideError::NothingComputed)?;

        for o in view.overrides.iter_mut().chain(drafts.iter_mut()) {
            o.multivariate_options
                .retain(|option| option.multivariate_feature_option != option_id);
        }

        Ok(self.updated(view))
    }

    /// Replaces the current view, typically after a reorder.
    pub async fn set_overrides(
        &self,
        overrides: Vec<Override>,
    ) -> Result<Vec<Override>, OverrideError> {
        let mut seen = HashSet::new();
        if let Some(duplicate) = overrides.iter().find(|o| !seen.insert(o.segment)) {
            return Err(OverrideError::DuplicateSegment(duplicate.segment));
        }

        let mut state = self.state.write().await;
        let State { view, drafts, .. } = &mut *state;
        let view = view.as_mut().ok_or(OverrideError::NothingComputed)?;

        // only overrides created by add_draft_override are drafts, matched by their uuid
        let draft_uuids: HashSet<Uuid> = drafts.iter().filter_map(|d| d.uuid).collect();
        *drafts = overrides
            .iter()
            .filter(|o| o.id.is_none() && o.uuid.is_some_and(|u| draft_uuids.contains(&u)))
            .cloned()
            .collect();
        view.overrides = overrides;

        Ok(self.updated(view))
    }

    #[instrument(skip_all)]
    async fn fetch(&self, context: &Context) -> Result<Sources, OverrideError> {
        let needs_catalog = context
            .change_request
            .as_ref()
            .is_some_and(ChangeRequest::is_active);

        let catalog = async {
            if needs_catalog {
                self.api
                    .segments(self.project, self.segment_page_size)
                    .await
            } else {
                Ok(Vec::new())
            }
        };

        let (feature_segments, feature_states, catalog) = tokio::try_join!(
            self.api
                .feature_segments(context.feature, &context.environment),
            self.api
                .feature_states(context.feature, &context.environment),
            catalog,
        )?;
        debug!(
            feature_segments = feature_segments.len(),
            feature_states = feature_states.len(),
            segments = catalog.len(),
            "fetched override sources"
        );

        Ok(Sources {
            feature_segments,
            feature_states,
            catalog,
        })
    }

    fn build_view(
        &self,
        token: u64,
        context: &Context,
        sources: Sources,
        assembly: Assembly,
        drafts: &[Override],
    ) -> Result<OverrideView, OverrideError> {
        let change_request = context.change_request.as_ref();
        let overrides = self.reconciler.reconcile(
            &assembly.overrides,
            &sources.feature_states,
            change_request,
            &sources.catalog,
            drafts,
        )?;

        Ok(OverrideView {
            token,
            overrides: reindex(overrides),
            environment_variations: assembly.environment_variations,
            conflicts: change_request
                .filter(|cr| cr.is_active())
                .map(|cr| cr.conflicts.clone()),
            integrity_warnings: assembly.integrity_warnings,
        })
    }

    fn fail(&self, token: u64, e: OverrideError) -> OverrideError {
        error!(token, error_code = e.error_code(), "failed to compute overrides: {}", e);
        metrics::counter!("segment_overrides_fetch_errors_total").increment(1);

        if token == self.latest_token.load(Ordering::SeqCst) {
            self.emit(OverrideEvent::LoadFailed {
                token,
                error_code: e.error_code(),
            });
        }
        e
    }

    fn updated(&self, view: &mut OverrideView) -> Vec<Override> {
        view.overrides = reindex(std::mem::take(&mut view.overrides));
        self.emit(OverrideEvent::Updated {
            overrides: view.overrides.len(),
        });
        view.overrides.clone()
    }

    fn emit(&self, event: OverrideEvent) {
        if self.events.send(event).is_err() {
            debug!("no subscribers for override events");
        }
    }
}
