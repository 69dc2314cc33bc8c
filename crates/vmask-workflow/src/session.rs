//! Selection session and the mask confirmation state machine.
//!
//! A [`Workflow`] owns one selection session at a time. Every network call
//! follows the same pattern: validate and mark the request in flight under
//! the session lock, release the lock for the call, then re-acquire it and
//! apply the response only if the same request is still the live one. A
//! response that arrives after a cancel or after the session changed is
//! dropped.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, info, warn};

use vmask_client::{
    InMemoryTaskRepository, IntentRequest, IntentService, MaskRequest, MaskService,
    TaskRepository, TaskService, TaskSubmission,
};
use vmask_media::{
    denormalize, hit_test, normalize, reconcile_scale, sample_interior_points,
    FfmpegRasterLoader, RasterCache, RasterLoader,
};
use vmask_models::{
    midpoint_index, ClickPoint, ClickPointId, ConversationResult, MaskData, MaskOperationKind,
    PendingMaskOperation, PixelPoint, Resolution, SampledFrame, SelectionState, SessionId,
    TaskId, TaskProgress, TaskStatus, WorkflowEvent, WorkflowStage,
};

use crate::config::WorkflowConfig;
use crate::error::{WorkflowError, WorkflowResult};
use crate::logging::SessionLogger;
use crate::metrics;
use crate::poller::{PollSink, PollerHandle, TaskPoller, TerminalGuard};
use crate::refine;
use crate::resolver::{OperationResolver, ResolveOutcome};
use crate::state::{AssetContext, TaskFailure, WorkflowState};
use crate::store::{Mutation, SelectionStore};

/// Builder for [`Workflow`].
pub struct WorkflowBuilder {
    mask: Arc<dyn MaskService>,
    tasks: Arc<dyn TaskService>,
    intent: Arc<dyn IntentService>,
    repo: Option<Arc<dyn TaskRepository>>,
    raster_loader: Option<Arc<dyn RasterLoader>>,
    config: WorkflowConfig,
    seed: Option<u64>,
}

impl WorkflowBuilder {
    /// Task progress storage. Defaults to an in-memory repository.
    pub fn repository(mut self, repo: Arc<dyn TaskRepository>) -> Self {
        self.repo = Some(repo);
        self
    }

    /// Mask raster decoder. Defaults to FFmpeg under the configured work dir.
    pub fn raster_loader(mut self, loader: Arc<dyn RasterLoader>) -> Self {
        self.raster_loader = Some(loader);
        self
    }

    pub fn config(mut self, config: WorkflowConfig) -> Self {
        self.config = config;
        self
    }

    /// Seed for interior point sampling.
    pub fn rng_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn build(self) -> Workflow {
        let config = self.config;
        let loader = self
            .raster_loader
            .unwrap_or_else(|| Arc::new(FfmpegRasterLoader::new(&config.work_dir)) as Arc<dyn RasterLoader>);
        let rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let (events, _) = broadcast::channel(config.event_capacity.max(1));

        let inner = Inner {
            session_id: SessionId::generate(),
            state: WorkflowState::Idle,
            store: SelectionStore::new(config.history_capacity),
            asset: None,
            in_flight: None,
            next_request: 0,
            conversation_id: None,
            poller: None,
            guard: TerminalGuard::new(),
            logger: None,
            rng,
        };

        Workflow {
            shared: Arc::new(Shared {
                inner: Mutex::new(inner),
                mask: self.mask,
                tasks: self.tasks,
                intent: self.intent,
                repo: self
                    .repo
                    .unwrap_or_else(|| Arc::new(InMemoryTaskRepository::new()) as Arc<dyn TaskRepository>),
                rasters: RasterCache::new(loader, config.raster_cache_capacity),
                resolver: OperationResolver::new(config.min_confidence),
                config,
                events,
            }),
        }
    }
}

/// Handle to a selection session. Cheap to clone.
#[derive(Clone)]
pub struct Workflow {
    shared: Arc<Shared>,
}

struct Shared {
    inner: Mutex<Inner>,
    mask: Arc<dyn MaskService>,
    tasks: Arc<dyn TaskService>,
    intent: Arc<dyn IntentService>,
    repo: Arc<dyn TaskRepository>,
    rasters: RasterCache,
    resolver: OperationResolver,
    config: WorkflowConfig,
    events: broadcast::Sender<WorkflowEvent>,
}

struct Inner {
    session_id: SessionId,
    state: WorkflowState,
    store: SelectionStore,
    asset: Option<AssetContext>,
    in_flight: Option<InFlight>,
    next_request: u64,
    conversation_id: Option<String>,
    poller: Option<PollerHandle>,
    guard: TerminalGuard,
    logger: Option<SessionLogger>,
    rng: StdRng,
}

struct InFlight {
    seq: u64,
    /// State to return to if the request fails or is cancelled
    prior: WorkflowState,
}

/// Identifies one outstanding request.
struct Ticket {
    session_id: SessionId,
    seq: u64,
}

impl Inner {
    fn is_live(&self, ticket: &Ticket) -> bool {
        self.session_id == ticket.session_id
            && self.in_flight.as_ref().is_some_and(|f| f.seq == ticket.seq)
    }

    /// Clear the in-flight marker for `ticket` and return the prior state.
    fn end_request(&mut self, ticket: &Ticket, kind: &str) -> WorkflowResult<WorkflowState> {
        if !self.is_live(ticket) {
            metrics::record_stale_response(kind);
            debug!(session_id = %ticket.session_id, kind, "Dropping response for a superseded request");
            return Err(WorkflowError::SessionClosed);
        }
        self.in_flight
            .take()
            .map(|f| f.prior)
            .ok_or(WorkflowError::SessionClosed)
    }

    fn ensure_selection_input(&self, action: &'static str) -> WorkflowResult<()> {
        if self.in_flight.is_some() {
            return Err(WorkflowError::Busy);
        }
        if !self.state.accepts_selection() {
            return Err(WorkflowError::invalid_transition(action, self.state.stage()));
        }
        Ok(())
    }

    fn ensure_confirmation(&self, action: &'static str) -> WorkflowResult<()> {
        if self.state != WorkflowState::AwaitingConfirmation {
            return Err(WorkflowError::invalid_transition(action, self.state.stage()));
        }
        Ok(())
    }

    fn asset(&self) -> WorkflowResult<&AssetContext> {
        self.asset
            .as_ref()
            .ok_or_else(|| WorkflowError::validation("no asset is loaded"))
    }

    fn frame(&self, index: usize) -> WorkflowResult<SampledFrame> {
        self.asset()?
            .frame(index)
            .cloned()
            .ok_or_else(|| WorkflowError::validation(format!("frame {index} was not sampled")))
    }

    fn mask(&self) -> WorkflowResult<MaskData> {
        self.store
            .state()
            .mask_data
            .clone()
            .ok_or_else(|| WorkflowError::validation("no mask to work on"))
    }
}

impl Shared {
    fn emit(&self, event: WorkflowEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    fn transition(&self, inner: &mut Inner, to: WorkflowState) {
        let from = inner.state.stage();
        let to_stage = to.stage();
        inner.state = to;
        if from == to_stage {
            return;
        }
        match &inner.logger {
            Some(logger) => logger.log_transition(from, to_stage),
            None => debug!(session_id = %inner.session_id, %from, to = %to_stage, "Stage changed"),
        }
        self.emit(WorkflowEvent::StageChanged {
            session_id: inner.session_id.clone(),
            from,
            to: to_stage,
        });
    }

    fn begin_request(&self, inner: &mut Inner, next: WorkflowState) -> WorkflowResult<Ticket> {
        if inner.in_flight.is_some() {
            return Err(WorkflowError::Busy);
        }
        inner.next_request += 1;
        let seq = inner.next_request;
        inner.in_flight = Some(InFlight {
            seq,
            prior: inner.state.clone(),
        });
        self.transition(inner, next);
        Ok(Ticket {
            session_id: inner.session_id.clone(),
            seq,
        })
    }

    /// Return to `prior` and surface `err`.
    fn rollback(&self, inner: &mut Inner, prior: WorkflowState, err: WorkflowError) -> WorkflowError {
        if let Some(logger) = &inner.logger {
            logger.log_warning(&err.to_string());
        }
        self.transition(inner, prior);
        self.emit(WorkflowEvent::error(err.to_string()));
        err
    }

    fn start_polling(self: &Arc<Self>, inner: &mut Inner, task_id: TaskId) {
        let poller = TaskPoller::new(
            self.tasks.clone(),
            self.repo.clone(),
            self.config.poll_interval,
            self.config.poll_timeout,
        );
        let weak: Weak<Shared> = Arc::downgrade(self);
        let sink: Weak<dyn PollSink> = weak;
        inner.poller = Some(poller.spawn(inner.session_id.clone(), task_id.clone(), sink));
        self.transition(inner, WorkflowState::Polling { task_id });
    }

    /// Apply the terminal transition for a task at most once.
    async fn settle_terminal(
        &self,
        session_id: Option<&SessionId>,
        progress: TaskProgress,
        from_poller: bool,
    ) -> bool {
        if !progress.is_terminal() {
            return false;
        }
        let mut inner = self.inner.lock().await;
        if session_id.is_some_and(|s| *s != inner.session_id) {
            metrics::record_stale_response("poll");
            return false;
        }

        let task_id = progress.task_id.clone();
        let tracking = inner.state.task_id() == Some(&task_id)
            && matches!(
                inner.state,
                WorkflowState::TaskSubmitted { .. }
                    | WorkflowState::Polling { .. }
                    | WorkflowState::Failed {
                        failure: TaskFailure::PollTransport { .. },
                        ..
                    }
            );
        if !tracking || !inner.guard.settle(&task_id) {
            debug!(task_id = %task_id, "Terminal status already handled");
            return false;
        }

        match inner.poller.take() {
            Some(handle) if from_poller => handle.detach(),
            other => drop(other),
        }

        let (next, event, outcome) = match progress.status {
            TaskStatus::Succeeded => match progress.output_url.filter(|u| !u.is_empty()) {
                Some(output_url) => (
                    WorkflowState::Completed {
                        task_id: task_id.clone(),
                        output_url: output_url.clone(),
                    },
                    WorkflowEvent::TaskSucceeded {
                        task_id: task_id.clone(),
                        output_url,
                    },
                    "succeeded",
                ),
                None => job_failure(&task_id, "task succeeded without an output URL".into()),
            },
            TaskStatus::Cancelled => (
                WorkflowState::Cancelled {
                    task_id: task_id.clone(),
                },
                WorkflowEvent::TaskCancelled {
                    task_id: task_id.clone(),
                },
                "cancelled",
            ),
            _ => job_failure(
                &task_id,
                progress.error.unwrap_or_else(|| "task failed".to_string()),
            ),
        };

        metrics::record_task_terminal(outcome);
        if let Some(logger) = &inner.logger {
            logger.log_completion(&format!("task {task_id} {outcome}"));
        }
        self.transition(&mut inner, next);
        self.emit(event);
        true
    }
}

fn job_failure(task_id: &TaskId, message: String) -> (WorkflowState, WorkflowEvent, &'static str) {
    (
        WorkflowState::Failed {
            task_id: task_id.clone(),
            failure: TaskFailure::Job {
                message: message.clone(),
            },
        },
        WorkflowEvent::TaskFailed {
            task_id: task_id.clone(),
            message,
        },
        "failed",
    )
}

#[async_trait]
impl PollSink for Shared {
    async fn on_progress(&self, session_id: &SessionId, progress: &TaskProgress) {
        let inner = self.inner.lock().await;
        let polling = matches!(&inner.state, WorkflowState::Polling { task_id } if *task_id == progress.task_id);
        if inner.session_id != *session_id || !polling {
            return;
        }
        self.emit(WorkflowEvent::TaskProgress {
            task_id: progress.task_id.clone(),
            status: progress.status,
            percentage: progress.percentage,
        });
    }

    async fn on_terminal(&self, session_id: &SessionId, progress: TaskProgress) {
        self.settle_terminal(Some(session_id), progress, true).await;
    }

    async fn on_transport_failure(&self, session_id: &SessionId, task_id: &TaskId, message: String) {
        let mut inner = self.inner.lock().await;
        let polling = matches!(&inner.state, WorkflowState::Polling { task_id: t } if t == task_id);
        if inner.session_id != *session_id || !polling || inner.guard.is_settled(task_id) {
            return;
        }
        if let Some(handle) = inner.poller.take() {
            handle.detach();
        }
        metrics::record_task_terminal("poll_failed");
        if let Some(logger) = &inner.logger {
            logger.log_error(&format!("polling task {task_id} failed: {message}"));
        }
        self.transition(
            &mut inner,
            WorkflowState::Failed {
                task_id: task_id.clone(),
                failure: TaskFailure::PollTransport {
                    message: message.clone(),
                },
            },
        );
        self.emit(WorkflowEvent::PollFailed {
            task_id: task_id.clone(),
            message,
        });
    }
}

impl Workflow {
    pub fn builder(
        mask: Arc<dyn MaskService>,
        tasks: Arc<dyn TaskService>,
        intent: Arc<dyn IntentService>,
    ) -> WorkflowBuilder {
        WorkflowBuilder {
            mask,
            tasks,
            intent,
            repo: None,
            raster_loader: None,
            config: WorkflowConfig::default(),
            seed: None,
        }
    }

    /// Subscribe to workflow events.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.shared.events.subscribe()
    }

    pub async fn session_id(&self) -> SessionId {
        self.shared.inner.lock().await.session_id.clone()
    }

    pub async fn state(&self) -> WorkflowState {
        self.shared.inner.lock().await.state.clone()
    }

    pub async fn stage(&self) -> WorkflowStage {
        self.shared.inner.lock().await.state.stage()
    }

    /// Snapshot of the current selection.
    pub async fn selection(&self) -> SelectionState {
        self.shared.inner.lock().await.store.state().clone()
    }

    pub async fn can_undo(&self) -> bool {
        self.shared.inner.lock().await.store.history().can_undo()
    }

    pub async fn can_redo(&self) -> bool {
        self.shared.inner.lock().await.store.history().can_redo()
    }

    /// Output of the completed task, if any.
    pub async fn output_url(&self) -> Option<String> {
        match &self.shared.inner.lock().await.state {
            WorkflowState::Completed { output_url, .. } => Some(output_url.clone()),
            _ => None,
        }
    }

    pub async fn task_progress(&self, task_id: &TaskId) -> Option<TaskProgress> {
        self.shared.repo.get(task_id).await
    }

    /// Open a new selection session on `asset`.
    ///
    /// Anything still running for the previous session is stopped and its
    /// responses will be dropped on arrival.
    pub async fn start_session(&self, asset: AssetContext) -> WorkflowResult<SessionId> {
        if asset.frames.is_empty() {
            return Err(WorkflowError::validation("asset has no sampled frames"));
        }

        let session_id = {
            let mut inner = self.shared.inner.lock().await;
            inner.poller = None;
            inner.in_flight = None;
            inner.session_id = SessionId::generate();
            inner.guard.clear();
            inner.store.reset();
            inner.conversation_id = None;

            let logger = SessionLogger::new(&inner.session_id, asset.asset_id.as_str());
            {
                let _span = logger.create_span().entered();
                logger.log_start(&format!(
                    "{} frames at {}",
                    asset.frames.len(),
                    asset.source_resolution
                ));
            }
            inner.logger = Some(logger);
            inner.asset = Some(asset);
            self.shared.transition(&mut inner, WorkflowState::Idle);
            inner.session_id.clone()
        };

        self.shared.rasters.clear().await;
        Ok(session_id)
    }

    /// Leave the current session.
    pub async fn close_session(&self) {
        {
            let mut inner = self.shared.inner.lock().await;
            inner.poller = None;
            inner.in_flight = None;
            if let Some(logger) = inner.logger.take() {
                logger.log_completion("closed");
            }
            inner.session_id = SessionId::generate();
            inner.guard.clear();
            inner.store.reset();
            inner.asset = None;
            inner.conversation_id = None;
            self.shared.transition(&mut inner, WorkflowState::Idle);
        }
        self.shared.rasters.clear().await;
    }

    pub async fn select_frame(&self, frame_index: usize) -> WorkflowResult<()> {
        let mut inner = self.shared.inner.lock().await;
        inner.ensure_selection_input("select a frame")?;
        inner.frame(frame_index)?;
        inner.store.set_selected_frame_index(Some(frame_index))?;
        if inner.state == WorkflowState::Idle {
            self.shared.transition(&mut inner, WorkflowState::AwaitingSelection);
        }
        Ok(())
    }

    /// Record a click at frame pixel `(x, y)` and select it.
    pub async fn click(&self, frame_index: usize, x: f64, y: f64) -> WorkflowResult<ClickPointId> {
        if !x.is_finite() || !y.is_finite() || x < 0.0 || y < 0.0 {
            return Err(WorkflowError::validation(format!("invalid click position ({x}, {y})")));
        }

        let mut inner = self.shared.inner.lock().await;
        inner.ensure_selection_input("click")?;
        let frame = inner.frame(frame_index)?;
        let point = ClickPoint::new(frame.index, frame.timestamp_seconds, x, y, frame.image_ref);
        let id = point.id.clone();
        inner.store.apply(vec![
            Mutation::SetSelectedFrameIndex(Some(frame.index)),
            Mutation::AddClickPoint(point),
            Mutation::SelectObject(Some(id.clone())),
        ])?;
        debug!(frame_index, x, y, "Click recorded");
        if inner.state == WorkflowState::Idle {
            self.shared.transition(&mut inner, WorkflowState::AwaitingSelection);
        }
        Ok(id)
    }

    pub async fn remove_click_point(&self, id: &ClickPointId) -> WorkflowResult<()> {
        let mut inner = self.shared.inner.lock().await;
        inner.ensure_selection_input("remove a click")?;
        inner.store.remove_click_point(id)
    }

    pub async fn clear_selection(&self) -> WorkflowResult<()> {
        let mut inner = self.shared.inner.lock().await;
        inner.ensure_selection_input("clear the selection")?;
        inner.store.clear_selection()
    }

    /// Send a free-text query to the intent service and act on its decision.
    pub async fn submit_query(&self, query: &str, user_id: &str) -> WorkflowResult<ResolveOutcome> {
        self.submit_query_streaming(query, user_id, None).await
    }

    /// Like [`Workflow::submit_query`], forwarding advisory text deltas.
    pub async fn submit_query_streaming(
        &self,
        query: &str,
        user_id: &str,
        deltas: Option<mpsc::UnboundedSender<String>>,
    ) -> WorkflowResult<ResolveOutcome> {
        let query = query.trim();
        if query.is_empty() {
            return Err(WorkflowError::validation("query is empty"));
        }

        let (ticket, request) = {
            let mut inner = self.shared.inner.lock().await;
            inner.ensure_selection_input("submit a query")?;
            let asset = inner.asset()?;
            let frame_image = inner
                .store
                .state()
                .selected_frame_index
                .or_else(|| midpoint_index(&asset.frames))
                .and_then(|i| asset.frame(i))
                .map(|f| f.image_ref.clone());

            let mut request =
                IntentRequest::new(query, user_id).with_conversation(inner.conversation_id.clone());
            if let Some(image) = frame_image {
                request = request.with_frame(image);
            }

            if inner.state == WorkflowState::Idle {
                self.shared.transition(&mut inner, WorkflowState::AwaitingSelection);
            }
            let current = inner.state.clone();
            let ticket = self.shared.begin_request(&mut inner, current)?;
            (ticket, request)
        };

        let result = self.shared.intent.resolve(&request, deltas).await;
        metrics::record_intent_request(result.is_ok());

        let reply = {
            let mut inner = self.shared.inner.lock().await;
            let prior = inner.end_request(&ticket, "intent")?;
            match result {
                Ok(reply) => {
                    if reply.conversation_id.is_some() {
                        inner.conversation_id = reply.conversation_id.clone();
                    }
                    reply
                }
                Err(e) => return Err(self.shared.rollback(&mut inner, prior, WorkflowError::Intent(e))),
            }
        };

        let message = reply.result.assistant_message.trim();
        if reply.result.is_actionable() && !message.is_empty() {
            self.shared.emit(WorkflowEvent::AssistantMessage {
                message: message.to_string(),
            });
        }
        self.handle_conversation_result(&reply.result).await
    }

    /// Act on a structured intent decision.
    ///
    /// Ambiguity is not an error: it yields
    /// [`ResolveOutcome::NeedsClarification`] and no mask is requested.
    pub async fn handle_conversation_result(
        &self,
        result: &ConversationResult,
    ) -> WorkflowResult<ResolveOutcome> {
        let (ticket, plan, request) = {
            let mut inner = self.shared.inner.lock().await;
            inner.ensure_selection_input("resolve an intent")?;
            let outcome = {
                let asset = inner.asset()?;
                self.shared.resolver.resolve(
                    result,
                    inner.store.state().selected_frame_index,
                    &asset.frames,
                )?
            };
            let plan = match outcome {
                ResolveOutcome::RequestPreview(plan) => plan,
                ResolveOutcome::NeedsClarification { ref message } => {
                    info!(session_id = %inner.session_id, "Clarification needed");
                    self.shared.emit(WorkflowEvent::ClarificationNeeded {
                        message: message.clone(),
                    });
                    if inner.state == WorkflowState::Idle {
                        self.shared.transition(&mut inner, WorkflowState::AwaitingSelection);
                    }
                    return Ok(outcome);
                }
                ResolveOutcome::Ignored => return Ok(outcome),
            };

            let request = MaskRequest::for_frame(plan.text_prompt.clone(), plan.frame.image_ref.clone());
            request
                .validate()
                .map_err(|e| WorkflowError::validation(e.to_string()))?;

            if inner.state == WorkflowState::Idle {
                self.shared.transition(&mut inner, WorkflowState::AwaitingSelection);
            }
            let ticket = self.shared.begin_request(
                &mut inner,
                WorkflowState::PreviewGenerating {
                    frame_index: plan.frame.index,
                },
            )?;
            (ticket, plan, request)
        };

        let response = self.shared.mask.generate(&request).await;
        metrics::record_mask_request("preview", response.is_ok());

        let mut inner = self.shared.inner.lock().await;
        let prior = inner.end_request(&ticket, "preview")?;
        let response = match response {
            Ok(response) => response,
            Err(e) => return Err(self.shared.rollback(&mut inner, prior, WorkflowError::Mask(e))),
        };

        let source = inner.asset.as_ref().map(|a| a.source_resolution);
        let mask = MaskData {
            preview_image: response.preview_or_mask_reference,
            preview_is_video: response.is_video,
            mask_reference: None,
            prediction_id: response.prediction_id,
            visual_prompt_points: Vec::new(),
            text_prompt: Some(plan.text_prompt.clone()),
            negative_prompt: None,
            frame_index: Some(plan.frame.index),
            source_width: source.map(|r| r.width),
            source_height: source.map(|r| r.height),
        };
        if let Err(e) = inner.store.apply(vec![
            Mutation::SetMaskData(Some(mask.clone())),
            Mutation::SetPendingAction(Some(plan.action)),
            Mutation::SetPendingMaskOperation(None),
        ]) {
            return Err(self.shared.rollback(&mut inner, prior, e));
        }

        self.shared.transition(&mut inner, WorkflowState::AwaitingConfirmation);
        self.shared.emit(WorkflowEvent::PreviewReady {
            mask,
            action: plan.action,
        });
        Ok(ResolveOutcome::RequestPreview(plan))
    }

    /// Confirm the previewed mask: request the full-video mask, submit the
    /// background task and start polling it.
    pub async fn confirm(&self) -> WorkflowResult<TaskId> {
        let (ticket, request, action, asset_id, video_url) = {
            let mut inner = self.shared.inner.lock().await;
            inner.ensure_confirmation("confirm")?;
            if inner.store.state().pending_mask_operation.is_some() {
                return Err(WorkflowError::validation(
                    "apply or discard the pending mask edit before confirming",
                ));
            }
            let mask = inner.mask()?;
            let action = inner
                .store
                .state()
                .pending_action
                .ok_or_else(|| WorkflowError::validation("no pending action to confirm"))?;
            let asset = inner.asset()?;
            let asset_id = asset.asset_id.clone();
            let video_url = asset.video_url.clone();

            let request = MaskRequest::for_video(mask.text_prompt.clone().unwrap_or_default(), video_url.clone())
                .with_negative_prompt(mask.negative_prompt.clone())
                .with_points(mask.visual_prompt_points.clone());
            request
                .validate()
                .map_err(|e| WorkflowError::validation(e.to_string()))?;

            let ticket = self
                .shared
                .begin_request(&mut inner, WorkflowState::FullMaskGenerating)?;
            (ticket, request, action, asset_id, video_url)
        };

        let response = self.shared.mask.generate(&request).await;
        metrics::record_mask_request("full", response.is_ok());

        let mask_reference = {
            let mut inner = self.shared.inner.lock().await;
            match response {
                Ok(_) if !inner.is_live(&ticket) => {
                    metrics::record_stale_response("full");
                    return Err(WorkflowError::SessionClosed);
                }
                Ok(response) => response.preview_or_mask_reference,
                Err(e) => {
                    let prior = inner.end_request(&ticket, "full")?;
                    return Err(self.shared.rollback(&mut inner, prior, WorkflowError::Mask(e)));
                }
            }
        };

        let submission = TaskSubmission {
            asset_id,
            action,
            mask_reference,
            text_prompt: request.prompt.clone(),
            video_url,
        };
        let receipt = self.shared.tasks.submit(&submission).await;
        metrics::record_task_submitted(action.as_str(), receipt.is_ok());

        let mut inner = self.shared.inner.lock().await;
        let prior = match inner.end_request(&ticket, "task") {
            Ok(prior) => prior,
            Err(e) => {
                if let Ok(receipt) = &receipt {
                    warn!(task_id = %receipt.task_id, "Task submitted for a superseded request; not tracking it");
                }
                return Err(e);
            }
        };
        let task_id = match receipt {
            Ok(receipt) => receipt.task_id,
            Err(e) => return Err(self.shared.rollback(&mut inner, prior, WorkflowError::Task(e))),
        };

        self.shared.repo.insert(TaskProgress::new(task_id.clone())).await;
        if let Some(logger) = &inner.logger {
            logger.log_task_submitted(&task_id, action);
        }
        self.shared.transition(
            &mut inner,
            WorkflowState::TaskSubmitted {
                task_id: task_id.clone(),
            },
        );
        self.shared.emit(WorkflowEvent::TaskSubmitted {
            task_id: task_id.clone(),
        });
        self.shared.start_polling(&mut inner, task_id.clone());
        Ok(task_id)
    }

    /// Cancel whatever the session is doing. Safe to call repeatedly.
    ///
    /// - awaiting confirmation: discard the preview and return to selection
    /// - generating a mask: drop the in-flight response and revert
    /// - tracking a task: stop polling and mark the task cancelled
    pub async fn cancel(&self) -> WorkflowResult<()> {
        let mut inner = self.shared.inner.lock().await;
        match inner.state.clone() {
            WorkflowState::AwaitingConfirmation => {
                inner.store.apply(vec![
                    Mutation::SetMaskData(None),
                    Mutation::SetPendingAction(None),
                    Mutation::SetPendingMaskOperation(None),
                    Mutation::SetIsMaskEditMode(false),
                ])?;
                self.shared.transition(&mut inner, WorkflowState::AwaitingSelection);
            }
            WorkflowState::PreviewGenerating { .. } | WorkflowState::FullMaskGenerating => {
                if let Some(in_flight) = inner.in_flight.take() {
                    self.shared.transition(&mut inner, in_flight.prior);
                }
            }
            WorkflowState::Idle | WorkflowState::AwaitingSelection => {
                inner.in_flight = None;
            }
            WorkflowState::TaskSubmitted { task_id } | WorkflowState::Polling { task_id } => {
                inner.poller = None;
                self.mark_cancelled(&mut inner, task_id);
            }
            WorkflowState::Failed {
                task_id,
                failure: TaskFailure::PollTransport { .. },
            } => self.mark_cancelled(&mut inner, task_id),
            WorkflowState::Completed { .. }
            | WorkflowState::Failed { .. }
            | WorkflowState::Cancelled { .. } => {}
        }
        Ok(())
    }

    fn mark_cancelled(&self, inner: &mut Inner, task_id: TaskId) {
        if !inner.guard.settle(&task_id) {
            return;
        }
        metrics::record_task_terminal("cancelled");
        self.shared.transition(
            inner,
            WorkflowState::Cancelled {
                task_id: task_id.clone(),
            },
        );
        self.shared.emit(WorkflowEvent::TaskCancelled { task_id });
    }

    /// Terminal transition for a task. Returns `true` only for the call that
    /// actually changed state.
    pub async fn handle_task_terminal(&self, progress: TaskProgress) -> bool {
        self.shared.settle_terminal(None, progress, false).await
    }

    /// Restart polling after a transport failure.
    pub async fn resume_polling(&self) -> WorkflowResult<()> {
        let mut inner = self.shared.inner.lock().await;
        match inner.state.clone() {
            WorkflowState::Failed {
                task_id,
                failure: TaskFailure::PollTransport { .. },
            } if !inner.guard.is_settled(&task_id) => {
                info!(task_id = %task_id, "Resuming polling");
                self.shared.start_polling(&mut inner, task_id);
                Ok(())
            }
            other => Err(WorkflowError::invalid_transition("resume polling", other.stage())),
        }
    }

    pub async fn undo(&self) -> WorkflowResult<bool> {
        self.replay(true).await
    }

    pub async fn redo(&self) -> WorkflowResult<bool> {
        self.replay(false).await
    }

    async fn replay(&self, undo: bool) -> WorkflowResult<bool> {
        let action = if undo { "undo" } else { "redo" };
        let mut inner = self.shared.inner.lock().await;
        if inner.in_flight.is_some() {
            return Err(WorkflowError::Busy);
        }
        if !matches!(
            inner.state,
            WorkflowState::Idle | WorkflowState::AwaitingSelection | WorkflowState::AwaitingConfirmation
        ) {
            return Err(WorkflowError::invalid_transition(action, inner.state.stage()));
        }

        let changed = if undo {
            inner.store.undo()
        } else {
            inner.store.redo()
        };
        if changed {
            let next = if inner.store.state().has_pending_preview() {
                WorkflowState::AwaitingConfirmation
            } else if inner.state == WorkflowState::AwaitingConfirmation {
                WorkflowState::AwaitingSelection
            } else {
                inner.state.clone()
            };
            self.shared.transition(&mut inner, next);
        }
        Ok(changed)
    }

    /// Turn mask edit mode on or off. Turning it off discards a pending edit.
    pub async fn set_mask_edit_mode(&self, enabled: bool) -> WorkflowResult<()> {
        let mut inner = self.shared.inner.lock().await;
        inner.ensure_confirmation("edit the mask")?;
        let state = inner.store.state();
        let has_pending = state.pending_mask_operation.is_some();
        if state.is_mask_edit_mode == enabled && (enabled || !has_pending) {
            return Ok(());
        }

        let mut mutations = vec![Mutation::SetIsMaskEditMode(enabled)];
        if !enabled && has_pending {
            mutations.push(Mutation::SetPendingMaskOperation(None));
        }
        inner.store.apply(mutations)
    }

    /// Classify a refinement click against the current mask.
    ///
    /// `click` is measured against `display`, the surface the user sees.
    pub async fn click_for_refinement(
        &self,
        kind: MaskOperationKind,
        click: PixelPoint,
        display: Resolution,
    ) -> WorkflowResult<PendingMaskOperation> {
        if display.is_empty() || !click.x.is_finite() || !click.y.is_finite() {
            return Err(WorkflowError::validation("invalid refinement click"));
        }

        let (session_id, mask, source, frame) = {
            let inner = self.shared.inner.lock().await;
            inner.ensure_confirmation("refine the mask")?;
            if !inner.store.state().is_mask_edit_mode {
                return Err(WorkflowError::validation("mask edit mode is off"));
            }
            let (mask, source, frame) = refinement_target(&inner)?;
            (inner.session_id.clone(), mask, source, frame)
        };

        let raster = self
            .shared
            .rasters
            .get(&mask.preview_image, mask.preview_is_video)
            .await?;
        let source_px = denormalize(normalize(click, display), source);
        let raster_px = reconcile_scale(source_px, source, raster.resolution());
        let inside = hit_test(&raster, raster_px.x, raster_px.y);

        let op = refine::plan_operation(
            kind,
            source_px,
            source,
            inside,
            &mask.visual_prompt_points,
            self.shared.config.click_tolerance_px,
            frame.index,
            frame.timestamp_seconds,
        );
        debug!(kind = ?kind, inside, target = op.target_point.is_some(), "Refinement click classified");

        let mut inner = self.shared.inner.lock().await;
        if inner.session_id != session_id
            || inner.state != WorkflowState::AwaitingConfirmation
            || inner.store.state().mask_data.as_ref() != Some(&mask)
        {
            return Err(WorkflowError::SessionClosed);
        }
        inner.store.set_pending_mask_operation(Some(op.clone()))?;
        Ok(op)
    }

    /// Discard the pending refinement click.
    pub async fn cancel_pending_mask_operation(&self) -> WorkflowResult<()> {
        let mut inner = self.shared.inner.lock().await;
        inner.ensure_confirmation("discard a mask edit")?;
        if inner.store.state().pending_mask_operation.is_none() {
            return Ok(());
        }
        inner.store.set_pending_mask_operation(None)
    }

    /// Materialize the pending refinement into prompt points and request a
    /// refined preview. On failure the mask and pending edit are kept.
    pub async fn apply_pending_mask_operation(&self) -> WorkflowResult<MaskData> {
        let (session_id, mask, op, source, frame) = {
            let inner = self.shared.inner.lock().await;
            inner.ensure_confirmation("apply a mask edit")?;
            let op = inner
                .store
                .state()
                .pending_mask_operation
                .clone()
                .ok_or_else(|| WorkflowError::validation("no pending mask edit"))?;
            let (mask, source, frame) = refinement_target(&inner)?;
            (inner.session_id.clone(), mask, op, source, frame)
        };

        let raster = if refine::needs_interior_samples(&op) {
            Some(
                self.shared
                    .rasters
                    .get(&mask.preview_image, mask.preview_is_video)
                    .await?,
            )
        } else {
            None
        };

        let (ticket, request, points) = {
            let mut inner = self.shared.inner.lock().await;
            let unchanged = inner.session_id == session_id
                && inner.state == WorkflowState::AwaitingConfirmation
                && inner.store.state().mask_data.as_ref() == Some(&mask)
                && inner.store.state().pending_mask_operation.as_ref() == Some(&op);
            if !unchanged {
                return Err(WorkflowError::SessionClosed);
            }

            let retained: Vec<PixelPoint> = match &raster {
                Some(raster) => {
                    let raster_res = raster.resolution();
                    let exclude = reconcile_scale(op.click_pixel, source, raster_res);
                    sample_interior_points(
                        raster,
                        exclude,
                        self.shared.config.exclusion_radius_px,
                        self.shared.config.max_retained_samples,
                        &mut inner.rng,
                    )
                    .into_iter()
                    .map(|p| reconcile_scale(p, raster_res, source))
                    .collect()
                }
                None => Vec::new(),
            };
            let points = refine::apply_operation(
                &mask.visual_prompt_points,
                &op,
                source,
                &retained,
                mask.text_prompt.as_deref(),
            );

            let request = MaskRequest::for_frame(
                mask.text_prompt.clone().unwrap_or_default(),
                frame.image_ref.clone(),
            )
            .with_negative_prompt(mask.negative_prompt.clone())
            .with_points(points.clone());
            request
                .validate()
                .map_err(|e| WorkflowError::validation(e.to_string()))?;

            let ticket = self.shared.begin_request(
                &mut inner,
                WorkflowState::PreviewGenerating {
                    frame_index: frame.index,
                },
            )?;
            (ticket, request, points)
        };

        let response = self.shared.mask.generate(&request).await;
        metrics::record_mask_request("refine", response.is_ok());

        let mut inner = self.shared.inner.lock().await;
        let prior = inner.end_request(&ticket, "refine")?;
        let response = match response {
            Ok(response) => response,
            Err(e) => return Err(self.shared.rollback(&mut inner, prior, WorkflowError::Mask(e))),
        };

        let refined = MaskData {
            preview_image: response.preview_or_mask_reference,
            preview_is_video: response.is_video,
            prediction_id: response.prediction_id.or(mask.prediction_id.clone()),
            visual_prompt_points: points,
            ..mask
        };
        if let Err(e) = inner.store.apply(vec![
            Mutation::SetMaskData(Some(refined.clone())),
            Mutation::SetPendingMaskOperation(None),
        ]) {
            return Err(self.shared.rollback(&mut inner, prior, e));
        }
        let action = inner.store.state().pending_action.unwrap_or_default();
        self.shared.transition(&mut inner, WorkflowState::AwaitingConfirmation);
        self.shared.emit(WorkflowEvent::PreviewReady {
            mask: refined.clone(),
            action,
        });
        Ok(refined)
    }
}

/// Mask, source resolution and frame a refinement works against.
fn refinement_target(inner: &Inner) -> WorkflowResult<(MaskData, Resolution, SampledFrame)> {
    let mask = inner.mask()?;
    let source = mask.source_resolution().ok_or_else(|| {
        WorkflowError::validation("mask has no source resolution; cannot hit-test it")
    })?;
    let frame_index = mask
        .frame_index
        .or(inner.store.state().selected_frame_index)
        .ok_or_else(|| WorkflowError::validation("mask is not tied to a frame"))?;
    let frame = inner.frame(frame_index)?;
    Ok((mask, source, frame))
}
