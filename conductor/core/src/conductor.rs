//! Stream Orchestrator
//!
//! The top-level state machine. For every chat request it:
//!
//! 1. validates the request
//! 2. registers a fresh [`GenerationHandle`], cancelling any generation the
//!    session already had in flight
//! 3. appends the User message and compacts the history to budget
//! 4. spawns one task that streams the answer (backend or canned) into the
//!    client's [`DeliveryChannel`]
//! 5. on natural completion commits the Assistant message and signals done
//!
//! Explicit stop, client disconnect and the generation timeout all end in
//! `Cancelled`: the backend stream is dropped, the buffer is discarded and
//! nothing is committed. Any backend error is reported once via `on_error`
//! and ends in `Failed`.
//!
//! The orchestrator is UI-agnostic and cheap to clone; hand a clone to every
//! connection handler.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::backend::{
    InferenceBackend, InferenceRequest, ModelParams, RetryPolicy, RetryingInferenceClient,
};
use crate::error::{BackendError, ConductorError, ConductorResult, ValidationError};
use crate::messages::{ChatRequest, GenerationId, MessageRole, SessionId, STOPPED_ACK};
use crate::session::{
    estimate_tokens, ActivityBoard, ConversationHistory, ConversationStore, HistoryCompactor,
    SessionActivity, DEFAULT_MAX_HISTORY_TOKENS,
};
use crate::storage::{FileStore, NoopFileStore};
use crate::streaming::{
    CancellationRegistry, DeliveryChannel, FallbackResponder, GenerationHandle, GenerationState,
    DEFAULT_CHUNK_DELAY,
};

/// System prompt used when none is configured
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful AI assistant. Answer the user's questions clearly and accurately.";

/// Upper bound on one generation's lifetime
pub const DEFAULT_GENERATION_TIMEOUT: Duration = Duration::from_secs(180);

/// Orchestrator configuration
#[derive(Clone, Debug)]
pub struct ConductorConfig {
    /// Seed for every new history
    pub system_prompt: String,
    /// History budget in estimated tokens
    pub max_history_tokens: usize,
    /// Model parameters; `enable_search` is set per request
    pub model: ModelParams,
    /// Backend retry policy
    pub retry: RetryPolicy,
    /// Generations still running after this are cancelled
    pub generation_timeout: Duration,
    /// Serve built-in canned answers
    pub fallback_enabled: bool,
    /// Pause between canned chunks
    pub fallback_chunk_delay: Duration,
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_history_tokens: DEFAULT_MAX_HISTORY_TOKENS,
            model: ModelParams::default(),
            retry: RetryPolicy::default(),
            generation_timeout: DEFAULT_GENERATION_TIMEOUT,
            fallback_enabled: true,
            fallback_chunk_delay: DEFAULT_CHUNK_DELAY,
        }
    }
}

/// Handle on a started generation
#[derive(Debug)]
pub struct GenerationTicket {
    generation_id: GenerationId,
    task: JoinHandle<GenerationState>,
}

impl GenerationTicket {
    /// Id of the started generation
    #[must_use]
    pub fn generation_id(&self) -> GenerationId {
        self.generation_id
    }

    /// Wait for the generation to reach a terminal state
    pub async fn wait(self) -> GenerationState {
        match self.task.await {
            Ok(state) => state,
            Err(err) => {
                error!(generation = %self.generation_id, error = %err, "Generation task died");
                GenerationState::Failed
            }
        }
    }
}

/// How a generation's task ended
enum Outcome {
    Finished,
    Failed(BackendError),
    Cancelled,
    Disconnected,
    TimedOut,
}

struct Inner {
    config: ConductorConfig,
    store: ConversationStore,
    compactor: HistoryCompactor,
    client: RetryingInferenceClient,
    registry: CancellationRegistry,
    activity: ActivityBoard,
    fallback: FallbackResponder,
    files: Arc<dyn FileStore>,
}

/// Builder for [`StreamOrchestrator`]
pub struct OrchestratorBuilder {
    backend: Arc<dyn InferenceBackend>,
    config: ConductorConfig,
    files: Arc<dyn FileStore>,
    fallback: Option<FallbackResponder>,
}

impl OrchestratorBuilder {
    /// Use `config`
    #[must_use]
    pub fn config(mut self, config: ConductorConfig) -> Self {
        self.config = config;
        self
    }

    /// Delete session files through `files` on clear
    #[must_use]
    pub fn file_store(mut self, files: Arc<dyn FileStore>) -> Self {
        self.files = files;
        self
    }

    /// Replace the built-in canned answers
    #[must_use]
    pub fn fallback(mut self, fallback: FallbackResponder) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Build the orchestrator
    #[must_use]
    pub fn build(self) -> StreamOrchestrator {
        let config = self.config;
        let fallback = match self.fallback {
            Some(fallback) => fallback,
            None if config.fallback_enabled => {
                FallbackResponder::builtin(config.fallback_chunk_delay)
            }
            None => FallbackResponder::empty(config.fallback_chunk_delay),
        };

        StreamOrchestrator {
            inner: Arc::new(Inner {
                store: ConversationStore::new(config.system_prompt.clone()),
                compactor: HistoryCompactor::new(config.max_history_tokens),
                client: RetryingInferenceClient::new(self.backend, config.retry.clone()),
                registry: CancellationRegistry::new(),
                activity: ActivityBoard::new(),
                fallback,
                files: self.files,
                config,
            }),
        }
    }
}

/// Session-scoped streaming chat orchestrator
#[derive(Clone)]
pub struct StreamOrchestrator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for StreamOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamOrchestrator")
            .field("sessions", &self.inner.store.len())
            .field("active", &self.inner.registry.len())
            .finish_non_exhaustive()
    }
}

impl StreamOrchestrator {
    /// Orchestrator over `backend` with `config`
    pub fn new(backend: Arc<dyn InferenceBackend>, config: ConductorConfig) -> Self {
        Self::builder(backend).config(config).build()
    }

    /// Start building an orchestrator over `backend`
    pub fn builder(backend: Arc<dyn InferenceBackend>) -> OrchestratorBuilder {
        OrchestratorBuilder {
            backend,
            config: ConductorConfig::default(),
            files: Arc::new(NoopFileStore),
            fallback: None,
        }
    }

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> &ConductorConfig {
        &self.inner.config
    }

    /// Start a streaming generation for `request`
    ///
    /// Must be called from within a tokio runtime. Validation, registration,
    /// the User append and compaction all happen before this returns; the
    /// answer itself is produced on a spawned task.
    ///
    /// # Errors
    ///
    /// [`ConductorError::Validation`] for a missing session id, an empty
    /// question, or a question that cannot fit the history budget.
    pub fn start(
        &self,
        request: ChatRequest,
        channel: Arc<dyn DeliveryChannel>,
    ) -> ConductorResult<GenerationTicket> {
        self.inner.validate(&request)?;
        let canned = self
            .inner
            .fallback
            .lookup(&request.question)
            .map(str::to_string);
        let (handle, inference) = self.inner.begin(&request)?;

        info!(
            session = %request.session_id,
            generation = %handle.id(),
            question_chars = request.question.chars().count(),
            search = request.options.enable_search,
            canned = canned.is_some(),
            "Generation started"
        );

        let generation_id = handle.id();
        let inner = Arc::clone(&self.inner);
        let task = match inference {
            Some(inference) => {
                tokio::spawn(async move { inner.run(handle, channel, inference, canned).await })
            }
            None => tokio::spawn(async move { handle.state() }),
        };

        Ok(GenerationTicket {
            generation_id,
            task,
        })
    }

    /// Stop the session's in-flight generation
    ///
    /// Unknown session or no active generation is a no-op. Always returns
    /// the `"stopped"` acknowledgement.
    pub fn cancel(&self, session: &SessionId) -> &'static str {
        if self.inner.registry.cancel(session) {
            info!(session = %session, "Generation stopped by request");
        } else {
            debug!(session = %session, "Stop requested with nothing in flight");
        }
        STOPPED_ACK
    }

    /// Non-streaming answer for `request`
    ///
    /// Same single-writer registration and commit rules as [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// Validation errors, backend errors after retries, or
    /// [`ConductorError::Cancelled`] if replaced, stopped or timed out.
    pub async fn ask(&self, request: ChatRequest) -> ConductorResult<String> {
        self.inner.validate(&request)?;
        let canned = self
            .inner
            .fallback
            .lookup(&request.question)
            .map(str::to_string);
        let (handle, inference) = self.inner.begin(&request)?;
        let Some(inference) = inference else {
            return Err(ConductorError::Cancelled);
        };
        let result = self.inner.answer(&handle, &inference, canned).await;
        self.inner.finish(&handle, result.as_ref().err().map(ToString::to_string));
        result
    }

    /// Forget a session
    ///
    /// Cancels any in-flight generation, drops the history and asks the file
    /// store to delete the session's files in the background. Storage errors
    /// are logged, never returned. Returns whether a history existed.
    pub async fn clear(&self, session: &SessionId) -> bool {
        self.inner.registry.cancel(session);
        let existed = self.inner.store.remove(session).is_some();
        self.inner.activity.remove(session);

        let files = Arc::clone(&self.inner.files);
        let session_for_files = session.clone();
        tokio::spawn(async move {
            if let Err(err) = files.delete_session(&session_for_files).await {
                warn!(session = %session_for_files, error = %err, "Failed to delete session files");
            }
        });

        info!(session = %session, existed, "Session cleared");
        existed
    }

    /// Read-only snapshot of the session's history
    #[must_use]
    pub fn history(&self, session: &SessionId) -> Option<Arc<ConversationHistory>> {
        self.inner.store.snapshot(session)
    }

    /// Last known generation outcome for the session
    #[must_use]
    pub fn activity(&self, session: &SessionId) -> Option<SessionActivity> {
        self.inner.activity.get(session)
    }

    /// Sessions with a generation in flight
    #[must_use]
    pub fn active_generations(&self) -> Vec<(SessionId, GenerationId)> {
        self.inner.registry.active()
    }

    /// Number of sessions with a history
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.inner.store.len()
    }

    /// Cancel everything in flight
    pub fn shutdown(&self) -> usize {
        let cancelled = self.inner.registry.cancel_all();
        info!(cancelled, "Orchestrator shut down");
        cancelled
    }
}

impl Inner {
    fn validate(&self, request: &ChatRequest) -> Result<(), ValidationError> {
        if request.session_id.is_blank() {
            return Err(ValidationError::MissingSessionId);
        }
        if request.question.trim().is_empty() {
            return Err(ValidationError::EmptyQuestion);
        }

        let budget = self
            .compactor
            .max_tokens()
            .saturating_sub(estimate_tokens(self.store.system_prompt()));
        let tokens = estimate_tokens(&request.question);
        if tokens > budget {
            return Err(ValidationError::QuestionTooLong { tokens, budget });
        }
        Ok(())
    }

    /// Register a fresh handle, cancelling whatever the session had in flight
    fn register(&self, session: &SessionId) -> Arc<GenerationHandle> {
        let handle = Arc::new(GenerationHandle::new(session.clone()));
        self.registry.set(Arc::clone(&handle));
        self.activity.begin(session, handle.id());
        handle
    }

    /// Append the User message and compact, under the handle's state lock
    ///
    /// `Ok(None)` means the handle was replaced or stopped before it got to
    /// write; the history is left untouched.
    fn prepare(
        &self,
        handle: &GenerationHandle,
        request: &ChatRequest,
    ) -> ConductorResult<Option<InferenceRequest>> {
        let params = self
            .config
            .model
            .clone()
            .with_search(request.options.enable_search);
        let compactor = self.compactor;

        let prepared = handle.while_created(|| {
            self.store.update(handle.session(), |history| {
                history.push(MessageRole::User, request.question.as_str())?;
                if compactor.needs_compaction(history) {
                    *history = compactor.compact(history);
                }
                Ok::<_, ConductorError>(InferenceRequest::from_history(history, params))
            })
        });

        match prepared {
            Some(Ok(inference)) => Ok(Some(inference)),
            Some(Err(err)) => {
                handle.fail(|| {});
                self.finish(handle, Some(err.to_string()));
                Err(err)
            }
            None => {
                debug!(
                    session = %handle.session(),
                    generation = %handle.id(),
                    "Replaced before the question was recorded"
                );
                self.finish(handle, None);
                Ok(None)
            }
        }
    }

    /// Register, then record the question
    fn begin(
        &self,
        request: &ChatRequest,
    ) -> ConductorResult<(Arc<GenerationHandle>, Option<InferenceRequest>)> {
        let handle = self.register(&request.session_id);
        let inference = self.prepare(&handle, request)?;
        Ok((handle, inference))
    }

    async fn run(
        self: Arc<Self>,
        handle: Arc<GenerationHandle>,
        channel: Arc<dyn DeliveryChannel>,
        request: InferenceRequest,
        canned: Option<String>,
    ) -> GenerationState {
        if !handle.mark_running() {
            // Replaced or stopped before the task got going
            self.finish(&handle, None);
            return handle.state();
        }

        let token = handle.token().clone();
        let timeout = sleep(self.config.generation_timeout);
        let disconnected = channel.disconnected();
        tokio::pin!(timeout, disconnected);

        let outcome = tokio::select! {
            biased;
            () = token.cancelled() => Outcome::Cancelled,
            () = &mut disconnected => Outcome::Disconnected,
            () = &mut timeout => Outcome::TimedOut,
            result = self.pump(&handle, channel.as_ref(), &request, canned) => match result {
                Ok(()) => Outcome::Finished,
                Err(err) => Outcome::Failed(err),
            },
        };

        let session = handle.session();
        let mut reported = None;
        match outcome {
            Outcome::Finished => {
                let committed =
                    handle.complete(|text| self.commit(session, text, channel.as_ref()));
                match committed {
                    Some(Ok(())) => info!(
                        session = %session,
                        generation = %handle.id(),
                        chunks = handle.chunks_delivered(),
                        elapsed_ms = handle.elapsed().as_millis() as u64,
                        "Generation completed"
                    ),
                    Some(Err(err)) => reported = Some(err.to_string()),
                    None => debug!(session = %session, "Generation cancelled at completion"),
                }
            }
            Outcome::Failed(err) => {
                let message = err.to_string();
                if handle.fail(|| channel.on_error(&message)) {
                    error!(
                        session = %session,
                        generation = %handle.id(),
                        error = %message,
                        "Generation failed"
                    );
                    reported = Some(message);
                }
            }
            Outcome::Cancelled => {
                debug!(
                    session = %session,
                    generation = %handle.id(),
                    "Generation task observed cancel"
                );
            }
            Outcome::Disconnected => {
                self.registry.cancel_generation(session, handle.id());
                handle.cancel();
                info!(
                    session = %session,
                    generation = %handle.id(),
                    "Client disconnected, generation cancelled"
                );
            }
            Outcome::TimedOut => {
                self.registry.cancel_generation(session, handle.id());
                handle.cancel();
                warn!(
                    session = %session,
                    generation = %handle.id(),
                    timeout_secs = self.config.generation_timeout.as_secs(),
                    "Generation timed out"
                );
            }
        }

        self.finish(&handle, reported);
        handle.state()
    }

    /// Forward chunks until the stream ends or the handle stops accepting
    async fn pump(
        &self,
        handle: &GenerationHandle,
        channel: &dyn DeliveryChannel,
        request: &InferenceRequest,
        canned: Option<String>,
    ) -> Result<(), BackendError> {
        let mut chunks = match canned {
            Some(answer) => self.fallback.stream(&answer),
            None => self.client.stream_call(request).await?,
        };

        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;
            if chunk.is_empty() {
                continue;
            }
            if !handle.deliver(&chunk, channel) {
                break;
            }
        }
        Ok(())
    }

    /// Append the answer and signal completion; runs under the handle lock
    fn commit(
        &self,
        session: &SessionId,
        text: String,
        channel: &dyn DeliveryChannel,
    ) -> ConductorResult<()> {
        match self.store.append(session, MessageRole::Assistant, text) {
            Ok(_) => {
                channel.on_complete();
                Ok(())
            }
            Err(err) => {
                error!(session = %session, error = %err, "Failed to commit answer");
                channel.on_error(&err.to_string());
                Err(err)
            }
        }
    }

    async fn answer(
        &self,
        handle: &GenerationHandle,
        request: &InferenceRequest,
        canned: Option<String>,
    ) -> ConductorResult<String> {
        if !handle.mark_running() {
            return Err(ConductorError::Cancelled);
        }

        let content = match canned {
            Some(answer) => answer,
            None => {
                let call = self.client.call(request);
                tokio::select! {
                    biased;
                    () = handle.token().cancelled() => return Err(ConductorError::Cancelled),
                    () = sleep(self.config.generation_timeout) => {
                        self.registry.cancel_generation(handle.session(), handle.id());
                        handle.cancel();
                        warn!(session = %handle.session(), "Generation timed out");
                        return Err(ConductorError::Cancelled);
                    }
                    result = call => match result {
                        Ok(response) => response.content,
                        Err(err) => {
                            handle.fail(|| {});
                            return Err(err.into());
                        }
                    },
                }
            }
        };

        let session = handle.session();
        handle
            .complete(|_| {
                self.store
                    .append(session, MessageRole::Assistant, content.as_str())
                    .map(|_| content.clone())
            })
            .unwrap_or(Err(ConductorError::Cancelled))
    }

    /// Deregister and record the final state
    fn finish(&self, handle: &GenerationHandle, error: Option<String>) {
        self.registry.remove_if(handle.session(), handle.id());
        self.activity
            .finish(handle.session(), handle.id(), handle.state(), error);
    }
}
