//! Shared fixtures for orchestration tests
//!
//! - [`ScriptedBackend`]: plays back one [`Step`] per call and counts calls
//! - [`RecordingChannel`]: records every event and can simulate a disconnect

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{stream, StreamExt};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use chat_conductor::{
    BackendError, ChatEvent, ChunkStream, DeliveryChannel, InferenceBackend, InferenceRequest,
    InferenceResponse,
};

/// What the backend does for one call
#[derive(Clone, Debug)]
pub enum Step {
    /// Stream these chunks immediately
    Chunks(Vec<&'static str>),
    /// Stream these chunks, waiting `delay` before each one
    Paced(Vec<&'static str>, Duration),
    /// Fail the call before any chunk
    Fail(BackendError),
    /// Stream these chunks, then fail the stream
    FailAfter(Vec<&'static str>, BackendError),
    /// Accept the call and never produce anything
    Hang,
}

/// Backend that replays a script; the last step repeats once the script runs out
pub struct ScriptedBackend {
    steps: Mutex<VecDeque<Step>>,
    last: Mutex<Option<Step>>,
    calls: AtomicUsize,
    questions: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into_iter().collect()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
            questions: Mutex::new(Vec::new()),
        })
    }

    pub fn answering(chunks: Vec<&'static str>) -> Arc<Self> {
        Self::new([Step::Chunks(chunks)])
    }

    /// Number of backend calls so far, retries included
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Last question of every request seen
    pub fn questions(&self) -> Vec<String> {
        self.questions.lock().clone()
    }

    fn next_step(&self, request: &InferenceRequest) -> Step {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.questions
            .lock()
            .push(request.last_question().unwrap_or_default().to_string());

        let mut last = self.last.lock();
        match self.steps.lock().pop_front() {
            Some(step) => {
                *last = Some(step.clone());
                step
            }
            None => last.clone().unwrap_or(Step::Hang),
        }
    }
}

#[async_trait]
impl InferenceBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn submit(&self, request: &InferenceRequest) -> Result<InferenceResponse, BackendError> {
        let content = match self.next_step(request) {
            Step::Chunks(chunks) => chunks.concat(),
            Step::Paced(chunks, delay) => {
                tokio::time::sleep(delay * chunks.len() as u32).await;
                chunks.concat()
            }
            Step::Fail(err) | Step::FailAfter(_, err) => return Err(err),
            Step::Hang => futures::future::pending().await,
        };
        Ok(InferenceResponse {
            content,
            model: "scripted".to_string(),
            tokens_used: None,
            duration_ms: None,
        })
    }

    async fn submit_streaming(
        &self,
        request: &InferenceRequest,
    ) -> Result<ChunkStream, BackendError> {
        match self.next_step(request) {
            Step::Chunks(chunks) => {
                Ok(stream::iter(chunks.into_iter().map(|c| Ok(c.to_string()))).boxed())
            }
            Step::Paced(chunks, delay) => Ok(stream::iter(chunks)
                .then(move |c| async move {
                    tokio::time::sleep(delay).await;
                    Ok(c.to_string())
                })
                .boxed()),
            Step::Fail(err) => Err(err),
            Step::FailAfter(chunks, err) => Ok(stream::iter(chunks)
                .map(|c| Ok::<_, BackendError>(c.to_string()))
                .chain(stream::once(async move { Err(err) }))
                .boxed()),
            Step::Hang => Ok(stream::pending::<Result<String, BackendError>>().boxed()),
        }
    }
}

/// Records events; [`disconnect`](Self::disconnect) simulates the client leaving
#[derive(Default)]
pub struct RecordingChannel {
    events: Mutex<Vec<ChatEvent>>,
    gone: CancellationToken,
}

impl RecordingChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<ChatEvent> {
        self.events.lock().clone()
    }

    /// Concatenated chunk text
    pub fn text(&self) -> String {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                ChatEvent::Message { content } => Some(content.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn terminal_events(&self) -> usize {
        self.events.lock().iter().filter(|e| e.is_terminal()).count()
    }

    pub fn disconnect(&self) {
        self.gone.cancel();
    }
}

#[async_trait]
impl DeliveryChannel for RecordingChannel {
    fn on_chunk(&self, text: &str) {
        self.events.lock().push(ChatEvent::chunk(text));
    }

    fn on_complete(&self) {
        self.events.lock().push(ChatEvent::done());
    }

    fn on_error(&self, error: &str) {
        self.events.lock().push(ChatEvent::error(error));
    }

    async fn disconnected(&self) {
        self.gone.cancelled().await;
    }
}
