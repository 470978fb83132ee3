//! Stream orchestration and the tool-use state machine
//!
//! Each chat request runs as its own stream: provider call in flight →
//! full text received → finalize, or execute a tool and go around again
//! with depth+1. The loop is iterative rather than recursive so stack use
//! stays bounded and cancellation checks live in one place. Cancellation
//! is terminal from any non-finalized state and reports nothing.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{
    Arc,
    atomic::{AtomicU32, AtomicU64, Ordering},
};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use wyrm_ai::{ChatEvent, ChatEventStream, ChatProvider};

use crate::{
    approval::{ApprovalOutcome, ApprovalRegistry},
    budget::{TokenBudget, estimate_tokens},
    config::ProviderConfig,
    conversation::{Conversation, Role, Summarizer},
    events::UiEvent,
    health::ConnectionHealth,
    retry::RetryConfig,
    tone,
    tools::{MAX_TOOL_DEPTH, ToolRequest, file_read, parse_tool_request, web_search},
};

/// How many hits a web search asks for
const SEARCH_RESULT_LIMIT: usize = 5;

/// One incoming chat request from the host application
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Which session's conversation this belongs to
    pub session_id: String,
    /// The player-facing message
    pub message: String,
    /// Current game-state text (initiative, active effects, location)
    #[serde(default)]
    pub context_text: String,
    /// Retrieval chunks backing this message
    #[serde(default)]
    pub chunk_ids: Vec<String>,
}

/// Display-ready response with extracted game-state mutations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FinalizedResponse {
    pub text: String,
    #[serde(default)]
    pub stat_changes: Vec<serde_json::Value>,
    #[serde(default)]
    pub dm_actions: Vec<serde_json::Value>,
}

/// External collaborator that turns raw model text into a display response
pub trait ResponseFinalizer: Send + Sync {
    fn finalize(&self, raw: &str) -> FinalizedResponse;
}

/// Finalizer that passes text through untouched; used by tests and tools
pub struct PassthroughFinalizer;

impl ResponseFinalizer for PassthroughFinalizer {
    fn finalize(&self, raw: &str) -> FinalizedResponse {
        FinalizedResponse {
            text: raw.to_string(),
            ..Default::default()
        }
    }
}

/// A pre-indexed reference passage from the external search index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub id: String,
    pub text: String,
}

/// External collaborator resolving chunk ids to passages
#[async_trait]
pub trait RetrievalIndex: Send + Sync {
    async fn lookup(&self, ids: &[String]) -> crate::error::Result<Vec<RetrievedChunk>>;
}

/// Index that resolves nothing; used when no rulebooks are indexed
pub struct NullIndex;

#[async_trait]
impl RetrievalIndex for NullIndex {
    async fn lookup(&self, _ids: &[String]) -> crate::error::Result<Vec<RetrievedChunk>> {
        Ok(vec![])
    }
}

/// Caller callbacks for one stream. `on_chunk` fires zero or more times;
/// `on_done` and `on_error` are mutually exclusive and fire at most once.
/// A cancelled stream fires neither.
pub struct StreamCallbacks {
    pub on_chunk: Box<dyn Fn(&str) + Send + Sync>,
    pub on_done: Box<dyn FnOnce(FinalizedResponse) + Send>,
    pub on_error: Box<dyn FnOnce(String) + Send>,
}

/// Dependency bundle injected into the orchestrator, swapped in tests
pub struct Deps {
    pub provider: Arc<dyn ChatProvider>,
    pub search: Arc<dyn web_search::SearchProvider>,
    pub retrieval: Arc<dyn RetrievalIndex>,
    pub finalizer: Arc<dyn ResponseFinalizer>,
    pub summarizer: Option<Arc<dyn Summarizer>>,
    pub budget: TokenBudget,
    pub retry: RetryConfig,
}

/// Status of an in-flight stream
#[derive(Debug, Clone, Serialize)]
pub struct StreamStatus {
    pub stream_id: String,
    pub session_id: String,
    pub depth: u32,
    pub awaiting_approval: bool,
}

struct StreamHandle {
    cancel: CancellationToken,
    depth: Arc<AtomicU32>,
    session_id: String,
}

/// Stream ids are unique for the lifetime of the process
static STREAM_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_stream_id() -> String {
    format!("stream-{}", STREAM_COUNTER.fetch_add(1, Ordering::Relaxed) + 1)
}

/// Owns the in-flight streams, per-session conversations, approval
/// registry, connection health, and provider configuration.
///
/// All fields are `Arc`-wrapped, so cloning is cheap; clones share state.
#[derive(Clone)]
pub struct Orchestrator {
    deps: Arc<Deps>,
    config: Arc<Mutex<ProviderConfig>>,
    conversations: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<Conversation>>>>>,
    streams: Arc<Mutex<HashMap<String, StreamHandle>>>,
    approvals: Arc<ApprovalRegistry>,
    health: Arc<ConnectionHealth>,
    events: broadcast::Sender<UiEvent>,
}

enum StreamOutcome {
    Finalize(String),
    Errored(String),
    Cancelled,
}

impl Orchestrator {
    /// Create an orchestrator with the persisted provider configuration
    pub fn new(deps: Deps) -> Self {
        Self::with_config(deps, ProviderConfig::load())
    }

    /// Create an orchestrator with an explicit configuration
    pub fn with_config(deps: Deps, config: ProviderConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            deps: Arc::new(deps),
            config: Arc::new(Mutex::new(config)),
            conversations: Arc::new(Mutex::new(HashMap::new())),
            streams: Arc::new(Mutex::new(HashMap::new())),
            approvals: Arc::new(ApprovalRegistry::new()),
            health: Arc::new(ConnectionHealth::new()),
            events,
        }
    }

    /// Subscribe to the host-to-UI push channel
    pub fn subscribe_events(&self) -> broadcast::Receiver<UiEvent> {
        self.events.subscribe()
    }

    /// Get the current provider configuration
    pub fn provider_config(&self) -> ProviderConfig {
        self.config.lock().clone()
    }

    /// Change the configured model and persist the configuration
    pub fn set_model(&self, model: impl Into<String>) {
        let mut config = self.config.lock();
        config.model = model.into();
        persist(&config);
    }

    /// Change the configured server URL and persist the configuration
    pub fn set_server_url(&self, url: impl Into<String>) {
        let mut config = self.config.lock();
        config.server_url = url.into();
        persist(&config);
    }

    /// Connection health for the provider this orchestrator talks to
    pub fn health(&self) -> &ConnectionHealth {
        &self.health
    }

    /// Get (or lazily create) the conversation for a session
    pub fn conversation(&self, session_id: &str) -> Arc<tokio::sync::Mutex<Conversation>> {
        let mut map = self.conversations.lock();
        map.entry(session_id.to_string())
            .or_insert_with(|| {
                let mut conv = Conversation::new(self.deps.budget.clone());
                if let Some(ref summarizer) = self.deps.summarizer {
                    conv.set_summarizer(Arc::clone(summarizer));
                }
                Arc::new(tokio::sync::Mutex::new(conv))
            })
            .clone()
    }

    /// Drop a session's messages and summaries
    pub async fn clear_conversation(&self, session_id: &str) {
        let conv = self.conversations.lock().get(session_id).cloned();
        if let Some(conv) = conv {
            conv.lock().await.clear();
        }
    }

    /// Ids of streams currently in flight
    pub fn active_streams(&self) -> Vec<String> {
        self.streams.lock().keys().cloned().collect()
    }

    /// Status of one in-flight stream
    pub fn stream_status(&self, stream_id: &str) -> Option<StreamStatus> {
        let streams = self.streams.lock();
        let handle = streams.get(stream_id)?;
        Some(StreamStatus {
            stream_id: stream_id.to_string(),
            session_id: handle.session_id.clone(),
            depth: handle.depth.load(Ordering::Acquire),
            awaiting_approval: self.approvals.has_pending(stream_id),
        })
    }

    /// Start a chat stream. Returns the stream id immediately; results
    /// arrive through the callbacks.
    pub fn start_chat(&self, request: ChatRequest, callbacks: StreamCallbacks) -> String {
        let stream_id = next_stream_id();
        let cancel = CancellationToken::new();
        let depth = Arc::new(AtomicU32::new(0));

        self.streams.lock().insert(
            stream_id.clone(),
            StreamHandle {
                cancel: cancel.clone(),
                depth: Arc::clone(&depth),
                session_id: request.session_id.clone(),
            },
        );
        let _ = self.events.send(UiEvent::StreamStarted {
            stream_id: stream_id.clone(),
            session_id: request.session_id.clone(),
        });

        let this = self.clone();
        let id = stream_id.clone();
        tokio::spawn(async move {
            this.run_stream(id, request, callbacks, cancel, depth).await;
        });

        stream_id
    }

    /// Signal a stream's cancellation token. Unknown ids are a silent
    /// no-op and never raise.
    pub fn cancel(&self, stream_id: &str) {
        if let Some(handle) = self.streams.lock().get(stream_id) {
            handle.cancel.cancel();
        }
    }

    /// Resolve a pending web-search approval for a stream
    pub fn approve_web_search(&self, stream_id: &str, approved: bool) -> ApprovalOutcome {
        self.approvals.resolve(stream_id, approved)
    }

    /// Discard a pending approval without resolving it.
    /// Returns false when none existed.
    pub fn clear_pending_web_search(&self, stream_id: &str) -> bool {
        self.approvals.discard(stream_id)
    }

    async fn run_stream(
        &self,
        stream_id: String,
        request: ChatRequest,
        callbacks: StreamCallbacks,
        cancel: CancellationToken,
        depth_counter: Arc<AtomicU32>,
    ) {
        let conv = self.conversation(&request.session_id);

        let mut context_text = request.context_text.clone();
        if !request.chunk_ids.is_empty() {
            match self.deps.retrieval.lookup(&request.chunk_ids).await {
                Ok(chunks) => {
                    append_chunks(&mut context_text, &chunks, self.deps.budget.retrieved_chunks)
                }
                Err(e) => tracing::warn!("retrieval lookup failed: {}", e),
            }
        }

        conv.lock().await.add_message(
            Role::User,
            request.message.clone(),
            request.chunk_ids.clone(),
        );

        let model = self.config.lock().model.clone();
        let mut depth: u32 = 0;

        let outcome = loop {
            depth_counter.store(depth, Ordering::Release);

            let api = conv.lock().await.messages_for_api(&context_text).await;

            let stream = match self.open_stream_with_retry(&api, &model, &cancel).await {
                Ok(stream) => stream,
                Err(e) => {
                    if cancel.is_cancelled() {
                        break StreamOutcome::Cancelled;
                    }
                    self.health.record_failure();
                    break StreamOutcome::Errored(e.to_string());
                }
            };

            let (full, failed, completed) =
                consume_stream(stream, &cancel, &callbacks.on_chunk).await;

            if cancel.is_cancelled() {
                break StreamOutcome::Cancelled;
            }
            if let Some(message) = failed {
                self.health.record_failure();
                break StreamOutcome::Errored(message);
            }
            if !completed {
                self.health.record_failure();
                break StreamOutcome::Errored("stream ended without completing".into());
            }
            self.health.record_success();

            // Past the depth limit the text is final, tags and all.
            if depth >= MAX_TOOL_DEPTH {
                break StreamOutcome::Finalize(full);
            }

            match parse_tool_request(&full) {
                None => break StreamOutcome::Finalize(full),

                Some(ToolRequest::FileRead(path)) => {
                    let result = file_read::read(&path).await;
                    let formatted = file_read::format(&path, &result);
                    let mut c = conv.lock().await;
                    c.add_message(Role::Assistant, full, vec![]);
                    c.add_message(Role::User, formatted, vec![]);
                    drop(c);
                    depth += 1;
                }

                Some(ToolRequest::WebSearch(query)) => {
                    let decision_rx = self.approvals.register(&stream_id);
                    let _ = self.events.send(UiEvent::WebSearchApprovalRequest {
                        stream_id: stream_id.clone(),
                        query: query.clone(),
                    });

                    let approved = tokio::select! {
                        _ = cancel.cancelled() => {
                            self.approvals.discard(&stream_id);
                            break StreamOutcome::Cancelled;
                        }
                        decision = decision_rx => decision.unwrap_or(false),
                    };

                    if !approved {
                        break StreamOutcome::Finalize(web_search::strip(&full));
                    }

                    let formatted = match self
                        .deps
                        .search
                        .search(&query, SEARCH_RESULT_LIMIT)
                        .await
                    {
                        Ok(hits) => web_search::format_results(&query, &hits),
                        Err(e) => {
                            tracing::warn!("web search failed: {}", e);
                            web_search::format_error(&query, &e.to_string())
                        }
                    };

                    let mut c = conv.lock().await;
                    c.add_message(Role::Assistant, full, vec![]);
                    c.add_message(Role::User, formatted, vec![]);
                    drop(c);
                    depth += 1;
                }
            }
        };

        match outcome {
            StreamOutcome::Cancelled => {
                tracing::debug!("stream {} cancelled", stream_id);
            }
            StreamOutcome::Errored(message) => {
                tracing::warn!("stream {} failed: {}", stream_id, message);
                (callbacks.on_error)(message);
            }
            StreamOutcome::Finalize(raw) => {
                let cleaned = tone::clean(&raw);
                let response = self.deps.finalizer.finalize(&cleaned);
                conv.lock()
                    .await
                    .add_message(Role::Assistant, response.text.clone(), vec![]);
                (callbacks.on_done)(response);
            }
        }

        // A pending approval never outlives its stream.
        self.approvals.discard(&stream_id);
        self.streams.lock().remove(&stream_id);
        let _ = self.events.send(UiEvent::StreamEnded { stream_id });
    }

    async fn open_stream_with_retry(
        &self,
        api: &crate::conversation::ApiMessages,
        model: &str,
        cancel: &CancellationToken,
    ) -> wyrm_ai::Result<ChatEventStream> {
        let mut attempt = 0u32;
        loop {
            match self
                .deps
                .provider
                .stream_chat(&api.system_prompt, &api.messages, model, cancel.clone())
                .await
            {
                Ok(stream) => return Ok(stream),
                Err(e) if attempt < self.deps.retry.max_retries && e.is_retryable() => {
                    let delay = self.deps.retry.delay_for_attempt(attempt);
                    tracing::warn!(
                        "provider call failed (attempt {}/{}): {}; retrying in {:?}",
                        attempt + 1,
                        self.deps.retry.max_retries + 1,
                        e,
                        delay
                    );
                    attempt += 1;
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(e),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Drain a provider stream, forwarding deltas to the caller.
/// Returns (accumulated_text, error_if_any, saw_done).
async fn consume_stream(
    mut stream: ChatEventStream,
    cancel: &CancellationToken,
    on_chunk: &(dyn Fn(&str) + Send + Sync),
) -> (String, Option<String>, bool) {
    let mut full = String::new();
    let mut failed = None;
    let mut completed = false;

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = stream.next() => match event {
                Some(event) => event,
                None => break,
            },
        };

        match event {
            ChatEvent::Delta { text } => {
                full.push_str(&text);
                on_chunk(&text);
            }
            ChatEvent::Done { text } => {
                full = text;
                completed = true;
            }
            ChatEvent::Error { message } => {
                failed = Some(message);
                break;
            }
        }
    }

    (full, failed, completed)
}

/// Append retrieval chunk text to the context, honoring the ceiling
fn append_chunks(context: &mut String, chunks: &[RetrievedChunk], ceiling: u32) {
    let mut used = 0u32;
    for chunk in chunks {
        let cost = estimate_tokens(&chunk.text);
        if used + cost > ceiling {
            tracing::debug!("dropping retrieval chunk {} over budget", chunk.id);
            continue;
        }
        used += cost;
        context.push_str("\n\n");
        context.push_str(&chunk.text);
    }
}

fn persist(config: &ProviderConfig) {
    if let Err(e) = config.save() {
        tracing::warn!("failed to save provider config: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::web_search::{SearchHit, SearchProvider};
    use std::time::Duration;
    use tokio::sync::oneshot;
    use wyrm_ai::{ChatMessage, ModelInfo};

    enum Scripted {
        Text(&'static str),
        Hang,
        Fail(&'static str),
    }

    /// Provider that plays back a fixed script of responses
    struct ScriptedProvider {
        script: Mutex<Vec<Scripted>>,
        captured: Mutex<Vec<(String, Vec<ChatMessage>)>>,
    }

    impl ScriptedProvider {
        fn new(script: Vec<Scripted>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script),
                captured: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ChatProvider for ScriptedProvider {
        async fn is_running(&self) -> bool {
            true
        }

        async fn list_models(&self) -> wyrm_ai::Result<Vec<ModelInfo>> {
            Ok(vec![])
        }

        async fn stream_chat(
            &self,
            system: &str,
            messages: &[ChatMessage],
            _model: &str,
            _cancel: CancellationToken,
        ) -> wyrm_ai::Result<ChatEventStream> {
            self.captured
                .lock()
                .push((system.to_string(), messages.to_vec()));

            let next = {
                let mut script = self.script.lock();
                if script.is_empty() {
                    Scripted::Text("and that is that.")
                } else {
                    script.remove(0)
                }
            };

            match next {
                Scripted::Text(text) => {
                    let text = text.to_string();
                    Ok(Box::pin(async_stream::stream! {
                        yield ChatEvent::Delta { text: text.clone() };
                        yield ChatEvent::Done { text };
                    }))
                }
                Scripted::Hang => Ok(Box::pin(futures::stream::pending::<ChatEvent>())),
                Scripted::Fail(message) => {
                    let message = message.to_string();
                    Ok(Box::pin(async_stream::stream! {
                        yield ChatEvent::Error { message };
                    }))
                }
            }
        }

        async fn chat_once(
            &self,
            _system: &str,
            _messages: &[ChatMessage],
            _model: &str,
        ) -> wyrm_ai::Result<String> {
            Ok("a recap".into())
        }
    }

    #[derive(Default)]
    struct StubSearch {
        calls: AtomicU32,
    }

    #[async_trait]
    impl SearchProvider for StubSearch {
        async fn search(
            &self,
            query: &str,
            _limit: usize,
        ) -> crate::error::Result<Vec<SearchHit>> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Ok(vec![SearchHit {
                title: format!("About {}", query),
                url: "https://example.com".into(),
                snippet: "An answer.".into(),
            }])
        }
    }

    struct Harness {
        orchestrator: Orchestrator,
        search: Arc<StubSearch>,
        provider: Arc<ScriptedProvider>,
    }

    fn harness(script: Vec<Scripted>) -> Harness {
        let provider = ScriptedProvider::new(script);
        let search = Arc::new(StubSearch::default());
        let deps = Deps {
            provider: provider.clone(),
            search: search.clone(),
            retrieval: Arc::new(NullIndex),
            finalizer: Arc::new(PassthroughFinalizer),
            summarizer: None,
            budget: TokenBudget::default(),
            retry: RetryConfig::none(),
        };
        Harness {
            orchestrator: Orchestrator::with_config(deps, ProviderConfig::default()),
            search,
            provider,
        }
    }

    struct Capture {
        callbacks: StreamCallbacks,
        chunks: Arc<Mutex<Vec<String>>>,
        done: oneshot::Receiver<FinalizedResponse>,
        error: oneshot::Receiver<String>,
    }

    fn capture() -> Capture {
        let chunks = Arc::new(Mutex::new(Vec::new()));
        let chunks_writer = Arc::clone(&chunks);
        let (done_tx, done) = oneshot::channel();
        let (error_tx, error) = oneshot::channel();

        Capture {
            callbacks: StreamCallbacks {
                on_chunk: Box::new(move |text| chunks_writer.lock().push(text.to_string())),
                on_done: Box::new(move |response| {
                    let _ = done_tx.send(response);
                }),
                on_error: Box::new(move |message| {
                    let _ = error_tx.send(message);
                }),
            },
            chunks,
            done,
            error,
        }
    }

    fn request(message: &str) -> ChatRequest {
        ChatRequest {
            session_id: "session-1".into(),
            message: message.into(),
            context_text: String::new(),
            chunk_ids: vec![],
        }
    }

    async fn wait_ended(rx: &mut broadcast::Receiver<UiEvent>) {
        loop {
            match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
                Ok(Ok(UiEvent::StreamEnded { .. })) => return,
                Ok(Ok(_)) => continue,
                other => panic!("stream did not end: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_plain_response_finalizes() {
        let h = harness(vec![Scripted::Text("The door creaks open.")]);
        let cap = capture();

        let id = h.orchestrator.start_chat(request("I open the door"), cap.callbacks);
        assert!(id.starts_with("stream-"));

        let response = tokio::time::timeout(Duration::from_secs(5), cap.done)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response.text, "The door creaks open.");
        assert_eq!(cap.chunks.lock().as_slice(), ["The door creaks open."]);

        // The stream deregisters itself.
        tokio::time::timeout(Duration::from_secs(2), async {
            while h.orchestrator.stream_status(&id).is_some() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_stream_ids_unique() {
        let h = harness(vec![]);
        let a = h.orchestrator.start_chat(request("one"), capture().callbacks);
        let b = h.orchestrator.start_chat(request("two"), capture().callbacks);
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_cancel_unknown_id_is_noop() {
        let h = harness(vec![]);
        h.orchestrator.cancel("stream-does-not-exist");
    }

    #[tokio::test]
    async fn test_cancelled_stream_reports_nothing() {
        let h = harness(vec![Scripted::Hang]);
        let cap = capture();
        let mut events = h.orchestrator.subscribe_events();

        let id = h.orchestrator.start_chat(request("hello?"), cap.callbacks);
        tokio::time::sleep(Duration::from_millis(20)).await;
        h.orchestrator.cancel(&id);

        wait_ended(&mut events).await;
        // Neither callback fired; both senders dropped unused.
        assert!(cap.done.await.is_err());
        assert!(cap.error.await.is_err());
    }

    #[tokio::test]
    async fn test_provider_error_reports_once() {
        let h = harness(vec![Scripted::Fail("connection refused")]);
        let cap = capture();

        let _ = h.orchestrator.start_chat(request("hello"), cap.callbacks);

        let message = tokio::time::timeout(Duration::from_secs(5), cap.error)
            .await
            .unwrap()
            .unwrap();
        assert!(message.contains("connection refused"));
        assert!(cap.done.await.is_err());
        assert_eq!(h.orchestrator.health().consecutive_failures(), 1);
    }

    #[tokio::test]
    async fn test_health_resets_on_success() {
        let h = harness(vec![
            Scripted::Fail("connection refused"),
            Scripted::Text("back online"),
        ]);

        let cap = capture();
        h.orchestrator.start_chat(request("first"), cap.callbacks);
        cap.error.await.unwrap();
        assert_eq!(h.orchestrator.health().consecutive_failures(), 1);

        let cap = capture();
        h.orchestrator.start_chat(request("second"), cap.callbacks);
        cap.done.await.unwrap();
        assert_eq!(h.orchestrator.health().consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn test_file_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lore.md");
        std::fs::write(&path, "The sword is cursed.").unwrap();

        let tag = format!(
            "[FILE_READ]{{\"path\": \"{}\"}}[/FILE_READ]",
            path.display()
        );
        let h = harness(vec![
            Scripted::Text(Box::leak(tag.into_boxed_str())),
            Scripted::Text("The blade hums with malice."),
        ]);
        let cap = capture();

        h.orchestrator
            .start_chat(request("what do I know about the sword?"), cap.callbacks);
        let response = tokio::time::timeout(Duration::from_secs(5), cap.done)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response.text, "The blade hums with malice.");

        // The tool exchange is recorded: user, assistant tag, synthetic
        // user result, final assistant.
        let conv = h.orchestrator.conversation("session-1");
        let conv = conv.lock().await;
        let contents: Vec<_> = conv.messages().iter().map(|m| m.content.clone()).collect();
        assert!(contents.iter().any(|c| c.contains("[FILE CONTENT:")));
        assert!(contents.iter().any(|c| c.contains("The sword is cursed.")));
    }

    #[tokio::test]
    async fn test_depth_limit_finalizes_without_tools() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "noted").unwrap();
        let tag: &'static str = Box::leak(
            format!("[FILE_READ]{{\"path\": \"{}\"}}[/FILE_READ]", path.display())
                .into_boxed_str(),
        );

        // The model asks for the same file forever.
        let h = harness(vec![
            Scripted::Text(tag),
            Scripted::Text(tag),
            Scripted::Text(tag),
            Scripted::Text(tag),
            Scripted::Text(tag),
        ]);
        let cap = capture();

        h.orchestrator.start_chat(request("loop forever"), cap.callbacks);
        let response = tokio::time::timeout(Duration::from_secs(5), cap.done)
            .await
            .unwrap()
            .unwrap();

        // The depth-limited response keeps its tag; no further execution.
        assert!(response.text.contains("[FILE_READ]"));

        let conv = h.orchestrator.conversation("session-1");
        let conv = conv.lock().await;
        let tool_results = conv
            .messages()
            .iter()
            .filter(|m| m.content.contains("[FILE CONTENT:"))
            .count();
        assert_eq!(tool_results, MAX_TOOL_DEPTH as usize);
    }

    #[tokio::test]
    async fn test_web_search_approved() {
        let h = harness(vec![
            Scripted::Text("[WEB_SEARCH]{\"query\": \"owlbear\"}[/WEB_SEARCH]"),
            Scripted::Text("Owlbears hate surprises."),
        ]);
        let cap = capture();
        let mut events = h.orchestrator.subscribe_events();

        let id = h.orchestrator.start_chat(request("what about owlbears?"), cap.callbacks);

        // Wait for the approval request on the push channel.
        let query = loop {
            match tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .unwrap()
                .unwrap()
            {
                UiEvent::WebSearchApprovalRequest { stream_id, query } => {
                    assert_eq!(stream_id, id);
                    break query;
                }
                _ => continue,
            }
        };
        assert_eq!(query, "owlbear");
        assert!(h.orchestrator.stream_status(&id).unwrap().awaiting_approval);

        let outcome = h.orchestrator.approve_web_search(&id, true);
        assert!(outcome.success);

        let response = tokio::time::timeout(Duration::from_secs(5), cap.done)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response.text, "Owlbears hate surprises.");
        assert_eq!(h.search.calls.load(Ordering::Relaxed), 1);

        let conv = h.orchestrator.conversation("session-1");
        let conv = conv.lock().await;
        assert!(
            conv.messages()
                .iter()
                .any(|m| m.content.contains("[SEARCH RESULTS: owlbear]"))
        );
    }

    #[tokio::test]
    async fn test_web_search_rejected_strips_tag() {
        let h = harness(vec![Scripted::Text(
            "Let me look. [WEB_SEARCH]{\"query\": \"owlbear\"}[/WEB_SEARCH]",
        )]);
        let cap = capture();
        let mut events = h.orchestrator.subscribe_events();

        let id = h.orchestrator.start_chat(request("owlbears?"), cap.callbacks);
        loop {
            if let UiEvent::WebSearchApprovalRequest { .. } =
                tokio::time::timeout(Duration::from_secs(5), events.recv())
                    .await
                    .unwrap()
                    .unwrap()
            {
                break;
            }
        }

        h.orchestrator.approve_web_search(&id, false);
        let response = tokio::time::timeout(Duration::from_secs(5), cap.done)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(response.text, "Let me look.");
        assert_eq!(h.search.calls.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_cancel_during_approval_wait_reports_nothing() {
        let h = harness(vec![Scripted::Text(
            "[WEB_SEARCH]{\"query\": \"owlbear\"}[/WEB_SEARCH]",
        )]);
        let cap = capture();
        let mut events = h.orchestrator.subscribe_events();

        let id = h.orchestrator.start_chat(request("owlbears?"), cap.callbacks);
        loop {
            if let UiEvent::WebSearchApprovalRequest { .. } =
                tokio::time::timeout(Duration::from_secs(5), events.recv())
                    .await
                    .unwrap()
                    .unwrap()
            {
                break;
            }
        }

        h.orchestrator.cancel(&id);
        wait_ended(&mut events).await;

        assert!(cap.done.await.is_err());
        assert!(cap.error.await.is_err());
        // The pending approval was discarded with the stream.
        assert!(!h.orchestrator.clear_pending_web_search(&id));
        assert_eq!(h.search.calls.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_approve_without_pending_request() {
        let h = harness(vec![]);
        let outcome = h.orchestrator.approve_web_search("stream-99999", true);
        assert!(!outcome.success);
        assert_eq!(
            outcome.error.as_deref(),
            Some("No pending web search request for this stream.")
        );
    }

    #[tokio::test]
    async fn test_clear_pending_without_request_is_false() {
        let h = harness(vec![]);
        assert!(!h.orchestrator.clear_pending_web_search("stream-99999"));
    }

    #[tokio::test]
    async fn test_finalize_cleans_tone() {
        let h = harness(vec![Scripted::Text("## The Vault\nGold **everywhere**.")]);
        let cap = capture();

        h.orchestrator.start_chat(request("we enter the vault"), cap.callbacks);
        let response = tokio::time::timeout(Duration::from_secs(5), cap.done)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response.text, "The Vault\nGold everywhere.");
    }

    #[tokio::test]
    async fn test_provider_receives_alternating_messages() {
        let h = harness(vec![Scripted::Text("noted")]);
        let cap = capture();

        // Seed the session with an awkward same-role history.
        let conv = h.orchestrator.conversation("session-1");
        {
            let mut c = conv.lock().await;
            c.add_message(Role::User, "first", vec![]);
            c.add_message(Role::User, "second", vec![]);
        }

        h.orchestrator.start_chat(request("third"), cap.callbacks);
        cap.done.await.unwrap();

        let captured = h.provider.captured.lock();
        let (_, messages) = &captured[0];
        assert_eq!(messages[0].role, wyrm_ai::ChatRole::User);
        for pair in messages.windows(2) {
            assert_ne!(pair[0].role, pair[1].role);
        }
    }

    #[tokio::test]
    async fn test_context_text_reaches_system_prompt() {
        let h = harness(vec![Scripted::Text("Roll initiative!")]);
        let cap = capture();

        let mut req = request("we attack");
        req.context_text = "Initiative: Kira 18, Ghoul 12".into();
        h.orchestrator.start_chat(req, cap.callbacks);
        cap.done.await.unwrap();

        let captured = h.provider.captured.lock();
        let (system, _) = &captured[0];
        assert!(system.contains("Combat is underway"));
        assert!(system.contains("Initiative: Kira 18"));
    }
}
