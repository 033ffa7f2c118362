//! Chat/embedding/imagine façade
//!
//! Selects provider and model, assembles prompts (plain history backtrack
//! or retrieval-augmented context), and for streaming chats runs a
//! background task that feeds every normalized delta into the session
//! cache. Quota is checked at start but consumed only at a successful,
//! non-empty stream end.

use std::sync::Arc;

use futures::{Stream, StreamExt};
use uuid::Uuid;

use crate::cache::KvCache;
use crate::error::{PolychatError, Result};
use crate::imagine::{poll_task_stream, PollOptions, ProviderTaskSource};
use crate::messages::{ChatMessage, Role};
use crate::providers::{
    CanonicalChatResponse, ChatOptions, ImagineOutcome, ImagineRequest, ImagineTask,
    ProviderClient, ProviderKind,
};
use crate::retrieval::{self, ProviderEmbedder, RankedPage};
use crate::session::{ChatStreamSession, SessionStore};
use crate::store::{ChatStore, ObjectStorage, QuotaStore};
use crate::streaming::{ChatStream, StreamEvent};

/// Pages considered before the token budget is applied
const RETRIEVAL_TOP_K: usize = 10;

/// One chat invocation
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub user_id: i64,
    pub dialog_id: i64,
    pub prompt: String,
    /// Defaults to the configured provider when unset
    pub provider: Option<ProviderKind>,
    /// Retrieval-augmented chat when set
    pub resource_id: Option<i64>,
    pub options: ChatOptions,
}

impl ChatRequest {
    #[must_use]
    pub fn new(user_id: i64, dialog_id: i64, prompt: impl Into<String>) -> Self {
        Self {
            user_id,
            dialog_id,
            prompt: prompt.into(),
            provider: None,
            resource_id: None,
            options: ChatOptions::default(),
        }
    }
}

/// Multi-provider chat orchestrator
pub struct Orchestrator {
    client: ProviderClient,
    sessions: SessionStore,
    store: Arc<dyn ChatStore>,
    quota: Arc<dyn QuotaStore>,
    storage: Arc<dyn ObjectStorage>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(
        client: ProviderClient,
        cache: Arc<dyn KvCache>,
        store: Arc<dyn ChatStore>,
        quota: Arc<dyn QuotaStore>,
        storage: Arc<dyn ObjectStorage>,
    ) -> Self {
        let sessions = SessionStore::new(cache, client.config().session_ttl);
        Self {
            client,
            sessions,
            store,
            quota,
            storage,
        }
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Non-streaming chat
    ///
    /// # Errors
    ///
    /// Quota, parameter, transport, protocol and provider errors propagate
    /// synchronously.
    pub async fn chat(&self, req: &ChatRequest) -> Result<CanonicalChatResponse> {
        self.precheck_quota(req.user_id).await?;
        let kind = self.client.resolve(req.provider);
        let prompts = self.build_prompts(req).await?;

        let response = self.client.chat(kind, &prompts, &req.options).await?;

        self.store
            .append_chat(req.dialog_id, Role::User, &req.prompt)
            .await?;
        if !response.content.is_empty() {
            self.store
                .append_chat(req.dialog_id, Role::Assistant, &response.content)
                .await?;
            self.consume_chance(req.user_id).await;
        }
        Ok(response)
    }

    /// Start a streaming chat
    ///
    /// Returns the freshly created session once the upstream stream is open
    /// and the background writer is running; progress is observed through
    /// [`Orchestrator::poll_stream`]. Errors after this point are recorded
    /// on the session, not thrown.
    ///
    /// # Errors
    ///
    /// `SessionConflict` while a previous session is live; quota and
    /// connection-time errors propagate synchronously.
    pub async fn chat_stream(&self, req: &ChatRequest) -> Result<ChatStreamSession> {
        self.precheck_quota(req.user_id).await?;
        let kind = self.client.resolve(req.provider);
        let prompts = self.build_prompts(req).await?;

        let session = self.sessions.begin(req.user_id, req.dialog_id).await?;

        let stream = match self.client.chat_stream(kind, &prompts, &req.options).await {
            Ok(stream) => stream,
            Err(e) => {
                // The slot must not stay occupied by a stream that never started
                self.sessions.clear(req.user_id).await.ok();
                return Err(e);
            }
        };

        if let Err(e) = self
            .store
            .append_chat(req.dialog_id, Role::User, &req.prompt)
            .await
        {
            self.sessions.clear(req.user_id).await.ok();
            return Err(e);
        }

        let snapshot = session.clone();
        tokio::spawn(run_stream_session(
            self.sessions.clone(),
            Arc::clone(&self.store),
            Arc::clone(&self.quota),
            session,
            stream,
        ));
        Ok(snapshot)
    }

    /// Read the current stream session for a polling client
    ///
    /// # Errors
    ///
    /// Cache failures only; an expired or absent session is `None`.
    pub async fn poll_stream(&self, user_id: i64) -> Result<Option<ChatStreamSession>> {
        self.sessions.poll(user_id).await
    }

    /// Embed a batch of texts with an embedding-capable provider
    ///
    /// # Errors
    ///
    /// Parameter and provider errors propagate.
    pub async fn embed(
        &self,
        texts: &[String],
        provider: Option<ProviderKind>,
    ) -> Result<Vec<Vec<f32>>> {
        let kind = self.embedding_provider(provider);
        self.client.embed(kind, texts).await
    }

    /// Embed a resource's text into pages, on demand
    ///
    /// # Errors
    ///
    /// Fails when the resource has no stored text or the embedding
    /// provider rejects the request.
    pub async fn embed_resource(&self, resource_id: i64, reset: bool) -> Result<usize> {
        let text = self
            .store
            .find_resource_text(resource_id)
            .await?
            .ok_or_else(|| PolychatError::Store(format!("resource {resource_id} not found")))?;

        let embedder = self.embedder(None);
        let pages = retrieval::embed_resource(
            self.store.as_ref(),
            &embedder,
            resource_id,
            &text,
            self.client.config().page_min_tokens,
            reset,
        )
        .await?;
        Ok(pages.len())
    }

    /// Rank a resource's pages against a query
    ///
    /// # Errors
    ///
    /// Embedding and store failures propagate.
    pub async fn query_resource(
        &self,
        query: &str,
        resource_id: i64,
        limit: usize,
        max_distance: Option<f32>,
    ) -> Result<Vec<RankedPage>> {
        let embedder = self.embedder(None);
        retrieval::query_resource(
            self.store.as_ref(),
            &embedder,
            query,
            resource_id,
            limit,
            max_distance,
        )
        .await
    }

    /// Submit an image-generation job
    ///
    /// Polling providers return a zero-progress task handle; synchronous
    /// providers return a finished task whose image went through object
    /// storage.
    ///
    /// # Errors
    ///
    /// Parameter, transport and provider errors propagate.
    pub async fn imagine(
        &self,
        provider: Option<ProviderKind>,
        req: &ImagineRequest,
    ) -> Result<ImagineTask> {
        let kind = provider.unwrap_or(ProviderKind::MidJourney);

        match self.client.imagine(kind, req).await? {
            ImagineOutcome::Submitted { task_id } => Ok(ImagineTask {
                task_id,
                progress: 0,
                image_url: None,
                fail_reason: None,
            }),
            ImagineOutcome::Images(images) => {
                let first = images
                    .into_iter()
                    .next()
                    .ok_or_else(|| PolychatError::Protocol("provider returned no images".into()))?;
                let name = format!("{}.png", Uuid::new_v4());
                let url = self.storage.put_file(&name, &first).await?;
                Ok(ImagineTask {
                    task_id: name,
                    progress: 100,
                    image_url: Some(url),
                    fail_reason: None,
                })
            }
        }
    }

    /// Observe a submitted imagine task until it terminates
    pub fn imagine_stream(
        &self,
        provider: Option<ProviderKind>,
        task_id: String,
    ) -> impl Stream<Item = Result<ImagineTask>> + Send {
        let kind = provider.unwrap_or(ProviderKind::MidJourney);
        let cfg = self.client.config();
        poll_task_stream(
            ProviderTaskSource {
                client: self.client.clone(),
                kind,
            },
            task_id,
            PollOptions {
                interval: cfg.imagine_poll_interval,
                max_polls: cfg.imagine_max_polls,
            },
        )
    }

    async fn precheck_quota(&self, user_id: i64) -> Result<()> {
        let chances = self.quota.chances(user_id).await?;
        if chances.pick().is_none() {
            return Err(PolychatError::QuotaExhausted(format!(
                "user {user_id} has no chat chances left"
            )));
        }
        Ok(())
    }

    /// Debit one chance, free bucket first; failures are logged, not raised
    async fn consume_chance(&self, user_id: i64) {
        consume_chance(self.quota.as_ref(), user_id).await;
    }

    /// Pick a provider that supports embeddings
    fn embedding_provider(&self, requested: Option<ProviderKind>) -> ProviderKind {
        let kind = self.client.resolve(requested);
        match kind {
            ProviderKind::OpenAi | ProviderKind::Glm | ProviderKind::Baidu => kind,
            _ => ProviderKind::Glm,
        }
    }

    fn embedder(&self, requested: Option<ProviderKind>) -> ProviderEmbedder {
        ProviderEmbedder {
            client: self.client.clone(),
            kind: self.embedding_provider(requested),
        }
    }

    async fn build_prompts(&self, req: &ChatRequest) -> Result<Vec<ChatMessage>> {
        match req.resource_id {
            Some(resource_id) => self.build_rag_prompts(req, resource_id).await,
            None => self.build_history_prompts(req).await,
        }
    }

    /// Last N turns in chronological order, then the new user turn
    async fn build_history_prompts(&self, req: &ChatRequest) -> Result<Vec<ChatMessage>> {
        let backtrack = self.client.config().history_backtrack;
        let mut recent = self.store.recent_chats(req.dialog_id, backtrack).await?;
        recent.reverse();

        let mut messages: Vec<ChatMessage> = recent
            .into_iter()
            .map(|c| ChatMessage {
                role: c.role,
                content: c.content,
                name: None,
            })
            .collect();
        messages.push(ChatMessage::user(req.prompt.clone()));
        Ok(messages)
    }

    /// Embed on demand, rank pages, fit the token budget, assemble context
    async fn build_rag_prompts(
        &self,
        req: &ChatRequest,
        resource_id: i64,
    ) -> Result<Vec<ChatMessage>> {
        let existing = self.store.find_resource_pages(resource_id).await?;
        if existing.is_empty() {
            self.embed_resource(resource_id, false).await?;
        }

        let embedder = self.embedder(req.provider);
        let ranked = retrieval::query_resource(
            self.store.as_ref(),
            &embedder,
            &req.prompt,
            resource_id,
            RETRIEVAL_TOP_K,
            None,
        )
        .await?;
        let pages = retrieval::budget_pages(ranked, self.client.config().context_token_budget);
        let context = retrieval::build_context(&pages);

        Ok(vec![
            ChatMessage::system(format!(
                "Answer the question using only the document excerpts below.\n\n{context}"
            )),
            ChatMessage::user(req.prompt.clone()),
        ])
    }
}

/// Consume the normalized stream into the session cache
///
/// Runs detached from the request that started the chat. Every outcome ends
/// the session: deltas append, a terminal event finalizes, any error is
/// recorded on the session for the next poll to surface.
async fn run_stream_session(
    sessions: SessionStore,
    store: Arc<dyn ChatStore>,
    quota: Arc<dyn QuotaStore>,
    mut session: ChatStreamSession,
    mut stream: ChatStream,
) {
    let user_id = session.owner_user_id;
    let dialog_id = session.dialog_id;

    while let Some(event) = stream.next().await {
        match event {
            Ok(StreamEvent::Delta { content }) => {
                if let Err(e) = sessions.append_delta(&mut session, &content).await {
                    tracing::error!(user_id, error = %e, "session write failed");
                    sessions.fail(&mut session, e.to_string()).await.ok();
                    return;
                }
            }
            Ok(StreamEvent::Done { .. }) => break,
            Err(e) => {
                tracing::warn!(user_id, error = %e, "chat stream failed");
                sessions.fail(&mut session, e.to_string()).await.ok();
                return;
            }
        }
    }

    // An empty completion is an error outcome and consumes no quota
    if session.content.is_empty() {
        sessions
            .fail(&mut session, "empty response from provider".to_string())
            .await
            .ok();
        return;
    }

    let message_id = match store
        .append_chat(dialog_id, Role::Assistant, &session.content)
        .await
    {
        Ok(id) => id,
        Err(e) => {
            tracing::error!(user_id, error = %e, "failed to persist assistant message");
            sessions.fail(&mut session, e.to_string()).await.ok();
            return;
        }
    };

    consume_chance(quota.as_ref(), user_id).await;

    if let Err(e) = sessions.finish(&mut session, Some(message_id)).await {
        tracing::error!(user_id, error = %e, "failed to finalize session");
    }
}

async fn consume_chance(quota: &dyn QuotaStore, user_id: i64) {
    match quota.chances(user_id).await.map(crate::store::Chances::pick) {
        Ok(Some(kind)) => {
            if let Err(e) = quota.debit(user_id, kind).await {
                tracing::warn!(user_id, error = %e, "chance debit failed");
            }
        }
        Ok(None) => {
            tracing::warn!(user_id, "chat completed with no remaining chances");
        }
        Err(e) => {
            tracing::warn!(user_id, error = %e, "chance lookup failed");
        }
    }
}
