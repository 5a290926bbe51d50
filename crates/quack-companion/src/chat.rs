//! Ordered chat transcript with streamed assistant replies.
//!
//! A send appends the user message and an empty assistant placeholder, then
//! grows the placeholder fragment by fragment. The transcript is persisted
//! after every change so a restart shows the partial reply.
use std::sync::Arc;

use futures::{Stream, StreamExt};
use tracing::{debug, warn};

use quack_common::model::{ChatMessage, ChatRole};
use quack_common::quack_api::{ApiError, ComplianceApi};
use quack_common::store::{self, StateStore};

use crate::credentials::CredentialManager;
use crate::error::{AppError, Precondition};

const CHAT_KEY: &str = "chat";

pub struct ChatTranscript {
    store: Arc<dyn StateStore>,
    messages: Vec<ChatMessage>,
}

impl ChatTranscript {
    pub async fn load(store: Arc<dyn StateStore>) -> Result<Self, AppError> {
        let messages = store::get_json(store.as_ref(), &store::key(CHAT_KEY))
            .await?
            .unwrap_or_default();
        Ok(Self { store, messages })
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    fn has_placeholder(&self) -> bool {
        matches!(
            self.messages.last(),
            Some(ChatMessage { role: ChatRole::Assistant, content }) if content.is_empty()
        )
    }

    /// Append the user message and an empty assistant placeholder.
    pub async fn append_user_message(&mut self, text: &str) -> Result<(), AppError> {
        if text.trim().is_empty() {
            return Err(Precondition::EmptyMessage.into());
        }
        // A placeholder left over from a failed send never received content.
        if self.has_placeholder() {
            self.messages.pop();
        }
        self.messages.push(ChatMessage::user(text));
        self.persist().await?;
        self.messages.push(ChatMessage::assistant(""));
        self.persist().await?;
        Ok(())
    }

    /// The history to submit: everything except the trailing placeholder.
    pub fn pending_history(&self) -> &[ChatMessage] {
        if self.has_placeholder() {
            &self.messages[..self.messages.len() - 1]
        } else {
            &self.messages
        }
    }

    /// Append a fragment to the last message.
    pub async fn on_fragment(&mut self, fragment: &str) -> Result<(), AppError> {
        if fragment.is_empty() {
            return Ok(());
        }
        let Some(last) = self.messages.last_mut() else {
            return Ok(());
        };
        last.content.push_str(fragment);
        self.persist().await
    }

    /// Apply fragments in receipt order until the stream ends or fails.
    pub async fn consume<S>(&mut self, mut stream: S) -> Result<(), AppError>
    where
        S: Stream<Item = Result<String, ApiError>> + Unpin,
    {
        let mut received = 0usize;
        while let Some(item) = stream.next().await {
            let fragment = item?;
            self.on_fragment(&fragment).await?;
            received += 1;
        }
        debug!(fragments = received, "chat stream finished");
        Ok(())
    }

    /// Append, submit and stream one exchange. Returns the final assistant message.
    pub async fn send(
        &mut self,
        api: &dyn ComplianceApi,
        credentials: &mut CredentialManager,
        text: &str,
    ) -> Result<ChatMessage, AppError> {
        let auth = credentials.require_authenticated()?;
        self.append_user_message(text).await?;

        let stream = credentials
            .settle(api.chat(&auth, self.pending_history()).await)
            .await?;
        if let Err(e) = self.consume(stream).await {
            warn!(error = %e, "chat stream interrupted");
            return Err(e);
        }

        self.messages
            .last()
            .cloned()
            .ok_or_else(|| AppError::InvalidResponse("empty chat transcript".to_string()))
    }

    pub async fn clear(&mut self) -> Result<(), AppError> {
        self.messages.clear();
        self.persist().await
    }

    async fn persist(&self) -> Result<(), AppError> {
        store::set_json(self.store.as_ref(), &store::key(CHAT_KEY), &self.messages).await?;
        Ok(())
    }
}
