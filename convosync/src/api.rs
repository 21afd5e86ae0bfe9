//! REST collaborator: the request/response side of the backend.
//!
//! [`MessageApi`] is the seam the engine drives; [`HttpApi`] implements
//! it against the backend's `/messages/...` routes with bearer-token
//! auth, and [`InMemoryApi`] is the scripted fake used by tests.
//!
//! Responses use the backend's `{"status": "success", ...}` envelope; a
//! non-success status surfaces as [`ApiError::Rejected`] with the
//! server's message.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use convosync_proto::conversation::{ConversationStatus, ConversationSummary};
use convosync_proto::message::{
    Attachment, Message, MessageId, Participant, Timestamp, UserId,
};

/// Errors surfaced by the REST collaborator.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Transport-level failure (connect, TLS, timeout).
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success envelope.
    #[error("request rejected ({status}): {message}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Server-supplied error message, if any.
        message: String,
    },

    /// The response body did not match the expected shape.
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// One page of conversation history.
#[derive(Debug, Clone)]
pub struct HistoryPage {
    /// Messages in server order (not trusted; the store re-sorts).
    pub messages: Vec<Message>,
    /// Authoritative unread count for the conversation, when the server
    /// includes one.
    pub unread_count: Option<u32>,
}

/// The backend operations the engine depends on.
pub trait MessageApi: Send + Sync + 'static {
    /// Fetches one page of a conversation's history. `None` means the
    /// newest page.
    fn fetch_history(
        &self,
        counterpart: &UserId,
        page: Option<u32>,
    ) -> impl std::future::Future<Output = Result<HistoryPage, ApiError>> + Send;

    /// Fetches the conversation listing, optionally filtered.
    fn fetch_conversations(
        &self,
        search: Option<&str>,
        status: Option<ConversationStatus>,
    ) -> impl std::future::Future<Output = Result<Vec<ConversationSummary>, ApiError>> + Send;

    /// Sends a message; the response carries the authoritative message
    /// with its server-assigned id.
    fn send_message(
        &self,
        content: &str,
        receiver: &UserId,
        attachments: &[Attachment],
    ) -> impl std::future::Future<Output = Result<Message, ApiError>> + Send;

    /// Acknowledges one message as read.
    fn mark_read(
        &self,
        message_id: &MessageId,
    ) -> impl std::future::Future<Output = Result<(), ApiError>> + Send;

    /// Acknowledges every message in a conversation as read.
    fn mark_conversation_read(
        &self,
        counterpart: &UserId,
    ) -> impl std::future::Future<Output = Result<(), ApiError>> + Send;

    /// Total unread count for the local actor.
    fn unread_count(&self) -> impl std::future::Future<Output = Result<u32, ApiError>> + Send;

    /// Archives a conversation.
    fn archive_conversation(
        &self,
        counterpart: &UserId,
    ) -> impl std::future::Future<Output = Result<(), ApiError>> + Send;

    /// Deletes a conversation and its messages.
    fn delete_conversation(
        &self,
        counterpart: &UserId,
    ) -> impl std::future::Future<Output = Result<(), ApiError>> + Send;
}

#[derive(Deserialize)]
struct Envelope {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: serde_json::Value,
    #[serde(default)]
    messages: Option<Vec<Message>>,
    #[serde(default)]
    count: Option<u32>,
    #[serde(default, alias = "unreadCount")]
    unread_count: Option<u32>,
}

#[derive(Deserialize)]
struct ConversationsData {
    #[serde(default)]
    conversations: Vec<ConversationSummary>,
}

/// [`MessageApi`] over HTTP.
pub struct HttpApi {
    client: reqwest::Client,
    base_url: String,
    token: String,
    admin: bool,
}

impl HttpApi {
    /// Creates an API client.
    ///
    /// `base_url` points at the API root (e.g. `https://host/api`); the
    /// `admin` flag selects between the admin and end-user route
    /// families.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Http`] if the underlying client cannot be
    /// built.
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        admin: bool,
        request_timeout: std::time::Duration,
    ) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            admin,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn execute(&self, request: reqwest::RequestBuilder) -> Result<Envelope, ApiError> {
        let response = request.bearer_auth(&self.token).send().await?;
        let status = response.status();
        let envelope: Envelope = response
            .json()
            .await
            .map_err(|e| ApiError::Malformed(e.to_string()))?;
        if envelope.status != "success" {
            return Err(ApiError::Rejected {
                status: status.as_u16(),
                message: envelope.message.unwrap_or_else(|| "unknown error".into()),
            });
        }
        Ok(envelope)
    }
}

impl MessageApi for HttpApi {
    async fn fetch_history(
        &self,
        counterpart: &UserId,
        page: Option<u32>,
    ) -> Result<HistoryPage, ApiError> {
        let path = if self.admin {
            format!("/messages/admin/conversation/{counterpart}")
        } else {
            "/messages/user".to_string()
        };
        let mut request = self.client.get(self.url(&path));
        if let Some(page) = page {
            request = request.query(&[("page", page)]);
        }
        let envelope = self.execute(request).await?;
        let messages = match envelope.messages {
            Some(messages) => messages,
            None => serde_json::from_value(envelope.data)
                .map_err(|e| ApiError::Malformed(format!("history payload: {e}")))?,
        };
        debug!(conversation = %counterpart, count = messages.len(), "fetched history");
        Ok(HistoryPage {
            messages,
            unread_count: envelope.unread_count,
        })
    }

    async fn fetch_conversations(
        &self,
        search: Option<&str>,
        status: Option<ConversationStatus>,
    ) -> Result<Vec<ConversationSummary>, ApiError> {
        let mut request = self.client.get(self.url("/messages/admin/all"));
        if let Some(search) = search {
            request = request.query(&[("search", search)]);
        }
        if let Some(status) = status {
            request = request.query(&[("status", status.as_str())]);
        }
        let envelope = self.execute(request).await?;
        let data: ConversationsData = serde_json::from_value(envelope.data)
            .map_err(|e| ApiError::Malformed(format!("conversations payload: {e}")))?;
        Ok(data.conversations)
    }

    async fn send_message(
        &self,
        content: &str,
        receiver: &UserId,
        attachments: &[Attachment],
    ) -> Result<Message, ApiError> {
        let path = if self.admin {
            "/messages/admin/send"
        } else {
            "/messages/send"
        };
        let body = json!({
            "content": content,
            "receiver": receiver,
            "attachments": attachments,
        });
        let envelope = self
            .execute(self.client.post(self.url(path)).json(&body))
            .await?;
        serde_json::from_value(envelope.data)
            .map_err(|e| ApiError::Malformed(format!("send payload: {e}")))
    }

    async fn mark_read(&self, message_id: &MessageId) -> Result<(), ApiError> {
        self.execute(
            self.client
                .patch(self.url(&format!("/messages/{message_id}/read"))),
        )
        .await?;
        Ok(())
    }

    async fn mark_conversation_read(&self, counterpart: &UserId) -> Result<(), ApiError> {
        self.execute(
            self.client
                .put(self.url(&format!("/messages/admin/mark-read/{counterpart}"))),
        )
        .await?;
        Ok(())
    }

    async fn unread_count(&self) -> Result<u32, ApiError> {
        let envelope = self
            .execute(self.client.get(self.url("/messages/unread-count")))
            .await?;
        Ok(envelope.count.unwrap_or(0))
    }

    async fn archive_conversation(&self, counterpart: &UserId) -> Result<(), ApiError> {
        self.execute(
            self.client
                .put(self.url(&format!("/messages/admin/archive/{counterpart}"))),
        )
        .await?;
        Ok(())
    }

    async fn delete_conversation(&self, counterpart: &UserId) -> Result<(), ApiError> {
        self.execute(
            self.client
                .delete(self.url(&format!("/messages/admin/{counterpart}"))),
        )
        .await?;
        Ok(())
    }
}

#[derive(Default)]
struct InMemoryState {
    histories: std::collections::HashMap<UserId, Vec<Message>>,
    conversations: Vec<ConversationSummary>,
    sent: Vec<Message>,
    read_acks: Vec<MessageId>,
    conversation_read_acks: Vec<UserId>,
    archived: Vec<UserId>,
    deleted: Vec<UserId>,
    fail: bool,
}

/// Scripted in-memory [`MessageApi`] for tests.
///
/// Sends are assigned sequential `srv-N` ids and recorded; mark-read and
/// lifecycle calls are logged for assertions. `set_failing(true)` makes
/// every call return an error to exercise failure paths. Clones share
/// state, so a test can keep a handle while the engine owns the other.
#[derive(Clone)]
pub struct InMemoryApi {
    local: Participant,
    state: Arc<Mutex<InMemoryState>>,
    next_id: Arc<AtomicU64>,
}

impl InMemoryApi {
    /// Creates an empty fake whose sends originate from `local`.
    #[must_use]
    pub fn new(local: Participant) -> Self {
        Self {
            local,
            state: Arc::new(Mutex::new(InMemoryState::default())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Scripts the history returned for one conversation.
    pub fn set_history(&self, counterpart: UserId, messages: Vec<Message>) {
        self.state.lock().histories.insert(counterpart, messages);
    }

    /// Scripts the conversation listing.
    pub fn set_conversations(&self, conversations: Vec<ConversationSummary>) {
        self.state.lock().conversations = conversations;
    }

    /// Makes every subsequent call fail.
    pub fn set_failing(&self, fail: bool) {
        self.state.lock().fail = fail;
    }

    /// Messages accepted by `send_message`, in order.
    #[must_use]
    pub fn sent(&self) -> Vec<Message> {
        self.state.lock().sent.clone()
    }

    /// Ids acknowledged through `mark_read`, in order.
    #[must_use]
    pub fn read_acks(&self) -> Vec<MessageId> {
        self.state.lock().read_acks.clone()
    }

    /// Conversations acknowledged through `mark_conversation_read`.
    #[must_use]
    pub fn conversation_read_acks(&self) -> Vec<UserId> {
        self.state.lock().conversation_read_acks.clone()
    }

    /// Conversations archived / deleted, in order.
    #[must_use]
    pub fn lifecycle_calls(&self) -> (Vec<UserId>, Vec<UserId>) {
        let state = self.state.lock();
        (state.archived.clone(), state.deleted.clone())
    }

    fn check(&self) -> Result<(), ApiError> {
        if self.state.lock().fail {
            return Err(ApiError::Rejected {
                status: 500,
                message: "scripted failure".into(),
            });
        }
        Ok(())
    }
}

impl MessageApi for InMemoryApi {
    async fn fetch_history(
        &self,
        counterpart: &UserId,
        _page: Option<u32>,
    ) -> Result<HistoryPage, ApiError> {
        self.check()?;
        let messages = self
            .state
            .lock()
            .histories
            .get(counterpart)
            .cloned()
            .unwrap_or_default();
        Ok(HistoryPage {
            messages,
            unread_count: None,
        })
    }

    async fn fetch_conversations(
        &self,
        _search: Option<&str>,
        status: Option<ConversationStatus>,
    ) -> Result<Vec<ConversationSummary>, ApiError> {
        self.check()?;
        let conversations = self.state.lock().conversations.clone();
        Ok(match status {
            Some(status) => conversations
                .into_iter()
                .filter(|c| c.status == status)
                .collect(),
            None => conversations,
        })
    }

    async fn send_message(
        &self,
        content: &str,
        receiver: &UserId,
        attachments: &[Attachment],
    ) -> Result<Message, ApiError> {
        self.check()?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let message = Message {
            id: MessageId::new(format!("srv-{id}")),
            content: content.to_string(),
            sender: self.local.clone(),
            receiver: receiver.clone(),
            attachments: attachments.to_vec(),
            read: false,
            created_at: Timestamp::now(),
            read_at: None,
        };
        self.state.lock().sent.push(message.clone());
        Ok(message)
    }

    async fn mark_read(&self, message_id: &MessageId) -> Result<(), ApiError> {
        self.check()?;
        self.state.lock().read_acks.push(message_id.clone());
        Ok(())
    }

    async fn mark_conversation_read(&self, counterpart: &UserId) -> Result<(), ApiError> {
        self.check()?;
        self.state
            .lock()
            .conversation_read_acks
            .push(counterpart.clone());
        Ok(())
    }

    async fn unread_count(&self) -> Result<u32, ApiError> {
        self.check()?;
        let state = self.state.lock();
        Ok(state
            .conversations
            .iter()
            .map(|c| c.unread_count)
            .sum())
    }

    async fn archive_conversation(&self, counterpart: &UserId) -> Result<(), ApiError> {
        self.check()?;
        self.state.lock().archived.push(counterpart.clone());
        Ok(())
    }

    async fn delete_conversation(&self, counterpart: &UserId) -> Result<(), ApiError> {
        self.check()?;
        self.state.lock().deleted.push(counterpart.clone());
        Ok(())
    }
}
