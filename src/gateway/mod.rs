pub mod http;
pub mod memory;

use async_trait::async_trait;
use futures::{ Stream, StreamExt };
use log::info;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ Context, Poll };
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use crate::cli::Args;
use crate::models::chat::{ Attachment, Conversation, Message, ViewerRole };

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("HTTP request failed: {0}")] Http(#[from] reqwest::Error),

    #[error("realtime transport error: {0}")] WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("invalid payload: {0}")] Json(#[from] serde_json::Error),

    #[error("invalid URL: {0}")] Url(#[from] url::ParseError),

    #[error("gateway returned HTTP {status}: {body}")] Status {
        status: u16,
        body: String,
    },

    #[error("{0} not found")] NotFound(String),

    #[error("gateway unavailable: {0}")] Unavailable(String),

    #[error("invalid gateway configuration: {0}")] Config(String),
}

/// Remote message store contract consumed by the sync engine.
///
/// Implementations must return `list_messages` ascending by `created_at`.
#[async_trait]
pub trait MessageGateway: Send + Sync {
    async fn list_conversations(
        &self,
        viewer_id: &str,
        role: ViewerRole
    ) -> Result<Vec<Conversation>, GatewayError>;

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>, GatewayError>;

    async fn send_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        content: &str,
        attachment: Option<&Attachment>
    ) -> Result<Message, GatewayError>;

    async fn mark_as_read(&self, conversation_id: &str, viewer_id: &str) -> Result<(), GatewayError>;

    /// Returns `Ok(true)` only when the requester was the sender and the message is gone.
    async fn delete_message(
        &self,
        message_id: &str,
        requester_id: &str
    ) -> Result<bool, GatewayError>;

    async fn get_or_create_conversation(
        &self,
        org_id: &str,
        seeker_id: &str,
        job_id: Option<&str>
    ) -> Result<Conversation, GatewayError>;

    async fn subscribe(&self, conversation_id: &str) -> Result<Subscription, GatewayError>;
}

/// A live realtime feed for one conversation.
///
/// The transport is released when the subscription is dropped or `unsubscribe`d. The
/// stream ending means the transport went away.
pub struct Subscription {
    conversation_id: String,
    messages: ReceiverStream<Message>,
    on_close: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(conversation_id: impl Into<String>, receiver: mpsc::Receiver<Message>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            messages: ReceiverStream::new(receiver),
            on_close: None,
        }
    }

    pub fn with_close_hook(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_close = Some(Box::new(hook));
        self
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub async fn next_message(&mut self) -> Option<Message> {
        self.messages.next().await
    }

    pub fn unsubscribe(self) {}
}

impl Stream for Subscription {
    type Item = Message;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Message>> {
        Pin::new(&mut self.messages).poll_next(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hook) = self.on_close.take() {
            hook();
        }
    }
}

pub fn create_gateway(args: &Args) -> Result<Arc<dyn MessageGateway>, GatewayError> {
    match args.gateway_type.to_lowercase().as_str() {
        "http" => {
            info!("Using HTTP gateway at {} (realtime: {})", args.api_base_url, args.realtime_url);
            let gateway = http::HttpGateway::new(http::HttpGatewayConfig::from_args(args))?;
            Ok(Arc::new(gateway))
        }
        "memory" => {
            info!("Using in-memory gateway");
            Ok(Arc::new(memory::MemoryGateway::new()))
        }
        _ => Err(GatewayError::Config(format!("Unsupported gateway type: {}", args.gateway_type))),
    }
}
