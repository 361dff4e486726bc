use async_trait::async_trait;
use chrono::Utc;
use log::{ debug, warn };
use std::collections::{ HashMap, HashSet };
use std::sync::{ Arc, Mutex, MutexGuard, PoisonError };
use tokio::sync::mpsc;
use uuid::Uuid;
use crate::gateway::{ GatewayError, MessageGateway, Subscription };
use crate::models::chat::{ Attachment, Conversation, Message, ViewerRole };

const SUBSCRIPTION_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayOp {
    ListConversations,
    ListMessages,
    SendMessage,
    MarkAsRead,
    DeleteMessage,
    GetOrCreate,
    Subscribe,
}

struct StoredConversation {
    conversation: Conversation,
    unread: HashMap<String, u32>,
}

impl StoredConversation {
    fn view_for(&self, viewer_id: &str) -> Conversation {
        let mut view = self.conversation.clone();
        view.unread_count = self.unread.get(viewer_id).copied().unwrap_or(0);
        view
    }

    fn counterpart_of(&self, participant_id: &str) -> &str {
        if self.conversation.org_id == participant_id {
            &self.conversation.seeker_id
        } else {
            &self.conversation.org_id
        }
    }
}

#[derive(Default)]
struct MemoryState {
    conversations: Vec<StoredConversation>,
    messages: HashMap<String, Vec<Message>>,
    subscribers: HashMap<String, Vec<(u64, mpsc::Sender<Message>)>>,
    next_subscriber: u64,
    failures: HashSet<GatewayOp>,
    mark_as_read_calls: Vec<(String, String)>,
    list_message_calls: usize,
    subscribe_calls: usize,
}

impl MemoryState {
    fn conversation_mut(&mut self, conversation_id: &str) -> Option<&mut StoredConversation> {
        self.conversations.iter_mut().find(|c| c.conversation.id == conversation_id)
    }

    fn take_failure(&mut self, op: GatewayOp) -> Result<(), GatewayError> {
        if self.failures.remove(&op) {
            return Err(GatewayError::Unavailable(format!("injected failure for {:?}", op)));
        }
        Ok(())
    }

    fn deliver(&mut self, message: &Message) {
        if let Some(subs) = self.subscribers.get_mut(&message.conversation_id) {
            subs.retain(|(id, tx)| {
                match tx.try_send(message.clone()) {
                    Ok(()) => true,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!("Subscriber {} is lagging, dropping message {}", id, message.id);
                        true
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => false,
                }
            });
        }
    }
}

/// In-process message store implementing the full gateway contract.
///
/// Participants are identified by the conversation's `org_id` / `seeker_id`, so an org
/// viewer's id is its org id.
#[derive(Clone, Default)]
pub struct MemoryGateway {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seeds a conversation. `unread_count` is credited to both participants.
    pub fn insert_conversation(&self, conversation: Conversation) {
        let mut state = self.state();
        let mut unread = HashMap::new();
        unread.insert(conversation.org_id.clone(), conversation.unread_count);
        unread.insert(conversation.seeker_id.clone(), conversation.unread_count);
        state.messages.entry(conversation.id.clone()).or_default();
        state.conversations.push(StoredConversation { conversation, unread });
    }

    /// Seeds a message without touching unread counts or notifying subscribers.
    pub fn insert_message(&self, message: Message) {
        let mut state = self.state();
        let list = state.messages.entry(message.conversation_id.clone()).or_default();
        list.push(message);
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    }

    /// Simulates the counterpart sending a message: stored, counted unread, pushed.
    pub fn push_incoming(
        &self,
        conversation_id: &str,
        sender_id: &str,
        content: &str
    ) -> Result<Message, GatewayError> {
        self.store_message(conversation_id, sender_id, content, None)
    }

    /// Ends every live subscription for the conversation, as a transport drop would.
    pub fn drop_subscriptions(&self, conversation_id: &str) {
        self.state().subscribers.remove(conversation_id);
    }

    pub fn fail_next(&self, op: GatewayOp) {
        self.state().failures.insert(op);
    }

    pub fn live_subscriptions(&self) -> usize {
        self.state()
            .subscribers.values()
            .map(|subs| subs.iter().filter(|(_, tx)| !tx.is_closed()).count())
            .sum()
    }

    pub fn subscribed_conversations(&self) -> Vec<String> {
        let state = self.state();
        let mut ids: Vec<String> = state.subscribers
            .iter()
            .filter(|(_, subs)| subs.iter().any(|(_, tx)| !tx.is_closed()))
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn mark_as_read_calls(&self) -> Vec<(String, String)> {
        self.state().mark_as_read_calls.clone()
    }

    pub fn list_message_calls(&self) -> usize {
        self.state().list_message_calls
    }

    pub fn subscribe_calls(&self) -> usize {
        self.state().subscribe_calls
    }

    pub fn unread_for(&self, conversation_id: &str, viewer_id: &str) -> Option<u32> {
        let mut state = self.state();
        state.conversation_mut(conversation_id).map(|c| c.unread.get(viewer_id).copied().unwrap_or(0))
    }

    fn store_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        content: &str,
        attachment: Option<&Attachment>
    ) -> Result<Message, GatewayError> {
        let mut state = self.state();
        let previous = state.messages
            .get(conversation_id)
            .and_then(|list| list.last())
            .map(|m| m.created_at);
        let now = Utc::now();
        let created_at = match previous {
            Some(prev) if prev > now => prev,
            _ => now,
        };

        let message = Message {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            sender_id: sender_id.to_string(),
            content: content.to_string(),
            created_at,
            read_at: None,
            attachment_url: attachment.map(|a| a.url.clone()),
            attachment_name: attachment.map(|a| a.name.clone()),
            attachment_size: attachment.map(|a| a.size),
        };

        let stored = state
            .conversation_mut(conversation_id)
            .ok_or_else(|| GatewayError::NotFound(format!("conversation {}", conversation_id)))?;
        stored.conversation.last_message = Some(message.clone());
        stored.conversation.last_message_at = message.created_at;
        let counterpart = stored.counterpart_of(sender_id).to_string();
        *stored.unread.entry(counterpart).or_insert(0) += 1;

        state.messages.entry(conversation_id.to_string()).or_default().push(message.clone());
        state.deliver(&message);
        debug!("Stored message {} in {}", message.id, conversation_id);
        Ok(message)
    }
}

#[async_trait]
impl MessageGateway for MemoryGateway {
    async fn list_conversations(
        &self,
        viewer_id: &str,
        role: ViewerRole
    ) -> Result<Vec<Conversation>, GatewayError> {
        let mut state = self.state();
        state.take_failure(GatewayOp::ListConversations)?;
        Ok(
            state.conversations
                .iter()
                .filter(|c| {
                    match role {
                        ViewerRole::Seeker => c.conversation.seeker_id == viewer_id,
                        ViewerRole::Org => c.conversation.org_id == viewer_id,
                    }
                })
                .map(|c| c.view_for(viewer_id))
                .collect()
        )
    }

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>, GatewayError> {
        let mut state = self.state();
        state.list_message_calls += 1;
        state.take_failure(GatewayOp::ListMessages)?;
        Ok(state.messages.get(conversation_id).cloned().unwrap_or_default())
    }

    async fn send_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        content: &str,
        attachment: Option<&Attachment>
    ) -> Result<Message, GatewayError> {
        self.state().take_failure(GatewayOp::SendMessage)?;
        self.store_message(conversation_id, sender_id, content, attachment)
    }

    async fn mark_as_read(&self, conversation_id: &str, viewer_id: &str) -> Result<(), GatewayError> {
        let mut state = self.state();
        state.mark_as_read_calls.push((conversation_id.to_string(), viewer_id.to_string()));
        state.take_failure(GatewayOp::MarkAsRead)?;

        let stored = state
            .conversation_mut(conversation_id)
            .ok_or_else(|| GatewayError::NotFound(format!("conversation {}", conversation_id)))?;
        stored.unread.insert(viewer_id.to_string(), 0);

        let now = Utc::now();
        if let Some(list) = state.messages.get_mut(conversation_id) {
            for message in list.iter_mut().filter(|m| m.sender_id != viewer_id && m.read_at.is_none()) {
                message.read_at = Some(now);
            }
        }
        Ok(())
    }

    async fn delete_message(
        &self,
        message_id: &str,
        requester_id: &str
    ) -> Result<bool, GatewayError> {
        let mut state = self.state();
        state.take_failure(GatewayOp::DeleteMessage)?;

        let located = state.messages.iter().find_map(|(conv_id, list)| {
            list.iter()
                .position(|m| m.id == message_id)
                .map(|idx| (conv_id.clone(), idx))
        });
        let Some((conversation_id, idx)) = located else {
            return Err(GatewayError::NotFound(format!("message {}", message_id)));
        };

        let Some(list) = state.messages.get_mut(&conversation_id) else {
            return Err(GatewayError::NotFound(format!("message {}", message_id)));
        };
        if list[idx].sender_id != requester_id {
            return Ok(false);
        }
        list.remove(idx);
        let latest = list.last().cloned();

        if let Some(stored) = state.conversation_mut(&conversation_id) {
            if stored.conversation.last_message.as_ref().map(|m| m.id.as_str()) == Some(message_id) {
                stored.conversation.last_message = latest;
            }
        }
        Ok(true)
    }

    async fn get_or_create_conversation(
        &self,
        org_id: &str,
        seeker_id: &str,
        job_id: Option<&str>
    ) -> Result<Conversation, GatewayError> {
        let mut state = self.state();
        state.take_failure(GatewayOp::GetOrCreate)?;

        if
            let Some(existing) = state.conversations
                .iter_mut()
                .find(|c| c.conversation.involves(org_id, seeker_id))
        {
            if existing.conversation.job_id.is_none() {
                existing.conversation.job_id = job_id.map(str::to_string);
            }
            let mut view = existing.conversation.clone();
            view.unread_count = 0;
            return Ok(view);
        }

        let conversation = Conversation {
            id: Uuid::new_v4().to_string(),
            org_id: org_id.to_string(),
            seeker_id: seeker_id.to_string(),
            job_id: job_id.map(str::to_string),
            last_message: None,
            last_message_at: Utc::now(),
            unread_count: 0,
        };
        state.messages.insert(conversation.id.clone(), Vec::new());
        state.conversations.push(StoredConversation {
            conversation: conversation.clone(),
            unread: HashMap::new(),
        });
        Ok(conversation)
    }

    async fn subscribe(&self, conversation_id: &str) -> Result<Subscription, GatewayError> {
        let mut state = self.state();
        state.subscribe_calls += 1;
        state.take_failure(GatewayOp::Subscribe)?;

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let sub_id = state.next_subscriber;
        state.next_subscriber += 1;
        state.subscribers.entry(conversation_id.to_string()).or_default().push((sub_id, tx));

        let registry = Arc::clone(&self.state);
        let key = conversation_id.to_string();
        Ok(
            Subscription::new(conversation_id, rx).with_close_hook(move || {
                let mut state = registry.lock().unwrap_or_else(PoisonError::into_inner);
                if let Some(subs) = state.subscribers.get_mut(&key) {
                    subs.retain(|(id, _)| *id != sub_id);
                    if subs.is_empty() {
                        state.subscribers.remove(&key);
                    }
                }
            })
        )
    }
}
