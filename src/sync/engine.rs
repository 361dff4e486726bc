use async_trait::async_trait;
use log::{ debug, info, warn };
use std::sync::Arc;
use tokio::sync::Mutex;
use crate::config::{ RefreshPolicy, SyncConfig };
use crate::error::SyncError;
use crate::gateway::{ GatewayError, MessageGateway };
use crate::models::chat::{ Attachment, Conversation, Message, SummaryPatch, Viewer };
use crate::models::reply::ReplyEnvelope;
use crate::store::{ ConversationStore, MessageStore };
use super::poller::{ PollingRefresher, RefreshTarget };
use super::subscription::{ MessageSink, SubscriptionManager };

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadingState {
    pub conversations_loading: bool,
    pub messages_loading: bool,
}

struct ActiveConversation {
    id: String,
    generation: u64,
}

struct EngineState {
    conversations: ConversationStore,
    messages: MessageStore,
    active: Option<ActiveConversation>,
    // bumped on every activation change; async completions compare against it
    generation: u64,
    loading: LoadingState,
    subscription: SubscriptionManager,
}

impl EngineState {
    fn is_current(&self, conversation_id: &str, generation: u64) -> bool {
        self.active.as_ref().map_or(false, |a| a.id == conversation_id && a.generation == generation)
    }

    fn active_id(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.id.as_str())
    }
}

struct EngineShared {
    gateway: Arc<dyn MessageGateway>,
    viewer: Viewer,
    refresh_policy: RefreshPolicy,
    state: Mutex<EngineState>,
    poller: Mutex<PollingRefresher>,
}

impl EngineShared {
    async fn send_read_receipt(&self, conversation_id: &str) {
        mark_read(self.gateway.as_ref(), conversation_id, &self.viewer.id).await;
    }

    /// Issues the receipt on a detached task that outlives an abort of the caller.
    fn spawn_read_receipt(&self, conversation_id: &str) {
        let gateway = Arc::clone(&self.gateway);
        let conversation_id = conversation_id.to_string();
        let viewer_id = self.viewer.id.clone();
        tokio::spawn(async move {
            mark_read(gateway.as_ref(), &conversation_id, &viewer_id).await;
        });
    }
}

async fn mark_read(gateway: &dyn MessageGateway, conversation_id: &str, viewer_id: &str) {
    if let Err(e) = gateway.mark_as_read(conversation_id, viewer_id).await {
        warn!("Failed to mark conversation {} as read: {}", conversation_id, e);
    }
}

/// Client-side synchronization engine for the viewer's conversations.
///
/// Cloning is cheap and every clone drives the same state. All store mutations happen
/// under a single lock that is released before any gateway call; completions that
/// target a conversation re-check that it is still the active one before applying.
#[derive(Clone)]
pub struct SyncEngine {
    shared: Arc<EngineShared>,
}

impl SyncEngine {
    pub fn new(gateway: Arc<dyn MessageGateway>, viewer: Viewer, config: SyncConfig) -> Self {
        let subscription = SubscriptionManager::new(Arc::clone(&gateway), config.reconnect);
        let state = EngineState {
            conversations: ConversationStore::new(),
            messages: MessageStore::new(),
            active: None,
            generation: 0,
            loading: LoadingState::default(),
            subscription,
        };
        Self {
            shared: Arc::new(EngineShared {
                gateway,
                viewer,
                refresh_policy: config.refresh_policy,
                state: Mutex::new(state),
                poller: Mutex::new(PollingRefresher::new(config.poll_interval)),
            }),
        }
    }

    pub fn viewer(&self) -> &Viewer {
        &self.shared.viewer
    }

    /// Fetches the full conversation list and replaces the local one.
    ///
    /// On failure the local list is left as it was.
    pub async fn load_conversations(&self) -> Result<(), SyncError> {
        let viewer = &self.shared.viewer;
        self.shared.state.lock().await.loading.conversations_loading = true;

        let result = self.shared.gateway.list_conversations(&viewer.id, viewer.role).await;

        let mut state = self.shared.state.lock().await;
        state.loading.conversations_loading = false;
        match result {
            Ok(list) => {
                info!("Loaded {} conversation(s) for {} ({})", list.len(), viewer.id, viewer.role);
                state.conversations.replace(list);
                Ok(())
            }
            Err(e) => {
                warn!("Failed to load conversations for {}: {}", viewer.id, e);
                Err(SyncError::fetch("conversations", e))
            }
        }
    }

    /// Opens `conversation_id`, or closes the active conversation with `None`.
    ///
    /// The id must already be in the local list; unknown ids are ignored.
    pub async fn set_active_conversation(&self, conversation_id: Option<&str>) -> Result<(), SyncError> {
        let Some(conversation_id) = conversation_id else {
            self.clear_active().await;
            return Ok(());
        };

        let (generation, had_unread) = {
            let mut state = self.shared.state.lock().await;
            let Some(conversation) = state.conversations.get(conversation_id) else {
                debug!("Conversation {} is not loaded, ignoring activation", conversation_id);
                return Ok(());
            };
            let had_unread = conversation.unread_count > 0;

            state.generation += 1;
            let generation = state.generation;
            state.active = Some(ActiveConversation {
                id: conversation_id.to_string(),
                generation,
            });
            state.messages.reset(Some(conversation_id));
            state.loading.messages_loading = true;
            if had_unread {
                state.conversations.upsert_summary(conversation_id, SummaryPatch {
                    unread_count: Some(0),
                    ..Default::default()
                });
            }

            let sink: Arc<dyn MessageSink> = self.shared.clone();
            state.subscription.bind(conversation_id, generation, sink).await;
            (generation, had_unread)
        };
        info!("Activated conversation {}", conversation_id);

        if had_unread {
            self.shared.send_read_receipt(conversation_id).await;
        }

        let history = self.shared.gateway.list_messages(conversation_id).await;

        let mut state = self.shared.state.lock().await;
        if !state.is_current(conversation_id, generation) {
            debug!("Discarding stale history for conversation {}", conversation_id);
            return Ok(());
        }
        state.loading.messages_loading = false;
        match history {
            Ok(list) => {
                debug!("Loaded {} message(s) for {}", list.len(), conversation_id);
                state.messages.load(list);
                Ok(())
            }
            Err(e) => {
                warn!("Failed to load messages for {}: {}", conversation_id, e);
                Err(SyncError::fetch("messages", e))
            }
        }
    }

    async fn clear_active(&self) {
        let mut state = self.shared.state.lock().await;
        state.generation += 1;
        if let Some(previous) = state.active.take() {
            info!("Closed conversation {}", previous.id);
        }
        state.messages.clear();
        state.loading.messages_loading = false;
        state.subscription.unbind().await;
    }

    /// Sends to the active conversation and applies the acknowledged message.
    ///
    /// Nothing is shown locally before the gateway acknowledges; on failure nothing changes.
    pub async fn send_message(
        &self,
        content: &str,
        attachment: Option<Attachment>
    ) -> Result<Message, SyncError> {
        let conversation_id = {
            let state = self.shared.state.lock().await;
            state.active_id().map(str::to_string).ok_or(SyncError::NoActiveConversation)?
        };

        let message = self.shared.gateway
            .send_message(&conversation_id, &self.shared.viewer.id, content, attachment.as_ref()).await
            .map_err(|e| {
                warn!("Failed to send message to {}: {}", conversation_id, e);
                SyncError::Send(e)
            })?;

        let mut state = self.shared.state.lock().await;
        if state.messages.conversation_id() == Some(conversation_id.as_str()) {
            state.messages.append(message.clone());
        }
        state.conversations.upsert_summary(&conversation_id, SummaryPatch::read_message(&message));
        debug!("Message {} acknowledged in {}", message.id, conversation_id);
        Ok(message)
    }

    /// Sends `text` as a reply to `original`, using the reply-to content envelope.
    pub async fn send_reply(
        &self,
        text: &str,
        original: &Message,
        attachment: Option<Attachment>
    ) -> Result<Message, SyncError> {
        let content = ReplyEnvelope::new(text, original).encode()?;
        self.send_message(&content, attachment).await
    }

    /// Deletes one of the viewer's own messages from the active conversation.
    pub async fn delete_message(&self, message_id: &str) -> Result<(), SyncError> {
        let viewer_id = &self.shared.viewer.id;
        {
            let state = self.shared.state.lock().await;
            let message = state.messages
                .get(message_id)
                .ok_or_else(|| SyncError::MessageNotFound(message_id.to_string()))?;
            if !message.is_from(viewer_id) {
                return Err(SyncError::DeleteUnauthorized {
                    message_id: message_id.to_string(),
                    viewer_id: viewer_id.clone(),
                });
            }
        }

        match self.shared.gateway.delete_message(message_id, viewer_id).await {
            Ok(true) => {
                let mut state = self.shared.state.lock().await;
                if let Some(removed) = state.messages.remove(message_id) {
                    let latest = state.messages.last().cloned();
                    state.conversations.retract_message(&removed.conversation_id, message_id, latest);
                }
                info!("Deleted message {}", message_id);
                Ok(())
            }
            Ok(false) =>
                Err(SyncError::DeleteUnauthorized {
                    message_id: message_id.to_string(),
                    viewer_id: viewer_id.clone(),
                }),
            Err(GatewayError::NotFound(_)) => Err(SyncError::MessageNotFound(message_id.to_string())),
            Err(e) => {
                warn!("Failed to delete message {}: {}", message_id, e);
                Err(SyncError::Delete(e))
            }
        }
    }

    /// Opens the conversation between `org_id` and `seeker_id`, creating it remotely
    /// when it is not in the local list.
    pub async fn open_or_create_chat(
        &self,
        org_id: &str,
        seeker_id: &str,
        job_id: Option<&str>
    ) -> Result<Conversation, SyncError> {
        let existing = self.shared.state
            .lock().await
            .conversations.find_by_participants(org_id, seeker_id)
            .cloned();

        let conversation = match existing {
            Some(conversation) => conversation,
            None => {
                let created = self.shared.gateway
                    .get_or_create_conversation(org_id, seeker_id, job_id).await
                    .map_err(SyncError::OpenConversation)?;
                let mut state = self.shared.state.lock().await;
                if !state.conversations.insert_if_absent(created.clone()) {
                    debug!("Conversation {} already present locally", created.id);
                }
                created
            }
        };

        self.set_active_conversation(Some(&conversation.id)).await?;
        Ok(conversation)
    }

    /// Runs one silent refresh immediately.
    pub async fn refresh_now(&self) {
        self.shared.silent_refresh().await;
    }

    pub async fn start_polling(&self) -> bool {
        let target: Arc<dyn RefreshTarget> = self.shared.clone();
        self.shared.poller.lock().await.start(target)
    }

    pub async fn stop_polling(&self) {
        self.shared.poller.lock().await.stop();
    }

    pub async fn is_polling(&self) -> bool {
        self.shared.poller.lock().await.is_running()
    }

    /// Stops polling and releases the realtime subscription.
    pub async fn shutdown(&self) {
        self.stop_polling().await;
        self.clear_active().await;
        info!("Sync engine for {} shut down", self.shared.viewer.id);
    }

    pub async fn unread_total(&self) -> u64 {
        self.shared.state.lock().await.conversations.unread_total()
    }

    pub async fn conversations(&self) -> Vec<Conversation> {
        self.shared.state.lock().await.conversations.snapshot()
    }

    pub async fn conversation(&self, conversation_id: &str) -> Option<Conversation> {
        self.shared.state.lock().await.conversations.get(conversation_id).cloned()
    }

    pub async fn messages(&self) -> Vec<Message> {
        self.shared.state.lock().await.messages.snapshot()
    }

    pub async fn active_conversation_id(&self) -> Option<String> {
        self.shared.state.lock().await.active_id().map(str::to_string)
    }

    pub async fn subscribed_conversation_id(&self) -> Option<String> {
        self.shared.state.lock().await.subscription.bound_to().map(str::to_string)
    }

    pub async fn loading(&self) -> LoadingState {
        self.shared.state.lock().await.loading
    }
}

#[async_trait]
impl MessageSink for EngineShared {
    async fn deliver(&self, generation: u64, message: Message) {
        let needs_receipt = {
            let mut state = self.state.lock().await;
            if !state.is_current(&message.conversation_id, generation) {
                debug!("Dropping message {} for inactive conversation {}", message.id, message.conversation_id);
                return;
            }
            if !state.messages.append(message.clone()) {
                debug!("Message {} already present, skipping", message.id);
                return;
            }
            state.conversations.upsert_summary(&message.conversation_id, SummaryPatch::read_message(&message));
            !message.is_from(&self.viewer.id)
        };
        debug!("Reconciled pushed message {} in {}", message.id, message.conversation_id);

        if needs_receipt {
            self.spawn_read_receipt(&message.conversation_id);
        }
    }

    async fn resync(&self, generation: u64) {
        let conversation_id = {
            let state = self.state.lock().await;
            match state.active.as_ref() {
                Some(active) if active.generation == generation => active.id.clone(),
                _ => {
                    return;
                }
            }
        };

        let history = match self.gateway.list_messages(&conversation_id).await {
            Ok(history) => history,
            Err(e) => {
                warn!("Failed to resync messages for {}: {}", conversation_id, e);
                return;
            }
        };

        let needs_receipt = {
            let mut state = self.state.lock().await;
            if !state.is_current(&conversation_id, generation) {
                return;
            }
            let before = state.messages.len();
            state.messages.load(history);
            info!("Resynced {} missed message(s) for {}", state.messages.len().saturating_sub(before), conversation_id);

            let newest = state.messages.last().cloned();
            let stale_summary = match (&newest, state.conversations.get(&conversation_id)) {
                (Some(newest), Some(conversation)) => newest.created_at > conversation.last_message_at,
                _ => false,
            };
            match newest {
                Some(newest) if stale_summary => {
                    state.conversations.upsert_summary(&conversation_id, SummaryPatch::read_message(&newest));
                    !newest.is_from(&self.viewer.id)
                }
                _ => false,
            }
        };

        if needs_receipt {
            self.spawn_read_receipt(&conversation_id);
        }
    }
}

#[async_trait]
impl RefreshTarget for EngineShared {
    async fn silent_refresh(&self) {
        let list = match self.gateway.list_conversations(&self.viewer.id, self.viewer.role).await {
            Ok(list) => list,
            Err(e) => {
                warn!("Silent refresh failed: {}", e);
                return;
            }
        };

        let mut state = self.state.lock().await;
        match self.refresh_policy {
            RefreshPolicy::Merge => {
                let active = state.active_id().map(str::to_string);
                state.conversations.merge_remote(list, active.as_deref());
            }
            RefreshPolicy::Replace => state.conversations.replace(list),
        }
        debug!("Silent refresh applied ({} conversation(s), {} unread)", state.conversations.len(), state.conversations.unread_total());
    }
}
