use async_trait::async_trait;
use log::{ debug, info, warn };
use std::sync::{ Arc, Weak };
use tokio::task::JoinHandle;
use crate::config::ReconnectBackoff;
use crate::gateway::MessageGateway;
use crate::models::chat::Message;

/// Receiver of realtime deliveries. `generation` identifies the binding that produced them.
#[async_trait]
pub trait MessageSink: Send + Sync + 'static {
    async fn deliver(&self, generation: u64, message: Message);

    /// Called after a dropped subscription was re-established, to catch up on the gap.
    async fn resync(&self, generation: u64);
}

struct Binding {
    conversation_id: String,
    generation: u64,
    task: JoinHandle<()>,
}

/// Owns the single realtime subscription of an engine.
///
/// The subscription itself lives inside a background task; tearing the binding down
/// aborts that task, which drops the `Subscription` and releases the transport.
pub struct SubscriptionManager {
    gateway: Arc<dyn MessageGateway>,
    backoff: ReconnectBackoff,
    binding: Option<Binding>,
}

impl SubscriptionManager {
    pub fn new(gateway: Arc<dyn MessageGateway>, backoff: ReconnectBackoff) -> Self {
        Self { gateway, backoff, binding: None }
    }

    /// Replaces any current binding with one for `conversation_id`.
    ///
    /// The previous subscription is fully released before the new one is opened.
    pub async fn bind(&mut self, conversation_id: &str, generation: u64, sink: Arc<dyn MessageSink>) {
        self.unbind().await;

        let task = tokio::spawn(
            run_subscription(
                Arc::clone(&self.gateway),
                conversation_id.to_string(),
                generation,
                Arc::downgrade(&sink),
                self.backoff
            )
        );
        info!("Bound realtime subscription to conversation {}", conversation_id);
        self.binding = Some(Binding {
            conversation_id: conversation_id.to_string(),
            generation,
            task,
        });
    }

    pub async fn unbind(&mut self) {
        if let Some(binding) = self.binding.take() {
            binding.task.abort();
            // resolves once the task, and the subscription it owns, has been dropped
            let _ = binding.task.await;
            info!(
                "Unbound realtime subscription from conversation {} (generation {})",
                binding.conversation_id,
                binding.generation
            );
        }
    }

    pub fn bound_to(&self) -> Option<&str> {
        self.binding.as_ref().map(|b| b.conversation_id.as_str())
    }

    #[cfg(test)]
    fn generation(&self) -> Option<u64> {
        self.binding.as_ref().map(|b| b.generation)
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        if let Some(binding) = self.binding.take() {
            binding.task.abort();
        }
    }
}

async fn run_subscription(
    gateway: Arc<dyn MessageGateway>,
    conversation_id: String,
    generation: u64,
    sink: Weak<dyn MessageSink>,
    backoff: ReconnectBackoff
) {
    let mut attempt: u32 = 0;
    let mut reconnecting = false;

    loop {
        match gateway.subscribe(&conversation_id).await {
            Ok(mut subscription) => {
                if reconnecting {
                    info!("Realtime subscription for {} restored after {} attempt(s)", conversation_id, attempt);
                    let Some(target) = sink.upgrade() else {
                        return;
                    };
                    target.resync(generation).await;
                }
                attempt = 0;

                while let Some(message) = subscription.next_message().await {
                    let Some(target) = sink.upgrade() else {
                        return;
                    };
                    target.deliver(generation, message).await;
                }
                warn!("Realtime subscription for {} dropped, reconnecting", conversation_id);
            }
            Err(e) => {
                warn!("Failed to subscribe to conversation {}: {}", conversation_id, e);
            }
        }

        reconnecting = true;
        attempt = attempt.saturating_add(1);
        let delay = backoff.delay(attempt);
        debug!("Retrying subscription for {} in {:?} (attempt {})", conversation_id, delay, attempt);
        tokio::time::sleep(delay).await;
    }
}
