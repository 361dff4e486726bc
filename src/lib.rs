pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod models;
pub mod store;
pub mod sync;

use cli::Args;
use config::SyncConfig;
use gateway::create_gateway;
use log::{ info, warn };
use models::chat::{ Viewer, ViewerRole };
use models::reply::display_text;
use std::error::Error;
use sync::SyncEngine;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    let role: ViewerRole = args.viewer_role.parse()?;
    let config = SyncConfig::from_args(&args)?;

    info!("--- Sync Configuration ---");
    info!("Gateway Type: {}", args.gateway_type);
    info!("API Base URL: {}", args.api_base_url);
    info!("Realtime URL: {}", args.realtime_url);
    info!("API Key Set: {}", args.api_key.is_some());
    info!("Viewer: {} ({})", args.viewer_id, role);
    info!("Poll Interval: {:?}", config.poll_interval);
    info!("Refresh Policy: {}", config.refresh_policy);
    info!("Reconnect Backoff: {:?} .. {:?}", config.reconnect.base, config.reconnect.max);
    if let Some(id) = &args.open_conversation {
        info!("Open Conversation: {}", id);
    }
    info!("-------------------------");

    let poll_interval = config.poll_interval;
    let gateway = create_gateway(&args)?;
    let engine = SyncEngine::new(gateway, Viewer::new(args.viewer_id.clone(), role), config);

    engine.load_conversations().await?;
    for conversation in engine.conversations().await {
        info!(
            "Conversation {} (org {}, seeker {}): {} unread, last activity {}",
            conversation.id,
            conversation.org_id,
            conversation.seeker_id,
            conversation.unread_count,
            conversation.last_message_at
        );
    }
    info!("Unread total: {}", engine.unread_total().await);

    engine.start_polling().await;

    if let Some(id) = &args.open_conversation {
        match engine.set_active_conversation(Some(id)).await {
            Ok(()) => {
                for message in engine.messages().await {
                    info!("[{}] {}: {}", message.created_at, message.sender_id, display_text(&message.content));
                }
            }
            Err(e) => warn!("Could not open conversation {}: {}", id, e),
        }
    }

    let mut ticker = tokio::time::interval(poll_interval);
    let mut last_unread = engine.unread_total().await;
    let mut seen = engine.messages().await.len();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl-C, shutting down");
                break;
            }
            _ = ticker.tick() => {
                let unread = engine.unread_total().await;
                if unread != last_unread {
                    info!("Unread total: {}", unread);
                    last_unread = unread;
                }
                let messages = engine.messages().await;
                for message in messages.iter().skip(seen) {
                    info!("[{}] {}: {}", message.created_at, message.sender_id, display_text(&message.content));
                }
                seen = messages.len();
            }
        }
    }

    engine.shutdown().await;
    Ok(())
}
