//! Send one message.

use anyhow::{Context, Result};
use chat_client::{ChatClient, ConnectionState, EventKind};
use chat_types::{ChatId, LocalId, MessageId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use super::start_client;
use crate::config::Settings;

/// Run the send command.
pub async fn run(settings: Settings, chat: &str, message: &str, timeout: Duration) -> Result<()> {
    let chat = ChatId::new(chat);
    let client = start_client(settings)?;

    client.connect().await?;
    tokio::time::timeout(timeout, client.wait_for_state(ConnectionState::is_connected))
        .await
        .with_context(|| format!("Not connected after {:?}", timeout))??;

    let local_id = client.send_message(&chat, message).await?;
    match wait_confirmed(&client, &chat, local_id, timeout).await {
        Some(server_id) => println!("Sent {} (confirmed as {})", local_id, server_id),
        None => println!(
            "Sent {} but no confirmation within {:?} ({} frames still queued)",
            local_id,
            timeout,
            client.queued_len().await?
        ),
    }

    client.shutdown().await?;
    Ok(())
}

/// Wait until the optimistic message `local_id` has a server id.
pub async fn wait_confirmed(
    client: &ChatClient,
    chat: &ChatId,
    local_id: LocalId,
    timeout: Duration,
) -> Option<MessageId> {
    let updated = Arc::new(Notify::new());
    let notify = Arc::clone(&updated);
    let _subscription = client.subscribe(EventKind::ConversationUpdated, move |_| {
        notify.notify_one();
    });

    let confirmed = || {
        client
            .snapshot(chat)?
            .find_by_local_id(&local_id)?
            .server_id
            .clone()
    };

    tokio::time::timeout(timeout, async {
        loop {
            if let Some(server_id) = confirmed() {
                return server_id;
            }
            updated.notified().await;
        }
    })
    .await
    .ok()
}
