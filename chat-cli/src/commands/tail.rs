//! Print events as they arrive.

use anyhow::{bail, Result};
use chat_client::{ClientEvent, EventKind};
use chat_types::ChatId;
use tokio::sync::mpsc;

use super::{describe, event_chat, start_client};
use crate::config::Settings;

/// Run the tail command.
pub async fn run(settings: Settings, chat: Option<String>) -> Result<()> {
    let filter = chat.map(ChatId::new);
    let client = start_client(settings)?;

    // Callbacks run on the supervisor task; hand events to this task.
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _subscription = client.subscribe_all(move |event| {
        let _ = tx.send(event.clone());
    });

    client.connect().await?;
    println!("Tailing as {} (Ctrl-C to stop)", client.user_id());

    let outcome = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break Ok(()),
            event = rx.recv() => {
                let Some(event) = event else { break Ok(()) };
                if event.kind() == EventKind::ConversationUpdated {
                    continue;
                }
                if let (Some(filter), Some(chat)) = (&filter, event_chat(&event)) {
                    if filter != chat {
                        continue;
                    }
                }
                println!("{}", describe(&event));
                if let ClientEvent::MaxReconnectReached { attempts } = event {
                    break Err(attempts);
                }
            }
        }
    };

    client.shutdown().await?;
    if let Err(attempts) = outcome {
        bail!("Connection lost; gave up after {} attempts", attempts);
    }
    Ok(())
}
