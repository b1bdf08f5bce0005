//! Show configuration and connection status.

use anyhow::Result;
use std::time::Duration;

use super::start_client;
use crate::config::Settings;

/// Run the status command.
pub async fn run(settings: Settings, timeout: Duration) -> Result<()> {
    println!("=== relaychat status ===");
    println!();

    let config = &settings.client;
    let policy = config.reconnect_policy();
    println!("Configuration:");
    println!("  Endpoint:  {}", config.endpoint);
    println!("  User:      {}", settings.session.user_id());
    println!(
        "  Reconnect: {} attempts, {:?} base delay (last wait {:?})",
        policy.max_attempts,
        policy.base_delay,
        policy.delay_for(policy.max_attempts)
    );
    println!("  Heartbeat: every {:?}", policy.heartbeat_interval);
    println!("  Typing:    stop after {:?} idle", config.typing_idle_timeout());
    match config.remote_typing_ttl() {
        Some(ttl) => println!("  Remote typing expires after {:?}", ttl),
        None => println!("  Remote typing never expires"),
    }
    println!("  Queue:     {} envelopes", config.queue_capacity);
    println!(
        "  Timeouts:  connect {:?}, send {:?}",
        config.connect_timeout(),
        config.send_timeout()
    );
    if settings.mock {
        println!("  Transport: mock (in-memory echo server)");
    }
    println!();

    let client = start_client(settings)?;
    client.connect().await?;
    let state = match tokio::time::timeout(timeout, client.wait_for_state(|s| s.is_connected()))
        .await
    {
        Ok(state) => state?,
        Err(_) => client.state(),
    };

    println!("Connection:");
    println!("  Status: {}", state.name().to_uppercase());
    if let chat_client::ConnectionState::Reconnecting { attempt } = state {
        println!("  Retrying (attempt {})", attempt);
    }

    client.shutdown().await?;
    Ok(())
}
