//! `yuume status` — inspect the stored session for the configured shop.

use console::style;
use yuume_engine::store::SessionStore;
use yuume_engine::EngineConfig;
use yuume_protocol::SessionStatus;

pub fn run(config: &EngineConfig, json: bool) -> anyhow::Result<()> {
    let store = SessionStore::open(
        &config.data_dir(),
        &config.shop_domain,
        config.session_timeout(),
    );
    let session = store.load();

    if json {
        println!("{}", serde_json::to_string_pretty(&session)?);
        return Ok(());
    }

    println!();
    println!("  Yuume v{}", crate::VERSION);
    if config.shop_domain.trim().is_empty() {
        println!("  Shop: {}", style("(not configured)").dim());
    } else {
        println!("  Shop: {}", config.shop_domain);
    }
    println!("  Data dir: {}", config.data_dir().display());
    println!();

    // A restored session always carries at least the welcome message;
    // an empty log means nothing usable was stored.
    if session.messages.is_empty() {
        println!("  No stored session. The next chat starts fresh.");
    } else {
        println!("  Session: {}", session.session_id);
        println!("  Status: {}", status_label(session.status));
        println!("  Messages: {}", session.messages.len());
        println!("  Last activity: {}", session.last_activity.to_rfc3339());
        if let Some(profile) = &session.profile {
            if let Some(email) = &profile.email {
                println!("  Customer: {email}");
            }
        }
    }
    println!();

    Ok(())
}

fn status_label(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Active => "active",
        SessionStatus::Escalated => "escalated",
        SessionStatus::Completed => "completed",
        SessionStatus::Abandoned => "abandoned",
    }
}
