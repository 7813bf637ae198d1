//! `yuume reset` — discard the stored session for the configured shop.

use yuume_engine::store::SessionStore;
use yuume_engine::EngineConfig;

pub fn run(config: &EngineConfig) -> anyhow::Result<()> {
    let store = SessionStore::open(
        &config.data_dir(),
        &config.shop_domain,
        config.session_timeout(),
    );
    store.clear();

    println!();
    println!("  Stored session cleared. The next chat starts fresh.");
    println!();

    Ok(())
}
