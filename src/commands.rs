use crate::config::Config;
use crate::error::Result;
use crate::plugin::schema::PluginRequest;
use crate::proxy::RouteTable;
use crate::state::AppState;
use tracing::{info, warn};

pub async fn run_config_check(config: Config, probe: bool) -> Result<()> {
    info!("Running configuration check...");
    crate::config::validate(&config)?;
    info!("✓ Configuration is valid");

    info!(
        "Queue: {} workers, request timeout {}ms, execution timeout {}ms, entry TTL {}ms",
        config.queue.workers,
        config.queue.request_timeout_ms,
        config.queue.execution_timeout_ms,
        config.queue.entry_ttl_ms
    );

    let (state, jobs) = AppState::from_config(config)?;
    let table = RouteTable::build(&state);

    info!("\n--- Routes ({}) ---", table.len());
    for listing in state.registry.listing() {
        info!(
            "POST /{:<20} category={:<9} hash={}",
            listing.identifier, listing.category, listing.hash
        );
    }

    if !probe {
        return Ok(());
    }

    // one request per route with the current hash and empty payloads
    let tasks = state.start(jobs);
    let mut all_passed = true;
    for listing in state.registry.listing() {
        let Some(handler) = table.get(&listing.identifier) else {
            continue;
        };
        let request = PluginRequest {
            identifier: listing.hash.to_string(),
            ..Default::default()
        };
        let response = handler.handle(request).await;
        if response.success {
            info!("✓ Probe /{}: PASSED", listing.identifier);
        } else {
            warn!("✗ Probe /{}: {}", listing.identifier, response.message);
            all_passed = false;
        }
    }

    state.shutdown();
    tasks.join().await;

    info!("\n--- Summary ---");
    if all_passed {
        info!("All probes passed!");
    } else {
        warn!("Some plugins answered the empty probe with a failure.");
        warn!("Plugins that require extraData are expected to fail here.");
    }

    Ok(())
}
