//! Discord session start limit lookup
//!
//! The only REST call the shard manager makes: `GET /gateway/bot`, read once
//! at startup to learn how many shards may identify per window.

use crate::error::ManagerError;
use tracing::{debug, error};
use twilight_http::Client;

/// Ask Discord for the bot's `session_start_limit.max_concurrency`
pub async fn fetch_max_concurrency(token: String) -> Result<u32, ManagerError> {
    let client = Client::new(token);

    let response = client.gateway().authed().await.map_err(|e| {
        error!(error = %e, "Failed to get session start limit");
        ManagerError::MaxConcurrencyLookup(Box::new(e))
    })?;

    let info = response
        .model()
        .await
        .map_err(|e| ManagerError::MaxConcurrencyLookup(Box::new(e)))?;

    debug!(
        shards = info.shards,
        max_concurrency = info.session_start_limit.max_concurrency,
        remaining = info.session_start_limit.remaining,
        "Fetched gateway session start limit"
    );

    let max_concurrency: u32 = info
        .session_start_limit
        .max_concurrency
        .try_into()
        .unwrap_or(u32::MAX);

    Ok(max_concurrency)
}
