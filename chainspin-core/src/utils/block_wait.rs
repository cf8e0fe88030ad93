//! Waiting for a chain height.
//!
//! The only place the engine busy-waits. The poll interval is injectable and
//! the deadline optional: with `timeout: None` the wait is unbounded, which
//! matches the contract's claim protocol (the outcome never stops being
//! claimable); callers that want a watchdog set a deadline and get a TIMEOUT
//! error back.

use crate::adapter::ChainAdapter;
use crate::errors::GameError;
use std::time::Duration;
use tracing::trace;

/// Polling policy for [`wait_for_block`].
#[derive(Debug, Clone, Copy)]
pub struct BlockWait {
    /// Delay between height polls.
    pub poll_interval: Duration,
    /// Give up after this long, if set.
    pub timeout: Option<Duration>,
}

impl Default for BlockWait {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            timeout: None,
        }
    }
}

/// Poll the adapter until the chain reaches `target`.
///
/// Returns the height that satisfied the wait. Transport errors from the
/// height poll propagate immediately; a configured deadline produces a
/// TIMEOUT error.
pub async fn wait_for_block<A: ChainAdapter + ?Sized>(
    adapter: &A,
    target: u64,
    options: &BlockWait,
) -> Result<u64, GameError> {
    let deadline = options.timeout.map(|t| tokio::time::Instant::now() + t);

    loop {
        let height = adapter.current_block().await.map_err(GameError::from)?;
        if height >= target {
            return Ok(height);
        }

        trace!(height, target, "waiting for claim block");

        if let Some(deadline) = deadline {
            if tokio::time::Instant::now() + options.poll_interval > deadline {
                return Err(GameError::timeout(format!(
                    "block {target} not reached before deadline, chain is at {height}"
                )));
            }
        }

        tokio::time::sleep(options.poll_interval).await;
    }
}
