// Periodic driver: one fetch cycle per tick until shutdown

use crate::error::Result;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

/// Run `cycle` every `interval` on the blocking pool until `shutdown` resolves.
///
/// Failed cycles are logged and the loop continues. Shutdown is observed even
/// while a cycle is running; that cycle finishes in the background.
pub async fn run<F, S>(interval: Duration, shutdown: S, cycle: F)
where
    F: Fn() -> Result<()> + Send + Sync + 'static,
    S: Future<Output = ()>,
{
    let cycle = Arc::new(cycle);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = &mut shutdown => break,
        }

        let cycle = Arc::clone(&cycle);
        let running = tokio::task::spawn_blocking(move || (*cycle)());
        tokio::select! {
            joined = running => match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!("Fetch cycle failed: {}", e),
                Err(e) => tracing::error!("Fetch cycle aborted: {}", e),
            },
            _ = &mut shutdown => break,
        }
    }

    tracing::info!("Watch stopped");
}
