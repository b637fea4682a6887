//! Supervised background loop driving periodic peer polling.

use std::{fmt::Display, future::Future, time::Duration};

use rand::{thread_rng, Rng};
use tokio::time::sleep;

/// Run `cycle` until `shutdown` resolves, sleeping a uniformly random
/// duration between `min` and `max` before each run. A failed cycle is
/// logged and never ends the loop; only the shutdown signal does.
pub async fn run<C, F, E>(
    mut cycle: C,
    min: Duration,
    max: Duration,
    shutdown: impl Future<Output = ()>,
) where
    C: FnMut() -> F,
    F: Future<Output = Result<(), E>>,
    E: Display,
{
    tokio::pin!(shutdown);
    loop {
        let wait = thread_rng().gen_range(min..=max);
        tokio::select! {
            _ = &mut shutdown => break,
            _ = sleep(wait) => {
                if let Err(e) = cycle().await {
                    eprintln!("poll cycle error: {e}");
                }
            }
        }
    }
}
