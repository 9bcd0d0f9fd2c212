use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::{Discoverer, TargetGroup};

/// `run` is a simple helper for period service discovery, others with WATCH
/// mechanism is not suitable for this function.
///
/// Every successful refresh is published to `output`, failed refreshes are
/// logged and nothing is published, so consumers keep the last known-good
/// targets until the next tick.
pub async fn run<D>(
    discoverer: D,
    interval: Duration,
    shutdown: CancellationToken,
    output: mpsc::Sender<Vec<TargetGroup>>,
) where
    D: Discoverer,
{
    let mut ticker = tokio::time::interval(interval);
    // a slow refresh delays the next one, instead of firing a burst of ticks
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let start = Instant::now();
        match discoverer.refresh(&shutdown).await {
            Ok(groups) => {
                let targets = groups.iter().map(|group| group.targets.len()).sum::<usize>();
                debug!(
                    message = "refresh targets finished",
                    groups = groups.len(),
                    targets,
                    elapsed = ?start.elapsed(),
                );

                tokio::select! {
                    biased;

                    _ = shutdown.cancelled() => break,
                    result = output.send(groups) => {
                        if result.is_err() {
                            warn!(message = "publish target groups failed, receiver closed");
                            break;
                        }
                    }
                }
            }
            Err(err) => {
                if shutdown.is_cancelled() {
                    break;
                }

                warn!(
                    message = "error while refreshing targets",
                    %err,
                    elapsed = ?start.elapsed(),
                );
            }
        }
    }

    debug!(message = "discovery routine finished");
}
