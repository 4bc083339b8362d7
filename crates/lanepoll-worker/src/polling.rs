//! Polling strategies: how many fetch rounds a lane performs and how results are
//! accumulated before the batch is handed to the processing hook.
//!
//! Accumulation state lives inside one `collect` call and is never shared between
//! lanes. Every looping strategy re-checks the stop signal between rounds and returns
//! what it has so far once a stop is requested.

use std::time::Duration;

use lanepoll_core::{ConsumerError, ConsumerResult, Message, Provider};

use crate::session::StopSignal;

const TIME_BASED_PERIOD: Duration = Duration::from_secs(5);
const CONTINUOUS_IDLE_PAUSE: Duration = Duration::from_secs(20);
const DEFAULT_TARGET: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollingStrategy {
    /// A single fetch, possibly empty
    Once,
    /// Fetch until a round returns fewer messages than the provider's batch limit
    Emptying,
    /// Fetch once per `period` until `target` messages have accumulated
    TimeBased { period: Duration, target: usize },
    /// Fetch back to back, pausing `idle_pause` after an under-capacity round, until
    /// `target` messages have accumulated
    Continuous { idle_pause: Duration, target: usize },
}

impl PollingStrategy {
    pub fn time_based() -> Self {
        PollingStrategy::TimeBased {
            period: TIME_BASED_PERIOD,
            target: DEFAULT_TARGET,
        }
    }

    pub fn continuous() -> Self {
        PollingStrategy::Continuous {
            idle_pause: CONTINUOUS_IDLE_PAUSE,
            target: DEFAULT_TARGET,
        }
    }

    pub fn validate(&self) -> ConsumerResult<()> {
        match self {
            PollingStrategy::TimeBased { target, .. } | PollingStrategy::Continuous { target, .. }
                if *target == 0 =>
            {
                Err(ConsumerError::invalid_argument(
                    "polling target must be greater than zero",
                ))
            }
            _ => Ok(()),
        }
    }

    /// Assemble one batch from `provider`.
    pub async fn collect(
        &self,
        provider: &dyn Provider,
        stop: &StopSignal,
    ) -> ConsumerResult<Vec<Message>> {
        self.validate()?;

        let limit = provider.batch_limit();
        let mut accumulated = Vec::new();
        let mut rounds = 0usize;

        match *self {
            PollingStrategy::Once => {
                accumulated = provider.fetch().await?;
                rounds = 1;
            }
            PollingStrategy::Emptying => loop {
                let round = provider.fetch().await?;
                rounds += 1;
                let received = round.len();
                accumulated.extend(round);

                if received < limit || stop.is_stop_requested() {
                    break;
                }
            },
            PollingStrategy::TimeBased { period, target } => loop {
                if !stop.sleep(period).await {
                    break;
                }
                let round = provider.fetch().await?;
                rounds += 1;
                accumulated.extend(round);

                if accumulated.len() >= target {
                    break;
                }
            },
            PollingStrategy::Continuous { idle_pause, target } => loop {
                let round = provider.fetch().await?;
                rounds += 1;
                let received = round.len();
                accumulated.extend(round);

                if accumulated.len() >= target {
                    break;
                }
                if received < limit {
                    if !stop.sleep(idle_pause).await {
                        break;
                    }
                } else if stop.is_stop_requested() {
                    break;
                }
            },
        }

        tracing::debug!(
            strategy = ?self,
            rounds = rounds,
            count = accumulated.len(),
            batch_limit = limit,
            "Polling strategy collected batch"
        );

        Ok(accumulated)
    }
}
