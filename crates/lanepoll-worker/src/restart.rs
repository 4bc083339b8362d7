//! Restart strategies: what a lane, or a whole consumer, does after a processing
//! cycle has been settled.

use std::time::Duration;

use lanepoll_core::ConsumerResult;

use crate::consumer::Consumer;

/// Recommended pause for [`RestartStrategy::TimeBased`]
pub const DEFAULT_RESTART_INTERVAL: Duration = Duration::from_secs(20);

/// Post-cycle policy, chosen per call by the processing hook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartStrategy {
    /// End the session
    Once,
    /// Pause, then start again
    TimeBased(Duration),
    /// Start again immediately
    Continuous,
}

/// What a lane does after a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LaneStep {
    /// Re-enter the cycle immediately
    Continue,
    /// Re-enter the cycle after a stop-aware pause
    Pause(Duration),
    /// Wait for the next poll interval
    EndTurn,
    /// Request a session stop, then retire at the checkpoint
    Stop,
}

impl RestartStrategy {
    pub fn time_based() -> Self {
        RestartStrategy::TimeBased(DEFAULT_RESTART_INTERVAL)
    }

    /// Lane-level application, used when a cycle is finished through
    /// `Consumer::finish_with` or `Consumer::settle`.
    ///
    /// A lane never awaits the stop barrier it belongs to, so `Once` only raises the
    /// stop flag here.
    pub(crate) fn next_step(&self) -> LaneStep {
        match self {
            RestartStrategy::Once => LaneStep::Stop,
            RestartStrategy::TimeBased(interval) => LaneStep::Pause(*interval),
            RestartStrategy::Continuous => LaneStep::Continue,
        }
    }

    /// Session-level application, for host code that drives whole sessions.
    ///
    /// `Once` stops the consumer. `TimeBased` and `Continuous` wind the current
    /// session down and start a fresh one with `lane_count` lanes; if that fails the
    /// consumer is stopped and the error is returned as fatal.
    pub async fn exec(&self, consumer: &Consumer, lane_count: usize) -> ConsumerResult<()> {
        match self {
            RestartStrategy::Once => {
                consumer.stop().await;
                Ok(())
            }
            RestartStrategy::TimeBased(interval) => {
                tokio::time::sleep(*interval).await;
                Self::restart(consumer, lane_count).await
            }
            RestartStrategy::Continuous => Self::restart(consumer, lane_count).await,
        }
    }

    async fn restart(consumer: &Consumer, lane_count: usize) -> ConsumerResult<()> {
        consumer.stop().await;
        match consumer.poll(lane_count).await {
            Ok(_) => Ok(()),
            Err(e) => {
                tracing::error!(error = %e, "Restarting consumer failed");
                consumer.stop().await;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lane_steps_match_strategies() {
        assert_eq!(RestartStrategy::Once.next_step(), LaneStep::Stop);
        assert_eq!(RestartStrategy::Continuous.next_step(), LaneStep::Continue);
        assert_eq!(
            RestartStrategy::time_based().next_step(),
            LaneStep::Pause(Duration::from_secs(20))
        );
    }
}
