//! Consumer: N polling lanes, per-lane completion handles and the cooperative stop
//! barrier.
//!
//! Each lane runs fetch → process → settle cycles until it observes the session's
//! stop flag at a checkpoint. Messages are only acknowledged or dead-lettered after
//! the processing hook signals completion for that lane. Any backend or hook error
//! stops the whole session through [`Consumer::raise`].
//!
//! Shutdown: [`Consumer::stop`] is advisory. A lane inside a backend call finishes
//! that call before retiring, and `stop` waits for every lane without a timeout.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

use lanepoll_core::{
    ConsumerConfig, ConsumerError, ConsumerResult, CycleResult, LaneId, Message, Provider,
};

use crate::hook::{boxed_hook, ErrorObserver, ProcessHook};
use crate::polling::PollingStrategy;
use crate::restart::{LaneStep, RestartStrategy};
use crate::session::{Session, SessionState};

/// Payload of a lane's finish handle
#[derive(Debug)]
struct Settlement {
    finished: Vec<Message>,
    restart: Option<RestartStrategy>,
}

/// Completion handles of one in-flight cycle. Both senders are single-shot.
struct PendingCycle {
    finish: Option<oneshot::Sender<Settlement>>,
    dead: Option<oneshot::Sender<Vec<Message>>>,
}

struct ConsumerInner {
    provider: Arc<dyn Provider>,
    config: ConsumerConfig,
    polling: Mutex<Option<PollingStrategy>>,
    hook: Mutex<Option<ProcessHook>>,
    error_observer: Mutex<Option<ErrorObserver>>,
    last_error: Mutex<Option<String>>,
    pending: Mutex<HashMap<LaneId, PendingCycle>>,
    session: Mutex<Option<Arc<Session>>>,
}

/// Multi-lane queue consumer
#[derive(Clone)]
pub struct Consumer {
    inner: Arc<ConsumerInner>,
}

impl Consumer {
    pub fn new(provider: Arc<dyn Provider>, config: ConsumerConfig) -> Self {
        Self {
            inner: Arc::new(ConsumerInner {
                provider,
                config,
                polling: Mutex::new(None),
                hook: Mutex::new(None),
                error_observer: Mutex::new(None),
                last_error: Mutex::new(None),
                pending: Mutex::new(HashMap::new()),
                session: Mutex::new(None),
            }),
        }
    }

    /// Obtain batches through `strategy` instead of direct provider fetches.
    pub fn set_polling_strategy(&self, strategy: PollingStrategy) -> ConsumerResult<()> {
        strategy.validate()?;
        if let Ok(mut polling) = self.inner.polling.lock() {
            *polling = Some(strategy);
        }
        Ok(())
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.inner.config
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.inner.provider
    }

    /// Register the processing hook. A later call replaces the previous hook.
    ///
    /// The hook must not await [`Consumer::stop`]: the calling lane cannot retire while
    /// its hook is running, so the barrier would never resolve. Use
    /// `finish_with(.., RestartStrategy::Once)` to end the session from a hook.
    pub fn process<F, Fut>(&self, hook: F)
    where
        F: Fn(Vec<Message>, LaneId) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        if let Ok(mut slot) = self.inner.hook.lock() {
            *slot = Some(boxed_hook(hook));
        }
    }

    /// Install the single error observer; replaces any previous one.
    pub fn on_error<F>(&self, observer: F)
    where
        F: Fn(&ConsumerError) + Send + Sync + 'static,
    {
        if let Ok(mut slot) = self.inner.error_observer.lock() {
            *slot = Some(Arc::new(observer));
        }
    }

    /// Start `lane_count` lanes in a fresh session and return their ids.
    #[tracing::instrument(skip(self))]
    pub async fn poll(&self, lane_count: usize) -> ConsumerResult<Vec<LaneId>> {
        if lane_count == 0 {
            return Err(ConsumerError::invalid_argument(
                "lane count must be at least 1",
            ));
        }

        let session = {
            let mut slot = self
                .inner
                .session
                .lock()
                .map_err(|_| ConsumerError::configuration("consumer session lock poisoned"))?;
            if slot.as_ref().is_some_and(|s| s.is_running()) {
                return Err(ConsumerError::configuration(
                    "a poll session is already running; stop it before polling again",
                ));
            }
            let session = Arc::new(Session::new(lane_count));
            *slot = Some(session.clone());
            session
        };
        if let Ok(mut last_error) = self.inner.last_error.lock() {
            *last_error = None;
        }

        let lane_ids: Vec<LaneId> = (0..lane_count).map(|_| LaneId::new()).collect();
        for lane_id in &lane_ids {
            let consumer = self.clone();
            let lane_session = session.clone();
            let lane_id = *lane_id;
            session.track(tokio::spawn(async move {
                consumer.run_lane(lane_session, lane_id).await;
            }));
        }

        tracing::info!(
            lanes = lane_count,
            batch_limit = self.inner.provider.batch_limit(),
            continuous_fetch = self.inner.config.continuous_fetch,
            dead_letter_target = self.inner.provider.has_dead_letter_target(),
            "Consumer polling started"
        );

        Ok(lane_ids)
    }

    /// Start the number of lanes configured in `ConsumerConfig::lane_count`.
    pub async fn poll_default(&self) -> ConsumerResult<Vec<LaneId>> {
        self.poll(self.inner.config.lane_count).await
    }

    /// Request cooperative shutdown and wait until every lane has retired.
    pub async fn stop(&self) {
        let Some(session) = self.current_session() else {
            return;
        };

        if session.request_stop() {
            tracing::info!(
                lanes = session.latch().total(),
                "Consumer stop requested"
            );
        }

        session.latch().wait().await;

        for handle in session.take_handles() {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Lane task ended abnormally");
            }
        }

        tracing::info!(lanes = session.latch().total(), "Consumer stopped");
    }

    /// Signal completion of `lane_id`'s in-flight cycle and acknowledge `messages`.
    ///
    /// Returns `false` (and does nothing) when the lane has no cycle in flight or the
    /// cycle was already finished.
    pub fn finish(&self, lane_id: LaneId, messages: Vec<Message>) -> bool {
        self.signal_finish(
            lane_id,
            Settlement {
                finished: messages,
                restart: None,
            },
        )
    }

    /// Like [`Consumer::finish`], with a restart strategy that decides what the lane
    /// does once the cycle is settled.
    pub fn finish_with(
        &self,
        lane_id: LaneId,
        messages: Vec<Message>,
        restart: RestartStrategy,
    ) -> bool {
        self.signal_finish(
            lane_id,
            Settlement {
                finished: messages,
                restart: Some(restart),
            },
        )
    }

    /// Route `messages` of `lane_id`'s current cycle to the dead-letter destination.
    ///
    /// May be signalled before or after `finish`. A cycle accepts dead-letters from the
    /// moment its batch is dispatched until the lane dispatches its next batch or
    /// retires. Returns `Ok(false)` when the cycle already dead-lettered and an
    /// `InvalidArgument` error when the lane has no open cycle.
    pub fn dead_letter(&self, lane_id: LaneId, messages: Vec<Message>) -> ConsumerResult<bool> {
        if !self.inner.provider.has_dead_letter_target() {
            return Err(ConsumerError::configuration(
                "dead-letter requested but the provider has no dead-letter target",
            ));
        }

        let sender = self
            .inner
            .pending
            .lock()
            .ok()
            .and_then(|mut pending| pending.get_mut(&lane_id).map(|c| c.dead.take()));

        match sender {
            Some(Some(tx)) => Ok(tx.send(messages).is_ok()),
            Some(None) => {
                tracing::warn!(lane_id = %lane_id, "Dead-letter ignored: cycle already dead-lettered");
                Ok(false)
            }
            None => Err(ConsumerError::invalid_argument(format!(
                "lane {} has no open cycle to dead-letter {} messages from",
                lane_id,
                messages.len()
            ))),
        }
    }

    /// Signal dead-letter (when `result.dead` is non-empty) and finish for one cycle.
    pub fn settle(
        &self,
        lane_id: LaneId,
        result: CycleResult,
        restart: Option<RestartStrategy>,
    ) -> ConsumerResult<bool> {
        if !result.dead.is_empty() {
            self.dead_letter(lane_id, result.dead)?;
        }
        Ok(self.signal_finish(
            lane_id,
            Settlement {
                finished: result.finished,
                restart,
            },
        ))
    }

    /// Record a fatal error, report it and request a stop of the session.
    ///
    /// Only the first error of a session reaches the observer and `last_error`, even
    /// when it arrives after a graceful stop began; later ones are swallowed.
    pub fn raise(&self, error: ConsumerError) {
        let session = self.current_session();
        self.raise_in(session.as_deref(), error);
    }

    fn raise_in(&self, session: Option<&Session>, error: ConsumerError) {
        if let Some(session) = session {
            if !session.claim_error_report() {
                tracing::debug!(error = %error, "Session already reported an error, ignoring");
                session.request_stop();
                return;
            }
        }

        if error.is_fatal() {
            tracing::error!(
                error = %error,
                error_code = error.error_code(),
                "Consumer error, stopping session"
            );
        } else {
            tracing::warn!(
                error = %error,
                error_code = error.error_code(),
                "Configuration error surfaced in a lane, stopping session"
            );
        }

        if let Ok(mut last_error) = self.inner.last_error.lock() {
            *last_error = Some(error.to_string());
        }

        let observer = self
            .inner
            .error_observer
            .lock()
            .ok()
            .and_then(|slot| slot.clone());
        if let Some(observer) = observer {
            observer(&error);
        }

        if let Some(session) = session {
            session.request_stop();
        }
    }

    /// Message of the last fatal error raised in the current session
    pub fn last_error(&self) -> Option<String> {
        self.inner
            .last_error
            .lock()
            .ok()
            .and_then(|slot| slot.clone())
    }

    pub fn is_running(&self) -> bool {
        self.current_session().is_some_and(|s| s.is_running())
    }

    pub fn session_state(&self) -> Option<SessionState> {
        self.current_session().map(|s| s.state())
    }

    fn current_session(&self) -> Option<Arc<Session>> {
        self.inner
            .session
            .lock()
            .ok()
            .and_then(|slot| slot.clone())
    }

    fn signal_finish(&self, lane_id: LaneId, settlement: Settlement) -> bool {
        let sender = self
            .inner
            .pending
            .lock()
            .ok()
            .and_then(|mut pending| pending.get_mut(&lane_id).and_then(|c| c.finish.take()));

        match sender {
            Some(tx) => tx.send(settlement).is_ok(),
            None => {
                tracing::warn!(lane_id = %lane_id, "Finish ignored: no cycle in flight for lane");
                false
            }
        }
    }

    fn clear_pending(&self, lane_id: LaneId) {
        if let Ok(mut pending) = self.inner.pending.lock() {
            pending.remove(&lane_id);
        }
    }

    #[tracing::instrument(skip(self, session, lane_id), fields(lane_id = %lane_id))]
    async fn run_lane(&self, session: Arc<Session>, lane_id: LaneId) {
        tracing::debug!("Lane started");

        loop {
            if session.stop_requested() {
                break;
            }

            let step = match self.cycle(&session, lane_id).await {
                Ok(step) => step,
                Err(e) => {
                    self.raise_in(Some(session.as_ref()), e);
                    continue;
                }
            };

            match step {
                LaneStep::Continue => {}
                LaneStep::Pause(pause) => {
                    session.signal().sleep(pause).await;
                }
                LaneStep::EndTurn => {
                    session.signal().sleep(self.inner.config.poll_interval()).await;
                }
                LaneStep::Stop => {
                    session.request_stop();
                }
            }
        }

        self.clear_pending(lane_id);
        let retired = session.latch().count_down();
        tracing::info!(
            retired = retired,
            lanes = session.latch().total(),
            "Lane retired"
        );
    }

    /// One fetch → process → settle cycle
    async fn cycle(&self, session: &Arc<Session>, lane_id: LaneId) -> ConsumerResult<LaneStep> {
        let provider = self.inner.provider.clone();
        let batch = self.obtain_batch(session).await?;

        if batch.is_empty() {
            tracing::trace!("No messages received, ending turn");
            return Ok(LaneStep::EndTurn);
        }

        let hook = self.inner.hook.lock().ok().and_then(|slot| slot.clone());
        let Some(hook) = hook else {
            tracing::warn!(
                count = batch.len(),
                "No processing hook registered, leaving messages for redelivery"
            );
            return Ok(LaneStep::EndTurn);
        };

        let received = batch.len();
        let (finish_tx, finish_rx) = oneshot::channel();
        let (dead_tx, dead_rx) = if provider.has_dead_letter_target() {
            let (tx, rx) = oneshot::channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };
        if let Ok(mut pending) = self.inner.pending.lock() {
            pending.insert(
                lane_id,
                PendingCycle {
                    finish: Some(finish_tx),
                    dead: dead_tx,
                },
            );
        }

        tracing::debug!(count = received, "Dispatching batch to processing hook");

        // Spawned so that a panicking hook surfaces as an error instead of killing the lane.
        match tokio::spawn(hook(batch, lane_id)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.clear_pending(lane_id);
                return Err(ConsumerError::Hook(e));
            }
            Err(e) => {
                self.clear_pending(lane_id);
                return Err(ConsumerError::Hook(anyhow::anyhow!(
                    "processing hook panicked: {}",
                    e
                )));
            }
        }

        let settlement = match finish_rx.await {
            Ok(settlement) => settlement,
            Err(_) => {
                self.clear_pending(lane_id);
                tracing::warn!("Finish handle dropped before completion");
                return Ok(LaneStep::EndTurn);
            }
        };

        // The dead-letter handle stays registered after finish; a signal that has not
        // arrived yet is settled by a follow-up task until the lane's next cycle.
        let (dead, open_dead) = match dead_rx.map(|mut rx| (rx.try_recv(), rx)) {
            Some((Ok(dead), _)) => (dead, None),
            Some((Err(TryRecvError::Empty), rx)) => (Vec::new(), Some(rx)),
            Some((Err(TryRecvError::Closed), _)) | None => (Vec::new(), None),
        };
        let mut result = CycleResult::new(settlement.finished, dead);
        let trimmed = result.make_disjoint();
        if trimmed > 0 {
            tracing::warn!(
                count = trimmed,
                "Messages both finished and dead-lettered; they will only be dead-lettered"
            );
        }

        if !result.dead.is_empty() {
            provider.dead_letter(&result.dead).await?;
            tracing::info!(count = result.dead.len(), "Messages dead-lettered");
        }
        if !result.finished.is_empty() {
            provider.acknowledge(&result.finished).await?;
            tracing::debug!(count = result.finished.len(), "Messages acknowledged");
        }

        if let Some(rx) = open_dead {
            let acknowledged: HashSet<String> =
                result.finished.iter().map(|m| m.id.clone()).collect();
            let consumer = self.clone();
            let tail_session = session.clone();
            session.track(tokio::spawn(async move {
                consumer
                    .late_dead_letter(tail_session, lane_id, rx, acknowledged)
                    .await;
            }));
        }

        let step = match settlement.restart {
            Some(restart) => restart.next_step(),
            None if received >= provider.batch_limit() => LaneStep::Continue,
            None if self.inner.config.continuous_fetch => {
                LaneStep::Pause(self.inner.config.continuous_fetch_pause())
            }
            None => LaneStep::EndTurn,
        };
        tracing::debug!(step = ?step, received = received, "Cycle settled");

        Ok(step)
    }

    /// Dead-letter messages signalled after the cycle's finish was processed.
    ///
    /// Ends without a provider call when the handle is dropped, which happens when the
    /// lane registers its next cycle or retires.
    #[tracing::instrument(skip_all, fields(lane_id = %lane_id))]
    async fn late_dead_letter(
        &self,
        session: Arc<Session>,
        lane_id: LaneId,
        rx: oneshot::Receiver<Vec<Message>>,
        acknowledged: HashSet<String>,
    ) {
        let Ok(mut dead) = rx.await else {
            return;
        };

        let before = dead.len();
        dead.retain(|m| !acknowledged.contains(&m.id));
        if dead.len() < before {
            tracing::warn!(
                count = before - dead.len(),
                "Messages dead-lettered after being acknowledged; skipping them"
            );
        }
        if dead.is_empty() {
            return;
        }

        match self.inner.provider.dead_letter(&dead).await {
            Ok(()) => tracing::info!(count = dead.len(), "Messages dead-lettered"),
            Err(e) => self.raise_in(Some(session.as_ref()), e),
        }
    }

    async fn obtain_batch(&self, session: &Session) -> ConsumerResult<Vec<Message>> {
        let provider = self.inner.provider.as_ref();
        let signal = session.signal();

        let strategy = self.inner.polling.lock().ok().and_then(|slot| *slot);
        if let Some(strategy) = strategy {
            return strategy.collect(provider, &signal).await;
        }

        loop {
            let batch = provider.fetch().await?;
            if !batch.is_empty() || !self.inner.config.continuous_fetch {
                return Ok(batch);
            }
            tracing::trace!("Empty fetch in continuous mode, pausing");
            if !signal.sleep(self.inner.config.continuous_fetch_pause()).await {
                return Ok(Vec::new());
            }
        }
    }
}
