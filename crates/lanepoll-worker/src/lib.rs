//! Lanepoll Worker – multi-lane polling and acknowledgment scheduler.
//!
//! This crate provides the [`Consumer`] (lane scheduler), its stop barrier, and the
//! polling and restart strategies. Queue backends live in `lanepoll-providers`;
//! processing logic is supplied by the host application through [`Consumer::process`].

mod consumer;
mod hook;
mod polling;
mod restart;
mod session;

pub use consumer::Consumer;
pub use hook::{ErrorObserver, ProcessHook};
pub use polling::PollingStrategy;
pub use restart::RestartStrategy;
pub use session::{CountdownLatch, SessionState, StopSignal};

pub use lanepoll_core::{ConsumerConfig, ConsumerError, ConsumerResult, CycleResult, LaneId, Message};
