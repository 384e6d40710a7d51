//! # Supervisor: orchestrates the two feeder workers, event fan-out, and shutdown.
//!
//! The [`Supervisor`] owns the event bus, the subscriber list and the
//! [`SupervisorConfig`]. One call to [`Supervisor::run_until`] drives a
//! complete pipeline lifetime.
//!
//! ## Key responsibilities
//! - subscribe to the [`Bus`] and **fan-out** events via [`SubscriberSet`]
//! - start the consumer, wait until its rule is registered, then start the producer
//! - apply the [`RunPolicy`](crate::RunPolicy) (bounded duration or until the producer stops)
//! - cancel and join both workers within [`SupervisorConfig::grace`]
//! - report the first recorded failure as the pipeline's result
//!
//! ## High-level architecture
//! ```text
//! run_until(producer, consumer, stop):
//!
//! Preparation:
//!   - spawn_listener(): Bus.subscribe() ─► SubscriberSet::emit(&Event)   (fire-and-forget)
//!   - FailureAggregator + root CancellationToken
//!
//! Gate:
//!   spawn consumer (child token + ready sender)
//!   select! {
//!       ready signal     → spawn producer (child token)
//!       consumer exited  → producer is never started
//!       root cancelled   → failure already recorded
//!       stop future      → ShutdownRequested
//!       deadline         → RunDurationElapsed
//!   }
//!
//! Run policy (producer started):
//!   Bounded(d):  select! { deadline, stop, root cancelled }
//!   Unbounded:   select! { producer joined, stop }
//!
//! Shutdown path:
//!   root.cancel()             → propagates to child tokens
//!   join_all_with_grace():
//!      ├─ all joined         → Bus.publish(AllStoppedWithin)
//!      └─ grace exceeded     → abort + await stragglers, Bus.publish(GraceExceeded)
//!
//! Result:
//!   FailureAggregator::cause()  → Err(WorkerFailed)
//!   aborted workers             → Err(GraceExceeded)
//!   otherwise                   → Ok(PipelineReport)
//! ```
//!
//! The supervisor never returns while a worker task is alive, and every
//! join handle is awaited at most once.

use std::future::{pending, Future};
use std::sync::Arc;

use tokio::sync::{broadcast::error::RecvError, broadcast::error::TryRecvError, oneshot};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::SupervisorConfig;
use crate::core::runner::run_worker;
use crate::core::FailureAggregator;
use crate::error::{PipelineError, WorkerError};
use crate::events::{Bus, Event, EventKind};
use crate::subscribers::{Subscribe, SubscriberSet};
use crate::workers::{WorkerContext, WorkerOutcome, WorkerRef, WorkerReport};

/// Outcome of a pipeline run that ended without a failure.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineReport {
    /// Every worker that was started, in start order.
    pub workers: Vec<WorkerReport>,
}

impl PipelineReport {
    /// Returns the outcome of the named worker, if it was started.
    pub fn outcome(&self, name: &str) -> Option<&WorkerOutcome> {
        self.workers
            .iter()
            .find(|w| w.name == name)
            .map(|w| &w.outcome)
    }
}

/// How the gate phase (waiting for the consumer's ready signal) ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Gate {
    Ready,
    ConsumerExited,
    Failed,
    Stopped,
    Elapsed,
}

/// A spawned worker together with its outcome once joined.
struct Running {
    name: String,
    handle: JoinHandle<WorkerOutcome>,
    outcome: Option<WorkerOutcome>,
}

impl Running {
    fn settle(&mut self, res: Result<WorkerOutcome, JoinError>) {
        let outcome = match res {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => WorkerOutcome::Failed(WorkerError::Panicked {
                info: e.to_string(),
            }),
            Err(_) => WorkerOutcome::Interrupted,
        };
        self.outcome = Some(outcome);
    }

    /// Awaits the task unless it has already been joined.
    async fn join(&mut self) {
        if self.outcome.is_none() {
            let res = (&mut self.handle).await;
            self.settle(res);
        }
    }

    fn into_report(self) -> WorkerReport {
        WorkerReport {
            name: self.name,
            outcome: self.outcome.unwrap_or(WorkerOutcome::Interrupted),
        }
    }
}

/// Coordinates the producer and consumer workers, event delivery, and shutdown.
pub struct Supervisor {
    cfg: SupervisorConfig,
    bus: Bus,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl Supervisor {
    /// Creates a new supervisor with the given config and subscribers.
    pub fn new(cfg: SupervisorConfig, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        let bus = Bus::new(cfg.bus_capacity);
        Self {
            cfg,
            bus,
            subscribers,
        }
    }

    /// Returns the event bus workers should publish to.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SupervisorConfig {
        &self.cfg
    }

    /// Runs the pipeline without an external stop request.
    pub async fn run(
        self,
        producer: WorkerRef,
        consumer: WorkerRef,
    ) -> Result<PipelineReport, PipelineError> {
        self.run_until(producer, consumer, pending()).await
    }

    /// Runs the pipeline until the run policy ends it, a worker fails, or `stop` completes.
    pub async fn run_until<F>(
        self,
        producer: WorkerRef,
        consumer: WorkerRef,
        stop: F,
    ) -> Result<PipelineReport, PipelineError>
    where
        F: Future<Output = ()>,
    {
        let deadline = self.cfg.run.deadline(Instant::now());
        let listener_stop = CancellationToken::new();
        let listener = self.spawn_listener(listener_stop.clone());

        let failures = Arc::new(FailureAggregator::new());
        let root = CancellationToken::new();
        tokio::pin!(stop);

        let (ready_tx, ready_rx) = oneshot::channel();
        let consumer_ctx = WorkerContext::with_ready(root.child_token(), ready_tx);
        let mut running = vec![self.spawn(consumer, consumer_ctx, &failures, &root)];

        let gate = tokio::select! {
            biased;
            res = ready_rx => match res {
                Ok(()) => Gate::Ready,
                Err(_) => Gate::ConsumerExited,
            },
            _ = root.cancelled() => Gate::Failed,
            _ = stop.as_mut() => Gate::Stopped,
            _ = deadline_elapsed(deadline) => Gate::Elapsed,
        };

        match gate {
            Gate::Ready => {
                let ctx = WorkerContext::new(root.child_token());
                let mut producer = self.spawn(producer, ctx, &failures, &root);
                self.apply_policy(&mut producer, deadline, stop.as_mut(), &root)
                    .await;
                running.push(producer);
            }
            Gate::Stopped => self.bus.publish(Event::new(EventKind::ShutdownRequested)),
            Gate::Elapsed => self.bus.publish(Event::new(EventKind::RunDurationElapsed)),
            Gate::ConsumerExited | Gate::Failed => {}
        }

        root.cancel();
        let stuck = self.join_all_with_grace(&mut running).await;

        listener_stop.cancel();
        let _ = listener.await;

        if let Some(cause) = failures.cause() {
            return Err(PipelineError::WorkerFailed {
                worker: cause.worker,
                error: cause.error,
            });
        }
        if !stuck.is_empty() {
            return Err(PipelineError::GraceExceeded {
                grace: self.cfg.grace,
                stuck,
            });
        }
        Ok(PipelineReport {
            workers: running.into_iter().map(Running::into_report).collect(),
        })
    }

    /// Subscribes to the bus and forwards events to a fresh subscriber set.
    ///
    /// Once `stop` fires, buffered events are drained before the set shuts down.
    fn spawn_listener(&self, stop: CancellationToken) -> JoinHandle<()> {
        let mut rx = self.bus.subscribe();
        let set = SubscriberSet::new(self.subscribers.clone(), self.bus.clone());
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    res = rx.recv() => match res {
                        Ok(ev) => set.emit(&ev),
                        Err(RecvError::Lagged(_)) => continue,
                        Err(RecvError::Closed) => break,
                    },
                    _ = stop.cancelled() => {
                        loop {
                            match rx.try_recv() {
                                Ok(ev) => set.emit(&ev),
                                Err(TryRecvError::Lagged(_)) => continue,
                                Err(_) => break,
                            }
                        }
                        break;
                    }
                }
            }
            set.shutdown().await;
        })
    }

    fn spawn(
        &self,
        worker: WorkerRef,
        ctx: WorkerContext,
        failures: &Arc<FailureAggregator>,
        root: &CancellationToken,
    ) -> Running {
        let name = worker.name().to_string();
        let handle = tokio::spawn(run_worker(
            worker,
            ctx,
            self.bus.clone(),
            Arc::clone(failures),
            root.clone(),
        ));
        Running {
            name,
            handle,
            outcome: None,
        }
    }

    /// Waits until the run policy says the pipeline should stop.
    async fn apply_policy<F>(
        &self,
        producer: &mut Running,
        deadline: Option<Instant>,
        stop: std::pin::Pin<&mut F>,
        root: &CancellationToken,
    ) where
        F: Future<Output = ()>,
    {
        match deadline {
            Some(deadline) => tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    self.bus.publish(Event::new(EventKind::RunDurationElapsed));
                }
                _ = stop => self.bus.publish(Event::new(EventKind::ShutdownRequested)),
                _ = root.cancelled() => {}
            },
            None => tokio::select! {
                res = &mut producer.handle => producer.settle(res),
                _ = stop => self.bus.publish(Event::new(EventKind::ShutdownRequested)),
            },
        }
    }

    /// Joins every worker within the grace period; returns the names of aborted ones.
    async fn join_all_with_grace(&self, running: &mut [Running]) -> Vec<String> {
        let grace = self.cfg.grace;
        let joined = tokio::time::timeout(grace, async {
            for r in running.iter_mut() {
                r.join().await;
            }
        })
        .await;

        if joined.is_ok() {
            self.bus.publish(Event::new(EventKind::AllStoppedWithin));
            return Vec::new();
        }

        let mut stuck = Vec::new();
        for r in running.iter_mut().filter(|r| r.outcome.is_none()) {
            r.handle.abort();
            r.join().await;
            stuck.push(r.name.clone());
        }
        self.bus
            .publish(Event::new(EventKind::GraceExceeded).with_reason(stuck.join(", ")));
        stuck
    }
}

async fn deadline_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::config::RunPolicy;
    use crate::workers::Worker;

    /// Marks ready (if asked to) and waits for cancellation.
    struct Parked {
        name: &'static str,
    }

    #[async_trait]
    impl Worker for Parked {
        fn name(&self) -> &str {
            self.name
        }

        async fn run(&self, mut ctx: WorkerContext) -> Result<(), WorkerError> {
            ctx.mark_ready();
            ctx.cancelled().await;
            Err(WorkerError::Canceled)
        }
    }

    /// Ignores cancellation entirely.
    struct Stubborn;

    #[async_trait]
    impl Worker for Stubborn {
        fn name(&self) -> &str {
            "producer"
        }

        async fn run(&self, _ctx: WorkerContext) -> Result<(), WorkerError> {
            pending::<()>().await;
            Ok(())
        }
    }

    fn cfg(run: RunPolicy, grace: Duration) -> SupervisorConfig {
        SupervisorConfig {
            run,
            grace,
            bus_capacity: 64,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_run_interrupts_both_workers() {
        let sup = Supervisor::new(
            cfg(RunPolicy::Bounded(Duration::from_secs(5)), Duration::from_secs(1)),
            Vec::new(),
        );
        let report = sup
            .run(
                Arc::new(Parked { name: "producer" }),
                Arc::new(Parked { name: "consumer" }),
            )
            .await
            .expect("bounded run succeeds");

        assert_eq!(report.outcome("consumer"), Some(&WorkerOutcome::Interrupted));
        assert_eq!(report.outcome("producer"), Some(&WorkerOutcome::Interrupted));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_future_ends_unbounded_run() {
        let sup = Supervisor::new(cfg(RunPolicy::Unbounded, Duration::from_secs(1)), Vec::new());
        let stop = tokio::time::sleep(Duration::from_secs(3));
        let report = sup
            .run_until(
                Arc::new(Parked { name: "producer" }),
                Arc::new(Parked { name: "consumer" }),
                stop,
            )
            .await
            .expect("stopped run succeeds");
        assert_eq!(report.workers.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_worker_is_aborted_after_grace() {
        let grace = Duration::from_millis(500);
        let sup = Supervisor::new(cfg(RunPolicy::Bounded(Duration::from_secs(1)), grace), Vec::new());
        let started = Instant::now();

        let err = sup
            .run(Arc::new(Stubborn), Arc::new(Parked { name: "consumer" }))
            .await
            .expect_err("grace must be exceeded");

        match err {
            PipelineError::GraceExceeded { stuck, .. } => assert_eq!(stuck, vec!["producer"]),
            other => panic!("unexpected error: {other}"),
        }
        assert!(started.elapsed() <= Duration::from_secs(1) + grace);
    }
}
