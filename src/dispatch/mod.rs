//! The receive/dispatch control loop
//!
//! A single task owns the broker session and drives it through
//! [`DispatchState`]: connect and subscribe (retrying forever with a fixed
//! pause), receive frames and hand them to every matching handler in
//! registration order, and drain on shutdown. Nothing after startup is fatal;
//! only a shutdown request ends the loop.

use crate::config::DaemonConfig;
use crate::error::ReceiveError;
use crate::lifecycle::ShutdownSignal;
use crate::observability::metrics;
use crate::routing::{HandlerRegistry, SharedRegistry};
use crate::transport::{BrokerSession, EndpointResolver, Frame, SessionFactory};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn, Instrument};

pub mod state;

pub use state::{transition, DispatchState, LoopEvent};

/// Loop tuning
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOptions {
    /// Fixed pause before every reconnect attempt
    pub reconnect_delay: Duration,
    /// Log handler notes
    pub verbose: bool,
}

impl DispatchOptions {
    pub fn from_config(config: &DaemonConfig) -> Self {
        Self {
            reconnect_delay: config.broker.reconnect_delay(),
            verbose: config.verbose,
        }
    }
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(60),
            verbose: false,
        }
    }
}

/// Totals for one run of the loop
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchReport {
    pub connect_attempts: u64,
    pub connections: u64,
    pub frames_received: u64,
    pub frames_unmatched: u64,
    pub handler_invocations: u64,
    pub handler_failures: u64,
    pub receive_failures: u64,
    pub reloads_applied: u64,
}

/// Live session together with the destinations it is subscribed to
struct LiveSession<S> {
    session: S,
    subscribed: Vec<String>,
}

/// Outcome of waiting in the active state
enum ActiveStep {
    Shutdown,
    RegistryChanged,
    Received(Result<Frame, ReceiveError>),
}

type DrainHook = Box<dyn FnOnce() + Send + Sync>;

pub struct DispatchLoop<F: SessionFactory> {
    factory: F,
    resolver: EndpointResolver,
    registry: SharedRegistry,
    registry_rx: watch::Receiver<Arc<HandlerRegistry>>,
    shutdown: ShutdownSignal,
    options: DispatchOptions,
    state: DispatchState,
    backoff_pending: bool,
    on_drain: Option<DrainHook>,
    report: DispatchReport,
}

impl<F: SessionFactory> DispatchLoop<F> {
    pub fn new(
        factory: F,
        resolver: EndpointResolver,
        registry: SharedRegistry,
        shutdown: ShutdownSignal,
        options: DispatchOptions,
    ) -> Self {
        let registry_rx = registry.subscribe();
        Self {
            factory,
            resolver,
            registry,
            registry_rx,
            shutdown,
            options,
            state: DispatchState::NoSession,
            backoff_pending: false,
            on_drain: None,
            report: DispatchReport::default(),
        }
    }

    /// Run once during drain, after disconnecting (releases the pid file)
    pub fn with_drain_hook<H: FnOnce() + Send + Sync + 'static>(mut self, hook: H) -> Self {
        self.on_drain = Some(Box::new(hook));
        self
    }

    pub fn state(&self) -> DispatchState {
        self.state
    }

    fn apply(&mut self, event: LoopEvent) {
        let next = transition(self.state, event);
        if next != self.state {
            debug!(from = %self.state, to = %next, ?event, "Dispatch state change");
            metrics().set_loop_state(next.as_str());
        }
        self.state = next;
    }

    /// Drive the loop until shutdown completes
    pub async fn run(mut self) -> DispatchReport {
        let mut live: Option<LiveSession<F::Session>> = None;

        while !self.state.is_terminal() {
            let event = match self.state {
                DispatchState::NoSession => LoopEvent::Start,
                DispatchState::Connecting => match self.connect().await {
                    Ok(session) => {
                        live = Some(session);
                        LoopEvent::ConnectSucceeded
                    }
                    Err(event) => event,
                },
                DispatchState::Active => match live.as_mut() {
                    Some(session) => self.step_active(session).await,
                    None => LoopEvent::ReceiveFailed,
                },
                DispatchState::Draining => {
                    self.drain(live.take()).await;
                    LoopEvent::Drained
                }
                DispatchState::Stopped => break,
            };

            if event == LoopEvent::ReceiveFailed {
                // Transport presumed broken: no unsubscribe, just drop it
                live = None;
                self.backoff_pending = true;
            }
            self.apply(event);
        }

        self.report
    }

    /// Sleep for the backoff unless shutdown arrives first; true if completed
    async fn interruptible_sleep(&mut self, delay: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.shutdown.requested() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    /// One connect attempt; an `Err` carries the event to apply instead
    async fn connect(&mut self) -> Result<LiveSession<F::Session>, LoopEvent> {
        if self.shutdown.is_requested() {
            return Err(LoopEvent::ShutdownRequested);
        }

        if self.backoff_pending {
            let delay = self.options.reconnect_delay;
            info!(
                event = "reconnect_scheduled",
                delay_ms = delay.as_millis() as u64,
                "Reconnecting after pause"
            );
            if !self.interruptible_sleep(delay).await {
                info!("Shutdown signal received during reconnection delay");
                return Err(LoopEvent::ShutdownRequested);
            }
        }
        self.backoff_pending = true;

        let endpoint = self.resolver.next_endpoint();
        self.report.connect_attempts += 1;
        metrics().connection_attempt();

        let connected = tokio::select! {
            biased;
            _ = self.shutdown.requested() => return Err(LoopEvent::ShutdownRequested),
            result = self.factory.connect(&endpoint) => result,
        };

        let mut session = match connected {
            Ok(session) => session,
            Err(e) => {
                metrics().connection_failed();
                warn!(event = "connect_failed", endpoint = %endpoint, error = %e, "Broker connection failed");
                return Err(LoopEvent::ConnectFailed);
            }
        };

        let topics = self.registry_rx.borrow_and_update().topics();
        let subscribed = Self::subscribe_topics(&mut session, &topics)
            .instrument(crate::session_span!(endpoint = %endpoint))
            .await;

        if subscribed.is_empty() && !topics.is_empty() {
            metrics().connection_failed();
            warn!(
                event = "connect_failed",
                endpoint = %endpoint,
                "Every subscription failed, dropping session"
            );
            if let Err(e) = session.disconnect().await {
                debug!(error = %e, "Disconnect after failed subscriptions");
            }
            return Err(LoopEvent::ConnectFailed);
        }

        self.backoff_pending = false;
        self.report.connections += 1;
        metrics().connection_established();
        info!(
            event = "connect",
            endpoint = %endpoint,
            topics = subscribed.len(),
            "Connected to broker"
        );

        Ok(LiveSession {
            session,
            subscribed,
        })
    }

    /// Subscribe each topic independently, returning those that succeeded
    async fn subscribe_topics(session: &mut F::Session, topics: &[String]) -> Vec<String> {
        let mut subscribed = Vec::with_capacity(topics.len());
        for topic in topics {
            match session.subscribe(topic).await {
                Ok(()) => {
                    info!(event = "subscribe", topic = %topic, "Subscribed");
                    subscribed.push(topic.clone());
                }
                Err(e) => {
                    warn!(event = "subscribe_failed", topic = %topic, error = %e, "Subscription failed");
                }
            }
        }
        subscribed
    }

    async fn step_active(&mut self, live: &mut LiveSession<F::Session>) -> LoopEvent {
        let step = tokio::select! {
            biased;
            _ = self.shutdown.requested() => ActiveStep::Shutdown,
            changed = self.registry_rx.changed() => match changed {
                Ok(()) => ActiveStep::RegistryChanged,
                Err(_) => ActiveStep::Shutdown,
            },
            received = live.session.receive_next() => ActiveStep::Received(received),
        };

        match step {
            ActiveStep::Shutdown => LoopEvent::ShutdownRequested,
            ActiveStep::RegistryChanged => {
                self.apply_registry_change(live).await;
                LoopEvent::Continue
            }
            ActiveStep::Received(Ok(frame)) => {
                self.dispatch(&frame).await;
                LoopEvent::Continue
            }
            ActiveStep::Received(Err(e)) => {
                self.report.receive_failures += 1;
                metrics().receive_failed();
                if e.is_broken_pipe() {
                    warn!(event = "receive_failed", broken_pipe = true, error = %e, "Broker connection reset");
                } else {
                    warn!(event = "receive_failed", error = %e, "Receiving from broker failed");
                }
                LoopEvent::ReceiveFailed
            }
        }
    }

    /// Bring the live subscriptions in line with a new registry snapshot
    async fn apply_registry_change(&mut self, live: &mut LiveSession<F::Session>) {
        let wanted = self.registry_rx.borrow_and_update().topics();
        self.report.reloads_applied += 1;

        let vanished: Vec<String> = live
            .subscribed
            .iter()
            .filter(|topic| !wanted.contains(topic))
            .cloned()
            .collect();
        for topic in &vanished {
            match live.session.unsubscribe(topic).await {
                Ok(()) => info!(event = "unsubscribe", topic = %topic, "Unsubscribed"),
                Err(e) => warn!(event = "unsubscribe", topic = %topic, error = %e, "Unsubscribe failed"),
            }
        }
        live.subscribed.retain(|topic| !vanished.contains(topic));

        let added: Vec<String> = wanted
            .iter()
            .filter(|topic| !live.subscribed.contains(topic))
            .cloned()
            .collect();
        let newly = Self::subscribe_topics(&mut live.session, &added).await;
        live.subscribed.extend(newly);

        info!(
            event = "registry_reloaded",
            subscribed = live.subscribed.len(),
            removed = vanished.len(),
            "Applied new handler registry to live session"
        );
    }

    /// Hand one frame to every matching handler, in registration order
    async fn dispatch(&mut self, frame: &Frame) {
        self.report.frames_received += 1;
        metrics().frame_received();

        let registry = self.registry.snapshot();
        let entries = registry.resolve(&frame.topic);
        if entries.is_empty() {
            self.report.frames_unmatched += 1;
            metrics().frame_unmatched();
            debug!(event = "frame_unmatched", topic = %frame.topic, "No handler for topic");
            return;
        }

        let span = crate::frame_span!(topic = %frame.topic, bytes = frame.body.len());
        for entry in entries {
            let started = Instant::now();
            let outcome = entry
                .handler
                .handle_message(frame)
                .instrument(span.clone())
                .await;
            metrics().handler_completed(&entry.kind, outcome.success, started.elapsed());
            self.report.handler_invocations += 1;

            match outcome.into_result(&entry.kind) {
                Ok(notes) => {
                    debug!(event = "handler_ok", key = %entry.key, handler = %entry.kind, "Handler succeeded");
                    if self.options.verbose {
                        for note in notes {
                            info!(event = "handler_ok", key = %entry.key, note = %note, "Handler note");
                        }
                    }
                }
                Err(e) => {
                    self.report.handler_failures += 1;
                    error!(
                        event = "handler_failed",
                        key = %entry.key,
                        handler = %e.handler,
                        topic = %frame.topic,
                        error = %e.message,
                        "Handler failed"
                    );
                    if self.options.verbose {
                        for note in &e.notes {
                            warn!(event = "handler_failed", key = %entry.key, note = %note, "Handler note");
                        }
                    }
                }
            }
        }
    }

    /// Best-effort teardown; runs exactly once
    async fn drain(&mut self, live: Option<LiveSession<F::Session>>) {
        if let Some(LiveSession {
            mut session,
            subscribed,
        }) = live
        {
            for topic in &subscribed {
                match session.unsubscribe(topic).await {
                    Ok(()) => info!(event = "unsubscribe", topic = %topic, "Unsubscribed"),
                    Err(e) => warn!(event = "unsubscribe", topic = %topic, error = %e, "Unsubscribe failed"),
                }
            }
            match session.disconnect().await {
                Ok(()) => info!(event = "disconnect", "Disconnected from broker"),
                Err(e) => warn!(event = "disconnect", error = %e, "Disconnect failed"),
            }
            metrics().disconnected();
        }

        if let Some(hook) = self.on_drain.take() {
            hook();
        }

        let snapshot = metrics().snapshot();
        info!(
            event = "shutdown",
            metrics = %serde_json::to_string(&snapshot).unwrap_or_default(),
            "Dispatch loop stopped"
        );
    }
}
