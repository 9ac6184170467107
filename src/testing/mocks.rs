//! Mock implementations for testing
//!
//! Provides a scripted broker session factory and recording handlers so the
//! dispatch loop can be exercised without a broker.

use crate::config::{ConfigError, HandlerParams};
use crate::error::{ConnectError, ReceiveError, SubscribeError, TeardownError};
use crate::handlers::{Handler, HandlerFactory, HandlerOutcome};
use crate::transport::mqtt::{mqtt_topic, subscription_filter};
use crate::transport::{BrokerEndpoint, BrokerSession, Frame, SessionFactory};
use async_trait::async_trait;
use rumqttc::v5::mqttbytes::matches;
use std::collections::{HashSet, VecDeque};
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const RECEIVE_POLL: Duration = Duration::from_millis(5);

/// What a mock session observed, in order
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    ConnectAttempt { endpoint: String, at: Instant },
    Connected { session: usize },
    Subscribe { session: usize, topic: String },
    SubscribeFailed { session: usize, topic: String },
    Unsubscribe { session: usize, topic: String },
    Disconnect { session: usize },
}

/// One scripted result of `receive_next`
#[derive(Debug, Clone)]
pub enum ScriptedReceive {
    Frame(Frame),
    BrokenPipe,
    Disconnected(String),
}

impl ScriptedReceive {
    fn into_result(self) -> Result<Frame, ReceiveError> {
        match self {
            ScriptedReceive::Frame(frame) => Ok(frame),
            ScriptedReceive::BrokenPipe => Err(ReceiveError::from_io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "broken pipe",
            ))),
            ScriptedReceive::Disconnected(reason) => Err(ReceiveError::Disconnected(reason)),
        }
    }
}

#[derive(Debug, Default)]
struct MockScript {
    connect_failures: usize,
    receives: VecDeque<ScriptedReceive>,
    rejected_topics: HashSet<String>,
    sessions: usize,
}

/// Session factory that fails a configured number of connects, then hands
/// out sessions replaying scripted frames
///
/// The frame script is shared by all sessions: after a scripted receive
/// failure the next session continues where the previous one stopped. Once
/// the script is exhausted `receive_next` waits for more to be pushed.
///
/// Like a broker, a session only delivers frames whose topic matches one of
/// its live subscription filters; other scripted frames are dropped.
#[derive(Debug, Clone, Default)]
pub struct MockSessionFactory {
    script: Arc<Mutex<MockScript>>,
    events: Arc<Mutex<Vec<SessionEvent>>>,
}

impl MockSessionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn fail_connects(&self, count: usize) {
        self.script.lock().await.connect_failures = count;
    }

    pub async fn reject_topic(&self, topic: &str) {
        self.script
            .lock()
            .await
            .rejected_topics
            .insert(topic.to_string());
    }

    pub async fn push_frame(&self, topic: &str, body: &str) {
        self.push(ScriptedReceive::Frame(Frame::new(
            topic.to_string(),
            body.as_bytes().to_vec(),
        )))
        .await;
    }

    pub async fn push(&self, receive: ScriptedReceive) {
        self.script.lock().await.receives.push_back(receive);
    }

    pub async fn events(&self) -> Vec<SessionEvent> {
        self.events.lock().await.clone()
    }

    pub async fn connect_attempts(&self) -> Vec<Instant> {
        self.events
            .lock()
            .await
            .iter()
            .filter_map(|event| match event {
                SessionEvent::ConnectAttempt { at, .. } => Some(*at),
                _ => None,
            })
            .collect()
    }

    pub async fn count(&self, predicate: impl Fn(&SessionEvent) -> bool) -> usize {
        self.events.lock().await.iter().filter(|e| predicate(e)).count()
    }
}

#[async_trait]
impl SessionFactory for MockSessionFactory {
    type Session = MockSession;

    async fn connect(&self, endpoint: &BrokerEndpoint) -> Result<MockSession, ConnectError> {
        self.events.lock().await.push(SessionEvent::ConnectAttempt {
            endpoint: endpoint.to_string(),
            at: Instant::now(),
        });

        let mut script = self.script.lock().await;
        if script.connect_failures > 0 {
            script.connect_failures -= 1;
            return Err(ConnectError::Refused("scripted failure".to_string()));
        }

        script.sessions += 1;
        let id = script.sessions;
        self.events
            .lock()
            .await
            .push(SessionEvent::Connected { session: id });

        Ok(MockSession {
            id,
            script: self.script.clone(),
            events: self.events.clone(),
            filters: Vec::new(),
        })
    }
}

/// Session handed out by [`MockSessionFactory`]
#[derive(Debug)]
pub struct MockSession {
    id: usize,
    script: Arc<Mutex<MockScript>>,
    events: Arc<Mutex<Vec<SessionEvent>>>,
    filters: Vec<String>,
}

impl MockSession {
    fn delivers(&self, receive: &ScriptedReceive) -> bool {
        match receive {
            ScriptedReceive::Frame(frame) => {
                let topic = mqtt_topic(&frame.topic);
                self.filters.iter().any(|filter| matches(&topic, filter))
            }
            _ => true,
        }
    }
}

#[async_trait]
impl BrokerSession for MockSession {
    async fn subscribe(&mut self, topic: &str) -> Result<(), SubscribeError> {
        let rejected = self.script.lock().await.rejected_topics.contains(topic);
        let mut events = self.events.lock().await;
        if rejected {
            events.push(SessionEvent::SubscribeFailed {
                session: self.id,
                topic: topic.to_string(),
            });
            return Err(SubscribeError::new(topic, "not authorized"));
        }
        events.push(SessionEvent::Subscribe {
            session: self.id,
            topic: topic.to_string(),
        });
        self.filters.push(subscription_filter(topic));
        Ok(())
    }

    async fn receive_next(&mut self) -> Result<Frame, ReceiveError> {
        loop {
            {
                let mut script = self.script.lock().await;
                while let Some(receive) = script.receives.pop_front() {
                    if self.delivers(&receive) {
                        return receive.into_result();
                    }
                }
            }
            tokio::time::sleep(RECEIVE_POLL).await;
        }
    }

    async fn unsubscribe(&mut self, topic: &str) -> Result<(), SubscribeError> {
        let filter = subscription_filter(topic);
        if let Some(index) = self.filters.iter().position(|f| *f == filter) {
            self.filters.remove(index);
        }
        self.events.lock().await.push(SessionEvent::Unsubscribe {
            session: self.id,
            topic: topic.to_string(),
        });
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TeardownError> {
        self.events
            .lock()
            .await
            .push(SessionEvent::Disconnect { session: self.id });
        Ok(())
    }
}

/// Handler recording every frame it sees
#[derive(Debug, Clone)]
pub struct RecordingHandler {
    name: String,
    fail_with: Option<String>,
    note: Option<String>,
    received: Arc<Mutex<Vec<Frame>>>,
}

impl RecordingHandler {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fail_with: None,
            note: None,
            received: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Attach a note to every successful outcome
    pub fn with_note(mut self, note: &str) -> Self {
        self.note = Some(note.to_string());
        self
    }

    pub fn failing(name: &str, message: &str) -> Self {
        Self {
            fail_with: Some(message.to_string()),
            ..Self::new(name)
        }
    }

    pub async fn received(&self) -> Vec<Frame> {
        self.received.lock().await.clone()
    }

    pub async fn bodies(&self) -> Vec<String> {
        self.received
            .lock()
            .await
            .iter()
            .map(|frame| String::from_utf8_lossy(&frame.body).to_string())
            .collect()
    }

    /// Wait until at least `count` frames arrived; false on timeout
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.received.lock().await.len() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.received.lock().await.len() >= count
    }
}

#[async_trait]
impl Handler for RecordingHandler {
    fn kind(&self) -> &str {
        &self.name
    }

    async fn handle_message(&self, frame: &Frame) -> HandlerOutcome {
        self.received.lock().await.push(frame.clone());
        match &self.fail_with {
            Some(message) => HandlerOutcome::failed(message.clone()).with_note("recorded anyway"),
            None => match &self.note {
                Some(note) => HandlerOutcome::ok().with_note(note.clone()),
                None => HandlerOutcome::ok(),
            },
        }
    }
}

/// Factory resolving handler kinds to pre-built recording handlers
///
/// Kinds not registered fail like an unknown handler would.
#[derive(Debug, Clone, Default)]
pub struct MockHandlerFactory {
    handlers: Vec<(String, RecordingHandler)>,
}

impl MockHandlerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: &str, handler: RecordingHandler) -> Self {
        self.handlers.push((kind.to_string(), handler));
        self
    }
}

impl HandlerFactory for MockHandlerFactory {
    fn build(&self, kind: &str, _params: &HandlerParams) -> Result<Arc<dyn Handler>, ConfigError> {
        self.handlers
            .iter()
            .find(|(name, _)| name == kind)
            .map(|(_, handler)| Arc::new(handler.clone()) as Arc<dyn Handler>)
            .ok_or_else(|| ConfigError::UnknownHandler(kind.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_factory_fails_then_connects() {
        let factory = MockSessionFactory::new();
        factory.fail_connects(1).await;
        let endpoint = BrokerEndpoint::parse("mqtt://localhost").unwrap();

        assert!(factory.connect(&endpoint).await.is_err());
        let mut session = factory.connect(&endpoint).await.unwrap();
        session.subscribe("a.b").await.unwrap();

        assert_eq!(factory.connect_attempts().await.len(), 2);
        assert_eq!(
            factory
                .count(|e| matches!(e, SessionEvent::Subscribe { .. }))
                .await,
            1
        );
    }

    #[tokio::test]
    async fn test_session_replays_script() {
        let factory = MockSessionFactory::new();
        factory.push_frame("a.b", "one").await;
        factory.push(ScriptedReceive::BrokenPipe).await;

        let endpoint = BrokerEndpoint::parse("mqtt://localhost").unwrap();
        let mut session = factory.connect(&endpoint).await.unwrap();
        session.subscribe("a.b").await.unwrap();

        let frame = session.receive_next().await.unwrap();
        assert_eq!(frame.topic, "a.b");
        assert!(session.receive_next().await.unwrap_err().is_broken_pipe());

        let blocked =
            tokio::time::timeout(Duration::from_millis(20), session.receive_next()).await;
        assert!(blocked.is_err());
    }

    #[tokio::test]
    async fn test_session_drops_frames_outside_its_filters() {
        let factory = MockSessionFactory::new();
        factory.push_frame("a.b.c", "nobody listens").await;
        factory.push_frame("x.y.z", "wildcard").await;

        let endpoint = BrokerEndpoint::parse("mqtt://localhost").unwrap();
        let mut session = factory.connect(&endpoint).await.unwrap();
        session.subscribe("x.*.z").await.unwrap();

        let frame = session.receive_next().await.unwrap();
        assert_eq!(frame.topic, "x.y.z");
        assert!(factory.script.lock().await.receives.is_empty());
    }

    #[test]
    fn test_recording_handler_outcome() {
        let handler = RecordingHandler::failing("bad", "boom");
        let outcome = tokio_test::block_on(handler.handle_message(&Frame::new("t", "x")));
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("boom"));
        assert_eq!(tokio_test::block_on(handler.bodies()), vec!["x".to_string()]);
    }
}
