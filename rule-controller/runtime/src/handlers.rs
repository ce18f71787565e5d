use crate::{
    core::{
        policy::{
            Authentication, Authorization, ConditionRoute, DynamicConfig, ServiceMapping, TagRoute,
        },
        Kind, Policy,
    },
    storage::{Event, Handler, SharedStorage},
};
use ahash::AHashMap as HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// The single writer of each rule kind.
#[derive(Clone)]
pub struct Handlers {
    sinks: Arc<HashMap<Kind, Box<dyn RuleSink>>>,
}

/// Accepts serialized rule changes for one kind.
#[async_trait::async_trait]
pub trait RuleSink: Send + Sync + 'static {
    fn kind(&self) -> Kind;

    /// Decodes `body` as the kind's policy and stores it under `key`.
    async fn apply(&self, key: String, body: &[u8]) -> Result<(), SinkError>;

    async fn delete(&self, key: String) -> Result<(), SinkError>;
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("invalid policy: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("handler is not running")]
    Closed,
}

struct EventSink<P> {
    events: mpsc::Sender<Event<P>>,
}

// === impl Handlers ===

impl Handlers {
    /// Builds a handler for every kind and spawns its event loop.
    pub fn spawn(storage: &SharedStorage, capacity: usize) -> Self {
        let sinks = [
            sink::<Authentication>(storage, capacity),
            sink::<Authorization>(storage, capacity),
            sink::<ConditionRoute>(storage, capacity),
            sink::<TagRoute>(storage, capacity),
            sink::<DynamicConfig>(storage, capacity),
            sink::<ServiceMapping>(storage, capacity),
        ]
        .into_iter()
        .map(|sink| (sink.kind(), sink))
        .collect::<HashMap<_, _>>();
        debug!(kinds = sinks.len(), "Spawned rule handlers");
        Self {
            sinks: Arc::new(sinks),
        }
    }

    pub fn get(&self, kind: Kind) -> Option<&dyn RuleSink> {
        self.sinks.get(&kind).map(|sink| &**sink)
    }
}

impl std::fmt::Debug for Handlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds = self.sinks.keys().collect::<Vec<_>>();
        kinds.sort();
        f.debug_struct("Handlers").field("kinds", &kinds).finish()
    }
}

fn sink<P: Policy>(storage: &SharedStorage, capacity: usize) -> Box<dyn RuleSink> {
    let handler = Arc::new(Handler::<P>::new(storage.clone()));
    let events = handler.events(capacity.max(1));
    Box::new(EventSink { events })
}

// === impl EventSink ===

#[async_trait::async_trait]
impl<P: Policy> RuleSink for EventSink<P> {
    fn kind(&self) -> Kind {
        P::KIND
    }

    async fn apply(&self, key: String, body: &[u8]) -> Result<(), SinkError> {
        let policy = serde_json::from_slice::<P>(body)?;
        self.events
            .send(Event::Apply { key, policy })
            .await
            .map_err(|_| SinkError::Closed)
    }

    async fn delete(&self, key: String) -> Result<(), SinkError> {
        self.events
            .send(Event::Delete { key })
            .await
            .map_err(|_| SinkError::Closed)
    }
}
