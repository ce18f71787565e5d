use crate::SharedStorage;
use parking_lot::Mutex;
use rule_controller_core::{Endpoint, ExactError, Kind, Origin, Policy, ToClient};
use std::{collections::BTreeMap, fmt, sync::Arc};
use tokio::sync::mpsc;
use tracing::{debug, info_span, trace, Instrument};

/// An immutable, revisioned set of policies of one kind.
pub struct PolicyOrigin<P> {
    revision: i64,
    policies: Arc<BTreeMap<String, P>>,
}

/// Owns the policies of one kind.
///
/// Changes are serialized: each one rebuilds the policy map, bumps the
/// revision and publishes the resulting origin before returning.
pub struct Handler<P> {
    storage: SharedStorage,
    state: Mutex<State<P>>,
}

/// A change to a kind's policies, keyed by `namespace/name`.
#[derive(Clone, Debug, PartialEq)]
pub enum Event<P> {
    Apply { key: String, policy: P },
    Delete { key: String },
}

struct State<P> {
    revision: i64,
    policies: Arc<BTreeMap<String, P>>,
}

// === impl PolicyOrigin ===

impl<P: Policy> Origin for PolicyOrigin<P> {
    fn kind(&self) -> Kind {
        P::KIND
    }

    fn revision(&self) -> i64 {
        self.revision
    }

    fn exact(&self, endpoint: Option<&Endpoint>) -> Result<ToClient, ExactError> {
        let matched = self
            .policies
            .values()
            .filter(|policy| policy.matches(endpoint))
            .filter_map(|policy| policy.to_client())
            .collect::<Vec<_>>();
        let data = serde_json::to_string(&matched).map_err(|e| ExactError::new(P::KIND, e))?;
        Ok(ToClient {
            kind: P::KIND,
            revision: self.revision,
            data,
        })
    }
}

impl<P> fmt::Debug for PolicyOrigin<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyOrigin")
            .field("revision", &self.revision)
            .field("policies", &self.policies.len())
            .finish()
    }
}

// === impl Handler ===

impl<P: Policy> Handler<P> {
    pub fn new(storage: SharedStorage) -> Self {
        Self {
            storage,
            state: Mutex::new(State {
                revision: 0,
                policies: Default::default(),
            }),
        }
    }

    pub fn add(&self, key: impl Into<String>, policy: P) {
        self.apply(key.into(), policy)
    }

    pub fn update(&self, key: impl Into<String>, policy: P) {
        self.apply(key.into(), policy)
    }

    pub fn delete(&self, key: &str) {
        let mut state = self.state.lock();
        if !state.policies.contains_key(key) {
            trace!(kind = %P::KIND, %key, "Policy does not exist");
            return;
        }

        let mut policies = (*state.policies).clone();
        policies.remove(key);
        debug!(kind = %P::KIND, %key, "Deleted policy");
        self.commit(&mut state, policies);
    }

    pub fn get(&self, key: &str) -> Option<P> {
        self.state.lock().policies.get(key).cloned()
    }

    pub fn revision(&self) -> i64 {
        self.state.lock().revision
    }

    pub fn len(&self) -> usize {
        self.state.lock().policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn handle(&self, event: Event<P>) {
        match event {
            Event::Apply { key, policy } => self.apply(key, policy),
            Event::Delete { key } => self.delete(&key),
        }
    }

    /// Applies events in order until all senders are dropped.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<Event<P>>) {
        while let Some(event) = events.recv().await {
            self.handle(event);
        }
        debug!(kind = %P::KIND, "Event stream closed");
    }

    /// Spawns a task applying events sent on the returned channel.
    pub fn events(self: &Arc<Self>, capacity: usize) -> mpsc::Sender<Event<P>> {
        let (tx, rx) = mpsc::channel(capacity);
        tokio::spawn(
            self.clone()
                .run(rx)
                .instrument(info_span!("handler", kind = %P::KIND)),
        );
        tx
    }

    fn apply(&self, key: String, policy: P) {
        let mut state = self.state.lock();
        if state.policies.get(&key) == Some(&policy) {
            trace!(kind = %P::KIND, %key, "Policy unchanged");
            return;
        }

        let mut policies = (*state.policies).clone();
        debug!(kind = %P::KIND, %key, "Applied policy");
        policies.insert(key, policy);
        self.commit(&mut state, policies);
    }

    fn commit(&self, state: &mut State<P>, policies: BTreeMap<String, P>) {
        state.revision += 1;
        state.policies = Arc::new(policies);
        self.storage.publish(Arc::new(PolicyOrigin {
            revision: state.revision,
            policies: state.policies.clone(),
        }));
    }
}

impl<P> fmt::Debug for Handler<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler").finish_non_exhaustive()
    }
}
