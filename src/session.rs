//! Training session: the lifecycle of one parameter set against the engine.
//!
//! `Created → Configured → Initialized → Running → Ended`. Configuration is
//! optional; a session can be initialized straight from `Created` once the
//! store has been set up by hand.

use tracing::{debug, info};

use crate::boundary::{Engine, EngineHandle};
use crate::common::error::{contract_violation, TrainResult};
use crate::common::ids::CorrelationToken;
use crate::ledger::CleanupLedger;
use crate::params::{ParameterStore, TrainingPlan};
use crate::values::{NamedTensorDescriptor, NamedValueCodec, ValueCollection};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SessionState {
    Created,
    Configured,
    Initialized,
    Running,
    Ended,
}

#[derive(Debug)]
pub struct TrainingSession {
    store: ParameterStore,
    state: SessionState,
}

impl TrainingSession {
    /// A fresh session over a new parameter set.
    pub fn new(engine: Engine) -> TrainResult<Self> {
        Ok(Self::from_store(ParameterStore::new(engine)?))
    }

    /// A session over a store the caller already set up.
    pub fn from_store(store: ParameterStore) -> Self {
        Self {
            store,
            state: SessionState::Created,
        }
    }

    /// The session's parameter store.
    pub fn store(&self) -> &ParameterStore {
        &self.store
    }

    /// Mutable access, for registrations outside [`configure`](Self::configure).
    pub fn store_mut(&mut self) -> &mut ParameterStore {
        &mut self.store
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Apply `plan`, register the callbacks and, when the plan names feeds,
    /// the data feeds.
    pub fn configure(&mut self, plan: &TrainingPlan) -> TrainResult<CorrelationToken> {
        if !matches!(self.state, SessionState::Created | SessionState::Configured) {
            contract_violation(format!("configure called in state {:?}", self.state));
        }
        plan.apply(&self.store)?;
        let token = self.store.register_callbacks()?;
        if !plan.feeds.is_empty() {
            self.store.register_data_feeds(&plan.feeds)?;
        }
        self.transition(SessionState::Configured);
        Ok(token)
    }

    /// Initialize the engine and record the model's expected inputs and
    /// outputs on the store.
    ///
    /// On failure the session keeps its state and both shape collections
    /// are released.
    pub fn initialize(&mut self, env: EngineHandle) -> TrainResult<()> {
        if !matches!(self.state, SessionState::Created | SessionState::Configured) {
            contract_violation(format!("initialize called in state {:?}", self.state));
        }

        let engine = self.store.engine();
        let inputs = ValueCollection::create(engine)?;
        let outputs = ValueCollection::create(engine)?;
        engine.call("initialize_training", |api| unsafe {
            (api.initialize_training)(
                env.as_ptr(),
                self.store.handle().as_ptr(),
                inputs.as_ptr(),
                outputs.as_ptr(),
            )
        })?;

        let mut ledger = CleanupLedger::default();
        let described = describe(engine, &inputs, &mut ledger)
            .and_then(|ins| Ok((ins, describe(engine, &outputs, &mut ledger)?)));
        ledger.flush();
        inputs.dispose();
        outputs.dispose();
        let (expected_inputs, expected_outputs) = described?;

        info!(
            inputs = expected_inputs.len(),
            outputs = expected_outputs.len(),
            "training initialized"
        );
        self.store.set_expected(expected_inputs, expected_outputs);
        self.transition(SessionState::Initialized);
        Ok(())
    }

    /// Hand control to the engine until it finishes this run.
    ///
    /// Callbacks fire synchronously from inside; every cleanup ledger is
    /// empty again when this returns, whether or not the run succeeded.
    pub fn run(&mut self) -> TrainResult<()> {
        match self.state {
            SessionState::Initialized | SessionState::Running => {}
            SessionState::Ended => contract_violation("run called after end"),
            other => contract_violation(format!("run called before initialize (state {other:?})")),
        }
        if !self.store.data_feeds_registered() {
            contract_violation("run called before register_data_feeds");
        }

        let handle = self.store.handle();
        let outcome = self.store.engine().call("run_training", |api| unsafe {
            (api.run_training)(handle.as_ptr())
        });
        let released = self.store.flush_pending();
        debug!(released, "flushed cleanup ledgers after run");
        outcome?;

        self.transition(SessionState::Running);
        Ok(())
    }

    /// Finish the run and release everything still pending.
    pub fn end(&mut self) -> TrainResult<()> {
        if self.state != SessionState::Running {
            contract_violation(format!("end called in state {:?}", self.state));
        }

        let handle = self.store.handle();
        let outcome = self.store.engine().call("end_training", |api| unsafe {
            (api.end_training)(handle.as_ptr())
        });
        self.store.flush_pending();
        outcome?;

        self.transition(SessionState::Ended);
        Ok(())
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            info!(from = ?self.state, to = ?next, "session state changed");
            self.state = next;
        }
    }
}

/// Decode every entry of a shape collection into a descriptor.
fn describe(
    engine: Engine,
    collection: &ValueCollection,
    ledger: &mut CleanupLedger,
) -> TrainResult<Vec<NamedTensorDescriptor>> {
    let codec = NamedValueCodec::new(engine);
    let count = collection.count()?;
    let mut described = Vec::with_capacity(count);
    for index in 0..count {
        let (value, name) = collection.get(index, ledger)?;
        described.push(codec.decode_shape(value, name)?);
    }
    Ok(described)
}
