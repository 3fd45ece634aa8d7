//! Callback dispatch between the engine and local observers.
//!
//! The engine calls four slots synchronously from inside `run_training`.
//! Each slot translates the foreign arguments into a local event, runs the
//! registered observers and, for batch requests, writes the produced values
//! into the engine's destination collection.
//!
//! Nothing raised by an observer crosses back into the engine: errors and
//! panics are caught per invocation, logged and kept as [`Diagnostic`]s.

pub(crate) mod trampoline;

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::mem;
use std::ops::{Deref, DerefMut};
use std::panic::{catch_unwind, AssertUnwindSafe};

use anyhow::{bail, Result};
use tracing::{debug, error};

use crate::api::ffi::RawValueCollection;
use crate::boundary::Engine;
use crate::common::error::contract_violation;
use crate::common::ids::CorrelationToken;
use crate::ledger::CleanupLedger;
use crate::values::{NamedTensor, NamedTensorDescriptor, NamedValueCodec, ValueCollection};

/// The four callback slots.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum SlotKind {
    TrainingBatch,
    TestingBatch,
    ErrorFunction,
    EvaluationFunction,
}

impl SlotKind {
    /// Stable name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotKind::TrainingBatch => "training_batch",
            SlotKind::TestingBatch => "testing_batch",
            SlotKind::ErrorFunction => "error_function",
            SlotKind::EvaluationFunction => "evaluation_function",
        }
    }
}

impl fmt::Display for SlotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-slot state; `Invoked` only while the engine is inside the callback.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SlotPhase {
    Unregistered,
    Registered,
    Invoked,
}

/// Payload handed to batch observers.
#[derive(Debug)]
pub struct BatchRequest<'a> {
    pub slot: SlotKind,
    pub batch_size: usize,
    pub expected_inputs: &'a [NamedTensorDescriptor],
    pub expected_outputs: &'a [NamedTensorDescriptor],
}

/// Decoded values of one error-function callback.
///
/// Entries that fail to decode are left out and reported as diagnostics;
/// the observers still see every entry that did decode, in engine order.
#[derive(Clone, Debug, Default)]
pub struct ErrorReport {
    values: Vec<NamedTensor>,
}

impl ErrorReport {
    /// First value named `name`.
    pub fn find(&self, name: &str) -> Option<&NamedTensor> {
        self.values.iter().find(|value| value.name == name)
    }

    /// All decoded values in engine order.
    pub fn values(&self) -> &[NamedTensor] {
        &self.values
    }

    /// Number of decoded values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when no entry decoded.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Arguments of one evaluation-function callback.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct EvaluationTick {
    pub num_samples: usize,
    pub step: usize,
}

/// A failure caught at the callback boundary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    pub slot: SlotKind,
    pub correlation: Option<CorrelationToken>,
    pub message: String,
}

pub type BatchObserver = Box<dyn FnMut(&BatchRequest<'_>) -> Result<Vec<NamedTensor>>>;
pub type ErrorObserver = Box<dyn FnMut(&ErrorReport) -> Result<()>>;
pub type EvaluationObserver = Box<dyn FnMut(EvaluationTick) -> Result<()>>;

/// Diagnostics kept between drains; older entries are dropped first.
pub const MAX_DIAGNOSTICS: usize = 256;

struct SlotState<O> {
    kind: SlotKind,
    phase: Cell<SlotPhase>,
    observers: RefCell<Vec<O>>,
}

impl<O> SlotState<O> {
    fn new(kind: SlotKind) -> Self {
        Self {
            kind,
            phase: Cell::new(SlotPhase::Unregistered),
            observers: RefCell::new(Vec::new()),
        }
    }

    fn mark_registered(&self) {
        if self.phase.get() == SlotPhase::Unregistered {
            self.phase.set(SlotPhase::Registered);
        }
    }
}

/// A slot that hands boundary memory to the engine, with the ledger that
/// keeps it alive until the engine is done with it.
struct LedgeredSlot<O> {
    state: SlotState<O>,
    ledger: RefCell<CleanupLedger>,
}

impl<O> LedgeredSlot<O> {
    fn new(kind: SlotKind) -> Self {
        Self {
            state: SlotState::new(kind),
            ledger: RefCell::new(CleanupLedger::default()),
        }
    }

    fn pending(&self) -> usize {
        self.ledger.try_borrow().map(|ledger| ledger.len()).unwrap_or(0)
    }

    fn flush(&self) -> usize {
        match self.ledger.try_borrow_mut() {
            Ok(mut ledger) => ledger.flush(),
            Err(_) => 0,
        }
    }
}

impl<O> Deref for LedgeredSlot<O> {
    type Target = SlotState<O>;

    fn deref(&self) -> &SlotState<O> {
        &self.state
    }
}

/// Observers moved out of their slot for one invocation.
///
/// Observers registered while these run are appended after them when the
/// guard drops, on every exit path.
struct TakenObservers<'a, O> {
    slot: &'a RefCell<Vec<O>>,
    observers: Vec<O>,
}

impl<'a, O> TakenObservers<'a, O> {
    fn take(slot: &'a RefCell<Vec<O>>) -> Self {
        let observers = mem::take(&mut *slot.borrow_mut());
        Self { slot, observers }
    }
}

impl<O> Deref for TakenObservers<'_, O> {
    type Target = Vec<O>;

    fn deref(&self) -> &Vec<O> {
        &self.observers
    }
}

impl<O> DerefMut for TakenObservers<'_, O> {
    fn deref_mut(&mut self) -> &mut Vec<O> {
        &mut self.observers
    }
}

impl<O> Drop for TakenObservers<'_, O> {
    fn drop(&mut self) {
        let mut current = self.slot.borrow_mut();
        let added = mem::take(&mut *current);
        *current = mem::take(&mut self.observers);
        current.extend(added);
    }
}

/// State reachable from the engine through the callbacks' `user_data`.
///
/// Lives at a stable heap address owned by the parameter store; every
/// mutation goes through `Cell`/`RefCell` because the engine re-enters it
/// while the store is borrowed.
pub(crate) struct DispatchContext {
    engine: Engine,
    correlation: Cell<Option<CorrelationToken>>,
    expected_inputs: RefCell<Vec<NamedTensorDescriptor>>,
    expected_outputs: RefCell<Vec<NamedTensorDescriptor>>,
    training: LedgeredSlot<BatchObserver>,
    testing: LedgeredSlot<BatchObserver>,
    error: LedgeredSlot<ErrorObserver>,
    evaluation: SlotState<EvaluationObserver>,
    diagnostics: RefCell<VecDeque<Diagnostic>>,
    dropped_diagnostics: Cell<usize>,
}

impl DispatchContext {
    pub(crate) fn new(engine: Engine) -> Self {
        Self {
            engine,
            correlation: Cell::new(None),
            expected_inputs: RefCell::new(Vec::new()),
            expected_outputs: RefCell::new(Vec::new()),
            training: LedgeredSlot::new(SlotKind::TrainingBatch),
            testing: LedgeredSlot::new(SlotKind::TestingBatch),
            error: LedgeredSlot::new(SlotKind::ErrorFunction),
            evaluation: SlotState::new(SlotKind::EvaluationFunction),
            diagnostics: RefCell::new(VecDeque::new()),
            dropped_diagnostics: Cell::new(0),
        }
    }

    pub(crate) fn mark_callbacks_registered(&self, token: CorrelationToken) {
        self.correlation.set(Some(token));
        self.error.mark_registered();
        self.evaluation.mark_registered();
    }

    pub(crate) fn mark_feeds_registered(&self) {
        self.training.mark_registered();
        self.testing.mark_registered();
    }

    pub(crate) fn phase(&self, kind: SlotKind) -> SlotPhase {
        match kind {
            SlotKind::TrainingBatch => self.training.phase.get(),
            SlotKind::TestingBatch => self.testing.phase.get(),
            SlotKind::ErrorFunction => self.error.phase.get(),
            SlotKind::EvaluationFunction => self.evaluation.phase.get(),
        }
    }

    pub(crate) fn expected_inputs(&self) -> &RefCell<Vec<NamedTensorDescriptor>> {
        &self.expected_inputs
    }

    pub(crate) fn expected_outputs(&self) -> &RefCell<Vec<NamedTensorDescriptor>> {
        &self.expected_outputs
    }

    pub(crate) fn add_batch_observer(&self, kind: SlotKind, observer: BatchObserver) {
        self.batch_slot(kind).observers.borrow_mut().push(observer);
    }

    pub(crate) fn add_error_observer(&self, observer: ErrorObserver) {
        self.error.observers.borrow_mut().push(observer);
    }

    pub(crate) fn add_evaluation_observer(&self, observer: EvaluationObserver) {
        self.evaluation.observers.borrow_mut().push(observer);
    }

    pub(crate) fn take_diagnostics(&self) -> Vec<Diagnostic> {
        mem::take(&mut *self.diagnostics.borrow_mut()).into()
    }

    /// Diagnostics discarded because more than [`MAX_DIAGNOSTICS`] were
    /// waiting to be taken.
    pub(crate) fn dropped_diagnostics(&self) -> usize {
        self.dropped_diagnostics.get()
    }

    /// Entries still waiting for release across all slots.
    pub(crate) fn pending(&self) -> usize {
        self.training.pending() + self.testing.pending() + self.error.pending()
    }

    /// Release everything pending in every slot.
    pub(crate) fn flush_all(&self) -> usize {
        self.training.flush() + self.testing.flush() + self.error.flush()
    }

    fn batch_slot(&self, kind: SlotKind) -> &LedgeredSlot<BatchObserver> {
        match kind {
            SlotKind::TrainingBatch => &self.training,
            SlotKind::TestingBatch => &self.testing,
            other => contract_violation(format!("{other} is not a batch slot")),
        }
    }

    /// Service a training or testing batch request.
    pub(crate) fn service_batch(
        &self,
        kind: SlotKind,
        batch_size: usize,
        destination: *mut RawValueCollection,
    ) {
        let slot = self.batch_slot(kind);
        self.guarded(&slot.state, || self.fill_batch(slot, batch_size, destination), || {});
    }

    /// Service an error-function callback, then release everything the
    /// engine has consumed so far.
    pub(crate) fn service_error(&self, values: *mut RawValueCollection) {
        self.guarded(
            &self.error.state,
            || {
                let report = self.decode_report(values)?;
                let mut observers = TakenObservers::take(&self.error.observers);
                debug!(values = report.len(), observers = observers.len(), "error callback");
                for observer in observers.iter_mut() {
                    if let Err(err) = observer(&report) {
                        self.report(SlotKind::ErrorFunction, format!("{err:#}"));
                    }
                }
                Ok(())
            },
            || {
                let released = self.flush_all();
                debug!(released, "flushed cleanup ledgers");
            },
        );
    }

    pub(crate) fn service_evaluation(&self, num_samples: usize, step: usize) {
        self.guarded(
            &self.evaluation,
            || {
                let tick = EvaluationTick { num_samples, step };
                let mut observers = TakenObservers::take(&self.evaluation.observers);
                for observer in observers.iter_mut() {
                    if let Err(err) = observer(tick) {
                        self.report(SlotKind::EvaluationFunction, format!("{err:#}"));
                    }
                }
                Ok(())
            },
            || {},
        );
    }

    /// Run the batch observers and write what they produced into
    /// `destination`.
    ///
    /// Capacity, names and encoding are checked before the first write, so a
    /// failing observer or an oversized batch leaves the destination empty.
    fn fill_batch(
        &self,
        slot: &LedgeredSlot<BatchObserver>,
        batch_size: usize,
        destination: *mut RawValueCollection,
    ) -> Result<()> {
        // The engine has consumed this slot's previous batch by the time it
        // asks for the next one.
        slot.ledger.borrow_mut().flush();

        if destination.is_null() {
            bail!("engine supplied a null destination collection");
        }

        let produced = {
            let mut observers = TakenObservers::take(&slot.observers);
            if observers.is_empty() {
                debug!(slot = %slot.kind, batch_size, "no observer, leaving batch empty");
                return Ok(());
            }
            let inputs = self.expected_inputs.borrow();
            let outputs = self.expected_outputs.borrow();
            let request = BatchRequest {
                slot: slot.kind,
                batch_size,
                expected_inputs: &inputs,
                expected_outputs: &outputs,
            };
            let mut produced = Vec::new();
            for observer in observers.iter_mut() {
                produced.extend(observer(&request)?);
            }
            produced
        };

        // SAFETY: the engine keeps `destination` alive for this callback.
        let destination = unsafe { ValueCollection::wrap(self.engine, destination) };
        let capacity = destination.capacity()?;
        if produced.len() > capacity {
            bail!(
                "observers produced {} values for a destination of capacity {capacity}",
                produced.len()
            );
        }
        if let Some(bad) = produced.iter().find(|tensor| tensor.name.contains('\0')) {
            bail!("value name {:?} contains a nul byte", bad.name);
        }

        // Values encoded here are dropped on failure; the engine never saw them.
        let codec = NamedValueCodec::new(self.engine);
        let mut encoded = Vec::with_capacity(produced.len());
        for tensor in produced {
            let (value, pin) = codec.encode(tensor.data)?;
            encoded.push((tensor.name, value, pin));
        }

        let mut ledger = slot.ledger.borrow_mut();
        let written = encoded.len();
        for (index, (name, value, pin)) in encoded.into_iter().enumerate() {
            let outcome = destination.set(index, value.as_value_ref(), &name);
            ledger.push(value);
            if let Some(pin) = pin {
                ledger.push(pin);
            }
            outcome?;
        }
        debug!(slot = %slot.kind, batch_size, written, pending = ledger.len(), "batch delivered");
        Ok(())
    }

    fn decode_report(&self, values: *mut RawValueCollection) -> Result<ErrorReport> {
        if values.is_null() {
            bail!("engine supplied a null error value collection");
        }
        // SAFETY: the engine keeps `values` alive for this callback.
        let collection = unsafe { ValueCollection::wrap(self.engine, values) };
        let codec = NamedValueCodec::new(self.engine);
        let mut ledger = self.error.ledger.borrow_mut();

        let count = collection.count()?;
        let mut decoded = Vec::with_capacity(count);
        for index in 0..count {
            let entry = collection.get(index, &mut ledger).and_then(|(value, name)| {
                let data = codec.decode(value)?;
                Ok(NamedTensor { name, data })
            });
            match entry {
                Ok(tensor) => decoded.push(tensor),
                Err(err) => {
                    self.report(SlotKind::ErrorFunction, format!("error value {index} skipped: {err}"))
                }
            }
        }
        Ok(ErrorReport { values: decoded })
    }

    /// Run one invocation of `slot` with observer failures contained.
    ///
    /// `finish` runs before the slot leaves `Invoked`, even when `body`
    /// failed or panicked.
    fn guarded<O>(&self, slot: &SlotState<O>, body: impl FnOnce() -> Result<()>, finish: impl FnOnce()) {
        match slot.phase.get() {
            SlotPhase::Registered => {}
            SlotPhase::Invoked => {
                self.report(slot.kind, "re-entrant invocation ignored".to_string());
                return;
            }
            SlotPhase::Unregistered => {
                self.report(slot.kind, "invoked before registration".to_string());
                return;
            }
        }

        slot.phase.set(SlotPhase::Invoked);
        match catch_unwind(AssertUnwindSafe(body)) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => self.report(slot.kind, format!("{err:#}")),
            Err(payload) => self.report(slot.kind, format!("observer panicked: {}", panic_message(&*payload))),
        }
        if let Err(payload) = catch_unwind(AssertUnwindSafe(finish)) {
            self.report(slot.kind, format!("cleanup panicked: {}", panic_message(&*payload)));
        }
        slot.phase.set(SlotPhase::Registered);
    }

    fn report(&self, slot: SlotKind, message: String) {
        let correlation = self.correlation.get();
        error!(
            %slot,
            correlation = %correlation.map(|token| token.to_string()).unwrap_or_default(),
            %message,
            "callback failed"
        );
        if let Ok(mut diagnostics) = self.diagnostics.try_borrow_mut() {
            if diagnostics.len() == MAX_DIAGNOSTICS {
                diagnostics.pop_front();
                self.dropped_diagnostics.set(self.dropped_diagnostics.get() + 1);
            }
            diagnostics.push_back(Diagnostic {
                slot,
                correlation,
                message,
            });
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
