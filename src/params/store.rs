//! Parameter store: the one owner of the engine's parameter set.

use std::cell::Ref;
use std::ffi::{c_char, c_int, c_void, CString};
use std::fmt;
use std::ptr::{self, NonNull};

use anyhow::Result as ObserverResult;
use tracing::{debug, info};

use crate::api::ffi::{RawAllocator, RawParameters, StatusPtr, TrainingApi};
use crate::boundary::{BoundaryHandle, Engine};
use crate::common::config::BridgeCfg;
use crate::common::error::{contract_violation, TrainError, TrainResult};
use crate::common::ids::CorrelationToken;
use crate::dispatch::trampoline;
use crate::dispatch::{
    BatchRequest, Diagnostic, DispatchContext, ErrorReport, EvaluationTick, SlotKind, SlotPhase,
};
use crate::values::{NamedTensor, NamedTensorDescriptor};

use super::keys::{BoolKey, FloatKey, IntKey, LossFunctionKind, OptimizerKind, StringKey};

/// Owns the engine's parameter set, the callback registrations and the
/// cleanup ledgers behind them.
///
/// Holds no local mirror of parameter values: every accessor is a boundary
/// round trip. Not `Send`: a store and everything it registered are
/// confined to the thread that drives the engine.
pub struct ParameterStore {
    engine: Engine,
    handle: BoundaryHandle<RawParameters>,
    cfg: BridgeCfg,
    dispatch: NonNull<DispatchContext>,
    correlation: Option<(CorrelationToken, CString)>,
    feed_names: Option<CString>,
}

impl ParameterStore {
    /// Create a parameter set using configuration from the environment.
    pub fn new(engine: Engine) -> TrainResult<Self> {
        Self::with_cfg(engine, BridgeCfg::load())
    }

    /// Create a parameter set with explicit bridge configuration.
    pub fn with_cfg(engine: Engine, cfg: BridgeCfg) -> TrainResult<Self> {
        let mut out: *mut RawParameters = ptr::null_mut();
        engine.call("create_parameters", |api| unsafe {
            (api.create_parameters)(&mut out)
        })?;
        let handle = unsafe { BoundaryHandle::from_raw(out) }
            .ok_or_else(|| TrainError::protocol("parameter set", "null"))?;
        let dispatch = NonNull::from(Box::leak(Box::new(DispatchContext::new(engine))));
        info!(?handle, "created parameter set");
        Ok(Self {
            engine,
            handle,
            cfg,
            dispatch,
            correlation: None,
            feed_names: None,
        })
    }

    /// The function table this store talks through.
    pub fn engine(&self) -> Engine {
        self.engine
    }

    /// The engine's handle for this parameter set.
    pub fn handle(&self) -> BoundaryHandle<RawParameters> {
        self.handle
    }

    pub(crate) fn dispatch(&self) -> &DispatchContext {
        // SAFETY: allocated in `with_cfg`, freed only in `drop`.
        unsafe { self.dispatch.as_ref() }
    }

    fn raw(&self) -> *mut RawParameters {
        self.handle.as_ptr()
    }

    /// Set a string parameter; a nul byte in `value` is rejected locally.
    pub fn set_string(&self, key: StringKey, value: &str) -> TrainResult<()> {
        let value = CString::new(value)
            .map_err(|_| TrainError::invalid(format!("{key:?} value contains a nul byte")))?;
        debug!(?key, "set string parameter");
        self.engine.call("set_parameter_string", |api| unsafe {
            (api.set_parameter_string)(self.raw(), key.code(), value.as_ptr())
        })
    }

    /// Read a string parameter.
    pub fn get_string(&self, key: StringKey) -> TrainResult<String> {
        self.read_text("get_parameter_string", key.code(), |api| api.get_parameter_string)
    }

    /// Set a boolean parameter.
    pub fn set_bool(&self, key: BoolKey, value: bool) -> TrainResult<()> {
        debug!(?key, value, "set bool parameter");
        self.engine.call("set_parameter_bool", |api| unsafe {
            (api.set_parameter_bool)(self.raw(), key.code(), value)
        })
    }

    /// Read a boolean parameter.
    pub fn get_bool(&self, key: BoolKey) -> TrainResult<bool> {
        let mut out = false;
        self.engine.call("get_parameter_bool", |api| unsafe {
            (api.get_parameter_bool)(self.raw(), key.code(), &mut out)
        })?;
        Ok(out)
    }

    /// Set an integer parameter; range checks are the engine's.
    pub fn set_int(&self, key: IntKey, value: i64) -> TrainResult<()> {
        debug!(?key, value, "set int parameter");
        self.engine.call("set_parameter_int", |api| unsafe {
            (api.set_parameter_int)(self.raw(), key.code(), value)
        })
    }

    /// Read an integer parameter.
    pub fn get_int(&self, key: IntKey) -> TrainResult<i64> {
        let mut out = 0i64;
        self.engine.call("get_parameter_int", |api| unsafe {
            (api.get_parameter_int)(self.raw(), key.code(), &mut out)
        })?;
        Ok(out)
    }

    /// Set a floating-point parameter.
    pub fn set_float(&self, key: FloatKey, value: f64) -> TrainResult<()> {
        debug!(?key, value, "set float parameter");
        self.engine.call("set_parameter_double", |api| unsafe {
            (api.set_parameter_double)(self.raw(), key.code(), value)
        })
    }

    /// The engine reports floats as decimal text; text that does not parse
    /// is a protocol error.
    pub fn get_float(&self, key: FloatKey) -> TrainResult<f64> {
        let text = self.read_text("get_parameter_double", key.code(), |api| api.get_parameter_double)?;
        text.trim()
            .parse::<f64>()
            .map_err(|_| TrainError::protocol("floating-point parameter", &text))
    }

    /// Select the optimizer.
    pub fn set_optimizer(&self, kind: OptimizerKind) -> TrainResult<()> {
        debug!(?kind, "set optimizer");
        self.engine.call("set_optimizer", |api| unsafe {
            (api.set_optimizer)(self.raw(), kind.code())
        })
    }

    /// The selected optimizer; an unknown code is a protocol error.
    pub fn get_optimizer(&self) -> TrainResult<OptimizerKind> {
        let mut out: c_int = 0;
        self.engine.call("get_optimizer", |api| unsafe {
            (api.get_optimizer)(self.raw(), &mut out)
        })?;
        OptimizerKind::from_code(out)
    }

    /// Select the loss function.
    pub fn set_loss_function(&self, kind: LossFunctionKind) -> TrainResult<()> {
        debug!(?kind, "set loss function");
        self.engine.call("set_loss_function", |api| unsafe {
            (api.set_loss_function)(self.raw(), kind.code())
        })
    }

    /// The selected loss function; an unknown code is a protocol error.
    pub fn get_loss_function(&self) -> TrainResult<LossFunctionKind> {
        let mut out: c_int = 0;
        self.engine.call("get_loss_function", |api| unsafe {
            (api.get_loss_function)(self.raw(), &mut out)
        })?;
        LossFunctionKind::from_code(out)
    }

    fn read_text(
        &self,
        op: &'static str,
        key: c_int,
        entry: impl FnOnce(&TrainingApi) -> TextGetter,
    ) -> TrainResult<String> {
        let allocator = self.engine.allocator()?;
        let mut out = ptr::null_mut();
        self.engine.call(op, |api| unsafe {
            (entry(api))(self.raw(), key, allocator.as_ptr(), &mut out)
        })?;
        // Dropping the buffer hands it back to the allocator that produced it.
        let text = unsafe { allocator.adopt_str(out) }.ok_or_else(|| TrainError::protocol(op, "null"))?;
        Ok(text.to_string_lossy())
    }

    /// Install the error and evaluation callbacks.
    ///
    /// Happens once per store; later calls return the original token without
    /// touching the engine.
    pub fn register_callbacks(&mut self) -> TrainResult<CorrelationToken> {
        if let Some((token, _)) = &self.correlation {
            debug!(%token, "callbacks already registered");
            return Ok(*token);
        }

        let token = CorrelationToken::generate();
        let c_token = token.to_c_string();
        let user_data = self.dispatch.as_ptr() as *mut c_void;
        self.engine.call("setup_callbacks", |api| unsafe {
            (api.setup_callbacks)(
                self.raw(),
                trampoline::error_function,
                trampoline::evaluation_function,
                c_token.as_ptr(),
                user_data,
            )
        })?;
        self.dispatch().mark_callbacks_registered(token);
        self.correlation = Some((token, c_token));
        info!(%token, "registered callbacks");
        Ok(token)
    }

    /// Install the training/testing batch callbacks for `feed_names`.
    ///
    /// Must follow [`register_callbacks`](Self::register_callbacks).
    /// Calling it again replaces the feed list; the engine keeps pointing at
    /// the same callbacks and context.
    pub fn register_data_feeds<I, S>(&mut self, feed_names: I) -> TrainResult<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if self.correlation.is_none() {
            contract_violation("register_data_feeds called before register_callbacks");
        }

        let delimiter = self.cfg.feed_delimiter;
        let names: Vec<String> = feed_names.into_iter().map(|name| name.as_ref().to_owned()).collect();
        if names.is_empty() {
            return Err(TrainError::invalid("at least one feed name is required"));
        }
        if let Some(bad) = names.iter().find(|name| name.is_empty() || name.contains(delimiter)) {
            return Err(TrainError::invalid(format!(
                "feed name {bad:?} is empty or contains the delimiter {delimiter:?}"
            )));
        }
        let separator = delimiter.to_string();
        let joined = CString::new(names.join(separator.as_str()))
            .map_err(|_| TrainError::invalid("feed names contain a nul byte"))?;

        let user_data = self.dispatch.as_ptr() as *mut c_void;
        self.engine.call("setup_data_feeds", |api| unsafe {
            (api.setup_data_feeds)(
                self.raw(),
                trampoline::training_batch,
                trampoline::testing_batch,
                joined.as_ptr(),
                user_data,
            )
        })?;
        self.dispatch().mark_feeds_registered();
        self.feed_names = Some(joined);
        info!(feeds = names.len(), "registered data feeds");
        Ok(())
    }

    /// Token passed with the callbacks, once they are registered.
    pub fn correlation(&self) -> Option<CorrelationToken> {
        self.correlation.as_ref().map(|(token, _)| *token)
    }

    /// Whether [`register_callbacks`](Self::register_callbacks) succeeded.
    pub fn callbacks_registered(&self) -> bool {
        self.correlation.is_some()
    }

    /// Whether [`register_data_feeds`](Self::register_data_feeds) succeeded.
    pub fn data_feeds_registered(&self) -> bool {
        self.feed_names.is_some()
    }

    /// Current phase of one callback slot.
    pub fn slot_phase(&self, slot: SlotKind) -> SlotPhase {
        self.dispatch().phase(slot)
    }

    /// Add an observer supplying values for training batches.
    pub fn on_training_batch(
        &self,
        observer: impl FnMut(&BatchRequest<'_>) -> ObserverResult<Vec<NamedTensor>> + 'static,
    ) {
        self.dispatch()
            .add_batch_observer(SlotKind::TrainingBatch, Box::new(observer));
    }

    /// Add an observer supplying values for testing batches.
    pub fn on_testing_batch(
        &self,
        observer: impl FnMut(&BatchRequest<'_>) -> ObserverResult<Vec<NamedTensor>> + 'static,
    ) {
        self.dispatch()
            .add_batch_observer(SlotKind::TestingBatch, Box::new(observer));
    }

    /// Add an observer for the engine's per-step error values.
    pub fn on_error(&self, observer: impl FnMut(&ErrorReport) -> ObserverResult<()> + 'static) {
        self.dispatch().add_error_observer(Box::new(observer));
    }

    /// Add an observer for evaluation ticks.
    pub fn on_evaluation(&self, observer: impl FnMut(EvaluationTick) -> ObserverResult<()> + 'static) {
        self.dispatch().add_evaluation_observer(Box::new(observer));
    }

    /// Model inputs reported by `initialize`, in declaration order.
    pub fn expected_inputs(&self) -> Ref<'_, [NamedTensorDescriptor]> {
        Ref::map(self.dispatch().expected_inputs().borrow(), Vec::as_slice)
    }

    /// Model outputs reported by `initialize`, in declaration order.
    pub fn expected_outputs(&self) -> Ref<'_, [NamedTensorDescriptor]> {
        Ref::map(self.dispatch().expected_outputs().borrow(), Vec::as_slice)
    }

    pub(crate) fn set_expected(
        &self,
        inputs: Vec<NamedTensorDescriptor>,
        outputs: Vec<NamedTensorDescriptor>,
    ) {
        *self.dispatch().expected_inputs().borrow_mut() = inputs;
        *self.dispatch().expected_outputs().borrow_mut() = outputs;
    }

    /// Failures caught at the callback boundary since the last call.
    pub fn take_diagnostics(&self) -> Vec<Diagnostic> {
        self.dispatch().take_diagnostics()
    }

    /// Diagnostics discarded because too many were waiting to be taken.
    pub fn dropped_diagnostics(&self) -> usize {
        self.dispatch().dropped_diagnostics()
    }

    /// Entries waiting on the cleanup ledgers.
    pub fn pending_cleanup(&self) -> usize {
        self.dispatch().pending()
    }

    pub(crate) fn flush_pending(&self) -> usize {
        self.dispatch().flush_all()
    }
}

type TextGetter =
    unsafe extern "C" fn(*mut RawParameters, c_int, *mut RawAllocator, *mut *mut c_char) -> StatusPtr;

impl fmt::Debug for ParameterStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParameterStore")
            .field("handle", &self.handle)
            .field("correlation", &self.correlation())
            .field("data_feeds", &self.data_feeds_registered())
            .finish()
    }
}

impl Drop for ParameterStore {
    fn drop(&mut self) {
        let released = self.flush_pending();
        debug!(released, "flushed cleanup ledgers");
        unsafe { (self.engine.api().release_parameters)(self.raw()) };
        // SAFETY: the parameter set, the only holder of `user_data`, is gone.
        drop(unsafe { Box::from_raw(self.dispatch.as_ptr()) });
        info!(handle = ?self.handle, "released parameter set");
    }
}
