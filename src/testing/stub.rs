//! In-process engine implementing the whole [`TrainingApi`] table.
//!
//! State is thread-local so tests can run in parallel; call [`reset`] at the
//! start of each test. A scripted `run_training` drives the registered
//! callbacks synchronously, the way a real engine does.

use std::alloc::{self, Layout};
use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::ptr;
use std::slice;

use crate::api::ffi::{
    BatchCallback, ErrorCallback, EvaluationCallback, RawAllocator, RawEnvironment, RawParameters,
    RawStatus, RawValue, RawValueCollection, StatusPtr, TrainingApi, API_VERSION,
};
use crate::boundary::{Engine, EngineHandle};
use crate::values::ValueRef;

const DEFAULT_CAPACITY: usize = 16;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Counters {
    pub statuses_created: usize,
    pub statuses_released: usize,
    pub live_allocations: usize,
    pub live_values: usize,
    pub collections_created: usize,
    pub collections_released: usize,
    pub live_parameters: usize,
}

/// One step of a scripted `run_training`.
#[derive(Clone, Debug)]
pub enum Step {
    TrainingBatch(usize),
    TestingBatch(usize),
    /// Error values as named 1-D `f32` arrays.
    Error(Vec<(String, Vec<f32>)>),
    Evaluation { num_samples: usize, step: usize },
    Fail(i32, String),
}

/// An entry the engine found in a batch destination after the callback.
#[derive(Clone, Debug, PartialEq)]
pub struct DeliveredEntry {
    pub index: usize,
    pub name: String,
    pub element_type: c_int,
    pub shape: Vec<i64>,
    pub bytes: Vec<u8>,
}

impl DeliveredEntry {
    pub fn as_f32(&self) -> Vec<f32> {
        self.bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    }
}

#[derive(Clone, Debug)]
pub struct DeliveredBatch {
    pub training: bool,
    pub batch_size: usize,
    pub entries: Vec<DeliveredEntry>,
}

#[derive(Default)]
struct State {
    counters: Counters,
    allocations: HashMap<usize, Layout>,
    model_inputs: Vec<(String, Vec<i64>)>,
    model_outputs: Vec<(String, Vec<i64>)>,
    script: Vec<Step>,
    delivered: Vec<DeliveredBatch>,
    failures: HashMap<&'static str, (i32, String)>,
    optimizer_override: Option<c_int>,
    loss_override: Option<c_int>,
    float_text_override: Option<String>,
    feed_names: Option<String>,
    correlation: Option<String>,
    callback_setups: usize,
}

thread_local! {
    static STATE: RefCell<State> = RefCell::new(State::default());
}

fn with<R>(f: impl FnOnce(&mut State) -> R) -> R {
    STATE.with(|state| f(&mut state.borrow_mut()))
}

pub fn reset() {
    with(|state| *state = State::default());
}

pub fn engine() -> Engine {
    Engine::new(&STUB_API).unwrap()
}

/// A table reporting an ABI version this crate does not speak.
pub fn mismatched_api() -> &'static TrainingApi {
    &MISMATCHED_API
}

pub fn environment() -> EngineHandle {
    unsafe { EngineHandle::from_raw(ptr::addr_of!(ENVIRONMENT) as *mut RawEnvironment) }.unwrap()
}

pub fn counters() -> Counters {
    with(|state| state.counters)
}

/// Shapes `initialize_training` reports, in declaration order.
pub fn set_model(inputs: &[(&str, &[i64])], outputs: &[(&str, &[i64])]) {
    let own = |entries: &[(&str, &[i64])]| -> Vec<(String, Vec<i64>)> {
        entries
            .iter()
            .map(|(name, dims)| (name.to_string(), dims.to_vec()))
            .collect()
    };
    with(|state| {
        state.model_inputs = own(inputs);
        state.model_outputs = own(outputs);
    });
}

pub fn script(steps: Vec<Step>) {
    with(|state| state.script = steps);
}

/// Make the next call to `op` fail with `code`.
pub fn fail_on(op: &'static str, code: i32, message: &str) {
    with(|state| {
        state.failures.insert(op, (code, message.to_string()));
    });
}

pub fn override_optimizer_code(code: c_int) {
    with(|state| state.optimizer_override = Some(code));
}

pub fn override_loss_code(code: c_int) {
    with(|state| state.loss_override = Some(code));
}

pub fn override_float_text(text: &str) {
    with(|state| state.float_text_override = Some(text.to_string()));
}

pub fn delivered() -> Vec<DeliveredBatch> {
    with(|state| state.delivered.clone())
}

pub fn registered_feed_names() -> Option<String> {
    with(|state| state.feed_names.clone())
}

pub fn registered_correlation() -> Option<String> {
    with(|state| state.correlation.clone())
}

pub fn callback_setups() -> usize {
    with(|state| state.callback_setups)
}

pub fn failing_status(code: i32, message: &str) -> StatusPtr {
    status(code, message)
}

/// Copy `text` into a buffer from `allocator`.
pub fn alloc_c_string(allocator: *mut RawAllocator, text: &str) -> *mut c_char {
    let bytes = text.as_bytes();
    unsafe {
        let buf = ((*allocator).alloc)(allocator, bytes.len() + 1) as *mut u8;
        if buf.is_null() {
            return ptr::null_mut();
        }
        ptr::copy_nonoverlapping(bytes.as_ptr(), buf, bytes.len());
        *buf.add(bytes.len()) = 0;
        buf as *mut c_char
    }
}

pub fn value_aliases_caller_memory(value: ValueRef<'_>) -> bool {
    unsafe { (*(value.as_ptr() as *const StubValue)).aliases }
}

/// A zero-filled value with an arbitrary element code, as another producer
/// would hand it over.
pub fn foreign_value_with_type(element_type: c_int, dims: &[i64]) -> *mut RawValue {
    let count: i64 = dims.iter().product();
    let bytes = count.max(0) as usize * element_size(element_type).unwrap_or(8);
    let value = StubValue::engine_owned(element_type, dims.to_vec(), vec![0; bytes]);
    with(|state| state.counters.live_values += 1);
    Box::into_raw(Box::new(StubValue { counted: true, ..value })) as *mut RawValue
}

/// # Safety
/// `value` must come from [`foreign_value_with_type`].
pub unsafe fn release_foreign_value(value: *mut RawValue) {
    release_value(value)
}

/// A collection owned by the engine side, as handed to callbacks.
pub fn foreign_collection(capacity: usize) -> *mut RawValueCollection {
    Box::into_raw(Box::new(StubCollection::new(capacity))) as *mut RawValueCollection
}

/// # Safety
/// `collection` must come from [`foreign_collection`].
pub unsafe fn release_foreign_collection(collection: *mut RawValueCollection) {
    free_collection(collection)
}

static ENVIRONMENT: u8 = 0;

struct StubStatus {
    code: c_int,
    message: CString,
}

struct StubValue {
    element_type: c_int,
    dims: Vec<i64>,
    data: *mut c_void,
    // Backing memory for values the engine allocated; u64 keeps it aligned.
    _storage: Vec<u64>,
    aliases: bool,
    counted: bool,
}

impl StubValue {
    fn engine_owned(element_type: c_int, dims: Vec<i64>, bytes: Vec<u8>) -> Self {
        let mut storage = vec![0u64; (bytes.len() + 7) / 8];
        unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), storage.as_mut_ptr() as *mut u8, bytes.len()) };
        let data = if bytes.is_empty() {
            ptr::null_mut()
        } else {
            storage.as_mut_ptr() as *mut c_void
        };
        Self {
            element_type,
            dims,
            data,
            _storage: storage,
            aliases: false,
            counted: false,
        }
    }

    fn byte_len(&self) -> usize {
        let count: i64 = self.dims.iter().product();
        count.max(0) as usize * element_size(self.element_type).unwrap_or(0)
    }

    fn bytes(&self) -> Vec<u8> {
        if self.data.is_null() {
            return Vec::new();
        }
        unsafe { slice::from_raw_parts(self.data as *const u8, self.byte_len()) }.to_vec()
    }
}

struct Entry {
    value: *const StubValue,
    name: CString,
}

struct StubCollection {
    capacity: usize,
    entries: Vec<Entry>,
    // Values the engine created for this collection and frees with it.
    owned: Vec<*mut StubValue>,
}

impl StubCollection {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Vec::new(),
            owned: Vec::new(),
        }
    }

    fn push_owned(&mut self, name: &str, value: StubValue) {
        let value = Box::into_raw(Box::new(value));
        self.owned.push(value);
        self.entries.push(Entry {
            value,
            name: CString::new(name).unwrap_or_default(),
        });
    }
}

#[derive(Default)]
struct StubParams {
    strings: HashMap<c_int, CString>,
    bools: HashMap<c_int, bool>,
    ints: HashMap<c_int, i64>,
    doubles: HashMap<c_int, f64>,
    optimizer: c_int,
    loss: c_int,
    callbacks: Option<(ErrorCallback, EvaluationCallback, *mut c_void)>,
    feeds: Option<(BatchCallback, BatchCallback, *mut c_void)>,
    initialized: bool,
}

fn element_size(code: c_int) -> Option<usize> {
    match code {
        1 | 6 => Some(4),
        2 => Some(1),
        7 | 11 => Some(8),
        _ => None,
    }
}

fn status(code: i32, message: &str) -> StatusPtr {
    with(|state| state.counters.statuses_created += 1);
    let status = StubStatus {
        code,
        message: CString::new(message).unwrap_or_default(),
    };
    Box::into_raw(Box::new(status)) as StatusPtr
}

fn scripted_failure(op: &'static str) -> Option<StatusPtr> {
    with(|state| state.failures.remove(op)).map(|(code, message)| status(code, &message))
}

unsafe fn params<'a>(raw: *mut RawParameters) -> &'a mut StubParams {
    &mut *(raw as *mut StubParams)
}

unsafe fn collection<'a>(raw: *const RawValueCollection) -> &'a StubCollection {
    &*(raw as *const StubCollection)
}

unsafe fn value<'a>(raw: *const RawValue) -> &'a StubValue {
    &*(raw as *const StubValue)
}

unsafe fn free_collection(raw: *mut RawValueCollection) {
    let collection = Box::from_raw(raw as *mut StubCollection);
    for value in collection.owned {
        drop(Box::from_raw(value));
    }
}

unsafe extern "C" fn status_code(status: *const RawStatus) -> c_int {
    (*(status as *const StubStatus)).code
}

unsafe extern "C" fn status_message(status: *const RawStatus) -> *const c_char {
    (*(status as *const StubStatus)).message.as_ptr()
}

unsafe extern "C" fn release_status(status: StatusPtr) {
    if status.is_null() {
        return;
    }
    drop(Box::from_raw(status as *mut StubStatus));
    with(|state| state.counters.statuses_released += 1);
}

static STUB_ALLOCATOR: RawAllocator = RawAllocator {
    alloc: stub_alloc,
    free: stub_free,
};

unsafe extern "C" fn stub_alloc(_this: *mut RawAllocator, size: usize) -> *mut c_void {
    let Ok(layout) = Layout::from_size_align(size.max(1), 8) else {
        return ptr::null_mut();
    };
    let buf = alloc::alloc(layout);
    if !buf.is_null() {
        with(|state| {
            state.allocations.insert(buf as usize, layout);
            state.counters.live_allocations += 1;
        });
    }
    buf as *mut c_void
}

unsafe extern "C" fn stub_free(_this: *mut RawAllocator, buf: *mut c_void) {
    if buf.is_null() {
        return;
    }
    // Buffers from before the last reset are leaked rather than freed twice.
    let layout = with(|state| {
        let layout = state.allocations.remove(&(buf as usize));
        if layout.is_some() {
            state.counters.live_allocations -= 1;
        }
        layout
    });
    if let Some(layout) = layout {
        alloc::dealloc(buf as *mut u8, layout);
    }
}

unsafe extern "C" fn default_allocator(out: *mut *mut RawAllocator) -> StatusPtr {
    if let Some(status) = scripted_failure("default_allocator") {
        return status;
    }
    *out = ptr::addr_of!(STUB_ALLOCATOR) as *mut RawAllocator;
    ptr::null_mut()
}

unsafe extern "C" fn create_parameters(out: *mut *mut RawParameters) -> StatusPtr {
    if let Some(status) = scripted_failure("create_parameters") {
        return status;
    }
    with(|state| state.counters.live_parameters += 1);
    *out = Box::into_raw(Box::<StubParams>::default()) as *mut RawParameters;
    ptr::null_mut()
}

unsafe extern "C" fn release_parameters(raw: *mut RawParameters) {
    if raw.is_null() {
        return;
    }
    drop(Box::from_raw(raw as *mut StubParams));
    with(|state| state.counters.live_parameters = state.counters.live_parameters.saturating_sub(1));
}

unsafe extern "C" fn set_parameter_string(raw: *mut RawParameters, key: c_int, value: *const c_char) -> StatusPtr {
    if value.is_null() {
        return status(3, "null string value");
    }
    params(raw).strings.insert(key, CStr::from_ptr(value).to_owned());
    ptr::null_mut()
}

unsafe extern "C" fn get_parameter_string(
    raw: *mut RawParameters,
    key: c_int,
    allocator: *mut RawAllocator,
    out: *mut *mut c_char,
) -> StatusPtr {
    let text = params(raw)
        .strings
        .get(&key)
        .map(|value| value.to_string_lossy().into_owned())
        .unwrap_or_default();
    *out = alloc_c_string(allocator, &text);
    ptr::null_mut()
}

unsafe extern "C" fn set_parameter_bool(raw: *mut RawParameters, key: c_int, value: bool) -> StatusPtr {
    params(raw).bools.insert(key, value);
    ptr::null_mut()
}

unsafe extern "C" fn get_parameter_bool(raw: *mut RawParameters, key: c_int, out: *mut bool) -> StatusPtr {
    *out = params(raw).bools.get(&key).copied().unwrap_or(false);
    ptr::null_mut()
}

unsafe extern "C" fn set_parameter_int(raw: *mut RawParameters, key: c_int, value: i64) -> StatusPtr {
    if value < 0 {
        return status(3, "integer parameters must be non-negative");
    }
    params(raw).ints.insert(key, value);
    ptr::null_mut()
}

unsafe extern "C" fn get_parameter_int(raw: *mut RawParameters, key: c_int, out: *mut i64) -> StatusPtr {
    *out = params(raw).ints.get(&key).copied().unwrap_or(0);
    ptr::null_mut()
}

unsafe extern "C" fn set_parameter_double(raw: *mut RawParameters, key: c_int, value: f64) -> StatusPtr {
    if !value.is_finite() || value < 0.0 {
        return status(3, "learning rate must be finite and non-negative");
    }
    params(raw).doubles.insert(key, value);
    ptr::null_mut()
}

unsafe extern "C" fn get_parameter_double(
    raw: *mut RawParameters,
    key: c_int,
    allocator: *mut RawAllocator,
    out: *mut *mut c_char,
) -> StatusPtr {
    let stored = params(raw).doubles.get(&key).copied().unwrap_or(0.0);
    let text = with(|state| state.float_text_override.clone()).unwrap_or_else(|| stored.to_string());
    *out = alloc_c_string(allocator, &text);
    ptr::null_mut()
}

unsafe extern "C" fn set_optimizer(raw: *mut RawParameters, kind: c_int) -> StatusPtr {
    if !(0..=2).contains(&kind) {
        return status(3, "unknown optimizer");
    }
    params(raw).optimizer = kind;
    ptr::null_mut()
}

unsafe extern "C" fn get_optimizer(raw: *mut RawParameters, out: *mut c_int) -> StatusPtr {
    *out = with(|state| state.optimizer_override).unwrap_or(params(raw).optimizer);
    ptr::null_mut()
}

unsafe extern "C" fn set_loss_function(raw: *mut RawParameters, kind: c_int) -> StatusPtr {
    if !(0..=1).contains(&kind) {
        return status(3, "unknown loss function");
    }
    params(raw).loss = kind;
    ptr::null_mut()
}

unsafe extern "C" fn get_loss_function(raw: *mut RawParameters, out: *mut c_int) -> StatusPtr {
    *out = with(|state| state.loss_override).unwrap_or(params(raw).loss);
    ptr::null_mut()
}

unsafe extern "C" fn setup_callbacks(
    raw: *mut RawParameters,
    error: ErrorCallback,
    evaluation: EvaluationCallback,
    correlation: *const c_char,
    user_data: *mut c_void,
) -> StatusPtr {
    if let Some(status) = scripted_failure("setup_callbacks") {
        return status;
    }
    let correlation = (!correlation.is_null()).then(|| CStr::from_ptr(correlation).to_string_lossy().into_owned());
    params(raw).callbacks = Some((error, evaluation, user_data));
    with(|state| {
        state.correlation = correlation;
        state.callback_setups += 1;
    });
    ptr::null_mut()
}

unsafe extern "C" fn setup_data_feeds(
    raw: *mut RawParameters,
    training: BatchCallback,
    testing: BatchCallback,
    feed_names: *const c_char,
    user_data: *mut c_void,
) -> StatusPtr {
    if let Some(status) = scripted_failure("setup_data_feeds") {
        return status;
    }
    if feed_names.is_null() {
        return status(3, "null feed names");
    }
    let names = CStr::from_ptr(feed_names).to_string_lossy().into_owned();
    params(raw).feeds = Some((training, testing, user_data));
    with(|state| state.feed_names = Some(names));
    ptr::null_mut()
}

unsafe extern "C" fn create_value_collection(out: *mut *mut RawValueCollection) -> StatusPtr {
    if let Some(status) = scripted_failure("create_value_collection") {
        return status;
    }
    with(|state| state.counters.collections_created += 1);
    *out = Box::into_raw(Box::new(StubCollection::new(DEFAULT_CAPACITY))) as *mut RawValueCollection;
    ptr::null_mut()
}

unsafe extern "C" fn release_value_collection(raw: *mut RawValueCollection) {
    if raw.is_null() {
        return;
    }
    free_collection(raw);
    with(|state| state.counters.collections_released += 1);
}

unsafe extern "C" fn value_collection_count(raw: *const RawValueCollection, out: *mut usize) -> StatusPtr {
    *out = collection(raw).entries.len();
    ptr::null_mut()
}

unsafe extern "C" fn value_collection_capacity(raw: *const RawValueCollection, out: *mut usize) -> StatusPtr {
    *out = collection(raw).capacity;
    ptr::null_mut()
}

unsafe extern "C" fn value_collection_get_at(
    raw: *const RawValueCollection,
    index: usize,
    allocator: *mut RawAllocator,
    out_value: *mut *const RawValue,
    out_name: *mut *mut c_char,
) -> StatusPtr {
    let Some(entry) = collection(raw).entries.get(index) else {
        return status(2, &format!("index {index} out of range"));
    };
    *out_value = entry.value as *const RawValue;
    *out_name = alloc_c_string(allocator, &entry.name.to_string_lossy());
    ptr::null_mut()
}

unsafe extern "C" fn value_collection_set_at(
    raw: *mut RawValueCollection,
    index: usize,
    value: *const RawValue,
    name: *const c_char,
) -> StatusPtr {
    let collection = &mut *(raw as *mut StubCollection);
    if index >= collection.capacity || index > collection.entries.len() {
        return status(2, &format!("index {index} out of range"));
    }
    if value.is_null() || name.is_null() {
        return status(3, "null value or name");
    }
    let entry = Entry {
        value: value as *const StubValue,
        name: CStr::from_ptr(name).to_owned(),
    };
    if index == collection.entries.len() {
        collection.entries.push(entry);
    } else {
        collection.entries[index] = entry;
    }
    ptr::null_mut()
}

unsafe extern "C" fn create_tensor(
    data: *mut c_void,
    byte_len: usize,
    shape: *const i64,
    rank: usize,
    element_type: c_int,
    out: *mut *mut RawValue,
) -> StatusPtr {
    let Some(size) = element_size(element_type) else {
        return status(3, &format!("unknown element type {element_type}"));
    };
    let dims = if rank == 0 {
        Vec::new()
    } else {
        slice::from_raw_parts(shape, rank).to_vec()
    };
    if dims.iter().any(|&dim| dim < 0) {
        return status(3, "negative dimension");
    }
    let count = dims.iter().product::<i64>() as usize;

    let value = if data.is_null() {
        if count != 0 {
            return status(3, "null data for a non-empty tensor");
        }
        StubValue::engine_owned(element_type, dims, Vec::new())
    } else {
        if byte_len != count * size {
            return status(3, &format!("expected {} bytes, got {byte_len}", count * size));
        }
        StubValue {
            element_type,
            dims,
            data,
            _storage: Vec::new(),
            aliases: true,
            counted: false,
        }
    };
    with(|state| state.counters.live_values += 1);
    *out = Box::into_raw(Box::new(StubValue { counted: true, ..value })) as *mut RawValue;
    ptr::null_mut()
}

unsafe extern "C" fn tensor_element_type(raw: *const RawValue, out: *mut c_int) -> StatusPtr {
    *out = value(raw).element_type;
    ptr::null_mut()
}

unsafe extern "C" fn tensor_rank(raw: *const RawValue, out: *mut usize) -> StatusPtr {
    *out = value(raw).dims.len();
    ptr::null_mut()
}

unsafe extern "C" fn tensor_dimensions(raw: *const RawValue, out: *mut i64, rank: usize) -> StatusPtr {
    let dims = &value(raw).dims;
    if dims.len() != rank {
        return status(3, "rank mismatch");
    }
    ptr::copy_nonoverlapping(dims.as_ptr(), out, rank);
    ptr::null_mut()
}

unsafe extern "C" fn tensor_data(raw: *const RawValue, out: *mut *const c_void) -> StatusPtr {
    *out = value(raw).data;
    ptr::null_mut()
}

unsafe extern "C" fn release_value(raw: *mut RawValue) {
    if raw.is_null() {
        return;
    }
    let value = Box::from_raw(raw as *mut StubValue);
    if value.counted {
        with(|state| state.counters.live_values = state.counters.live_values.saturating_sub(1));
    }
}

unsafe extern "C" fn initialize_training(
    env: *mut RawEnvironment,
    raw: *mut RawParameters,
    expected_inputs: *mut RawValueCollection,
    expected_outputs: *mut RawValueCollection,
) -> StatusPtr {
    if let Some(status) = scripted_failure("initialize_training") {
        return status;
    }
    if env.is_null() || expected_inputs.is_null() || expected_outputs.is_null() {
        return status(3, "null argument");
    }
    let (inputs, outputs) = with(|state| (state.model_inputs.clone(), state.model_outputs.clone()));
    for (target, entries) in [(expected_inputs, inputs), (expected_outputs, outputs)] {
        let target = &mut *(target as *mut StubCollection);
        for (name, dims) in entries {
            let bytes = dims.iter().flat_map(|dim| dim.to_ne_bytes()).collect();
            target.push_owned(&name, StubValue::engine_owned(7, vec![dims.len() as i64], bytes));
        }
    }
    params(raw).initialized = true;
    ptr::null_mut()
}

unsafe extern "C" fn run_training(raw: *mut RawParameters) -> StatusPtr {
    if let Some(status) = scripted_failure("run_training") {
        return status;
    }
    if !params(raw).initialized {
        return status(4, "training not initialized");
    }
    let steps = with(|state| state.script.clone());
    for step in steps {
        // Copy the registrations out; callbacks may re-enter the table.
        let callbacks = params(raw).callbacks;
        let feeds = params(raw).feeds;
        match step {
            Step::TrainingBatch(batch_size) | Step::TestingBatch(batch_size) => {
                let Some((training, testing, user_data)) = feeds else {
                    return status(5, "data feeds not registered");
                };
                let is_training = matches!(step, Step::TrainingBatch(_));
                let callback = if is_training { training } else { testing };
                let entries = request_batch(callback, user_data, batch_size);
                with(|state| {
                    state.delivered.push(DeliveredBatch {
                        training: is_training,
                        batch_size,
                        entries,
                    })
                });
            }
            Step::Error(values) => {
                let Some((error, _, user_data)) = callbacks else {
                    return status(5, "callbacks not registered");
                };
                let mut report = StubCollection::new(values.len().max(1));
                for (name, data) in values {
                    let bytes = data.iter().flat_map(|x| x.to_ne_bytes()).collect();
                    report.push_owned(&name, StubValue::engine_owned(1, vec![data.len() as i64], bytes));
                }
                let report = Box::into_raw(Box::new(report)) as *mut RawValueCollection;
                error(user_data, report);
                free_collection(report);
            }
            Step::Evaluation { num_samples, step } => {
                let Some((_, evaluation, user_data)) = callbacks else {
                    return status(5, "callbacks not registered");
                };
                evaluation(user_data, num_samples, step);
            }
            Step::Fail(code, message) => return status(code, &message),
        }
    }
    ptr::null_mut()
}

/// Ask for one batch and copy out whatever the callback wrote, while the
/// caller's memory behind it is still pinned.
unsafe fn request_batch(callback: BatchCallback, user_data: *mut c_void, batch_size: usize) -> Vec<DeliveredEntry> {
    let destination = foreign_collection(DEFAULT_CAPACITY);
    callback(user_data, batch_size, destination);
    let entries = collection(destination)
        .entries
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            let value = &*entry.value;
            DeliveredEntry {
                index,
                name: entry.name.to_string_lossy().into_owned(),
                element_type: value.element_type,
                shape: value.dims.clone(),
                bytes: value.bytes(),
            }
        })
        .collect();
    free_collection(destination);
    entries
}

unsafe extern "C" fn end_training(raw: *mut RawParameters) -> StatusPtr {
    if let Some(status) = scripted_failure("end_training") {
        return status;
    }
    if !params(raw).initialized {
        return status(4, "training not initialized");
    }
    ptr::null_mut()
}

const fn table(version: u32) -> TrainingApi {
    TrainingApi {
        version,
        status_code,
        status_message,
        release_status,
        default_allocator,
        create_parameters,
        release_parameters,
        set_parameter_string,
        get_parameter_string,
        set_parameter_bool,
        get_parameter_bool,
        set_parameter_int,
        get_parameter_int,
        set_parameter_double,
        get_parameter_double,
        set_optimizer,
        get_optimizer,
        set_loss_function,
        get_loss_function,
        setup_callbacks,
        setup_data_feeds,
        create_value_collection,
        release_value_collection,
        value_collection_count,
        value_collection_capacity,
        value_collection_get_at,
        value_collection_set_at,
        create_tensor,
        tensor_element_type,
        tensor_rank,
        tensor_dimensions,
        tensor_data,
        release_value,
        initialize_training,
        run_training,
        end_training,
    }
}

static STUB_API: TrainingApi = table(API_VERSION);
static MISMATCHED_API: TrainingApi = table(API_VERSION + 1);
