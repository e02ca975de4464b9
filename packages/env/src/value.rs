//! The Value type - what lives in a global slot.
//!
//! Guest code and the host exchange data through these values: plain data,
//! callable functions, shared objects, and deferred results.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::error::Thrown;

/// Result of calling a guest or native function.
pub type CallResult = std::result::Result<Value, Thrown>;

/// Signature of the closure backing a [`Function`].
pub type NativeFn = dyn Fn(&[Value]) -> CallResult;

/// A dynamically-typed value stored on a global object.
///
/// # Design Notes
///
/// - `Function`, `Object` and `Promise` compare by identity, like references
/// - `Object` is a shared mutable map, so a guest can hand one to the host
///   and both observe later writes
/// - `Number` is `f64` to match the host scripting model
#[derive(Clone, Default)]
pub enum Value {
    /// Absence of a value (reading a slot that does not exist).
    #[default]
    Undefined,
    /// Explicit null.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Numeric value.
    Number(f64),
    /// UTF-8 string.
    String(String),
    /// Callable.
    Function(Function),
    /// Shared key-value object.
    Object(Object),
    /// Deferred result.
    Promise(Promise),
}

impl Value {
    /// Check if this value is undefined.
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Check if this value is null or undefined.
    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    /// Get the function if this value is callable.
    pub fn as_function(&self) -> Option<&Function> {
        match self {
            Value::Function(f) => Some(f),
            _ => None,
        }
    }

    /// Get the object if this value is one.
    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Get the string slice if this value is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get the promise if this value is deferred.
    pub fn as_promise(&self) -> Option<&Promise> {
        match self {
            Value::Promise(p) => Some(p),
            _ => None,
        }
    }

    /// Truthiness following the scripting model.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::Function(_) | Value::Object(_) | Value::Promise(_) => true,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::Promise(a), Value::Promise(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Function(func) => write!(f, "[function {}]", func.name()),
            Value::Object(o) => write!(f, "[object {:?}]", o.keys()),
            Value::Promise(p) => write!(f, "[promise settled={}]", p.is_settled()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<Function> for Value {
    fn from(f: Function) -> Self {
        Value::Function(f)
    }
}

impl From<Object> for Value {
    fn from(o: Object) -> Self {
        Value::Object(o)
    }
}

impl From<Promise> for Value {
    fn from(p: Promise) -> Self {
        Value::Promise(p)
    }
}

struct FunctionInner {
    name: String,
    constructor: bool,
    receiver: Option<String>,
    call: Rc<NativeFn>,
}

/// A callable value.
///
/// Cloning a `Function` yields the same function (identity is shared).
/// [`Function::bind`] yields a new function with its own identity that
/// calls the same underlying closure.
#[derive(Clone)]
pub struct Function {
    inner: Rc<FunctionInner>,
}

impl Function {
    /// Create a plain function.
    pub fn new(name: impl Into<String>, call: impl Fn(&[Value]) -> CallResult + 'static) -> Self {
        Self {
            inner: Rc::new(FunctionInner {
                name: name.into(),
                constructor: false,
                receiver: None,
                call: Rc::new(call),
            }),
        }
    }

    /// Create a constructor function. Constructors are never rebound.
    pub fn constructor(
        name: impl Into<String>,
        call: impl Fn(&[Value]) -> CallResult + 'static,
    ) -> Self {
        Self {
            inner: Rc::new(FunctionInner {
                name: name.into(),
                constructor: true,
                receiver: None,
                call: Rc::new(call),
            }),
        }
    }

    /// Invoke the function.
    pub fn call(&self, args: &[Value]) -> CallResult {
        (self.inner.call)(args)
    }

    /// The function's name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Whether this function is a constructor.
    pub fn is_constructor(&self) -> bool {
        self.inner.constructor
    }

    /// The receiver this function was bound to, if any.
    pub fn receiver(&self) -> Option<&str> {
        self.inner.receiver.as_deref()
    }

    /// Whether this function is already bound to a receiver.
    pub fn is_bound(&self) -> bool {
        self.inner.receiver.is_some()
    }

    /// Create a copy of this function bound to `receiver`.
    pub fn bind(&self, receiver: &str) -> Function {
        Function {
            inner: Rc::new(FunctionInner {
                name: format!("bound {}", self.inner.name),
                constructor: false,
                receiver: Some(receiver.to_string()),
                call: Rc::clone(&self.inner.call),
            }),
        }
    }

    /// Identity comparison.
    pub fn ptr_eq(&self, other: &Function) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Stable identity key for caches.
    pub fn identity(&self) -> usize {
        Rc::as_ptr(&self.inner) as *const () as usize
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Function({})", self.inner.name)
    }
}

/// A shared, mutable key-value object.
#[derive(Clone, Default)]
pub struct Object {
    inner: Rc<RefCell<BTreeMap<String, Value>>>,
}

impl Object {
    /// Create an empty object.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an object from key-value pairs.
    pub fn from_map(map: BTreeMap<String, Value>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(map)),
        }
    }

    /// Read a field.
    pub fn get(&self, key: &str) -> Value {
        self.inner.borrow().get(key).cloned().unwrap_or_default()
    }

    /// Write a field.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.inner.borrow_mut().insert(key.into(), value.into());
    }

    /// Remove a field, returning the old value.
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.inner.borrow_mut().remove(key)
    }

    /// Whether the object has a field.
    pub fn contains(&self, key: &str) -> bool {
        self.inner.borrow().contains_key(key)
    }

    /// Field names in order.
    pub fn keys(&self) -> Vec<String> {
        self.inner.borrow().keys().cloned().collect()
    }

    /// Snapshot of the fields.
    pub fn to_map(&self) -> BTreeMap<String, Value> {
        self.inner.borrow().clone()
    }

    /// Merge `fields` into this object, later writers win.
    pub fn merge(&self, fields: &BTreeMap<String, Value>) {
        let mut map = self.inner.borrow_mut();
        for (k, v) in fields {
            map.insert(k.clone(), v.clone());
        }
    }

    /// Call the function stored at `key`.
    ///
    /// Returns `Ok(None)` when the field is not a function.
    pub fn call_method(&self, key: &str, args: &[Value]) -> std::result::Result<Option<Value>, Thrown> {
        match self.get(key) {
            Value::Function(f) => f.call(args).map(Some),
            _ => Ok(None),
        }
    }

    /// Identity comparison.
    pub fn ptr_eq(&self, other: &Object) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

type SettleCallback = Box<dyn FnOnce(&std::result::Result<Value, Value>)>;

enum PromiseState {
    Pending(Vec<SettleCallback>),
    Settled(std::result::Result<Value, Value>),
}

/// A deferred value that settles once.
///
/// Callbacks registered before settlement run at settlement, in
/// registration order; callbacks registered afterwards run immediately.
#[derive(Clone)]
pub struct Promise {
    state: Rc<RefCell<PromiseState>>,
}

/// The settling half of a [`Promise`].
#[derive(Clone)]
pub struct Resolver {
    promise: Promise,
}

impl Promise {
    /// Create a pending promise and its resolver.
    pub fn pending() -> (Promise, Resolver) {
        let promise = Promise {
            state: Rc::new(RefCell::new(PromiseState::Pending(Vec::new()))),
        };
        let resolver = Resolver {
            promise: promise.clone(),
        };
        (promise, resolver)
    }

    /// Create an already-fulfilled promise.
    pub fn resolved(value: Value) -> Promise {
        Promise {
            state: Rc::new(RefCell::new(PromiseState::Settled(Ok(value)))),
        }
    }

    /// Create an already-rejected promise.
    pub fn rejected(reason: Value) -> Promise {
        Promise {
            state: Rc::new(RefCell::new(PromiseState::Settled(Err(reason)))),
        }
    }

    /// Whether the promise has settled.
    pub fn is_settled(&self) -> bool {
        matches!(&*self.state.borrow(), PromiseState::Settled(_))
    }

    /// The settled outcome, if any.
    pub fn outcome(&self) -> Option<std::result::Result<Value, Value>> {
        match &*self.state.borrow() {
            PromiseState::Settled(r) => Some(r.clone()),
            PromiseState::Pending(_) => None,
        }
    }

    /// Register a callback for settlement.
    pub fn on_settle(&self, callback: impl FnOnce(&std::result::Result<Value, Value>) + 'static) {
        let settled = {
            let mut state = self.state.borrow_mut();
            match &mut *state {
                PromiseState::Pending(callbacks) => {
                    callbacks.push(Box::new(callback));
                    return;
                }
                PromiseState::Settled(r) => r.clone(),
            }
        };
        callback(&settled);
    }

    fn settle(&self, outcome: std::result::Result<Value, Value>) -> bool {
        let callbacks = {
            let mut state = self.state.borrow_mut();
            match &mut *state {
                PromiseState::Settled(_) => return false,
                PromiseState::Pending(callbacks) => {
                    let callbacks = std::mem::take(callbacks);
                    *state = PromiseState::Settled(outcome.clone());
                    callbacks
                }
            }
        };
        for callback in callbacks {
            callback(&outcome);
        }
        true
    }

    /// Identity comparison.
    pub fn ptr_eq(&self, other: &Promise) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }
}

impl Resolver {
    /// Fulfill the promise. Returns false if it had already settled.
    pub fn resolve(&self, value: impl Into<Value>) -> bool {
        self.promise.settle(Ok(value.into()))
    }

    /// Reject the promise. Returns false if it had already settled.
    pub fn reject(&self, reason: impl Into<Value>) -> bool {
        self.promise.settle(Err(reason.into()))
    }

    /// The promise this resolver settles.
    pub fn promise(&self) -> &Promise {
        &self.promise
    }
}
