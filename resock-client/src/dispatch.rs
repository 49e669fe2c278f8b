//! Message handler registry
//!
//! Every decoded inbound message is delivered to every registered handler.
//! The registry is a set: adding the same handler twice registers it once,
//! and delivery order across handlers is unspecified.
//!
//! # Mutation during dispatch
//!
//! `dispatch` takes a snapshot of the registered handlers before delivering,
//! and the lock is released while handlers run. A handler may therefore add or
//! remove handlers (including itself) from inside its own invocation:
//!
//! - a handler added during dispatch of M starts receiving from the next message
//! - a handler removed during dispatch of M still receives M if it was in the snapshot
//! - no other handler is skipped or called twice
//!
//! # Failure isolation
//!
//! A handler that returns an error or panics does not stop delivery to the
//! rest of the snapshot. Failures are collected in the `DispatchReport`.
//!
//! # Examples
//!
//! ```rust
//! use resock_client::DispatchRegistry;
//! use serde_json::json;
//!
//! let registry = DispatchRegistry::new();
//! let id = registry.add_fn(|message| {
//!     println!("result: {message}");
//!     Ok(())
//! });
//!
//! let report = registry.dispatch(&json!({"status": "received"}));
//! assert_eq!(report.delivered, 1);
//!
//! assert!(registry.remove_handler(id));
//! ```

use resock_core::Message;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Error type handlers may return
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Return type of a handler invocation
pub type HandlerResult = Result<(), BoxError>;

/// A consumer of decoded inbound messages
///
/// Handlers run on the client's driver task, so they should return quickly.
/// Long-running work belongs in a spawned task.
pub trait MessageHandler: Send + Sync {
    /// Process one message
    fn handle(&self, message: &Message) -> HandlerResult;
}

impl<F> MessageHandler for F
where
    F: Fn(&Message) -> HandlerResult + Send + Sync,
{
    fn handle(&self, message: &Message) -> HandlerResult {
        self(message)
    }
}

/// Identity of a registered handler
///
/// Ids are never reused within a registry. Registering the same
/// `Arc<dyn MessageHandler>` again while it is still registered returns the
/// id it already has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler#{}", self.0)
    }
}

/// A handler that failed during one dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerFailure {
    /// The failing handler
    pub handler: HandlerId,
    /// Error message or panic payload
    pub error: String,
}

/// Outcome of delivering one message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Handlers that returned `Ok`
    pub delivered: usize,
    /// Handlers that returned an error or panicked
    pub failures: Vec<HandlerFailure>,
}

#[derive(Default)]
struct HandlerMap {
    next_id: u64,
    handlers: HashMap<HandlerId, Arc<dyn MessageHandler>>,
}

impl HandlerMap {
    fn find(&self, handler: &Arc<dyn MessageHandler>) -> Option<HandlerId> {
        // Compare data pointers only; vtable addresses aren't stable across codegen units
        let target = Arc::as_ptr(handler) as *const ();
        self.handlers
            .iter()
            .find(|(_, existing)| Arc::as_ptr(existing) as *const () == target)
            .map(|(id, _)| *id)
    }
}

/// Set of message handlers with snapshot delivery
///
/// Cloning shares the underlying set.
#[derive(Clone, Default)]
pub struct DispatchRegistry {
    handlers: Arc<Mutex<HandlerMap>>,
}

impl DispatchRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for all subsequent messages
    ///
    /// Registering a handler that is already present is a no-op and returns
    /// its existing id.
    pub fn add_handler(&self, handler: Arc<dyn MessageHandler>) -> HandlerId {
        let mut map = self.lock();
        if let Some(id) = map.find(&handler) {
            return id;
        }

        map.next_id += 1;
        let id = HandlerId(map.next_id);
        map.handlers.insert(id, handler);
        id
    }

    /// Register a closure as a handler
    pub fn add_fn<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&Message) -> HandlerResult + Send + Sync + 'static,
    {
        self.add_handler(Arc::new(handler))
    }

    /// Deregister a handler. Returns `false` if it wasn't registered.
    pub fn remove_handler(&self, id: HandlerId) -> bool {
        self.lock().handlers.remove(&id).is_some()
    }

    /// Whether `id` is currently registered
    pub fn contains(&self, id: HandlerId) -> bool {
        self.lock().handlers.contains_key(&id)
    }

    /// Number of registered handlers
    pub fn len(&self) -> usize {
        self.lock().handlers.len()
    }

    /// Whether no handlers are registered
    pub fn is_empty(&self) -> bool {
        self.lock().handlers.is_empty()
    }

    /// Deliver `message` to every handler registered when dispatch begins
    pub fn dispatch(&self, message: &Message) -> DispatchReport {
        let snapshot: Vec<(HandlerId, Arc<dyn MessageHandler>)> = self
            .lock()
            .handlers
            .iter()
            .map(|(id, handler)| (*id, Arc::clone(handler)))
            .collect();

        let mut report = DispatchReport::default();
        for (id, handler) in snapshot {
            match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(message))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(error)) => report.failures.push(HandlerFailure {
                    handler: id,
                    error: error.to_string(),
                }),
                Err(payload) => report.failures.push(HandlerFailure {
                    handler: id,
                    error: format!("panicked: {}", panic_message(payload.as_ref())),
                }),
            }
        }

        report
    }

    // A handler that panicked while another thread held the lock leaves the map intact
    fn lock(&self) -> MutexGuard<'_, HandlerMap> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for DispatchRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchRegistry")
            .field("handlers", &self.len())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
