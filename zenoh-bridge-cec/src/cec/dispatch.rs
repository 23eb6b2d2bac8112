//! Typed routing of bus frames to handlers.

use std::sync::{Arc, RwLock};

use super::{CecMessage, Opcode};

/// Handler invoked for a matching frame.
pub type EventHandler = Arc<dyn Fn(&CecMessage) + Send + Sync>;

struct Registration {
    /// `None` matches every frame, including polls.
    opcodes: Option<Vec<Opcode>>,
    handler: EventHandler,
}

/// Routes incoming frames to handlers by opcode.
///
/// Handlers run synchronously, in registration order, on the thread that
/// calls [`dispatch`](Self::dispatch). The registration list is not locked
/// while handlers run, so a handler may register further handlers.
#[derive(Default)]
pub struct EventDispatcher {
    registrations: RwLock<Vec<Registration>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for frames carrying any of `opcodes`.
    pub fn register<F>(&self, opcodes: &[Opcode], handler: F)
    where
        F: Fn(&CecMessage) + Send + Sync + 'static,
    {
        self.registrations.write().unwrap().push(Registration {
            opcodes: Some(opcodes.to_vec()),
            handler: Arc::new(handler),
        });
    }

    /// Register a handler for every frame.
    pub fn register_all<F>(&self, handler: F)
    where
        F: Fn(&CecMessage) + Send + Sync + 'static,
    {
        self.registrations.write().unwrap().push(Registration {
            opcodes: None,
            handler: Arc::new(handler),
        });
    }

    /// Deliver a frame. Returns the number of handlers invoked.
    pub fn dispatch(&self, message: &CecMessage) -> usize {
        let handlers: Vec<EventHandler> = self
            .registrations
            .read()
            .unwrap()
            .iter()
            .filter(|r| match (&r.opcodes, message.opcode) {
                (None, _) => true,
                (Some(opcodes), Some(opcode)) => opcodes.contains(&opcode),
                (Some(_), None) => false,
            })
            .map(|r| r.handler.clone())
            .collect();

        tracing::trace!(message = %message, handlers = handlers.len(), "Dispatching CEC frame");

        for handler in &handlers {
            handler(message);
        }
        handlers.len()
    }

    pub fn len(&self) -> usize {
        self.registrations.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
