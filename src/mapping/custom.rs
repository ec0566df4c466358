//! Named callbacks that profiles can bind inputs to
//!
//! Handlers receive the raw sample and may return a value for the binding's
//! optional target. Returning `None` writes nothing.

use crate::controller::device::{HatDirection, InputValue};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub trait CustomHandler: Send + Sync {
    fn handle(&self, value: &InputValue) -> Option<InputValue>;
}

impl<F> CustomHandler for F
where
    F: Fn(&InputValue) -> Option<InputValue> + Send + Sync,
{
    fn handle(&self, value: &InputValue) -> Option<InputValue> {
        self(value)
    }
}

#[derive(Clone, Default)]
pub struct CustomHandlers {
    handlers: HashMap<String, Arc<dyn CustomHandler>>,
}

impl fmt::Debug for CustomHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.handlers.keys().collect();
        names.sort();
        f.debug_struct("CustomHandlers")
            .field("handlers", &names)
            .finish()
    }
}

impl CustomHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// `passthrough` and `invert`
    pub fn with_builtins() -> Self {
        let mut handlers = Self::new();
        handlers.register("passthrough", |value: &InputValue| Some(*value));
        handlers.register("invert", |value: &InputValue| {
            Some(match value {
                InputValue::Axis(v) => InputValue::Axis(-v),
                InputValue::Button(pressed) => InputValue::Button(!pressed),
                InputValue::Hat(direction) => {
                    let (x, y) = direction.to_xy();
                    InputValue::Hat(HatDirection::from_xy(-x, -y))
                }
            })
        });
        handlers
    }

    /// Replaces any handler registered under the same name
    pub fn register<H>(&mut self, name: impl Into<String>, handler: H)
    where
        H: CustomHandler + 'static,
    {
        self.handlers.insert(name.into(), Arc::new(handler));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn CustomHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }
}
