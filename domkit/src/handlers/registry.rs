//! Name → handler registries.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::{
    DeviceHandler, DeviceHandlerRegistration, FieldHandler, FieldHandlerRegistration,
    ImageHandler, ImageHandlerRegistration,
};

/// Mapping from a configuration tag to its handler.
///
/// Registration is unconditional: registering an existing name replaces the
/// previous handler. Lookups return `None` on a miss and leave it to the
/// caller to decide whether that is fatal.
pub struct HandlerRegistry<H: ?Sized> {
    kind: &'static str,
    handlers: HashMap<String, Arc<H>>,
}

impl<H: ?Sized> HandlerRegistry<H> {
    /// Create an empty registry; `kind` names it in logs.
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            handlers: HashMap::new(),
        }
    }

    /// Store a handler under `name`. Returns the handler it replaced, if any.
    pub fn register(&mut self, name: impl Into<String>, handler: Arc<H>) -> Option<Arc<H>> {
        let name = name.into();
        tracing::debug!(registry = self.kind, handler = %name, "Registering handler");
        self.handlers.insert(name, handler)
    }

    /// Remove the handler registered under `name`.
    pub fn unregister(&mut self, name: &str) -> Option<Arc<H>> {
        self.handlers.remove(name)
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<H>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl<H: ?Sized> fmt::Debug for HandlerRegistry<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("kind", &self.kind)
            .field("names", &self.names())
            .finish()
    }
}

/// The three registries consulted by the construction pipeline.
///
/// Built once at startup, then shared read-only (`Arc<Registries>`).
#[derive(Debug)]
pub struct Registries {
    pub images: HandlerRegistry<dyn ImageHandler>,
    pub devices: HandlerRegistry<dyn DeviceHandler>,
    pub fields: HandlerRegistry<dyn FieldHandler>,
}

impl Registries {
    /// Empty registries.
    pub fn new() -> Self {
        Self {
            images: HandlerRegistry::new("image"),
            devices: HandlerRegistry::new("device"),
            fields: HandlerRegistry::new("field"),
        }
    }

    /// Registries pre-populated with every compile-time registered handler.
    pub fn with_builtins() -> Self {
        let mut registries = Self::new();

        for registration in inventory::iter::<ImageHandlerRegistration> {
            registries
                .images
                .register(registration.name, (registration.factory)());
        }
        for registration in inventory::iter::<DeviceHandlerRegistration> {
            registries
                .devices
                .register(registration.name, (registration.factory)());
        }
        for registration in inventory::iter::<FieldHandlerRegistration> {
            registries
                .fields
                .register(registration.name, (registration.factory)());
        }

        registries
    }
}

impl Default for Registries {
    fn default() -> Self {
        Self::with_builtins()
    }
}
