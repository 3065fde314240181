//! Capability registry for technology stacks.
//!
//! The registry maps a stack name to either a builder factory or the reason
//! the stack is unavailable in this build. It is filled once at startup and
//! never changes afterwards; the orchestrator walks it in registration order.
//!
//! # Example
//!
//! ```
//! use stackweave::registry::CapabilityRegistry;
//!
//! let mut registry = CapabilityRegistry::new();
//! registry.register_unavailable("lifi", "not compiled in");
//!
//! assert!(registry.contains("lifi"));
//! assert!(!registry.is_available("lifi"));
//! assert!(!registry.is_available("unknown"));
//! ```

use std::sync::Arc;

use crate::config::OrchestratorConfig;
use crate::stack::StackBuilder;

/// Type alias for stack builder factories.
pub type StackFactory = Arc<dyn Fn(&OrchestratorConfig) -> Box<dyn StackBuilder> + Send + Sync>;

/// Availability of one stack.
#[derive(Clone)]
pub enum Capability {
    /// The stack can be built.
    Available(StackFactory),
    /// The stack is not present; the string says why.
    Unavailable(String),
}

impl Capability {
    /// Returns true if the stack can be built.
    pub fn is_available(&self) -> bool {
        matches!(self, Capability::Available(_))
    }
}

impl std::fmt::Debug for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::Available(_) => f.write_str("Available"),
            Capability::Unavailable(reason) => f.debug_tuple("Unavailable").field(reason).finish(),
        }
    }
}

/// Ordered map from stack name to [`Capability`].
#[derive(Clone, Default)]
pub struct CapabilityRegistry {
    entries: Vec<(String, Capability)>,
}

impl CapabilityRegistry {
    /// Creates a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, name: String, capability: Capability) {
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = capability,
            None => self.entries.push((name, capability)),
        }
    }

    /// Registers an available stack.
    ///
    /// Registering a name twice replaces the earlier entry in place.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&OrchestratorConfig) -> Box<dyn StackBuilder> + Send + Sync + 'static,
    {
        self.insert(name.into(), Capability::Available(Arc::new(factory)));
    }

    /// Registers a stack that is known but cannot be built.
    pub fn register_unavailable(&mut self, name: impl Into<String>, reason: impl Into<String>) {
        self.insert(name.into(), Capability::Unavailable(reason.into()));
    }

    /// Returns true if `name` is registered and available.
    pub fn is_available(&self, name: &str) -> bool {
        self.get(name).is_some_and(Capability::is_available)
    }

    /// Returns true if `name` is registered at all.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Looks up a stack.
    pub fn get(&self, name: &str) -> Option<&Capability> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, c)| c)
    }

    /// Entries in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Capability)> {
        self.entries.iter().map(|(n, c)| (n.as_str(), c))
    }

    /// Returns the number of registered stacks.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no stacks are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Builds the registry for the stacks compiled into this binary.
    ///
    /// Each technology sits behind a Cargo feature of the same name.
    pub fn from_build() -> Self {
        let mut registry = Self::new();

        #[cfg(feature = "thz")]
        registry.register(crate::stack::thz::NAME, |config| {
            Box::new(crate::stack::thz::ThzStack::new(config.thz.clone()))
        });
        #[cfg(not(feature = "thz"))]
        registry.register_unavailable("thz", "built without the `thz` feature");

        #[cfg(feature = "mmwave")]
        registry.register(crate::stack::mmwave::NAME, |config| {
            Box::new(crate::stack::mmwave::MmwaveStack::new(config.mmwave.clone()))
        });
        #[cfg(not(feature = "mmwave"))]
        registry.register_unavailable("mmwave", "built without the `mmwave` feature");

        #[cfg(feature = "sat")]
        registry.register(crate::stack::sat::NAME, |config| {
            Box::new(crate::stack::sat::SatStack::new(config.sat.clone()))
        });
        #[cfg(not(feature = "sat"))]
        registry.register_unavailable("sat", "built without the `sat` feature");

        registry
    }
}

impl std::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(n, c)| (n, c)))
            .finish()
    }
}
