//! [`CapabilityRegistry`] – the ordered catalogue of everything the reasoning
//! engine may invoke or is taught about.
//!
//! Capabilities are registered once at startup, in a fixed order, and the
//! registry is then frozen behind an [`Arc`].  The registration order is
//! significant: it is the order in which action schemas are offered to the
//! engine, the order knowledge fragments are injected, and the rank used to
//! break merge ties.

use std::sync::Arc;

use async_trait::async_trait;
use roadwise_types::{CandidateAdvisory, CapabilityKind, ContextSnapshot, RoadwiseError};
use serde_json::Value;
use tracing::debug;

// ────────────────────────────────────────────────────────────────────────────
// Capability traits
// ────────────────────────────────────────────────────────────────────────────

/// An operation the reasoning engine may invoke with JSON arguments.
#[async_trait]
pub trait Action: Send + Sync {
    /// Stable, unique name the engine uses to invoke this action.
    fn name(&self) -> &str;

    /// One-line description offered to the engine alongside the schema.
    fn description(&self) -> &str;

    /// JSON Schema of the accepted arguments.
    fn input_schema(&self) -> Value;

    /// Run the action against the cycle's immutable context.
    ///
    /// Failures are isolated by the caller: an `Err` contributes zero
    /// candidates and never aborts the cycle.
    async fn execute(
        &self,
        args: &Value,
        ctx: &ContextSnapshot,
    ) -> Result<CandidateAdvisory, RoadwiseError>;
}

/// A prompt fragment that teaches the engine when to use the actions.
pub trait Knowledge: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Text appended to the engine's instructions.
    fn fragment(&self) -> &str;
}

/// A registered capability: either an [`Action`] or a [`Knowledge`] fragment.
#[derive(Clone)]
pub enum Capability {
    Action(Arc<dyn Action>),
    Knowledge(Arc<dyn Knowledge>),
}

impl Capability {
    pub fn name(&self) -> &str {
        match self {
            Self::Action(a) => a.name(),
            Self::Knowledge(k) => k.name(),
        }
    }

    pub fn kind(&self) -> CapabilityKind {
        match self {
            Self::Action(_) => CapabilityKind::Action,
            Self::Knowledge(_) => CapabilityKind::Knowledge,
        }
    }

    pub fn description(&self) -> &str {
        match self {
            Self::Action(a) => a.description(),
            Self::Knowledge(k) => k.description(),
        }
    }
}

impl std::fmt::Debug for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capability")
            .field("name", &self.name())
            .field("kind", &self.kind())
            .finish()
    }
}

/// What the engine is told about one action.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionSchema {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

// ────────────────────────────────────────────────────────────────────────────
// CapabilityRegistry
// ────────────────────────────────────────────────────────────────────────────

/// Ordered, name-unique set of capabilities.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use roadwise_kernel::capability_registry::{Capability, CapabilityRegistry, Knowledge};
///
/// struct Tip;
/// impl Knowledge for Tip {
///     fn name(&self) -> &str { "tip" }
///     fn description(&self) -> &str { "a tip" }
///     fn fragment(&self) -> &str { "Be careful." }
/// }
///
/// let mut registry = CapabilityRegistry::new();
/// registry.register(Capability::Knowledge(Arc::new(Tip))).unwrap();
/// assert!(registry.register(Capability::Knowledge(Arc::new(Tip))).is_err());
///
/// let frozen = registry.freeze();
/// assert_eq!(frozen.rank_of("tip"), Some(0));
/// ```
#[derive(Default, Debug)]
pub struct CapabilityRegistry {
    entries: Vec<Capability>,
}

impl CapabilityRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `capability`.  Names must be unique.
    ///
    /// # Errors
    ///
    /// [`RoadwiseError::DuplicateName`] when a capability with the same name
    /// is already registered.
    pub fn register(&mut self, capability: Capability) -> Result<(), RoadwiseError> {
        if self.rank_of(capability.name()).is_some() {
            return Err(RoadwiseError::DuplicateName(capability.name().to_string()));
        }
        debug!(
            name = capability.name(),
            kind = ?capability.kind(),
            rank = self.entries.len(),
            "capability registered"
        );
        self.entries.push(capability);
        Ok(())
    }

    /// Finish startup registration.  The returned handle exposes no mutation.
    pub fn freeze(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Look up a capability by name.
    ///
    /// # Errors
    ///
    /// [`RoadwiseError::NotFound`] when no capability has that name.
    pub fn lookup(&self, name: &str) -> Result<&Capability, RoadwiseError> {
        self.entries
            .iter()
            .find(|c| c.name() == name)
            .ok_or_else(|| RoadwiseError::NotFound(name.to_string()))
    }

    /// Look up an executable action by name.
    ///
    /// # Errors
    ///
    /// [`RoadwiseError::NotFound`] when the name is unknown or refers to a
    /// knowledge fragment.
    pub fn action(&self, name: &str) -> Result<Arc<dyn Action>, RoadwiseError> {
        match self.lookup(name)? {
            Capability::Action(a) => Ok(Arc::clone(a)),
            Capability::Knowledge(_) => Err(RoadwiseError::NotFound(name.to_string())),
        }
    }

    /// All capabilities in registration order.
    pub fn list(&self) -> &[Capability] {
        &self.entries
    }

    /// Zero-based registration index of `name`.
    pub fn rank_of(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|c| c.name() == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Schemas of every action, in registration order.
    pub fn action_schemas(&self) -> Vec<ActionSchema> {
        self.entries
            .iter()
            .filter_map(|c| match c {
                Capability::Action(a) => Some(ActionSchema {
                    name: a.name().to_string(),
                    description: a.description().to_string(),
                    input_schema: a.input_schema(),
                }),
                Capability::Knowledge(_) => None,
            })
            .collect()
    }

    /// Knowledge fragments rendered as `## Skill: <name>` sections, in
    /// registration order.  Empty when no knowledge is registered.
    pub fn knowledge_text(&self) -> String {
        self.entries
            .iter()
            .filter_map(|c| match c {
                Capability::Knowledge(k) => {
                    Some(format!("## Skill: {}\n{}", k.name(), k.fragment().trim()))
                }
                Capability::Action(_) => None,
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}
