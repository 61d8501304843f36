//! Tagged envelopes for polymorphic values that cross the storage boundary.
//!
//! Nodes and intents are closed sum types in memory. On disk each one is an
//! [`Envelope`]: a discriminant string plus a JSON payload whose shape depends
//! on the discriminant. Encoding is two-phase (discriminant, then payload) and
//! so is decoding: the [`Registry`] looks the discriminant up and hands the
//! payload to that variant's decoder.
//!
//! # No Implicit Registration
//!
//! The registry is an ordinary value built at startup and passed to the
//! service. [`Registry::standard`] registers every built-in variant; a second
//! registration of the same discriminant panics.
//!
//! # Example
//!
//! ```ignore
//! let registry = Registry::standard();
//! let envelope = node.to_envelope()?;
//! assert_eq!(registry.decode_node(&envelope)?, node);
//! ```

use std::collections::HashMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::EnvelopeError;
use crate::intent::{self, Intent};
use crate::node::{self, Node};

/// Serialized form of a node or intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub kind: String,
    pub payload: serde_json::Value,
}

impl Envelope {
    /// Encode a tagged value.
    pub fn encode<T: Tagged>(value: &T) -> Result<Self, EnvelopeError> {
        let payload = serde_json::to_value(value).map_err(|source| EnvelopeError::Encode {
            kind: T::KIND,
            source,
        })?;
        Ok(Self {
            kind: T::KIND.to_string(),
            payload,
        })
    }
}

/// A variant with a stable discriminant.
///
/// `KIND` is persisted. It must not change once records exist in storage.
pub trait Tagged: Serialize + DeserializeOwned + Send + Sync + 'static {
    const KIND: &'static str;
}

type DecodeFn<T> = Box<dyn Fn(&serde_json::Value) -> Result<T, serde_json::Error> + Send + Sync>;

/// Maps discriminants to decoders for nodes and intents.
#[derive(Default)]
pub struct Registry {
    nodes: HashMap<&'static str, DecodeFn<Node>>,
    intents: HashMap<&'static str, DecodeFn<Intent>>,
}

impl Registry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every built-in node and intent.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        node::register_all(&mut registry);
        intent::register_all(&mut registry);
        registry
    }

    /// Register a node variant.
    ///
    /// # Panics
    ///
    /// Panics if a decoder is already registered for `N::KIND`.
    pub fn register_node<N>(&mut self)
    where
        N: Tagged + Into<Node>,
    {
        if self.nodes.contains_key(N::KIND) {
            panic!("decoder already registered for node kind: {}", N::KIND);
        }
        self.nodes.insert(
            N::KIND,
            Box::new(|payload| serde_json::from_value::<N>(payload.clone()).map(Into::into)),
        );
    }

    /// Register an intent variant.
    ///
    /// # Panics
    ///
    /// Panics if a decoder is already registered for `I::KIND`.
    pub fn register_intent<I>(&mut self)
    where
        I: Tagged + Into<Intent>,
    {
        if self.intents.contains_key(I::KIND) {
            panic!("decoder already registered for intent kind: {}", I::KIND);
        }
        self.intents.insert(
            I::KIND,
            Box::new(|payload| serde_json::from_value::<I>(payload.clone()).map(Into::into)),
        );
    }

    pub fn decode_node(&self, envelope: &Envelope) -> Result<Node, EnvelopeError> {
        decode(&self.nodes, "node", envelope)
    }

    pub fn decode_intent(&self, envelope: &Envelope) -> Result<Intent, EnvelopeError> {
        decode(&self.intents, "intent", envelope)
    }

    pub fn has_node(&self, kind: &str) -> bool {
        self.nodes.contains_key(kind)
    }

    pub fn has_intent(&self, kind: &str) -> bool {
        self.intents.contains_key(kind)
    }
}

fn decode<T>(
    table: &HashMap<&'static str, DecodeFn<T>>,
    category: &'static str,
    envelope: &Envelope,
) -> Result<T, EnvelopeError> {
    let decoder = table
        .get(envelope.kind.as_str())
        .ok_or_else(|| EnvelopeError::UnknownKind {
            category,
            kind: envelope.kind.clone(),
        })?;

    decoder(&envelope.payload).map_err(|source| EnvelopeError::InvalidPayload {
        kind: envelope.kind.clone(),
        source,
    })
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut nodes: Vec<_> = self.nodes.keys().collect();
        nodes.sort();
        let mut intents: Vec<_> = self.intents.keys().collect();
        intents.sort();
        f.debug_struct("Registry")
            .field("nodes", &nodes)
            .field("intents", &intents)
            .finish()
    }
}
