//! Shared, ordered stub storage.
//!
//! Stubs are evaluated in registration order and the first match wins.
//! Every mutation runs under the write half of a [`RwLock`], so a concurrent
//! lookup sees the list either before or after it, never in between.

use crate::config::{DelayConfig, FaultConfig, ResponseDefinition, StubDefinition};
use crate::error::{RegistryError, StubError};
use crate::matcher::{MatchContext, RequestPredicate};
use crate::request::IncomingRequest;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Opaque stub identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StubId(String);

impl StubId {
    /// A fresh random identifier.
    pub fn generate() -> Self {
        Self(crate::template::random_uuid())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StubId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StubId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for StubId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A registered stub.
#[derive(Debug)]
pub struct Stub {
    pub id: StubId,
    pub name: Option<String>,
    pub predicate: RequestPredicate,
    pub response: ResponseDefinition,
    pub delay: Option<DelayConfig>,
    pub fault: Option<FaultConfig>,
}

impl Stub {
    /// The definition this stub can be re-registered from.
    pub fn definition(&self) -> StubDefinition {
        StubDefinition {
            id: Some(self.id.to_string()),
            name: self.name.clone(),
            request: self.predicate.source().clone(),
            response: self.response.clone(),
            delay: self.delay.clone(),
            fault: self.fault.clone(),
        }
    }
}

/// Result of matching a request against the registry.
#[derive(Debug)]
pub struct MatchResult {
    /// The matched stub
    pub stub: Arc<Stub>,
    /// Context captured during matching
    pub context: MatchContext,
}

/// Cloneable handle to one server's stubs.
#[derive(Debug, Clone, Default)]
pub struct StubRegistry {
    stubs: Arc<RwLock<Vec<Arc<Stub>>>>,
}

impl StubRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stub at the end of the evaluation order.
    pub async fn register(
        &self,
        predicate: RequestPredicate,
        response: ResponseDefinition,
    ) -> StubId {
        let stub = Stub {
            id: StubId::generate(),
            name: None,
            predicate,
            response,
            delay: None,
            fault: None,
        };
        self.push(stub).await
    }

    /// Compile and append a full stub definition.
    ///
    /// An explicit id must be non-empty and not already registered.
    pub async fn register_definition(
        &self,
        definition: StubDefinition,
    ) -> Result<StubId, StubError> {
        definition.response.validate()?;
        if let Some(fault) = &definition.fault {
            fault.validate()?;
        }
        let predicate = RequestPredicate::compile(definition.request)?;

        let id = match definition.id {
            Some(id) if id.is_empty() => return Err(StubError::EmptyId),
            Some(id) => StubId::from(id),
            None => StubId::generate(),
        };

        let stub = Stub {
            id: id.clone(),
            name: definition.name,
            predicate,
            response: definition.response,
            delay: definition.delay,
            fault: definition.fault,
        };

        let mut stubs = self.stubs.write().await;
        if stubs.iter().any(|existing| existing.id == id) {
            return Err(StubError::DuplicateId(id.to_string()));
        }
        stubs.push(Arc::new(stub));
        debug!(stub_id = %id, total = stubs.len(), "Stub registered");
        Ok(id)
    }

    async fn push(&self, stub: Stub) -> StubId {
        let id = stub.id.clone();
        let mut stubs = self.stubs.write().await;
        stubs.push(Arc::new(stub));
        debug!(stub_id = %id, total = stubs.len(), "Stub registered");
        id
    }

    /// Remove a stub, keeping the order of the others.
    pub async fn remove(&self, id: &StubId) -> Result<Arc<Stub>, RegistryError> {
        let mut stubs = self.stubs.write().await;
        let index = stubs
            .iter()
            .position(|stub| &stub.id == id)
            .ok_or_else(|| RegistryError::NotFound(id.clone()))?;
        let removed = stubs.remove(index);
        debug!(stub_id = %id, total = stubs.len(), "Stub removed");
        Ok(removed)
    }

    /// Find the first registered stub matching the request.
    pub async fn find_match(&self, request: &IncomingRequest) -> Option<MatchResult> {
        let stubs = self.stubs.read().await;
        stubs.iter().find_map(|stub| {
            stub.predicate.evaluate(request).map(|context| MatchResult {
                stub: Arc::clone(stub),
                context,
            })
        })
    }

    /// Remove every stub.
    pub async fn reset(&self) {
        let mut stubs = self.stubs.write().await;
        let cleared = stubs.len();
        stubs.clear();
        debug!(cleared, "Registry reset");
    }

    /// Snapshot of the registered stubs, in evaluation order.
    pub async fn list(&self) -> Vec<Arc<Stub>> {
        self.stubs.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.stubs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.stubs.read().await.is_empty()
    }
}
