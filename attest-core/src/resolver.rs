//! Attestation pointer resolver
//!
//! Resolution is exact-version: a pointer at a superseded version resolves
//! to that version, never to its successor. Callers that want the live
//! version ask for it explicitly with [`PointerResolver::resolve_latest`].

use crate::{
    query::{QueryCriteria, QueryService},
    state::{AttestationPointer, StateAndRef},
    types::StateStatus,
    Error, Result,
};
use std::sync::Arc;
use std::time::Duration;

/// Resolves attestation pointers against local and, optionally, remote stores
#[derive(Clone)]
pub struct PointerResolver {
    local: Arc<dyn QueryService>,
    remote: Option<Arc<dyn QueryService>>,
    timeout: Duration,
}

impl PointerResolver {
    /// Resolve against `local` only
    pub fn new(local: Arc<dyn QueryService>, timeout: Duration) -> Self {
        Self {
            local,
            remote: None,
            timeout,
        }
    }

    /// Fall back to `remote` when the local store does not hold the target
    pub fn with_remote(mut self, remote: Arc<dyn QueryService>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Whether a remote store is consulted
    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// The exact version `pointer` names
    pub async fn resolve(&self, pointer: &AttestationPointer) -> Result<StateAndRef> {
        let criteria = QueryCriteria::new(pointer.state_type)
            .state_ref(pointer.state_ref)
            .status(StateStatus::All);

        let found = match self.find(&*self.local, &criteria).await? {
            Some(found) => Some(found),
            None => match &self.remote {
                Some(remote) => {
                    tracing::debug!(pointer = %pointer, "Pointer not held locally, asking remote");
                    self.find(&**remote, &criteria).await?
                }
                None => None,
            },
        };

        let found = found.ok_or_else(|| Error::StateNotFound(pointer.to_string()))?;
        if !pointer.matches(&found) {
            return Err(Error::StaleReference(format!(
                "{} resolved to {} with identity {:?}",
                pointer,
                found.state_ref,
                found.state.linear_id()
            )));
        }
        Ok(found)
    }

    /// The live version of the entity `pointer` identifies
    pub async fn resolve_latest(&self, pointer: &AttestationPointer) -> Result<StateAndRef> {
        let criteria = QueryCriteria::new(pointer.state_type).linear_id(pointer.linear_id);
        match self.find(&*self.local, &criteria).await? {
            Some(found) => Ok(found),
            None => match &self.remote {
                Some(remote) => self
                    .find(&**remote, &criteria)
                    .await?
                    .ok_or_else(|| Error::StateNotFound(pointer.linear_id.to_string())),
                None => Err(Error::StateNotFound(pointer.linear_id.to_string())),
            },
        }
    }

    /// Whether the version `pointer` names is still the live version
    pub async fn is_current(&self, pointer: &AttestationPointer) -> Result<bool> {
        match self.resolve_latest(pointer).await {
            Ok(latest) => Ok(latest.state_ref == pointer.state_ref),
            Err(Error::StateNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn find(
        &self,
        service: &dyn QueryService,
        criteria: &QueryCriteria,
    ) -> Result<Option<StateAndRef>> {
        tokio::time::timeout(self.timeout, service.find_by_identity(criteria))
            .await
            .map_err(|_| {
                Error::QueryTimeout(format!(
                    "{} lookup exceeded {:?}",
                    criteria.state_type, self.timeout
                ))
            })?
    }
}

impl std::fmt::Debug for PointerResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PointerResolver")
            .field("remote", &self.remote.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}
