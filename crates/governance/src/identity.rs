//! Identity collaborator
//!
//! Authentication is out of scope for the engine. A host resolves the
//! calling member however it likes and hands the engine a [`Caller`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{GovernanceError, GovernanceResult};
use crate::types::{validate_identifier, MemberId};

/// The member on whose behalf an operation runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub member_id: MemberId,
    /// Moderator/admin capability
    pub is_moderator: bool,
}

impl Caller {
    pub fn member(member_id: impl Into<MemberId>) -> Self {
        Self { member_id: member_id.into(), is_moderator: false }
    }

    pub fn moderator(member_id: impl Into<MemberId>) -> Self {
        Self { member_id: member_id.into(), is_moderator: true }
    }

    /// Fail with `Unauthorized/Identity` unless the caller carries a usable id
    pub fn ensure_identified(&self) -> GovernanceResult<&str> {
        if self.member_id.trim().is_empty() {
            return Err(GovernanceError::unauthenticated("No calling member identity"));
        }
        validate_identifier("member id", &self.member_id)
            .map_err(|e| GovernanceError::unauthenticated(e.to_string()))?;
        Ok(&self.member_id)
    }

    /// Fail with `Unauthorized/Permission` unless the caller is a moderator
    pub fn ensure_moderator(&self, action: &str) -> GovernanceResult<()> {
        self.ensure_identified()?;
        if !self.is_moderator {
            return Err(GovernanceError::forbidden(format!(
                "Only moderators may {}", action
            )));
        }
        Ok(())
    }
}

/// Supplies the identity of the calling member
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// The current caller, or `Unauthorized/Identity` when nobody is signed in
    async fn current_caller(&self) -> GovernanceResult<Caller>;
}

/// A fixed identity, as used by the CLI and tests
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity {
    caller: Option<Caller>,
}

impl StaticIdentity {
    pub fn new(caller: Caller) -> Self {
        Self { caller: Some(caller) }
    }

    /// A provider with nobody signed in
    pub fn anonymous() -> Self {
        Self { caller: None }
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn current_caller(&self) -> GovernanceResult<Caller> {
        let caller = self
            .caller
            .clone()
            .ok_or_else(|| GovernanceError::unauthenticated("No calling member identity"))?;
        caller.ensure_identified()?;
        Ok(caller)
    }
}
