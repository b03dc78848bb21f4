//! Who may touch a project, and who is behind a credential.
//!
//! Both are collaborators the board consumes rather than owns. The
//! defaults here read project membership from the position store and map
//! opaque bearer tokens to users from a fixed table.

use async_trait::async_trait;
use axum::extract::Query;
use axum::http::Uri;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use taskboard_core::{ProjectId, UserId};

use crate::storage::{PositionStore, StoreError};

/// Project-level authorization.
#[async_trait]
pub trait AccessGate: Send + Sync {
    /// Whether `user` may read and mutate `project`.
    async fn check_access(&self, project: ProjectId, user: UserId) -> Result<bool, StoreError>;

    /// Whether `user` owns `project`.
    async fn check_owner(&self, project: ProjectId, user: UserId) -> Result<bool, StoreError>;
}

/// Membership read from the stored [`taskboard_core::Project`] record.
/// Unknown projects grant nothing.
pub struct StoreAccessGate {
    store: Arc<dyn PositionStore>,
}

impl StoreAccessGate {
    pub fn new(store: Arc<dyn PositionStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AccessGate for StoreAccessGate {
    async fn check_access(&self, project: ProjectId, user: UserId) -> Result<bool, StoreError> {
        Ok(self
            .store
            .project(project)?
            .is_some_and(|p| p.has_member(user)))
    }

    async fn check_owner(&self, project: ProjectId, user: UserId) -> Result<bool, StoreError> {
        Ok(self
            .store
            .project(project)?
            .is_some_and(|p| p.is_owner(user)))
    }
}

/// Resolves a presented credential to a user.
pub trait CredentialVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Option<UserId>;
}

/// Fixed token table.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenVerifier {
    tokens: HashMap<String, UserId>,
}

impl StaticTokenVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: impl Into<String>, user: UserId) -> Self {
        self.tokens.insert(token.into(), user);
        self
    }

    /// Parse `token=uuid` pairs separated by commas.
    pub fn parse(table: &str) -> Result<Self, String> {
        let mut verifier = Self::new();
        for entry in table.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (token, user) = entry
                .split_once('=')
                .ok_or_else(|| format!("expected token=user, got '{entry}'"))?;
            let user = user
                .trim()
                .parse::<UserId>()
                .map_err(|e| format!("bad user id for token '{}': {e}", token.trim()))?;
            verifier.tokens.insert(token.trim().to_string(), user);
        }
        Ok(verifier)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl CredentialVerifier for StaticTokenVerifier {
    fn verify(&self, token: &str) -> Option<UserId> {
        self.tokens.get(token).copied()
    }
}

/// The token part of an `Authorization: Bearer <token>` value.
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

#[derive(Deserialize)]
struct TokenParams {
    token: Option<String>,
}

/// The percent-decoded `token` parameter of a request URI.
pub fn query_token(uri: &Uri) -> Option<String> {
    let Query(params) = Query::<TokenParams>::try_from_uri(uri).ok()?;
    params.token.filter(|token| !token.is_empty())
}
