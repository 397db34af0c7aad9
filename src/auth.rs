//! Authentication context: credential kinds, header preparation and the
//! challenge-retry decision

use async_trait::async_trait;
use http::header::HeaderMap;
use tracing::debug;

use crate::error::CourierError;
use crate::response::ExchangeResult;
use crate::transport::ResolvedAuth;

/// Credential kinds a request can carry.
///
/// Only username/password credentials are forwarded to the transport;
/// other kinds resolve to no authentication at that layer and must attach
/// themselves through an [`AuthPolicy::prepare`] implementation instead.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Credentials {
    UsernamePassword { username: String, password: String },
    Custom { kind: String, token: String },
}

impl Credentials {
    pub fn username_password(username: impl Into<String>, password: impl Into<String>) -> Self {
        Credentials::UsernamePassword {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Resolve the credentials the transport recognizes
    pub(crate) fn resolve(&self) -> Option<ResolvedAuth> {
        match self {
            Credentials::UsernamePassword { username, password } => Some(ResolvedAuth {
                username: username.clone(),
                password: Some(password.clone()),
            }),
            Credentials::Custom { kind, .. } => {
                debug!("credential kind '{kind}' is not transport-recognized; sending no authentication");
                None
            }
        }
    }
}

/// The authentication collaborator consulted by the executor.
///
/// `prepare` may mutate outgoing headers and runs before every send;
/// failures there are SECURITY errors. `should_retry` inspects a
/// materialized response and demands the single authentication retry.
#[async_trait]
pub trait AuthPolicy: Send + Sync {
    fn credentials(&self) -> &Credentials;

    fn should_retry(&self, result: &ExchangeResult) -> bool;

    async fn prepare(&self, headers: &mut HeaderMap) -> Result<(), CourierError>;
}

/// Username/password authentication retried once on a 401/407 challenge.
///
/// The credentials themselves ride on the transport's native basic-auth
/// support, so `prepare` has nothing to add.
#[derive(Clone, Debug)]
pub struct BasicChallengePolicy {
    credentials: Credentials,
}

impl BasicChallengePolicy {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            credentials: Credentials::username_password(username, password),
        }
    }
}

#[async_trait]
impl AuthPolicy for BasicChallengePolicy {
    fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    fn should_retry(&self, result: &ExchangeResult) -> bool {
        matches!(result.attributes.status.as_u16(), 401 | 407)
    }

    async fn prepare(&self, _headers: &mut HeaderMap) -> Result<(), CourierError> {
        Ok(())
    }
}
