//! Authorization gate.
//!
//! Callers hold several anonymous identities at once. Every presented identity
//! is verified against storage before any handler runs, and ownership checks
//! consider the whole set rather than only the acting identity.

use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use previewd_common::{ContainerRoute, IdentitySet, PreviewError, PreviewResult, Role};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::storage::Store;
use crate::storage::schema::password_digest;

/// Claims carried by an instance access token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccessClaims {
    /// Subdomain the token grants access to.
    pub sub: String,
    pub iat: usize,
    pub exp: usize,
}

#[derive(Clone)]
pub struct AuthorizationGate {
    store: Store,
    token_secret: String,
    token_ttl: chrono::Duration,
}

impl AuthorizationGate {
    pub fn new(store: Store, token_secret: impl Into<String>, token_ttl: chrono::Duration) -> Self {
        Self {
            store,
            token_secret: token_secret.into(),
            token_ttl,
        }
    }

    pub async fn verify_user(&self, user_id: &str, secret: &str) -> PreviewResult<()> {
        if self.store.verify_user(user_id, secret).await? {
            Ok(())
        } else {
            debug!(user_id, "identity failed verification");
            Err(PreviewError::AuthenticationFailure)
        }
    }

    /// Every identity in the set must verify; an empty set never does.
    pub async fn verify_all(&self, identities: &IdentitySet) -> PreviewResult<()> {
        if identities.is_empty() {
            return Err(PreviewError::AuthenticationFailure);
        }
        for identity in identities.iter() {
            self.verify_user(&identity.id, &identity.secret).await?;
        }
        Ok(())
    }

    pub fn role_for(&self, caller_user_id: &str, container: &ContainerRoute) -> Role {
        Role::derive(caller_user_id, &container.owner_user_id)
    }

    pub fn require_owner(
        &self,
        identities: &IdentitySet,
        container: &ContainerRoute,
    ) -> PreviewResult<()> {
        if identities.contains(&container.owner_user_id) {
            Ok(())
        } else {
            Err(PreviewError::AuthorizationDenied(
                "Only the instance owner may do this".to_string(),
            ))
        }
    }

    /// Delete a comment on behalf of the caller.
    ///
    /// The owner may delete any comment on the container. Otherwise each
    /// identity is tried as the author, in insertion order, and the first
    /// match wins. When nothing matches, `Ok(0)` is returned rather than an
    /// error, so callers cannot probe for comment ids they do not own.
    pub async fn delete_comment(
        &self,
        identities: &IdentitySet,
        container: &ContainerRoute,
        comment_id: &str,
    ) -> PreviewResult<u64> {
        if identities.contains(&container.owner_user_id) {
            return Ok(self
                .store
                .delete_comment(&container.container_id, comment_id, None)
                .await?);
        }
        for identity in identities.iter() {
            let deleted = self
                .store
                .delete_comment(&container.container_id, comment_id, Some(&identity.id))
                .await?;
            if deleted > 0 {
                return Ok(deleted);
            }
        }
        Ok(0)
    }

    /// Exchange an instance password for an access token.
    pub async fn authorize_instance(&self, subdomain: &str, password: &str) -> PreviewResult<String> {
        let subdomain = subdomain.to_lowercase();
        let subdomain = subdomain.as_str();
        let Some(stored) = self.store.container_password_hash(subdomain).await? else {
            debug!(subdomain, "no password set or unknown instance");
            return Err(PreviewError::AuthenticationFailure);
        };
        if password_digest(password) != stored {
            warn!(subdomain, "instance password rejected");
            return Err(PreviewError::AuthenticationFailure);
        }
        self.issue_token(subdomain)
    }

    fn issue_token(&self, subdomain: &str) -> PreviewResult<String> {
        let now = Utc::now();
        let claims = AccessClaims {
            sub: subdomain.to_string(),
            iat: now.timestamp() as usize,
            exp: (now + self.token_ttl).timestamp() as usize,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.token_secret.as_bytes()),
        )
        .map_err(|e| PreviewError::Internal(anyhow::Error::new(e).context("Failed to sign token")))?;
        Ok(token)
    }

    /// Check a token issued by [`Self::authorize_instance`]. This is the
    /// contract for the proxy in front of instances, which admits a request to
    /// `claims.sub` only while the token is valid.
    pub fn verify_access_token(&self, token: &str) -> PreviewResult<AccessClaims> {
        let data = decode::<AccessClaims>(
            token,
            &DecodingKey::from_secret(self.token_secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|_| PreviewError::AuthenticationFailure)?;
        Ok(data.claims)
    }
}
