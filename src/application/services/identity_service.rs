//! # OAuth Identity Service
//!
//! Links provider identities to users. Tokens are encrypted with the
//! Secret Engine before they reach the repository and are only decrypted
//! on explicit request.

use crate::application::error::{ApplicationError, ApplicationResult};
use crate::domain::entities::OAuthIdentity;
use crate::domain::value_objects::{AttributeMap, OAuthIdentityId, Timestamp, UserId};
use crate::infrastructure::crypto::SecretEngine;
use crate::infrastructure::persistence::OAuthIdentityRepository;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Tokens returned by a provider after sign-in or refresh.
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderTokens {
    /// Access token.
    pub access_token: String,
    /// Refresh token.
    pub refresh_token: Option<String>,
    /// Access token expiry.
    pub expires_at: Option<Timestamp>,
}

impl std::fmt::Debug for ProviderTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderTokens")
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// An identity without its tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityView {
    /// Identifier.
    pub id: OAuthIdentityId,
    /// Owner.
    pub user_id: UserId,
    /// Provider name.
    pub provider: String,
    /// User id at the provider.
    pub provider_user_id: String,
    /// Access token expiry.
    pub expires_at: Option<Timestamp>,
    /// Provider profile data.
    pub info: AttributeMap,
    /// Creation time.
    pub created_at: Timestamp,
}

impl From<&OAuthIdentity> for IdentityView {
    fn from(identity: &OAuthIdentity) -> Self {
        Self {
            id: identity.id,
            user_id: identity.user_id,
            provider: identity.provider.clone(),
            provider_user_id: identity.provider_user_id.clone(),
            expires_at: identity.expires_at,
            info: identity.info.clone(),
            created_at: identity.created_at,
        }
    }
}

/// Links, refreshes and reads OAuth identities.
#[derive(Debug, Clone)]
pub struct OAuthIdentityService {
    identities: Arc<dyn OAuthIdentityRepository>,
    secrets: Arc<SecretEngine>,
}

impl OAuthIdentityService {
    /// Creates a new service.
    #[must_use]
    pub fn new(identities: Arc<dyn OAuthIdentityRepository>, secrets: Arc<SecretEngine>) -> Self {
        Self {
            identities,
            secrets,
        }
    }

    fn seal_refresh(&self, tokens: &ProviderTokens) -> ApplicationResult<Option<String>> {
        tokens
            .refresh_token
            .as_deref()
            .map(|t| self.secrets.encrypt(t))
            .transpose()
            .map_err(ApplicationError::from)
    }

    /// Links `provider_user_id` at `provider` to `user_id`. An existing
    /// identity of the user at that provider has its tokens replaced
    /// instead.
    ///
    /// # Errors
    ///
    /// - `ApplicationError::Validation` for a blank access token
    /// - `RepositoryError::ReferenceNotFound` if the user does not exist
    pub async fn link(
        &self,
        user_id: UserId,
        provider: &str,
        provider_user_id: &str,
        tokens: &ProviderTokens,
        profile: AttributeMap,
    ) -> ApplicationResult<OAuthIdentity> {
        if tokens.access_token.trim().is_empty() {
            return Err(ApplicationError::validation("access_token is required"));
        }

        if let Some(existing) = self
            .identities
            .get_by_user_and_provider(user_id, provider)
            .await?
            && existing.provider_user_id == provider_user_id
        {
            return self.refresh(existing.id, tokens).await;
        }

        let mut identity = OAuthIdentity::new(
            user_id,
            provider,
            provider_user_id,
            self.secrets.encrypt(&tokens.access_token)?,
        );
        identity.refresh_token = self.seal_refresh(tokens)?;
        identity.expires_at = tokens.expires_at;
        identity.info = profile;

        self.identities.create(&identity).await?;
        debug!(user_id = %user_id, provider = %provider, "oauth identity linked");
        Ok(identity)
    }

    /// Replaces the tokens of an identity after a provider refresh.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the identity is gone.
    pub async fn refresh(
        &self,
        id: OAuthIdentityId,
        tokens: &ProviderTokens,
    ) -> ApplicationResult<OAuthIdentity> {
        let access = self.secrets.encrypt(&tokens.access_token)?;
        let refresh = self.seal_refresh(tokens)?;
        self.identities
            .update_tokens(id, &access, refresh.as_deref(), tokens.expires_at)
            .await?;
        self.identities
            .get_by_id(id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("OAuthIdentity", id))
    }

    /// Decrypts the stored tokens of an identity.
    ///
    /// # Errors
    ///
    /// - `ApplicationError::NotFound` on a miss
    /// - Secret Engine errors on decryption failure
    pub async fn tokens(&self, id: OAuthIdentityId) -> ApplicationResult<ProviderTokens> {
        let identity = self
            .identities
            .get_by_id(id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("OAuthIdentity", id))?;
        Ok(ProviderTokens {
            access_token: self.secrets.decrypt(&identity.access_token)?,
            refresh_token: identity
                .refresh_token
                .as_deref()
                .map(|t| self.secrets.decrypt(t))
                .transpose()?,
            expires_at: identity.expires_at,
        })
    }

    /// Lists a user's identities without tokens.
    ///
    /// # Errors
    ///
    /// Returns an error only on infrastructure failure.
    pub async fn list(&self, user_id: UserId) -> ApplicationResult<Vec<IdentityView>> {
        let identities = self.identities.get_by_user(user_id).await?;
        Ok(identities.iter().map(IdentityView::from).collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::domain::entities::{SupportedExchanges, User};
    use crate::infrastructure::persistence::Repositories;

    async fn setup() -> (Repositories, OAuthIdentityService, UserId) {
        let repos = Repositories::in_memory(SupportedExchanges::default());
        let secrets = Arc::new(SecretEngine::new(b"master", b"signing").unwrap());
        let service = OAuthIdentityService::new(repos.identities.clone(), secrets);
        let user = User::new("alice", "a@x");
        repos.users.create(&user).await.unwrap();
        (repos, service, user.id)
    }

    fn tokens(access: &str) -> ProviderTokens {
        ProviderTokens {
            access_token: access.into(),
            refresh_token: Some("refresh-1".into()),
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn tokens_are_stored_encrypted() {
        let (repos, service, user) = setup().await;
        let identity = service
            .link(user, "google", "g-1", &tokens("access-1"), AttributeMap::new())
            .await
            .unwrap();

        let stored = repos.identities.get_by_id(identity.id).await.unwrap().unwrap();
        assert_ne!(stored.access_token, "access-1");
        assert_ne!(stored.refresh_token.as_deref(), Some("refresh-1"));

        let plain = service.tokens(identity.id).await.unwrap();
        assert_eq!(plain.access_token, "access-1");
        assert_eq!(plain.refresh_token.as_deref(), Some("refresh-1"));
    }

    #[tokio::test]
    async fn relink_refreshes_existing_identity() {
        let (_repos, service, user) = setup().await;
        let first = service
            .link(user, "google", "g-1", &tokens("access-1"), AttributeMap::new())
            .await
            .unwrap();
        let second = service
            .link(user, "google", "g-1", &tokens("access-2"), AttributeMap::new())
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(service.tokens(first.id).await.unwrap().access_token, "access-2");
        assert_eq!(service.list(user).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn blank_access_token_rejected() {
        let (_repos, service, user) = setup().await;
        let err = service
            .link(user, "google", "g-1", &tokens("  "), AttributeMap::new())
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), 400);
    }
}
