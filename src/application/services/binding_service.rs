//! # Exchange Binding Service
//!
//! Credential handling for exchange bindings.
//!
//! Plaintext API keys enter through this service and leave it only as
//! Secret Engine ciphertexts plus a keyed hash. Reads for display go
//! through [`BindingView`], which carries a masked key and nothing else.
//!
//! The service also owns the failure-based auto-disable rule: a binding
//! that fails `max_failures` times within `failure_window` is moved to
//! status `error`.

use crate::application::dto::{CreateBindingRequest, RotateCredentialsRequest};
use crate::application::error::{ApplicationError, ApplicationResult};
use crate::config::BindingsConfig;
use crate::domain::entities::ExchangeBinding;
use crate::domain::value_objects::{
    AttributeMap, BindingStatus, ExchangeBindingId, Timestamp, UserId, Visibility,
};
use crate::infrastructure::crypto::{PlainCredentials, SecretEngine};
use crate::infrastructure::persistence::ExchangeBindingRepository;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Characters kept at each end of a masked key.
pub const MASK_VISIBLE_CHARS: usize = 4;

/// A binding as shown to its owner: no ciphertexts, a masked key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindingView {
    /// Identifier.
    pub id: ExchangeBindingId,
    /// Owner.
    pub user_id: Option<UserId>,
    /// Display name.
    pub name: String,
    /// Exchange type.
    pub exchange_type: String,
    /// Private or public.
    pub visibility: Visibility,
    /// Status.
    pub status: BindingStatus,
    /// Masked API key; `None` for public bindings.
    pub api_key: Option<String>,
    /// Last successful use.
    pub last_used_at: Option<Timestamp>,
    /// Failures since the last reset.
    pub failure_count: u32,
    /// Security settings.
    pub security_settings: AttributeMap,
    /// Creation time.
    pub created_at: Timestamp,
}

/// Creates, rotates and monitors exchange bindings.
#[derive(Debug, Clone)]
pub struct ExchangeBindingService {
    bindings: Arc<dyn ExchangeBindingRepository>,
    secrets: Arc<SecretEngine>,
    max_failures: u32,
    failure_window: Duration,
}

impl ExchangeBindingService {
    /// Creates a service with the configured auto-disable thresholds.
    #[must_use]
    pub fn new(
        bindings: Arc<dyn ExchangeBindingRepository>,
        secrets: Arc<SecretEngine>,
        config: &BindingsConfig,
    ) -> Self {
        Self {
            bindings,
            secrets,
            max_failures: config.max_failures,
            failure_window: config.failure_window(),
        }
    }

    async fn load(&self, id: ExchangeBindingId) -> ApplicationResult<ExchangeBinding> {
        self.bindings
            .get_by_id(id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("ExchangeBinding", id))
    }

    /// Creates a binding. Private bindings are owned by `owner` and have
    /// their credentials sealed; public bindings ignore `owner`.
    ///
    /// # Errors
    ///
    /// - `ApplicationError::Validation` for a bad request or a private
    ///   binding without an owner
    /// - repository errors from [`ExchangeBindingRepository::create`]
    pub async fn create(
        &self,
        owner: Option<UserId>,
        request: &CreateBindingRequest,
    ) -> ApplicationResult<ExchangeBinding> {
        request.validate()?;

        let binding = match request.visibility {
            Visibility::Private => {
                let owner = owner.ok_or_else(|| {
                    ApplicationError::validation("private bindings require an owner")
                })?;
                let api_key = request.api_key.as_deref().unwrap_or_default();
                let api_secret = request.api_secret.as_deref().unwrap_or_default();
                let sealed = self.secrets.seal(api_key.trim(), api_secret.trim())?;
                ExchangeBinding::private(owner, &request.name, &request.exchange_type, sealed)
            }
            Visibility::Public => ExchangeBinding::public(&request.name, &request.exchange_type),
        }
        .with_security_settings(request.security_settings.clone());

        self.bindings.create(&binding).await?;
        info!(
            binding_id = %binding.id,
            exchange_type = %binding.exchange_type,
            visibility = %binding.visibility,
            "exchange binding created"
        );
        Ok(binding)
    }

    /// Replaces the credentials of a private binding and clears its
    /// failure counter.
    ///
    /// # Errors
    ///
    /// - `ApplicationError::Validation` for a blank key or secret
    /// - `RepositoryError::NotFound` / `Domain` as in
    ///   [`ExchangeBindingRepository::rotate_credentials`]
    pub async fn rotate(
        &self,
        id: ExchangeBindingId,
        request: &RotateCredentialsRequest,
    ) -> ApplicationResult<ExchangeBinding> {
        request.validate()?;
        let sealed = self
            .secrets
            .seal(request.api_key.trim(), request.api_secret.trim())?;
        let binding = self.bindings.rotate_credentials(id, &sealed).await?;
        info!(binding_id = %id, "exchange binding credentials rotated");
        Ok(binding)
    }

    /// Returns the display form of a binding.
    ///
    /// # Errors
    ///
    /// Returns `BadKey` or `CorruptCiphertext` if the stored key cannot be
    /// decrypted.
    pub fn view(&self, binding: &ExchangeBinding) -> ApplicationResult<BindingView> {
        let api_key = match &binding.credentials {
            Some(sealed) => {
                let plain = self.secrets.decrypt(&sealed.encrypted_api_key)?;
                Some(SecretEngine::mask(&plain, MASK_VISIBLE_CHARS))
            }
            None => None,
        };
        Ok(BindingView {
            id: binding.id,
            user_id: binding.user_id,
            name: binding.name.clone(),
            exchange_type: binding.exchange_type.clone(),
            visibility: binding.visibility,
            status: binding.status,
            api_key,
            last_used_at: binding.last_used_at,
            failure_count: binding.failure_count,
            security_settings: binding.security_settings.clone(),
            created_at: binding.created_at,
        })
    }

    /// Loads a binding and returns its display form.
    ///
    /// # Errors
    ///
    /// Returns `ApplicationError::NotFound` on a miss, otherwise as
    /// [`ExchangeBindingService::view`].
    pub async fn get_view(&self, id: ExchangeBindingId) -> ApplicationResult<BindingView> {
        let binding = self.load(id).await?;
        self.view(&binding)
    }

    /// Decrypts the credentials of a private binding for use against the
    /// exchange.
    ///
    /// # Errors
    ///
    /// - `ApplicationError::NotFound` on a miss
    /// - `ApplicationError::Validation` for a public binding
    /// - Secret Engine errors on decryption failure
    pub async fn credentials(&self, id: ExchangeBindingId) -> ApplicationResult<PlainCredentials> {
        let binding = self.load(id).await?;
        let sealed = binding.credentials.as_ref().ok_or_else(|| {
            ApplicationError::validation("public bindings carry no credentials")
        })?;
        Ok(self.secrets.open(sealed)?)
    }

    /// Finds the binding that holds `api_key`.
    ///
    /// # Errors
    ///
    /// Returns an error only on infrastructure failure.
    pub async fn find_by_api_key(
        &self,
        api_key: &str,
    ) -> ApplicationResult<Option<ExchangeBinding>> {
        let hash = self.secrets.hash(api_key.trim());
        Ok(self.bindings.get_by_api_key_hash(&hash).await?)
    }

    /// Records a successful exchange call: stamps `last_used_at` and clears
    /// the failure counter.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the binding is gone.
    pub async fn record_success(&self, id: ExchangeBindingId) -> ApplicationResult<()> {
        self.bindings.touch_last_used(id).await?;
        self.bindings.reset_failures(id).await?;
        Ok(())
    }

    /// Records a failed exchange call and disables the binding once it has
    /// failed too often within the window. Returns true if it was disabled
    /// by this call.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the binding is gone.
    pub async fn record_failure_and_maybe_disable(
        &self,
        id: ExchangeBindingId,
    ) -> ApplicationResult<bool> {
        let binding = self.bindings.record_failure(id).await?;
        if binding.status == BindingStatus::Error
            || !binding.should_disable(self.max_failures, self.failure_window, Timestamp::now())
        {
            return Ok(false);
        }

        self.bindings.update_status(id, BindingStatus::Error).await?;
        warn!(
            binding_id = %id,
            failure_count = binding.failure_count,
            max_failures = self.max_failures,
            "exchange binding disabled after repeated failures"
        );
        Ok(true)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::domain::entities::{SupportedExchanges, User};
    use crate::domain::errors::ErrorKind;
    use crate::domain::value_objects::Patch;
    use crate::infrastructure::persistence::Repositories;
    use serde_json::json;

    struct Fixture {
        repos: Repositories,
        service: ExchangeBindingService,
        secrets: Arc<SecretEngine>,
        owner: UserId,
    }

    async fn fixture(max_failures: u32) -> Fixture {
        let repos = Repositories::in_memory(SupportedExchanges::default());
        let secrets = Arc::new(SecretEngine::new(b"master", b"signing").unwrap());
        let config = BindingsConfig {
            max_failures,
            ..BindingsConfig::default()
        };
        let service = ExchangeBindingService::new(repos.bindings.clone(), secrets.clone(), &config);
        let user = User::new("alice", "a@x");
        repos.users.create(&user).await.unwrap();
        Fixture {
            repos,
            service,
            secrets,
            owner: user.id,
        }
    }

    fn private_request(key: &str) -> CreateBindingRequest {
        serde_json::from_value(json!({
            "name": "main",
            "exchange_type": "binance",
            "api_key": key,
            "api_secret": "S3cr3t-value"
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn private_binding_is_sealed_and_masked() {
        let f = fixture(10).await;
        let binding = f
            .service
            .create(Some(f.owner), &private_request("AKIA1234567890"))
            .await
            .unwrap();

        let sealed = binding.credentials.clone().unwrap();
        assert_ne!(sealed.encrypted_api_key, "AKIA1234567890");
        assert_eq!(sealed.api_key_hash, f.secrets.hash("AKIA1234567890"));

        let view = f.service.view(&binding).unwrap();
        assert_eq!(view.api_key.as_deref(), Some("AKIA...7890"));

        let found = f.service.find_by_api_key("AKIA1234567890").await.unwrap();
        assert_eq!(found.map(|b| b.id), Some(binding.id));

        let plain = f.service.credentials(binding.id).await.unwrap();
        assert_eq!(plain.api_secret, "S3cr3t-value");
    }

    #[tokio::test]
    async fn generic_update_refuses_ciphertext() {
        let f = fixture(10).await;
        let binding = f
            .service
            .create(Some(f.owner), &private_request("K"))
            .await
            .unwrap();
        let patch = Patch::new().set("encrypted_api_key", json!("forged"));
        let err = f.repos.bindings.update(binding.id, &patch).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ImmutableField);
    }

    #[tokio::test]
    async fn private_without_owner_is_rejected() {
        let f = fixture(10).await;
        let err = f.service.create(None, &private_request("K")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn public_binding_has_no_key() {
        let f = fixture(10).await;
        let req: CreateBindingRequest = serde_json::from_value(json!({
            "name": "shared",
            "exchange_type": "kraken",
            "visibility": "public"
        }))
        .unwrap();
        let binding = f.service.create(Some(f.owner), &req).await.unwrap();
        assert_eq!(binding.user_id, None);
        assert_eq!(f.service.view(&binding).unwrap().api_key, None);
        assert!(f.service.credentials(binding.id).await.is_err());
    }

    #[tokio::test]
    async fn rotation_replaces_hash() {
        let f = fixture(10).await;
        let binding = f
            .service
            .create(Some(f.owner), &private_request("old-key-123"))
            .await
            .unwrap();
        let rotated = f
            .service
            .rotate(
                binding.id,
                &RotateCredentialsRequest {
                    api_key: "new-key-456".into(),
                    api_secret: "new-secret".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(rotated.api_key_hash(), Some(f.secrets.hash("new-key-456").as_str()));
        assert!(f.service.find_by_api_key("old-key-123").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn repeated_failures_disable_the_binding() {
        let f = fixture(3).await;
        let binding = f
            .service
            .create(Some(f.owner), &private_request("K"))
            .await
            .unwrap();

        assert!(!f.service.record_failure_and_maybe_disable(binding.id).await.unwrap());
        assert!(!f.service.record_failure_and_maybe_disable(binding.id).await.unwrap());
        assert!(f.service.record_failure_and_maybe_disable(binding.id).await.unwrap());

        let stored = f.repos.bindings.get_by_id(binding.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BindingStatus::Error);

        // Already disabled: no second transition.
        assert!(!f.service.record_failure_and_maybe_disable(binding.id).await.unwrap());
    }

    #[tokio::test]
    async fn success_resets_failures() {
        let f = fixture(3).await;
        let binding = f
            .service
            .create(Some(f.owner), &private_request("K"))
            .await
            .unwrap();
        f.service.record_failure_and_maybe_disable(binding.id).await.unwrap();
        f.service.record_success(binding.id).await.unwrap();

        let stored = f.repos.bindings.get_by_id(binding.id).await.unwrap().unwrap();
        assert_eq!(stored.failure_count, 0);
        assert!(stored.last_used_at.is_some());
    }
}
