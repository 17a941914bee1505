//! First-credential seeding.
//!
//! Login needs an existing API key and key management needs a token, so a
//! fresh deployment gets its first credential from [`BootstrapConfig`].
//! Seeding is idempotent across restarts and replicas sharing one store.

use secrecy::ExposeSecret;
use tollgate_core::{hash_api_key, StoreError};
use tollgate_storage::CredentialStore;

use crate::config::BootstrapConfig;
use crate::constants::MIN_BOOTSTRAP_KEY_LENGTH;
use crate::error::{ApiError, ApiResult};

/// Create the bootstrap credential unless its key is already registered.
///
/// Returns `true` only when this call created it. A key registered earlier
/// keeps its state, so a deactivated bootstrap key stays deactivated.
pub async fn seed_bootstrap_credential(
    credentials: &dyn CredentialStore,
    config: &BootstrapConfig,
) -> ApiResult<bool> {
    let Some(api_key) = config.api_key.as_ref() else {
        return Ok(false);
    };
    let raw_key = api_key.expose_secret();
    if raw_key.len() < MIN_BOOTSTRAP_KEY_LENGTH {
        return Err(ApiError::invalid_input(format!(
            "TOLLGATE_BOOTSTRAP_API_KEY must be at least {} characters",
            MIN_BOOTSTRAP_KEY_LENGTH
        )));
    }

    match credentials
        .create(
            &config.subject_id,
            &hash_api_key(raw_key),
            "bootstrap",
            config.tier,
            None,
        )
        .await
    {
        Ok(credential) => {
            tracing::info!(
                subject_id = %config.subject_id,
                tier = %config.tier,
                credential_id = %credential.id,
                "Seeded bootstrap credential"
            );
            Ok(true)
        }
        Err(StoreError::Conflict { .. }) => {
            tracing::debug!(subject_id = %config.subject_id, "Bootstrap credential already registered");
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}
