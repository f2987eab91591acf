//! ACME account registration
//!
//! 👤 Creates a new account bound to an operator email and an account key.

use crate::acme::{AccountRegistration, AccountRequest, AcmeAuthority, AcmeEndpoints, AcmeError};
use std::sync::Arc;

/// Policy applied when the authority publishes terms of service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TermsOfService {
    /// Agree automatically; the service runs unattended
    #[default]
    AutoAccept,
    /// Refuse to register against an authority that publishes terms
    Decline,
}

/// 👤 Registers ACME accounts
///
/// Every call attempts a fresh registration. Callers that already hold a
/// registered account key skip the registrar entirely.
pub struct AccountRegistrar {
    authority: Arc<dyn AcmeAuthority>,
    terms: TermsOfService,
}

impl AccountRegistrar {
    pub fn new(authority: Arc<dyn AcmeAuthority>, terms: TermsOfService) -> Self {
        Self { authority, terms }
    }

    pub async fn register(
        &self,
        email: &str,
        account_key_pem: &str,
        endpoints: &AcmeEndpoints,
    ) -> Result<AccountRegistration, AcmeError> {
        let terms_of_service_agreed = match (&endpoints.terms_of_service, self.terms) {
            (Some(url), TermsOfService::AutoAccept) => {
                tracing::info!("📜 Accepting terms of service {}", url);
                true
            }
            (Some(url), TermsOfService::Decline) => {
                tracing::warn!("📜 Terms of service {} declined by policy", url);
                return Err(AcmeError::TermsDeclined(url.clone()));
            }
            (None, policy) => policy == TermsOfService::AutoAccept,
        };

        tracing::info!("👤 Registering ACME account for {}", email);
        let request = AccountRequest {
            email: email.to_string(),
            account_key_pem: account_key_pem.to_string(),
            terms_of_service_agreed,
        };

        let registration = self.authority.register_account(endpoints, &request).await?;
        tracing::info!("✅ ACME account for {} is {}", email, registration.status);
        Ok(registration)
    }
}
