use gcp_auth::TokenProvider;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::error::AssistantError;

pub const ACCESS_TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";
pub const CREDENTIALS_ENV: &str = "GOOGLE_APPLICATION_CREDENTIALS";
pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

enum TokenSource {
    Static(String),
    /// Service-account file, metadata server or gcloud user credentials, resolved on first use.
    DefaultCredentials(OnceCell<Arc<dyn TokenProvider>>),
}

/// Supplies OAuth bearer tokens for the Google Cloud REST APIs.
///
/// A token exported in `GOOGLE_OAUTH_ACCESS_TOKEN` wins. Otherwise application default
/// credentials are used, which honour `GOOGLE_APPLICATION_CREDENTIALS`.
pub struct AccessTokenProvider {
    source: TokenSource,
}

impl AccessTokenProvider {
    pub fn from_env() -> Self {
        let provider = Self::from_token(std::env::var(ACCESS_TOKEN_ENV).ok());

        match &provider.source {
            TokenSource::Static(_) => info!("Using access token from {}", ACCESS_TOKEN_ENV),
            TokenSource::DefaultCredentials(_) => {
                if let Ok(service_account_path) = std::env::var(CREDENTIALS_ENV) {
                    info!("Using service account credentials from {}", service_account_path);
                } else {
                    info!("Using application default credentials");
                }
            }
        }

        provider
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            source: TokenSource::Static(token.into()),
        }
    }

    fn from_token(token: Option<String>) -> Self {
        match token.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()) {
            Some(token) => Self::with_token(token),
            None => Self {
                source: TokenSource::DefaultCredentials(OnceCell::new()),
            },
        }
    }

    pub async fn token(&self) -> Result<String, AssistantError> {
        let cell = match &self.source {
            TokenSource::Static(token) => return Ok(token.clone()),
            TokenSource::DefaultCredentials(cell) => cell,
        };

        let provider = cell
            .get_or_try_init(|| async {
                debug!("Resolving application default credentials");
                gcp_auth::provider().await.map_err(auth_error)
            })
            .await?;

        // the provider caches tokens and refreshes them before expiry
        let token = provider
            .token(&[CLOUD_PLATFORM_SCOPE])
            .await
            .map_err(auth_error)?;

        Ok(token.as_str().to_string())
    }
}

fn auth_error(err: gcp_auth::Error) -> AssistantError {
    AssistantError::AuthError {
        message: format!(
            "No usable Google credentials (set {} or {}): {}",
            CREDENTIALS_ENV, ACCESS_TOKEN_ENV, err
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_token_is_returned_without_credentials_lookup() {
        let provider = AccessTokenProvider::with_token("ya29.test");
        assert_eq!(provider.token().await.unwrap(), "ya29.test");
    }

    #[test]
    fn test_blank_token_falls_back_to_default_credentials() {
        for token in [None, Some("   \n".to_string())] {
            let provider = AccessTokenProvider::from_token(token);
            assert!(matches!(provider.source, TokenSource::DefaultCredentials(_)));
        }

        let provider = AccessTokenProvider::from_token(Some(" ya29.padded \n".to_string()));
        assert!(matches!(provider.source, TokenSource::Static(ref t) if t == "ya29.padded"));
    }
}
