use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use bytes::Bytes;
use http::{header::CONTENT_TYPE, HeaderValue, Method};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use url::Url;

use crate::{
    config::{ApiResource, Config},
    error::{ApiError, Error, LastApiError, Result},
    transport::HttpTransport,
};

/// Authenticate with the vendor API using client credentials.
///
/// Exchanges the client id and secret for an access token and keeps it until it
/// expires. The token is renewed lazily: the first caller asking for a token within
/// `refresh_tolerance` of its expiry triggers a new exchange. Concurrent callers wait
/// for that single exchange instead of starting their own.
/// If the token response does not contain `expiresIn`, the token is assumed to be
/// valid indefinitely.
///
/// Uses `Arc` internally for cheap cloning.
#[derive(Debug, Clone)]
pub struct Authenticator {
    inner: Arc<Inner>,
}

#[derive(veil::Redact)]
struct Inner {
    client_id: String,
    #[redact]
    secret: String,
    url: Url,
    transport: Arc<dyn HttpTransport>,
    max_retries: u32,
    retry_interval: Duration,
    tolerance: Duration,
    token: Mutex<Option<Token>>,
    api_error: LastApiError,
}

#[derive(veil::Redact, Clone)]
struct Token {
    #[redact]
    token: Arc<HeaderValue>,
    token_expiry: Option<Instant>,
}

impl Token {
    fn try_from_response(response: &TokenResponse) -> Result<Self> {
        HeaderValue::from_str(&response.token)
            .map_err(|_| Error::InvalidHeaderValue)
            .map(|mut token| {
                token.set_sensitive(true);
                Token {
                    token: Arc::new(token),
                    // Lifetimes beyond what `Instant` can represent never expire.
                    token_expiry: response
                        .expires_in
                        .and_then(|e| Instant::now().checked_add(Duration::from_secs(e))),
                }
            })
    }

    fn is_usable(&self, tolerance: Duration) -> bool {
        self.token_expiry.map_or(true, |expiry| {
            Instant::now()
                .checked_add(tolerance)
                .is_some_and(|deadline| deadline < expiry)
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AuthenticationRequest<'a> {
    client_id: &'a str,
    secret: &'a str,
}

#[derive(Deserialize, veil::Redact)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    #[redact]
    token: String,
    expires_in: Option<u64>,
}

impl Authenticator {
    /// Create an authenticator for the credentials in `config`.
    /// No token is requested until one is needed, see [`Authenticator::access_token`].
    ///
    /// # Errors
    /// Fails if the authentication URL cannot be built from `config`.
    pub fn new(config: &Config, transport: Arc<dyn HttpTransport>) -> Result<Self> {
        let url = config.url_for(ApiResource::Authentication)?;

        Ok(Self {
            inner: Arc::new(Inner {
                client_id: config.client_id.clone(),
                secret: config.client_secret.clone(),
                url,
                transport,
                max_retries: config.max_retries,
                retry_interval: config.retry_interval,
                tolerance: config.refresh_tolerance,
                token: Mutex::new(None),
                api_error: LastApiError::default(),
            }),
        })
    }

    /// Exchange the client credentials for a new token, replacing any stored token.
    ///
    /// # Errors
    /// - Returns [`Error::AuthenticationFailed`] if the vendor API rejects the credentials.
    /// - Returns an error if the request fails after all retries.
    pub async fn authenticate(&self) -> Result<()> {
        let mut guard = self.inner.token.lock().await;
        *guard = Some(self.inner.request_new_token().await?);
        Ok(())
    }

    /// Make sure a usable token is stored, authenticating if there is none
    /// or the stored one is about to expire.
    ///
    /// # Errors
    /// See [`authenticate`](Self::authenticate).
    pub async fn validate_authentication(&self) -> Result<()> {
        self.access_token().await.map(|_| ())
    }

    /// The current access token, authenticating first if required.
    ///
    /// # Errors
    /// See [`authenticate`](Self::authenticate).
    pub async fn access_token(&self) -> Result<Arc<HeaderValue>> {
        // Held across the exchange so concurrent callers share one request.
        let mut guard = self.inner.token.lock().await;

        if let Some(token) = guard.as_ref().filter(|t| t.is_usable(self.inner.tolerance)) {
            return Ok(token.token.clone());
        }

        tracing::debug!(
            "No valid token for client `{}`. Authenticating.",
            self.inner.client_id
        );
        // Drop the expired token before the exchange so a failure leaves nothing behind.
        *guard = None;
        let token = self.inner.request_new_token().await?;
        let header = token.token.clone();
        *guard = Some(token);
        Ok(header)
    }

    /// Whether a token is stored that is not about to expire.
    pub async fn is_authenticated(&self) -> bool {
        self.inner
            .token
            .lock()
            .await
            .as_ref()
            .is_some_and(|t| t.is_usable(self.inner.tolerance))
    }

    /// Drop the stored token. The next call to [`access_token`](Self::access_token)
    /// authenticates again.
    pub async fn invalidate(&self) {
        *self.inner.token.lock().await = None;
    }

    /// The error returned by the vendor API on the last failed authentication, if any.
    /// Cleared on successful authentication.
    #[must_use]
    pub fn api_error(&self) -> Option<ApiError> {
        self.inner.api_error.get()
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.inner.client_id
    }
}

impl Inner {
    fn build_request(&self) -> Result<http::Request<Bytes>> {
        let body = serde_json::to_vec(&AuthenticationRequest {
            client_id: &self.client_id,
            secret: &self.secret,
        })
        .map_err(|e| Error::parse(&e))?;

        Ok(http::Request::builder()
            .method(Method::POST)
            .uri(self.url.as_str())
            .header(CONTENT_TYPE, "application/json")
            .body(Bytes::from(body))?)
    }

    async fn request_new_token(&self) -> Result<Token> {
        let mut counter = 0;

        let token_response = loop {
            counter += 1;

            let error = match self.transport.send(self.build_request()?).await {
                Ok(response) if response.status().is_success() => {
                    let token_response: TokenResponse =
                        serde_json::from_slice(response.body()).map_err(|e| Error::parse(&e))?;
                    tracing::debug!(
                        "Successfully authenticated client `{}`",
                        self.client_id,
                    );
                    self.api_error.set(None);
                    break token_response;
                }
                Ok(response) => {
                    let api_error = ApiError::from_response(response.status(), response.body());
                    self.api_error.set(Some(api_error.clone()));
                    let error = Error::AuthenticationFailed(api_error);
                    if response.status().is_client_error() {
                        tracing::error!(
                            "Vendor API rejected credentials of client `{}`: {error}",
                            self.client_id
                        );
                        return Err(error);
                    }
                    error
                }
                Err(e) => e,
            };

            if counter > self.max_retries {
                tracing::error!("Failed to fetch token after {} retries: {error}", counter);
                return Err(error);
            };
            tracing::debug!(
                "Failed to fetch token: {error}. Retrying in {}ms",
                self.retry_interval.as_millis()
            );
            tokio::time::sleep(self.retry_interval).await;
        };

        Token::try_from_response(&token_response)
    }
}
