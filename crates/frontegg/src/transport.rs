use std::{fmt::Debug, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// Sends a fully built HTTP request and returns the raw response.
///
/// Implementations must not treat non-2xx statuses as errors: callers inspect the
/// status themselves. Errors are reserved for requests that never produced a response.
#[async_trait]
pub trait HttpTransport: Debug + Send + Sync {
    /// Send `request` and collect the whole response body.
    ///
    /// # Errors
    /// Fails if the request cannot be sent or the response body cannot be read.
    async fn send(&self, request: http::Request<Bytes>) -> Result<http::Response<Bytes>>;
}

/// [`HttpTransport`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Creates a transport with redirects disabled and an optional request timeout.
    ///
    /// # Errors
    /// Fails if a TLS backend cannot be initialized, or the resolver
    /// cannot load the system configuration.
    pub fn new(timeout: Option<Duration>) -> Result<Self> {
        let mut builder = reqwest::Client::builder().redirect(reqwest::redirect::Policy::none());
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
        })
    }

    /// Use a custom `reqwest::Client`.
    /// Please make sure to set the `redirect` policy to `Policy::none()`
    /// to prevent SSRF vulnerabilities.
    #[must_use]
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: http::Request<Bytes>) -> Result<http::Response<Bytes>> {
        let request = reqwest::Request::try_from(request)?;
        tracing::trace!("Sending {} {}", request.method(), request.url());

        let response = self.client.execute(request).await?;

        let mut builder = http::Response::builder()
            .status(response.status())
            .version(response.version());
        if let Some(headers) = builder.headers_mut() {
            headers.extend(
                response
                    .headers()
                    .iter()
                    .map(|(name, value)| (name.clone(), value.clone())),
            );
        }
        let body = response.bytes().await?;

        Ok(builder.body(body)?)
    }
}
