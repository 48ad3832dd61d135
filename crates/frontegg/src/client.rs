use std::sync::Arc;

use bytes::Bytes;
use http::{
    header::{ACCEPT, CONTENT_TYPE},
    HeaderName, HeaderValue, Method, StatusCode,
};
use serde::{de::DeserializeOwned, Serialize};
use url::Url;

use crate::{
    audits::AuditsClient,
    authenticator::Authenticator,
    config::Config,
    error::{ApiError, Error, Result},
    events::EventsClient,
    proxy::Proxy,
    transport::{HttpTransport, ReqwestTransport},
};

/// Header carrying the vendor access token.
pub const ACCESS_TOKEN_HEADER: HeaderName = HeaderName::from_static("x-access-token");
/// Header naming the tenant a call acts on.
pub const TENANT_ID_HEADER: HeaderName = HeaderName::from_static("frontegg-tenant-id");
/// Header naming the user a proxied call acts on.
pub const USER_ID_HEADER: HeaderName = HeaderName::from_static("frontegg-user-id");
/// Header listing the permissions of the user of a proxied call.
pub const PERMISSIONS_HEADER: HeaderName = HeaderName::from_static("frontegg-permissions");
/// Header carrying the host the proxied request was originally sent to.
pub const VENDOR_HOST_HEADER: HeaderName = HeaderName::from_static("frontegg-vendor-host");

/// Entry point of this crate: owns the configuration, transport and authenticator
/// shared by the [`AuditsClient`], [`EventsClient`] and [`Proxy`].
///
/// Uses `Arc` internally for cheap cloning.
#[derive(Debug, Clone)]
pub struct FronteggClient {
    authorized: AuthorizedClient,
    audits: AuditsClient,
    events: EventsClient,
    proxy: Proxy,
}

impl FronteggClient {
    /// Creates a client using a `reqwest` transport with redirects disabled.
    ///
    /// # Errors
    /// Fails if `config` does not pass [`Config::validate`] or the transport cannot be built.
    pub fn new(config: Config) -> Result<Self> {
        let transport = ReqwestTransport::new(config.timeout)?;
        Self::with_transport(config, Arc::new(transport))
    }

    /// Creates a client sending all requests through `transport`.
    ///
    /// # Errors
    /// Fails if `config` does not pass [`Config::validate`].
    pub fn with_transport(config: Config, transport: Arc<dyn HttpTransport>) -> Result<Self> {
        config.validate()?;
        let authenticator = Authenticator::new(&config, transport.clone())?;
        let authorized = AuthorizedClient {
            config: Arc::new(config),
            transport,
            authenticator,
        };

        Ok(Self {
            audits: AuditsClient::new(authorized.clone())?,
            events: EventsClient::new(authorized.clone())?,
            proxy: Proxy::new(authorized.clone()),
            authorized,
        })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.authorized.config
    }

    #[must_use]
    pub fn authenticator(&self) -> &Authenticator {
        &self.authorized.authenticator
    }

    #[must_use]
    pub fn audits(&self) -> &AuditsClient {
        &self.audits
    }

    #[must_use]
    pub fn events(&self) -> &EventsClient {
        &self.events
    }

    #[must_use]
    pub fn proxy(&self) -> &Proxy {
        &self.proxy
    }

    /// Client for vendor API calls not covered by the resource clients.
    #[must_use]
    pub fn authorized(&self) -> &AuthorizedClient {
        &self.authorized
    }
}

/// Sends requests to the vendor API, adding the access token header
/// while keeping it up-to-date using an [`Authenticator`].
#[derive(Debug, Clone)]
pub struct AuthorizedClient {
    config: Arc<Config>,
    transport: Arc<dyn HttpTransport>,
    authenticator: Authenticator,
}

impl AuthorizedClient {
    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    /// Execute a `Request`, adding the access token header if it is not already set.
    ///
    /// If the vendor API answers `401 Unauthorized` to a request carrying the managed token,
    /// the token is dropped and the request is sent once more with a fresh one.
    ///
    /// # Errors
    /// - Returns an error if the authenticator fails to provide a token.
    /// - Returns an error if the request fails. Non-2xx responses are returned, not errors.
    pub async fn execute(&self, request: http::Request<Bytes>) -> Result<http::Response<Bytes>> {
        if request.headers().contains_key(&ACCESS_TOKEN_HEADER) {
            return self.transport.send(request).await;
        }

        let retry = copy_request(&request);
        let response = self.send_with_token(request).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        tracing::debug!(
            "Vendor API rejected the token of client `{}`. Authenticating again.",
            self.authenticator.client_id()
        );
        self.authenticator.invalidate().await;
        self.send_with_token(retry).await
    }

    /// Send `request` with the managed token, without retrying on `401 Unauthorized`.
    pub(crate) async fn send_with_token(
        &self,
        mut request: http::Request<Bytes>,
    ) -> Result<http::Response<Bytes>> {
        let token = self.authenticator.access_token().await?;
        request
            .headers_mut()
            .insert(ACCESS_TOKEN_HEADER, Arc::unwrap_or_clone(token));
        self.transport.send(request).await
    }

    /// Send a JSON call and decode the JSON answer.
    /// Non-2xx responses are turned into [`Error::Api`].
    pub(crate) async fn send_json<B, T>(
        &self,
        method: Method,
        url: &Url,
        tenant_id: Option<&str>,
        body: Option<&B>,
    ) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = self.send(method, url, tenant_id, body).await?;

        // Some endpoints answer 201/204 without a body.
        let body: &[u8] = if body.is_empty() { b"null" } else { &body };
        serde_json::from_slice(body).map_err(|e| Error::parse(&e))
    }

    /// Send a JSON call and return the raw body of a 2xx answer.
    /// Non-2xx responses are turned into [`Error::Api`].
    pub(crate) async fn send<B>(
        &self,
        method: Method,
        url: &Url,
        tenant_id: Option<&str>,
        body: Option<&B>,
    ) -> Result<Bytes>
    where
        B: Serialize + ?Sized,
    {
        let mut builder = http::Request::builder()
            .method(method)
            .uri(url.as_str())
            .header(ACCEPT, "application/json");
        if let Some(tenant_id) = tenant_id {
            builder = builder.header(TENANT_ID_HEADER, header_value(tenant_id)?);
        }
        let body = match body {
            Some(body) => {
                builder = builder.header(CONTENT_TYPE, "application/json");
                Bytes::from(serde_json::to_vec(body).map_err(|e| Error::parse(&e))?)
            }
            None => Bytes::new(),
        };

        let response = self.execute(builder.body(body)?).await?;
        if !response.status().is_success() {
            return Err(Error::Api(ApiError::from_response(
                response.status(),
                response.body(),
            )));
        }
        Ok(response.into_body())
    }
}

pub(crate) fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|_| Error::InvalidHeaderValue)
}

fn copy_request(request: &http::Request<Bytes>) -> http::Request<Bytes> {
    let mut copy = http::Request::new(request.body().clone());
    *copy.method_mut() = request.method().clone();
    *copy.uri_mut() = request.uri().clone();
    *copy.version_mut() = request.version();
    *copy.headers_mut() = request.headers().clone();
    copy
}
