use std::{collections::BTreeMap, fmt, sync::Arc, time::Duration};

use bytes::Bytes;
use figment::{
    providers::{Env, Serialized},
    Figment,
};
use serde::Deserialize;
use typed_builder::TypedBuilder;
use url::Url;

use crate::error::{Error, Result};

/// Default location of the vendor API.
pub const DEFAULT_BASE_URL: &str = "https://api.frontegg.com";
/// Prefix of environment variables read by [`Config::from_env`].
pub const ENV_PREFIX: &str = "FRONTEGG_";

const CREDENTIAL_KEYS: &[&str] = &["client_id", "client_secret"];

/// Vendor API resources addressed by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiResource {
    Authentication,
    Audits,
    Events,
    Proxy,
}

/// Paths of the vendor API resources, relative to [`Config::base_url`].
///
/// Every path must start with `/`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ApiUrls {
    pub authentication: String,
    pub audits: String,
    pub events: String,
    pub proxy: String,
}

impl Default for ApiUrls {
    fn default() -> Self {
        Self {
            authentication: "/auth/vendor".to_string(),
            audits: "/audits".to_string(),
            events: "/event/resources/triggers/v2".to_string(),
            proxy: "/frontegg".to_string(),
        }
    }
}

impl ApiUrls {
    #[must_use]
    pub fn path(&self, resource: ApiResource) -> &str {
        match resource {
            ApiResource::Authentication => &self.authentication,
            ApiResource::Audits => &self.audits,
            ApiResource::Events => &self.events,
            ApiResource::Proxy => &self.proxy,
        }
    }

    fn iter(&self) -> impl Iterator<Item = (ApiResource, &str)> {
        [
            ApiResource::Authentication,
            ApiResource::Audits,
            ApiResource::Events,
            ApiResource::Proxy,
        ]
        .into_iter()
        .map(|resource| (resource, self.path(resource)))
    }
}

/// Tenant and user an inbound request acts on behalf of.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Context {
    pub tenant_id: Option<String>,
    pub user_id: Option<String>,
    pub permissions: Vec<String>,
}

type ResolveFn = dyn Fn(&http::Request<Bytes>) -> Context + Send + Sync;

/// User supplied callback mapping an inbound request to its [`Context`].
///
/// Used by the [`Proxy`](crate::Proxy) to tell the vendor API which tenant
/// and user a forwarded request belongs to.
#[derive(Clone)]
pub struct ContextResolver(Arc<ResolveFn>);

impl ContextResolver {
    pub fn new<F>(resolve: F) -> Self
    where
        F: Fn(&http::Request<Bytes>) -> Context + Send + Sync + 'static,
    {
        Self(Arc::new(resolve))
    }

    #[must_use]
    pub fn resolve(&self, request: &http::Request<Bytes>) -> Context {
        (self.0)(request)
    }
}

impl fmt::Debug for ContextResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ContextResolver(..)")
    }
}

fn default_base_url() -> Url {
    Url::parse(DEFAULT_BASE_URL).expect("DEFAULT_BASE_URL is a valid URL")
}

/// Configuration of a [`FronteggClient`](crate::FronteggClient).
///
/// The following configurations are available:
/// * `client_id` / `client_secret`: Vendor credentials. Required.
/// * `base_url`: Location of the vendor API. Default is [`DEFAULT_BASE_URL`].
/// * `api_urls`: Per-resource path overrides. See [`ApiUrls`].
/// * `context_resolver`: Maps proxied requests to a tenant/user. Not set by default.
/// * `disable_cors`: Strip `Access-Control-*` headers from proxied responses. Default is `false`.
/// * `proxy_prefix`: Inbound path prefix removed by the proxy. Default is `/frontegg`.
/// * `max_retries`: Number of consecutive retries for token requests. Default is 3.
/// * `retry_interval`: Interval between consecutive retries. Default is 10ms.
/// * `refresh_tolerance`: Tokens are renewed this long before expiry. Default is 30 seconds.
/// * `timeout`: Request timeout of the default transport. Not set by default.
#[derive(Clone, TypedBuilder, veil::Redact)]
pub struct Config {
    #[builder(setter(into))]
    pub(crate) client_id: String,
    #[redact]
    #[builder(setter(into))]
    pub(crate) client_secret: String,
    #[builder(default = default_base_url())]
    pub(crate) base_url: Url,
    #[builder(default)]
    pub(crate) api_urls: ApiUrls,
    #[builder(default, setter(strip_option))]
    pub(crate) context_resolver: Option<ContextResolver>,
    #[builder(default)]
    pub(crate) disable_cors: bool,
    #[builder(default = "/frontegg".to_string(), setter(into))]
    pub(crate) proxy_prefix: String,
    #[builder(default = 3)]
    pub(crate) max_retries: u32,
    #[builder(default = Duration::from_millis(10))]
    pub(crate) retry_interval: Duration,
    #[builder(default = Duration::from_secs(30))]
    pub(crate) refresh_tolerance: Duration,
    #[builder(default, setter(strip_option))]
    pub(crate) timeout: Option<Duration>,
}

#[derive(Deserialize)]
struct EnvConfig {
    client_id: String,
    client_secret: String,
    base_url: Option<Url>,
    disable_cors: Option<bool>,
    proxy_prefix: Option<String>,
}

impl Config {
    /// Load the configuration from `FRONTEGG_*` environment variables.
    ///
    /// Reads `FRONTEGG_CLIENT_ID` and `FRONTEGG_CLIENT_SECRET` (required), and
    /// `FRONTEGG_BASE_URL`, `FRONTEGG_DISABLE_CORS`, `FRONTEGG_PROXY_PREFIX` (optional).
    /// All other settings keep their defaults.
    ///
    /// # Errors
    /// Fails if a required variable is missing, a value cannot be parsed, or
    /// the result does not pass [`Config::validate`].
    pub fn from_env() -> Result<Self> {
        let env = Env::prefixed(ENV_PREFIX);
        // `Env` parses values, which would turn `0042` into the number 42.
        let credentials: BTreeMap<String, String> = env
            .clone()
            .only(CREDENTIAL_KEYS)
            .iter()
            .map(|(key, value)| (key.to_string(), value))
            .collect();

        Self::from_figment(
            &Figment::new()
                .merge(env.ignore(CREDENTIAL_KEYS))
                .merge(Serialized::defaults(credentials)),
        )
    }

    fn from_figment(figment: &Figment) -> Result<Self> {
        let env: EnvConfig = figment.extract()?;

        let mut config = Config::builder()
            .client_id(env.client_id)
            .client_secret(env.client_secret)
            .build();
        if let Some(base_url) = env.base_url {
            config.base_url = base_url;
        }
        if let Some(disable_cors) = env.disable_cors {
            config.disable_cors = disable_cors;
        }
        if let Some(proxy_prefix) = env.proxy_prefix {
            config.proxy_prefix = proxy_prefix;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the vendor API can never accept.
    ///
    /// # Errors
    /// Fails with [`Error::Config`] on empty credentials, a base URL that is not
    /// an absolute `http(s)` URL, or resource paths not starting with `/`.
    pub fn validate(&self) -> Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(Error::Config("client id must not be empty".to_string()));
        }
        if self.client_secret.trim().is_empty() {
            return Err(Error::Config("client secret must not be empty".to_string()));
        }
        if self.base_url.cannot_be_a_base() || !matches!(self.base_url.scheme(), "http" | "https")
        {
            return Err(Error::Config(format!(
                "base url `{}` must be an absolute http(s) URL",
                self.base_url
            )));
        }
        for (resource, path) in self.api_urls.iter() {
            if !path.starts_with('/') {
                return Err(Error::Config(format!(
                    "path `{path}` of {resource:?} must start with `/`"
                )));
            }
        }
        if !self.proxy_prefix.starts_with('/') {
            return Err(Error::Config(format!(
                "proxy prefix `{}` must start with `/`",
                self.proxy_prefix
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    #[must_use]
    pub fn api_urls(&self) -> &ApiUrls {
        &self.api_urls
    }

    #[must_use]
    pub fn disable_cors(&self) -> bool {
        self.disable_cors
    }

    #[must_use]
    pub fn proxy_prefix(&self) -> &str {
        &self.proxy_prefix
    }

    #[must_use]
    pub fn context_resolver(&self) -> Option<&ContextResolver> {
        self.context_resolver.as_ref()
    }

    /// Absolute URL of a vendor API resource, honoring [`ApiUrls`] overrides.
    ///
    /// # Errors
    /// Fails if the joined URL cannot be parsed.
    pub fn url_for(&self, resource: ApiResource) -> Result<Url> {
        self.join_path(self.api_urls.path(resource))
    }

    /// Append `path` (and an optional query string) to the base URL.
    pub(crate) fn join_path(&self, path: &str) -> Result<Url> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{base}{path}"))?)
    }
}

#[cfg(test)]
mod tests {
    use figment::Jail;
    use pretty_assertions::assert_eq;

    use super::*;

    fn config() -> Config {
        Config::builder()
            .client_id("my-client")
            .client_secret("my-secret")
            .build()
    }

    #[test]
    fn test_defaults() {
        let config = config();
        assert_eq!(config.base_url().as_str(), "https://api.frontegg.com/");
        assert_eq!(config.proxy_prefix(), "/frontegg");
        assert!(!config.disable_cors());
        assert!(config.context_resolver().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_url_for_honors_overrides() {
        let config = Config::builder()
            .client_id("my-client")
            .client_secret("my-secret")
            .base_url("http://localhost:8080/api/".parse().unwrap())
            .api_urls(ApiUrls {
                audits: "/custom/audits".to_string(),
                ..ApiUrls::default()
            })
            .build();

        assert_eq!(
            config.url_for(ApiResource::Audits).unwrap().as_str(),
            "http://localhost:8080/api/custom/audits"
        );
        assert_eq!(
            config.url_for(ApiResource::Authentication).unwrap().as_str(),
            "http://localhost:8080/api/auth/vendor"
        );
        assert_eq!(
            config.url_for(ApiResource::Events).unwrap().as_str(),
            "http://localhost:8080/api/event/resources/triggers/v2"
        );
    }

    #[test]
    fn test_validate_rejects_empty_credentials() {
        let config = Config::builder()
            .client_id("")
            .client_secret("my-secret")
            .build();
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = Config::builder()
            .client_id("my-client")
            .client_secret("  ")
            .build();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_relative_paths() {
        let mut config = config();
        config.api_urls.events = "events".to_string();
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = self::config();
        config.base_url = "mailto:someone@example.com".parse().unwrap();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_secret_is_redacted() {
        let debug = format!("{:?}", config());
        assert!(debug.contains("my-client"));
        assert!(!debug.contains("my-secret"));
    }

    #[test]
    fn test_context_resolver() {
        let resolver = ContextResolver::new(|request| Context {
            tenant_id: request
                .headers()
                .get("x-tenant")
                .and_then(|v| v.to_str().ok())
                .map(ToString::to_string),
            ..Context::default()
        });
        let request = http::Request::builder()
            .header("x-tenant", "acme")
            .body(Bytes::new())
            .unwrap();
        assert_eq!(resolver.resolve(&request).tenant_id.as_deref(), Some("acme"));
    }

    #[test]
    fn test_from_env() {
        Jail::expect_with(|jail| {
            jail.set_env("FRONTEGG_CLIENT_ID", "env-client");
            jail.set_env("FRONTEGG_CLIENT_SECRET", "env-secret");
            jail.set_env("FRONTEGG_BASE_URL", "http://localhost:9000");
            jail.set_env("FRONTEGG_DISABLE_CORS", "true");

            let config = Config::from_env().unwrap();
            assert_eq!(config.client_id(), "env-client");
            assert_eq!(config.client_secret, "env-secret");
            assert_eq!(config.base_url().as_str(), "http://localhost:9000/");
            assert!(config.disable_cors());
            assert_eq!(config.proxy_prefix(), "/frontegg");
            Ok(())
        });
    }

    #[test]
    fn test_from_env_keeps_numeric_credentials() {
        Jail::expect_with(|jail| {
            jail.set_env("FRONTEGG_CLIENT_ID", "123456");
            jail.set_env("FRONTEGG_CLIENT_SECRET", "007");

            let config = Config::from_env().unwrap();
            assert_eq!(config.client_id(), "123456");
            assert_eq!(config.client_secret, "007");
            Ok(())
        });
    }

    #[test]
    fn test_from_env_rejects_unparseable_values() {
        Jail::expect_with(|jail| {
            jail.set_env("FRONTEGG_CLIENT_ID", "env-client");
            jail.set_env("FRONTEGG_CLIENT_SECRET", "env-secret");
            jail.set_env("FRONTEGG_DISABLE_CORS", "sometimes");
            assert!(matches!(Config::from_env(), Err(Error::Config(_))));

            jail.set_env("FRONTEGG_DISABLE_CORS", "false");
            jail.set_env("FRONTEGG_BASE_URL", "not a url");
            assert!(matches!(Config::from_env(), Err(Error::Config(_))));
            Ok(())
        });
    }

    #[test]
    fn test_from_env_requires_credentials() {
        Jail::expect_with(|jail| {
            jail.set_env("FRONTEGG_CLIENT_ID", "env-client");
            assert!(matches!(Config::from_env(), Err(Error::Config(_))));
            Ok(())
        });
    }
}
