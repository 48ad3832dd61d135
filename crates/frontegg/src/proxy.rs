use bytes::Bytes;
use http::{
    header::{CONNECTION, HOST},
    HeaderMap, HeaderName, HeaderValue, Uri, Version,
};
use url::Url;

use crate::{
    client::{
        header_value, AuthorizedClient, ACCESS_TOKEN_HEADER, PERMISSIONS_HEADER, TENANT_ID_HEADER,
        USER_ID_HEADER, VENDOR_HOST_HEADER,
    },
    config::Context,
    error::{Error, Result},
};

/// Headers only meaningful for a single connection, never forwarded.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

const CORS_HEADER_PREFIX: &str = "access-control-";

/// Forwards requests received under [`Config::proxy_prefix`](crate::Config::proxy_prefix)
/// to the proxy endpoint of the vendor API.
///
/// The access token and the [`Context`] produced by the configured
/// [`ContextResolver`](crate::ContextResolver) are attached to every forwarded request.
/// Values for these headers sent by the caller are discarded. The vendor response is
/// returned as is, without `Access-Control-*` headers if CORS handling is disabled.
#[derive(Debug, Clone)]
pub struct Proxy {
    client: AuthorizedClient,
}

impl Proxy {
    pub(crate) fn new(client: AuthorizedClient) -> Self {
        Self { client }
    }

    /// Forward `request` to the vendor API and return its response.
    ///
    /// # Errors
    /// - Returns [`Error::Validation`] if the request path is not under the proxy prefix
    ///   or contains `.`/`..` segments.
    /// - Returns [`Error::InvalidHeaderValue`] if the resolved context cannot be sent as headers.
    /// - Returns an error if authentication or the request fails.
    #[tracing::instrument(skip_all, fields(method = %request.method(), path = request.uri().path()))]
    pub async fn forward(&self, request: http::Request<Bytes>) -> Result<http::Response<Bytes>> {
        let config = self.client.config();
        let context = config
            .context_resolver()
            .map(|resolver| resolver.resolve(&request))
            .unwrap_or_default();
        let target = self.target_url(request.uri())?;

        let (mut parts, body) = request.into_parts();
        let vendor_host = parts.headers.get(HOST).cloned().or_else(|| {
            parts
                .uri
                .authority()
                .and_then(|authority| HeaderValue::from_str(authority.as_str()).ok())
        });

        strip_hop_by_hop(&mut parts.headers);
        for name in [
            HOST,
            ACCESS_TOKEN_HEADER,
            TENANT_ID_HEADER,
            USER_ID_HEADER,
            PERMISSIONS_HEADER,
            VENDOR_HOST_HEADER,
        ] {
            parts.headers.remove(name);
        }
        insert_context(&mut parts.headers, &context)?;
        if let Some(vendor_host) = vendor_host {
            parts.headers.insert(VENDOR_HOST_HEADER, vendor_host);
        }

        tracing::debug!("Forwarding to {target}");
        parts.uri = target
            .as_str()
            .parse::<Uri>()
            .map_err(|e| Error::RequestBuild(e.to_string()))?;
        parts.version = Version::default();

        // A 401 here may concern the end user rather than the vendor token,
        // so it is returned as is and the request is never sent twice.
        let mut response = self
            .client
            .send_with_token(http::Request::from_parts(parts, body))
            .await?;

        strip_hop_by_hop(response.headers_mut());
        if config.disable_cors() {
            strip_cors(response.headers_mut());
        }
        tracing::debug!("Vendor API answered {}", response.status());
        Ok(response)
    }

    /// Vendor URL a request for `uri` is forwarded to.
    fn target_url(&self, uri: &Uri) -> Result<Url> {
        let config = self.client.config();
        let prefix = config.proxy_prefix().trim_end_matches('/');

        let rest = uri
            .path()
            .strip_prefix(prefix)
            .filter(|rest| rest.is_empty() || rest.starts_with('/'))
            .ok_or_else(|| {
                Error::Validation(format!(
                    "path `{}` is not under the proxy prefix `{}`",
                    uri.path(),
                    config.proxy_prefix()
                ))
            })?;
        if rest.split(['/', '\\']).any(is_dot_segment) {
            return Err(Error::Validation(format!(
                "path `{}` must not contain dot segments",
                uri.path()
            )));
        }

        let proxy_path = config.api_urls().proxy.trim_end_matches('/');
        let root = config.join_path(proxy_path)?;
        let root = root.path().trim_end_matches('/');
        let mut url = config.join_path(&format!("{proxy_path}{rest}"))?;
        let path = url.path();
        if path != root && !path.starts_with(&format!("{root}/")) {
            return Err(Error::Validation(format!(
                "path `{}` leaves the vendor proxy endpoint",
                uri.path()
            )));
        }
        url.set_query(uri.query());
        Ok(url)
    }
}

/// `.` and `..`, also percent-encoded, which URL parsing would resolve.
fn is_dot_segment(segment: &str) -> bool {
    let segment = segment.to_ascii_lowercase().replace("%2e", ".");
    segment == "." || segment == ".."
}

fn insert_context(headers: &mut HeaderMap, context: &Context) -> Result<()> {
    if let Some(tenant_id) = &context.tenant_id {
        headers.insert(TENANT_ID_HEADER, header_value(tenant_id)?);
    }
    if let Some(user_id) = &context.user_id {
        headers.insert(USER_ID_HEADER, header_value(user_id)?);
    }
    if !context.permissions.is_empty() {
        headers.insert(
            PERMISSIONS_HEADER,
            header_value(&context.permissions.join(","))?,
        );
    }
    Ok(())
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    // Headers named in `Connection` are hop-by-hop as well.
    let listed: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(*name);
    }
}

fn strip_cors(headers: &mut HeaderMap) {
    let cors: Vec<HeaderName> = headers
        .keys()
        .filter(|name| name.as_str().starts_with(CORS_HEADER_PREFIX))
        .cloned()
        .collect();
    for name in cors {
        headers.remove(name);
    }
}
