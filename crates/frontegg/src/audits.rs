use std::collections::BTreeMap;

use http::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use typed_builder::TypedBuilder;
use url::Url;

use crate::{
    client::AuthorizedClient,
    config::ApiResource,
    error::{ApiError, Error, LastApiError, Result},
};

/// Severity of an audit log entry.
///
/// Severities this crate does not know are kept as [`Severity::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Medium,
    High,
    Critical,
    Error,
    #[serde(untagged)]
    Other(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    fn as_str(self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

/// An audit log entry.
///
/// The well-known fields are typed, everything else the vendor stores with an
/// entry (for example `createdAt` or custom fields) ends up in `properties`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct AuditLog {
    #[builder(default, setter(into, strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[builder(default, setter(into, strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[builder(default, setter(into, strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[builder(default, setter(strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[builder(default, setter(into, strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[builder(default)]
    #[serde(flatten)]
    pub properties: Map<String, Value>,
}

/// Filter, sort order and page of an audit listing.
#[derive(Debug, Clone, TypedBuilder)]
pub struct AuditsQuery {
    #[builder(setter(into))]
    pub tenant_id: String,
    /// Free text search over the entries.
    #[builder(default, setter(into, strip_option))]
    pub filter: Option<String>,
    #[builder(default = "createdAt".to_string(), setter(into))]
    pub sort_by: String,
    #[builder(default)]
    pub sort_direction: SortDirection,
    #[builder(default = 0)]
    pub offset: u64,
    #[builder(default = 50)]
    pub count: u64,
    /// Additional field filters, for example `action=Updated user`.
    #[builder(default)]
    pub filters: BTreeMap<String, String>,
}

impl AuditsQuery {
    fn apply(&self, url: &mut Url) {
        let mut pairs = url.query_pairs_mut();
        if let Some(filter) = &self.filter {
            pairs.append_pair("filter", filter);
        }
        pairs
            .append_pair("sortBy", &self.sort_by)
            .append_pair("sortDirection", self.sort_direction.as_str())
            .append_pair("offset", &self.offset.to_string())
            .append_pair("count", &self.count.to_string());
        for (key, value) in &self.filters {
            pairs.append_pair(key, value);
        }
    }
}

/// One page of audit log entries.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AuditsPage {
    #[serde(default)]
    pub data: Vec<AuditLog>,
    #[serde(default)]
    pub total: u64,
}

/// Client for the audits resource of the vendor API.
#[derive(Debug, Clone)]
pub struct AuditsClient {
    client: AuthorizedClient,
    url: Url,
    api_error: LastApiError,
}

impl AuditsClient {
    pub(crate) fn new(client: AuthorizedClient) -> Result<Self> {
        let url = client.config().url_for(ApiResource::Audits)?;
        Ok(Self {
            client,
            url,
            api_error: LastApiError::default(),
        })
    }

    /// List the audit log entries of a tenant.
    ///
    /// # Errors
    /// - Returns [`Error::Validation`] if the tenant id is empty.
    /// - Returns [`Error::Api`] if the vendor API rejects the query.
    /// - Returns an error if authentication or the request fails.
    #[tracing::instrument(skip(self, query), fields(tenant_id = %query.tenant_id))]
    pub async fn get_audits(&self, query: &AuditsQuery) -> Result<AuditsPage> {
        require_tenant(&query.tenant_id)?;

        let mut url = self.url.clone();
        query.apply(&mut url);

        let result = self
            .client
            .send_json::<(), Option<AuditsPage>>(
                Method::GET,
                &url,
                Some(query.tenant_id.as_str()),
                None,
            )
            .await
            .map(Option::unwrap_or_default);
        self.api_error.record(&result);
        result
    }

    /// Store a new audit log entry for a tenant.
    /// Returns the entry as stored by the vendor, if the vendor echoes it.
    ///
    /// # Errors
    /// - Returns [`Error::Validation`] if the tenant id is empty.
    /// - Returns [`Error::Api`] if the vendor API rejects the entry.
    /// - Returns an error if authentication or the request fails.
    #[tracing::instrument(skip(self, audit))]
    pub async fn send_audit(&self, tenant_id: &str, audit: &AuditLog) -> Result<Option<AuditLog>> {
        require_tenant(tenant_id)?;

        let result = self
            .client
            .send_json(Method::POST, &self.url, Some(tenant_id), Some(audit))
            .await;
        if let Err(e) = &result {
            tracing::warn!("Failed to send audit: {e}");
        }
        self.api_error.record(&result);
        result
    }

    /// The error returned by the vendor API on the last failed call, if any.
    #[must_use]
    pub fn api_error(&self) -> Option<ApiError> {
        self.api_error.get()
    }
}

fn require_tenant(tenant_id: &str) -> Result<()> {
    if tenant_id.trim().is_empty() {
        return Err(Error::Validation("tenant id must not be empty".to_string()));
    }
    Ok(())
}
