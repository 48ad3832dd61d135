use http::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use typed_builder::TypedBuilder;
use url::Url;

use crate::{
    audits::AuditLog,
    client::AuthorizedClient,
    config::ApiResource,
    error::{ApiError, Error, LastApiError, Result},
};

/// Default properties of an event, shown by every channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder)]
pub struct EventProperties {
    #[builder(setter(into))]
    pub title: String,
    #[builder(setter(into))]
    pub description: String,
    /// Additional properties referenced by event templates.
    #[builder(default)]
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BellSeverity {
    Info,
    Medium,
    High,
    Critical,
}

/// In-app notification.
#[derive(Debug, Clone, PartialEq, Serialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct BellChannel {
    #[builder(setter(into))]
    pub title: String,
    #[builder(setter(into))]
    pub body: String,
    /// Notify a single user instead of the whole tenant.
    #[builder(default, setter(into, strip_option))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[builder(default, setter(strip_option))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<BellSeverity>,
    #[builder(default, setter(into, strip_option))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// RFC 3339 timestamp after which the notification is hidden.
    #[builder(default, setter(into, strip_option))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<String>,
}

/// Browser push notification.
#[derive(Debug, Clone, PartialEq, Serialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct WebPushChannel {
    #[builder(setter(into))]
    pub title: String,
    #[builder(setter(into))]
    pub body: String,
    #[builder(default, setter(into, strip_option))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// Slack message, passed on to Slack's `chat.postMessage`.
#[derive(Debug, Clone, PartialEq, Serialize, TypedBuilder)]
pub struct SlackMessage {
    #[builder(setter(into))]
    pub text: String,
    #[builder(default, setter(strip_option))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocks: Option<Vec<Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlackChannel {
    pub chat_post_message_arguments: SlackMessage,
}

/// Channels an event is delivered to. Channels left unset are not used.
#[derive(Debug, Clone, Default, PartialEq, Serialize, TypedBuilder)]
pub struct ChannelConfiguration {
    /// Deliver to the webhooks configured for the event.
    #[builder(default)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub webhook: bool,
    #[builder(default, setter(strip_option))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bell: Option<BellChannel>,
    #[builder(default, setter(strip_option))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webpush: Option<WebPushChannel>,
    #[builder(default, setter(strip_option))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slack: Option<SlackChannel>,
    /// Also record the event as an audit log entry.
    #[builder(default, setter(strip_option))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit: Option<AuditLog>,
}

/// An event to trigger for a tenant.
#[derive(Debug, Clone, PartialEq, Serialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct TriggerOptions {
    #[builder(setter(into))]
    pub event_key: String,
    /// Sent as header, not as part of the body.
    #[builder(setter(into))]
    #[serde(skip)]
    pub tenant_id: String,
    pub properties: EventProperties,
    #[builder(default)]
    pub channels: ChannelConfiguration,
}

impl TriggerOptions {
    fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("event key", &self.event_key),
            ("tenant id", &self.tenant_id),
            ("title", &self.properties.title),
        ] {
            if value.trim().is_empty() {
                return Err(Error::Validation(format!("{name} must not be empty")));
            }
        }
        Ok(())
    }
}

/// Client for the event triggers resource of the vendor API.
#[derive(Debug, Clone)]
pub struct EventsClient {
    client: AuthorizedClient,
    url: Url,
    api_error: LastApiError,
}

impl EventsClient {
    pub(crate) fn new(client: AuthorizedClient) -> Result<Self> {
        let url = client.config().url_for(ApiResource::Events)?;
        Ok(Self {
            client,
            url,
            api_error: LastApiError::default(),
        })
    }

    /// Trigger an event.
    ///
    /// Returns `true` if the vendor API accepted the event and `false` if it
    /// rejected it. The rejection is available through [`api_error`](Self::api_error).
    /// The body of an accepting answer is ignored.
    ///
    /// # Errors
    /// - Returns [`Error::Validation`] if the event key, tenant id or title is empty.
    /// - Returns an error if authentication or the request fails.
    #[tracing::instrument(skip(self, options), fields(event_key = %options.event_key, tenant_id = %options.tenant_id))]
    pub async fn trigger(&self, options: &TriggerOptions) -> Result<bool> {
        options.validate()?;

        let result = self
            .client
            .send(
                Method::POST,
                &self.url,
                Some(options.tenant_id.as_str()),
                Some(options),
            )
            .await;
        self.api_error.record(&result);

        match result {
            Ok(_) => {
                tracing::debug!("Event triggered");
                Ok(true)
            }
            Err(Error::Api(e)) => {
                tracing::warn!("Vendor API rejected event: {e}");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// The error returned by the vendor API on the last rejected event, if any.
    #[must_use]
    pub fn api_error(&self) -> Option<ApiError> {
        self.api_error.get()
    }
}
