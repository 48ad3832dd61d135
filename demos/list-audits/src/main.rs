use frontegg::{
    audits::{AuditLog, AuditsQuery, Severity},
    events::{ChannelConfiguration, EventProperties, TriggerOptions},
    Config, FronteggClient,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), frontegg::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Reads FRONTEGG_CLIENT_ID, FRONTEGG_CLIENT_SECRET and optionally FRONTEGG_BASE_URL.
    let client = FronteggClient::new(Config::from_env()?)?;
    let tenant_id = std::env::args().nth(1).unwrap_or_else(|| "my-tenant".to_string());

    // The first call authenticates, later calls reuse the token until it expires.
    let page = client
        .audits()
        .get_audits(&AuditsQuery::builder().tenant_id(tenant_id.as_str()).count(10).build())
        .await?;
    tracing::info!("Tenant `{tenant_id}` has {} audit entries", page.total);
    for entry in &page.data {
        tracing::info!(
            "{} {}",
            entry.user.as_deref().unwrap_or("-"),
            entry.action.as_deref().unwrap_or("-")
        );
    }

    client
        .audits()
        .send_audit(
            &tenant_id,
            &AuditLog::builder()
                .user("demo@example.com")
                .action("Listed audits")
                .severity(Severity::Info)
                .build(),
        )
        .await?;

    let accepted = client
        .events()
        .trigger(
            &TriggerOptions::builder()
                .event_key("demo.audits-listed")
                .tenant_id(tenant_id.as_str())
                .properties(
                    EventProperties::builder()
                        .title("Audits listed")
                        .description("The demo listed the audit log")
                        .build(),
                )
                .channels(ChannelConfiguration::builder().webhook(true).build())
                .build(),
        )
        .await?;
    if !accepted {
        tracing::warn!("Event rejected: {:?}", client.events().api_error());
    }

    Ok(())
}
