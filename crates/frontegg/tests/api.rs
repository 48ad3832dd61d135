use std::collections::BTreeMap;

use frontegg::{
    audits::{AuditLog, AuditsQuery, Severity, SortDirection},
    events::{BellChannel, ChannelConfiguration, EventProperties, TriggerOptions},
    ApiError, Config, Error, FronteggClient,
};
use http::header::CONTENT_TYPE;
use mockito::Matcher;
use pretty_assertions::assert_eq;
use serde_json::json;
use tracing_test::traced_test;

fn client(server: &mockito::Server) -> FronteggClient {
    let config = Config::builder()
        .client_id("my-client")
        .client_secret("my-secret")
        .base_url(server.url().parse().unwrap())
        .build();
    FronteggClient::new(config).unwrap()
}

async fn token_mock(server: &mut mockito::Server, expect: usize) -> mockito::Mock {
    server
        .mock("POST", "/auth/vendor")
        .match_body(Matcher::Json(json!({
            "clientId": "my-client",
            "secret": "my-secret"
        })))
        .with_status(200)
        .with_header(CONTENT_TYPE.as_str(), "application/json")
        .with_body(json!({"token": "my-issued-token", "expiresIn": 3600}).to_string())
        .expect(expect)
        .create_async()
        .await
}

#[tokio::test]
#[traced_test]
async fn test_get_audits() {
    let mut server = mockito::Server::new_async().await;
    let token = token_mock(&mut server, 1).await;
    let audits = server
        .mock("GET", "/audits")
        .match_header("x-access-token", "my-issued-token")
        .match_header("frontegg-tenant-id", "my-tenant")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("filter".into(), "login".into()),
            Matcher::UrlEncoded("sortBy".into(), "createdAt".into()),
            Matcher::UrlEncoded("sortDirection".into(), "asc".into()),
            Matcher::UrlEncoded("offset".into(), "0".into()),
            Matcher::UrlEncoded("count".into(), "2".into()),
            Matcher::UrlEncoded("action".into(), "Logged in".into()),
        ]))
        .with_status(200)
        .with_header(CONTENT_TYPE.as_str(), "application/json")
        .with_body(
            json!({
                "data": [
                    {"user": "jane@example.com", "action": "Logged in", "severity": "Info"},
                    {"user": "john@example.com", "action": "Logged in", "severity": "Info"}
                ],
                "total": 7
            })
            .to_string(),
        )
        .expect(2)
        .create_async()
        .await;

    let client = client(&server);
    let query = AuditsQuery::builder()
        .tenant_id("my-tenant")
        .filter("login")
        .sort_direction(SortDirection::Asc)
        .count(2)
        .filters(BTreeMap::from([(
            "action".to_string(),
            "Logged in".to_string(),
        )]))
        .build();

    let page = client.audits().get_audits(&query).await.unwrap();
    assert_eq!(page.total, 7);
    assert_eq!(page.data.len(), 2);
    assert_eq!(page.data[1].user.as_deref(), Some("john@example.com"));
    assert_eq!(page.data[0].severity, Some(Severity::Info));

    // The token is reused for the second call.
    client.audits().get_audits(&query).await.unwrap();

    token.assert_async().await;
    audits.assert_async().await;
}

#[tokio::test]
#[traced_test]
async fn test_send_audit() {
    let mut server = mockito::Server::new_async().await;
    let _token = token_mock(&mut server, 1).await;
    let mock = server
        .mock("POST", "/audits")
        .match_header("x-access-token", "my-issued-token")
        .match_header("frontegg-tenant-id", "my-tenant")
        .match_header("content-type", "application/json")
        .match_body(Matcher::Json(json!({
            "user": "jane@example.com",
            "resource": "Portal",
            "action": "Updated profile",
            "severity": "Medium",
            "ip": "10.0.0.1"
        })))
        .with_status(201)
        .with_header(CONTENT_TYPE.as_str(), "application/json")
        .with_body(
            json!({
                "user": "jane@example.com",
                "action": "Updated profile",
                "createdAt": "2024-05-01T10:00:00Z"
            })
            .to_string(),
        )
        .create_async()
        .await;

    let client = client(&server);
    let audit = AuditLog::builder()
        .user("jane@example.com")
        .resource("Portal")
        .action("Updated profile")
        .severity(Severity::Medium)
        .ip("10.0.0.1")
        .build();

    let stored = client
        .audits()
        .send_audit("my-tenant", &audit)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.properties["createdAt"], json!("2024-05-01T10:00:00Z"));
    assert!(client.audits().api_error().is_none());

    mock.assert_async().await;
}

#[tokio::test]
#[traced_test]
async fn test_rejected_audit_is_captured() {
    let mut server = mockito::Server::new_async().await;
    let _token = token_mock(&mut server, 1).await;
    let _mock = server
        .mock("POST", "/audits")
        .with_status(400)
        .with_header(CONTENT_TYPE.as_str(), "application/json")
        .with_body(json!({"errors": ["severity is invalid"]}).to_string())
        .create_async()
        .await;

    let client = client(&server);
    let error = client
        .audits()
        .send_audit("my-tenant", &AuditLog::default())
        .await
        .unwrap_err();

    let expected = ApiError {
        status: 400,
        message: "severity is invalid".to_string(),
    };
    assert!(matches!(error, Error::Api(ref e) if *e == expected));
    assert_eq!(client.audits().api_error(), Some(expected));
}

#[tokio::test]
#[traced_test]
async fn test_empty_tenant_makes_no_request() {
    let mut server = mockito::Server::new_async().await;
    let token = token_mock(&mut server, 0).await;

    let client = client(&server);
    let query = AuditsQuery::builder().tenant_id("").build();
    assert!(matches!(
        client.audits().get_audits(&query).await,
        Err(Error::Validation(_))
    ));

    token.assert_async().await;
}

fn trigger_options() -> TriggerOptions {
    TriggerOptions::builder()
        .event_key("invoice.paid")
        .tenant_id("my-tenant")
        .properties(
            EventProperties::builder()
                .title("Invoice paid")
                .description("Invoice 42 was paid")
                .build(),
        )
        .channels(
            ChannelConfiguration::builder()
                .bell(
                    BellChannel::builder()
                        .title("Invoice paid")
                        .body("Invoice 42 was paid")
                        .user_id("my-user")
                        .build(),
                )
                .build(),
        )
        .build()
}

#[tokio::test]
#[traced_test]
async fn test_trigger_event() {
    let mut server = mockito::Server::new_async().await;
    let _token = token_mock(&mut server, 1).await;
    let mock = server
        .mock("POST", "/event/resources/triggers/v2")
        .match_header("x-access-token", "my-issued-token")
        .match_header("frontegg-tenant-id", "my-tenant")
        .match_body(Matcher::Json(json!({
            "eventKey": "invoice.paid",
            "properties": {
                "title": "Invoice paid",
                "description": "Invoice 42 was paid"
            },
            "channels": {
                "bell": {
                    "title": "Invoice paid",
                    "body": "Invoice 42 was paid",
                    "userId": "my-user"
                }
            }
        })))
        .with_status(200)
        .with_header(CONTENT_TYPE.as_str(), "application/json")
        .with_body(json!({"eventId": "abc"}).to_string())
        .create_async()
        .await;

    let client = client(&server);
    assert!(client.events().trigger(&trigger_options()).await.unwrap());
    assert!(client.events().api_error().is_none());

    mock.assert_async().await;
}

#[tokio::test]
#[traced_test]
async fn test_plain_text_acknowledgement_is_accepted() {
    let mut server = mockito::Server::new_async().await;
    let _token = token_mock(&mut server, 1).await;
    let mock = server
        .mock("POST", "/event/resources/triggers/v2")
        .with_status(202)
        .with_header(CONTENT_TYPE.as_str(), "text/plain")
        .with_body("Accepted")
        .create_async()
        .await;

    let client = client(&server);
    assert!(client.events().trigger(&trigger_options()).await.unwrap());
    assert!(client.events().api_error().is_none());

    mock.assert_async().await;
}

#[tokio::test]
#[traced_test]
async fn test_rejected_event_returns_false() {
    let mut server = mockito::Server::new_async().await;
    let _token = token_mock(&mut server, 1).await;
    let _mock = server
        .mock("POST", "/event/resources/triggers/v2")
        .with_status(404)
        .with_header(CONTENT_TYPE.as_str(), "application/json")
        .with_body(json!({"errors": ["Event key not found"]}).to_string())
        .create_async()
        .await;

    let client = client(&server);
    assert!(!client.events().trigger(&trigger_options()).await.unwrap());
    assert_eq!(
        client.events().api_error(),
        Some(ApiError {
            status: 404,
            message: "Event key not found".to_string()
        })
    );
}

#[tokio::test]
#[traced_test]
async fn test_trigger_fails_when_authentication_fails() {
    let mut server = mockito::Server::new_async().await;
    let _token = server
        .mock("POST", "/auth/vendor")
        .with_status(401)
        .with_body(json!({"message": "Invalid client"}).to_string())
        .create_async()
        .await;

    let client = client(&server);
    let error = client.events().trigger(&trigger_options()).await.unwrap_err();
    assert!(matches!(error, Error::AuthenticationFailed(_)));
    assert_eq!(
        client.authenticator().api_error().map(|e| e.message),
        Some("Invalid client".to_string())
    );
}
