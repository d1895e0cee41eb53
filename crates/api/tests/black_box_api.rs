use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use inflow_auth::{JwtClaims, Role};
use inflow_core::UserId;
use inflow_infra::gateway::ScriptedGateway;
use inflow_infra::{Backends, Engine, EngineConfig};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{Value, json};

const SECRET: &str = "test-secret";

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Same router as prod over in-memory stores, bound to an ephemeral port.
        let engine = Engine::new(
            EngineConfig::default(),
            Backends::in_memory(Arc::new(ScriptedGateway::new())),
        );
        let app = inflow_api::app::build_router(engine, SECRET);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, handle }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn mint_jwt(roles: Vec<Role>) -> String {
    let now = Utc::now();
    let claims = JwtClaims {
        sub: UserId::new(),
        roles,
        issued_at: now,
        expires_at: now + ChronoDuration::minutes(10),
    };

    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .expect("failed to encode jwt")
}

async fn expect_status(res: reqwest::Response, expected: StatusCode) -> Value {
    let status = res.status();
    let body = res.text().await.unwrap_or_default();
    assert_eq!(status, expected, "unexpected status, body={body}");
    serde_json::from_str(&body).unwrap_or(Value::Null)
}

/// Buyer inquiry with one sample line, quoted by the admin. Returns the
/// inquiry and sample order ids.
async fn quoted_inquiry(
    srv: &TestServer,
    client: &reqwest::Client,
    buyer: &str,
    admin: &str,
) -> (String, String) {
    let res = client
        .post(srv.url("/inquiries"))
        .bearer_auth(buyer)
        .json(&json!({
            "title": "Hoodie sample",
            "currency": "USD",
            "quantity": 500,
            "sample_items": [{ "size": "M", "color": "black", "qty": 2 }],
        }))
        .send()
        .await
        .unwrap();
    let created = expect_status(res, StatusCode::CREATED).await;
    let inquiry_id = created["inquiry"]["id"].as_str().unwrap().to_string();
    let order_id = created["sample_order"]["id"].as_str().unwrap().to_string();

    let res = client
        .post(srv.url(&format!("/inquiries/{inquiry_id}/quotation")))
        .bearer_auth(admin)
        .json(&json!({
            "quotations": [
                { "type": "sample", "price": "20", "lead_time_days": 7 },
                { "type": "bulk", "price": "12", "lead_time_days": 30 },
            ],
        }))
        .send()
        .await
        .unwrap();
    expect_status(res, StatusCode::OK).await;

    (inquiry_id, order_id)
}

#[tokio::test]
async fn health_is_public() {
    let srv = TestServer::spawn().await;
    let res = reqwest::get(format!("{}/health", srv.base_url)).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn auth_required_for_protected_endpoints() {
    let srv = TestServer::spawn().await;

    let client = reqwest::Client::new();
    let res = client.get(srv.url("/whoami")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .get(srv.url("/whoami"))
        .bearer_auth("not-a-jwt")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    // A valid signature without a known role is still refused.
    let res = client
        .get(srv.url("/whoami"))
        .bearer_auth(mint_jwt(vec![Role::new("auditor")]))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn actor_is_derived_from_token() {
    let srv = TestServer::spawn().await;
    let token = mint_jwt(vec![Role::BUYER, Role::ADMIN]);

    let res = reqwest::Client::new()
        .get(srv.url("/whoami"))
        .bearer_auth(token)
        .send()
        .await
        .unwrap();

    let body = expect_status(res, StatusCode::OK).await;
    assert_eq!(body["role"], "admin");
    assert!(body["user_id"].as_str().is_some());
}

#[tokio::test]
async fn sample_order_bank_transfer_to_bulk_order() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let buyer = mint_jwt(vec![Role::BUYER]);
    let admin = mint_jwt(vec![Role::ADMIN]);

    let (inquiry_id, order_id) = quoted_inquiry(&srv, &client, &buyer, &admin).await;

    let res = client
        .get(srv.url(&format!("/purchase-orders/{order_id}/preview?payment_type=bank_transfer")))
        .bearer_auth(&buyer)
        .send()
        .await
        .unwrap();
    let preview = expect_status(res, StatusCode::OK).await;
    let sub_total: Decimal = preview["sub_total"].as_str().unwrap().parse().unwrap();
    assert_eq!(sub_total, dec!(40));

    let res = client
        .post(srv.url(&format!("/purchase-orders/{order_id}/checkout")))
        .bearer_auth(&buyer)
        .json(&json!({ "payment_type": "bank_transfer", "transaction_ref_id": "TRF-1" }))
        .send()
        .await
        .unwrap();
    let outcome = expect_status(res, StatusCode::OK).await;
    assert_eq!(outcome["outcome"], "awaiting_confirmation");

    // Buyers cannot confirm their own transfer.
    let res = client
        .post(srv.url(&format!("/purchase-orders/{order_id}/mark-as-paid")))
        .bearer_auth(&buyer)
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    expect_status(res, StatusCode::FORBIDDEN).await;

    let res = client
        .post(srv.url(&format!("/purchase-orders/{order_id}/mark-as-paid")))
        .bearer_auth(&admin)
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    let order = expect_status(res, StatusCode::OK).await;
    assert_eq!(order["status"], "paid");

    // A second confirmation is a stale step.
    let res = client
        .post(srv.url(&format!("/purchase-orders/{order_id}/mark-as-paid")))
        .bearer_auth(&admin)
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    let err = expect_status(res, StatusCode::CONFLICT).await;
    assert_eq!(err["error"], "step_unavailable");

    let res = client
        .get(srv.url(&format!("/inquiries/{inquiry_id}")))
        .bearer_auth(&buyer)
        .send()
        .await
        .unwrap();
    let inquiry = expect_status(res, StatusCode::OK).await;
    assert_eq!(inquiry["status"], "finished");

    let res = client
        .post(srv.url(&format!("/purchase-orders/{order_id}/bulk-purchase-order")))
        .bearer_auth(&buyer)
        .send()
        .await
        .unwrap();
    let bulk = expect_status(res, StatusCode::CREATED).await;
    let bulk_id = bulk["id"].as_str().unwrap().to_string();

    let res = client
        .get(srv.url(&format!("/bulk-purchase-orders/by-sample/{order_id}")))
        .bearer_auth(&buyer)
        .send()
        .await
        .unwrap();
    let found = expect_status(res, StatusCode::OK).await;
    assert_eq!(found["id"], bulk_id.as_str());

    let res = client
        .get(srv.url(&format!("/audit/purchase-orders/{order_id}")))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    let history = expect_status(res, StatusCode::OK).await;
    assert!(history.as_array().is_some_and(|records| records.len() >= 2));

    let res = client
        .get(srv.url(&format!("/audit/purchase-orders/{order_id}")))
        .bearer_auth(&buyer)
        .send()
        .await
        .unwrap();
    expect_status(res, StatusCode::FORBIDDEN).await;
}

#[tokio::test]
async fn hidden_orders_read_as_not_found() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let buyer = mint_jwt(vec![Role::BUYER]);
    let other_buyer = mint_jwt(vec![Role::BUYER]);
    let admin = mint_jwt(vec![Role::ADMIN]);

    let (_, order_id) = quoted_inquiry(&srv, &client, &buyer, &admin).await;

    let res = client
        .get(srv.url(&format!("/purchase-orders/{order_id}")))
        .bearer_auth(&other_buyer)
        .send()
        .await
        .unwrap();
    expect_status(res, StatusCode::NOT_FOUND).await;
}

#[tokio::test]
async fn payment_callbacks_do_not_need_a_token() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let buyer = mint_jwt(vec![Role::BUYER]);
    let admin = mint_jwt(vec![Role::ADMIN]);

    let (_, order_id) = quoted_inquiry(&srv, &client, &buyer, &admin).await;

    // No card payment started yet: reachable, but nothing to confirm.
    let res = client
        .get(srv.url(&format!("/callback/payment-intents/purchase-orders/{order_id}/confirm")))
        .send()
        .await
        .unwrap();
    let err = expect_status(res, StatusCode::CONFLICT).await;
    assert_eq!(err["error"], "step_unavailable");

    let res = client
        .get(srv.url(&format!(
            "/callback/payment-intents/bulk-purchase-orders/{}/first_payment/confirm",
            UserId::new()
        )))
        .send()
        .await
        .unwrap();
    expect_status(res, StatusCode::NOT_FOUND).await;
}
