//! Pull and push reconciliation for the remaining gateways, each against a
//! mocked API.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use checkout_providers::security::{sign_adyen_item, sign_md5, sign_webhook, sign_webhook_base64};
use checkout_providers::{Credentials, ProviderKind, RunMode, build_provider};
use checkout_types::{
    InvoiceRequest, NotifyRequest, PayReq, PaymentProvider, PaymentState, ProviderError,
};
use mockito::{Matcher, ServerGuard};
use rust_decimal::Decimal;
use serde_json::{Value, json};

const SECRET: &str = "webhook-secret";

fn metadata(provider_name: &str) -> Value {
    json!({
        "payment_name": "pay-123",
        "product_name": "p1",
        "product_display_name": "Plan One",
        "provider_name": provider_name,
        "price": "10.5",
        "currency": "USD"
    })
}

fn pay_req(product_name: &str) -> PayReq {
    PayReq {
        provider_name: "main".into(),
        product_name: product_name.into(),
        product_display_name: "Plan One".into(),
        payment_name: "pay-123".into(),
        price: Decimal::new(1050, 2),
        currency: "USD".into(),
        return_url: "https://shop.example/return".into(),
        ..Default::default()
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn assert_settled(result: &checkout_types::NotifyResult, provider_name: &str) {
    assert_eq!(result.payment_status, PaymentState::Paid);
    assert_eq!(result.payment_name(), Some("pay-123"));
    assert_eq!(result.product_name(), Some("p1"));
    assert_eq!(result.product_display_name(), Some("Plan One"));
    assert_eq!(result.provider_name(), Some(provider_name));
    assert_eq!(result.price(), Some(Decimal::new(1050, 2)));
}

// ─────────────────────────────────────────────────────────────────────────────
// Polar
// ─────────────────────────────────────────────────────────────────────────────

fn polar(server: &ServerGuard) -> checkout_providers::Provider {
    let creds = Credentials {
        client_secret: "polar_oat_test".into(),
        webhook_secret: SECRET.into(),
        base_url: Some(server.url()),
        ..Default::default()
    };
    build_provider(ProviderKind::Polar, &creds).unwrap()
}

fn polar_webhook(kind: &str, checkout_id: &str) -> NotifyRequest {
    let body = json!({"type": kind, "data": {"id": checkout_id}}).to_string();
    let ts = now().to_string();
    let mut payload = format!("msg_1.{ts}.").into_bytes();
    payload.extend_from_slice(body.as_bytes());
    let sig = sign_webhook_base64(&payload, SECRET.as_bytes());
    NotifyRequest::webhook("chk_1", body)
        .with_header("webhook-id", "msg_1")
        .with_header("webhook-timestamp", ts)
        .with_header("webhook-signature", format!("v1,{sig}"))
}

#[tokio::test]
async fn test_polar_pay_sends_minor_units() {
    let mut server = mockito::Server::new_async().await;
    let create = server
        .mock("POST", "/v1/checkouts/")
        .match_header("authorization", "Bearer polar_oat_test")
        .match_body(Matcher::PartialJson(json!({
            "products": ["prod_1"],
            "amount": 1050,
            "metadata": {"payment_name": "pay-123"}
        })))
        .with_status(201)
        .with_body(
            json!({"id": "chk_1", "status": "open", "url": "https://polar.sh/checkout/chk_1"})
                .to_string(),
        )
        .expect(1)
        .create_async()
        .await;

    let resp = polar(&server).pay(&pay_req("prod_1")).await.unwrap();
    assert_eq!(resp.order_id, "chk_1");
    assert_eq!(resp.pay_url, "https://polar.sh/checkout/chk_1");
    create.assert_async().await;
}

#[tokio::test]
async fn test_polar_verified_webhook_pulls_and_settles() {
    let mut server = mockito::Server::new_async().await;
    let _lookup = server
        .mock("GET", "/v1/checkouts/chk_1")
        .with_status(200)
        .with_body(
            json!({
                "id": "chk_1",
                "status": "succeeded",
                "total_amount": 1050,
                "currency": "usd",
                "metadata": metadata("polar-main")
            })
            .to_string(),
        )
        .create_async()
        .await;

    let result = polar(&server)
        .notify(&polar_webhook("checkout.updated", "chk_1"))
        .await
        .unwrap();
    assert_settled(&result, "polar-main");
    assert_eq!(result.currency(), Some("USD"));
}

#[tokio::test]
async fn test_polar_other_event_types_are_refused() {
    let mut server = mockito::Server::new_async().await;
    let lookup = server.mock("GET", Matcher::Any).expect(0).create_async().await;

    let err = polar(&server)
        .notify(&polar_webhook("order.created", "chk_1"))
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::InvalidRequest(_)));
    lookup.assert_async().await;
}

// ─────────────────────────────────────────────────────────────────────────────
// Paddle
// ─────────────────────────────────────────────────────────────────────────────

fn paddle(server: &ServerGuard) -> checkout_providers::Provider {
    let creds = Credentials {
        client_secret: "pdl_test".into(),
        webhook_secret: SECRET.into(),
        base_url: Some(server.url()),
        ..Default::default()
    };
    build_provider(ProviderKind::Paddle, &creds).unwrap()
}

fn paddle_webhook(body: &str, secret: &str) -> NotifyRequest {
    let ts = now();
    let sig = sign_webhook(format!("{ts}:{body}").as_bytes(), secret);
    NotifyRequest::webhook("txn_1", body.to_string())
        .with_header("Paddle-Signature", format!("ts={ts};h1={sig}"))
}

#[tokio::test]
async fn test_paddle_completed_transaction_settles() {
    let mut server = mockito::Server::new_async().await;
    let lookup = server
        .mock("GET", "/transactions/txn_1")
        .match_header("authorization", "Bearer pdl_test")
        .with_status(200)
        .with_body(
            json!({"data": {
                "id": "txn_1",
                "status": "completed",
                "currency_code": "USD",
                "custom_data": metadata("paddle-main"),
                "details": {"totals": {"total": "1050"}}
            }})
            .to_string(),
        )
        .expect(1)
        .create_async()
        .await;

    let body = json!({"event_type": "transaction.completed", "data": {"id": "txn_1"}}).to_string();
    let result = paddle(&server)
        .notify(&paddle_webhook(&body, SECRET))
        .await
        .unwrap();
    assert_settled(&result, "paddle-main");
    lookup.assert_async().await;
}

#[tokio::test]
async fn test_paddle_bad_signature_skips_lookup() {
    let mut server = mockito::Server::new_async().await;
    let lookup = server.mock("GET", Matcher::Any).expect(0).create_async().await;

    let body = json!({"event_type": "transaction.completed", "data": {"id": "txn_1"}}).to_string();
    let err = paddle(&server)
        .notify(&paddle_webhook(&body, "wrong"))
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Verification { .. }));
    lookup.assert_async().await;
}

// ─────────────────────────────────────────────────────────────────────────────
// Airwallex
// ─────────────────────────────────────────────────────────────────────────────

async fn airwallex(
    server: &mut ServerGuard,
    logins: usize,
) -> (checkout_providers::Provider, mockito::Mock) {
    let login = server
        .mock("POST", "/authentication/login")
        .match_header("x-client-id", "awx_client")
        .match_header("x-api-key", "awx_key")
        .with_status(201)
        .with_body(
            json!({"token": "awx-token", "expires_at": "2099-01-01T00:00:00+0000"}).to_string(),
        )
        .expect(logins)
        .create_async()
        .await;
    let creds = Credentials {
        client_id: "awx_client".into(),
        client_secret: "awx_key".into(),
        webhook_secret: SECRET.into(),
        mode: RunMode::Sandbox,
        base_url: Some(server.url()),
        ..Default::default()
    };
    (build_provider(ProviderKind::Airwallex, &creds).unwrap(), login)
}

fn intent_list(status: &str, attempt: &str) -> String {
    json!({"items": [{
        "id": "int_1",
        "status": status,
        "merchant_order_id": "pay-123",
        "amount": 10.5,
        "currency": "USD",
        "latest_payment_attempt": {"status": attempt},
        "metadata": metadata("awx-main")
    }]})
    .to_string()
}

#[tokio::test]
async fn test_airwallex_pay_builds_hosted_checkout_url() {
    let mut server = mockito::Server::new_async().await;
    let (provider, login) = airwallex(&mut server, 1).await;
    let _create = server
        .mock("POST", "/pa/payment_intents/create")
        .match_header("authorization", "Bearer awx-token")
        .match_body(Matcher::PartialJson(json!({
            "merchant_order_id": "pay-123",
            "amount": 10.5,
            "currency": "USD"
        })))
        .with_status(201)
        .with_body(
            json!({"id": "int_1", "client_secret": "cs_1", "merchant_order_id": "pay-123"})
                .to_string(),
        )
        .create_async()
        .await;

    let resp = provider.pay(&pay_req("p1")).await.unwrap();
    assert_eq!(resp.order_id, "pay-123");
    assert!(resp.pay_url.contains("/#/standalone/checkout?intent_id=int_1&client_secret=cs_1"));
    assert!(resp.pay_url.contains("successUrl=https%3A%2F%2Fshop.example%2Freturn"));
    login.assert_async().await;
}

#[tokio::test]
async fn test_airwallex_poll_reuses_token() {
    let mut server = mockito::Server::new_async().await;
    let (provider, login) = airwallex(&mut server, 1).await;
    let _list = server
        .mock("GET", "/pa/payment_intents/")
        .match_query(Matcher::UrlEncoded("merchant_order_id".into(), "pay-123".into()))
        .with_status(200)
        .with_body(intent_list("REQUIRES_PAYMENT_METHOD", "RECEIVED"))
        .expect(2)
        .create_async()
        .await;

    for _ in 0..2 {
        let result = provider.notify(&NotifyRequest::poll("pay-123")).await.unwrap();
        assert_eq!(result.payment_status, PaymentState::Created);
    }
    login.assert_async().await;
}

#[tokio::test]
async fn test_airwallex_signed_webhook_settles() {
    let mut server = mockito::Server::new_async().await;
    let (provider, _login) = airwallex(&mut server, 1).await;
    let _list = server
        .mock("GET", "/pa/payment_intents/")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(intent_list("SUCCEEDED", "SETTLED"))
        .create_async()
        .await;

    let body = json!({
        "name": "payment_intent.succeeded",
        "data": {"object": {"merchant_order_id": "pay-123"}}
    })
    .to_string();
    let millis = (now() * 1000).to_string();
    let sig = sign_webhook(format!("{millis}{body}").as_bytes(), SECRET);
    let req = NotifyRequest::webhook("pay-123", body)
        .with_header("x-timestamp", millis)
        .with_header("x-signature", sig);

    let result = provider.notify(&req).await.unwrap();
    assert_settled(&result, "awx-main");
}

// ─────────────────────────────────────────────────────────────────────────────
// FastSpring
// ─────────────────────────────────────────────────────────────────────────────

fn fastspring(server: &ServerGuard) -> checkout_providers::Provider {
    let creds = Credentials {
        client_id: "api-user".into(),
        client_secret: "api-pass".into(),
        host: "shop.onfastspring.com/popup".into(),
        webhook_secret: SECRET.into(),
        base_url: Some(server.url()),
        ..Default::default()
    };
    build_provider(ProviderKind::FastSpring, &creds).unwrap()
}

#[tokio::test]
async fn test_fastspring_unknown_order_is_still_created() {
    let mut server = mockito::Server::new_async().await;
    let _order = server
        .mock("GET", "/orders/sess_1")
        .with_status(404)
        .with_body(r#"{"result":"error"}"#)
        .create_async()
        .await;

    let result = fastspring(&server)
        .notify(&NotifyRequest::poll("sess_1"))
        .await
        .unwrap();
    assert_eq!(result.payment_status, PaymentState::Created);
}

#[tokio::test]
async fn test_fastspring_signed_batch_settles() {
    let mut server = mockito::Server::new_async().await;
    let _order = server
        .mock("GET", "/orders/sess_1")
        .match_header("authorization", Matcher::Regex("^Basic ".into()))
        .with_status(200)
        .with_body(
            json!({
                "completed": true,
                "total": 10.5,
                "currency": "USD",
                "tags": metadata("fs-main")
            })
            .to_string(),
        )
        .create_async()
        .await;

    let body = json!({"events": [
        {"type": "order.completed", "data": {"id": "sess_other"}},
        {"type": "order.completed", "data": {"id": "sess_1"}}
    ]})
    .to_string();
    let sig = sign_webhook_base64(body.as_bytes(), SECRET.as_bytes());
    let req = NotifyRequest::webhook("sess_1", body).with_header("X-FS-Signature", sig);

    let result = fastspring(&server).notify(&req).await.unwrap();
    assert_settled(&result, "fs-main");
}

#[tokio::test]
async fn test_fastspring_batch_without_the_order_is_refused() {
    let server = mockito::Server::new_async().await;
    let body =
        json!({"events": [{"type": "order.completed", "data": {"id": "sess_other"}}]}).to_string();
    let sig = sign_webhook_base64(body.as_bytes(), SECRET.as_bytes());
    let req = NotifyRequest::webhook("sess_1", body).with_header("X-FS-Signature", sig);

    let err = fastspring(&server).notify(&req).await.unwrap_err();
    assert!(matches!(err, ProviderError::InvalidRequest(_)));
}

// ─────────────────────────────────────────────────────────────────────────────
// Adyen
// ─────────────────────────────────────────────────────────────────────────────

const ADYEN_HMAC: &str = "44782DEF547AAA06C910C43932B1EB0C71FC68D9D0C057550C48EC2ACF6BA056";

fn adyen(server: &ServerGuard) -> checkout_providers::Provider {
    let creds = Credentials {
        client_id: "ShopECOM".into(),
        client_secret: "AQE_key".into(),
        webhook_secret: ADYEN_HMAC.into(),
        base_url: Some(server.url()),
        ..Default::default()
    };
    build_provider(ProviderKind::Adyen, &creds).unwrap()
}

fn adyen_notification(link_id: &str, value: i64) -> String {
    let value_str = value.to_string();
    let fields = [
        "PSP1", "", "ShopECOM", "pay-123", value_str.as_str(), "EUR", "AUTHORISATION", "true",
    ];
    let sig = sign_adyen_item(&fields, ADYEN_HMAC).unwrap();
    json!({"live": "false", "notificationItems": [{"NotificationRequestItem": {
        "pspReference": "PSP1",
        "originalReference": "",
        "merchantAccountCode": "ShopECOM",
        "merchantReference": "pay-123",
        "amount": {"value": 1050, "currency": "EUR"},
        "eventCode": "AUTHORISATION",
        "success": "true",
        "additionalData": {"hmacSignature": sig, "paymentLinkId": link_id}
    }}]})
    .to_string()
}

#[tokio::test]
async fn test_adyen_verified_notification_settles() {
    let mut server = mockito::Server::new_async().await;
    let _link = server
        .mock("GET", "/v71/paymentLinks/PL123")
        .match_header("x-api-key", "AQE_key")
        .with_status(200)
        .with_body(
            json!({
                "id": "PL123",
                "status": "completed",
                "amount": {"value": 1050, "currency": "EUR"},
                "metadata": metadata("adyen-main")
            })
            .to_string(),
        )
        .create_async()
        .await;

    let provider = adyen(&server);
    let req = NotifyRequest::webhook("PL123", adyen_notification("PL123", 1050));
    let result = provider.notify(&req).await.unwrap();

    assert_settled(&result, "adyen-main");
    assert_eq!(result.currency(), Some("EUR"));
    assert_eq!(provider.response_error(None), "[accepted]");
}

#[tokio::test]
async fn test_adyen_item_with_altered_amount_is_rejected() {
    let mut server = mockito::Server::new_async().await;
    let lookup = server.mock("GET", Matcher::Any).expect(0).create_async().await;

    // Signed for 1 minor unit, delivered claiming 1050.
    let req = NotifyRequest::webhook("PL123", adyen_notification("PL123", 1));
    let provider = adyen(&server);
    let err = provider.notify(&req).await.unwrap_err();

    assert!(matches!(err, ProviderError::Verification { .. }));
    assert!(provider.response_error(Some(&err)).starts_with("fail: "));
    lookup.assert_async().await;
}

#[tokio::test]
async fn test_adyen_notification_for_another_link_is_refused() {
    let server = mockito::Server::new_async().await;
    let req = NotifyRequest::webhook("PL123", adyen_notification("PL999", 1050));
    let err = adyen(&server).notify(&req).await.unwrap_err();
    assert!(matches!(err, ProviderError::InvalidRequest(_)));
}

// ─────────────────────────────────────────────────────────────────────────────
// Lemon Squeezy
// ─────────────────────────────────────────────────────────────────────────────

fn lemonsqueezy(server: &ServerGuard) -> checkout_providers::Provider {
    let creds = Credentials {
        client_id: "12345".into(),
        client_secret: "ls_key".into(),
        webhook_secret: SECRET.into(),
        base_url: Some(server.url()),
        ..Default::default()
    };
    build_provider(ProviderKind::LemonSqueezy, &creds).unwrap()
}

async fn checkout_mock(server: &mut ServerGuard, expires_at: Option<&str>) -> mockito::Mock {
    server
        .mock("GET", "/v1/checkouts/chk-1")
        .match_header("accept", "application/vnd.api+json")
        .with_status(200)
        .with_body(
            json!({"data": {
                "id": "chk-1",
                "attributes": {
                    "url": "https://store.lemonsqueezy.com/checkout/custom/chk-1",
                    "expires_at": expires_at,
                    "checkout_data": {"custom": {"payment_name": "pay-123"}}
                }
            }})
            .to_string(),
        )
        .create_async()
        .await
}

async fn orders_mock(server: &mut ServerGuard, orders: Value) -> mockito::Mock {
    server
        .mock("GET", "/v1/orders")
        .match_query(Matcher::UrlEncoded(
            "filter[store_id]".into(),
            "12345".into(),
        ))
        .match_header("authorization", "Bearer ls_key")
        .with_status(200)
        .with_body(json!({ "data": orders }).to_string())
        .create_async()
        .await
}

fn listed_order(payment_name: &str, status: &str) -> Value {
    let mut custom = metadata("ls-main");
    custom["payment_name"] = json!(payment_name);
    json!({
        "type": "orders",
        "id": "1",
        "meta": {"custom_data": custom},
        "attributes": {"status": status, "total": 1050, "currency": "USD"}
    })
}

fn order_webhook(payment_name: &str, status: &str) -> NotifyRequest {
    let mut custom = metadata("ls-main");
    custom["payment_name"] = json!(payment_name);
    let body = json!({
        "meta": {"event_name": "order_created", "custom_data": custom},
        "data": {
            "type": "orders",
            "id": "1",
            "attributes": {"status": status, "total": 1050, "currency": "USD"}
        }
    })
    .to_string();
    let sig = sign_webhook(body.as_bytes(), SECRET);
    NotifyRequest::webhook("chk-1", body).with_header("X-Signature", sig)
}

#[tokio::test]
async fn test_lemonsqueezy_poll_reports_expired_checkout() {
    let mut server = mockito::Server::new_async().await;
    let _checkout = checkout_mock(&mut server, Some("2020-01-01T00:00:00Z")).await;
    let _orders = orders_mock(&mut server, json!([listed_order("pay-999", "paid")])).await;

    let result = lemonsqueezy(&server)
        .notify(&NotifyRequest::poll("chk-1"))
        .await
        .unwrap();
    assert_eq!(result.payment_status, PaymentState::Timeout);
}

#[tokio::test]
async fn test_lemonsqueezy_pay_requires_numeric_variant() {
    let server = mockito::Server::new_async().await;
    let err = lemonsqueezy(&server).pay(&pay_req("pro-plan")).await.unwrap_err();
    assert!(matches!(err, ProviderError::InvalidRequest(_)));
}

#[tokio::test]
async fn test_lemonsqueezy_paid_order_settles() {
    let mut server = mockito::Server::new_async().await;
    let _checkout = checkout_mock(&mut server, None).await;

    let result = lemonsqueezy(&server)
        .notify(&order_webhook("pay-123", "paid"))
        .await
        .unwrap();
    assert_settled(&result, "ls-main");
}

#[tokio::test]
async fn test_lemonsqueezy_poll_after_paid_webhook_stays_paid() {
    let mut server = mockito::Server::new_async().await;
    let _checkout = checkout_mock(&mut server, Some("2020-01-01T00:00:00Z")).await;
    let orders = orders_mock(&mut server, json!([listed_order("pay-123", "paid")])).await;
    let provider = lemonsqueezy(&server);

    let pushed = provider
        .notify(&order_webhook("pay-123", "paid"))
        .await
        .unwrap();
    let polled = provider
        .notify(&NotifyRequest::poll("chk-1"))
        .await
        .unwrap();

    assert_settled(&pushed, "ls-main");
    assert_settled(&polled, "ls-main");
    assert!(pushed.payment_status.can_transition_to(polled.payment_status));
    orders.assert_async().await;
}

#[tokio::test]
async fn test_lemonsqueezy_poll_without_order_is_created() {
    let mut server = mockito::Server::new_async().await;
    let _checkout = checkout_mock(&mut server, None).await;
    let _orders = orders_mock(&mut server, json!([])).await;

    let result = lemonsqueezy(&server)
        .notify(&NotifyRequest::poll("chk-1"))
        .await
        .unwrap();
    assert_eq!(result.payment_status, PaymentState::Created);
    assert!(result.payment_name().is_none());
}

#[tokio::test]
async fn test_lemonsqueezy_order_for_another_payment_is_refused() {
    let mut server = mockito::Server::new_async().await;
    let _checkout = checkout_mock(&mut server, None).await;

    let err = lemonsqueezy(&server)
        .notify(&order_webhook("pay-999", "paid"))
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::InvalidRequest(_)));
}

// ─────────────────────────────────────────────────────────────────────────────
// GC
// ─────────────────────────────────────────────────────────────────────────────

const GC_SECRET: &str = "gc-secret";

fn gc(server: &ServerGuard) -> checkout_providers::Provider {
    let creds = Credentials {
        client_id: "xm-01".into(),
        client_secret: GC_SECRET.into(),
        base_url: Some(server.url()),
        ..Default::default()
    };
    build_provider(ProviderKind::Gc, &creds).unwrap()
}

/// A gateway envelope signed the way the gateway signs it.
fn gc_envelope(op: &str, return_code: &str, payload: &Value) -> String {
    let data = STANDARD.encode(payload.to_string());
    let sign = sign_md5(
        [
            ("op", op),
            ("xmpch", "xm-01"),
            ("version", "1.4"),
            ("return_code", return_code),
            ("data", data.as_str()),
        ],
        GC_SECRET,
    );
    json!({
        "op": op,
        "xmpch": "xm-01",
        "version": "1.4",
        "return_code": return_code,
        "data": data,
        "sign": sign
    })
    .to_string()
}

fn gc_order(orderno: &str, state: &str) -> Value {
    json!({
        "orderno": orderno,
        "orderstate": state,
        "amount": "10.5",
        "remark1": "p1|Plan One|gc-main"
    })
}

#[tokio::test]
async fn test_gc_query_opens_signed_envelope() {
    let mut server = mockito::Server::new_async().await;
    let _query = server
        .mock("POST", Matcher::Any)
        .match_header("content-type", "text/plain;charset=UTF-8")
        .match_body(Matcher::PartialJson(json!({"op": "OrderQuery", "xmpch": "xm-01"})))
        .with_status(200)
        .with_body(gc_envelope("OrderQuery", "SUCCESS", &gc_order("pay-123", "1")))
        .create_async()
        .await;

    let result = gc(&server).notify(&NotifyRequest::poll("pay-123")).await.unwrap();
    assert_settled(&result, "gc-main");
    assert_eq!(result.currency(), Some("CNY"));
}

#[tokio::test]
async fn test_gc_push_is_verified_locally() {
    let server = mockito::Server::new_async().await;
    let provider = gc(&server);

    let body = gc_envelope("OrderNotify", "SUCCESS", &gc_order("pay-123", "1"));
    let result = provider
        .notify(&NotifyRequest::webhook("pay-123", body.clone()))
        .await
        .unwrap();
    assert_eq!(result.payment_status, PaymentState::Paid);

    let forged = body.replace("\"SUCCESS\"", "\"SUCCESS \"");
    let err = provider
        .notify(&NotifyRequest::webhook("pay-123", forged))
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Verification { .. }));
}

#[tokio::test]
async fn test_gc_gateway_refusal_is_a_provider_error() {
    let mut server = mockito::Server::new_async().await;
    let _query = server
        .mock("POST", Matcher::Any)
        .with_status(200)
        .with_body(json!({"return_code": "FAIL", "return_msg": "sign error"}).to_string())
        .create_async()
        .await;

    let err = gc(&server).notify(&NotifyRequest::poll("pay-123")).await.unwrap_err();
    assert!(
        matches!(err, ProviderError::Provider { message, .. } if message.contains("sign error"))
    );
}

#[tokio::test]
async fn test_gc_invoice_returns_bill_url() {
    let mut server = mockito::Server::new_async().await;
    let _invoice = server
        .mock("POST", Matcher::Any)
        .match_body(Matcher::PartialJson(json!({"op": "InvoiceEBillByOrder"})))
        .with_status(200)
        .with_body(gc_envelope(
            "InvoiceEBillByOrder",
            "SUCCESS",
            &json!({"url": "https://bill.example/e/1"}),
        ))
        .create_async()
        .await;

    let req = InvoiceRequest {
        payment_name: "pay-123".into(),
        person_name: "Li Lei".into(),
        invoice_type: "Individual".into(),
        ..Default::default()
    };
    let url = gc(&server).get_invoice(&req).await.unwrap();
    assert_eq!(url, "https://bill.example/e/1");
}
