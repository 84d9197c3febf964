//! End-to-end checkout and reconciliation against a mocked Stripe API.

use checkout_providers::security::sign_webhook;
use checkout_providers::{Credentials, ProviderKind, build_provider};
use checkout_types::{NotifyRequest, PayReq, PaymentProvider, PaymentState, ProviderError};
use mockito::Matcher;
use rust_decimal::Decimal;
use serde_json::json;

const WEBHOOK_SECRET: &str = "whsec_test_secret";

fn credentials(base_url: &str) -> Credentials {
    Credentials {
        client_secret: "sk_test_123".into(),
        webhook_secret: WEBHOOK_SECRET.into(),
        base_url: Some(base_url.to_string()),
        ..Default::default()
    }
}

fn pay_req() -> PayReq {
    PayReq {
        provider_name: "stripe-main".into(),
        product_name: "p1".into(),
        product_display_name: "Plan One".into(),
        payment_name: "pay-123".into(),
        price: Decimal::new(1050, 2),
        currency: "USD".into(),
        return_url: "https://shop.example/return".into(),
        ..Default::default()
    }
}

fn session_body(status: &str, payment_status: &str) -> String {
    json!({
        "id": "cs_test_1",
        "status": status,
        "payment_status": payment_status,
        "amount_total": 1050,
        "currency": "usd",
        "metadata": {
            "payment_name": "pay-123",
            "product_name": "p1",
            "product_display_name": "Plan One",
            "provider_name": "stripe-main",
            "price": "10.5",
            "currency": "USD"
        }
    })
    .to_string()
}

fn signed_webhook(body: &str, secret: &str) -> NotifyRequest {
    let ts = chrono::Utc::now().timestamp();
    let sig = sign_webhook(format!("{ts}.{body}").as_bytes(), secret);
    NotifyRequest::webhook("cs_test_1", body.as_bytes().to_vec())
        .with_header("Stripe-Signature", format!("t={ts},v1={sig}"))
}

#[tokio::test]
async fn test_pay_sends_minor_units() {
    let mut server = mockito::Server::new_async().await;
    let create = server
        .mock("POST", "/v1/checkout/sessions")
        .match_header("authorization", "Bearer sk_test_123")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded(
                "line_items[0][price_data][unit_amount]".into(),
                "1050".into(),
            ),
            Matcher::UrlEncoded("line_items[0][price_data][currency]".into(), "usd".into()),
            Matcher::UrlEncoded("metadata[payment_name]".into(), "pay-123".into()),
        ]))
        .with_status(200)
        .with_body(
            json!({"id": "cs_test_1", "url": "https://checkout.stripe.com/c/pay/cs_test_1"})
                .to_string(),
        )
        .expect(1)
        .create_async()
        .await;

    let provider = build_provider(ProviderKind::Stripe, &credentials(&server.url())).unwrap();
    let resp = provider.pay(&pay_req()).await.unwrap();

    assert_eq!(resp.order_id, "cs_test_1");
    assert_eq!(resp.pay_url, "https://checkout.stripe.com/c/pay/cs_test_1");
    create.assert_async().await;
}

#[tokio::test]
async fn test_bad_webhook_signature_is_rejected_before_lookup() {
    let mut server = mockito::Server::new_async().await;
    let lookup = server
        .mock("GET", "/v1/checkout/sessions/cs_test_1")
        .with_status(200)
        .with_body(session_body("complete", "paid"))
        .expect(0)
        .create_async()
        .await;

    let provider = build_provider(ProviderKind::Stripe, &credentials(&server.url())).unwrap();
    let body = json!({
        "type": "checkout.session.completed",
        "data": {"object": {"id": "cs_test_1"}}
    })
    .to_string();
    let req = signed_webhook(&body, "whsec_wrong");

    let err = provider.notify(&req).await.unwrap_err();
    assert!(matches!(err, ProviderError::Verification { .. }));
    lookup.assert_async().await;
}

#[tokio::test]
async fn test_webhook_without_signature_header_is_rejected() {
    let server = mockito::Server::new_async().await;
    let provider = build_provider(ProviderKind::Stripe, &credentials(&server.url())).unwrap();
    let req = NotifyRequest::webhook("cs_test_1", b"{}".to_vec());

    let err = provider.notify(&req).await.unwrap_err();
    assert!(matches!(err, ProviderError::Verification { .. }));
}

#[tokio::test]
async fn test_open_session_is_created_without_settlement() {
    let mut server = mockito::Server::new_async().await;
    let _m = server
        .mock("GET", "/v1/checkout/sessions/cs_test_1")
        .with_status(200)
        .with_body(session_body("open", "unpaid"))
        .create_async()
        .await;

    let provider = build_provider(ProviderKind::Stripe, &credentials(&server.url())).unwrap();
    let result = provider.notify(&NotifyRequest::poll("cs_test_1")).await.unwrap();

    assert_eq!(result.payment_status, PaymentState::Created);
    assert_eq!(result.order_id, "cs_test_1");
    assert!(result.settlement.is_none());
}

#[tokio::test]
async fn test_signed_webhook_settles_from_provider_data() {
    let mut server = mockito::Server::new_async().await;
    let lookup = server
        .mock("GET", "/v1/checkout/sessions/cs_test_1")
        .with_status(200)
        .with_body(session_body("complete", "paid"))
        .expect(1)
        .create_async()
        .await;

    let provider = build_provider(ProviderKind::Stripe, &credentials(&server.url())).unwrap();
    let body = json!({
        "type": "checkout.session.completed",
        "data": {"object": {"id": "cs_test_1"}}
    })
    .to_string();
    let result = provider
        .notify(&signed_webhook(&body, WEBHOOK_SECRET))
        .await
        .unwrap();

    assert_eq!(result.payment_status, PaymentState::Paid);
    assert_eq!(result.payment_name(), Some("pay-123"));
    assert_eq!(result.product_name(), Some("p1"));
    assert_eq!(result.product_display_name(), Some("Plan One"));
    assert_eq!(result.provider_name(), Some("stripe-main"));
    assert_eq!(result.price(), Some(Decimal::new(1050, 2)));
    assert_eq!(result.currency(), Some("USD"));
    lookup.assert_async().await;
}

#[tokio::test]
async fn test_webhook_for_another_session_is_refused() {
    let mut server = mockito::Server::new_async().await;
    let lookup = server
        .mock("GET", Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let provider = build_provider(ProviderKind::Stripe, &credentials(&server.url())).unwrap();
    let body = json!({"type": "checkout.session.completed", "data": {"object": {"id": "cs_other"}}})
        .to_string();
    let err = provider
        .notify(&signed_webhook(&body, WEBHOOK_SECRET))
        .await
        .unwrap_err();

    assert!(matches!(err, ProviderError::InvalidRequest(_)));
    lookup.assert_async().await;
}

#[tokio::test]
async fn test_repeated_notify_is_stable() {
    let mut server = mockito::Server::new_async().await;
    let _m = server
        .mock("GET", "/v1/checkout/sessions/cs_test_1")
        .with_status(200)
        .with_body(session_body("complete", "paid"))
        .expect(3)
        .create_async()
        .await;

    let provider = build_provider(ProviderKind::Stripe, &credentials(&server.url())).unwrap();
    let req = NotifyRequest::poll("cs_test_1");
    let first = provider.notify(&req).await.unwrap();
    for _ in 0..2 {
        let again = provider.notify(&req).await.unwrap();
        assert_eq!(again, first);
        assert!(first.payment_status.can_transition_to(again.payment_status));
    }
}

#[tokio::test]
async fn test_gateway_error_surfaces_raw_body() {
    let mut server = mockito::Server::new_async().await;
    let _m = server
        .mock("POST", "/v1/checkout/sessions")
        .with_status(400)
        .with_body(r#"{"error":{"message":"Invalid currency: zzz"}}"#)
        .create_async()
        .await;

    let provider = build_provider(ProviderKind::Stripe, &credentials(&server.url())).unwrap();
    let err = provider.pay(&pay_req()).await.unwrap_err();

    match err {
        ProviderError::Http { status, body, .. } => {
            assert_eq!(status, 400);
            assert!(body.contains("Invalid currency"));
        }
        other => panic!("expected HTTP error, got {other:?}"),
    }
}
