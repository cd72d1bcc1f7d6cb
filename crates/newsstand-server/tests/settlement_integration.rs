//! Integration tests for invoice issuance, payment confirmation and
//! download redemption.
//!
//! Requires TEST_DATABASE_URL environment variable or local PostgreSQL.
//! Run with: cargo test --test settlement_integration -- --ignored

mod common;

use axum::http::StatusCode;
use common::*;
use serde_json::{json, Value};

/// Issues a product invoice through the API and returns its invoice id.
async fn issue_product_invoice(t: &TestApp, product_id: uuid::Uuid) -> String {
    let (status, body) = send_json(
        &t.app,
        "POST",
        "/api/v1/invoice",
        Some(json!({ "productId": product_id })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "invoice failed: {}", body);
    assert_eq!(body["status"], "pending");
    assert!(body["qrText"].as_str().is_some());
    body["invoiceId"].as_str().unwrap().to_string()
}

/// A 10000 sale by a creator whose plan keeps 20% for the platform credits
/// 8000 and hands the buyer a download link.
#[tokio::test]
#[ignore = "requires PostgreSQL database"]
async fn test_product_sale_credits_creator_net_share() {
    let t = setup().await;
    let creator = create_account(&t.pool, true, "0").await;
    let plan = create_membership(&t.pool, "20", "25000").await;
    subscribe(&t.pool, creator, plan).await;
    let product = create_product(&t.pool, creator, "10000", "issues/weekly.pdf").await;

    let invoice_id = issue_product_invoice(&t, product).await;
    assert!(t.sandbox.mark_paid(&invoice_id));

    let (status, body) = send_json(&t.app, "GET", &format!("/api/v1/check/{}", invoice_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
    assert_eq!(body["settled"], true);
    assert!(body["downloadUrl"].as_str().unwrap().contains("/api/v1/download/"));
    assert!(body.get("pollAfterSeconds").is_none());

    assert_eq!(balance_of(&t.pool, creator).await, dec("8000.00"));
    assert_eq!(ledger_count(&t.pool, creator, "sale_credit").await, 1);
}

/// Webhook first, then two polls: one credit, and the polls still see the link.
#[tokio::test]
#[ignore = "requires PostgreSQL database"]
async fn test_webhook_then_polls_credit_once() {
    let t = setup().await;
    let creator = create_account(&t.pool, true, "0").await;
    let product = create_product(&t.pool, creator, "10000", "issues/weekly.pdf").await;

    let invoice_id = issue_product_invoice(&t, product).await;
    assert!(t.sandbox.mark_paid(&invoice_id));

    let (status, body) = send_json(
        &t.app,
        "POST",
        "/api/v1/webhook",
        Some(json!({ "invoiceId": invoice_id, "paymentStatus": "PAID" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "settled");

    for _ in 0..2 {
        let (status, body) =
            send_json(&t.app, "GET", &format!("/api/v1/check/{}", invoice_id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "completed");
        assert!(body["downloadUrl"].as_str().is_some());
    }

    let (status, body) = send_json(
        &t.app,
        "POST",
        "/api/v1/webhook",
        Some(json!({ "invoiceId": invoice_id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "duplicate");

    // Default commission is 20%.
    assert_eq!(balance_of(&t.pool, creator).await, dec("8000.00"));
    assert_eq!(ledger_count(&t.pool, creator, "sale_credit").await, 1);
}

/// A webhook racing three polls settles the order exactly once.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "requires PostgreSQL database"]
async fn test_concurrent_webhook_and_polls_credit_once() {
    let t = setup().await;
    let creator = create_account(&t.pool, true, "0").await;
    let product = create_product(&t.pool, creator, "10000", "issues/weekly.pdf").await;

    let invoice_id = issue_product_invoice(&t, product).await;
    assert!(t.sandbox.mark_paid(&invoice_id));

    let mut handles = Vec::new();
    {
        let app = t.app.clone();
        let invoice_id = invoice_id.clone();
        handles.push(tokio::spawn(async move {
            send_json(
                &app,
                "POST",
                "/api/v1/webhook",
                Some(json!({ "invoiceId": invoice_id })),
            )
            .await
        }));
    }
    for _ in 0..3 {
        let app = t.app.clone();
        let uri = format!("/api/v1/check/{}", invoice_id);
        handles.push(tokio::spawn(async move { send_json(&app, "GET", &uri, None).await }));
    }

    for handle in handles {
        let (status, _) = handle.await.unwrap();
        assert_eq!(status, StatusCode::OK);
    }

    assert_eq!(balance_of(&t.pool, creator).await, dec("8000.00"));
    assert_eq!(ledger_count(&t.pool, creator, "sale_credit").await, 1);

    let credentials: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM download_credentials WHERE product_id = $1",
    )
    .bind(product)
    .fetch_one(&t.pool)
    .await
    .unwrap();
    assert_eq!(credentials, 1);
}

/// A download token works once; the second attempt is refused with 410.
#[tokio::test]
#[ignore = "requires PostgreSQL database"]
async fn test_download_token_is_single_use() {
    let t = setup().await;
    let creator = create_account(&t.pool, true, "0").await;
    let product = create_product(&t.pool, creator, "500", "issues/weekly.pdf").await;

    std::fs::create_dir_all(t.storage.path().join("issues")).unwrap();
    std::fs::write(t.storage.path().join("issues/weekly.pdf"), b"%PDF-1.7 weekly").unwrap();

    let invoice_id = issue_product_invoice(&t, product).await;
    t.sandbox.mark_paid(&invoice_id);
    let (_, body) = send_json(&t.app, "GET", &format!("/api/v1/check/{}", invoice_id), None).await;
    let download_path = route_path(body["downloadUrl"].as_str().unwrap());

    let (status, bytes) = send(&t.app, "GET", &download_path, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&bytes[..], b"%PDF-1.7 weekly");

    let (status, bytes) = send(&t.app, "GET", &download_path, None).await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(&bytes[..], b"download token already used");

    // Once used, the link is no longer offered by the poll endpoint.
    let (_, body) = send_json(&t.app, "GET", &format!("/api/v1/check/{}", invoice_id), None).await;
    assert!(body.get("downloadUrl").is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "requires PostgreSQL database"]
async fn test_concurrent_redemption_serves_one_caller() {
    let t = setup().await;
    let creator = create_account(&t.pool, true, "0").await;
    let product = create_product(&t.pool, creator, "500", "weekly.txt").await;
    std::fs::write(t.storage.path().join("weekly.txt"), b"weekly").unwrap();

    let invoice_id = issue_product_invoice(&t, product).await;
    t.sandbox.mark_paid(&invoice_id);
    let (_, body) = send_json(&t.app, "GET", &format!("/api/v1/check/{}", invoice_id), None).await;
    let download_path = route_path(body["downloadUrl"].as_str().unwrap());

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let app = t.app.clone();
            let path = download_path.clone();
            tokio::spawn(async move { send(&app, "GET", &path, None).await.0 })
        })
        .collect();

    let mut ok = 0;
    let mut gone = 0;
    for handle in handles {
        match handle.await.unwrap() {
            StatusCode::OK => ok += 1,
            StatusCode::GONE => gone += 1,
            other => panic!("unexpected status {}", other),
        }
    }
    assert_eq!(ok, 1);
    assert_eq!(gone, 3);
}

#[tokio::test]
#[ignore = "requires PostgreSQL database"]
async fn test_unknown_and_expired_tokens() {
    let t = setup().await;
    let creator = create_account(&t.pool, true, "0").await;
    let product = create_product(&t.pool, creator, "500", "weekly.txt").await;
    std::fs::write(t.storage.path().join("weekly.txt"), b"weekly").unwrap();

    let unknown = format!("/api/v1/download/{}", "ab".repeat(32));
    let (status, _) = send(&t.app, "GET", &unknown, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let invoice_id = issue_product_invoice(&t, product).await;
    t.sandbox.mark_paid(&invoice_id);
    let (_, body) = send_json(&t.app, "GET", &format!("/api/v1/check/{}", invoice_id), None).await;
    let download_path = route_path(body["downloadUrl"].as_str().unwrap());

    sqlx::query("UPDATE download_credentials SET expires_at = NOW() - INTERVAL '1 minute' WHERE product_id = $1")
        .bind(product)
        .execute(&t.pool)
        .await
        .unwrap();

    let (status, bytes) = send(&t.app, "GET", &download_path, None).await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(&bytes[..], b"download token expired");
}

/// Gateway outage during a poll leaves the order pending and the balance untouched.
#[tokio::test]
#[ignore = "requires PostgreSQL database"]
async fn test_gateway_outage_keeps_order_pending() {
    let t = setup().await;
    let creator = create_account(&t.pool, true, "0").await;
    let product = create_product(&t.pool, creator, "10000", "issues/weekly.pdf").await;

    let invoice_id = issue_product_invoice(&t, product).await;
    t.sandbox.mark_paid(&invoice_id);
    t.sandbox.set_offline(true);

    let (status, body) = send_json(&t.app, "GET", &format!("/api/v1/check/{}", invoice_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "pending");
    assert_eq!(body["settled"], false);
    assert_eq!(body["pollAfterSeconds"], 3);
    assert_eq!(balance_of(&t.pool, creator).await, dec("0"));

    t.sandbox.set_offline(false);
    let (_, body) = send_json(&t.app, "GET", &format!("/api/v1/check/{}", invoice_id), None).await;
    assert_eq!(body["status"], "completed");
    assert_eq!(balance_of(&t.pool, creator).await, dec("8000.00"));
}

/// If the gateway cannot issue the invoice the order is failed, not left pending.
#[tokio::test]
#[ignore = "requires PostgreSQL database"]
async fn test_invoice_creation_failure_fails_order() {
    let t = setup().await;
    let creator = create_account(&t.pool, true, "0").await;
    let product = create_product(&t.pool, creator, "10000", "issues/weekly.pdf").await;
    t.sandbox.set_offline(true);

    let response = {
        use axum::body::Body;
        use axum::http::Request;
        use tower::ServiceExt;
        t.app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/invoice")
                    .header("Content-Type", "application/json")
                    .body(Body::from(json!({ "productId": product }).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap()
    };
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.headers()["retry-after"], "5");

    let statuses: Vec<String> =
        sqlx::query_scalar("SELECT status::text FROM orders WHERE product_id = $1")
            .bind(product)
            .fetch_all(&t.pool)
            .await
            .unwrap();
    assert_eq!(statuses, vec!["failed".to_string()]);
}

/// An invoice id the store already holds cannot be attached to a second
/// order; that order is failed instead of staying pending without an invoice.
#[tokio::test]
#[ignore = "requires PostgreSQL database"]
async fn test_unstorable_invoice_fails_order() {
    let t = setup().await;
    let creator = create_account(&t.pool, true, "0").await;
    let first = create_product(&t.pool, creator, "10000", "issues/weekly.pdf").await;
    let second = create_product(&t.pool, creator, "5000", "issues/monthly.pdf").await;
    t.sandbox
        .force_invoice_id(Some(format!("dup-{}", uuid::Uuid::new_v4())));

    issue_product_invoice(&t, first).await;

    let (status, _) = send_json(
        &t.app,
        "POST",
        "/api/v1/invoice",
        Some(json!({ "productId": second })),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    let rows: Vec<(String, Option<String>)> = sqlx::query_as(
        "SELECT status::text, invoice_id FROM orders WHERE product_id = $1",
    )
    .bind(second)
    .fetch_all(&t.pool)
    .await
    .unwrap();
    assert_eq!(rows, vec![("failed".to_string(), None)]);
}

#[tokio::test]
#[ignore = "requires PostgreSQL database"]
async fn test_underpayment_leaves_order_pending() {
    let t = setup().await;
    let creator = create_account(&t.pool, true, "0").await;
    let product = create_product(&t.pool, creator, "10000", "issues/weekly.pdf").await;

    let invoice_id = issue_product_invoice(&t, product).await;
    t.sandbox.mark_paid_amount(&invoice_id, dec("9999.99"));

    let (_, body) = send_json(&t.app, "GET", &format!("/api/v1/check/{}", invoice_id), None).await;
    assert_eq!(body["status"], "pending");
    assert_eq!(balance_of(&t.pool, creator).await, dec("0"));
}

#[tokio::test]
#[ignore = "requires PostgreSQL database"]
async fn test_failed_payment_marks_order_failed() {
    let t = setup().await;
    let creator = create_account(&t.pool, true, "0").await;
    let product = create_product(&t.pool, creator, "10000", "issues/weekly.pdf").await;

    let invoice_id = issue_product_invoice(&t, product).await;
    t.sandbox.mark_failed(&invoice_id);

    let (_, body) = send_json(&t.app, "GET", &format!("/api/v1/check/{}", invoice_id), None).await;
    assert_eq!(body["status"], "failed");
    assert_eq!(body["settled"], true);

    // A late payment report cannot revive a failed order.
    t.sandbox.mark_paid(&invoice_id);
    let (_, body) = send_json(&t.app, "GET", &format!("/api/v1/check/{}", invoice_id), None).await;
    assert_eq!(body["status"], "failed");
    assert_eq!(balance_of(&t.pool, creator).await, dec("0"));
}

#[tokio::test]
#[ignore = "requires PostgreSQL database"]
async fn test_cancel_pending_invoice() {
    let t = setup().await;
    let creator = create_account(&t.pool, true, "0").await;
    let product = create_product(&t.pool, creator, "10000", "issues/weekly.pdf").await;

    let invoice_id = issue_product_invoice(&t, product).await;
    let cancel_uri = format!("/api/v1/invoice/{}/cancel", invoice_id);

    let (status, body) = send_json(&t.app, "POST", &cancel_uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "cancelled");

    let (status, _) = send_json(&t.app, "POST", &cancel_uri, None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    t.sandbox.mark_paid(&invoice_id);
    let (_, body) = send_json(&t.app, "GET", &format!("/api/v1/check/{}", invoice_id), None).await;
    assert_eq!(body["status"], "cancelled");
    assert_eq!(balance_of(&t.pool, creator).await, dec("0"));
}

#[tokio::test]
#[ignore = "requires PostgreSQL database"]
async fn test_cancel_of_paid_invoice_settles_instead() {
    let t = setup().await;
    let creator = create_account(&t.pool, true, "0").await;
    let product = create_product(&t.pool, creator, "10000", "issues/weekly.pdf").await;

    let invoice_id = issue_product_invoice(&t, product).await;
    t.sandbox.mark_paid(&invoice_id);

    let (status, _) = send_json(
        &t.app,
        "POST",
        &format!("/api/v1/invoice/{}/cancel", invoice_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(balance_of(&t.pool, creator).await, dec("8000.00"));
}

#[tokio::test]
#[ignore = "requires PostgreSQL database"]
async fn test_recharge_credits_full_amount() {
    let t = setup().await;
    let buyer = create_account(&t.pool, false, "0").await;

    let (status, body) = send_json(
        &t.app,
        "POST",
        "/api/v1/invoice",
        Some(json!({ "buyerId": buyer, "amount": "5000" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["kind"], "recharge");
    let invoice_id = body["invoiceId"].as_str().unwrap().to_string();

    t.sandbox.mark_paid(&invoice_id);
    let (_, body) = send_json(&t.app, "GET", &format!("/api/v1/check/{}", invoice_id), None).await;
    assert_eq!(body["status"], "completed");
    assert!(body.get("downloadUrl").is_none());

    assert_eq!(balance_of(&t.pool, buyer).await, dec("5000.00"));
    assert_eq!(ledger_count(&t.pool, buyer, "recharge_credit").await, 1);
}

#[tokio::test]
#[ignore = "requires PostgreSQL database"]
async fn test_invoice_request_validation() {
    let t = setup().await;
    let buyer = create_account(&t.pool, false, "0").await;

    let cases: Vec<(Value, StatusCode)> = vec![
        (json!({}), StatusCode::BAD_REQUEST),
        (json!({ "amount": "5000" }), StatusCode::BAD_REQUEST),
        (json!({ "buyerId": buyer, "amount": "0" }), StatusCode::BAD_REQUEST),
        (json!({ "buyerId": buyer, "amount": "-10" }), StatusCode::BAD_REQUEST),
        (json!({ "buyerId": buyer, "amount": "50" }), StatusCode::BAD_REQUEST),
        (json!({ "productId": uuid::Uuid::new_v4() }), StatusCode::NOT_FOUND),
    ];

    for (body, expected) in cases {
        let (status, _) = send_json(&t.app, "POST", "/api/v1/invoice", Some(body.clone())).await;
        assert_eq!(status, expected, "body: {}", body);
    }
}

#[tokio::test]
#[ignore = "requires PostgreSQL database"]
async fn test_webhook_for_unknown_invoice_is_acknowledged() {
    let t = setup().await;

    let (status, body) = send_json(
        &t.app,
        "POST",
        "/api/v1/webhook",
        Some(json!({ "invoiceId": "never-issued" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "unknown");

    let (status, _) = send_json(&t.app, "GET", "/api/v1/check/never-issued", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
#[ignore = "requires PostgreSQL database"]
async fn test_wallet_purchase_debits_buyer_and_credits_creator() {
    let t = setup().await;
    let buyer = create_account(&t.pool, false, "12000").await;
    let creator = create_account(&t.pool, true, "0").await;
    let product = create_product(&t.pool, creator, "10000", "issues/weekly.pdf").await;

    let (status, body) = send_json(
        &t.app,
        "POST",
        "/api/v1/wallet/pay",
        Some(json!({ "buyerId": buyer, "productId": product })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "wallet pay failed: {}", body);
    assert_eq!(body["status"], "completed");
    assert_eq!(body["balance"], "2000.00");
    assert_eq!(body["creatorCredit"], "8000.00");
    assert!(body["download"]["url"].as_str().is_some());
    assert!(body["invoiceId"].as_str().unwrap().starts_with("wallet-"));

    assert_eq!(balance_of(&t.pool, buyer).await, dec("2000.00"));
    assert_eq!(balance_of(&t.pool, creator).await, dec("8000.00"));
    assert_eq!(ledger_count(&t.pool, buyer, "wallet_debit").await, 1);

    // Not enough left for a second copy.
    let (status, _) = send_json(
        &t.app,
        "POST",
        "/api/v1/wallet/pay",
        Some(json!({ "buyerId": buyer, "productId": product })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(balance_of(&t.pool, buyer).await, dec("2000.00"));
    assert_eq!(balance_of(&t.pool, creator).await, dec("8000.00"));
}

#[tokio::test]
#[ignore = "requires PostgreSQL database"]
async fn test_membership_purchase_opens_subscription_window() {
    let t = setup().await;
    let creator = create_account(&t.pool, true, "0").await;
    let plan = create_membership(&t.pool, "10", "25000").await;

    let (status, body) = send_json(
        &t.app,
        "POST",
        "/api/v1/membership/invoice",
        Some(json!({ "creatorId": creator, "membershipId": plan })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["amount"], "25000.00");
    let invoice_id = body["invoiceId"].as_str().unwrap().to_string();

    // Membership invoices are not settled through the product poll.
    let (status, _) = send_json(&t.app, "GET", &format!("/api/v1/check/{}", invoice_id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    t.sandbox.mark_paid(&invoice_id);
    let (status, body) = send_json(
        &t.app,
        "GET",
        &format!("/api/v1/membership/check/{}", invoice_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
    assert_eq!(body["subscription"]["membershipId"], plan.to_string());

    let (status, body) = send_json(
        &t.app,
        "GET",
        &format!("/api/v1/membership/status/{}", creator),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["active"], true);
    assert_eq!(body["postQuota"], 10);
    assert_eq!(body["postsUsed"], 0);
    assert_eq!(body["membership"]["advantages"][0]["title"], "Featured placement");

    // Renewing the same plan extends the end by one period.
    let end_before: chrono::DateTime<chrono::Utc> =
        sqlx::query_scalar("SELECT subscription_end FROM accounts WHERE id = $1")
            .bind(creator)
            .fetch_one(&t.pool)
            .await
            .unwrap();

    let (_, body) = send_json(
        &t.app,
        "POST",
        "/api/v1/membership/invoice",
        Some(json!({ "creatorId": creator, "membershipId": plan })),
    )
    .await;
    let renewal = body["invoiceId"].as_str().unwrap().to_string();
    t.sandbox.mark_paid(&renewal);
    send_json(&t.app, "GET", &format!("/api/v1/membership/check/{}", renewal), None).await;

    let end_after: chrono::DateTime<chrono::Utc> =
        sqlx::query_scalar("SELECT subscription_end FROM accounts WHERE id = $1")
            .bind(creator)
            .fetch_one(&t.pool)
            .await
            .unwrap();
    assert_eq!(end_after - end_before, chrono::Duration::days(30));
}
