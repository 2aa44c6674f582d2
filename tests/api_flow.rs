//! HTTP contract scenarios over a live listener.
//!
//! The gateway runs against the in-memory store on an ephemeral port;
//! requests go through a plain reqwest client with manual cookie handling.

use std::sync::Arc;

use reqwest::StatusCode;
use reqwest::header;
use rust_decimal::Decimal;

use bonusgate::gateway::{self, AppState};
use bonusgate::services::{AuthManager, BalanceManager, OrderManager, WithdrawManager};
use bonusgate::store::OrderStore;
use bonusgate::store::memory::MemoryStore;

struct TestGateway {
    base: String,
    store: Arc<MemoryStore>,
    http: reqwest::Client,
}

impl TestGateway {
    async fn spawn() -> Self {
        let store = Arc::new(MemoryStore::new());

        let auth = AuthManager::new(store.clone(), "api-test-secret".to_string(), 1).unwrap();
        let state = AppState {
            auth: Arc::new(auth),
            orders: Arc::new(OrderManager::new(store.clone())),
            balance: Arc::new(BalanceManager::new(store.clone())),
            withdrawals: Arc::new(WithdrawManager::new(store.clone())),
        };

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, gateway::router(state)).await.unwrap();
        });

        Self {
            base: format!("http://{addr}"),
            store,
            http: reqwest::Client::new(),
        }
    }

    async fn register(&self, login: &str, password: &str) -> reqwest::Response {
        self.http
            .post(format!("{}/api/user/register", self.base))
            .json(&serde_json::json!({"login": login, "password": password}))
            .send()
            .await
            .unwrap()
    }

    async fn login(&self, login: &str, password: &str) -> reqwest::Response {
        self.http
            .post(format!("{}/api/user/login", self.base))
            .json(&serde_json::json!({"login": login, "password": password}))
            .send()
            .await
            .unwrap()
    }

    async fn submit_order(&self, cookie: &str, number: &str) -> reqwest::Response {
        self.http
            .post(format!("{}/api/user/orders", self.base))
            .header(header::COOKIE, cookie)
            .header(header::CONTENT_TYPE, "text/plain")
            .body(number.to_string())
            .send()
            .await
            .unwrap()
    }

    async fn get(&self, cookie: &str, path: &str) -> reqwest::Response {
        self.http
            .get(format!("{}{path}", self.base))
            .header(header::COOKIE, cookie)
            .send()
            .await
            .unwrap()
    }

    async fn withdraw(&self, cookie: &str, order: &str, sum: f64) -> reqwest::Response {
        self.http
            .post(format!("{}/api/user/balance/withdraw", self.base))
            .header(header::COOKIE, cookie)
            .json(&serde_json::json!({"order": order, "sum": sum}))
            .send()
            .await
            .unwrap()
    }
}

/// First `name=value` pair of the Set-Cookie header.
fn auth_cookie(response: &reqwest::Response) -> String {
    let raw = response
        .headers()
        .get(header::SET_COOKIE)
        .expect("auth endpoints must set a cookie")
        .to_str()
        .unwrap();
    raw.split(';').next().unwrap().to_string()
}

#[tokio::test]
async fn registration_and_login_contract() {
    let gateway = TestGateway::spawn().await;

    let response = gateway.register("foo", "bar").await;
    assert_eq!(response.status(), StatusCode::OK);
    let cookie = auth_cookie(&response);
    assert!(cookie.starts_with("token="));

    assert_eq!(
        gateway.register("foo", "other").await.status(),
        StatusCode::CONFLICT
    );
    assert_eq!(
        gateway.register("", "bar").await.status(),
        StatusCode::BAD_REQUEST
    );

    assert_eq!(
        gateway.login("foo", "wrong").await.status(),
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(gateway.login("foo", "bar").await.status(), StatusCode::OK);
}

#[tokio::test]
async fn order_submission_contract() {
    let gateway = TestGateway::spawn().await;
    let first = auth_cookie(&gateway.register("first", "pw").await);
    let second = auth_cookie(&gateway.register("second", "pw").await);

    assert_eq!(
        gateway.submit_order(&first, "18").await.status(),
        StatusCode::ACCEPTED
    );
    assert_eq!(
        gateway.submit_order(&first, "18").await.status(),
        StatusCode::OK
    );
    assert_eq!(
        gateway.submit_order(&second, "18").await.status(),
        StatusCode::CONFLICT
    );

    assert_eq!(
        gateway.submit_order(&first, "12ab").await.status(),
        StatusCode::UNPROCESSABLE_ENTITY
    );
    assert_eq!(
        gateway.submit_order(&first, "12").await.status(),
        StatusCode::UNPROCESSABLE_ENTITY
    );

    // Wrong content type and missing auth are both rejected up front.
    let response = gateway
        .http
        .post(format!("{}/api/user/orders", gateway.base))
        .header(header::COOKIE, &first)
        .header(header::CONTENT_TYPE, "application/json")
        .body("18")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = gateway
        .http
        .post(format!("{}/api/user/orders", gateway.base))
        .header(header::CONTENT_TYPE, "text/plain")
        .body("18")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn order_listing_shows_accrual_only_when_processed() {
    let gateway = TestGateway::spawn().await;
    let cookie = auth_cookie(&gateway.register("lister", "pw").await);

    let response = gateway.get(&cookie, "/api/user/orders").await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    gateway.submit_order(&cookie, "18").await;
    let response = gateway.get(&cookie, "/api/user/orders").await;
    assert_eq!(response.status(), StatusCode::OK);
    let orders: serde_json::Value = response.json().await.unwrap();
    assert_eq!(orders[0]["number"], "18");
    assert_eq!(orders[0]["status"], "NEW");
    assert!(orders[0].get("accrual").is_none());
    assert!(orders[0]["uploaded_at"].is_string());

    gateway
        .store
        .apply_accrual("18", Decimal::new(425, 1))
        .await
        .unwrap();

    let orders: serde_json::Value = gateway
        .get(&cookie, "/api/user/orders")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(orders[0]["status"], "PROCESSED");
    assert_eq!(orders[0]["accrual"], 42.5);
}

#[tokio::test]
async fn balance_and_withdrawal_contract() {
    let gateway = TestGateway::spawn().await;
    let cookie = auth_cookie(&gateway.register("wallet", "pw").await);

    let balance: serde_json::Value = gateway
        .get(&cookie, "/api/user/balance")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(balance["current"], 0.0);
    assert_eq!(balance["withdrawn"], 0.0);

    assert_eq!(
        gateway.get(&cookie, "/api/user/withdrawals").await.status(),
        StatusCode::NO_CONTENT
    );

    gateway.submit_order(&cookie, "18").await;
    gateway
        .store
        .apply_accrual("18", Decimal::new(5005, 1))
        .await
        .unwrap();

    assert_eq!(
        gateway.withdraw(&cookie, "2377225624", 751.0).await.status(),
        StatusCode::PAYMENT_REQUIRED
    );
    assert_eq!(
        gateway.withdraw(&cookie, "12ab", 10.0).await.status(),
        StatusCode::UNPROCESSABLE_ENTITY
    );
    assert_eq!(
        gateway.withdraw(&cookie, "2377225624", 0.0).await.status(),
        StatusCode::BAD_REQUEST
    );
    assert_eq!(
        gateway.withdraw(&cookie, "2377225624", 100.0).await.status(),
        StatusCode::OK
    );

    let balance: serde_json::Value = gateway
        .get(&cookie, "/api/user/balance")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(balance["current"], 400.5);
    assert_eq!(balance["withdrawn"], 100.0);

    let response = gateway.get(&cookie, "/api/user/withdrawals").await;
    assert_eq!(response.status(), StatusCode::OK);
    let withdrawals: serde_json::Value = response.json().await.unwrap();
    assert_eq!(withdrawals[0]["order"], "2377225624");
    assert_eq!(withdrawals[0]["sum"], 100.0);
    assert!(withdrawals[0]["processed_at"].is_string());
}

#[tokio::test]
async fn protected_routes_reject_bad_tokens() {
    let gateway = TestGateway::spawn().await;
    auth_cookie(&gateway.register("victim", "pw").await);

    for cookie in ["", "token=", "token=garbage", "session=abc"] {
        let response = gateway.get(cookie, "/api/user/balance").await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{cookie:?}");
    }
}
