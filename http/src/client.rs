//! reqwest-backed client of the commerce API

use crate::api::{
    CreateOrderRequest, CreateProductRequest, CreatedResource, LoginRequest, LoginResponse,
    OrderItem, RegisterRequest, ShippingAddress,
};
use crate::config::TargetConfig;
use crate::error::{classify_transport, ClientError};
use crate::jwt;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use shop_bench_core::{
    Account, LoginGrant, Method, PreparedRequest, ProductSpec, ProvisionError, Provisioner,
    RawResponse, TargetClient, UserSession, USER_ID_HEADER,
};
use tracing::debug;

/// Longest response body kept in provisioning errors
const ERROR_BODY_LIMIT: usize = 200;

/// Client of the commerce service
///
/// Cheap to clone; clones share the connection pool.
#[derive(Clone)]
pub struct CommerceClient {
    http: Client,
    base_url: String,
    shipping: ShippingAddress,
}

impl CommerceClient {
    /// Build a client from connection settings
    pub fn new(config: &TargetConfig) -> Result<Self, ClientError> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ClientError::InvalidBaseUrl(config.base_url.clone()));
        }

        let http = Client::builder()
            .timeout(config.request_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .build()?;

        Ok(Self {
            http,
            base_url,
            shipping: ShippingAddress::default(),
        })
    }

    /// Use a different address on seed orders
    pub fn with_shipping_address(mut self, address: ShippingAddress) -> Self {
        self.shipping = address;
        self
    }

    /// Base URL without a trailing slash
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    /// Send a setup request and return status and body
    async fn send_setup<B: Serialize>(
        &self,
        step: &'static str,
        path: &str,
        session: Option<&UserSession>,
        body: &B,
    ) -> Result<(u16, String), ProvisionError> {
        let mut builder = self.http.post(self.url(path)).json(body);
        if let Some(session) = session {
            builder = builder.bearer_auth(&session.access_token);
            if let Some(user_id) = &session.user_id {
                builder = builder.header(USER_ID_HEADER, user_id);
            }
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ProvisionError::Transport {
                step,
                kind: classify_transport(&e),
            })?;
        let status = response.status().as_u16();
        let text = body_or_empty(step, response.text().await);
        debug!(step, status, "setup request finished");
        Ok((status, text))
    }
}

/// Response body, or an empty string when it could not be read
fn body_or_empty(step: &'static str, body: reqwest::Result<String>) -> String {
    match body {
        Ok(text) => text,
        Err(e) => {
            debug!(step, error = %e, "Failed to read response body");
            String::new()
        }
    }
}

fn rejected(step: &'static str, status: u16, body: &str) -> ProvisionError {
    ProvisionError::Rejected {
        step,
        status,
        body: body.chars().take(ERROR_BODY_LIMIT).collect(),
    }
}

fn parse<T: DeserializeOwned>(step: &'static str, body: &str) -> Result<T, ProvisionError> {
    serde_json::from_str(body).map_err(|e| ProvisionError::InvalidResponse {
        step,
        message: e.to_string(),
    })
}

fn apply(builder: RequestBuilder, request: &PreparedRequest) -> RequestBuilder {
    let mut builder = builder;
    if let Some(token) = &request.bearer {
        builder = builder.bearer_auth(token);
    }
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &request.body {
        builder = builder.json(body);
    }
    if let Some(timeout) = request.timeout {
        builder = builder.timeout(timeout);
    }
    builder
}

#[async_trait]
impl TargetClient for CommerceClient {
    fn target_name(&self) -> &str {
        &self.base_url
    }

    async fn execute(&self, request: &PreparedRequest) -> RawResponse {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        };
        let builder = apply(self.http.request(method, self.url(&request.path)), request);

        match builder.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                match response.text().await {
                    Ok(body) => RawResponse::with_status(status, body),
                    Err(e) => {
                        debug!(request = %request.name, status, error = %e, "response body unreadable");
                        RawResponse::with_status(status, String::new())
                    }
                }
            }
            Err(e) => {
                let kind = classify_transport(&e);
                debug!(request = %request.name, kind = kind.as_str(), error = %e, "transport failure");
                RawResponse::transport(kind)
            }
        }
    }
}

#[async_trait]
impl Provisioner for CommerceClient {
    async fn register(&self, account: &Account) -> Result<(), ProvisionError> {
        let body = RegisterRequest {
            email: &account.email,
            password: &account.password,
            name: &account.name,
        };
        let (status, text) = self
            .send_setup("register", "/auth/register", None, &body)
            .await?;
        match status {
            200 | 201 | 409 => Ok(()),
            _ => Err(rejected("register", status, &text)),
        }
    }

    async fn login(&self, account: &Account) -> Result<LoginGrant, ProvisionError> {
        let body = LoginRequest {
            email: &account.email,
            password: &account.password,
        };
        let (status, text) = self.send_setup("login", "/auth/login", None, &body).await?;
        if status != 200 {
            return Err(rejected("login", status, &text));
        }

        let login: LoginResponse = parse("login", &text)?;
        Ok(LoginGrant {
            subject: jwt::subject(&login.access_token),
            access_token: login.access_token,
        })
    }

    async fn create_product(
        &self,
        session: &UserSession,
        product: &ProductSpec,
    ) -> Result<String, ProvisionError> {
        let body = CreateProductRequest {
            name: &product.name,
            description: &product.description,
            price: product.price,
            stock: product.stock,
        };
        let (status, text) = self
            .send_setup("create_product", "/products", Some(session), &body)
            .await?;
        if !matches!(status, 200 | 201) {
            return Err(rejected("create_product", status, &text));
        }

        let created: CreatedResource = parse("create_product", &text)?;
        created
            .id_string()
            .ok_or_else(|| ProvisionError::InvalidResponse {
                step: "create_product",
                message: format!("unusable product id {}", created.id),
            })
    }

    async fn create_order(
        &self,
        session: &UserSession,
        product_id: &str,
        quantity: u32,
    ) -> Result<(), ProvisionError> {
        let body = CreateOrderRequest {
            items: vec![OrderItem {
                product_id,
                quantity,
            }],
            shipping_address: &self.shipping,
        };
        let (status, text) = self
            .send_setup("create_order", "/orders", Some(session), &body)
            .await?;
        match status {
            200 | 201 | 202 => Ok(()),
            _ => Err(rejected("create_order", status, &text)),
        }
    }
}

impl std::fmt::Debug for CommerceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommerceClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use serde_json::json;
    use shop_bench_core::{RawStatus, TransportErrorKind};
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> CommerceClient {
        CommerceClient::new(&TargetConfig::new(server.uri())).unwrap()
    }

    #[tokio::test]
    async fn test_unreadable_body_falls_back_to_empty() {
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let err = Client::new()
            .get(format!("http://127.0.0.1:{port}/"))
            .send()
            .await
            .unwrap_err();

        assert_eq!(body_or_empty("login", Err(err)), "");
        assert_eq!(body_or_empty("login", Ok("denied".into())), "denied");
    }

    fn account() -> Account {
        Account {
            email: "loadtest_r1_user1@test.com".into(),
            password: "test1234!".into(),
            name: "Load Test User 1".into(),
        }
    }

    fn session() -> UserSession {
        UserSession {
            ordinal: 0,
            email: "loadtest_r1_primary@test.com".into(),
            access_token: "tok".into(),
            user_id: Some("u-7".into()),
        }
    }

    fn prepared(method: Method, path: &str) -> PreparedRequest {
        PreparedRequest {
            name: "req".into(),
            method,
            path: path.into(),
            body: None,
            bearer: None,
            headers: Vec::new(),
            timeout: None,
        }
    }

    // =========================================================================
    // Construction
    // =========================================================================

    #[test]
    fn test_rejects_relative_base_url() {
        let err = CommerceClient::new(&TargetConfig::new("localhost:8000")).unwrap_err();
        assert!(matches!(err, ClientError::InvalidBaseUrl(_)));
    }

    #[test]
    fn test_url_joining() {
        let client = CommerceClient::new(&TargetConfig::new("http://shop/api/v1/")).unwrap();
        assert_eq!(client.base_url(), "http://shop/api/v1");
        assert_eq!(client.url("/products"), "http://shop/api/v1/products");
        assert_eq!(client.url("orders"), "http://shop/api/v1/orders");
    }

    // =========================================================================
    // Request execution
    // =========================================================================

    #[tokio::test]
    async fn test_execute_sends_credentials_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/orders"))
            .and(header("authorization", "Bearer tok-3"))
            .and(header(USER_ID_HEADER, "42"))
            .and(body_partial_json(json!({"items": [{"quantity": 1}]})))
            .respond_with(ResponseTemplate::new(201).set_body_string(r#"{"id":"o-1"}"#))
            .mount(&server)
            .await;

        let mut request = prepared(Method::Post, "/orders");
        request.bearer = Some("tok-3".into());
        request.headers = vec![(USER_ID_HEADER.into(), "42".into())];
        request.body = Some(json!({"items": [{"product_id": "p", "quantity": 1}]}));

        let response = client(&server).execute(&request).await;
        assert_eq!(response.code(), Some(201));
        assert!(response.body.contains("o-1"));
    }

    #[tokio::test]
    async fn test_execute_reports_error_status_with_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/products"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(503).set_body_string("QueuePool limit reached"))
            .mount(&server)
            .await;

        let response = client(&server)
            .execute(&prepared(Method::Get, "/products?page=2&size=20"))
            .await;
        assert_eq!(response.code(), Some(503));
        assert_eq!(response.body, "QueuePool limit reached");
    }

    #[tokio::test]
    async fn test_execute_timeout_is_transport_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let mut request = prepared(Method::Get, "/slow");
        request.timeout = Some(Duration::from_millis(50));

        let response = client(&server).execute(&request).await;
        assert_eq!(
            response.status,
            RawStatus::Transport(TransportErrorKind::Timeout)
        );
        assert!(response.body.is_empty());
    }

    #[tokio::test]
    async fn test_execute_connection_refused() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let client =
            CommerceClient::new(&TargetConfig::new(format!("http://127.0.0.1:{port}"))).unwrap();

        let response = client.execute(&prepared(Method::Get, "/products")).await;
        assert_eq!(
            response.status,
            RawStatus::Transport(TransportErrorKind::ConnectionRefused)
        );
    }

    // =========================================================================
    // Provisioning
    // =========================================================================

    #[tokio::test]
    async fn test_register_accepts_existing_account() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/register"))
            .and(body_partial_json(json!({"email": "loadtest_r1_user1@test.com"})))
            .respond_with(ResponseTemplate::new(409))
            .mount(&server)
            .await;

        client(&server).register(&account()).await.unwrap();
    }

    #[tokio::test]
    async fn test_register_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/register"))
            .respond_with(ResponseTemplate::new(422).set_body_string("x".repeat(1_000)))
            .mount(&server)
            .await;

        let err = client(&server).register(&account()).await.unwrap_err();
        match err {
            ProvisionError::Rejected { step, status, body } => {
                assert_eq!(step, "register");
                assert_eq!(status, 422);
                assert_eq!(body.len(), ERROR_BODY_LIMIT);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_login_extracts_subject() {
        let token = format!(
            "h.{}.s",
            URL_SAFE_NO_PAD.encode(r#"{"sub":"user-9","exp":9999999999}"#)
        );
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .and(body_partial_json(json!({"password": "test1234!"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"access_token": token, "token_type": "bearer"})),
            )
            .mount(&server)
            .await;

        let grant = client(&server).login(&account()).await.unwrap();
        assert_eq!(grant.access_token, token);
        assert_eq!(grant.subject.as_deref(), Some("user-9"));
    }

    #[tokio::test]
    async fn test_login_without_token_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"detail": "ok"})))
            .mount(&server)
            .await;

        let err = client(&server).login(&account()).await.unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::InvalidResponse { step: "login", .. }
        ));
    }

    #[tokio::test]
    async fn test_create_product_returns_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/products"))
            .and(header("authorization", "Bearer tok"))
            .and(body_partial_json(json!({"price": 12000, "stock": 10})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "p-55"})))
            .mount(&server)
            .await;

        let product = ProductSpec {
            name: "FIFO Test Product".into(),
            description: "stock contention target".into(),
            price: 12000,
            stock: 10,
        };
        let id = client(&server)
            .create_product(&session(), &product)
            .await
            .unwrap();
        assert_eq!(id, "p-55");
    }

    #[tokio::test]
    async fn test_create_order_sends_user_header_and_address() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/orders"))
            .and(header(USER_ID_HEADER, "u-7"))
            .and(body_partial_json(json!({
                "items": [{"product_id": "p-55", "quantity": 2}],
                "shipping_address": {"recipient_name": "Load Tester"}
            })))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .create_order(&session(), "p-55", 2)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_create_order_out_of_stock() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/orders"))
            .respond_with(ResponseTemplate::new(400).set_body_string("Insufficient stock"))
            .mount(&server)
            .await;

        let err = client(&server)
            .create_order(&session(), "p-55", 1)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Insufficient stock"));
    }
}
