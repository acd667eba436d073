//! REST client for the shop backend.
//!
//! Implements [`Store`] against the collection endpoints (`/sarees/`,
//! `/customers/`, `/orders/` plus the `add_payment` / `cancel_order`
//! actions) and provides the auth and user endpoints. All list responses
//! are accepted either as a bare array or as a `{results: [...]}` envelope.

use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::models::{
    string_id, Customer, CustomerDraft, Order, OrderStatus, Payment, PaymentDraft, Saree,
    SareeDraft,
};
use crate::store::Store;

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Convert a `reqwest::Error` into a user-friendly message.
fn friendly_error(url: &str, err: &reqwest::Error) -> Error {
    let message = if err.is_connect() {
        format!("Cannot reach the shop backend at {url}")
    } else if err.is_timeout() {
        format!("Connection to {url} timed out")
    } else if err.is_builder() {
        format!("Invalid backend URL: {url}")
    } else {
        format!("Network error communicating with {url}: {err}")
    };
    Error::Network(message)
}

/// Convert an HTTP status code into a user-friendly message.
fn status_error(status: StatusCode) -> String {
    match status.as_u16() {
        401 => "Authentication token is invalid or expired".to_string(),
        403 => "Not authorized for this operation".to_string(),
        404 => "Backend resource not found".to_string(),
        s if s >= 500 => format!("Backend server error (HTTP {s})"),
        s => format!("Unexpected response from backend (HTTP {s})"),
    }
}

/// Build an [`Error::Api`] from a non-2xx response body, preserving the
/// backend's own `error` / `message` / `detail` field when present.
fn api_error(status: StatusCode, body: &str) -> Error {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|json| {
            json.get("error")
                .or_else(|| json.get("message"))
                .or_else(|| json.get("detail"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                status_error(status)
            } else {
                format!("{}: {trimmed}", status_error(status))
            }
        });
    Error::Api {
        status: status.as_u16(),
        message,
    }
}

// ---------------------------------------------------------------------------
// List envelope
// ---------------------------------------------------------------------------

/// The backend paginates some list endpoints (`{results: [...], count: n}`)
/// and returns bare arrays elsewhere; accept both.
#[derive(Deserialize)]
#[serde(untagged)]
enum ListResponse<T> {
    Envelope { results: Vec<T> },
    Bare(Vec<T>),
}

impl<T> ListResponse<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            ListResponse::Envelope { results } => results,
            ListResponse::Bare(items) => items,
        }
    }
}

// ---------------------------------------------------------------------------
// Auth / user payloads
// ---------------------------------------------------------------------------

/// A backend account as returned by the auth and user endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiUser {
    #[serde(deserialize_with = "string_id::deserialize")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub email: String,
    #[serde(default)]
    pub is_staff: bool,
}

impl ApiUser {
    /// Display name: `name` if set, else `username`, else the email.
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.username.as_deref())
            .unwrap_or(&self.email)
    }
}

/// Response of `/auth/login/` and `/auth/register/`.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: ApiUser,
}

/// Fields accepted by `PUT /users/{id}/`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UserUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

// ---------------------------------------------------------------------------
// Remote store
// ---------------------------------------------------------------------------

/// The REST backend. Owns the durable source of truth for all entities.
pub struct RemoteStore {
    client: Client,
    config: StoreConfig,
}

impl RemoteStore {
    pub fn new(config: StoreConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Swap the bearer token after a login.
    pub fn set_token(&mut self, token: Option<String>) {
        self.config.auth_token = token;
    }

    /// Perform a request against `path` (leading slash included, trailing
    /// slash per the backend's convention) and parse the JSON body. Empty
    /// bodies (204) come back as `Value::Null`.
    async fn send(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
        let url = format!("{}{path}", self.config.base_url);
        debug!(%method, %url, "backend request");

        let mut req = self
            .client
            .request(method, &url)
            .header("Content-Type", "application/json");
        if let Some(token) = self.config.auth_token.as_deref() {
            req = req.bearer_auth(token);
        }
        if let Some(b) = body {
            req = req.json(&b);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| friendly_error(&self.config.base_url, &e))?;
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(api_error(status, &text));
        }
        if text.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(Error::from)
    }

    async fn get_one<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let value = self.send(Method::GET, path, None).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn get_list<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>> {
        let value = self.send(Method::GET, path, None).await?;
        let list: ListResponse<T> = serde_json::from_value(value)?;
        Ok(list.into_vec())
    }

    async fn write<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &impl Serialize,
    ) -> Result<T> {
        let value = self
            .send(method, path, Some(serde_json::to_value(body)?))
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.send(Method::DELETE, path, None).await?;
        Ok(())
    }

    // -- Auth ---------------------------------------------------------------

    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResponse> {
        self.write(
            Method::POST,
            "/auth/login/",
            &serde_json::json!({ "email": email, "password": password }),
        )
        .await
    }

    pub async fn register(&self, name: &str, email: &str, password: &str) -> Result<LoginResponse> {
        self.write(
            Method::POST,
            "/auth/register/",
            &serde_json::json!({ "name": name, "email": email, "password": password }),
        )
        .await
    }

    // -- Users --------------------------------------------------------------

    pub async fn get_user(&self, id: &str) -> Result<ApiUser> {
        self.get_one(&format!("/users/{id}/")).await
    }

    pub async fn update_user(&self, id: &str, update: &UserUpdate) -> Result<ApiUser> {
        self.write(Method::PUT, &format!("/users/{id}/"), update)
            .await
    }

    pub async fn delete_user(&self, id: &str) -> Result<()> {
        self.delete(&format!("/users/{id}/")).await
    }
}

/// POST body for `/orders/`: the locally-computed totals plus the items,
/// keyed the way the backend expects them.
fn order_body(order: &Order) -> Value {
    serde_json::json!({
        "customer": order.customer_id,
        "total_amount": order.total_amount,
        "paid_amount": order.paid_amount,
        "due_amount": order.due_amount,
        "status": order.status,
        "notes": order.notes,
        "items": order.items,
    })
}

#[async_trait::async_trait]
impl Store for RemoteStore {
    async fn list_sarees(&self) -> Result<Vec<Saree>> {
        self.get_list("/sarees/").await
    }

    async fn create_saree(&self, draft: &SareeDraft) -> Result<Saree> {
        self.write(Method::POST, "/sarees/", draft).await
    }

    async fn update_saree(&self, id: &str, draft: &SareeDraft) -> Result<Saree> {
        self.write(Method::PUT, &format!("/sarees/{id}/"), draft)
            .await
    }

    async fn delete_saree(&self, id: &str) -> Result<()> {
        self.delete(&format!("/sarees/{id}/")).await
    }

    async fn list_customers(&self) -> Result<Vec<Customer>> {
        self.get_list("/customers/").await
    }

    async fn create_customer(&self, draft: &CustomerDraft) -> Result<Customer> {
        self.write(Method::POST, "/customers/", draft).await
    }

    async fn update_customer(&self, id: &str, draft: &CustomerDraft) -> Result<Customer> {
        self.write(Method::PUT, &format!("/customers/{id}/"), draft)
            .await
    }

    async fn delete_customer(&self, id: &str) -> Result<()> {
        self.delete(&format!("/customers/{id}/")).await
    }

    async fn list_orders(&self) -> Result<Vec<Order>> {
        self.get_list("/orders/").await
    }

    async fn create_order(&self, order: &Order) -> Result<Order> {
        self.write(Method::POST, "/orders/", &order_body(order))
            .await
    }

    async fn set_order_status(&self, id: &str, status: OrderStatus) -> Result<Order> {
        self.write(
            Method::PATCH,
            &format!("/orders/{id}/"),
            &serde_json::json!({ "status": status }),
        )
        .await
    }

    async fn add_payment(&self, order_id: &str, draft: &PaymentDraft) -> Result<Payment> {
        self.write(
            Method::POST,
            &format!("/orders/{order_id}/add_payment/"),
            draft,
        )
        .await
    }

    async fn cancel_order(&self, id: &str) -> Result<()> {
        self.send(
            Method::POST,
            &format!("/orders/{id}/cancel_order/"),
            Some(serde_json::json!({})),
        )
        .await?;
        Ok(())
    }

    async fn delete_order(&self, id: &str) -> Result<()> {
        self.delete(&format!("/orders/{id}/")).await
    }
}

// ===========================================================================
// Tests
// ===========================================================================
