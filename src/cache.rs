//! Local fallback store.
//!
//! A small SQLite key-value database mirroring the browser-local storage
//! namespace of the original web client: whole collections are stored as
//! JSON arrays under fixed keys. Used two ways: as a read fallback when the
//! remote backend is unreachable, and as a full [`Store`] implementation
//! for offline operation, reproducing the backend's own mutation semantics
//! (stock decrement on order creation, payment recomputation, guarded
//! cancellation with stock restore).

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::info;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{
    Customer, CustomerDraft, Order, OrderStatus, Payment, PaymentDraft, Saree, SareeDraft,
};
use crate::store::Store;

// Fallback namespace keys, kept byte-compatible with the web client's
// local-storage layout.
pub const KEY_SAREES: &str = "shared-sarees";
pub const KEY_CUSTOMERS: &str = "shared-customers";
pub const KEY_ORDERS: &str = "shared-orders";
pub const KEY_NOTIFICATIONS: &str = "shared-notifications";
pub const KEY_CUSTOMER_LOGINS: &str = "customerLogins";

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 1;

/// The offline key-value store.
pub struct LocalStore {
    conn: Mutex<Connection>,
}

impl LocalStore {
    /// Open (or create) the cache database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        info!("Opening fallback cache at {}", path.display());
        let conn = Connection::open(path)?;
        Self::configure(conn)
    }

    /// In-memory store, used by tests and throwaway offline sessions.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::configure(conn)
    }

    fn configure(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA synchronous = NORMAL;",
        )?;
        run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Internal("cache lock poisoned".into()))
    }

    // -- Raw key-value access ------------------------------------------------

    pub fn get_value(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let conn = self.lock()?;
        match kv_get(&conn, key)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn put_value(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        let conn = self.lock()?;
        kv_put(&conn, key, &serde_json::to_string(value)?)
    }

    pub fn delete_value(&self, key: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM kv_store WHERE key = ?1", params![key])?;
        Ok(())
    }

    // -- Typed collection access --------------------------------------------

    /// Read a collection stored under `key`; missing key reads as empty.
    pub fn get_list<T: DeserializeOwned>(&self, key: &str) -> Result<Vec<T>> {
        let conn = self.lock()?;
        read_list(&conn, key)
    }

    pub fn put_list<T: Serialize>(&self, key: &str, rows: &[T]) -> Result<()> {
        let conn = self.lock()?;
        write_list(&conn, key, rows)
    }
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current >= CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    if current < 1 {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT
            );
            INSERT INTO schema_version (version) VALUES (1);",
        )?;
    }

    info!("Fallback cache schema ready (v{CURRENT_SCHEMA_VERSION})");
    Ok(())
}

// ---------------------------------------------------------------------------
// Connection-level helpers
// ---------------------------------------------------------------------------

fn kv_get(conn: &Connection, key: &str) -> Result<Option<String>> {
    conn.query_row(
        "SELECT value FROM kv_store WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
    .map_err(Error::from)
}

fn kv_put(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        params![key, value, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

fn read_list<T: DeserializeOwned>(conn: &Connection, key: &str) -> Result<Vec<T>> {
    match kv_get(conn, key)? {
        Some(raw) => Ok(serde_json::from_str(&raw)?),
        None => Ok(Vec::new()),
    }
}

fn write_list<T: Serialize>(conn: &Connection, key: &str, rows: &[T]) -> Result<()> {
    kv_put(conn, key, &serde_json::to_string(rows)?)
}

/// 400-style rejection, shaped like the backend's own error responses.
fn rejection(message: &str) -> Error {
    Error::Api {
        status: 400,
        message: message.to_string(),
    }
}

fn missing(kind: &str, id: &str) -> Error {
    Error::Api {
        status: 404,
        message: format!("{kind} not found: {id}"),
    }
}

// ---------------------------------------------------------------------------
// Store implementation (backend semantics, offline)
// ---------------------------------------------------------------------------

#[async_trait::async_trait]
impl Store for LocalStore {
    async fn list_sarees(&self) -> Result<Vec<Saree>> {
        let conn = self.lock()?;
        read_list(&conn, KEY_SAREES)
    }

    async fn create_saree(&self, draft: &SareeDraft) -> Result<Saree> {
        let conn = self.lock()?;
        let mut sarees: Vec<Saree> = read_list(&conn, KEY_SAREES)?;
        let saree = draft.clone().into_record(Uuid::new_v4().to_string());
        sarees.push(saree.clone());
        write_list(&conn, KEY_SAREES, &sarees)?;
        Ok(saree)
    }

    async fn update_saree(&self, id: &str, draft: &SareeDraft) -> Result<Saree> {
        let conn = self.lock()?;
        let mut sarees: Vec<Saree> = read_list(&conn, KEY_SAREES)?;
        let row = sarees
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| missing("Saree", id))?;
        *row = draft.clone().into_record(id.to_string());
        let updated = row.clone();
        write_list(&conn, KEY_SAREES, &sarees)?;
        Ok(updated)
    }

    async fn delete_saree(&self, id: &str) -> Result<()> {
        let conn = self.lock()?;
        let mut sarees: Vec<Saree> = read_list(&conn, KEY_SAREES)?;
        let before = sarees.len();
        sarees.retain(|s| s.id != id);
        if sarees.len() == before {
            return Err(missing("Saree", id));
        }
        write_list(&conn, KEY_SAREES, &sarees)
    }

    async fn list_customers(&self) -> Result<Vec<Customer>> {
        let conn = self.lock()?;
        read_list(&conn, KEY_CUSTOMERS)
    }

    async fn create_customer(&self, draft: &CustomerDraft) -> Result<Customer> {
        let conn = self.lock()?;
        let mut customers: Vec<Customer> = read_list(&conn, KEY_CUSTOMERS)?;
        let customer = draft.clone().into_record(Uuid::new_v4().to_string());
        customers.push(customer.clone());
        write_list(&conn, KEY_CUSTOMERS, &customers)?;
        Ok(customer)
    }

    async fn update_customer(&self, id: &str, draft: &CustomerDraft) -> Result<Customer> {
        let conn = self.lock()?;
        let mut customers: Vec<Customer> = read_list(&conn, KEY_CUSTOMERS)?;
        let row = customers
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| missing("Customer", id))?;
        *row = draft.clone().into_record(id.to_string());
        let updated = row.clone();
        write_list(&conn, KEY_CUSTOMERS, &customers)?;
        Ok(updated)
    }

    async fn delete_customer(&self, id: &str) -> Result<()> {
        let conn = self.lock()?;
        let mut customers: Vec<Customer> = read_list(&conn, KEY_CUSTOMERS)?;
        let before = customers.len();
        customers.retain(|c| c.id != id);
        if customers.len() == before {
            return Err(missing("Customer", id));
        }
        write_list(&conn, KEY_CUSTOMERS, &customers)
    }

    async fn list_orders(&self) -> Result<Vec<Order>> {
        let conn = self.lock()?;
        read_list(&conn, KEY_ORDERS)
    }

    async fn create_order(&self, order: &Order) -> Result<Order> {
        let conn = self.lock()?;
        let mut sarees: Vec<Saree> = read_list(&conn, KEY_SAREES)?;
        let mut orders: Vec<Order> = read_list(&conn, KEY_ORDERS)?;
        let customers: Vec<Customer> = read_list(&conn, KEY_CUSTOMERS)?;

        let mut saved = order.clone();
        saved.id = Uuid::new_v4().to_string();
        saved.customer_name = customers
            .iter()
            .find(|c| c.id == saved.customer_id)
            .map(|c| c.name.clone());

        // Durable stock decrement. Unlike the remote backend this store
        // refuses to drive stock negative.
        for item in &mut saved.items {
            let saree = sarees
                .iter_mut()
                .find(|s| s.id == item.saree_id)
                .ok_or_else(|| missing("Saree", &item.saree_id))?;
            if item.quantity > saree.stock {
                return Err(rejection(&format!(
                    "Insufficient stock for {} (requested {}, available {})",
                    saree.name, item.quantity, saree.stock
                )));
            }
            saree.stock -= item.quantity;
            item.saree_name = Some(saree.name.clone());
        }

        orders.push(saved.clone());
        write_list(&conn, KEY_SAREES, &sarees)?;
        write_list(&conn, KEY_ORDERS, &orders)?;
        Ok(saved)
    }

    async fn set_order_status(&self, id: &str, status: OrderStatus) -> Result<Order> {
        let conn = self.lock()?;
        let mut orders: Vec<Order> = read_list(&conn, KEY_ORDERS)?;
        let order = orders
            .iter_mut()
            .find(|o| o.id == id)
            .ok_or_else(|| missing("Order", id))?;
        order.status = status;
        let updated = order.clone();
        write_list(&conn, KEY_ORDERS, &orders)?;
        Ok(updated)
    }

    async fn add_payment(&self, order_id: &str, draft: &PaymentDraft) -> Result<Payment> {
        let conn = self.lock()?;
        let mut orders: Vec<Order> = read_list(&conn, KEY_ORDERS)?;
        let order = orders
            .iter_mut()
            .find(|o| o.id == order_id)
            .ok_or_else(|| missing("Order", order_id))?;

        let payment = Payment {
            id: Uuid::new_v4().to_string(),
            amount: draft.amount,
            method: draft.method,
            date: Utc::now(),
            notes: draft.notes.clone(),
        };
        order.payments.push(payment.clone());
        order.recompute();
        write_list(&conn, KEY_ORDERS, &orders)?;
        Ok(payment)
    }

    async fn cancel_order(&self, id: &str) -> Result<()> {
        let conn = self.lock()?;
        let mut orders: Vec<Order> = read_list(&conn, KEY_ORDERS)?;
        let mut sarees: Vec<Saree> = read_list(&conn, KEY_SAREES)?;

        let order = orders
            .iter_mut()
            .find(|o| o.id == id)
            .ok_or_else(|| missing("Order", id))?;
        if order.status == OrderStatus::Cancelled {
            return Err(rejection("Order is already cancelled"));
        }
        if order.paid_amount > 0.0 {
            return Err(rejection(
                "Cannot cancel order with payments. Please refund payments first.",
            ));
        }

        for item in &order.items {
            if let Some(saree) = sarees.iter_mut().find(|s| s.id == item.saree_id) {
                saree.stock += item.quantity;
            }
        }
        order.status = OrderStatus::Cancelled;

        write_list(&conn, KEY_SAREES, &sarees)?;
        write_list(&conn, KEY_ORDERS, &orders)?;
        Ok(())
    }

    async fn delete_order(&self, id: &str) -> Result<()> {
        let conn = self.lock()?;
        let mut orders: Vec<Order> = read_list(&conn, KEY_ORDERS)?;
        let before = orders.len();
        orders.retain(|o| o.id != id);
        if orders.len() == before {
            return Err(missing("Order", id));
        }
        write_list(&conn, KEY_ORDERS, &orders)
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, OrderDraft, OrderItem, PaymentMethod};

    fn saree(name: &str, stock: u32, price: f64) -> SareeDraft {
        SareeDraft {
            name: name.into(),
            category: Category::Silk,
            price,
            stock,
            notes: String::new(),
            image: None,
        }
    }

    fn customer(name: &str) -> CustomerDraft {
        CustomerDraft {
            name: name.into(),
            phone: "+91 98765 43210".into(),
            address: None,
            email: None,
            notes: String::new(),
        }
    }

    #[test]
    fn test_kv_roundtrip() {
        let store = LocalStore::open_in_memory().unwrap();
        assert!(store.get_value("missing").unwrap().is_none());

        store
            .put_value("k", &serde_json::json!({"a": 1}))
            .unwrap();
        assert_eq!(store.get_value("k").unwrap().unwrap()["a"], 1);

        store.put_value("k", &serde_json::json!([1, 2])).unwrap();
        assert_eq!(store.get_value("k").unwrap().unwrap()[1], 2);

        store.delete_value("k").unwrap();
        assert!(store.get_value("k").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_order_decrements_stock() {
        let store = LocalStore::open_in_memory().unwrap();
        let s = store.create_saree(&saree("Banarasi", 5, 1000.0)).await.unwrap();
        let c = store.create_customer(&customer("Priya")).await.unwrap();

        let draft = OrderDraft {
            customer_id: c.id.clone(),
            items: vec![OrderItem::new(&s.id, 2, 1000.0)],
            notes: None,
        };
        let saved = store
            .create_order(&draft.into_record("local-x".into()))
            .await
            .unwrap();
        assert_ne!(saved.id, "local-x");
        assert_eq!(saved.customer_name.as_deref(), Some("Priya"));
        assert_eq!(saved.items[0].saree_name.as_deref(), Some("Banarasi"));

        let sarees = store.list_sarees().await.unwrap();
        assert_eq!(sarees[0].stock, 3);
    }

    #[tokio::test]
    async fn test_create_order_rejects_insufficient_stock() {
        let store = LocalStore::open_in_memory().unwrap();
        let s = store.create_saree(&saree("Cotton", 1, 500.0)).await.unwrap();
        let c = store.create_customer(&customer("Anita")).await.unwrap();

        let draft = OrderDraft {
            customer_id: c.id,
            items: vec![OrderItem::new(&s.id, 3, 500.0)],
            notes: None,
        };
        let err = store
            .create_order(&draft.into_record("local-x".into()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Insufficient stock"));

        // Nothing changed
        assert_eq!(store.list_sarees().await.unwrap()[0].stock, 1);
        assert!(store.list_orders().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_payment_recompute_and_cancel_guard() {
        let store = LocalStore::open_in_memory().unwrap();
        let s = store.create_saree(&saree("Designer", 4, 5000.0)).await.unwrap();
        let c = store.create_customer(&customer("Priya")).await.unwrap();

        let draft = OrderDraft {
            customer_id: c.id,
            items: vec![OrderItem::new(&s.id, 2, 5000.0)],
            notes: None,
        };
        let order = store
            .create_order(&draft.into_record("local-x".into()))
            .await
            .unwrap();

        store
            .add_payment(
                &order.id,
                &PaymentDraft {
                    amount: 4000.0,
                    method: PaymentMethod::Cash,
                    notes: None,
                },
            )
            .await
            .unwrap();
        let stored = &store.list_orders().await.unwrap()[0];
        assert_eq!(stored.paid_amount, 4000.0);
        assert_eq!(stored.due_amount, 6000.0);
        assert_eq!(stored.status, OrderStatus::Partial);

        // Paid orders cannot be cancelled
        let err = store.cancel_order(&order.id).await.unwrap_err();
        assert!(err.to_string().contains("refund payments first"));
        assert_eq!(
            store.list_orders().await.unwrap()[0].status,
            OrderStatus::Partial
        );
    }

    #[tokio::test]
    async fn test_cancel_restores_stock() {
        let store = LocalStore::open_in_memory().unwrap();
        let s = store.create_saree(&saree("Handloom", 3, 800.0)).await.unwrap();
        let c = store.create_customer(&customer("Anita")).await.unwrap();

        let draft = OrderDraft {
            customer_id: c.id,
            items: vec![OrderItem::new(&s.id, 3, 800.0)],
            notes: None,
        };
        let order = store
            .create_order(&draft.into_record("local-x".into()))
            .await
            .unwrap();
        assert_eq!(store.list_sarees().await.unwrap()[0].stock, 0);

        store.cancel_order(&order.id).await.unwrap();
        assert_eq!(store.list_sarees().await.unwrap()[0].stock, 3);
        assert_eq!(
            store.list_orders().await.unwrap()[0].status,
            OrderStatus::Cancelled
        );

        // Cancelling twice is rejected
        let err = store.cancel_order(&order.id).await.unwrap_err();
        assert!(err.to_string().contains("already cancelled"));
    }
}
