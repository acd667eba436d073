//! Reconciliation engine.
//!
//! Holds an in-memory mirror of sarees, customers, and orders for rendering,
//! and applies every mutation optimistically: write the local mirror first,
//! confirm against the [`Store`], then either reconcile with the
//! authoritative response or run the compensating rollback and re-surface
//! the error. Mutations take `&mut self`, so overlapping local mutations on
//! one engine cannot interleave; cross-session races are arbitrated by the
//! remote store, which is why the success paths re-fetch whole collections
//! instead of trusting the local prediction.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

use crate::cache::{self, LocalStore};
use crate::error::{Error, Result};
use crate::models::{
    temp_id, Customer, CustomerDraft, HasId, Order, OrderDraft, OrderStatus, Payment,
    PaymentDraft, Saree, SareeDraft,
};
use crate::store::Store;

// ---------------------------------------------------------------------------
// Status changes
// ---------------------------------------------------------------------------

/// A requested order-status transition. Cancellation is a distinct variant
/// because it restores stock; a bare `Set(Cancelled)` write is rejected so
/// the side effect cannot be bypassed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusChange {
    Set(OrderStatus),
    Cancel,
}

// ---------------------------------------------------------------------------
// Generic optimistic transaction helpers
// ---------------------------------------------------------------------------

/// Insert `local` (carrying a temporary id), submit, then replace it with
/// the authoritative record, or remove it again on failure.
async fn optimistic_create<T, F, Fut>(rows: &mut Vec<T>, local: T, submit: F) -> Result<T>
where
    T: HasId + Clone,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let temp = local.id().to_string();
    rows.push(local);
    match submit().await {
        Ok(saved) => {
            if let Some(row) = rows.iter_mut().find(|r| r.id() == temp) {
                *row = saved.clone();
            }
            Ok(saved)
        }
        Err(err) => {
            rows.retain(|r| r.id() != temp);
            Err(err)
        }
    }
}

/// Snapshot the record, apply `updated` locally, submit, then replace with
/// the authoritative record, or restore the snapshot on failure.
async fn optimistic_update<T, F, Fut>(
    rows: &mut [T],
    kind: &'static str,
    id: &str,
    updated: T,
    submit: F,
) -> Result<T>
where
    T: HasId + Clone,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let pos = rows
        .iter()
        .position(|r| r.id() == id)
        .ok_or_else(|| Error::not_found(kind, id))?;
    let snapshot = rows[pos].clone();
    rows[pos] = updated;
    match submit().await {
        Ok(saved) => {
            rows[pos] = saved.clone();
            Ok(saved)
        }
        Err(err) => {
            rows[pos] = snapshot;
            Err(err)
        }
    }
}

/// Remove the record locally, submit the deletion, and re-insert the
/// snapshot at its old position on failure.
async fn optimistic_delete<T, F, Fut>(
    rows: &mut Vec<T>,
    kind: &'static str,
    id: &str,
    submit: F,
) -> Result<()>
where
    T: HasId + Clone,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let pos = rows
        .iter()
        .position(|r| r.id() == id)
        .ok_or_else(|| Error::not_found(kind, id))?;
    let snapshot = rows.remove(pos);
    match submit().await {
        Ok(()) => Ok(()),
        Err(err) => {
            rows.insert(pos.min(rows.len()), snapshot);
            Err(err)
        }
    }
}

/// Fetch a collection; on success write it through to the fallback cache,
/// on failure fall back to whatever the cache holds.
async fn fetch_or_cached<T, Fut>(
    cache: Option<&LocalStore>,
    key: &str,
    what: &'static str,
    fetch: Fut,
) -> Vec<T>
where
    T: DeserializeOwned + Serialize,
    Fut: Future<Output = Result<Vec<T>>>,
{
    match fetch.await {
        Ok(rows) => {
            if let Some(cache) = cache {
                if let Err(err) = cache.put_list(key, &rows) {
                    warn!(error = %err, what, "cache write-through failed");
                }
            }
            rows
        }
        Err(err) => {
            warn!(error = %err, what, "remote fetch failed, falling back to cache");
            cache
                .and_then(|c| c.get_list(key).ok())
                .unwrap_or_default()
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Application state: the local mirror plus the store it reconciles with.
pub struct Engine {
    store: Arc<dyn Store>,
    cache: Option<LocalStore>,
    sarees: Vec<Saree>,
    customers: Vec<Customer>,
    orders: Vec<Order>,
}

impl Engine {
    /// `cache` is the optional offline fallback; when present, successful
    /// reads are written through to it and failed reads fall back to it.
    pub fn new(store: Arc<dyn Store>, cache: Option<LocalStore>) -> Self {
        Self {
            store,
            cache,
            sarees: Vec::new(),
            customers: Vec::new(),
            orders: Vec::new(),
        }
    }

    // -- Mirror accessors ----------------------------------------------------

    pub fn sarees(&self) -> &[Saree] {
        &self.sarees
    }

    pub fn customers(&self) -> &[Customer] {
        &self.customers
    }

    pub fn orders(&self) -> &[Order] {
        &self.orders
    }

    pub fn saree(&self, id: &str) -> Option<&Saree> {
        self.sarees.iter().find(|s| s.id == id)
    }

    pub fn customer(&self, id: &str) -> Option<&Customer> {
        self.customers.iter().find(|c| c.id == id)
    }

    pub fn order(&self, id: &str) -> Option<&Order> {
        self.orders.iter().find(|o| o.id == id)
    }

    // -- Refresh -------------------------------------------------------------

    /// Re-fetch every collection. Each one is independent: a failure in one
    /// falls back to the cache (or empty) without blocking the others.
    pub async fn refresh(&mut self) {
        self.sarees = fetch_or_cached(
            self.cache.as_ref(),
            cache::KEY_SAREES,
            "sarees",
            self.store.list_sarees(),
        )
        .await;
        self.customers = fetch_or_cached(
            self.cache.as_ref(),
            cache::KEY_CUSTOMERS,
            "customers",
            self.store.list_customers(),
        )
        .await;
        self.orders = fetch_or_cached(
            self.cache.as_ref(),
            cache::KEY_ORDERS,
            "orders",
            self.store.list_orders(),
        )
        .await;
    }

    /// Persist the whole mirror into the fallback cache.
    fn persist(&self) {
        let Some(cache) = &self.cache else { return };
        if let Err(err) = cache.put_list(cache::KEY_SAREES, &self.sarees) {
            warn!(error = %err, "failed to persist sarees to cache");
        }
        if let Err(err) = cache.put_list(cache::KEY_CUSTOMERS, &self.customers) {
            warn!(error = %err, "failed to persist customers to cache");
        }
        if let Err(err) = cache.put_list(cache::KEY_ORDERS, &self.orders) {
            warn!(error = %err, "failed to persist orders to cache");
        }
    }

    // -- Sarees --------------------------------------------------------------

    pub async fn add_saree(&mut self, draft: SareeDraft) -> Result<Saree> {
        draft.validate()?;
        let local = draft.clone().into_record(temp_id());
        let store = Arc::clone(&self.store);
        let saved = optimistic_create(&mut self.sarees, local, move || async move {
            store.create_saree(&draft).await
        })
        .await?;
        self.persist();
        Ok(saved)
    }

    pub async fn update_saree(&mut self, id: &str, draft: SareeDraft) -> Result<Saree> {
        draft.validate()?;
        let updated = draft.clone().into_record(id.to_string());
        let store = Arc::clone(&self.store);
        let owned_id = id.to_string();
        let saved = optimistic_update(&mut self.sarees, "saree", id, updated, move || async move {
            store.update_saree(&owned_id, &draft).await
        })
        .await?;
        self.persist();
        Ok(saved)
    }

    pub async fn delete_saree(&mut self, id: &str) -> Result<()> {
        let store = Arc::clone(&self.store);
        let owned_id = id.to_string();
        optimistic_delete(&mut self.sarees, "saree", id, move || async move {
            store.delete_saree(&owned_id).await
        })
        .await?;
        self.persist();
        Ok(())
    }

    // -- Customers -----------------------------------------------------------

    pub async fn add_customer(&mut self, draft: CustomerDraft) -> Result<Customer> {
        draft.validate()?;
        let local = draft.clone().into_record(temp_id());
        let store = Arc::clone(&self.store);
        let saved = optimistic_create(&mut self.customers, local, move || async move {
            store.create_customer(&draft).await
        })
        .await?;
        self.persist();
        Ok(saved)
    }

    pub async fn update_customer(&mut self, id: &str, draft: CustomerDraft) -> Result<Customer> {
        draft.validate()?;
        let updated = draft.clone().into_record(id.to_string());
        let store = Arc::clone(&self.store);
        let owned_id = id.to_string();
        let saved =
            optimistic_update(&mut self.customers, "customer", id, updated, move || async move {
                store.update_customer(&owned_id, &draft).await
            })
            .await?;
        self.persist();
        Ok(saved)
    }

    pub async fn delete_customer(&mut self, id: &str) -> Result<()> {
        let store = Arc::clone(&self.store);
        let owned_id = id.to_string();
        optimistic_delete(&mut self.customers, "customer", id, move || async move {
            store.delete_customer(&owned_id).await
        })
        .await?;
        self.persist();
        Ok(())
    }

    // -- Orders --------------------------------------------------------------

    /// Create an order. Stock for every referenced saree is decremented
    /// locally before the remote call so availability renders instantly; a
    /// failed call reverses the decrement exactly and discards the
    /// temporary order. Either the full order plus full stock adjustment
    /// commits, or neither does.
    pub async fn create_order(&mut self, draft: OrderDraft) -> Result<Order> {
        draft.validate()?;
        if !self.customers.iter().any(|c| c.id == draft.customer_id) {
            return Err(Error::not_found("customer", &draft.customer_id));
        }
        // Stock is checked against the aggregate across line items, so two
        // items referencing the same saree cannot overdraw it together.
        let mut requested: HashMap<&str, u32> = HashMap::new();
        for item in &draft.items {
            *requested.entry(item.saree_id.as_str()).or_insert(0) += item.quantity;
        }
        for (&saree_id, &quantity) in &requested {
            let saree = self
                .sarees
                .iter()
                .find(|s| s.id == saree_id)
                .ok_or_else(|| Error::not_found("saree", saree_id))?;
            if quantity > saree.stock {
                return Err(Error::Validation(format!(
                    "insufficient stock for {}: requested {}, available {}",
                    saree.name, quantity, saree.stock
                )));
            }
        }
        drop(requested);

        let local = draft.into_record(temp_id());
        let temp = local.id.clone();

        for item in &local.items {
            if let Some(saree) = self.sarees.iter_mut().find(|s| s.id == item.saree_id) {
                saree.stock -= item.quantity;
            }
        }
        self.orders.push(local.clone());

        match self.store.create_order(&local).await {
            Ok(saved) => {
                if let Some(row) = self.orders.iter_mut().find(|o| o.id == temp) {
                    *row = saved.clone();
                }
                info!(order_id = %saved.id, total = saved.total_amount, "order created");
                // The optimistic decrement was a prediction; concurrent
                // sessions are resolved by the backend, so fetch its stock.
                match self.store.list_sarees().await {
                    Ok(rows) => self.sarees = rows,
                    Err(err) => {
                        warn!(error = %err, "saree refresh after order creation failed, keeping optimistic stock")
                    }
                }
                self.persist();
                Ok(saved)
            }
            Err(err) => {
                self.orders.retain(|o| o.id != temp);
                for item in &local.items {
                    if let Some(saree) = self.sarees.iter_mut().find(|s| s.id == item.saree_id) {
                        saree.stock += item.quantity;
                    }
                }
                Err(err)
            }
        }
    }

    /// Record a payment. Totals and the payment-derived status are
    /// recomputed immediately; on failure the optimistically-added payment
    /// is removed again and the prior totals and status are restored.
    /// Overpayment is accepted (status `Paid`, negative due), never clamped.
    pub async fn add_payment(&mut self, order_id: &str, draft: PaymentDraft) -> Result<Order> {
        draft.validate()?;
        let pos = self
            .orders
            .iter()
            .position(|o| o.id == order_id)
            .ok_or_else(|| Error::not_found("order", order_id))?;
        if self.orders[pos].status.is_terminal() {
            return Err(Error::Validation(
                "cannot record a payment on a cancelled order".into(),
            ));
        }

        let temp = temp_id();
        let prev_status = self.orders[pos].status;
        self.orders[pos].payments.push(Payment {
            id: temp.clone(),
            amount: draft.amount,
            method: draft.method,
            date: chrono::Utc::now(),
            notes: draft.notes.clone(),
        });
        self.orders[pos].recompute();

        match self.store.add_payment(order_id, &draft).await {
            Ok(payment) => {
                info!(order_id, payment_id = %payment.id, amount = payment.amount, "payment recorded");
                // Reconcile against the backend's own totals (rounding etc).
                match self.store.list_orders().await {
                    Ok(rows) => self.orders = rows,
                    Err(err) => {
                        warn!(error = %err, "order refresh after payment failed, keeping optimistic totals")
                    }
                }
                self.persist();
                self.orders
                    .iter()
                    .find(|o| o.id == order_id)
                    .cloned()
                    .ok_or_else(|| Error::not_found("order", order_id))
            }
            Err(err) => {
                if let Some(order) = self.orders.iter_mut().find(|o| o.id == order_id) {
                    order.payments.retain(|p| p.id != temp);
                    order.recompute();
                    // Recomputation derives the status; a manual override
                    // stays in force until a successful payment event.
                    order.status = prev_status;
                }
                Err(err)
            }
        }
    }

    /// Apply a status change. `Set(Cancelled)` is rejected: cancellation has
    /// a stock-restoration side effect a bare status write would skip, so it
    /// must go through [`StatusChange::Cancel`].
    pub async fn change_order_status(
        &mut self,
        order_id: &str,
        change: StatusChange,
    ) -> Result<Order> {
        match change {
            StatusChange::Cancel => self.cancel_order(order_id).await,
            StatusChange::Set(OrderStatus::Cancelled) => Err(Error::Validation(
                "cancellation must use the cancel operation so stock is restored".into(),
            )),
            StatusChange::Set(status) => {
                let pos = self
                    .orders
                    .iter()
                    .position(|o| o.id == order_id)
                    .ok_or_else(|| Error::not_found("order", order_id))?;
                if self.orders[pos].status.is_terminal() {
                    return Err(Error::Validation(
                        "cancelled orders cannot change status".into(),
                    ));
                }
                let snapshot = self.orders[pos].clone();
                self.orders[pos].status = status;
                match self.store.set_order_status(order_id, status).await {
                    Ok(saved) => {
                        self.orders[pos] = saved.clone();
                        self.persist();
                        Ok(saved)
                    }
                    Err(err) => {
                        self.orders[pos] = snapshot;
                        Err(err)
                    }
                }
            }
        }
    }

    /// Cancel an order with no recorded payments, restoring each item's
    /// quantity to its saree's stock. On failure both the order and every
    /// touched stock value are restored from snapshots taken before the
    /// optimistic write (not re-derived, to avoid double-reversal errors).
    pub async fn cancel_order(&mut self, order_id: &str) -> Result<Order> {
        let pos = self
            .orders
            .iter()
            .position(|o| o.id == order_id)
            .ok_or_else(|| Error::not_found("order", order_id))?;
        if self.orders[pos].status.is_terminal() {
            return Err(Error::Validation("order is already cancelled".into()));
        }
        if self.orders[pos].paid_amount > 0.0 {
            return Err(Error::Validation(
                "cannot cancel an order with recorded payments; reverse the payments first".into(),
            ));
        }

        let order_snapshot = self.orders[pos].clone();
        let stock_snapshot: Vec<(String, u32)> = order_snapshot
            .items
            .iter()
            .filter_map(|item| {
                self.sarees
                    .iter()
                    .find(|s| s.id == item.saree_id)
                    .map(|s| (s.id.clone(), s.stock))
            })
            .collect();

        self.orders[pos].status = OrderStatus::Cancelled;
        for item in &order_snapshot.items {
            if let Some(saree) = self.sarees.iter_mut().find(|s| s.id == item.saree_id) {
                saree.stock += item.quantity;
            }
        }

        match self.store.cancel_order(order_id).await {
            Ok(()) => {
                info!(order_id, "order cancelled");
                match self.store.list_sarees().await {
                    Ok(rows) => self.sarees = rows,
                    Err(err) => {
                        warn!(error = %err, "saree refresh after cancellation failed, keeping optimistic stock")
                    }
                }
                match self.store.list_orders().await {
                    Ok(rows) => self.orders = rows,
                    Err(err) => {
                        warn!(error = %err, "order refresh after cancellation failed, keeping optimistic state")
                    }
                }
                self.persist();
                self.orders
                    .iter()
                    .find(|o| o.id == order_id)
                    .cloned()
                    .ok_or_else(|| Error::not_found("order", order_id))
            }
            Err(err) => {
                self.orders[pos] = order_snapshot;
                for (id, stock) in stock_snapshot {
                    if let Some(saree) = self.sarees.iter_mut().find(|s| s.id == id) {
                        saree.stock = stock;
                    }
                }
                Err(err)
            }
        }
    }

    /// Admin-only physical removal. Normal flows cancel instead.
    pub async fn delete_order(&mut self, order_id: &str) -> Result<()> {
        let store = Arc::clone(&self.store);
        let owned_id = order_id.to_string();
        optimistic_delete(&mut self.orders, "order", order_id, move || async move {
            store.delete_order(&owned_id).await
        })
        .await?;
        self.persist();
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
