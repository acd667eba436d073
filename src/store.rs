//! The repository seam between the reconciliation engine and durable state.
//!
//! Two implementations exist: [`crate::api::RemoteStore`] (the REST backend,
//! the authoritative owner of all entities) and
//! [`crate::cache::LocalStore`] (the offline fallback). The engine only ever
//! talks through this trait, so which one arbitrates is a construction-time
//! choice, not ambient state.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{
    Customer, CustomerDraft, Order, OrderStatus, Payment, PaymentDraft, Saree, SareeDraft,
};

#[async_trait]
pub trait Store: Send + Sync {
    // Sarees
    async fn list_sarees(&self) -> Result<Vec<Saree>>;
    async fn create_saree(&self, draft: &SareeDraft) -> Result<Saree>;
    async fn update_saree(&self, id: &str, draft: &SareeDraft) -> Result<Saree>;
    async fn delete_saree(&self, id: &str) -> Result<()>;

    // Customers
    async fn list_customers(&self) -> Result<Vec<Customer>>;
    async fn create_customer(&self, draft: &CustomerDraft) -> Result<Customer>;
    async fn update_customer(&self, id: &str, draft: &CustomerDraft) -> Result<Customer>;
    async fn delete_customer(&self, id: &str) -> Result<()>;

    // Orders
    async fn list_orders(&self) -> Result<Vec<Order>>;
    /// Submit a locally-built order. The `order` carries the computed totals
    /// and items; the store assigns the authoritative identifier and owns
    /// the durable stock decrement.
    async fn create_order(&self, order: &Order) -> Result<Order>;
    /// Bare status write. Must never be used to reach `Cancelled`; that path
    /// goes through [`Store::cancel_order`] so stock is restored.
    async fn set_order_status(&self, id: &str, status: OrderStatus) -> Result<Order>;
    async fn add_payment(&self, order_id: &str, draft: &PaymentDraft) -> Result<Payment>;
    async fn cancel_order(&self, id: &str) -> Result<()>;
    async fn delete_order(&self, id: &str) -> Result<()>;
}
