//! Domain model for the saree shop.
//!
//! Field names follow the backend wire format: an order's customer is
//! serialized as `customer`, an item's saree as `saree`, monetary fields as
//! `total_amount` / `paid_amount` / `due_amount`. List responses from the
//! backend may wrap these in a `{results: [...]}` envelope; that is handled
//! at the API layer, the models here are the element shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// The backend serializes primary keys as integers while locally-assigned
/// identifiers are strings; accept both and normalize to `String`.
pub(crate) mod string_id {
    use serde::{de, Deserialize, Deserializer};
    use serde_json::Value;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Value::deserialize(deserializer)? {
            Value::String(s) => Ok(s),
            Value::Number(n) => Ok(n.to_string()),
            other => Err(de::Error::custom(format!("invalid identifier: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Saree catalog categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Category {
    Silk,
    Cotton,
    Partywear,
    Designer,
    Handloom,
}

/// Accepted payment methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethod {
    Cash,
    #[serde(rename = "UPI")]
    Upi,
    Other,
}

/// Order lifecycle states. `Cancelled` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Partial,
    Paid,
    Cancelled,
}

impl OrderStatus {
    /// Payment-derived status: `Paid` when paid covers the total, `Partial`
    /// when anything has been paid, `Pending` otherwise. Pure in the payment
    /// set; repeated application is idempotent.
    pub fn derived(paid_amount: f64, total_amount: f64) -> Self {
        if paid_amount >= total_amount {
            OrderStatus::Paid
        } else if paid_amount > 0.0 {
            OrderStatus::Partial
        } else {
            OrderStatus::Pending
        }
    }

    /// No transition leaves `Cancelled`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Cancelled)
    }
}

// ---------------------------------------------------------------------------
// Catalog and customers
// ---------------------------------------------------------------------------

/// A catalog item. Stock is decremented only by confirmed order items and
/// incremented only by order cancellation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Saree {
    #[serde(deserialize_with = "string_id::deserialize")]
    pub id: String,
    pub name: String,
    pub category: Category,
    pub price: f64,
    pub stock: u32,
    #[serde(default)]
    pub notes: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// Input for creating or replacing a saree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SareeDraft {
    pub name: String,
    pub category: Category,
    pub price: f64,
    pub stock: u32,
    #[serde(default)]
    pub notes: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl SareeDraft {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Validation("saree name is required".into()));
        }
        if self.price < 0.0 {
            return Err(Error::Validation("saree price must not be negative".into()));
        }
        Ok(())
    }

    pub(crate) fn into_record(self, id: String) -> Saree {
        Saree {
            id,
            name: self.name,
            category: self.category,
            price: self.price,
            stock: self.stock,
            notes: self.notes,
            image: self.image,
        }
    }
}

/// A customer record. Email is advisory: at most one customer should
/// correspond to one login identity, but uniqueness is not enforced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    #[serde(deserialize_with = "string_id::deserialize")]
    pub id: String,
    pub name: String,
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub notes: String,
}

/// Input for creating or replacing a customer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerDraft {
    pub name: String,
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub notes: String,
}

impl CustomerDraft {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Validation("customer name is required".into()));
        }
        if self.phone.trim().is_empty() {
            return Err(Error::Validation("customer phone is required".into()));
        }
        Ok(())
    }

    pub(crate) fn into_record(self, id: String) -> Customer {
        Customer {
            id,
            name: self.name,
            phone: self.phone,
            address: self.address,
            email: self.email,
            notes: self.notes,
        }
    }
}

// ---------------------------------------------------------------------------
// Orders and payments
// ---------------------------------------------------------------------------

/// A line item. The unit price is captured at order-creation time and does
/// not follow later catalog price changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    #[serde(rename = "saree", deserialize_with = "string_id::deserialize")]
    pub saree_id: String,
    /// Denormalized display name filled in by the backend; never sent.
    #[serde(
        rename = "saree_name",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub saree_name: Option<String>,
    pub quantity: u32,
    pub price: f64,
}

impl OrderItem {
    pub fn new(saree_id: impl Into<String>, quantity: u32, price: f64) -> Self {
        Self {
            saree_id: saree_id.into(),
            saree_name: None,
            quantity,
            price,
        }
    }

    pub fn subtotal(&self) -> f64 {
        self.price * f64::from(self.quantity)
    }
}

/// A recorded payment. Payments are append-only; there is no edit or delete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    #[serde(deserialize_with = "string_id::deserialize")]
    pub id: String,
    pub amount: f64,
    pub method: PaymentMethod,
    pub date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Input for recording a payment against an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentDraft {
    pub amount: f64,
    pub method: PaymentMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl PaymentDraft {
    pub fn validate(&self) -> Result<()> {
        if self.amount <= 0.0 {
            return Err(Error::Validation("payment amount must be positive".into()));
        }
        Ok(())
    }
}

/// An order with embedded items and payments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    #[serde(deserialize_with = "string_id::deserialize")]
    pub id: String,
    #[serde(rename = "customer", deserialize_with = "string_id::deserialize")]
    pub customer_id: String,
    #[serde(
        rename = "customer_name",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub customer_name: Option<String>,
    pub items: Vec<OrderItem>,
    pub total_amount: f64,
    pub paid_amount: f64,
    pub due_amount: f64,
    #[serde(default)]
    pub payments: Vec<Payment>,
    pub status: OrderStatus,
    pub date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Order {
    /// Recompute `paid_amount`, `due_amount`, and the payment-derived status
    /// from the payment list. Pure in the payment set, so applying it after
    /// removing a rolled-back payment reproduces the prior amounts exactly.
    pub fn recompute(&mut self) {
        self.paid_amount = self.payments.iter().map(|p| p.amount).sum();
        self.due_amount = self.total_amount - self.paid_amount;
        self.status = OrderStatus::derived(self.paid_amount, self.total_amount);
    }
}

/// Input for creating an order.
#[derive(Debug, Clone)]
pub struct OrderDraft {
    pub customer_id: String,
    pub items: Vec<OrderItem>,
    pub notes: Option<String>,
}

impl OrderDraft {
    pub fn validate(&self) -> Result<()> {
        if self.items.is_empty() {
            return Err(Error::Validation(
                "order must contain at least one item".into(),
            ));
        }
        for item in &self.items {
            if item.quantity == 0 {
                return Err(Error::Validation("item quantity must be positive".into()));
            }
            if item.price < 0.0 {
                return Err(Error::Validation("item price must not be negative".into()));
            }
        }
        Ok(())
    }

    pub fn total_amount(&self) -> f64 {
        self.items.iter().map(OrderItem::subtotal).sum()
    }

    /// Build the optimistic local order: `Pending`, nothing paid, dated now.
    pub(crate) fn into_record(self, id: String) -> Order {
        let total = self.total_amount();
        Order {
            id,
            customer_id: self.customer_id,
            customer_name: None,
            items: self.items,
            total_amount: total,
            paid_amount: 0.0,
            due_amount: total,
            payments: Vec::new(),
            status: OrderStatus::Pending,
            date: Utc::now(),
            notes: self.notes,
        }
    }
}

// ---------------------------------------------------------------------------
// Identity helpers
// ---------------------------------------------------------------------------

/// Records the engine manages generically (optimistic create/update/delete).
pub trait HasId {
    fn id(&self) -> &str;
}

impl HasId for Saree {
    fn id(&self) -> &str {
        &self.id
    }
}

impl HasId for Customer {
    fn id(&self) -> &str {
        &self.id
    }
}

impl HasId for Order {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Temporary identifier for an optimistic record, replaced by the
/// authoritative id once the remote store confirms.
pub(crate) fn temp_id() -> String {
    format!("local-{}", Uuid::new_v4())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_derivation() {
        assert_eq!(OrderStatus::derived(0.0, 1000.0), OrderStatus::Pending);
        assert_eq!(OrderStatus::derived(400.0, 1000.0), OrderStatus::Partial);
        assert_eq!(OrderStatus::derived(1000.0, 1000.0), OrderStatus::Paid);
        // Overpayment is a valid terminal state, not an error.
        assert_eq!(OrderStatus::derived(1200.0, 1000.0), OrderStatus::Paid);
    }

    #[test]
    fn test_order_total_from_items() {
        let draft = OrderDraft {
            customer_id: "c1".into(),
            items: vec![OrderItem::new("s1", 1, 500.0), OrderItem::new("s2", 3, 200.0)],
            notes: None,
        };
        assert_eq!(draft.total_amount(), 1100.0);

        let order = draft.into_record(temp_id());
        assert_eq!(order.total_amount, 1100.0);
        assert_eq!(order.paid_amount, 0.0);
        assert_eq!(order.due_amount, 1100.0);
        assert_eq!(order.status, OrderStatus::Pending);
        assert!(order.payments.is_empty());
    }

    #[test]
    fn test_recompute_is_pure_in_payment_set() {
        let mut order = OrderDraft {
            customer_id: "c1".into(),
            items: vec![OrderItem::new("s1", 2, 5000.0)],
            notes: None,
        }
        .into_record("o1".into());

        order.payments.push(Payment {
            id: "p1".into(),
            amount: 4000.0,
            method: PaymentMethod::Cash,
            date: Utc::now(),
            notes: None,
        });
        order.recompute();
        assert_eq!(order.paid_amount, 4000.0);
        assert_eq!(order.due_amount, 6000.0);
        assert_eq!(order.status, OrderStatus::Partial);

        order.payments.push(Payment {
            id: "p2".into(),
            amount: 6000.0,
            method: PaymentMethod::Upi,
            date: Utc::now(),
            notes: None,
        });
        order.recompute();
        assert_eq!(order.paid_amount, 10000.0);
        assert_eq!(order.due_amount, 0.0);
        assert_eq!(order.status, OrderStatus::Paid);

        // Removing the second payment and recomputing restores the prior
        // amounts exactly.
        order.payments.retain(|p| p.id != "p2");
        order.recompute();
        assert_eq!(order.paid_amount, 4000.0);
        assert_eq!(order.due_amount, 6000.0);
        assert_eq!(order.status, OrderStatus::Partial);
    }

    #[test]
    fn test_draft_validation() {
        let empty = OrderDraft {
            customer_id: "c1".into(),
            items: vec![],
            notes: None,
        };
        assert!(empty.validate().is_err());

        let zero_qty = OrderDraft {
            customer_id: "c1".into(),
            items: vec![OrderItem::new("s1", 0, 100.0)],
            notes: None,
        };
        assert!(zero_qty.validate().is_err());

        assert!(PaymentDraft {
            amount: 0.0,
            method: PaymentMethod::Cash,
            notes: None,
        }
        .validate()
        .is_err());

        assert!(CustomerDraft {
            name: "Priya".into(),
            phone: "".into(),
            address: None,
            email: None,
            notes: String::new(),
        }
        .validate()
        .is_err());
    }

    #[test]
    fn test_wire_field_names() {
        let order = OrderDraft {
            customer_id: "c-9".into(),
            items: vec![OrderItem::new("s-4", 2, 250.0)],
            notes: Some("gift wrap".into()),
        }
        .into_record("o-1".into());

        let json = serde_json::to_value(&order).unwrap();
        assert_eq!(json["customer"], "c-9");
        assert_eq!(json["items"][0]["saree"], "s-4");
        assert_eq!(json["total_amount"], 500.0);
        assert_eq!(json["paid_amount"], 0.0);
        assert_eq!(json["due_amount"], 500.0);
        assert_eq!(json["status"], "Pending");

        let method = serde_json::to_value(PaymentMethod::Upi).unwrap();
        assert_eq!(method, "UPI");
    }

    #[test]
    fn test_order_roundtrip_from_backend_shape() {
        let raw = serde_json::json!({
            "id": "42",
            "customer": "7",
            "customer_name": "Priya Sharma",
            "items": [
                {"id": "1", "saree": "3", "saree_name": "Banarasi Silk", "quantity": 2, "price": 12500.0}
            ],
            "total_amount": 25000.0,
            "paid_amount": 10000.0,
            "due_amount": 15000.0,
            "payments": [
                {"id": "p1", "amount": 10000.0, "method": "Cash", "date": "2026-01-10T09:30:00Z"}
            ],
            "status": "Partial",
            "date": "2026-01-09T14:00:00Z"
        });
        let order: Order = serde_json::from_value(raw).unwrap();
        assert_eq!(order.customer_id, "7");
        assert_eq!(order.items[0].saree_id, "3");
        assert_eq!(order.items[0].saree_name.as_deref(), Some("Banarasi Silk"));
        assert_eq!(order.payments[0].method, PaymentMethod::Cash);
        assert_eq!(order.status, OrderStatus::Partial);
    }
}
