//! # Domain Types
//!
//! Core entities tracked by MeterGrid and the closed set of entity kinds the
//! sync layer operates on.
//!
//! ## Serialization Contract
//! Every entity derives `Serialize`/`Deserialize` with snake_case fields,
//! matching the remote service's column names exactly. A queued offline
//! payload is therefore byte-for-byte replayable against the remote
//! collection without translation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Entity Kind
// =============================================================================

/// The closed set of entity kinds the sync core tracks.
///
/// Each kind maps to one remote collection. Sales additionally own child
/// line items in the `sales_items` collection, handled by the composite
/// sale replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Product,
    Meter,
    Customer,
    Sale,
}

impl EntityKind {
    /// All kinds, in refresh order.
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Product,
        EntityKind::Meter,
        EntityKind::Customer,
        EntityKind::Sale,
    ];

    /// The remote collection this kind is stored in.
    pub fn collection(&self) -> &'static str {
        match self {
            EntityKind::Product => "products",
            EntityKind::Meter => "meters",
            EntityKind::Customer => "customers",
            EntityKind::Sale => "sales_transactions",
        }
    }

    /// The field carrying an exclusive state, if this kind has one.
    ///
    /// An exclusive-state field describes a claim on physical inventory
    /// (a meter is either sold or it is not). Divergent concurrent writes
    /// to such a field are never auto-merged; the conflict detector emits
    /// a data conflict instead.
    pub fn exclusive_state_field(&self) -> Option<&'static str> {
        match self {
            EntityKind::Meter => Some("status"),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Product => write!(f, "product"),
            EntityKind::Meter => write!(f, "meter"),
            EntityKind::Customer => write!(f, "customer"),
            EntityKind::Sale => write!(f, "sale"),
        }
    }
}

// =============================================================================
// Meter Status
// =============================================================================

/// Lifecycle status of a physical meter.
///
/// ## State Machine
/// ```text
/// in-stock ──► allocated ──► sold ────┐
///    ▲   ▲        │    └──► installed│
///    │   │        ▼                  ▼
///    │   └──── (return)          returned ──► in-stock | faulty
///    │
///    └── faulty (after repair); any state may be flagged faulty
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MeterStatus {
    /// In the warehouse, unassigned.
    InStock,
    /// Issued to a field agent.
    Allocated,
    /// Sold to a customer.
    Sold,
    /// Installed at a customer site.
    Installed,
    /// Returned by agent or customer, awaiting inspection.
    Returned,
    /// Flagged defective, awaiting repair.
    Faulty,
}

impl MeterStatus {
    /// Returns true when a meter may move from `self` to `next`.
    ///
    /// Enforced by convention in the Inventory facade; the conflict
    /// detector's data-conflict check is the backstop against invalid
    /// concurrent transitions.
    pub fn can_transition_to(&self, next: MeterStatus) -> bool {
        use MeterStatus::*;

        if *self == next {
            return false;
        }

        // Any state may be flagged faulty.
        if next == Faulty {
            return true;
        }

        match (self, next) {
            (InStock, Allocated) => true,
            (Allocated, Sold) | (Allocated, Installed) => true,
            // Agent hands unsold stock back.
            (Allocated, InStock) => true,
            (Sold, Returned) | (Installed, Returned) => true,
            // Post-inspection outcome.
            (Returned, InStock) => true,
            // Repaired meters re-enter stock.
            (Faulty, InStock) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for MeterStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MeterStatus::InStock => "in-stock",
            MeterStatus::Allocated => "allocated",
            MeterStatus::Sold => "sold",
            MeterStatus::Installed => "installed",
            MeterStatus::Returned => "returned",
            MeterStatus::Faulty => "faulty",
        };
        write!(f, "{s}")
    }
}

// =============================================================================
// Product
// =============================================================================

/// A meter model stocked in the warehouse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    /// Unique identifier (UUID v4, or a temporary id while pending sync).
    pub id: String,

    /// Display name shown in the dashboard.
    pub name: String,

    /// Manufacturer model number.
    pub model: String,

    /// Manufacturer name.
    pub manufacturer: String,

    /// Unit price in cents (smallest currency unit).
    pub price_cents: i64,

    /// Units currently in the warehouse.
    pub stock_quantity: i64,

    /// Free-form notes.
    pub notes: Option<String>,

    pub created_at: DateTime<Utc>,

    /// Last-modified marker, the basis for version conflict detection.
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Meter
// =============================================================================

/// A physical electricity meter tracked through its lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meter {
    pub id: String,

    /// Manufacturer serial number - the business identifier.
    pub serial_number: String,

    /// Product (model) this meter is an instance of.
    pub product_id: String,

    /// Exclusive lifecycle state; see [`MeterStatus`].
    pub status: MeterStatus,

    /// Warehouse shelf or field location.
    pub location: Option<String>,

    /// Field agent currently holding this meter, when allocated.
    pub agent_id: Option<String>,

    /// Customer the meter was sold or installed to.
    pub customer_id: Option<String>,

    pub notes: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Customer
// =============================================================================

/// A customer that meters are sold or installed to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    pub name: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Sale
// =============================================================================

/// A sale transaction (remote collection `sales_transactions`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sale {
    pub id: String,
    pub customer_id: String,

    /// Sum of line-item prices in cents.
    pub total_cents: i64,

    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A line item in a sale (remote collection `sales_items`).
///
/// One item per meter sold; the price is frozen at time of sale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaleItem {
    pub id: String,
    pub transaction_id: String,
    pub meter_id: String,
    pub price_cents: i64,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn collection_names_match_remote_schema() {
        assert_eq!(EntityKind::Product.collection(), "products");
        assert_eq!(EntityKind::Sale.collection(), "sales_transactions");
    }

    #[test]
    fn meter_is_the_only_exclusive_state_kind() {
        assert_eq!(EntityKind::Meter.exclusive_state_field(), Some("status"));
        assert_eq!(EntityKind::Product.exclusive_state_field(), None);
        assert_eq!(EntityKind::Customer.exclusive_state_field(), None);
    }

    #[test]
    fn status_serializes_kebab_case() {
        let json = serde_json::to_string(&MeterStatus::InStock).unwrap();
        assert_eq!(json, "\"in-stock\"");

        let back: MeterStatus = serde_json::from_str("\"allocated\"").unwrap();
        assert_eq!(back, MeterStatus::Allocated);
    }

    #[test]
    fn valid_transitions() {
        use MeterStatus::*;
        assert!(InStock.can_transition_to(Allocated));
        assert!(Allocated.can_transition_to(Sold));
        assert!(Allocated.can_transition_to(Installed));
        assert!(Allocated.can_transition_to(InStock));
        assert!(Sold.can_transition_to(Returned));
        assert!(Returned.can_transition_to(InStock));
        assert!(Faulty.can_transition_to(InStock));
    }

    #[test]
    fn any_state_may_go_faulty() {
        use MeterStatus::*;
        for status in [InStock, Allocated, Sold, Installed, Returned] {
            assert!(status.can_transition_to(Faulty), "{status} -> faulty");
        }
    }

    #[test]
    fn invalid_transitions() {
        use MeterStatus::*;
        assert!(!InStock.can_transition_to(Sold));
        assert!(!InStock.can_transition_to(InStock));
        assert!(!Sold.can_transition_to(Allocated));
        assert!(!Returned.can_transition_to(Sold));
    }
}
