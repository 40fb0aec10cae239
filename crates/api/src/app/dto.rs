use serde::Deserialize;
use serde_json::{json, Value as JsonValue};

use autoshop_budget::{Invoice, ItemKind, Money};
use autoshop_core::AggregateRoot;
use autoshop_infra::{MaintenanceDue, OrderDetail, OrderSummary, ShopError, StageCounts};
use autoshop_mechanics::Mechanic;
use autoshop_orders::{Intake, Receipt, ServiceOrder};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    #[serde(flatten)]
    pub intake: Intake,
    /// Keep the order at reception instead of sending it on to diagnosis.
    #[serde(default)]
    pub hold: bool,
}

#[derive(Debug, Deserialize)]
pub struct AssignMechanicRequest {
    pub mechanic_id: String,
}

/// A price as the stations type it (`"150.00"`) or as a JSON number.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum PriceInput {
    Text(String),
    Number(serde_json::Number),
}

#[derive(Debug, Deserialize)]
pub struct AddItemRequest {
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub price: PriceInput,
}

impl AddItemRequest {
    pub fn kind(&self) -> Result<ItemKind, ShopError> {
        self.kind.parse::<ItemKind>().map_err(|e| ShopError::InvalidItem {
            field: e.field(),
            reason: e.to_string(),
        })
    }

    /// Signed cents. Negative amounts are passed through so the order can
    /// refuse them as an invalid item.
    pub fn price_cents(&self) -> Result<i64, ShopError> {
        let text = match &self.price {
            PriceInput::Text(s) => s.trim().to_string(),
            PriceInput::Number(n) => n.to_string(),
        };
        let invalid = |reason: String| ShopError::InvalidItem {
            field: "price",
            reason,
        };

        let (negative, magnitude) = match text.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, text.as_str()),
        };
        let cents = magnitude
            .parse::<Money>()
            .map_err(|e| invalid(e.to_string()))?
            .cents();
        let cents = i64::try_from(cents).map_err(|_| invalid(format!("amount '{text}' is too large")))?;
        Ok(if negative { -cents } else { cents })
    }
}

#[derive(Debug, Deserialize)]
pub struct DiagnosisNotesRequest {
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct DiscardRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PayRequest {
    #[serde(default)]
    pub method: String,
    pub warranty: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddMechanicRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub code: String,
}

/// `?expected_version=N` pins a write to the version the caller last saw.
#[derive(Debug, Default, Deserialize)]
pub struct VersionQuery {
    pub expected_version: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
    #[serde(default)]
    pub scope: String,
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub status: String,
}

// -------------------------
// JSON mapping helpers
// -------------------------

pub fn order_to_json(order: &ServiceOrder) -> JsonValue {
    let intake = order.intake();
    json!({
        "id": order.id_typed().to_string(),
        "version": order.version(),
        "status": order.status(),
        "status_label": order.status().label(),
        "customer": intake.customer,
        "vehicle": intake.vehicle,
        "reported_issue": intake.reported_issue,
        "is_maintenance": order.is_maintenance(),
        "mechanic_id": order.mechanic_id().map(|m| m.to_string()),
        "diagnosis_notes": order.diagnosis_notes(),
        "items": order.items(),
        "total": order.total().to_string(),
        "tax_rate_bps": order.tax_rate().map(|t| t.bps()),
        "payment": order.payment(),
        "discard_reason": order.discard_reason(),
        "cancelled_from": order.cancelled_from(),
        "created_at": order.created_at().to_rfc3339(),
        "status_changed_at": order.status_changed_at().to_rfc3339(),
    })
}

pub fn summary_to_json(row: &OrderSummary) -> JsonValue {
    json!({
        "id": row.order_id.to_string(),
        "version": row.version,
        "status": row.status,
        "status_label": row.status.label(),
        "customer_name": row.customer_name,
        "phone": row.phone,
        "email": row.email,
        "brand": row.brand,
        "model": row.model,
        "year": row.year,
        "plate": row.plate,
        "reported_issue": row.reported_issue,
        "is_maintenance": row.is_maintenance,
        "mechanic_id": row.mechanic_id.map(|m| m.to_string()),
        "item_count": row.item_count,
        "total": row.total.to_string(),
        "payment_method": row.payment_method,
        "created_at": row.created_at.to_rfc3339(),
        "status_changed_at": row.status_changed_at.to_rfc3339(),
    })
}

pub fn summaries_to_json(rows: &[OrderSummary]) -> JsonValue {
    JsonValue::Array(rows.iter().map(summary_to_json).collect())
}

pub fn mechanic_to_json(m: &Mechanic) -> JsonValue {
    json!({
        "id": m.id.to_string(),
        "name": m.name,
        "code": m.code,
    })
}

pub fn invoice_to_json(inv: &Invoice) -> JsonValue {
    json!({
        "order_id": inv.order_id.to_string(),
        "items": inv.items.iter().map(|i| json!({
            "line_no": i.line_no,
            "description": i.description,
            "type": i.kind.as_str(),
            "price": i.price.to_string(),
        })).collect::<Vec<_>>(),
        "total": inv.total.to_string(),
        "tax_rate_bps": inv.tax_rate.bps(),
        "tax": inv.tax.to_string(),
        "amount_due": inv.amount_due.to_string(),
        "mechanic": inv.mechanic.as_ref().map(mechanic_to_json),
        "maintenance": inv.maintenance,
    })
}

pub fn receipt_to_json(r: &Receipt) -> JsonValue {
    json!({
        "invoice": invoice_to_json(&r.invoice),
        "customer": r.customer,
        "vehicle": r.vehicle,
        "payment_method": r.payment_method,
        "paid_at": r.paid_at.to_rfc3339(),
        "warranty": r.warranty,
    })
}

pub fn detail_to_json(d: &OrderDetail) -> JsonValue {
    json!({
        "order": order_to_json(&d.order),
        "mechanic": d.mechanic.as_ref().map(mechanic_to_json),
        "invoice": d.invoice.as_ref().map(invoice_to_json),
    })
}

pub fn stage_counts_to_json(counts: &StageCounts) -> JsonValue {
    JsonValue::Array(
        counts
            .iter()
            .map(|(status, count)| {
                json!({
                    "status": status,
                    "label": status.label(),
                    "count": count,
                })
            })
            .collect(),
    )
}

pub fn maintenance_due_to_json(due: &MaintenanceDue) -> JsonValue {
    json!({
        "plate": due.plate,
        "last_service_at": due.last_service_at.to_rfc3339(),
        "days_since": due.days_since,
        "last_order": summary_to_json(&due.last_order),
    })
}
