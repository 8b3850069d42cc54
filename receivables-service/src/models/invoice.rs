//! Invoice and line item models.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Invoice lifecycle status.
///
/// `Draft → Sent → {PartiallyPaid, Paid, Overdue} → Void`; `Paid` and
/// `Void` are terminal, `Void` is reachable from any non-`Paid` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "invoice_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    PartiallyPaid,
    Paid,
    Overdue,
    Void,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Sent => "sent",
            InvoiceStatus::PartiallyPaid => "partially_paid",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Overdue => "overdue",
            InvoiceStatus::Void => "void",
        }
    }

    /// True for statuses that can still receive payments or credit.
    pub fn is_outstanding(&self) -> bool {
        matches!(
            self,
            InvoiceStatus::Sent | InvoiceStatus::PartiallyPaid | InvoiceStatus::Overdue
        )
    }
}

/// An invoice against a receivable account. Never physically deleted;
/// voiding writes off the remaining balance instead.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub invoice_id: Uuid,
    pub tenant_id: Uuid,
    pub account_id: Uuid,
    pub invoice_number: String,
    pub invoice_date: NaiveDate,
    pub due_date: NaiveDate,
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub discount_amount: Decimal,
    pub total_amount: Decimal,
    pub paid_amount: Decimal,
    pub balance_due: Decimal,
    pub status: InvoiceStatus,
    pub notes: Option<String>,
    pub sent_utc: Option<DateTime<Utc>>,
    pub voided_utc: Option<DateTime<Utc>>,
    pub void_reason: Option<String>,
    pub created_utc: DateTime<Utc>,
}

/// Line item on an invoice. Immutable once the invoice leaves `Draft`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LineItem {
    pub line_item_id: Uuid,
    pub invoice_id: Uuid,
    pub tenant_id: Uuid,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub discount_pct: Decimal,
    pub taxable: bool,
    pub tax_rate: Decimal,
    pub line_total: Decimal,
    pub sort_order: i32,
}

/// Input for a single invoice line.
#[derive(Debug, Clone)]
pub struct CreateLineItem {
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub discount_pct: Decimal,
    pub taxable: bool,
    pub tax_rate: Decimal,
}

/// Input for creating an invoice. `discount_amount` is the pre-computed
/// invoice-level discount handed over by the discount engine.
#[derive(Debug, Clone)]
pub struct CreateInvoice {
    pub account_id: Uuid,
    pub invoice_date: NaiveDate,
    pub due_date: NaiveDate,
    pub discount_amount: Decimal,
    pub notes: Option<String>,
    pub line_items: Vec<CreateLineItem>,
}

/// Filter parameters for listing invoices.
#[derive(Debug, Clone, Default)]
pub struct ListInvoicesFilter {
    pub account_id: Option<Uuid>,
    pub status: Option<InvoiceStatus>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}
