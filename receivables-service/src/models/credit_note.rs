//! Credit note models.

use chrono::{DateTime, Utc};
use ledger_core::money;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Why the credit note was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "credit_note_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CreditNoteKind {
    Refund,
    Adjustment,
    Goodwill,
}

impl CreditNoteKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CreditNoteKind::Refund => "refund",
            CreditNoteKind::Adjustment => "adjustment",
            CreditNoteKind::Goodwill => "goodwill",
        }
    }
}

/// Credit note lifecycle status.
///
/// `PendingApproval → Approved → {Applied, PartiallyApplied, Refunded}`,
/// with `Voided` reachable only before any application or refund.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "credit_note_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CreditNoteStatus {
    PendingApproval,
    Approved,
    Applied,
    PartiallyApplied,
    Refunded,
    Voided,
}

impl CreditNoteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CreditNoteStatus::PendingApproval => "pending_approval",
            CreditNoteStatus::Approved => "approved",
            CreditNoteStatus::Applied => "applied",
            CreditNoteStatus::PartiallyApplied => "partially_applied",
            CreditNoteStatus::Refunded => "refunded",
            CreditNoteStatus::Voided => "voided",
        }
    }

    /// True while the note still has credit that can be applied or refunded.
    pub fn is_applicable(&self) -> bool {
        matches!(
            self,
            CreditNoteStatus::Approved | CreditNoteStatus::PartiallyApplied
        )
    }
}

/// A credit note reducing what an account owes, or increasing its standing
/// credit. Numbered `CN-{year}-{seq:06}` from a per-tenant-per-year atomic
/// counter; numbers are never reused, even after voids.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CreditNote {
    pub credit_note_id: Uuid,
    pub tenant_id: Uuid,
    pub account_id: Uuid,
    pub credit_note_number: String,
    pub kind: CreditNoteKind,
    pub reason: String,
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub total_amount: Decimal,
    pub applied_to_balance: Decimal,
    pub refunded_amount: Decimal,
    pub status: CreditNoteStatus,
    pub approved_by: Option<String>,
    pub approved_utc: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub created_utc: DateTime<Utc>,
}

impl CreditNote {
    /// Credit not yet consumed by applications or refunds.
    pub fn remaining(&self) -> Decimal {
        money::sub_clamped(
            self.total_amount,
            self.applied_to_balance + self.refunded_amount,
        )
    }
}

/// Line item on a credit note. `tax_amount` is non-zero only when taxable.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CreditNoteLineItem {
    pub line_item_id: Uuid,
    pub credit_note_id: Uuid,
    pub tenant_id: Uuid,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub taxable: bool,
    pub tax_rate: Decimal,
    pub line_total: Decimal,
    pub tax_amount: Decimal,
    pub sort_order: i32,
}

/// Join of one credit note to one target invoice.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CreditNoteApplication {
    pub application_id: Uuid,
    pub tenant_id: Uuid,
    pub credit_note_id: Uuid,
    pub invoice_id: Uuid,
    pub amount: Decimal,
    pub created_utc: DateTime<Utc>,
}

/// Input for a single credit note line.
#[derive(Debug, Clone)]
pub struct CreateCreditNoteLine {
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub taxable: bool,
    pub tax_rate: Decimal,
}

/// Input for issuing a credit note.
#[derive(Debug, Clone)]
pub struct CreateCreditNote {
    pub account_id: Uuid,
    pub kind: CreditNoteKind,
    pub reason: String,
    pub line_items: Vec<CreateCreditNoteLine>,
}
