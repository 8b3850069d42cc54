//! Payment arrangement models: structured installment plans over a group
//! of invoices.

use chrono::{DateTime, Months, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Installment cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "arrangement_frequency", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Weekly,
    Fortnightly,
    Monthly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Weekly => "weekly",
            Frequency::Fortnightly => "fortnightly",
            Frequency::Monthly => "monthly",
        }
    }

    /// Due date of installment `k` (0-based) counted from `start`.
    pub fn nth_due_date(&self, start: NaiveDate, k: u32) -> NaiveDate {
        match self {
            Frequency::Weekly => start + chrono::Duration::weeks(k as i64),
            Frequency::Fortnightly => start + chrono::Duration::weeks(2 * k as i64),
            Frequency::Monthly => start + Months::new(k),
        }
    }
}

/// Arrangement lifecycle: `Draft → Active → {Completed, Defaulted, Cancelled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "arrangement_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ArrangementStatus {
    Draft,
    Active,
    Completed,
    Defaulted,
    Cancelled,
}

impl ArrangementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArrangementStatus::Draft => "draft",
            ArrangementStatus::Active => "active",
            ArrangementStatus::Completed => "completed",
            ArrangementStatus::Defaulted => "defaulted",
            ArrangementStatus::Cancelled => "cancelled",
        }
    }
}

/// Installment status. `Overdue` is set by the time-based sweep, not by
/// payment recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "installment_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum InstallmentStatus {
    Pending,
    Paid,
    Overdue,
}

impl InstallmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstallmentStatus::Pending => "pending",
            InstallmentStatus::Paid => "paid",
            InstallmentStatus::Overdue => "overdue",
        }
    }
}

/// A repayment plan grouping one or more invoices.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PaymentArrangement {
    pub arrangement_id: Uuid,
    pub tenant_id: Uuid,
    pub account_id: Uuid,
    pub installment_count: i32,
    pub frequency: Frequency,
    pub start_date: NaiveDate,
    pub total_amount: Decimal,
    pub paid_amount: Decimal,
    pub remaining_amount: Decimal,
    pub status: ArrangementStatus,
    pub created_utc: DateTime<Utc>,
}

/// One installment of an arrangement. The sum of installment amounts always
/// equals the arrangement total; the rounding remainder sits on the last one.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ArrangementInstallment {
    pub installment_id: Uuid,
    pub arrangement_id: Uuid,
    pub tenant_id: Uuid,
    pub installment_no: i32,
    pub due_date: NaiveDate,
    pub amount: Decimal,
    pub paid_amount: Decimal,
    pub status: InstallmentStatus,
}

/// Input for creating an arrangement.
#[derive(Debug, Clone)]
pub struct CreateArrangement {
    pub account_id: Uuid,
    pub invoice_ids: Vec<Uuid>,
    pub installment_count: u32,
    pub frequency: Frequency,
    pub start_date: NaiveDate,
}
