//! Payment and allocation models.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Payment method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_method", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Card,
    BankTransfer,
    Cheque,
    DirectDebit,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Card => "card",
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::Cheque => "cheque",
            PaymentMethod::DirectDebit => "direct_debit",
        }
    }
}

/// A payment received against an account. Allocation rows record how much
/// of it settled which invoice; any unallocated remainder is credited to
/// the account's `credit_balance` in the same transaction.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub payment_id: Uuid,
    pub tenant_id: Uuid,
    pub account_id: Uuid,
    pub receipt_number: String,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub reference: Option<String>,
    pub payment_date: NaiveDate,
    pub created_utc: DateTime<Utc>,
}

/// Join of one payment to one invoice.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PaymentAllocation {
    pub allocation_id: Uuid,
    pub tenant_id: Uuid,
    pub payment_id: Uuid,
    pub invoice_id: Uuid,
    pub amount: Decimal,
    pub created_utc: DateTime<Utc>,
}

/// A requested manual allocation within [`RecordPayment`].
#[derive(Debug, Clone)]
pub struct AllocationRequest {
    pub invoice_id: Uuid,
    pub amount: Decimal,
}

/// Input for recording a payment with explicit allocations.
#[derive(Debug, Clone)]
pub struct RecordPayment {
    pub account_id: Uuid,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub payment_date: NaiveDate,
    pub reference: Option<String>,
    pub allocations: Vec<AllocationRequest>,
}
