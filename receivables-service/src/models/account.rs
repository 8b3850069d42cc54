//! AR account model: club members and city-ledger (corporate) accounts.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Kind of receivable account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "account_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AccountKind {
    Member,
    CityLedger,
}

impl AccountKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountKind::Member => "member",
            AccountKind::CityLedger => "city_ledger",
        }
    }
}

/// Account standing. Suspended accounts are forced into the `suspended`
/// aging bucket regardless of invoice age.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "account_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Active,
    Suspended,
    Closed,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Suspended => "suspended",
            AccountStatus::Closed => "closed",
        }
    }
}

/// A receivable account. `credit_balance` is pre-paid/overpaid credit held
/// on the account; the outstanding balance is always computed from the
/// account's open invoices, never stored.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ArAccount {
    pub account_id: Uuid,
    pub tenant_id: Uuid,
    pub account_no: String,
    pub name: String,
    pub kind: AccountKind,
    pub status: AccountStatus,
    pub credit_balance: Decimal,
    pub created_utc: DateTime<Utc>,
}

impl ArAccount {
    pub fn new(tenant_id: Uuid, account_no: impl Into<String>, name: impl Into<String>, kind: AccountKind) -> Self {
        Self {
            account_id: Uuid::new_v4(),
            tenant_id,
            account_no: account_no.into(),
            name: name.into(),
            kind,
            status: AccountStatus::Active,
            credit_balance: Decimal::ZERO,
            created_utc: Utc::now(),
        }
    }
}
