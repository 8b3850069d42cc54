//! Read-side report models: AR aging and member statements.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::AccountKind;

/// Aging classification of outstanding debt. Ordering is the tie-break
/// order used when picking an account's worst bucket:
/// `current < 30 < 60 < 90 < suspended`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AgingBucket {
    Current,
    Days30,
    Days60,
    Days90,
    Suspended,
}

impl AgingBucket {
    /// Bucket for an invoice `days` past its due date (negative = not due).
    pub fn for_days_overdue(days: i64) -> Self {
        if days < 30 {
            AgingBucket::Current
        } else if days < 60 {
            AgingBucket::Days30
        } else if days < 90 {
            AgingBucket::Days60
        } else {
            AgingBucket::Days90
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AgingBucket::Current => "current",
            AgingBucket::Days30 => "30",
            AgingBucket::Days60 => "60",
            AgingBucket::Days90 => "90",
            AgingBucket::Suspended => "suspended",
        }
    }
}

/// Report filter over the per-account worst-bucket classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgingFilter {
    #[default]
    All,
    Days30Plus,
    Days60Plus,
    Days90Plus,
    Suspended,
}

impl AgingFilter {
    pub fn matches(&self, bucket: AgingBucket) -> bool {
        match self {
            AgingFilter::All => true,
            AgingFilter::Days30Plus => bucket >= AgingBucket::Days30,
            AgingFilter::Days60Plus => bucket >= AgingBucket::Days60,
            AgingFilter::Days90Plus => bucket >= AgingBucket::Days90,
            AgingFilter::Suspended => bucket == AgingBucket::Suspended,
        }
    }
}

/// One account's row in the aging report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountAging {
    pub account_id: Uuid,
    pub account_no: String,
    pub name: String,
    pub kind: AccountKind,
    pub bucket: AgingBucket,
    pub outstanding: Decimal,
    pub oldest_due_date: NaiveDate,
}

/// Totals for one bucket across the (filtered) report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketTotal {
    pub bucket: AgingBucket,
    pub amount: Decimal,
    pub count: u32,
    pub percentage: Decimal,
}

/// The AR aging report. Pagination is a plain page/limit slice; cursor
/// encoding is the transport layer's concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArAgingReport {
    pub as_of: NaiveDate,
    pub total_outstanding: Decimal,
    pub buckets: Vec<BucketTotal>,
    pub accounts: Vec<AccountAging>,
    pub total_accounts: u32,
    pub page: u32,
    pub limit: u32,
}

/// Whether a statement line is debt (invoice) or settlement (payment).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementLineKind {
    Invoice,
    Payment,
}

/// One line of a member statement. `amount` is signed: invoices positive,
/// payments negative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatementLine {
    pub date: NaiveDate,
    pub kind: StatementLineKind,
    pub reference: String,
    pub description: String,
    pub amount: Decimal,
    pub running_balance: Decimal,
}

/// Member/city-ledger statement for a date range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberStatement {
    pub account_id: Uuid,
    pub account_no: String,
    pub account_name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub opening_balance: Decimal,
    pub closing_balance: Decimal,
    pub lines: Vec<StatementLine>,
}
