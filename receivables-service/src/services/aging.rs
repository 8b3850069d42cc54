//! AR aging and statement aggregator. Pure read-side computation: no
//! locks, no mutation, and tolerant of slightly stale snapshots.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use ledger_core::{money, LedgerError, LedgerResult};
use rust_decimal::Decimal;
use tracing::instrument;
use uuid::Uuid;

use crate::models::{
    AccountAging, AccountStatus, AgingBucket, AgingFilter, ArAgingReport, BucketTotal, Invoice,
    MemberStatement, Payment, StatementLine, StatementLineKind,
};
use crate::store::LedgerStore;

/// Read-side reporting service.
#[derive(Clone)]
pub struct AgingService {
    store: Arc<dyn LedgerStore>,
}

impl AgingService {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Build the AR aging report.
    ///
    /// Each account lands in its worst invoice bucket (suspended accounts
    /// are forced into `suspended`); the filter then selects accounts by
    /// that classification, and bucket totals/percentages cover the
    /// filtered set. `page`/`limit` slice the account rows.
    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    pub async fn ar_aging_report(
        &self,
        tenant_id: Uuid,
        filter: AgingFilter,
        page: u32,
        limit: u32,
        as_of: Option<NaiveDate>,
    ) -> LedgerResult<ArAgingReport> {
        let as_of = as_of.unwrap_or_else(|| Utc::now().date_naive());
        let page = page.max(1);
        let limit = limit.clamp(1, 100);

        let accounts = self.store.list_accounts(tenant_id).await?;
        let open_invoices = self.store.open_invoices(tenant_id).await?;

        let mut by_account: HashMap<Uuid, Vec<&Invoice>> = HashMap::new();
        for invoice in &open_invoices {
            by_account.entry(invoice.account_id).or_default().push(invoice);
        }

        let mut rows: Vec<AccountAging> = Vec::new();
        for account in &accounts {
            let Some(invoices) = by_account.get(&account.account_id) else {
                continue;
            };
            let outstanding =
                money::round2(invoices.iter().map(|i| i.balance_due).sum::<Decimal>());
            if outstanding <= Decimal::ZERO {
                continue;
            }
            let worst = invoices
                .iter()
                .map(|i| {
                    AgingBucket::for_days_overdue(
                        as_of.signed_duration_since(i.due_date).num_days(),
                    )
                })
                .max()
                .unwrap_or(AgingBucket::Current);
            let bucket = if account.status == AccountStatus::Suspended {
                AgingBucket::Suspended
            } else {
                worst
            };
            let oldest_due_date = invoices
                .iter()
                .map(|i| i.due_date)
                .min()
                .unwrap_or(as_of);
            rows.push(AccountAging {
                account_id: account.account_id,
                account_no: account.account_no.clone(),
                name: account.name.clone(),
                kind: account.kind,
                bucket,
                outstanding,
                oldest_due_date,
            });
        }

        rows.retain(|row| filter.matches(row.bucket));
        rows.sort_by(|a, b| {
            b.outstanding
                .cmp(&a.outstanding)
                .then_with(|| a.account_no.cmp(&b.account_no))
        });

        let total_outstanding =
            money::round2(rows.iter().map(|r| r.outstanding).sum::<Decimal>());
        let mut totals: BTreeMap<AgingBucket, (Decimal, u32)> = BTreeMap::new();
        for row in &rows {
            let entry = totals.entry(row.bucket).or_insert((Decimal::ZERO, 0));
            entry.0 += row.outstanding;
            entry.1 += 1;
        }
        let buckets = totals
            .into_iter()
            .map(|(bucket, (amount, count))| BucketTotal {
                bucket,
                amount: money::round2(amount),
                count,
                percentage: if total_outstanding > Decimal::ZERO {
                    money::round2(amount / total_outstanding * Decimal::ONE_HUNDRED)
                } else {
                    Decimal::ZERO
                },
            })
            .collect();

        let total_accounts = rows.len() as u32;
        let start = ((page - 1) * limit) as usize;
        let accounts_page: Vec<AccountAging> = rows
            .into_iter()
            .skip(start)
            .take(limit as usize)
            .collect();

        Ok(ArAgingReport {
            as_of,
            total_outstanding,
            buckets,
            accounts: accounts_page,
            total_accounts,
            page,
            limit,
        })
    }

    /// Build a statement for one account over a date range: invoices as
    /// positive lines, payments as negative, date ascending with invoices
    /// before payments on equal dates, and a running balance seeded from
    /// pre-period activity.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, account_id = %account_id))]
    pub async fn member_statement(
        &self,
        tenant_id: Uuid,
        account_id: Uuid,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> LedgerResult<MemberStatement> {
        if end_date < start_date {
            return Err(LedgerError::validation(
                "statement end date precedes its start date",
            ));
        }
        let account = self
            .store
            .get_account(tenant_id, account_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("account", account_id))?;

        let opening_balance = self
            .store
            .opening_balance(tenant_id, account_id, start_date)
            .await?;
        let invoices = self
            .store
            .invoices_for_statement(tenant_id, account_id, start_date, end_date)
            .await?;
        let payments = self
            .store
            .payments_for_statement(tenant_id, account_id, start_date, end_date)
            .await?;

        // Merge date ascending; the stable sort keeps within-kind order and
        // puts the invoice first when an invoice and a payment share a date.
        enum Entry<'a> {
            Invoice(&'a Invoice),
            Payment(&'a Payment),
        }
        let mut entries: Vec<Entry> = invoices
            .iter()
            .map(Entry::Invoice)
            .chain(payments.iter().map(Entry::Payment))
            .collect();
        entries.sort_by_key(|entry| match entry {
            Entry::Invoice(i) => (i.invoice_date, 0u8),
            Entry::Payment(p) => (p.payment_date, 1u8),
        });

        let mut lines = Vec::with_capacity(entries.len());
        let mut running = opening_balance;
        for entry in entries {
            let line = match entry {
                Entry::Invoice(invoice) => {
                    running = money::round2(running + invoice.total_amount);
                    StatementLine {
                        date: invoice.invoice_date,
                        kind: StatementLineKind::Invoice,
                        reference: invoice.invoice_number.clone(),
                        description: "Invoice".to_string(),
                        amount: invoice.total_amount,
                        running_balance: running,
                    }
                }
                Entry::Payment(payment) => {
                    running = money::round2(running - payment.amount);
                    StatementLine {
                        date: payment.payment_date,
                        kind: StatementLineKind::Payment,
                        reference: payment.receipt_number.clone(),
                        description: format!("Payment - {}", payment.method.as_str()),
                        amount: -payment.amount,
                        running_balance: running,
                    }
                }
            };
            lines.push(line);
        }

        Ok(MemberStatement {
            account_id,
            account_no: account.account_no,
            account_name: account.name,
            start_date,
            end_date,
            opening_balance,
            closing_balance: running,
            lines,
        })
    }
}
