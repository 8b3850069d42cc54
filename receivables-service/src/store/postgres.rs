//! PostgreSQL store adapter.
//!
//! Production implementation of the persistence port. Runtime `query_as`
//! queries over a `PgPool`; per-account serialization comes from
//! `SELECT … FOR UPDATE` on the account row at the top of every
//! transaction, and document numbering from an upsert on the counters
//! table rather than a last-row scan.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use ledger_core::config::DatabaseSettings;
use ledger_core::{LedgerError, LedgerResult};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions, Postgres};
use sqlx::Transaction;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::models::{
    ArAccount, ArrangementInstallment, CreditNote, CreditNoteApplication, CreditNoteLineItem,
    Invoice, LineItem, ListInvoicesFilter, Payment, PaymentAllocation, PaymentArrangement,
};
use crate::store::{DocumentKind, LedgerStore, LedgerTx};

/// PostgreSQL-backed [`LedgerStore`].
#[derive(Clone)]
pub struct PostgresLedgerStore {
    pool: PgPool,
}

impl PostgresLedgerStore {
    /// Create a new connection pool.
    #[instrument(skip(settings), fields(service = "receivables-service"))]
    pub async fn new(settings: &DatabaseSettings) -> LedgerResult<Self> {
        info!(
            max_connections = settings.max_connections,
            min_connections = settings.min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .min_connections(settings.min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(&settings.url)
            .await
            .map_err(|e| LedgerError::Database(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> LedgerResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| LedgerError::Database(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> LedgerResult<()> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| LedgerError::Database(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }
}

const ACCOUNT_COLS: &str =
    "account_id, tenant_id, account_no, name, kind, status, credit_balance, created_utc";

const INVOICE_COLS: &str = "invoice_id, tenant_id, account_id, invoice_number, invoice_date, \
     due_date, subtotal, tax_amount, discount_amount, total_amount, paid_amount, balance_due, \
     status, notes, sent_utc, voided_utc, void_reason, created_utc";

const LINE_ITEM_COLS: &str = "line_item_id, invoice_id, tenant_id, description, quantity, \
     unit_price, discount_pct, taxable, tax_rate, line_total, sort_order";

const PAYMENT_COLS: &str = "payment_id, tenant_id, account_id, receipt_number, amount, method, \
     reference, payment_date, created_utc";

const CREDIT_NOTE_COLS: &str = "credit_note_id, tenant_id, account_id, credit_note_number, kind, \
     reason, subtotal, tax_amount, total_amount, applied_to_balance, refunded_amount, status, \
     approved_by, approved_utc, notes, created_utc";

const CREDIT_NOTE_LINE_COLS: &str = "line_item_id, credit_note_id, tenant_id, description, \
     quantity, unit_price, taxable, tax_rate, line_total, tax_amount, sort_order";

const ARRANGEMENT_COLS: &str = "arrangement_id, tenant_id, account_id, installment_count, \
     frequency, start_date, total_amount, paid_amount, remaining_amount, status, created_utc";

const INSTALLMENT_COLS: &str = "installment_id, arrangement_id, tenant_id, installment_no, \
     due_date, amount, paid_amount, status";

fn db_err(context: &str, e: sqlx::Error) -> LedgerError {
    LedgerError::Database(anyhow::anyhow!("{}: {}", context, e))
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    async fn begin(&self) -> LedgerResult<Box<dyn LedgerTx>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_err("Failed to begin transaction", e))?;
        Ok(Box::new(PgTx { tx }))
    }

    #[instrument(skip(self, account), fields(tenant_id = %account.tenant_id, account_id = %account.account_id))]
    async fn insert_account(&self, account: &ArAccount) -> LedgerResult<()> {
        sqlx::query(
            "INSERT INTO ar_accounts (account_id, tenant_id, account_no, name, kind, status, \
             credit_balance, created_utc) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(account.account_id)
        .bind(account.tenant_id)
        .bind(&account.account_no)
        .bind(&account.name)
        .bind(account.kind)
        .bind(account.status)
        .bind(account.credit_balance)
        .bind(account.created_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("Failed to insert account", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, account_id = %account_id))]
    async fn get_account(
        &self,
        tenant_id: Uuid,
        account_id: Uuid,
    ) -> LedgerResult<Option<ArAccount>> {
        sqlx::query_as::<_, ArAccount>(&format!(
            "SELECT {ACCOUNT_COLS} FROM ar_accounts WHERE tenant_id = $1 AND account_id = $2"
        ))
        .bind(tenant_id)
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("Failed to get account", e))
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    async fn list_accounts(&self, tenant_id: Uuid) -> LedgerResult<Vec<ArAccount>> {
        sqlx::query_as::<_, ArAccount>(&format!(
            "SELECT {ACCOUNT_COLS} FROM ar_accounts WHERE tenant_id = $1 ORDER BY account_no"
        ))
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("Failed to list accounts", e))
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    async fn get_invoice(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> LedgerResult<Option<Invoice>> {
        sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {INVOICE_COLS} FROM invoices WHERE tenant_id = $1 AND invoice_id = $2"
        ))
        .bind(tenant_id)
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("Failed to get invoice", e))
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    async fn get_line_items(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> LedgerResult<Vec<LineItem>> {
        sqlx::query_as::<_, LineItem>(&format!(
            "SELECT {LINE_ITEM_COLS} FROM line_items \
             WHERE tenant_id = $1 AND invoice_id = $2 ORDER BY sort_order"
        ))
        .bind(tenant_id)
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("Failed to get line items", e))
    }

    #[instrument(skip(self, filter), fields(tenant_id = %tenant_id))]
    async fn list_invoices(
        &self,
        tenant_id: Uuid,
        filter: &ListInvoicesFilter,
    ) -> LedgerResult<Vec<Invoice>> {
        sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {INVOICE_COLS} FROM invoices \
             WHERE tenant_id = $1 \
               AND ($2::uuid IS NULL OR account_id = $2) \
               AND ($3::invoice_status IS NULL OR status = $3) \
               AND ($4::date IS NULL OR invoice_date >= $4) \
               AND ($5::date IS NULL OR invoice_date <= $5) \
             ORDER BY invoice_date, invoice_number"
        ))
        .bind(tenant_id)
        .bind(filter.account_id)
        .bind(filter.status)
        .bind(filter.start_date)
        .bind(filter.end_date)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("Failed to list invoices", e))
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, payment_id = %payment_id))]
    async fn get_payment(
        &self,
        tenant_id: Uuid,
        payment_id: Uuid,
    ) -> LedgerResult<Option<Payment>> {
        sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLS} FROM payments WHERE tenant_id = $1 AND payment_id = $2"
        ))
        .bind(tenant_id)
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("Failed to get payment", e))
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, credit_note_id = %credit_note_id))]
    async fn get_credit_note(
        &self,
        tenant_id: Uuid,
        credit_note_id: Uuid,
    ) -> LedgerResult<Option<CreditNote>> {
        sqlx::query_as::<_, CreditNote>(&format!(
            "SELECT {CREDIT_NOTE_COLS} FROM credit_notes \
             WHERE tenant_id = $1 AND credit_note_id = $2"
        ))
        .bind(tenant_id)
        .bind(credit_note_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("Failed to get credit note", e))
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, credit_note_id = %credit_note_id))]
    async fn get_credit_note_line_items(
        &self,
        tenant_id: Uuid,
        credit_note_id: Uuid,
    ) -> LedgerResult<Vec<CreditNoteLineItem>> {
        sqlx::query_as::<_, CreditNoteLineItem>(&format!(
            "SELECT {CREDIT_NOTE_LINE_COLS} FROM credit_note_line_items \
             WHERE tenant_id = $1 AND credit_note_id = $2 ORDER BY sort_order"
        ))
        .bind(tenant_id)
        .bind(credit_note_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("Failed to get credit note line items", e))
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, arrangement_id = %arrangement_id))]
    async fn get_arrangement(
        &self,
        tenant_id: Uuid,
        arrangement_id: Uuid,
    ) -> LedgerResult<Option<PaymentArrangement>> {
        sqlx::query_as::<_, PaymentArrangement>(&format!(
            "SELECT {ARRANGEMENT_COLS} FROM payment_arrangements \
             WHERE tenant_id = $1 AND arrangement_id = $2"
        ))
        .bind(tenant_id)
        .bind(arrangement_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("Failed to get arrangement", e))
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, arrangement_id = %arrangement_id))]
    async fn get_installments(
        &self,
        tenant_id: Uuid,
        arrangement_id: Uuid,
    ) -> LedgerResult<Vec<ArrangementInstallment>> {
        sqlx::query_as::<_, ArrangementInstallment>(&format!(
            "SELECT {INSTALLMENT_COLS} FROM arrangement_installments \
             WHERE tenant_id = $1 AND arrangement_id = $2 ORDER BY installment_no"
        ))
        .bind(tenant_id)
        .bind(arrangement_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("Failed to get installments", e))
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    async fn open_invoices(&self, tenant_id: Uuid) -> LedgerResult<Vec<Invoice>> {
        sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {INVOICE_COLS} FROM invoices \
             WHERE tenant_id = $1 \
               AND status IN ('sent', 'partially_paid', 'overdue') \
               AND balance_due > 0 \
             ORDER BY due_date, invoice_number"
        ))
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("Failed to load open invoices", e))
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, account_id = %account_id))]
    async fn invoices_for_statement(
        &self,
        tenant_id: Uuid,
        account_id: Uuid,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> LedgerResult<Vec<Invoice>> {
        sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {INVOICE_COLS} FROM invoices \
             WHERE tenant_id = $1 AND account_id = $2 \
               AND status NOT IN ('draft', 'void') \
               AND invoice_date >= $3 AND invoice_date <= $4 \
             ORDER BY invoice_date, invoice_number"
        ))
        .bind(tenant_id)
        .bind(account_id)
        .bind(start_date)
        .bind(end_date)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("Failed to get invoices for statement", e))
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, account_id = %account_id))]
    async fn payments_for_statement(
        &self,
        tenant_id: Uuid,
        account_id: Uuid,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> LedgerResult<Vec<Payment>> {
        sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLS} FROM payments \
             WHERE tenant_id = $1 AND account_id = $2 \
               AND payment_date >= $3 AND payment_date <= $4 \
             ORDER BY payment_date, receipt_number"
        ))
        .bind(tenant_id)
        .bind(account_id)
        .bind(start_date)
        .bind(end_date)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("Failed to get payments for statement", e))
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, account_id = %account_id))]
    async fn opening_balance(
        &self,
        tenant_id: Uuid,
        account_id: Uuid,
        before_date: NaiveDate,
    ) -> LedgerResult<Decimal> {
        let invoiced: Option<Decimal> = sqlx::query_scalar(
            "SELECT COALESCE(SUM(total_amount), 0) FROM invoices \
             WHERE tenant_id = $1 AND account_id = $2 \
               AND status NOT IN ('draft', 'void') AND invoice_date < $3",
        )
        .bind(tenant_id)
        .bind(account_id)
        .bind(before_date)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_err("Failed to sum pre-period invoices", e))?;

        let paid: Option<Decimal> = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0) FROM payments \
             WHERE tenant_id = $1 AND account_id = $2 AND payment_date < $3",
        )
        .bind(tenant_id)
        .bind(account_id)
        .bind(before_date)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_err("Failed to sum pre-period payments", e))?;

        Ok(ledger_core::money::round2(
            invoiced.unwrap_or(Decimal::ZERO) - paid.unwrap_or(Decimal::ZERO),
        ))
    }
}

struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTx for PgTx {
    async fn lock_account(
        &mut self,
        tenant_id: Uuid,
        account_id: Uuid,
    ) -> LedgerResult<Option<ArAccount>> {
        sqlx::query_as::<_, ArAccount>(&format!(
            "SELECT {ACCOUNT_COLS} FROM ar_accounts \
             WHERE tenant_id = $1 AND account_id = $2 FOR UPDATE"
        ))
        .bind(tenant_id)
        .bind(account_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| db_err("Failed to lock account", e))
    }

    async fn update_account(&mut self, account: &ArAccount) -> LedgerResult<()> {
        sqlx::query(
            "UPDATE ar_accounts SET status = $3, credit_balance = $4 \
             WHERE tenant_id = $1 AND account_id = $2",
        )
        .bind(account.tenant_id)
        .bind(account.account_id)
        .bind(account.status)
        .bind(account.credit_balance)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_err("Failed to update account", e))?;
        Ok(())
    }

    async fn get_invoice(
        &mut self,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> LedgerResult<Option<Invoice>> {
        sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {INVOICE_COLS} FROM invoices WHERE tenant_id = $1 AND invoice_id = $2"
        ))
        .bind(tenant_id)
        .bind(invoice_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| db_err("Failed to get invoice", e))
    }

    async fn outstanding_invoices(
        &mut self,
        tenant_id: Uuid,
        account_id: Uuid,
    ) -> LedgerResult<Vec<Invoice>> {
        sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {INVOICE_COLS} FROM invoices \
             WHERE tenant_id = $1 AND account_id = $2 \
               AND status IN ('sent', 'partially_paid', 'overdue') \
               AND balance_due > 0 \
             ORDER BY due_date, invoice_number"
        ))
        .bind(tenant_id)
        .bind(account_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| db_err("Failed to load outstanding invoices", e))
    }

    async fn insert_invoice(
        &mut self,
        invoice: &Invoice,
        line_items: &[LineItem],
    ) -> LedgerResult<()> {
        sqlx::query(
            "INSERT INTO invoices (invoice_id, tenant_id, account_id, invoice_number, \
             invoice_date, due_date, subtotal, tax_amount, discount_amount, total_amount, \
             paid_amount, balance_due, status, notes, sent_utc, voided_utc, void_reason, \
             created_utc) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, \
             $17, $18)",
        )
        .bind(invoice.invoice_id)
        .bind(invoice.tenant_id)
        .bind(invoice.account_id)
        .bind(&invoice.invoice_number)
        .bind(invoice.invoice_date)
        .bind(invoice.due_date)
        .bind(invoice.subtotal)
        .bind(invoice.tax_amount)
        .bind(invoice.discount_amount)
        .bind(invoice.total_amount)
        .bind(invoice.paid_amount)
        .bind(invoice.balance_due)
        .bind(invoice.status)
        .bind(&invoice.notes)
        .bind(invoice.sent_utc)
        .bind(invoice.voided_utc)
        .bind(&invoice.void_reason)
        .bind(invoice.created_utc)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_err("Failed to insert invoice", e))?;

        for item in line_items {
            sqlx::query(
                "INSERT INTO line_items (line_item_id, invoice_id, tenant_id, description, \
                 quantity, unit_price, discount_pct, taxable, tax_rate, line_total, sort_order) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
            )
            .bind(item.line_item_id)
            .bind(item.invoice_id)
            .bind(item.tenant_id)
            .bind(&item.description)
            .bind(item.quantity)
            .bind(item.unit_price)
            .bind(item.discount_pct)
            .bind(item.taxable)
            .bind(item.tax_rate)
            .bind(item.line_total)
            .bind(item.sort_order)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_err("Failed to insert line item", e))?;
        }
        Ok(())
    }

    async fn update_invoice(&mut self, invoice: &Invoice) -> LedgerResult<()> {
        sqlx::query(
            "UPDATE invoices SET paid_amount = $3, balance_due = $4, status = $5, \
             sent_utc = $6, voided_utc = $7, void_reason = $8 \
             WHERE tenant_id = $1 AND invoice_id = $2",
        )
        .bind(invoice.tenant_id)
        .bind(invoice.invoice_id)
        .bind(invoice.paid_amount)
        .bind(invoice.balance_due)
        .bind(invoice.status)
        .bind(invoice.sent_utc)
        .bind(invoice.voided_utc)
        .bind(&invoice.void_reason)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_err("Failed to update invoice", e))?;
        Ok(())
    }

    async fn mark_overdue_invoices(
        &mut self,
        tenant_id: Uuid,
        as_of: NaiveDate,
    ) -> LedgerResult<u64> {
        let result = sqlx::query(
            "UPDATE invoices SET status = 'overdue' \
             WHERE tenant_id = $1 AND status = 'sent' AND due_date < $2 AND balance_due > 0",
        )
        .bind(tenant_id)
        .bind(as_of)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_err("Failed to mark overdue invoices", e))?;
        Ok(result.rows_affected())
    }

    async fn insert_payment(&mut self, payment: &Payment) -> LedgerResult<()> {
        sqlx::query(
            "INSERT INTO payments (payment_id, tenant_id, account_id, receipt_number, amount, \
             method, reference, payment_date, created_utc) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(payment.payment_id)
        .bind(payment.tenant_id)
        .bind(payment.account_id)
        .bind(&payment.receipt_number)
        .bind(payment.amount)
        .bind(payment.method)
        .bind(&payment.reference)
        .bind(payment.payment_date)
        .bind(payment.created_utc)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_err("Failed to insert payment", e))?;
        Ok(())
    }

    async fn insert_allocation(&mut self, allocation: &PaymentAllocation) -> LedgerResult<()> {
        sqlx::query(
            "INSERT INTO payment_allocations (allocation_id, tenant_id, payment_id, invoice_id, \
             amount, created_utc) VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(allocation.allocation_id)
        .bind(allocation.tenant_id)
        .bind(allocation.payment_id)
        .bind(allocation.invoice_id)
        .bind(allocation.amount)
        .bind(allocation.created_utc)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_err("Failed to insert allocation", e))?;
        Ok(())
    }

    async fn get_credit_note(
        &mut self,
        tenant_id: Uuid,
        credit_note_id: Uuid,
    ) -> LedgerResult<Option<CreditNote>> {
        sqlx::query_as::<_, CreditNote>(&format!(
            "SELECT {CREDIT_NOTE_COLS} FROM credit_notes \
             WHERE tenant_id = $1 AND credit_note_id = $2"
        ))
        .bind(tenant_id)
        .bind(credit_note_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| db_err("Failed to get credit note", e))
    }

    async fn insert_credit_note(
        &mut self,
        note: &CreditNote,
        line_items: &[CreditNoteLineItem],
    ) -> LedgerResult<()> {
        sqlx::query(
            "INSERT INTO credit_notes (credit_note_id, tenant_id, account_id, \
             credit_note_number, kind, reason, subtotal, tax_amount, total_amount, \
             applied_to_balance, refunded_amount, status, approved_by, approved_utc, notes, \
             created_utc) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
        )
        .bind(note.credit_note_id)
        .bind(note.tenant_id)
        .bind(note.account_id)
        .bind(&note.credit_note_number)
        .bind(note.kind)
        .bind(&note.reason)
        .bind(note.subtotal)
        .bind(note.tax_amount)
        .bind(note.total_amount)
        .bind(note.applied_to_balance)
        .bind(note.refunded_amount)
        .bind(note.status)
        .bind(&note.approved_by)
        .bind(note.approved_utc)
        .bind(&note.notes)
        .bind(note.created_utc)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_err("Failed to insert credit note", e))?;

        for item in line_items {
            sqlx::query(
                "INSERT INTO credit_note_line_items (line_item_id, credit_note_id, tenant_id, \
                 description, quantity, unit_price, taxable, tax_rate, line_total, tax_amount, \
                 sort_order) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
            )
            .bind(item.line_item_id)
            .bind(item.credit_note_id)
            .bind(item.tenant_id)
            .bind(&item.description)
            .bind(item.quantity)
            .bind(item.unit_price)
            .bind(item.taxable)
            .bind(item.tax_rate)
            .bind(item.line_total)
            .bind(item.tax_amount)
            .bind(item.sort_order)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_err("Failed to insert credit note line item", e))?;
        }
        Ok(())
    }

    async fn update_credit_note(&mut self, note: &CreditNote) -> LedgerResult<()> {
        sqlx::query(
            "UPDATE credit_notes SET applied_to_balance = $3, refunded_amount = $4, status = $5, \
             approved_by = $6, approved_utc = $7, notes = $8 \
             WHERE tenant_id = $1 AND credit_note_id = $2",
        )
        .bind(note.tenant_id)
        .bind(note.credit_note_id)
        .bind(note.applied_to_balance)
        .bind(note.refunded_amount)
        .bind(note.status)
        .bind(&note.approved_by)
        .bind(note.approved_utc)
        .bind(&note.notes)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_err("Failed to update credit note", e))?;
        Ok(())
    }

    async fn insert_credit_note_application(
        &mut self,
        application: &CreditNoteApplication,
    ) -> LedgerResult<()> {
        sqlx::query(
            "INSERT INTO credit_note_applications (application_id, tenant_id, credit_note_id, \
             invoice_id, amount, created_utc) VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(application.application_id)
        .bind(application.tenant_id)
        .bind(application.credit_note_id)
        .bind(application.invoice_id)
        .bind(application.amount)
        .bind(application.created_utc)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_err("Failed to insert credit note application", e))?;
        Ok(())
    }

    async fn get_arrangement(
        &mut self,
        tenant_id: Uuid,
        arrangement_id: Uuid,
    ) -> LedgerResult<Option<PaymentArrangement>> {
        sqlx::query_as::<_, PaymentArrangement>(&format!(
            "SELECT {ARRANGEMENT_COLS} FROM payment_arrangements \
             WHERE tenant_id = $1 AND arrangement_id = $2"
        ))
        .bind(tenant_id)
        .bind(arrangement_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| db_err("Failed to get arrangement", e))
    }

    async fn get_installments(
        &mut self,
        tenant_id: Uuid,
        arrangement_id: Uuid,
    ) -> LedgerResult<Vec<ArrangementInstallment>> {
        sqlx::query_as::<_, ArrangementInstallment>(&format!(
            "SELECT {INSTALLMENT_COLS} FROM arrangement_installments \
             WHERE tenant_id = $1 AND arrangement_id = $2 ORDER BY installment_no"
        ))
        .bind(tenant_id)
        .bind(arrangement_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| db_err("Failed to get installments", e))
    }

    async fn arrangement_invoice_ids(
        &mut self,
        tenant_id: Uuid,
        arrangement_id: Uuid,
    ) -> LedgerResult<Vec<Uuid>> {
        sqlx::query_scalar::<_, Uuid>(
            "SELECT invoice_id FROM arrangement_invoices \
             WHERE tenant_id = $1 AND arrangement_id = $2",
        )
        .bind(tenant_id)
        .bind(arrangement_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| db_err("Failed to get arrangement invoices", e))
    }

    async fn insert_arrangement(
        &mut self,
        arrangement: &PaymentArrangement,
        invoice_ids: &[Uuid],
        installments: &[ArrangementInstallment],
    ) -> LedgerResult<()> {
        sqlx::query(
            "INSERT INTO payment_arrangements (arrangement_id, tenant_id, account_id, \
             installment_count, frequency, start_date, total_amount, paid_amount, \
             remaining_amount, status, created_utc) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(arrangement.arrangement_id)
        .bind(arrangement.tenant_id)
        .bind(arrangement.account_id)
        .bind(arrangement.installment_count)
        .bind(arrangement.frequency)
        .bind(arrangement.start_date)
        .bind(arrangement.total_amount)
        .bind(arrangement.paid_amount)
        .bind(arrangement.remaining_amount)
        .bind(arrangement.status)
        .bind(arrangement.created_utc)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_err("Failed to insert arrangement", e))?;

        for invoice_id in invoice_ids {
            sqlx::query(
                "INSERT INTO arrangement_invoices (arrangement_id, invoice_id, tenant_id) \
                 VALUES ($1, $2, $3)",
            )
            .bind(arrangement.arrangement_id)
            .bind(invoice_id)
            .bind(arrangement.tenant_id)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_err("Failed to link arrangement invoice", e))?;
        }

        for installment in installments {
            sqlx::query(
                "INSERT INTO arrangement_installments (installment_id, arrangement_id, \
                 tenant_id, installment_no, due_date, amount, paid_amount, status) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            )
            .bind(installment.installment_id)
            .bind(installment.arrangement_id)
            .bind(installment.tenant_id)
            .bind(installment.installment_no)
            .bind(installment.due_date)
            .bind(installment.amount)
            .bind(installment.paid_amount)
            .bind(installment.status)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_err("Failed to insert installment", e))?;
        }
        Ok(())
    }

    async fn update_arrangement(&mut self, arrangement: &PaymentArrangement) -> LedgerResult<()> {
        sqlx::query(
            "UPDATE payment_arrangements SET paid_amount = $3, remaining_amount = $4, \
             status = $5 WHERE tenant_id = $1 AND arrangement_id = $2",
        )
        .bind(arrangement.tenant_id)
        .bind(arrangement.arrangement_id)
        .bind(arrangement.paid_amount)
        .bind(arrangement.remaining_amount)
        .bind(arrangement.status)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_err("Failed to update arrangement", e))?;
        Ok(())
    }

    async fn update_installment(
        &mut self,
        installment: &ArrangementInstallment,
    ) -> LedgerResult<()> {
        sqlx::query(
            "UPDATE arrangement_installments SET paid_amount = $3, status = $4 \
             WHERE tenant_id = $1 AND installment_id = $2",
        )
        .bind(installment.tenant_id)
        .bind(installment.installment_id)
        .bind(installment.paid_amount)
        .bind(installment.status)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_err("Failed to update installment", e))?;
        Ok(())
    }

    async fn mark_overdue_installments(
        &mut self,
        tenant_id: Uuid,
        as_of: NaiveDate,
    ) -> LedgerResult<Vec<Uuid>> {
        let mut affected = sqlx::query_scalar::<_, Uuid>(
            "UPDATE arrangement_installments SET status = 'overdue' \
             WHERE tenant_id = $1 AND status = 'pending' AND due_date < $2 \
             RETURNING arrangement_id",
        )
        .bind(tenant_id)
        .bind(as_of)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| db_err("Failed to mark overdue installments", e))?;
        affected.sort();
        affected.dedup();
        Ok(affected)
    }

    async fn next_document_number(
        &mut self,
        tenant_id: Uuid,
        kind: DocumentKind,
        year: i32,
    ) -> LedgerResult<i64> {
        sqlx::query_scalar::<_, i64>(
            "INSERT INTO document_counters (tenant_id, kind, year, last_value) \
             VALUES ($1, $2, $3, 1) \
             ON CONFLICT (tenant_id, kind, year) \
             DO UPDATE SET last_value = document_counters.last_value + 1 \
             RETURNING last_value",
        )
        .bind(tenant_id)
        .bind(kind)
        .bind(year)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| db_err("Failed to advance document counter", e))
    }

    async fn commit(self: Box<Self>) -> LedgerResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| db_err("Failed to commit transaction", e))
    }
}
