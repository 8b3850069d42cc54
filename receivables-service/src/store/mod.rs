//! Persistence port for the AR ledger.
//!
//! The engine never talks to a database driver directly: it is handed a
//! [`LedgerStore`] and runs every balance-mutating operation inside one
//! [`LedgerTx`], which commits everything or nothing. Writers serialize per
//! account through [`LedgerTx::lock_account`]; snapshot reads on the store
//! itself take no locks and may be slightly stale.

mod memory;
mod postgres;

pub use memory::MemoryLedgerStore;
pub use postgres::PostgresLedgerStore;

use async_trait::async_trait;
use chrono::NaiveDate;
use ledger_core::LedgerResult;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::models::{
    ArAccount, ArrangementInstallment, CreditNote, CreditNoteApplication, CreditNoteLineItem,
    Invoice, LineItem, ListInvoicesFilter, Payment, PaymentAllocation, PaymentArrangement,
};

/// Numbered document kinds sharing the per-tenant-per-year counter table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(type_name = "document_kind", rename_all = "snake_case")]
pub enum DocumentKind {
    Invoice,
    Receipt,
    CreditNote,
}

impl DocumentKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            DocumentKind::Invoice => "INV",
            DocumentKind::Receipt => "RCT",
            DocumentKind::CreditNote => "CN",
        }
    }
}

/// Render a document number, e.g. `CN-2026-000042`.
pub fn format_document_number(kind: DocumentKind, year: i32, seq: i64) -> String {
    format!("{}-{}-{:06}", kind.prefix(), year, seq)
}

/// Store handle: opens transactions and serves lock-free snapshot reads.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Open a transaction. Dropping the returned handle without calling
    /// [`LedgerTx::commit`] rolls back every write made through it.
    async fn begin(&self) -> LedgerResult<Box<dyn LedgerTx>>;

    /// Provision an account (ownership of account identity lives with the
    /// membership collaborator; this stores the AR-side record).
    async fn insert_account(&self, account: &ArAccount) -> LedgerResult<()>;

    async fn get_account(
        &self,
        tenant_id: Uuid,
        account_id: Uuid,
    ) -> LedgerResult<Option<ArAccount>>;

    async fn list_accounts(&self, tenant_id: Uuid) -> LedgerResult<Vec<ArAccount>>;

    async fn get_invoice(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> LedgerResult<Option<Invoice>>;

    async fn get_line_items(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> LedgerResult<Vec<LineItem>>;

    async fn list_invoices(
        &self,
        tenant_id: Uuid,
        filter: &ListInvoicesFilter,
    ) -> LedgerResult<Vec<Invoice>>;

    async fn get_payment(
        &self,
        tenant_id: Uuid,
        payment_id: Uuid,
    ) -> LedgerResult<Option<Payment>>;

    async fn get_credit_note(
        &self,
        tenant_id: Uuid,
        credit_note_id: Uuid,
    ) -> LedgerResult<Option<CreditNote>>;

    async fn get_credit_note_line_items(
        &self,
        tenant_id: Uuid,
        credit_note_id: Uuid,
    ) -> LedgerResult<Vec<CreditNoteLineItem>>;

    async fn get_arrangement(
        &self,
        tenant_id: Uuid,
        arrangement_id: Uuid,
    ) -> LedgerResult<Option<PaymentArrangement>>;

    async fn get_installments(
        &self,
        tenant_id: Uuid,
        arrangement_id: Uuid,
    ) -> LedgerResult<Vec<ArrangementInstallment>>;

    /// All open (sent / partially paid / overdue, balance > 0) invoices for
    /// a tenant, for the aging report.
    async fn open_invoices(&self, tenant_id: Uuid) -> LedgerResult<Vec<Invoice>>;

    /// Non-draft, non-void invoices for one account in a date range,
    /// ordered by invoice date then number, for statements.
    async fn invoices_for_statement(
        &self,
        tenant_id: Uuid,
        account_id: Uuid,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> LedgerResult<Vec<Invoice>>;

    /// Payments for one account in a date range, ordered by payment date
    /// then receipt number, for statements.
    async fn payments_for_statement(
        &self,
        tenant_id: Uuid,
        account_id: Uuid,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> LedgerResult<Vec<Payment>>;

    /// Statement opening balance: invoiced totals minus payments received
    /// before `before_date` (non-draft, non-void invoices only).
    async fn opening_balance(
        &self,
        tenant_id: Uuid,
        account_id: Uuid,
        before_date: NaiveDate,
    ) -> LedgerResult<Decimal>;
}

/// One atomic unit of ledger writes.
#[async_trait]
pub trait LedgerTx: Send {
    /// Load the account and take the per-account writer lock. Every
    /// balance-mutating operation calls this first; two transactions
    /// touching the same account serialize here.
    async fn lock_account(
        &mut self,
        tenant_id: Uuid,
        account_id: Uuid,
    ) -> LedgerResult<Option<ArAccount>>;

    async fn update_account(&mut self, account: &ArAccount) -> LedgerResult<()>;

    async fn get_invoice(
        &mut self,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> LedgerResult<Option<Invoice>>;

    /// Open invoices for an account ordered by `due_date` then
    /// `invoice_number` — the FIFO settlement order.
    async fn outstanding_invoices(
        &mut self,
        tenant_id: Uuid,
        account_id: Uuid,
    ) -> LedgerResult<Vec<Invoice>>;

    async fn insert_invoice(
        &mut self,
        invoice: &Invoice,
        line_items: &[LineItem],
    ) -> LedgerResult<()>;

    async fn update_invoice(&mut self, invoice: &Invoice) -> LedgerResult<()>;

    /// Sweep: flip sent invoices past due to overdue. Returns rows changed.
    async fn mark_overdue_invoices(
        &mut self,
        tenant_id: Uuid,
        as_of: NaiveDate,
    ) -> LedgerResult<u64>;

    async fn insert_payment(&mut self, payment: &Payment) -> LedgerResult<()>;

    async fn insert_allocation(&mut self, allocation: &PaymentAllocation) -> LedgerResult<()>;

    async fn get_credit_note(
        &mut self,
        tenant_id: Uuid,
        credit_note_id: Uuid,
    ) -> LedgerResult<Option<CreditNote>>;

    async fn insert_credit_note(
        &mut self,
        note: &CreditNote,
        line_items: &[CreditNoteLineItem],
    ) -> LedgerResult<()>;

    async fn update_credit_note(&mut self, note: &CreditNote) -> LedgerResult<()>;

    async fn insert_credit_note_application(
        &mut self,
        application: &CreditNoteApplication,
    ) -> LedgerResult<()>;

    async fn get_arrangement(
        &mut self,
        tenant_id: Uuid,
        arrangement_id: Uuid,
    ) -> LedgerResult<Option<PaymentArrangement>>;

    async fn get_installments(
        &mut self,
        tenant_id: Uuid,
        arrangement_id: Uuid,
    ) -> LedgerResult<Vec<ArrangementInstallment>>;

    async fn arrangement_invoice_ids(
        &mut self,
        tenant_id: Uuid,
        arrangement_id: Uuid,
    ) -> LedgerResult<Vec<Uuid>>;

    async fn insert_arrangement(
        &mut self,
        arrangement: &PaymentArrangement,
        invoice_ids: &[Uuid],
        installments: &[ArrangementInstallment],
    ) -> LedgerResult<()>;

    async fn update_arrangement(&mut self, arrangement: &PaymentArrangement) -> LedgerResult<()>;

    async fn update_installment(
        &mut self,
        installment: &ArrangementInstallment,
    ) -> LedgerResult<()>;

    /// Sweep: flip pending installments past due to overdue. Returns the
    /// distinct arrangements that had installments flipped.
    async fn mark_overdue_installments(
        &mut self,
        tenant_id: Uuid,
        as_of: NaiveDate,
    ) -> LedgerResult<Vec<Uuid>>;

    /// Atomically advance the per-tenant-per-year sequence for `kind`.
    /// Sequence values are never reused, even when the document that drew
    /// one is later voided.
    async fn next_document_number(
        &mut self,
        tenant_id: Uuid,
        kind: DocumentKind,
        year: i32,
    ) -> LedgerResult<i64>;

    async fn commit(self: Box<Self>) -> LedgerResult<()>;
}
