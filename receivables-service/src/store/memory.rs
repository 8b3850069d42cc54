//! In-memory store adapter.
//!
//! Backs the engine in tests and embedded use. A transaction clones the
//! state, applies writes to the clone, and swaps it back on commit; the
//! store-wide async mutex it holds for its lifetime is what serializes
//! writers (coarser than the per-account row lock the Postgres adapter
//! takes, but it satisfies the same contract).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use ledger_core::LedgerResult;
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::models::{
    ArAccount, ArrangementInstallment, CreditNote, CreditNoteApplication, CreditNoteLineItem,
    InstallmentStatus, Invoice, InvoiceStatus, LineItem, ListInvoicesFilter, Payment,
    PaymentAllocation, PaymentArrangement,
};
use crate::store::{DocumentKind, LedgerStore, LedgerTx};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    accounts: HashMap<Uuid, ArAccount>,
    invoices: HashMap<Uuid, Invoice>,
    line_items: HashMap<Uuid, Vec<LineItem>>,
    payments: HashMap<Uuid, Payment>,
    allocations: Vec<PaymentAllocation>,
    credit_notes: HashMap<Uuid, CreditNote>,
    credit_note_lines: HashMap<Uuid, Vec<CreditNoteLineItem>>,
    credit_note_applications: Vec<CreditNoteApplication>,
    arrangements: HashMap<Uuid, PaymentArrangement>,
    installments: HashMap<Uuid, Vec<ArrangementInstallment>>,
    arrangement_invoices: HashMap<Uuid, Vec<Uuid>>,
    counters: HashMap<(Uuid, DocumentKind, i32), i64>,
}

/// In-memory [`LedgerStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryLedgerStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sort_fifo(invoices: &mut [Invoice]) {
    invoices.sort_by(|a, b| {
        a.due_date
            .cmp(&b.due_date)
            .then_with(|| a.invoice_number.cmp(&b.invoice_number))
    });
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn begin(&self) -> LedgerResult<Box<dyn LedgerTx>> {
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryTx { guard, staged }))
    }

    async fn insert_account(&self, account: &ArAccount) -> LedgerResult<()> {
        let mut state = self.state.lock().await;
        state.accounts.insert(account.account_id, account.clone());
        Ok(())
    }

    async fn get_account(
        &self,
        tenant_id: Uuid,
        account_id: Uuid,
    ) -> LedgerResult<Option<ArAccount>> {
        let state = self.state.lock().await;
        Ok(state
            .accounts
            .get(&account_id)
            .filter(|a| a.tenant_id == tenant_id)
            .cloned())
    }

    async fn list_accounts(&self, tenant_id: Uuid) -> LedgerResult<Vec<ArAccount>> {
        let state = self.state.lock().await;
        let mut accounts: Vec<ArAccount> = state
            .accounts
            .values()
            .filter(|a| a.tenant_id == tenant_id)
            .cloned()
            .collect();
        accounts.sort_by(|a, b| a.account_no.cmp(&b.account_no));
        Ok(accounts)
    }

    async fn get_invoice(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> LedgerResult<Option<Invoice>> {
        let state = self.state.lock().await;
        Ok(state
            .invoices
            .get(&invoice_id)
            .filter(|i| i.tenant_id == tenant_id)
            .cloned())
    }

    async fn get_line_items(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> LedgerResult<Vec<LineItem>> {
        let state = self.state.lock().await;
        Ok(state
            .line_items
            .get(&invoice_id)
            .map(|items| {
                items
                    .iter()
                    .filter(|i| i.tenant_id == tenant_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn list_invoices(
        &self,
        tenant_id: Uuid,
        filter: &ListInvoicesFilter,
    ) -> LedgerResult<Vec<Invoice>> {
        let state = self.state.lock().await;
        let mut invoices: Vec<Invoice> = state
            .invoices
            .values()
            .filter(|i| i.tenant_id == tenant_id)
            .filter(|i| filter.account_id.map_or(true, |a| i.account_id == a))
            .filter(|i| filter.status.map_or(true, |s| i.status == s))
            .filter(|i| filter.start_date.map_or(true, |d| i.invoice_date >= d))
            .filter(|i| filter.end_date.map_or(true, |d| i.invoice_date <= d))
            .cloned()
            .collect();
        invoices.sort_by(|a, b| {
            a.invoice_date
                .cmp(&b.invoice_date)
                .then_with(|| a.invoice_number.cmp(&b.invoice_number))
        });
        Ok(invoices)
    }

    async fn get_payment(
        &self,
        tenant_id: Uuid,
        payment_id: Uuid,
    ) -> LedgerResult<Option<Payment>> {
        let state = self.state.lock().await;
        Ok(state
            .payments
            .get(&payment_id)
            .filter(|p| p.tenant_id == tenant_id)
            .cloned())
    }

    async fn get_credit_note(
        &self,
        tenant_id: Uuid,
        credit_note_id: Uuid,
    ) -> LedgerResult<Option<CreditNote>> {
        let state = self.state.lock().await;
        Ok(state
            .credit_notes
            .get(&credit_note_id)
            .filter(|n| n.tenant_id == tenant_id)
            .cloned())
    }

    async fn get_credit_note_line_items(
        &self,
        tenant_id: Uuid,
        credit_note_id: Uuid,
    ) -> LedgerResult<Vec<CreditNoteLineItem>> {
        let state = self.state.lock().await;
        Ok(state
            .credit_note_lines
            .get(&credit_note_id)
            .map(|items| {
                items
                    .iter()
                    .filter(|i| i.tenant_id == tenant_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_arrangement(
        &self,
        tenant_id: Uuid,
        arrangement_id: Uuid,
    ) -> LedgerResult<Option<PaymentArrangement>> {
        let state = self.state.lock().await;
        Ok(state
            .arrangements
            .get(&arrangement_id)
            .filter(|a| a.tenant_id == tenant_id)
            .cloned())
    }

    async fn get_installments(
        &self,
        tenant_id: Uuid,
        arrangement_id: Uuid,
    ) -> LedgerResult<Vec<ArrangementInstallment>> {
        let state = self.state.lock().await;
        let mut installments: Vec<ArrangementInstallment> = state
            .installments
            .get(&arrangement_id)
            .map(|items| {
                items
                    .iter()
                    .filter(|i| i.tenant_id == tenant_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        installments.sort_by_key(|i| i.installment_no);
        Ok(installments)
    }

    async fn open_invoices(&self, tenant_id: Uuid) -> LedgerResult<Vec<Invoice>> {
        let state = self.state.lock().await;
        let mut invoices: Vec<Invoice> = state
            .invoices
            .values()
            .filter(|i| i.tenant_id == tenant_id)
            .filter(|i| i.status.is_outstanding() && i.balance_due > Decimal::ZERO)
            .cloned()
            .collect();
        sort_fifo(&mut invoices);
        Ok(invoices)
    }

    async fn invoices_for_statement(
        &self,
        tenant_id: Uuid,
        account_id: Uuid,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> LedgerResult<Vec<Invoice>> {
        let state = self.state.lock().await;
        let mut invoices: Vec<Invoice> = state
            .invoices
            .values()
            .filter(|i| i.tenant_id == tenant_id && i.account_id == account_id)
            .filter(|i| !matches!(i.status, InvoiceStatus::Draft | InvoiceStatus::Void))
            .filter(|i| i.invoice_date >= start_date && i.invoice_date <= end_date)
            .cloned()
            .collect();
        invoices.sort_by(|a, b| {
            a.invoice_date
                .cmp(&b.invoice_date)
                .then_with(|| a.invoice_number.cmp(&b.invoice_number))
        });
        Ok(invoices)
    }

    async fn payments_for_statement(
        &self,
        tenant_id: Uuid,
        account_id: Uuid,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> LedgerResult<Vec<Payment>> {
        let state = self.state.lock().await;
        let mut payments: Vec<Payment> = state
            .payments
            .values()
            .filter(|p| p.tenant_id == tenant_id && p.account_id == account_id)
            .filter(|p| p.payment_date >= start_date && p.payment_date <= end_date)
            .cloned()
            .collect();
        payments.sort_by(|a, b| {
            a.payment_date
                .cmp(&b.payment_date)
                .then_with(|| a.receipt_number.cmp(&b.receipt_number))
        });
        Ok(payments)
    }

    async fn opening_balance(
        &self,
        tenant_id: Uuid,
        account_id: Uuid,
        before_date: NaiveDate,
    ) -> LedgerResult<Decimal> {
        let state = self.state.lock().await;
        let invoiced: Decimal = state
            .invoices
            .values()
            .filter(|i| i.tenant_id == tenant_id && i.account_id == account_id)
            .filter(|i| !matches!(i.status, InvoiceStatus::Draft | InvoiceStatus::Void))
            .filter(|i| i.invoice_date < before_date)
            .map(|i| i.total_amount)
            .sum();
        let paid: Decimal = state
            .payments
            .values()
            .filter(|p| p.tenant_id == tenant_id && p.account_id == account_id)
            .filter(|p| p.payment_date < before_date)
            .map(|p| p.amount)
            .sum();
        Ok(ledger_core::money::round2(invoiced - paid))
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    staged: MemoryState,
}

#[async_trait]
impl LedgerTx for MemoryTx {
    async fn lock_account(
        &mut self,
        tenant_id: Uuid,
        account_id: Uuid,
    ) -> LedgerResult<Option<ArAccount>> {
        // The store-wide mutex held by this transaction already excludes
        // other writers; only the lookup remains.
        Ok(self
            .staged
            .accounts
            .get(&account_id)
            .filter(|a| a.tenant_id == tenant_id)
            .cloned())
    }

    async fn update_account(&mut self, account: &ArAccount) -> LedgerResult<()> {
        self.staged
            .accounts
            .insert(account.account_id, account.clone());
        Ok(())
    }

    async fn get_invoice(
        &mut self,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> LedgerResult<Option<Invoice>> {
        Ok(self
            .staged
            .invoices
            .get(&invoice_id)
            .filter(|i| i.tenant_id == tenant_id)
            .cloned())
    }

    async fn outstanding_invoices(
        &mut self,
        tenant_id: Uuid,
        account_id: Uuid,
    ) -> LedgerResult<Vec<Invoice>> {
        let mut invoices: Vec<Invoice> = self
            .staged
            .invoices
            .values()
            .filter(|i| i.tenant_id == tenant_id && i.account_id == account_id)
            .filter(|i| i.status.is_outstanding() && i.balance_due > Decimal::ZERO)
            .cloned()
            .collect();
        sort_fifo(&mut invoices);
        Ok(invoices)
    }

    async fn insert_invoice(
        &mut self,
        invoice: &Invoice,
        line_items: &[LineItem],
    ) -> LedgerResult<()> {
        self.staged
            .invoices
            .insert(invoice.invoice_id, invoice.clone());
        self.staged
            .line_items
            .insert(invoice.invoice_id, line_items.to_vec());
        Ok(())
    }

    async fn update_invoice(&mut self, invoice: &Invoice) -> LedgerResult<()> {
        self.staged
            .invoices
            .insert(invoice.invoice_id, invoice.clone());
        Ok(())
    }

    async fn mark_overdue_invoices(
        &mut self,
        tenant_id: Uuid,
        as_of: NaiveDate,
    ) -> LedgerResult<u64> {
        let mut changed = 0;
        for invoice in self.staged.invoices.values_mut() {
            if invoice.tenant_id == tenant_id
                && invoice.status == InvoiceStatus::Sent
                && invoice.due_date < as_of
                && invoice.balance_due > Decimal::ZERO
            {
                invoice.status = InvoiceStatus::Overdue;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn insert_payment(&mut self, payment: &Payment) -> LedgerResult<()> {
        self.staged
            .payments
            .insert(payment.payment_id, payment.clone());
        Ok(())
    }

    async fn insert_allocation(&mut self, allocation: &PaymentAllocation) -> LedgerResult<()> {
        self.staged.allocations.push(allocation.clone());
        Ok(())
    }

    async fn get_credit_note(
        &mut self,
        tenant_id: Uuid,
        credit_note_id: Uuid,
    ) -> LedgerResult<Option<CreditNote>> {
        Ok(self
            .staged
            .credit_notes
            .get(&credit_note_id)
            .filter(|n| n.tenant_id == tenant_id)
            .cloned())
    }

    async fn insert_credit_note(
        &mut self,
        note: &CreditNote,
        line_items: &[CreditNoteLineItem],
    ) -> LedgerResult<()> {
        self.staged
            .credit_notes
            .insert(note.credit_note_id, note.clone());
        self.staged
            .credit_note_lines
            .insert(note.credit_note_id, line_items.to_vec());
        Ok(())
    }

    async fn update_credit_note(&mut self, note: &CreditNote) -> LedgerResult<()> {
        self.staged
            .credit_notes
            .insert(note.credit_note_id, note.clone());
        Ok(())
    }

    async fn insert_credit_note_application(
        &mut self,
        application: &CreditNoteApplication,
    ) -> LedgerResult<()> {
        self.staged.credit_note_applications.push(application.clone());
        Ok(())
    }

    async fn get_arrangement(
        &mut self,
        tenant_id: Uuid,
        arrangement_id: Uuid,
    ) -> LedgerResult<Option<PaymentArrangement>> {
        Ok(self
            .staged
            .arrangements
            .get(&arrangement_id)
            .filter(|a| a.tenant_id == tenant_id)
            .cloned())
    }

    async fn get_installments(
        &mut self,
        tenant_id: Uuid,
        arrangement_id: Uuid,
    ) -> LedgerResult<Vec<ArrangementInstallment>> {
        let mut installments: Vec<ArrangementInstallment> = self
            .staged
            .installments
            .get(&arrangement_id)
            .map(|items| {
                items
                    .iter()
                    .filter(|i| i.tenant_id == tenant_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        installments.sort_by_key(|i| i.installment_no);
        Ok(installments)
    }

    async fn arrangement_invoice_ids(
        &mut self,
        _tenant_id: Uuid,
        arrangement_id: Uuid,
    ) -> LedgerResult<Vec<Uuid>> {
        Ok(self
            .staged
            .arrangement_invoices
            .get(&arrangement_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn insert_arrangement(
        &mut self,
        arrangement: &PaymentArrangement,
        invoice_ids: &[Uuid],
        installments: &[ArrangementInstallment],
    ) -> LedgerResult<()> {
        self.staged
            .arrangements
            .insert(arrangement.arrangement_id, arrangement.clone());
        self.staged
            .arrangement_invoices
            .insert(arrangement.arrangement_id, invoice_ids.to_vec());
        self.staged
            .installments
            .insert(arrangement.arrangement_id, installments.to_vec());
        Ok(())
    }

    async fn update_arrangement(&mut self, arrangement: &PaymentArrangement) -> LedgerResult<()> {
        self.staged
            .arrangements
            .insert(arrangement.arrangement_id, arrangement.clone());
        Ok(())
    }

    async fn update_installment(
        &mut self,
        installment: &ArrangementInstallment,
    ) -> LedgerResult<()> {
        if let Some(items) = self
            .staged
            .installments
            .get_mut(&installment.arrangement_id)
        {
            if let Some(slot) = items
                .iter_mut()
                .find(|i| i.installment_id == installment.installment_id)
            {
                *slot = installment.clone();
            }
        }
        Ok(())
    }

    async fn mark_overdue_installments(
        &mut self,
        tenant_id: Uuid,
        as_of: NaiveDate,
    ) -> LedgerResult<Vec<Uuid>> {
        let mut affected = Vec::new();
        for (arrangement_id, installments) in self.staged.installments.iter_mut() {
            let mut hit = false;
            for installment in installments.iter_mut() {
                if installment.tenant_id == tenant_id
                    && installment.status == InstallmentStatus::Pending
                    && installment.due_date < as_of
                {
                    installment.status = InstallmentStatus::Overdue;
                    hit = true;
                }
            }
            if hit {
                affected.push(*arrangement_id);
            }
        }
        Ok(affected)
    }

    async fn next_document_number(
        &mut self,
        tenant_id: Uuid,
        kind: DocumentKind,
        year: i32,
    ) -> LedgerResult<i64> {
        let counter = self
            .staged
            .counters
            .entry((tenant_id, kind, year))
            .or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    async fn commit(self: Box<Self>) -> LedgerResult<()> {
        let MemoryTx { mut guard, staged } = *self;
        *guard = staged;
        Ok(())
    }
}
