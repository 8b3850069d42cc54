//! Invoice lifecycle manager.
//!
//! Owns invoice creation and the `Draft → Sent → {PartiallyPaid, Paid,
//! Overdue} → Void` state machine. Status recomputation after a balance
//! mutation lives here, in one function, and runs inside the same
//! transaction as the mutation that changed the balance — payments, credit
//! notes and arrangements all route through it.

use std::sync::Arc;

use chrono::{Datelike, NaiveDate, Utc};
use ledger_core::{money, LedgerError, LedgerResult};
use rust_decimal::Decimal;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::models::{
    CreateInvoice, Invoice, InvoiceStatus, LineItem, ListInvoicesFilter,
};
use crate::services::metrics::INVOICES_TOTAL;
use crate::store::{format_document_number, DocumentKind, LedgerStore};

/// Recompute an invoice's status after a balance-affecting mutation.
///
/// Rules apply in order: settled → `Paid`; partially settled →
/// `PartiallyPaid`; unpaid past due → `Overdue`; otherwise unchanged.
/// Draft and void invoices are never recomputed.
pub(crate) fn recompute_status(invoice: &mut Invoice, today: NaiveDate) {
    if matches!(invoice.status, InvoiceStatus::Draft | InvoiceStatus::Void) {
        return;
    }
    if money::is_settled(invoice.balance_due) {
        invoice.balance_due = Decimal::ZERO;
        invoice.status = InvoiceStatus::Paid;
    } else if invoice.paid_amount > Decimal::ZERO && invoice.paid_amount < invoice.total_amount {
        invoice.status = InvoiceStatus::PartiallyPaid;
    } else if invoice.balance_due > Decimal::ZERO && today > invoice.due_date {
        invoice.status = InvoiceStatus::Overdue;
    }
}

/// Apply `amount` of settlement (payment or credit) to an invoice and
/// recompute its status. The caller has already checked the amount against
/// `balance_due`.
pub(crate) fn settle_invoice(invoice: &mut Invoice, amount: Decimal, today: NaiveDate) {
    invoice.paid_amount = money::round2(invoice.paid_amount + amount);
    invoice.balance_due = money::sub_clamped(invoice.total_amount, invoice.paid_amount);
    recompute_status(invoice, today);
}

/// Invoice lifecycle service.
#[derive(Clone)]
pub struct InvoiceService {
    store: Arc<dyn LedgerStore>,
}

impl InvoiceService {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Create a draft invoice from line items.
    ///
    /// `line_total = quantity × unit_price × (1 − discount_pct/100)`;
    /// tax accrues only on taxable lines; the invoice-level
    /// `discount_amount` arrives pre-computed from the discount engine.
    #[instrument(skip(self, input), fields(tenant_id = %tenant_id, account_id = %input.account_id))]
    pub async fn create_invoice(
        &self,
        tenant_id: Uuid,
        input: CreateInvoice,
    ) -> LedgerResult<(Invoice, Vec<LineItem>)> {
        if input.line_items.is_empty() {
            return Err(LedgerError::validation(
                "an invoice needs at least one line item",
            ));
        }
        for item in &input.line_items {
            if item.quantity < Decimal::ZERO {
                return Err(LedgerError::validation(format!(
                    "line item '{}': quantity must not be negative",
                    item.description
                )));
            }
            if item.unit_price < Decimal::ZERO {
                return Err(LedgerError::validation(format!(
                    "line item '{}': unit price must not be negative",
                    item.description
                )));
            }
            if item.discount_pct < Decimal::ZERO || item.discount_pct > Decimal::ONE_HUNDRED {
                return Err(LedgerError::validation(format!(
                    "line item '{}': discount percentage must be between 0 and 100",
                    item.description
                )));
            }
            if item.tax_rate < Decimal::ZERO {
                return Err(LedgerError::validation(format!(
                    "line item '{}': tax rate must not be negative",
                    item.description
                )));
            }
        }
        if input.discount_amount < Decimal::ZERO {
            return Err(LedgerError::validation(
                "discount amount must not be negative",
            ));
        }
        if input.due_date < input.invoice_date {
            return Err(LedgerError::validation(
                "due date must not precede the invoice date",
            ));
        }

        let invoice_id = Uuid::new_v4();
        let mut subtotal = Decimal::ZERO;
        let mut tax_amount = Decimal::ZERO;
        let mut line_items = Vec::with_capacity(input.line_items.len());
        for (idx, item) in input.line_items.iter().enumerate() {
            let gross = item.quantity * item.unit_price;
            let line_total = money::round2(
                gross * (Decimal::ONE - item.discount_pct / Decimal::ONE_HUNDRED),
            );
            subtotal += line_total;
            if item.taxable {
                tax_amount += money::percent_of(line_total, item.tax_rate);
            }
            line_items.push(LineItem {
                line_item_id: Uuid::new_v4(),
                invoice_id,
                tenant_id,
                description: item.description.clone(),
                quantity: item.quantity,
                unit_price: item.unit_price,
                discount_pct: item.discount_pct,
                taxable: item.taxable,
                tax_rate: item.tax_rate,
                line_total,
                sort_order: idx as i32,
            });
        }
        let subtotal = money::round2(subtotal);
        let tax_amount = money::round2(tax_amount);
        let discount_amount = money::round2(input.discount_amount);
        if discount_amount > subtotal + tax_amount {
            return Err(LedgerError::validation(
                "discount amount exceeds the invoice total",
            ));
        }
        let total_amount = money::sub_clamped(subtotal + tax_amount, discount_amount);

        let mut tx = self.store.begin().await?;
        tx.lock_account(tenant_id, input.account_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("account", input.account_id))?;

        let year = input.invoice_date.year();
        let seq = tx
            .next_document_number(tenant_id, DocumentKind::Invoice, year)
            .await?;
        let invoice = Invoice {
            invoice_id,
            tenant_id,
            account_id: input.account_id,
            invoice_number: format_document_number(DocumentKind::Invoice, year, seq),
            invoice_date: input.invoice_date,
            due_date: input.due_date,
            subtotal,
            tax_amount,
            discount_amount,
            total_amount,
            paid_amount: Decimal::ZERO,
            balance_due: total_amount,
            status: InvoiceStatus::Draft,
            notes: input.notes.clone(),
            sent_utc: None,
            voided_utc: None,
            void_reason: None,
            created_utc: Utc::now(),
        };
        tx.insert_invoice(&invoice, &line_items).await?;
        tx.commit().await?;

        INVOICES_TOTAL.with_label_values(&["created"]).inc();
        info!(
            invoice_id = %invoice.invoice_id,
            invoice_number = %invoice.invoice_number,
            total_amount = %invoice.total_amount,
            "Invoice created"
        );

        Ok((invoice, line_items))
    }

    /// Send a draft invoice: `Draft → Sent`, recording `sent_utc`.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    pub async fn send_invoice(&self, tenant_id: Uuid, invoice_id: Uuid) -> LedgerResult<Invoice> {
        let mut tx = self.store.begin().await?;
        let invoice = tx
            .get_invoice(tenant_id, invoice_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("invoice", invoice_id))?;
        tx.lock_account(tenant_id, invoice.account_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("account", invoice.account_id))?;
        // Re-read under the account lock.
        let mut invoice = tx
            .get_invoice(tenant_id, invoice_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("invoice", invoice_id))?;

        if invoice.status != InvoiceStatus::Draft {
            return Err(LedgerError::invalid_state(
                "invoice",
                invoice_id,
                invoice.status.as_str(),
                "send",
            ));
        }
        invoice.status = InvoiceStatus::Sent;
        invoice.sent_utc = Some(Utc::now());
        tx.update_invoice(&invoice).await?;
        tx.commit().await?;

        INVOICES_TOTAL.with_label_values(&["sent"]).inc();
        info!(invoice_number = %invoice.invoice_number, "Invoice sent");

        Ok(invoice)
    }

    /// Void an invoice, writing off its remaining balance. Paid invoices
    /// cannot be voided — issue a credit note instead.
    #[instrument(skip(self, reason), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    pub async fn void_invoice(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
        reason: &str,
    ) -> LedgerResult<Invoice> {
        if reason.trim().is_empty() {
            return Err(LedgerError::validation("a void reason is required"));
        }

        let mut tx = self.store.begin().await?;
        let invoice = tx
            .get_invoice(tenant_id, invoice_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("invoice", invoice_id))?;
        tx.lock_account(tenant_id, invoice.account_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("account", invoice.account_id))?;
        let mut invoice = tx
            .get_invoice(tenant_id, invoice_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("invoice", invoice_id))?;

        if matches!(invoice.status, InvoiceStatus::Paid | InvoiceStatus::Void) {
            return Err(LedgerError::invalid_state(
                "invoice",
                invoice_id,
                invoice.status.as_str(),
                "void",
            ));
        }
        invoice.status = InvoiceStatus::Void;
        invoice.balance_due = Decimal::ZERO;
        invoice.void_reason = Some(reason.trim().to_string());
        invoice.voided_utc = Some(Utc::now());
        tx.update_invoice(&invoice).await?;
        tx.commit().await?;

        INVOICES_TOTAL.with_label_values(&["voided"]).inc();
        info!(invoice_number = %invoice.invoice_number, reason = reason, "Invoice voided");

        Ok(invoice)
    }

    /// Get an invoice with its line items.
    pub async fn get_invoice(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> LedgerResult<(Invoice, Vec<LineItem>)> {
        let invoice = self
            .store
            .get_invoice(tenant_id, invoice_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("invoice", invoice_id))?;
        let line_items = self.store.get_line_items(tenant_id, invoice_id).await?;
        Ok((invoice, line_items))
    }

    /// List invoices for a tenant.
    pub async fn list_invoices(
        &self,
        tenant_id: Uuid,
        filter: &ListInvoicesFilter,
    ) -> LedgerResult<Vec<Invoice>> {
        self.store.list_invoices(tenant_id, filter).await
    }

    /// Periodic sweep: flip sent invoices past due to `Overdue`. Returns
    /// the number of invoices transitioned.
    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    pub async fn mark_overdue_invoices(
        &self,
        tenant_id: Uuid,
        as_of: Option<NaiveDate>,
    ) -> LedgerResult<u64> {
        let as_of = as_of.unwrap_or_else(|| Utc::now().date_naive());
        let mut tx = self.store.begin().await?;
        let changed = tx.mark_overdue_invoices(tenant_id, as_of).await?;
        tx.commit().await?;
        if changed > 0 {
            info!(changed, %as_of, "Invoices marked overdue");
        }
        Ok(changed)
    }
}
