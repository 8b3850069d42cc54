//! Credit note engine.
//!
//! Issues, approves, applies, refunds and voids credit notes. Applications
//! mirror the invoice balance updates of the payment engine; numbering
//! draws from the per-tenant-per-year counter so sequences survive voids
//! without reuse.

use std::sync::Arc;

use chrono::{Datelike, Utc};
use ledger_core::{money, LedgerError, LedgerResult};
use rust_decimal::Decimal;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::models::{
    CreateCreditNote, CreditNote, CreditNoteApplication, CreditNoteLineItem, CreditNoteStatus,
    Invoice, PaymentMethod,
};
use crate::services::invoices::settle_invoice;
use crate::services::metrics::CREDIT_NOTES_TOTAL;
use crate::store::{format_document_number, DocumentKind, LedgerStore};

/// Credit note lifecycle service.
#[derive(Clone)]
pub struct CreditNoteService {
    store: Arc<dyn LedgerStore>,
}

impl CreditNoteService {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Issue a credit note pending approval. Line totals follow the
    /// invoice rules: `line_total = quantity × unit_price`, tax only on
    /// taxable lines.
    #[instrument(skip(self, input), fields(tenant_id = %tenant_id, account_id = %input.account_id))]
    pub async fn create_credit_note(
        &self,
        tenant_id: Uuid,
        input: CreateCreditNote,
    ) -> LedgerResult<(CreditNote, Vec<CreditNoteLineItem>)> {
        if input.reason.trim().is_empty() {
            return Err(LedgerError::validation("a credit note reason is required"));
        }
        if input.line_items.is_empty() {
            return Err(LedgerError::validation(
                "a credit note needs at least one line item",
            ));
        }
        for item in &input.line_items {
            if item.quantity < Decimal::ZERO || item.unit_price < Decimal::ZERO {
                return Err(LedgerError::validation(format!(
                    "line item '{}': quantity and unit price must not be negative",
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

        let credit_note_id = Uuid::new_v4();
        let mut subtotal = Decimal::ZERO;
        let mut tax_amount = Decimal::ZERO;
        let mut line_items = Vec::with_capacity(input.line_items.len());
        for (idx, item) in input.line_items.iter().enumerate() {
            let line_total = money::round2(item.quantity * item.unit_price);
            let line_tax = if item.taxable {
                money::percent_of(line_total, item.tax_rate)
            } else {
                Decimal::ZERO
            };
            subtotal += line_total;
            tax_amount += line_tax;
            line_items.push(CreditNoteLineItem {
                line_item_id: Uuid::new_v4(),
                credit_note_id,
                tenant_id,
                description: item.description.clone(),
                quantity: item.quantity,
                unit_price: item.unit_price,
                taxable: item.taxable,
                tax_rate: item.tax_rate,
                line_total,
                tax_amount: line_tax,
                sort_order: idx as i32,
            });
        }
        let subtotal = money::round2(subtotal);
        let tax_amount = money::round2(tax_amount);

        let mut tx = self.store.begin().await?;
        tx.lock_account(tenant_id, input.account_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("account", input.account_id))?;

        let year = Utc::now().year();
        let seq = tx
            .next_document_number(tenant_id, DocumentKind::CreditNote, year)
            .await?;
        let note = CreditNote {
            credit_note_id,
            tenant_id,
            account_id: input.account_id,
            credit_note_number: format_document_number(DocumentKind::CreditNote, year, seq),
            kind: input.kind,
            reason: input.reason.trim().to_string(),
            subtotal,
            tax_amount,
            total_amount: money::round2(subtotal + tax_amount),
            applied_to_balance: Decimal::ZERO,
            refunded_amount: Decimal::ZERO,
            status: CreditNoteStatus::PendingApproval,
            approved_by: None,
            approved_utc: None,
            notes: None,
            created_utc: Utc::now(),
        };
        tx.insert_credit_note(&note, &line_items).await?;
        tx.commit().await?;

        CREDIT_NOTES_TOTAL.with_label_values(&["created"]).inc();
        info!(
            credit_note_id = %note.credit_note_id,
            credit_note_number = %note.credit_note_number,
            total_amount = %note.total_amount,
            "Credit note created"
        );

        Ok((note, line_items))
    }

    /// Approve a pending credit note.
    #[instrument(skip(self, approver), fields(tenant_id = %tenant_id, credit_note_id = %credit_note_id))]
    pub async fn approve_credit_note(
        &self,
        tenant_id: Uuid,
        credit_note_id: Uuid,
        approver: &str,
    ) -> LedgerResult<CreditNote> {
        if approver.trim().is_empty() {
            return Err(LedgerError::validation("an approver is required"));
        }

        let mut tx = self.store.begin().await?;
        let note = tx
            .get_credit_note(tenant_id, credit_note_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("credit note", credit_note_id))?;
        tx.lock_account(tenant_id, note.account_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("account", note.account_id))?;
        let mut note = tx
            .get_credit_note(tenant_id, credit_note_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("credit note", credit_note_id))?;

        if note.status != CreditNoteStatus::PendingApproval {
            return Err(LedgerError::invalid_state(
                "credit note",
                credit_note_id,
                note.status.as_str(),
                "approve",
            ));
        }
        note.status = CreditNoteStatus::Approved;
        note.approved_by = Some(approver.trim().to_string());
        note.approved_utc = Some(Utc::now());
        tx.update_credit_note(&note).await?;
        tx.commit().await?;

        CREDIT_NOTES_TOTAL.with_label_values(&["approved"]).inc();
        info!(credit_note_number = %note.credit_note_number, approver = approver, "Credit note approved");

        Ok(note)
    }

    /// Apply an approved credit note in full to the account's standing
    /// credit balance.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, credit_note_id = %credit_note_id))]
    pub async fn apply_to_balance(
        &self,
        tenant_id: Uuid,
        credit_note_id: Uuid,
    ) -> LedgerResult<CreditNote> {
        let mut tx = self.store.begin().await?;
        let note = tx
            .get_credit_note(tenant_id, credit_note_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("credit note", credit_note_id))?;
        let mut account = tx
            .lock_account(tenant_id, note.account_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("account", note.account_id))?;
        let mut note = tx
            .get_credit_note(tenant_id, credit_note_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("credit note", credit_note_id))?;

        if note.status != CreditNoteStatus::Approved {
            return Err(LedgerError::invalid_state(
                "credit note",
                credit_note_id,
                note.status.as_str(),
                "apply to balance",
            ));
        }

        account.credit_balance = money::round2(account.credit_balance + note.total_amount);
        note.applied_to_balance = note.total_amount;
        note.status = CreditNoteStatus::Applied;
        tx.update_account(&account).await?;
        tx.update_credit_note(&note).await?;
        tx.commit().await?;

        CREDIT_NOTES_TOTAL.with_label_values(&["applied"]).inc();
        info!(
            credit_note_number = %note.credit_note_number,
            amount = %note.total_amount,
            "Credit note applied to account balance"
        );

        Ok(note)
    }

    /// Apply part of a credit note against a specific invoice, mirroring a
    /// payment allocation on the invoice side.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, credit_note_id = %credit_note_id, invoice_id = %invoice_id))]
    pub async fn apply_to_invoice(
        &self,
        tenant_id: Uuid,
        credit_note_id: Uuid,
        invoice_id: Uuid,
        amount: Decimal,
    ) -> LedgerResult<(CreditNote, CreditNoteApplication, Invoice)> {
        let amount = money::round2(amount);
        if amount <= Decimal::ZERO {
            return Err(LedgerError::validation(
                "application amount must be positive",
            ));
        }

        let mut tx = self.store.begin().await?;
        let note = tx
            .get_credit_note(tenant_id, credit_note_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("credit note", credit_note_id))?;
        tx.lock_account(tenant_id, note.account_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("account", note.account_id))?;
        let mut note = tx
            .get_credit_note(tenant_id, credit_note_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("credit note", credit_note_id))?;

        if !note.status.is_applicable() {
            return Err(LedgerError::invalid_state(
                "credit note",
                credit_note_id,
                note.status.as_str(),
                "apply to an invoice",
            ));
        }
        let mut invoice = tx
            .get_invoice(tenant_id, invoice_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("invoice", invoice_id))?;
        if invoice.account_id != note.account_id {
            return Err(LedgerError::validation(format!(
                "invoice {} belongs to a different account than the credit note",
                invoice.invoice_number
            )));
        }
        if !invoice.status.is_outstanding() {
            return Err(LedgerError::invalid_state(
                "invoice",
                invoice_id,
                invoice.status.as_str(),
                "apply credit to",
            ));
        }

        let max_allowed = note.remaining().min(invoice.balance_due);
        if amount > max_allowed {
            return Err(LedgerError::over_allocation(
                "credit note application",
                amount,
                max_allowed,
            ));
        }

        let today = Utc::now().date_naive();
        settle_invoice(&mut invoice, amount, today);
        tx.update_invoice(&invoice).await?;

        let application = CreditNoteApplication {
            application_id: Uuid::new_v4(),
            tenant_id,
            credit_note_id,
            invoice_id,
            amount,
            created_utc: Utc::now(),
        };
        tx.insert_credit_note_application(&application).await?;

        note.applied_to_balance = money::round2(note.applied_to_balance + amount);
        note.status = if money::is_settled(note.remaining()) {
            CreditNoteStatus::Applied
        } else {
            CreditNoteStatus::PartiallyApplied
        };
        tx.update_credit_note(&note).await?;
        tx.commit().await?;

        CREDIT_NOTES_TOTAL.with_label_values(&["applied"]).inc();
        info!(
            credit_note_number = %note.credit_note_number,
            invoice_number = %invoice.invoice_number,
            amount = %amount,
            "Credit note applied to invoice"
        );

        Ok((note, application, invoice))
    }

    /// Refund remaining credit out of the note. The disbursement itself is
    /// the treasury collaborator's job; the ledger records the consumption.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, credit_note_id = %credit_note_id))]
    pub async fn refund_credit_note(
        &self,
        tenant_id: Uuid,
        credit_note_id: Uuid,
        amount: Decimal,
        method: PaymentMethod,
    ) -> LedgerResult<CreditNote> {
        let amount = money::round2(amount);
        if amount <= Decimal::ZERO {
            return Err(LedgerError::validation("refund amount must be positive"));
        }

        let mut tx = self.store.begin().await?;
        let note = tx
            .get_credit_note(tenant_id, credit_note_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("credit note", credit_note_id))?;
        tx.lock_account(tenant_id, note.account_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("account", note.account_id))?;
        let mut note = tx
            .get_credit_note(tenant_id, credit_note_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("credit note", credit_note_id))?;

        if !note.status.is_applicable() {
            return Err(LedgerError::invalid_state(
                "credit note",
                credit_note_id,
                note.status.as_str(),
                "refund",
            ));
        }
        let remaining = note.remaining();
        if amount > remaining {
            return Err(LedgerError::over_allocation(
                "credit note refund",
                amount,
                remaining,
            ));
        }

        note.refunded_amount = money::round2(note.refunded_amount + amount);
        note.status = if money::is_settled(note.remaining()) {
            CreditNoteStatus::Refunded
        } else {
            CreditNoteStatus::PartiallyApplied
        };
        append_note(&mut note.notes, &format!("refunded {} via {}", amount, method.as_str()));
        tx.update_credit_note(&note).await?;
        tx.commit().await?;

        CREDIT_NOTES_TOTAL.with_label_values(&["refunded"]).inc();
        info!(
            credit_note_number = %note.credit_note_number,
            amount = %amount,
            method = method.as_str(),
            "Credit note refunded"
        );

        Ok(note)
    }

    /// Void a credit note. Only legal before any application or refund;
    /// applied, partially applied or refunded notes can never be voided.
    #[instrument(skip(self, reason), fields(tenant_id = %tenant_id, credit_note_id = %credit_note_id))]
    pub async fn void_credit_note(
        &self,
        tenant_id: Uuid,
        credit_note_id: Uuid,
        reason: &str,
    ) -> LedgerResult<CreditNote> {
        if reason.trim().is_empty() {
            return Err(LedgerError::validation("a void reason is required"));
        }

        let mut tx = self.store.begin().await?;
        let note = tx
            .get_credit_note(tenant_id, credit_note_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("credit note", credit_note_id))?;
        tx.lock_account(tenant_id, note.account_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("account", note.account_id))?;
        let mut note = tx
            .get_credit_note(tenant_id, credit_note_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("credit note", credit_note_id))?;

        let untouched = note.applied_to_balance == Decimal::ZERO
            && note.refunded_amount == Decimal::ZERO;
        if !untouched
            || !matches!(
                note.status,
                CreditNoteStatus::PendingApproval | CreditNoteStatus::Approved
            )
        {
            return Err(LedgerError::invalid_state(
                "credit note",
                credit_note_id,
                note.status.as_str(),
                "void",
            ));
        }
        note.status = CreditNoteStatus::Voided;
        append_note(&mut note.notes, &format!("voided: {}", reason.trim()));
        tx.update_credit_note(&note).await?;
        tx.commit().await?;

        CREDIT_NOTES_TOTAL.with_label_values(&["voided"]).inc();
        info!(credit_note_number = %note.credit_note_number, reason = reason, "Credit note voided");

        Ok(note)
    }

    /// Get a credit note with its line items.
    pub async fn get_credit_note(
        &self,
        tenant_id: Uuid,
        credit_note_id: Uuid,
    ) -> LedgerResult<(CreditNote, Vec<CreditNoteLineItem>)> {
        let note = self
            .store
            .get_credit_note(tenant_id, credit_note_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("credit note", credit_note_id))?;
        let line_items = self
            .store
            .get_credit_note_line_items(tenant_id, credit_note_id)
            .await?;
        Ok((note, line_items))
    }
}

fn append_note(notes: &mut Option<String>, entry: &str) {
    match notes {
        Some(existing) => {
            existing.push('\n');
            existing.push_str(entry);
        }
        None => *notes = Some(entry.to_string()),
    }
}
