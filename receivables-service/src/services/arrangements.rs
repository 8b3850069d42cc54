//! Payment arrangement scheduler.
//!
//! Splits a group of invoices into installments, records per-installment
//! payments (delegating the monetary application to the same FIFO walk the
//! payment engine uses), and rolls up arrangement status.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Datelike, NaiveDate, Utc};
use ledger_core::{money, LedgerError, LedgerResult};
use rust_decimal::Decimal;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::models::{
    ArrangementInstallment, ArrangementStatus, CreateArrangement, InstallmentStatus, Invoice,
    Payment, PaymentAllocation, PaymentArrangement, PaymentMethod,
};
use crate::services::invoices::settle_invoice;
use crate::services::metrics::{ARRANGEMENTS_TOTAL, PAYMENTS_TOTAL};
use crate::store::{format_document_number, DocumentKind, LedgerStore};

/// Payment arrangement service.
#[derive(Clone)]
pub struct ArrangementService {
    store: Arc<dyn LedgerStore>,
}

impl ArrangementService {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Create a draft arrangement over a group of open invoices.
    ///
    /// The total is the sum of the invoices' balances at creation time,
    /// split into equal installments truncated to 2 decimals with the
    /// remainder on the last, so the installments always reconcile exactly.
    #[instrument(skip(self, input), fields(tenant_id = %tenant_id, account_id = %input.account_id))]
    pub async fn create_arrangement(
        &self,
        tenant_id: Uuid,
        input: CreateArrangement,
    ) -> LedgerResult<(PaymentArrangement, Vec<ArrangementInstallment>)> {
        if input.installment_count < 1 {
            return Err(LedgerError::validation(
                "an arrangement needs at least one installment",
            ));
        }
        if input.invoice_ids.is_empty() {
            return Err(LedgerError::validation(
                "an arrangement needs at least one invoice",
            ));
        }
        let unique: HashSet<&Uuid> = input.invoice_ids.iter().collect();
        if unique.len() != input.invoice_ids.len() {
            return Err(LedgerError::validation(
                "an invoice may appear only once in an arrangement",
            ));
        }

        let mut tx = self.store.begin().await?;
        tx.lock_account(tenant_id, input.account_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("account", input.account_id))?;

        let mut total = Decimal::ZERO;
        for invoice_id in &input.invoice_ids {
            let invoice = tx
                .get_invoice(tenant_id, *invoice_id)
                .await?
                .ok_or_else(|| LedgerError::not_found("invoice", *invoice_id))?;
            if invoice.account_id != input.account_id {
                return Err(LedgerError::validation(format!(
                    "invoice {} belongs to a different account",
                    invoice.invoice_number
                )));
            }
            if !invoice.status.is_outstanding() {
                return Err(LedgerError::validation(format!(
                    "invoice {} is {} and cannot join an arrangement",
                    invoice.invoice_number,
                    invoice.status.as_str()
                )));
            }
            total += invoice.balance_due;
        }
        let total = money::round2(total);
        if total <= Decimal::ZERO {
            return Err(LedgerError::validation(
                "the referenced invoices have nothing outstanding",
            ));
        }

        let arrangement_id = Uuid::new_v4();
        let amounts = money::split_installments(total, input.installment_count);
        let installments: Vec<ArrangementInstallment> = amounts
            .iter()
            .enumerate()
            .map(|(k, amount)| ArrangementInstallment {
                installment_id: Uuid::new_v4(),
                arrangement_id,
                tenant_id,
                installment_no: k as i32 + 1,
                due_date: input.frequency.nth_due_date(input.start_date, k as u32),
                amount: *amount,
                paid_amount: Decimal::ZERO,
                status: InstallmentStatus::Pending,
            })
            .collect();

        let arrangement = PaymentArrangement {
            arrangement_id,
            tenant_id,
            account_id: input.account_id,
            installment_count: input.installment_count as i32,
            frequency: input.frequency,
            start_date: input.start_date,
            total_amount: total,
            paid_amount: Decimal::ZERO,
            remaining_amount: total,
            status: ArrangementStatus::Draft,
            created_utc: Utc::now(),
        };
        tx.insert_arrangement(&arrangement, &input.invoice_ids, &installments)
            .await?;
        tx.commit().await?;

        ARRANGEMENTS_TOTAL.with_label_values(&["created"]).inc();
        info!(
            arrangement_id = %arrangement.arrangement_id,
            total_amount = %arrangement.total_amount,
            installments = installments.len(),
            "Arrangement created"
        );

        Ok((arrangement, installments))
    }

    /// Activate a draft arrangement.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, arrangement_id = %arrangement_id))]
    pub async fn activate_arrangement(
        &self,
        tenant_id: Uuid,
        arrangement_id: Uuid,
    ) -> LedgerResult<PaymentArrangement> {
        let mut tx = self.store.begin().await?;
        let arrangement = tx
            .get_arrangement(tenant_id, arrangement_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("arrangement", arrangement_id))?;
        tx.lock_account(tenant_id, arrangement.account_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("account", arrangement.account_id))?;
        let mut arrangement = tx
            .get_arrangement(tenant_id, arrangement_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("arrangement", arrangement_id))?;

        if arrangement.status != ArrangementStatus::Draft {
            return Err(LedgerError::invalid_state(
                "arrangement",
                arrangement_id,
                arrangement.status.as_str(),
                "activate",
            ));
        }
        arrangement.status = ArrangementStatus::Active;
        tx.update_arrangement(&arrangement).await?;
        tx.commit().await?;

        ARRANGEMENTS_TOTAL.with_label_values(&["activated"]).inc();
        info!(arrangement_id = %arrangement_id, "Arrangement activated");

        Ok(arrangement)
    }

    /// Record a payment against one installment.
    ///
    /// One transaction: the payment is recorded, allocated oldest-first
    /// across the arrangement's invoices, the installment and arrangement
    /// roll-ups are updated, and the arrangement completes when every
    /// installment is paid.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, arrangement_id = %arrangement_id, installment_id = %installment_id))]
    pub async fn record_installment_payment(
        &self,
        tenant_id: Uuid,
        arrangement_id: Uuid,
        installment_id: Uuid,
        amount: Decimal,
        method: PaymentMethod,
        payment_date: NaiveDate,
    ) -> LedgerResult<(PaymentArrangement, Vec<ArrangementInstallment>, Payment)> {
        let amount = money::round2(amount);
        if amount <= Decimal::ZERO {
            return Err(LedgerError::validation("payment amount must be positive"));
        }

        let mut tx = self.store.begin().await?;
        let arrangement = tx
            .get_arrangement(tenant_id, arrangement_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("arrangement", arrangement_id))?;
        let mut account = tx
            .lock_account(tenant_id, arrangement.account_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("account", arrangement.account_id))?;
        let mut arrangement = tx
            .get_arrangement(tenant_id, arrangement_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("arrangement", arrangement_id))?;

        if arrangement.status != ArrangementStatus::Active {
            return Err(LedgerError::invalid_state(
                "arrangement",
                arrangement_id,
                arrangement.status.as_str(),
                "record an installment payment against",
            ));
        }
        if amount > arrangement.remaining_amount {
            return Err(LedgerError::over_allocation(
                "installment payment",
                amount,
                arrangement.remaining_amount,
            ));
        }

        let mut installments = tx.get_installments(tenant_id, arrangement_id).await?;
        let slot = installments
            .iter_mut()
            .find(|i| i.installment_id == installment_id)
            .ok_or_else(|| LedgerError::not_found("installment", installment_id))?;

        // Record the payment and walk the arrangement's invoices
        // oldest-first, exactly like a FIFO settlement scoped to the plan.
        let year = payment_date.year();
        let seq = tx
            .next_document_number(tenant_id, DocumentKind::Receipt, year)
            .await?;
        let payment = Payment {
            payment_id: Uuid::new_v4(),
            tenant_id,
            account_id: arrangement.account_id,
            receipt_number: format_document_number(DocumentKind::Receipt, year, seq),
            amount,
            method,
            reference: Some(format!("arrangement {}", arrangement_id)),
            payment_date,
            created_utc: Utc::now(),
        };
        tx.insert_payment(&payment).await?;

        let invoice_ids = tx.arrangement_invoice_ids(tenant_id, arrangement_id).await?;
        let mut open_invoices: Vec<Invoice> = Vec::with_capacity(invoice_ids.len());
        for invoice_id in &invoice_ids {
            let invoice = tx
                .get_invoice(tenant_id, *invoice_id)
                .await?
                .ok_or_else(|| LedgerError::not_found("invoice", *invoice_id))?;
            if invoice.status.is_outstanding() && invoice.balance_due > Decimal::ZERO {
                open_invoices.push(invoice);
            }
        }
        open_invoices.sort_by(|a, b| {
            a.due_date
                .cmp(&b.due_date)
                .then_with(|| a.invoice_number.cmp(&b.invoice_number))
        });

        let today = Utc::now().date_naive();
        let mut remaining = amount;
        for mut invoice in open_invoices {
            if remaining <= Decimal::ZERO {
                break;
            }
            let take = remaining.min(invoice.balance_due);
            settle_invoice(&mut invoice, take, today);
            tx.update_invoice(&invoice).await?;
            tx.insert_allocation(&PaymentAllocation {
                allocation_id: Uuid::new_v4(),
                tenant_id,
                payment_id: payment.payment_id,
                invoice_id: invoice.invoice_id,
                amount: take,
                created_utc: Utc::now(),
            })
            .await?;
            remaining = money::sub_clamped(remaining, take);
        }
        // Invoices already settled outside the plan leave the residue as
        // account credit.
        if remaining > Decimal::ZERO {
            account.credit_balance = money::round2(account.credit_balance + remaining);
            tx.update_account(&account).await?;
        }

        slot.paid_amount = money::round2(slot.paid_amount + amount);
        if slot.paid_amount + money::MONEY_EPSILON >= slot.amount {
            slot.status = InstallmentStatus::Paid;
        }
        let updated_slot = slot.clone();
        tx.update_installment(&updated_slot).await?;

        arrangement.paid_amount = money::round2(arrangement.paid_amount + amount);
        arrangement.remaining_amount =
            money::sub_clamped(arrangement.total_amount, arrangement.paid_amount);
        let completed = installments
            .iter()
            .all(|i| i.status == InstallmentStatus::Paid);
        if completed {
            arrangement.status = ArrangementStatus::Completed;
        }
        tx.update_arrangement(&arrangement).await?;
        tx.commit().await?;

        PAYMENTS_TOTAL.with_label_values(&[method.as_str()]).inc();
        if completed {
            ARRANGEMENTS_TOTAL.with_label_values(&["completed"]).inc();
        }
        info!(
            arrangement_id = %arrangement_id,
            installment_id = %installment_id,
            amount = %amount,
            remaining = %arrangement.remaining_amount,
            "Installment payment recorded"
        );

        Ok((arrangement, installments, payment))
    }

    /// Cancel a draft or active arrangement. Installment payments already
    /// applied stay on the underlying invoices.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, arrangement_id = %arrangement_id))]
    pub async fn cancel_arrangement(
        &self,
        tenant_id: Uuid,
        arrangement_id: Uuid,
    ) -> LedgerResult<PaymentArrangement> {
        let mut tx = self.store.begin().await?;
        let arrangement = tx
            .get_arrangement(tenant_id, arrangement_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("arrangement", arrangement_id))?;
        tx.lock_account(tenant_id, arrangement.account_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("account", arrangement.account_id))?;
        let mut arrangement = tx
            .get_arrangement(tenant_id, arrangement_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("arrangement", arrangement_id))?;

        if !matches!(
            arrangement.status,
            ArrangementStatus::Draft | ArrangementStatus::Active
        ) {
            return Err(LedgerError::invalid_state(
                "arrangement",
                arrangement_id,
                arrangement.status.as_str(),
                "cancel",
            ));
        }
        arrangement.status = ArrangementStatus::Cancelled;
        tx.update_arrangement(&arrangement).await?;
        tx.commit().await?;

        ARRANGEMENTS_TOTAL.with_label_values(&["cancelled"]).inc();
        info!(arrangement_id = %arrangement_id, "Arrangement cancelled");

        Ok(arrangement)
    }

    /// Periodic sweep: flip pending installments past due to `Overdue` and
    /// default their active arrangements. Returns the arrangements that
    /// defaulted.
    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    pub async fn mark_overdue_installments(
        &self,
        tenant_id: Uuid,
        as_of: Option<NaiveDate>,
    ) -> LedgerResult<Vec<Uuid>> {
        let as_of = as_of.unwrap_or_else(|| Utc::now().date_naive());
        let mut tx = self.store.begin().await?;
        let affected = tx.mark_overdue_installments(tenant_id, as_of).await?;
        let mut defaulted = Vec::new();
        for arrangement_id in affected {
            if let Some(mut arrangement) = tx.get_arrangement(tenant_id, arrangement_id).await? {
                if arrangement.status == ArrangementStatus::Active {
                    arrangement.status = ArrangementStatus::Defaulted;
                    tx.update_arrangement(&arrangement).await?;
                    defaulted.push(arrangement_id);
                }
            }
        }
        tx.commit().await?;

        for _ in &defaulted {
            ARRANGEMENTS_TOTAL.with_label_values(&["defaulted"]).inc();
        }
        if !defaulted.is_empty() {
            info!(count = defaulted.len(), %as_of, "Arrangements defaulted");
        }
        Ok(defaulted)
    }

    /// Get an arrangement with its installments.
    pub async fn get_arrangement(
        &self,
        tenant_id: Uuid,
        arrangement_id: Uuid,
    ) -> LedgerResult<(PaymentArrangement, Vec<ArrangementInstallment>)> {
        let arrangement = self
            .store
            .get_arrangement(tenant_id, arrangement_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("arrangement", arrangement_id))?;
        let installments = self
            .store
            .get_installments(tenant_id, arrangement_id)
            .await?;
        Ok((arrangement, installments))
    }
}
