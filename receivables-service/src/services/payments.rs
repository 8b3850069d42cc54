//! Payment and allocation engine.
//!
//! Records payments against an account and applies them to invoices,
//! either through explicit allocations or oldest-first (FIFO) settlement.
//! Every entry point is a single transaction serialized on the account:
//! either the payment, all its allocations, every invoice update and the
//! credit-balance change commit together, or none do.

use std::sync::Arc;

use chrono::{Datelike, NaiveDate, Utc};
use ledger_core::{money, LedgerError, LedgerResult};
use rust_decimal::Decimal;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::models::{Payment, PaymentAllocation, PaymentMethod, RecordPayment};
use crate::services::invoices::settle_invoice;
use crate::services::metrics::PAYMENTS_TOTAL;
use crate::store::{format_document_number, DocumentKind, LedgerStore, LedgerTx};

/// Payment recording and allocation service.
#[derive(Clone)]
pub struct PaymentService {
    store: Arc<dyn LedgerStore>,
}

impl PaymentService {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    async fn new_payment(
        &self,
        tx: &mut Box<dyn LedgerTx>,
        tenant_id: Uuid,
        account_id: Uuid,
        amount: Decimal,
        method: PaymentMethod,
        payment_date: NaiveDate,
        reference: Option<String>,
    ) -> LedgerResult<Payment> {
        let year = payment_date.year();
        let seq = tx
            .next_document_number(tenant_id, DocumentKind::Receipt, year)
            .await?;
        Ok(Payment {
            payment_id: Uuid::new_v4(),
            tenant_id,
            account_id,
            receipt_number: format_document_number(DocumentKind::Receipt, year, seq),
            amount,
            method,
            reference,
            payment_date,
            created_utc: Utc::now(),
        })
    }

    /// Record a payment with explicit allocations. Each allocation must fit
    /// within the target invoice's balance and the payment total; whatever
    /// remains unallocated is credited to the account's `credit_balance`.
    #[instrument(skip(self, input), fields(tenant_id = %tenant_id, account_id = %input.account_id))]
    pub async fn record_payment(
        &self,
        tenant_id: Uuid,
        input: RecordPayment,
    ) -> LedgerResult<(Payment, Vec<PaymentAllocation>)> {
        let amount = money::round2(input.amount);
        if amount <= Decimal::ZERO {
            return Err(LedgerError::validation("payment amount must be positive"));
        }
        let mut requested = Decimal::ZERO;
        for allocation in &input.allocations {
            let a = money::round2(allocation.amount);
            if a <= Decimal::ZERO {
                return Err(LedgerError::validation(
                    "allocation amounts must be positive",
                ));
            }
            requested += a;
        }
        if requested > amount {
            return Err(LedgerError::over_allocation(
                "payment allocation",
                requested,
                amount,
            ));
        }

        let mut tx = self.store.begin().await?;
        let mut account = tx
            .lock_account(tenant_id, input.account_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("account", input.account_id))?;

        let payment = self
            .new_payment(
                &mut tx,
                tenant_id,
                input.account_id,
                amount,
                input.method,
                input.payment_date,
                input.reference.clone(),
            )
            .await?;
        tx.insert_payment(&payment).await?;

        let today = Utc::now().date_naive();
        let mut allocations = Vec::with_capacity(input.allocations.len());
        let mut allocated_total = Decimal::ZERO;
        for request in &input.allocations {
            let requested = money::round2(request.amount);
            let mut invoice = tx
                .get_invoice(tenant_id, request.invoice_id)
                .await?
                .ok_or_else(|| LedgerError::not_found("invoice", request.invoice_id))?;
            if invoice.account_id != input.account_id {
                return Err(LedgerError::validation(format!(
                    "invoice {} belongs to a different account",
                    invoice.invoice_number
                )));
            }
            if !invoice.status.is_outstanding() {
                return Err(LedgerError::invalid_state(
                    "invoice",
                    invoice.invoice_id,
                    invoice.status.as_str(),
                    "allocate a payment to",
                ));
            }
            if requested > invoice.balance_due {
                return Err(LedgerError::over_allocation(
                    "invoice allocation",
                    requested,
                    invoice.balance_due,
                ));
            }

            settle_invoice(&mut invoice, requested, today);
            tx.update_invoice(&invoice).await?;

            let allocation = PaymentAllocation {
                allocation_id: Uuid::new_v4(),
                tenant_id,
                payment_id: payment.payment_id,
                invoice_id: invoice.invoice_id,
                amount: requested,
                created_utc: Utc::now(),
            };
            tx.insert_allocation(&allocation).await?;
            allocations.push(allocation);
            allocated_total += requested;
        }

        let leftover = money::sub_clamped(amount, allocated_total);
        if leftover > Decimal::ZERO {
            account.credit_balance = money::round2(account.credit_balance + leftover);
            tx.update_account(&account).await?;
        }
        tx.commit().await?;

        PAYMENTS_TOTAL
            .with_label_values(&[payment.method.as_str()])
            .inc();
        info!(
            payment_id = %payment.payment_id,
            receipt_number = %payment.receipt_number,
            amount = %payment.amount,
            allocated = %allocated_total,
            credited = %leftover,
            "Payment recorded"
        );

        Ok((payment, allocations))
    }

    /// Settle outstanding invoices oldest-first.
    ///
    /// Invoices are ordered by due date, then invoice number as the
    /// deterministic tie-break. With `use_fifo` false the whole amount goes
    /// to the account's credit balance instead; leftover after settling
    /// every open invoice is credited the same way.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, account_id = %account_id))]
    pub async fn settle_fifo(
        &self,
        tenant_id: Uuid,
        account_id: Uuid,
        amount: Decimal,
        method: PaymentMethod,
        payment_date: NaiveDate,
        use_fifo: bool,
    ) -> LedgerResult<(Payment, Vec<PaymentAllocation>)> {
        let amount = money::round2(amount);
        if amount <= Decimal::ZERO {
            return Err(LedgerError::validation("payment amount must be positive"));
        }

        let mut tx = self.store.begin().await?;
        let mut account = tx
            .lock_account(tenant_id, account_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("account", account_id))?;

        let payment = self
            .new_payment(
                &mut tx,
                tenant_id,
                account_id,
                amount,
                method,
                payment_date,
                None,
            )
            .await?;
        tx.insert_payment(&payment).await?;

        let today = Utc::now().date_naive();
        let mut allocations = Vec::new();
        let mut remaining = amount;
        if use_fifo {
            for mut invoice in tx.outstanding_invoices(tenant_id, account_id).await? {
                if remaining <= Decimal::ZERO {
                    break;
                }
                let take = remaining.min(invoice.balance_due);
                settle_invoice(&mut invoice, take, today);
                tx.update_invoice(&invoice).await?;

                let allocation = PaymentAllocation {
                    allocation_id: Uuid::new_v4(),
                    tenant_id,
                    payment_id: payment.payment_id,
                    invoice_id: invoice.invoice_id,
                    amount: take,
                    created_utc: Utc::now(),
                };
                tx.insert_allocation(&allocation).await?;
                allocations.push(allocation);
                remaining = money::sub_clamped(remaining, take);
            }
        }
        if remaining > Decimal::ZERO {
            account.credit_balance = money::round2(account.credit_balance + remaining);
            tx.update_account(&account).await?;
        }
        tx.commit().await?;

        PAYMENTS_TOTAL
            .with_label_values(&[payment.method.as_str()])
            .inc();
        info!(
            payment_id = %payment.payment_id,
            receipt_number = %payment.receipt_number,
            amount = %payment.amount,
            allocations = allocations.len(),
            credited = %remaining,
            "FIFO settlement recorded"
        );

        Ok((payment, allocations))
    }

    /// Get a payment by id.
    pub async fn get_payment(&self, tenant_id: Uuid, payment_id: Uuid) -> LedgerResult<Payment> {
        self.store
            .get_payment(tenant_id, payment_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("payment", payment_id))
    }
}
