//! Common test utilities for receivables-service integration tests.
//!
//! Tests drive the engine services over the in-memory store adapter; the
//! Postgres adapter implements the same port and is exercised against a
//! real database in deployment environments.

use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};
use receivables_service::models::{
    AccountKind, AccountStatus, ArAccount, CreateInvoice, CreateLineItem, Invoice,
};
use receivables_service::services::{
    AgingService, ArrangementService, CreditNoteService, InvoiceService, PaymentService,
};
use receivables_service::store::{LedgerStore, MemoryLedgerStore};
use rust_decimal::Decimal;
use uuid::Uuid;

/// Engine services wired over a fresh in-memory store with one tenant.
pub struct TestApp {
    pub store: Arc<MemoryLedgerStore>,
    pub tenant_id: Uuid,
    pub invoices: InvoiceService,
    pub payments: PaymentService,
    pub credit_notes: CreditNoteService,
    pub arrangements: ArrangementService,
    pub aging: AgingService,
}

impl TestApp {
    pub fn new() -> Self {
        let store = Arc::new(MemoryLedgerStore::new());
        let port: Arc<dyn LedgerStore> = store.clone();
        Self {
            tenant_id: Uuid::new_v4(),
            invoices: InvoiceService::new(port.clone()),
            payments: PaymentService::new(port.clone()),
            credit_notes: CreditNoteService::new(port.clone()),
            arrangements: ArrangementService::new(port.clone()),
            aging: AgingService::new(port),
            store,
        }
    }

    /// Create an active member account.
    pub async fn member_account(&self, name: &str) -> ArAccount {
        let account_no = format!("M-{}", &Uuid::new_v4().simple().to_string()[..8]);
        let account = ArAccount::new(self.tenant_id, account_no, name, AccountKind::Member);
        self.store
            .insert_account(&account)
            .await
            .expect("Failed to insert account");
        account
    }

    /// Create a suspended member account.
    pub async fn suspended_account(&self, name: &str) -> ArAccount {
        let account_no = format!("M-{}", &Uuid::new_v4().simple().to_string()[..8]);
        let mut account = ArAccount::new(self.tenant_id, account_no, name, AccountKind::Member);
        account.status = AccountStatus::Suspended;
        self.store
            .insert_account(&account)
            .await
            .expect("Failed to insert account");
        account
    }

    /// Create and send a single-line invoice with explicit dates.
    pub async fn open_invoice_dated(
        &self,
        account: &ArAccount,
        amount: Decimal,
        invoice_date: NaiveDate,
        due_date: NaiveDate,
    ) -> Invoice {
        let (invoice, _) = self
            .invoices
            .create_invoice(
                self.tenant_id,
                CreateInvoice {
                    account_id: account.account_id,
                    invoice_date,
                    due_date,
                    discount_amount: Decimal::ZERO,
                    notes: None,
                    line_items: vec![line("Club dues", Decimal::ONE, amount)],
                },
            )
            .await
            .expect("Failed to create invoice");
        self.invoices
            .send_invoice(self.tenant_id, invoice.invoice_id)
            .await
            .expect("Failed to send invoice")
    }

    /// Create and send a single-line invoice due `due_in_days` from today
    /// (negative = already past due).
    pub async fn open_invoice(
        &self,
        account: &ArAccount,
        amount: Decimal,
        due_in_days: i64,
    ) -> Invoice {
        let due_date = today() + Duration::days(due_in_days);
        let invoice_date = due_date.min(today());
        self.open_invoice_dated(account, amount, invoice_date, due_date)
            .await
    }

    /// Reload an invoice from the store.
    pub async fn invoice(&self, invoice_id: Uuid) -> Invoice {
        self.store
            .get_invoice(self.tenant_id, invoice_id)
            .await
            .expect("Failed to get invoice")
            .expect("Invoice not found")
    }

    /// Reload an account from the store.
    pub async fn account(&self, account_id: Uuid) -> ArAccount {
        self.store
            .get_account(self.tenant_id, account_id)
            .await
            .expect("Failed to get account")
            .expect("Account not found")
    }
}

/// A plain untaxed, undiscounted line item.
pub fn line(description: &str, quantity: Decimal, unit_price: Decimal) -> CreateLineItem {
    CreateLineItem {
        description: description.to_string(),
        quantity,
        unit_price,
        discount_pct: Decimal::ZERO,
        taxable: false,
        tax_rate: Decimal::ZERO,
    }
}

pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}
