//! Payment arrangement tests: installment splitting, activation,
//! installment payments, completion, cancellation, and the overdue sweep.

mod common;

use chrono::Duration;
use common::{today, TestApp};
use ledger_core::LedgerError;
use receivables_service::models::{
    ArrangementStatus, CreateArrangement, Frequency, InstallmentStatus, InvoiceStatus,
    PaymentMethod,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

#[tokio::test]
async fn installments_split_evenly_with_remainder_on_last() {
    let app = TestApp::new();
    let account = app.member_account("Split Member").await;
    let invoice = app.open_invoice(&account, dec!(100), 10).await;

    let (arrangement, installments) = app
        .arrangements
        .create_arrangement(
            app.tenant_id,
            CreateArrangement {
                account_id: account.account_id,
                invoice_ids: vec![invoice.invoice_id],
                installment_count: 3,
                frequency: Frequency::Monthly,
                start_date: today(),
            },
        )
        .await
        .expect("Failed to create arrangement");

    assert_eq!(arrangement.status, ArrangementStatus::Draft);
    assert_eq!(arrangement.total_amount, dec!(100.00));
    assert_eq!(installments.len(), 3);
    assert_eq!(installments[0].amount, dec!(33.33));
    assert_eq!(installments[1].amount, dec!(33.33));
    assert_eq!(installments[2].amount, dec!(33.34));

    let sum: Decimal = installments.iter().map(|i| i.amount).sum();
    assert_eq!(sum, arrangement.total_amount);
}

#[tokio::test]
async fn due_dates_follow_the_frequency() {
    let app = TestApp::new();
    let account = app.member_account("Cadence Member").await;
    let invoice = app.open_invoice(&account, dec!(90), 10).await;

    let start = today();
    let (_, installments) = app
        .arrangements
        .create_arrangement(
            app.tenant_id,
            CreateArrangement {
                account_id: account.account_id,
                invoice_ids: vec![invoice.invoice_id],
                installment_count: 3,
                frequency: Frequency::Fortnightly,
                start_date: start,
            },
        )
        .await
        .expect("Failed to create arrangement");

    assert_eq!(installments[0].due_date, start);
    assert_eq!(installments[1].due_date, start + Duration::weeks(2));
    assert_eq!(installments[2].due_date, start + Duration::weeks(4));
}

#[tokio::test]
async fn arrangement_totals_span_multiple_invoices() {
    let app = TestApp::new();
    let account = app.member_account("Multi Member").await;
    let first = app.open_invoice(&account, dec!(60), 5).await;
    let second = app.open_invoice(&account, dec!(40.50), 15).await;

    let (arrangement, _) = app
        .arrangements
        .create_arrangement(
            app.tenant_id,
            CreateArrangement {
                account_id: account.account_id,
                invoice_ids: vec![first.invoice_id, second.invoice_id],
                installment_count: 2,
                frequency: Frequency::Monthly,
                start_date: today(),
            },
        )
        .await
        .expect("Failed to create arrangement");

    assert_eq!(arrangement.total_amount, dec!(100.50));
    assert_eq!(arrangement.remaining_amount, dec!(100.50));
}

#[tokio::test]
async fn voided_or_paid_invoices_cannot_join() {
    let app = TestApp::new();
    let account = app.member_account("Guard Member").await;
    let invoice = app.open_invoice(&account, dec!(100), 10).await;
    app.invoices
        .void_invoice(app.tenant_id, invoice.invoice_id, "duplicate")
        .await
        .expect("Failed to void invoice");

    let result = app
        .arrangements
        .create_arrangement(
            app.tenant_id,
            CreateArrangement {
                account_id: account.account_id,
                invoice_ids: vec![invoice.invoice_id],
                installment_count: 2,
                frequency: Frequency::Weekly,
                start_date: today(),
            },
        )
        .await;

    assert!(matches!(result, Err(LedgerError::Validation { .. })));
}

#[tokio::test]
async fn zero_installments_is_rejected() {
    let app = TestApp::new();
    let account = app.member_account("Zero Member").await;
    let invoice = app.open_invoice(&account, dec!(100), 10).await;

    let result = app
        .arrangements
        .create_arrangement(
            app.tenant_id,
            CreateArrangement {
                account_id: account.account_id,
                invoice_ids: vec![invoice.invoice_id],
                installment_count: 0,
                frequency: Frequency::Weekly,
                start_date: today(),
            },
        )
        .await;

    assert!(matches!(result, Err(LedgerError::Validation { .. })));
}

#[tokio::test]
async fn installment_payment_settles_underlying_invoices() {
    let app = TestApp::new();
    let account = app.member_account("Installment Member").await;
    let invoice = app.open_invoice(&account, dec!(100), 10).await;

    let (arrangement, installments) = app
        .arrangements
        .create_arrangement(
            app.tenant_id,
            CreateArrangement {
                account_id: account.account_id,
                invoice_ids: vec![invoice.invoice_id],
                installment_count: 2,
                frequency: Frequency::Monthly,
                start_date: today(),
            },
        )
        .await
        .expect("Failed to create arrangement");
    app.arrangements
        .activate_arrangement(app.tenant_id, arrangement.arrangement_id)
        .await
        .expect("Failed to activate arrangement");

    let (arrangement, installments, payment) = app
        .arrangements
        .record_installment_payment(
            app.tenant_id,
            arrangement.arrangement_id,
            installments[0].installment_id,
            dec!(50),
            PaymentMethod::DirectDebit,
            today(),
        )
        .await
        .expect("Failed to record installment payment");

    assert_eq!(installments[0].status, InstallmentStatus::Paid);
    assert_eq!(installments[0].paid_amount, dec!(50.00));
    assert_eq!(arrangement.paid_amount, dec!(50.00));
    assert_eq!(arrangement.remaining_amount, dec!(50.00));
    assert_eq!(arrangement.status, ArrangementStatus::Active);
    assert!(payment.receipt_number.starts_with("RCT-"));

    // The money landed on the underlying invoice.
    let invoice = app.invoice(invoice.invoice_id).await;
    assert_eq!(invoice.balance_due, dec!(50.00));
    assert_eq!(invoice.status, InvoiceStatus::PartiallyPaid);
}

#[tokio::test]
async fn paying_every_installment_completes_the_arrangement() {
    let app = TestApp::new();
    let account = app.member_account("Completion Member").await;
    let invoice = app.open_invoice(&account, dec!(100), 10).await;

    let (arrangement, installments) = app
        .arrangements
        .create_arrangement(
            app.tenant_id,
            CreateArrangement {
                account_id: account.account_id,
                invoice_ids: vec![invoice.invoice_id],
                installment_count: 2,
                frequency: Frequency::Weekly,
                start_date: today(),
            },
        )
        .await
        .expect("Failed to create arrangement");
    app.arrangements
        .activate_arrangement(app.tenant_id, arrangement.arrangement_id)
        .await
        .expect("Failed to activate arrangement");

    app.arrangements
        .record_installment_payment(
            app.tenant_id,
            arrangement.arrangement_id,
            installments[0].installment_id,
            dec!(50),
            PaymentMethod::Card,
            today(),
        )
        .await
        .expect("Failed to pay first installment");
    let (arrangement, installments, _) = app
        .arrangements
        .record_installment_payment(
            app.tenant_id,
            arrangement.arrangement_id,
            installments[1].installment_id,
            dec!(50),
            PaymentMethod::Card,
            today(),
        )
        .await
        .expect("Failed to pay second installment");

    assert!(installments
        .iter()
        .all(|i| i.status == InstallmentStatus::Paid));
    assert_eq!(arrangement.status, ArrangementStatus::Completed);
    assert_eq!(arrangement.remaining_amount, Decimal::ZERO);

    let invoice = app.invoice(invoice.invoice_id).await;
    assert_eq!(invoice.status, InvoiceStatus::Paid);
}

#[tokio::test]
async fn partial_installment_payment_stays_pending() {
    let app = TestApp::new();
    let account = app.member_account("Partial Installment Member").await;
    let invoice = app.open_invoice(&account, dec!(100), 10).await;

    let (arrangement, installments) = app
        .arrangements
        .create_arrangement(
            app.tenant_id,
            CreateArrangement {
                account_id: account.account_id,
                invoice_ids: vec![invoice.invoice_id],
                installment_count: 2,
                frequency: Frequency::Weekly,
                start_date: today(),
            },
        )
        .await
        .expect("Failed to create arrangement");
    app.arrangements
        .activate_arrangement(app.tenant_id, arrangement.arrangement_id)
        .await
        .expect("Failed to activate arrangement");

    let (_, installments, _) = app
        .arrangements
        .record_installment_payment(
            app.tenant_id,
            arrangement.arrangement_id,
            installments[0].installment_id,
            dec!(20),
            PaymentMethod::Cash,
            today(),
        )
        .await
        .expect("Failed to record partial installment payment");

    assert_eq!(installments[0].status, InstallmentStatus::Pending);
    assert_eq!(installments[0].paid_amount, dec!(20.00));
}

#[tokio::test]
async fn paying_a_draft_arrangement_fails() {
    let app = TestApp::new();
    let account = app.member_account("Draft Arrangement Member").await;
    let invoice = app.open_invoice(&account, dec!(100), 10).await;

    let (arrangement, installments) = app
        .arrangements
        .create_arrangement(
            app.tenant_id,
            CreateArrangement {
                account_id: account.account_id,
                invoice_ids: vec![invoice.invoice_id],
                installment_count: 2,
                frequency: Frequency::Weekly,
                start_date: today(),
            },
        )
        .await
        .expect("Failed to create arrangement");

    let result = app
        .arrangements
        .record_installment_payment(
            app.tenant_id,
            arrangement.arrangement_id,
            installments[0].installment_id,
            dec!(50),
            PaymentMethod::Cash,
            today(),
        )
        .await;

    assert!(matches!(result, Err(LedgerError::InvalidState { .. })));
}

#[tokio::test]
async fn overpaying_the_arrangement_fails() {
    let app = TestApp::new();
    let account = app.member_account("Overpay Arrangement Member").await;
    let invoice = app.open_invoice(&account, dec!(100), 10).await;

    let (arrangement, installments) = app
        .arrangements
        .create_arrangement(
            app.tenant_id,
            CreateArrangement {
                account_id: account.account_id,
                invoice_ids: vec![invoice.invoice_id],
                installment_count: 2,
                frequency: Frequency::Weekly,
                start_date: today(),
            },
        )
        .await
        .expect("Failed to create arrangement");
    app.arrangements
        .activate_arrangement(app.tenant_id, arrangement.arrangement_id)
        .await
        .expect("Failed to activate arrangement");

    let result = app
        .arrangements
        .record_installment_payment(
            app.tenant_id,
            arrangement.arrangement_id,
            installments[0].installment_id,
            dec!(150),
            PaymentMethod::Cash,
            today(),
        )
        .await;

    assert!(matches!(result, Err(LedgerError::OverAllocation { .. })));
}

#[tokio::test]
async fn cancelling_keeps_applied_payments_on_invoices() {
    let app = TestApp::new();
    let account = app.member_account("Cancel Member").await;
    let invoice = app.open_invoice(&account, dec!(100), 10).await;

    let (arrangement, installments) = app
        .arrangements
        .create_arrangement(
            app.tenant_id,
            CreateArrangement {
                account_id: account.account_id,
                invoice_ids: vec![invoice.invoice_id],
                installment_count: 2,
                frequency: Frequency::Weekly,
                start_date: today(),
            },
        )
        .await
        .expect("Failed to create arrangement");
    app.arrangements
        .activate_arrangement(app.tenant_id, arrangement.arrangement_id)
        .await
        .expect("Failed to activate arrangement");
    app.arrangements
        .record_installment_payment(
            app.tenant_id,
            arrangement.arrangement_id,
            installments[0].installment_id,
            dec!(50),
            PaymentMethod::Card,
            today(),
        )
        .await
        .expect("Failed to record installment payment");

    let cancelled = app
        .arrangements
        .cancel_arrangement(app.tenant_id, arrangement.arrangement_id)
        .await
        .expect("Failed to cancel arrangement");
    assert_eq!(cancelled.status, ArrangementStatus::Cancelled);

    let invoice = app.invoice(invoice.invoice_id).await;
    assert_eq!(invoice.paid_amount, dec!(50.00));
    assert_eq!(invoice.balance_due, dec!(50.00));
}

#[tokio::test]
async fn overdue_sweep_defaults_active_arrangements() {
    let app = TestApp::new();
    let account = app.member_account("Default Member").await;
    let invoice = app.open_invoice(&account, dec!(100), 10).await;

    let start = today() - Duration::days(30);
    let (arrangement, _) = app
        .arrangements
        .create_arrangement(
            app.tenant_id,
            CreateArrangement {
                account_id: account.account_id,
                invoice_ids: vec![invoice.invoice_id],
                installment_count: 4,
                frequency: Frequency::Weekly,
                start_date: start,
            },
        )
        .await
        .expect("Failed to create arrangement");
    app.arrangements
        .activate_arrangement(app.tenant_id, arrangement.arrangement_id)
        .await
        .expect("Failed to activate arrangement");

    let defaulted = app
        .arrangements
        .mark_overdue_installments(app.tenant_id, None)
        .await
        .expect("Failed to run installment sweep");

    assert_eq!(defaulted, vec![arrangement.arrangement_id]);
    let (arrangement, installments) = app
        .arrangements
        .get_arrangement(app.tenant_id, arrangement.arrangement_id)
        .await
        .expect("Failed to reload arrangement");
    assert_eq!(arrangement.status, ArrangementStatus::Defaulted);
    assert!(installments
        .iter()
        .filter(|i| i.due_date < today())
        .all(|i| i.status == InstallmentStatus::Overdue));
}
