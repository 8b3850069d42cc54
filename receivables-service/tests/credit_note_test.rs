//! Credit note engine tests: numbering, approval flow, application to
//! balance and invoices, refunds, and void guards.

mod common;

use common::{today, TestApp};
use ledger_core::LedgerError;
use receivables_service::models::{
    ArAccount, CreateCreditNote, CreateCreditNoteLine, CreditNote, CreditNoteKind,
    CreditNoteStatus, InvoiceStatus, PaymentMethod,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

fn credit_line(description: &str, quantity: Decimal, unit_price: Decimal) -> CreateCreditNoteLine {
    CreateCreditNoteLine {
        description: description.to_string(),
        quantity,
        unit_price,
        taxable: false,
        tax_rate: Decimal::ZERO,
    }
}

async fn pending_note(app: &TestApp, account: &ArAccount, amount: Decimal) -> CreditNote {
    let (note, _) = app
        .credit_notes
        .create_credit_note(
            app.tenant_id,
            CreateCreditNote {
                account_id: account.account_id,
                kind: CreditNoteKind::Adjustment,
                reason: "billing adjustment".to_string(),
                line_items: vec![credit_line("Adjustment", dec!(1), amount)],
            },
        )
        .await
        .expect("Failed to create credit note");
    note
}

async fn approved_note(app: &TestApp, account: &ArAccount, amount: Decimal) -> CreditNote {
    let note = pending_note(app, account, amount).await;
    app.credit_notes
        .approve_credit_note(app.tenant_id, note.credit_note_id, "treasurer")
        .await
        .expect("Failed to approve credit note")
}

#[tokio::test]
async fn credit_note_numbers_are_sequential_and_yearly() {
    let app = TestApp::new();
    let account = app.member_account("CN Sequence Member").await;

    let first = pending_note(&app, &account, dec!(10)).await;
    let second = pending_note(&app, &account, dec!(20)).await;

    let year = today().format("%Y").to_string();
    assert_eq!(first.credit_note_number, format!("CN-{}-000001", year));
    assert_eq!(second.credit_note_number, format!("CN-{}-000002", year));
    assert_eq!(first.status, CreditNoteStatus::PendingApproval);
}

#[tokio::test]
async fn voided_note_numbers_are_never_reused() {
    let app = TestApp::new();
    let account = app.member_account("CN Reuse Member").await;

    let first = pending_note(&app, &account, dec!(10)).await;
    app.credit_notes
        .void_credit_note(app.tenant_id, first.credit_note_id, "entered twice")
        .await
        .expect("Failed to void credit note");

    let second = pending_note(&app, &account, dec!(10)).await;
    let year = today().format("%Y").to_string();
    assert_eq!(second.credit_note_number, format!("CN-{}-000002", year));
}

#[tokio::test]
async fn taxable_lines_accrue_tax() {
    let app = TestApp::new();
    let account = app.member_account("CN Tax Member").await;

    let (note, items) = app
        .credit_notes
        .create_credit_note(
            app.tenant_id,
            CreateCreditNote {
                account_id: account.account_id,
                kind: CreditNoteKind::Refund,
                reason: "overcharged tax".to_string(),
                line_items: vec![CreateCreditNoteLine {
                    description: "Dining refund".to_string(),
                    quantity: dec!(2),
                    unit_price: dec!(45),
                    taxable: true,
                    tax_rate: dec!(10),
                }],
            },
        )
        .await
        .expect("Failed to create credit note");

    assert_eq!(note.subtotal, dec!(90.00));
    assert_eq!(note.tax_amount, dec!(9.00));
    assert_eq!(note.total_amount, dec!(99.00));
    assert_eq!(items[0].tax_amount, dec!(9.00));
}

#[tokio::test]
async fn approving_twice_fails() {
    let app = TestApp::new();
    let account = app.member_account("CN Approve Member").await;
    let note = approved_note(&app, &account, dec!(50)).await;
    assert_eq!(note.status, CreditNoteStatus::Approved);
    assert_eq!(note.approved_by.as_deref(), Some("treasurer"));

    let result = app
        .credit_notes
        .approve_credit_note(app.tenant_id, note.credit_note_id, "treasurer")
        .await;
    assert!(matches!(result, Err(LedgerError::InvalidState { .. })));
}

#[tokio::test]
async fn applying_an_unapproved_note_fails() {
    let app = TestApp::new();
    let account = app.member_account("CN Pending Member").await;
    let note = pending_note(&app, &account, dec!(50)).await;

    let result = app
        .credit_notes
        .apply_to_balance(app.tenant_id, note.credit_note_id)
        .await;
    assert!(matches!(result, Err(LedgerError::InvalidState { .. })));
}

#[tokio::test]
async fn apply_to_balance_credits_the_account_in_full() {
    let app = TestApp::new();
    let account = app.member_account("CN Balance Member").await;
    let note = approved_note(&app, &account, dec!(120)).await;

    let applied = app
        .credit_notes
        .apply_to_balance(app.tenant_id, note.credit_note_id)
        .await
        .expect("Failed to apply credit note");

    assert_eq!(applied.status, CreditNoteStatus::Applied);
    assert_eq!(applied.applied_to_balance, dec!(120.00));
    let account = app.account(account.account_id).await;
    assert_eq!(account.credit_balance, dec!(120.00));
}

#[tokio::test]
async fn apply_to_invoice_mirrors_a_payment() {
    let app = TestApp::new();
    let account = app.member_account("CN Invoice Member").await;
    let invoice = app.open_invoice(&account, dec!(100), 30).await;
    let note = approved_note(&app, &account, dec!(40)).await;

    let (note, application, invoice) = app
        .credit_notes
        .apply_to_invoice(app.tenant_id, note.credit_note_id, invoice.invoice_id, dec!(40))
        .await
        .expect("Failed to apply credit note to invoice");

    assert_eq!(note.status, CreditNoteStatus::Applied);
    assert_eq!(application.amount, dec!(40.00));
    assert_eq!(invoice.balance_due, dec!(60.00));
    assert_eq!(invoice.paid_amount, dec!(40.00));
    assert_eq!(invoice.status, InvoiceStatus::PartiallyPaid);
}

#[tokio::test]
async fn partial_application_leaves_note_partially_applied() {
    let app = TestApp::new();
    let account = app.member_account("CN Partial Member").await;
    let invoice = app.open_invoice(&account, dec!(100), 30).await;
    let note = approved_note(&app, &account, dec!(80)).await;

    let (note, _, _) = app
        .credit_notes
        .apply_to_invoice(app.tenant_id, note.credit_note_id, invoice.invoice_id, dec!(30))
        .await
        .expect("Failed to apply credit note to invoice");

    assert_eq!(note.status, CreditNoteStatus::PartiallyApplied);
    assert_eq!(note.remaining(), dec!(50.00));
}

#[tokio::test]
async fn over_application_fails_and_mutates_nothing() {
    let app = TestApp::new();
    let account = app.member_account("CN Greedy Member").await;
    let invoice = app.open_invoice(&account, dec!(100), 30).await;
    let note = approved_note(&app, &account, dec!(80)).await;

    // Burn 30 of the note so only 50 remains.
    app.credit_notes
        .apply_to_invoice(app.tenant_id, note.credit_note_id, invoice.invoice_id, dec!(30))
        .await
        .expect("Failed to apply credit note to invoice");

    let result = app
        .credit_notes
        .apply_to_invoice(app.tenant_id, note.credit_note_id, invoice.invoice_id, dec!(60))
        .await;

    match result {
        Err(LedgerError::OverAllocation {
            requested,
            max_allowed,
            ..
        }) => {
            assert_eq!(requested, dec!(60.00));
            assert_eq!(max_allowed, dec!(50.00));
        }
        other => panic!("Expected OverAllocation, got {:?}", other.map(|_| ())),
    }

    // Both entities kept their pre-call state.
    let note = app
        .credit_notes
        .get_credit_note(app.tenant_id, note.credit_note_id)
        .await
        .expect("Failed to reload credit note")
        .0;
    assert_eq!(note.applied_to_balance, dec!(30.00));
    assert_eq!(note.status, CreditNoteStatus::PartiallyApplied);
    let invoice = app.invoice(invoice.invoice_id).await;
    assert_eq!(invoice.balance_due, dec!(70.00));
}

#[tokio::test]
async fn application_is_capped_by_invoice_balance() {
    let app = TestApp::new();
    let account = app.member_account("CN Cap Member").await;
    let invoice = app.open_invoice(&account, dec!(25), 30).await;
    let note = approved_note(&app, &account, dec!(80)).await;

    let result = app
        .credit_notes
        .apply_to_invoice(app.tenant_id, note.credit_note_id, invoice.invoice_id, dec!(40))
        .await;

    match result {
        Err(LedgerError::OverAllocation { max_allowed, .. }) => {
            assert_eq!(max_allowed, dec!(25.00));
        }
        other => panic!("Expected OverAllocation, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn refund_consumes_remaining_credit() {
    let app = TestApp::new();
    let account = app.member_account("CN Refund Member").await;
    let note = approved_note(&app, &account, dec!(90)).await;

    let refunded = app
        .credit_notes
        .refund_credit_note(
            app.tenant_id,
            note.credit_note_id,
            dec!(90),
            PaymentMethod::BankTransfer,
        )
        .await
        .expect("Failed to refund credit note");

    assert_eq!(refunded.status, CreditNoteStatus::Refunded);
    assert_eq!(refunded.refunded_amount, dec!(90.00));
    assert_eq!(refunded.remaining(), Decimal::ZERO);
}

#[tokio::test]
async fn voiding_an_applied_note_fails() {
    let app = TestApp::new();
    let account = app.member_account("CN Void Member").await;
    let note = approved_note(&app, &account, dec!(50)).await;
    app.credit_notes
        .apply_to_balance(app.tenant_id, note.credit_note_id)
        .await
        .expect("Failed to apply credit note");

    let result = app
        .credit_notes
        .void_credit_note(app.tenant_id, note.credit_note_id, "changed our minds")
        .await;
    assert!(matches!(result, Err(LedgerError::InvalidState { .. })));
}

#[tokio::test]
async fn unknown_credit_note_is_not_found() {
    let app = TestApp::new();

    let result = app
        .credit_notes
        .apply_to_balance(app.tenant_id, Uuid::new_v4())
        .await;
    assert!(matches!(result, Err(LedgerError::NotFound { .. })));
}
