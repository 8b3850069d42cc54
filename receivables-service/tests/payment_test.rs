//! Payment and allocation engine tests: explicit allocations, FIFO
//! settlement, credit-balance remainders, and serialization under
//! concurrent settlement.

mod common;

use common::{today, TestApp};
use ledger_core::LedgerError;
use receivables_service::models::{
    AllocationRequest, InvoiceStatus, PaymentMethod, RecordPayment,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

#[tokio::test]
async fn record_full_payment_marks_invoice_paid() {
    let app = TestApp::new();
    let account = app.member_account("Full Payer").await;
    let invoice = app.open_invoice(&account, dec!(200), 30).await;

    let (payment, allocations) = app
        .payments
        .record_payment(
            app.tenant_id,
            RecordPayment {
                account_id: account.account_id,
                amount: dec!(200),
                method: PaymentMethod::BankTransfer,
                payment_date: today(),
                reference: Some("wire 991".to_string()),
                allocations: vec![AllocationRequest {
                    invoice_id: invoice.invoice_id,
                    amount: dec!(200),
                }],
            },
        )
        .await
        .expect("Failed to record payment");

    assert_eq!(allocations.len(), 1);
    assert_eq!(allocations[0].amount, dec!(200.00));
    assert!(payment.receipt_number.starts_with("RCT-"));

    let reloaded = app
        .payments
        .get_payment(app.tenant_id, payment.payment_id)
        .await
        .expect("Failed to reload payment");
    assert_eq!(reloaded.receipt_number, payment.receipt_number);
    assert_eq!(reloaded.amount, dec!(200.00));

    let settled = app.invoice(invoice.invoice_id).await;
    assert_eq!(settled.status, InvoiceStatus::Paid);
    assert_eq!(settled.paid_amount, dec!(200.00));
    assert_eq!(settled.balance_due, Decimal::ZERO);
}

#[tokio::test]
async fn partial_payment_marks_invoice_partially_paid() {
    let app = TestApp::new();
    let account = app.member_account("Partial Payer").await;
    let invoice = app.open_invoice(&account, dec!(200), 30).await;

    app.payments
        .record_payment(
            app.tenant_id,
            RecordPayment {
                account_id: account.account_id,
                amount: dec!(75),
                method: PaymentMethod::Cash,
                payment_date: today(),
                reference: None,
                allocations: vec![AllocationRequest {
                    invoice_id: invoice.invoice_id,
                    amount: dec!(75),
                }],
            },
        )
        .await
        .expect("Failed to record payment");

    let partial = app.invoice(invoice.invoice_id).await;
    assert_eq!(partial.status, InvoiceStatus::PartiallyPaid);
    assert_eq!(partial.paid_amount, dec!(75.00));
    assert_eq!(partial.balance_due, dec!(125.00));
}

#[tokio::test]
async fn unallocated_remainder_credits_the_account() {
    let app = TestApp::new();
    let account = app.member_account("Overpayer").await;
    let invoice = app.open_invoice(&account, dec!(60), 30).await;

    app.payments
        .record_payment(
            app.tenant_id,
            RecordPayment {
                account_id: account.account_id,
                amount: dec!(100),
                method: PaymentMethod::Cheque,
                payment_date: today(),
                reference: None,
                allocations: vec![AllocationRequest {
                    invoice_id: invoice.invoice_id,
                    amount: dec!(60),
                }],
            },
        )
        .await
        .expect("Failed to record payment");

    let account = app.account(account.account_id).await;
    assert_eq!(account.credit_balance, dec!(40.00));
}

#[tokio::test]
async fn allocation_beyond_invoice_balance_fails_without_writes() {
    let app = TestApp::new();
    let account = app.member_account("Greedy Allocator").await;
    let invoice = app.open_invoice(&account, dec!(50), 30).await;

    let result = app
        .payments
        .record_payment(
            app.tenant_id,
            RecordPayment {
                account_id: account.account_id,
                amount: dec!(80),
                method: PaymentMethod::Card,
                payment_date: today(),
                reference: None,
                allocations: vec![AllocationRequest {
                    invoice_id: invoice.invoice_id,
                    amount: dec!(80),
                }],
            },
        )
        .await;

    match result {
        Err(LedgerError::OverAllocation { max_allowed, .. }) => {
            assert_eq!(max_allowed, dec!(50.00));
        }
        other => panic!("Expected OverAllocation, got {:?}", other.map(|_| ())),
    }

    // The whole transaction rolled back: no balance change, no credit.
    let untouched = app.invoice(invoice.invoice_id).await;
    assert_eq!(untouched.balance_due, dec!(50.00));
    assert_eq!(untouched.paid_amount, Decimal::ZERO);
    let account = app.account(account.account_id).await;
    assert_eq!(account.credit_balance, Decimal::ZERO);
}

#[tokio::test]
async fn allocations_exceeding_payment_amount_fail() {
    let app = TestApp::new();
    let account = app.member_account("Split Allocator").await;
    let first = app.open_invoice(&account, dec!(50), 10).await;
    let second = app.open_invoice(&account, dec!(50), 20).await;

    let result = app
        .payments
        .record_payment(
            app.tenant_id,
            RecordPayment {
                account_id: account.account_id,
                amount: dec!(80),
                method: PaymentMethod::Card,
                payment_date: today(),
                reference: None,
                allocations: vec![
                    AllocationRequest {
                        invoice_id: first.invoice_id,
                        amount: dec!(50),
                    },
                    AllocationRequest {
                        invoice_id: second.invoice_id,
                        amount: dec!(50),
                    },
                ],
            },
        )
        .await;

    assert!(matches!(result, Err(LedgerError::OverAllocation { .. })));
}

#[tokio::test]
async fn allocating_to_a_draft_invoice_fails() {
    let app = TestApp::new();
    let account = app.member_account("Draft Allocator").await;
    let (draft, _) = app
        .invoices
        .create_invoice(
            app.tenant_id,
            receivables_service::models::CreateInvoice {
                account_id: account.account_id,
                invoice_date: today(),
                due_date: today(),
                discount_amount: Decimal::ZERO,
                notes: None,
                line_items: vec![common::line("Dues", dec!(1), dec!(30))],
            },
        )
        .await
        .expect("Failed to create invoice");

    let result = app
        .payments
        .record_payment(
            app.tenant_id,
            RecordPayment {
                account_id: account.account_id,
                amount: dec!(30),
                method: PaymentMethod::Cash,
                payment_date: today(),
                reference: None,
                allocations: vec![AllocationRequest {
                    invoice_id: draft.invoice_id,
                    amount: dec!(30),
                }],
            },
        )
        .await;

    assert!(matches!(result, Err(LedgerError::InvalidState { .. })));
}

#[tokio::test]
async fn fifo_settles_oldest_invoice_first() {
    let app = TestApp::new();
    let account = app.member_account("FIFO Member").await;
    // Inv-A due earlier, Inv-B later.
    let inv_a = app.open_invoice(&account, dec!(100), 5).await;
    let inv_b = app.open_invoice(&account, dec!(150), 25).await;

    let (_, allocations) = app
        .payments
        .settle_fifo(
            app.tenant_id,
            account.account_id,
            dec!(120),
            PaymentMethod::BankTransfer,
            today(),
            true,
        )
        .await
        .expect("Failed to settle FIFO");

    assert_eq!(allocations.len(), 2);
    assert_eq!(allocations[0].invoice_id, inv_a.invoice_id);
    assert_eq!(allocations[0].amount, dec!(100.00));
    assert_eq!(allocations[1].invoice_id, inv_b.invoice_id);
    assert_eq!(allocations[1].amount, dec!(20.00));

    let settled_a = app.invoice(inv_a.invoice_id).await;
    assert_eq!(settled_a.balance_due, Decimal::ZERO);
    assert_eq!(settled_a.status, InvoiceStatus::Paid);

    let partial_b = app.invoice(inv_b.invoice_id).await;
    assert_eq!(partial_b.balance_due, dec!(130.00));
    assert_eq!(partial_b.status, InvoiceStatus::PartiallyPaid);

    // Nothing left over to credit.
    let account = app.account(account.account_id).await;
    assert_eq!(account.credit_balance, Decimal::ZERO);
}

#[tokio::test]
async fn fifo_ties_on_due_date_break_by_invoice_number() {
    let app = TestApp::new();
    let account = app.member_account("Tie Member").await;
    let first = app.open_invoice(&account, dec!(40), 10).await;
    let second = app.open_invoice(&account, dec!(40), 10).await;
    assert!(first.invoice_number < second.invoice_number);

    let (_, allocations) = app
        .payments
        .settle_fifo(
            app.tenant_id,
            account.account_id,
            dec!(50),
            PaymentMethod::Cash,
            today(),
            true,
        )
        .await
        .expect("Failed to settle FIFO");

    assert_eq!(allocations[0].invoice_id, first.invoice_id);
    assert_eq!(allocations[0].amount, dec!(40.00));
    assert_eq!(allocations[1].invoice_id, second.invoice_id);
    assert_eq!(allocations[1].amount, dec!(10.00));
}

#[tokio::test]
async fn settle_without_fifo_credits_everything() {
    let app = TestApp::new();
    let account = app.member_account("Prepay Member").await;
    let invoice = app.open_invoice(&account, dec!(100), 30).await;

    let (_, allocations) = app
        .payments
        .settle_fifo(
            app.tenant_id,
            account.account_id,
            dec!(100),
            PaymentMethod::DirectDebit,
            today(),
            false,
        )
        .await
        .expect("Failed to record prepayment");

    assert!(allocations.is_empty());
    let untouched = app.invoice(invoice.invoice_id).await;
    assert_eq!(untouched.balance_due, dec!(100.00));
    let account = app.account(account.account_id).await;
    assert_eq!(account.credit_balance, dec!(100.00));
}

#[tokio::test]
async fn fifo_leftover_after_all_invoices_credits_account() {
    let app = TestApp::new();
    let account = app.member_account("Leftover Member").await;
    app.open_invoice(&account, dec!(70), 10).await;

    app.payments
        .settle_fifo(
            app.tenant_id,
            account.account_id,
            dec!(100),
            PaymentMethod::Card,
            today(),
            true,
        )
        .await
        .expect("Failed to settle FIFO");

    let account = app.account(account.account_id).await;
    assert_eq!(account.credit_balance, dec!(30.00));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_fifo_settlements_never_over_allocate() {
    let app = TestApp::new();
    let account = app.member_account("Racing Member").await;
    let invoice = app.open_invoice(&account, dec!(100), 30).await;

    let first = app.payments.settle_fifo(
        app.tenant_id,
        account.account_id,
        dec!(80),
        PaymentMethod::Card,
        today(),
        true,
    );
    let second = app.payments.settle_fifo(
        app.tenant_id,
        account.account_id,
        dec!(80),
        PaymentMethod::Card,
        today(),
        true,
    );
    let (first, second) = tokio::join!(first, second);
    let (_, alloc_a) = first.expect("First settlement failed");
    let (_, alloc_b) = second.expect("Second settlement failed");

    let allocated: Decimal = alloc_a
        .iter()
        .chain(alloc_b.iter())
        .map(|a| a.amount)
        .sum();
    assert_eq!(allocated, dec!(100.00), "allocations must never exceed the balance");

    let settled = app.invoice(invoice.invoice_id).await;
    assert_eq!(settled.balance_due, Decimal::ZERO);
    assert_eq!(settled.paid_amount, dec!(100.00));
    assert_eq!(settled.status, InvoiceStatus::Paid);

    // The 60 that found no invoice became account credit.
    let account = app.account(account.account_id).await;
    assert_eq!(account.credit_balance, dec!(60.00));
}
