//! Engine services for receivables-service.

pub mod aging;
pub mod arrangements;
pub mod credit_notes;
pub mod invoices;
pub mod metrics;
pub mod payments;

pub use aging::AgingService;
pub use arrangements::ArrangementService;
pub use credit_notes::CreditNoteService;
pub use invoices::InvoiceService;
pub use payments::PaymentService;
