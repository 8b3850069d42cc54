//! receivables-service: the club's accounts-receivable ledger engine.
//!
//! Tracks what members and city-ledger accounts owe, records payments and
//! credit notes against that debt, schedules installment arrangements, and
//! produces aging/statement views. Transport (REST/GraphQL) and auth are
//! external collaborators; persistence is reached through the store port in
//! [`store`].

pub mod models;
pub mod services;
pub mod store;
