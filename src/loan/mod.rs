//! Loan domain: models and service

mod model;
mod service;

pub use model::{CreateLoanRequest, ListLoansQuery, Loan, LoanStatus, UpdateLoanRequest};
pub use service::LoanService;
