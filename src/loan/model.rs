//! Loan models and data structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::concurrency::{self, TaggedEntity};

/// The single source of truth for "is this item currently lent".
///
/// Returns are negotiated: the borrower requests the return, the lender
/// confirms it (or the borrower cancels the request).
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Loan {
    pub id: Uuid,
    pub community_id: Uuid,
    pub item_id: Uuid,
    pub lender_user_id: Uuid,
    pub borrower_user_id: Uuid,
    pub request_id: Option<Uuid>,
    pub offer_id: Option<Uuid>,
    pub status: LoanStatus,
    pub start_at: DateTime<Utc>,
    pub due_at: Option<DateTime<Utc>>,
    pub returned_at: Option<DateTime<Utc>>,
    pub return_requested_at: Option<DateTime<Utc>>,
    pub return_confirmed_at: Option<DateTime<Utc>>,
}

impl Loan {
    /// A return is on time when both timestamps exist and the item came
    /// back no later than it was due.
    pub fn is_on_time_return(
        due_at: Option<DateTime<Utc>>,
        returned_at: Option<DateTime<Utc>>,
    ) -> bool {
        matches!((due_at, returned_at), (Some(due), Some(returned)) if returned <= due)
    }
}

/// Loan lifecycle status. Returned is terminal.
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "loan_status", rename_all = "lowercase")]
pub enum LoanStatus {
    Reserved,
    InLoan,
    ReturnRequested,
    Returned,
}

impl TaggedEntity for Loan {
    fn scalar_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("id", self.id.to_string()),
            ("community_id", self.community_id.to_string()),
            ("item_id", self.item_id.to_string()),
            ("lender_user_id", self.lender_user_id.to_string()),
            ("borrower_user_id", self.borrower_user_id.to_string()),
            ("request_id", concurrency::opt(&self.request_id)),
            ("offer_id", concurrency::opt(&self.offer_id)),
            ("status", (self.status as u8).to_string()),
            ("start_at", concurrency::timestamp(&self.start_at)),
            ("due_at", concurrency::opt_timestamp(&self.due_at)),
            ("returned_at", concurrency::opt_timestamp(&self.returned_at)),
            (
                "return_requested_at",
                concurrency::opt_timestamp(&self.return_requested_at),
            ),
            (
                "return_confirmed_at",
                concurrency::opt_timestamp(&self.return_confirmed_at),
            ),
        ]
    }
}

/// Request DTO for creating a loan directly (without an offer)
#[derive(Debug, Deserialize)]
pub struct CreateLoanRequest {
    pub item_id: Uuid,
    pub borrower_user_id: Uuid,
    pub request_id: Option<Uuid>,
    pub due_at: Option<DateTime<Utc>>,
}

/// Request DTO for updating a loan; only the schedule can change, and only
/// while the loan is Reserved.
#[derive(Debug, Deserialize)]
pub struct UpdateLoanRequest {
    pub start_at: Option<DateTime<Utc>>,
    pub due_at: Option<DateTime<Utc>>,
}

/// Query parameters for listing loans
#[derive(Debug, Deserialize)]
pub struct ListLoansQuery {
    pub community_id: Option<Uuid>,
    pub status: Option<LoanStatus>,
    pub borrower_user_id: Option<Uuid>,
    pub lender_user_id: Option<Uuid>,
    pub page: Option<i32>,
    pub limit: Option<i32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_on_time_return() {
        let due = Utc::now();
        assert!(Loan::is_on_time_return(
            Some(due),
            Some(due - Duration::hours(1))
        ));
        assert!(Loan::is_on_time_return(Some(due), Some(due)));
    }

    #[test]
    fn test_late_or_unscheduled_return_is_not_on_time() {
        let due = Utc::now();
        assert!(!Loan::is_on_time_return(
            Some(due),
            Some(due + Duration::hours(1))
        ));
        assert!(!Loan::is_on_time_return(None, Some(due)));
        assert!(!Loan::is_on_time_return(Some(due), None));
    }
}
