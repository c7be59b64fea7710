//! Application state shared across handlers

use std::sync::Arc;

use axum::extract::FromRef;

use crate::item::ItemService;
use crate::loan::LoanService;
use crate::middleware::AuthVerifier;
use crate::notification::NotificationService;
use crate::offer::OfferService;
use crate::reputation::ReputationService;
use crate::request::RequestService;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub item_service: Arc<ItemService>,
    pub request_service: Arc<RequestService>,
    pub offer_service: Arc<OfferService>,
    pub loan_service: Arc<LoanService>,
    pub notification_service: Arc<NotificationService>,
    pub reputation_service: Arc<ReputationService>,
    pub auth_verifier: Arc<AuthVerifier>,
}

impl AppState {
    pub fn new(
        item_service: Arc<ItemService>,
        request_service: Arc<RequestService>,
        offer_service: Arc<OfferService>,
        loan_service: Arc<LoanService>,
        notification_service: Arc<NotificationService>,
        reputation_service: Arc<ReputationService>,
        auth_verifier: Arc<AuthVerifier>,
    ) -> Self {
        Self {
            item_service,
            request_service,
            offer_service,
            loan_service,
            notification_service,
            reputation_service,
            auth_verifier,
        }
    }
}

impl FromRef<AppState> for Arc<AuthVerifier> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.auth_verifier.clone()
    }
}

impl FromRef<AppState> for Arc<ItemService> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.item_service.clone()
    }
}

impl FromRef<AppState> for Arc<OfferService> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.offer_service.clone()
    }
}

impl FromRef<AppState> for Arc<LoanService> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.loan_service.clone()
    }
}
