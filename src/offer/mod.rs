//! Offer domain: models and service

mod model;
mod service;

pub use model::{
    AcceptOfferRequest, CreateOfferRequest, ListOffersQuery, Offer, OfferStatus,
    UpdateOfferRequest,
};
pub use service::OfferService;
