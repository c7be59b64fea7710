//! Request domain: models and service

mod model;
mod service;

pub use model::{
    CreateRequestRequest, ListRequestsQuery, Request, RequestStatus, UpdateRequestRequest,
};
pub use service::RequestService;
