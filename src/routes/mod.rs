//! Route definitions for the LendCircle API

mod item;
mod loan;
mod notification;
mod offer;
mod reputation;
mod request;

pub use item::item_routes;
pub use loan::loan_routes;
pub use notification::notification_routes;
pub use offer::offer_routes;
pub use reputation::reputation_routes;
pub use request::request_routes;
