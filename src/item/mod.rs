//! Item domain: models and service

mod model;
mod service;

pub use model::{CreateItemRequest, Item, ItemStatus, ListItemsQuery, UpdateItemRequest};
pub use service::ItemService;
