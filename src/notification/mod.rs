//! Notifications: rule table, watermark-driven dispatcher and read surface

mod dispatcher;
mod model;
mod rules;
mod service;

pub use dispatcher::NotificationDispatcher;
pub use model::{
    DispatchState, ListNotificationsQuery, MarkReadRequest, Notification, NotificationKind,
    NotificationStatus, PagedNotifications,
};
pub use rules::NotificationRuleTable;
pub use service::NotificationService;
