//! User notifications module

mod models;
mod optimistic;
mod store;

pub use models::{DataValue, NotificationRecord};
pub use store::{HydrateOutcome, NotificationStore, StoreSnapshot};
