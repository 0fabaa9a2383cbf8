//! Trello callbacks relayed into Discord channels
//!
//! [`events`] parses callback bodies, [`dispatch`] decides which
//! subscriptions receive them and delivers, [`lifecycle`] keeps the Trello
//! side of each subscription in step with the database.

pub mod dispatch;
pub mod events;
pub mod lifecycle;
