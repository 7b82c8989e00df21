pub mod action_log;
pub mod inventory;
pub mod notification;
pub mod requests;
