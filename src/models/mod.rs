//! Data models

pub mod auth;
pub mod session;
pub mod user;
