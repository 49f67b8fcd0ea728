//! API endpoint handlers.

pub mod health;
pub mod processes;
pub mod tasks;
