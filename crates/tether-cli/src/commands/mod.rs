pub mod auth;
pub mod common;
pub mod queue;
pub mod status;
pub mod sync;
