pub mod config;
pub mod daemon;
pub mod focus;
pub mod helpers;
pub mod history;
pub mod session;
pub mod status;
