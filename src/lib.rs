pub mod aggregate;
pub mod classify;
pub mod cli;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod history;
pub mod pipeline;
pub mod source;
