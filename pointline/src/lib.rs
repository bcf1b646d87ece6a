pub mod api;
pub mod config;
pub mod decoder;
pub mod disposition;
pub mod handler;
pub mod point;
pub mod preprocessor;
pub mod prometheus;
pub mod server;
pub mod sinks;
pub mod time;
