pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod geo;
pub mod models;
pub mod notify;
pub mod observability;
pub mod scheduler;
pub mod state;
pub mod store;
