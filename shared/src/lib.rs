pub mod adapters;
pub mod configuration;
pub mod core;
pub mod credentials;
pub mod error;
pub mod pipeline;
pub mod stats;
