pub mod collab;
pub mod config;
pub mod errors;
pub mod events;
pub mod gates;
pub mod models;
pub mod pipeline;
pub mod rollback;
pub mod stats;

pub use pipeline::AutoFixPipeline;
