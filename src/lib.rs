pub mod auth;
pub mod bigquery_client;
pub mod catalog;
pub mod classifier;
pub mod config;
pub mod domain;
pub mod erd;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod prompt;
pub mod schema_loader;
pub mod schema_store;
pub mod storage;

pub use config::AssistantConfig;
pub use error::AssistantError;
pub use pipeline::QueryPipeline;
pub use schema_loader::SchemaLoader;
pub use schema_store::SchemaStore;
