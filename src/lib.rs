pub mod api;
pub mod cli;
pub mod config;
pub mod controller;
pub mod fetch_gate;
pub mod notify;
pub mod pagination;
pub mod render;
pub mod storage;
pub mod table_event;
pub mod timestamp;

pub use api::{ApiError, ResourceApi};
pub use config::{AdminConfig, ConfigLoader, ConfigPaths};
pub use controller::{ListController, MutationOrchestrator};
