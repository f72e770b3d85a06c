//! Save web articles per account and deliver them to an e-reader by email.

pub mod config;
pub mod content;
pub mod db;
pub mod delivery;
pub mod document;
pub mod email;
pub mod error;
pub mod models;
pub mod service;

pub use config::{Config, StoreConfig};
pub use db::{ArticleStore, InMemoryStore, Repository};
pub use error::{AppError, Result};
pub use models::{Article, DeliveryStatus, Page};
pub use service::ArticleService;
