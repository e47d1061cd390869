//! Configuration modules.

pub mod cache;
pub mod logging;
pub mod settings;
pub mod store;
pub mod traversal;

pub use cache::{CacheConfig, FrontRetention};
pub use logging::LoggingConfig;
pub use settings::{Config, IdentifierConfig};
pub use store::DatabaseConfig;
pub use traversal::TraversalConfig;
