pub mod config;
pub mod context;
pub mod domain;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod pagination;
pub mod plan;
pub mod repository;
pub mod services;
pub mod store;

pub use config::{Config, FeedConfig};
pub use context::{CancelHandle, RequestContext};
pub use error::{FeedError, FeedResult};
pub use services::{PostService, PublishPost};
pub use store::PostStore;
