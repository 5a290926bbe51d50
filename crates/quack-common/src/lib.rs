pub mod error;
pub mod github;
pub mod model;
pub mod quack_api;
pub mod redis;
pub mod store;
