pub mod models;
pub mod error;
pub mod query;
pub mod fetch;
pub mod resolve;
pub mod aggregate;
pub mod protocol;
pub mod summary;
pub mod explorer;
pub mod pipeline;

pub use error::FlowError;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
