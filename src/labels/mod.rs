//! Label resolution.
//!
//! Raw labels from the data are mapped to class names through a catalog that
//! persists to an append-only table and asks a resolver about labels it has
//! not seen before.

pub mod catalog;
pub mod resolver;
pub mod store;

// Re-export commonly used types
pub use catalog::LabelCatalog;
pub use resolver::{AutoResolver, ChannelResolver, LabelRequest, LabelResolver, PromptResolver};
pub use store::{LabelStore, LabelStoreError};
