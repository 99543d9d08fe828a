pub mod endpoints;
pub mod error;
pub mod events;
pub mod normalize;
pub mod prompt;
pub mod receipts;

pub use error::{BriaError, Result};
pub use normalize::{normalize_response, Locator, Normalized, NormalizedResult};
