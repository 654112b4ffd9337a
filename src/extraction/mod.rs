//! Extraction status tracking shared by extractors, caches and the service.

pub mod errors;
pub mod info;
pub mod status;

pub use errors::{ExtractionError, ExtractionResult};
pub use info::ExtractionInfo;
pub use status::ExtractionStatus;
