pub mod fetcher;
pub mod validator;

pub use fetcher::{Fetcher, cleanup};
pub use validator::{Validation, ensure_allowed, validate};
