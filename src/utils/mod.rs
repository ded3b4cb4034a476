//! Utility functions and helpers

pub mod cursor;
pub mod uri;

pub use cursor::{DEFAULT_PAGE_SIZE, paginate};
pub use uri::{UriTemplate, is_template, percent_decode, percent_encode, validate_uri};
