mod token;

pub use token::{DEFAULT_SECRET_PREFIX, GeneratedSecret, TokenGenerator};
