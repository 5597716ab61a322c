//! Shared primitives for the Switchyard crates

pub mod error;

pub use error::HttpError;
