//! Vendor wire formats
//!
//! Each module is a closed serde schema of one vendor API. Nothing outside
//! `convert` and `transformer` looks at these types.

pub mod anthropic;
pub mod openai;
pub mod openrouter;
