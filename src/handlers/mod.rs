//! HTTP handlers for the generation routes.

pub mod generate;
pub use generate::*;
