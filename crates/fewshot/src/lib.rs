//! Command-line tooling for the few-shot segmentor.
//!
//! The backend is chosen at compile time through cargo features; the commands themselves are
//! generic over it.

pub mod backend;
pub mod commands;

#[doc(inline)]
pub use backend::burn_backend_types;
