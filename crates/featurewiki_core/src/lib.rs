pub mod annotate;
pub mod config;
pub mod error;
pub mod extract;
pub mod location;
pub mod page;
pub mod perform;
pub mod pipeline;
pub mod report;
pub mod tools;

pub use error::{Error, Result};
