pub mod cache;
pub mod config;
pub mod credentials;
pub mod error;
pub mod io;
pub mod layering;
pub mod paths;
pub mod pipeline;
pub mod runner;
pub mod supervisor;

#[cfg(test)]
pub(crate) mod testutil;

pub use error::{ProvisionError, Result};
