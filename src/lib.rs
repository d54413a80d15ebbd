pub mod cli;
pub mod config;
pub mod deadline;
pub mod engine;
pub mod error;
pub mod executor;
pub mod formats;
pub mod report;
pub mod resolver;
pub mod supervisor;
pub mod util;
pub mod worker;

pub use error::{BridgeError, ConversionError};
pub use executor::{ConversionRequest, Converted};
pub use worker::Worker;
