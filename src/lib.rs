pub mod analysis;
pub mod chunk_plan;
pub mod cli;
pub mod config;
pub mod error;
pub mod frame;
pub mod images;
pub mod notify;
pub mod report;
pub mod session;
pub mod translate;
pub mod transport;
pub mod types;
pub mod util;

pub use error::{IngestError, Result};
