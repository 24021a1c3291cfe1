pub mod config;
pub mod error;
pub mod types;

pub use config::{
    ClassifierConfig, CommunityConfig, Config, DatabaseConfig, FileConfig, IngestConfig, Provider,
    StaffConfig,
};
pub use error::ThreadwatchError;
pub use types::*;
