pub mod classify;
pub mod filter;
pub mod ingest;
pub mod run_log;
pub mod source;
pub mod staff;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod traits;
