//! Classification pipeline: select, prompt, call with retry, validate,
//! sanitize, persist.

pub mod pipeline;
pub mod prompt;
pub mod retry;
pub mod validate;

pub use pipeline::{
    Classification, ClassifyOptions, ClassifyPipeline, ClassifyStats, Outcome, Pricing,
    DEFAULT_MODEL_NAME,
};
pub use retry::RetryPolicy;
pub use validate::LabelFields;
