//! LSF backend.
//!
//! Jobs are submitted through `bsub` and tracked through `bjobs`. Implicit
//! arrays are realized with a generated dispatch script, since LSF only
//! exposes the member index to the job.

mod adapter;
pub mod parser;
pub mod templates;

pub use adapter::{AUX_ARRAY_SIZE, LSF_BACKEND, LsfAdapter, LsfConfig, LsfExecutables};
pub use templates::BsubOption;
