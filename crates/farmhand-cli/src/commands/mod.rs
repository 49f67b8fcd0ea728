//! CLI command implementations.

pub mod common;
pub mod dag;
pub mod jobs;
pub mod shadow;
pub mod submit;
