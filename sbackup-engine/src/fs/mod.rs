//! Filesystem helpers.

pub mod metadata;
pub mod raw;
pub mod walker;
