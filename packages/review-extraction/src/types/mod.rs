//! Data types shared by the pipeline and the batch layer.

pub mod check;
pub mod config;
pub mod document;
pub mod evidence;
pub mod result;
pub mod schema;
