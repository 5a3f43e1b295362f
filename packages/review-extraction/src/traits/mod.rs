//! Core trait abstractions for the extraction engine.
//!
//! These traits are the seams applications implement to plug in a
//! generative model, usage accounting, or a whole per-document extractor.

pub mod extractor;
pub mod llm;
