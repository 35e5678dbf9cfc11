//! examples of usage of RustedRetrieval
/// single-start, multi-start, config-driven and batch retrieval examples
pub mod retrieval_examples;
