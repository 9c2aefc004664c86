//! Code synthesis service: turns a function name or a code prefix into Python
//! source by driving a local causal language model.

pub mod backend;
pub mod config;
pub mod engine;
pub mod errors;
pub mod extraction;
pub mod metrics;
pub mod model_catalog;
pub mod prompting;
pub mod serializer;
pub mod service;
pub mod transport;
