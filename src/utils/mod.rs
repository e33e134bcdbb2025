//! Logging, text codecs and caching helpers.

pub mod base85;
pub mod cache;
pub mod log;
