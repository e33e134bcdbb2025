//! Serialization primitives shared by the program image codecs.

pub mod encoding;
