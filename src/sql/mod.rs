//! SQL text generation: identifiers from mappings only, values always as `?` parameters.

mod builder;
pub mod params;
pub use builder::*;
pub use params::*;
