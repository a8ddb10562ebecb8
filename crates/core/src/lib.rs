//! # DHIS2 FHIR Adapter Core
//!
//! Rule-driven transformation of FHIR resources into DHIS2 tracker and aggregate entities.
//!
//! A [`transform::TransformerService`] selects the rules of an input resource's type, asks each
//! rule's transformer to resolve the target entity and lets the rule's scripts write it through
//! the scripted façade in [`scripted`]. Scripts reach the input graph through the utilities in
//! [`utils`].
//!
//! **No persistence or script runtime**: stores, remote FHIR access and the script sandbox are
//! interfaces in [`store`]; [`memory`] has in-memory implementations for local use.

pub mod cache;
pub mod client;
pub mod config;
pub mod constants;
pub mod context;
pub mod convert;
pub mod cursor;
pub mod error;
pub mod memory;
pub mod metadata;
pub mod script;
pub mod scripted;
pub mod store;
pub mod transform;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::CoreConfig;
pub use error::{ConversionError, ErrorKind, TransformerError, TransformerResult};
