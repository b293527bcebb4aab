//! Types library for the order feed
//!
//! Defines the already-decoded shape of exchange order updates. The feed
//! handler consumes these as opaque, validated values and never parses wire
//! bytes itself.
//!
//! # Version
//! v1.0.0
//!
//! # Modules
//! - `ids`: Compound order identity (`OrderKey`)
//! - `order`: Order update schema (`OrderUpdate`, `WireOrderUpdate`, `Side`, `UpdateKind`)
//! - `errors`: Decode-boundary error taxonomy

// Public modules
pub mod ids;
pub mod order;
pub mod errors;

// Library version constant
pub const LIB_VERSION: &str = "1.0.0";

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::ids::*;
    pub use crate::order::*;
    pub use crate::errors::*;
}
