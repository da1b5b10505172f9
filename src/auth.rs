//! Identifiers, scope sets, and the redacted secret wrapper shared by every component.

pub mod id;
pub mod scope;
pub mod secret;

pub use id::*;
pub use scope::*;
pub use secret::*;
