//! Profile projection subsystem.
//!
//! # Data Flow
//! ```text
//! Reconciler::document() (committed, lock-free)
//!     → registry.rs projects each ClientEntry with its InboundDefinition
//!     → link.rs builds the connection string
//!     → code.rs renders it as a QR code on request
//!
//! First link request:
//!     address.rs resolves the public address once (config or HTTP lookup)
//! ```
//!
//! # Design Decisions
//! - Views are recomputed on every call; there is nothing to invalidate
//! - Links are pure functions of document + LinkSettings

pub mod address;
pub mod code;
pub mod link;
pub mod registry;

pub use address::AddressError;
pub use code::{CodeError, CodeFormat};
pub use link::LinkSettings;
pub use registry::{ProfileRegistry, ProfileView};
