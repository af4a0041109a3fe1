//! Configuration document subsystem.
//!
//! # Data Flow
//! ```text
//! live file bytes
//!     → model.rs (serde mirror of the xray JSON, unknown fields preserved)
//!     → edit.rs (pure Edit: current document → candidate document)
//!     → check_invariants (ports, identities, labels, at least one inbound)
//!     → handed to the reconciler for validation and commit
//! ```
//!
//! # Design Decisions
//! - Clients are never mutated in place; remove + add is the only update
//! - Identities are generated outside the edit so edits stay deterministic
//! - Outbounds and routing are opaque JSON values

pub mod edit;
pub mod model;

pub use edit::{
    sanitize_label, AddClient, AddInbound, Edit, RemoveClient, RemoveInbound, ReplaceDocument,
    SetTransport, TransportPatch,
};
pub use model::{
    ClientEntry, ConfigurationDocument, InboundDefinition, InboundProtocol, Network,
    ProtocolType, ProtocolVariant, Security,
};
