//! Read-only reports about the server.
//!
//! Traffic accounting is not collected; everything here comes from the
//! committed document, the supervisor, and the host.

pub mod info;
pub mod stats;

pub use info::SystemInfo;
pub use stats::Statistics;
