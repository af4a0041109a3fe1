//! xray configuration manager.
//!
//! Owns the xray JSON configuration on a single host: every change is
//! validated by `xray -test`, committed by rename, confirmed by a readiness
//! probe after a service reload, and rolled back to the previous file when
//! the service does not come up.
//!
//! ```text
//!   CLI / outer request layer
//!            │
//!            ▼
//!   ┌──────────────────────────────────────────────────────────────┐
//!   │ Manager                                                      │
//!   │   profiles ──► registry (projection of committed document)   │
//!   │   create/delete/transport/restore ──► Reconciler::apply      │
//!   │                                         │                    │
//!   │      validator (xray -test) ◄───────────┤                    │
//!   │      snapshots (rollback history) ◄─────┤                    │
//!   │      live file (rename-over-write) ◄────┤                    │
//!   │      service controller (systemd) ◄─────┘ reload + readiness │
//!   └──────────────────────────────────────────────────────────────┘
//! ```

// Core
pub mod document;
pub mod error;
pub mod reconcile;
pub mod service;

// Projections and operator surfaces
pub mod backup;
pub mod manager;
pub mod profiles;
pub mod system;

// Cross-cutting concerns
pub mod config;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::ManagerConfig;
pub use error::{ManagerError, ManagerResult};
pub use manager::Manager;
pub use reconcile::Reconciler;
