//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (/api/{service}/..., /ws/{service})
//!     → axum path extraction of {service}
//!     → table.rs (service → BackendRoute)
//!     → Return: matched BackendRoute or unknown service
//!
//! Route Compilation (at startup):
//!     ServiceConfig[]
//!     → Parse and check URLs
//!     → Freeze as immutable RouteTable
//! ```
//!
//! # Design Decisions
//! - Routes compiled at startup, immutable at runtime
//! - Deterministic: same service name always maps to the same backend

pub mod table;

pub use table::{BackendRoute, RouteError, RouteTable};
