/// CRD schema types for the `core.stateless-pg.io` API group
pub mod api;

/// Reconciler loops, one per primary kind
pub mod controllers;

/// Control-plane companion server, service facts and JWT issuing
pub mod control_plane;

/// Errors, input hash, metadata helpers, metrics, conditions, telemetry
pub mod util;

pub use util::errors::{Error, Result};

#[cfg(test)]
mod tests;
