//! Cluster lease manager
//!
//! Keeps the bounded set of clusters leased from the deployer, moves each
//! lease through its lifecycle and persists every transition as a snapshot
//! so that a restarted process can clean up after itself.
//!
//! ```text
//!   DEPLOYING ──success──▶ RESERVED ──release──▶ UNRESERVING ──done──▶ (removed)
//!       │                     ▲  │
//!    failure                  │  └── extension failure ──▶ FAILED ──▶ UNRESERVING
//!       ▼                  AVAILABLE
//!   (removed)
//! ```

pub mod lease;
pub mod manager;

pub use lease::{ClusterLease, LeaseState};
pub use manager::{
    ClusterManager, RecoveryReport, ReserveReceiver, UnreserveReceiver, DEFAULT_MAX_CLUSTERS,
};
