//! rbvault: incremental RBD snapshot backups from live Ceph/Proxmox
//! clusters to a dedicated backup cluster.
//!
//! The library crate wires together the small member crates
//! (`rbvault-types`, `rbvault-config`, `rbvault-lock`, `rbvault-storage`,
//! `rbvault-cluster`) into the phases the `rbvault` binary dispatches:
//! backup (C5 Producer + C6 Consumer pool), the two expiration passes
//! (C7), and verification (C8), all reporting through one Status
//! Reporter (C9) and reconciling into the Results Store (C10).

pub mod consumer;
pub mod producer;
pub mod results;
pub mod runtime;
pub mod status;
pub mod verifier;
