//! Uniform capability set over the two cluster variants this tool
//! understands (C3, spec.md §4.3): a Proxmox VE virtualization host
//! with a VM inventory API, and a bare Ceph image pool. Grounded on
//! the teacher's `pbs-client` crate for the shape of an authenticated
//! JSON API client, reimplemented over `reqwest` because this adapter
//! speaks the Proxmox VE API-token dialect, not PBS's own ticket+CSRF
//! protocol (see DESIGN.md).

mod adapter;
mod plain;
mod proxmox;
mod unit;

pub use adapter::ClusterAdapter;
pub use plain::PlainAdapter;
pub use proxmox::ProxmoxAdapter;
pub use unit::{destination_for, ClusterUnit, VmDisk, VmUnit};
