//! Seams between the deployer and the outside world
//!
//! The control plane, the external Ceph hosts, local tooling, the tag
//! registry and the wall clock all sit behind the traits in [`ports`], so
//! deployment phases run unchanged against fakes in tests.

pub mod ports;

pub use ports::*;
