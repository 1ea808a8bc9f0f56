//! Engine modules: the disk side of the installation.
//!
//! The engine turns a target disk and firmware mode into an ordered storage
//! plan, applies it, and names the partitions it produced.

pub mod naming;
pub mod storage;
