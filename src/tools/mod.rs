//! Typed argument structs for every external tool.
//!
//! Each struct implements `ToolArgs` and maps its fields to the exact
//! command line the tool expects.

pub mod boot;
pub mod disk;
pub mod encryption;
pub mod filesystem;
pub mod packages;
pub mod system;
