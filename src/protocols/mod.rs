//! Protocol implementations
//!
//! This module contains the network protocol clients the copier drives.

pub mod smb;
