//! Platform-specific directories and file protection.

pub mod paths;
pub mod readonly;
