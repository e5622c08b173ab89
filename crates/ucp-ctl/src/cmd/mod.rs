//! CLI command modules.

pub mod keygen;
pub mod recv;
pub mod send;
pub mod session;
