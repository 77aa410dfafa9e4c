//! Utility modules

pub mod socket;
pub mod time;
