//! Execution flows for the three ceremony types

pub mod intermediate;
pub mod key;
pub mod root;
