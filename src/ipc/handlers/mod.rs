pub mod completeness;
pub mod core;
pub mod data;
