pub mod backup;
pub mod classes;
pub mod core;
pub mod essays;
pub mod identity;
pub mod setup;
