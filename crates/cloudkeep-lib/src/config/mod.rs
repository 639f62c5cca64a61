pub mod dynamic;
pub mod manager;
pub mod simplified;
