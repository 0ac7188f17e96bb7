pub mod config;
pub mod coordination;
pub mod inspector;
pub mod runtime;
pub mod shared;
pub mod state;
pub mod store;
