pub mod compactor;
pub mod config;
pub mod engine;
pub mod locks;
pub mod model;
pub mod observability;
pub mod store;
pub mod wal;
pub mod window;
