pub mod advisory;
pub mod compactor;
pub mod engine;
pub mod export;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod sql;
pub mod tls;
pub mod wal;
pub mod wire;
