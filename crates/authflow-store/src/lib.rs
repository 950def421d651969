//! SQLite persistence for interaction graphs.
//!
//! [`SqliteKv`] is the expiring key-value store the graph store writes its
//! existence and instance keys to. [`SqliteDatabase`] provides the savepoint
//! boundary the interaction service wraps each run in.

pub mod database;
pub mod kv;

pub use database::SqliteDatabase;
pub use kv::SqliteKv;
