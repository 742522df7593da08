//! Panel - data-source layer of a generic admin panel
//!
//! Connects to user-configured SQL databases (PostgreSQL, MySQL, MariaDB,
//! SQL Server), introspects their schema and runs filtered CRUD operations
//! through a small per-data-source connection pool.

pub mod admin;
pub mod client;
pub mod config;
pub mod credentials;
pub mod crypto;
pub mod dialect;
pub mod entity;
pub mod executor;
pub mod filter;
pub mod pool;
pub mod query;
pub mod schema;
pub mod service;

#[cfg(test)]
pub(crate) mod testing;
