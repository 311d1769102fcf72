//! # Replis
//!
//! An in-memory key-value server that speaks RESP2.
//!
//! Replis stores strings with optional expiry and append-only streams,
//! supports MULTI/EXEC transactions and blocking stream reads, loads its
//! keyspace from an RDB snapshot on startup, and can run as a master or as
//! a replica that follows a master's write stream.

pub mod command;
pub mod config;
pub mod connection;
pub mod error;
pub mod keywatcher;
pub mod persistence;
pub mod replication;
pub mod resp;
pub mod server;
pub mod store;
pub mod types;
