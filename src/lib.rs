//! # docproxy
//!
//! A RESP2 proxy in front of a document store.
//!
//! Clients speak a small Redis-style command set (GET, SET, MGET, MSET, DEL,
//! EXISTS and the EXPIRE family). Values are JSON documents; the backend is
//! their system of record. An optional in-process look-aside cache answers
//! repeated reads, including reads of keys known to be absent, without a
//! backend round trip.

pub mod backend;
pub mod codec;
pub mod command;
pub mod config;
pub mod connection;
pub mod error;
pub mod resp;
pub mod server;
pub mod store;
pub mod ttl;
