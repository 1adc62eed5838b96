//! TwinSync Core - Domain logic and business rules
//!
//! This crate contains the hexagonal architecture core with:
//! - **Domain entities** - `RemoteItem`, `SyncPair`, `ChangeRecord`, `Action`, `SyncRun`
//! - **Port definitions** - Traits for adapters: `RemoteTree`, `StateStore`
//! - **Configuration** - Typed config with loading, defaults, and validation
//!
//! # Architecture
//!
//! This crate follows the hexagonal (ports & adapters) architecture pattern.
//! The domain module contains pure reconciliation logic with no external
//! dependencies. Ports define trait interfaces that adapter crates implement:
//! each remote storage provider is one `RemoteTree` implementation, and the
//! persistent pair table is one `StateStore` implementation.

pub mod config;
pub mod domain;
pub mod ports;
