//! Tether: Offline-First Mutation Synchronization
//!
//! An offline write-queue and synchronization engine for remote record
//! collections. Mutations issued while the remote service is unreachable are
//! queued durably, survive process restarts, and are drained in FIFO order
//! once connectivity returns; callers receive optimistic responses so they
//! never branch on connectivity.

pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod facade;
pub mod logging;
pub mod monitor;
pub mod remote;
pub mod store;
pub mod sync;
pub mod task;
pub mod types;
