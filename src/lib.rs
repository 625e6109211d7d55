//! swarden - an offline-first request caching agent.
//!
//! Every outgoing request passes through [`worker::Agent`], which serves it
//! cache-first or network-first, writes fresh responses back to a
//! generation-tagged store, and degrades to a substitute response when
//! neither source can answer.

pub mod background;
pub mod cache;
pub mod config;
pub mod degrade;
pub mod error;
pub mod http;
pub mod network;
pub mod notify;
pub mod worker;

#[cfg(test)]
mod testing;
