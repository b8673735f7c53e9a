//! rpkirtrd: an RPKI-to-Router cache server.
//!
//! RPKI, the Resource Public Key Infrastructure, is a distributed database
//! of signed statements by entities that participate in Internet routing.
//! A typical setup first collects and validates all statements into
//! something called a _local cache_ and distributes validated and
//! normalized information from the cache to the actual routers or route
//! servers. The standardized protocol for this distribution is the RPKI
//! to Router Protocol or RTR for short.
//!
//! This crate implements such a cache. It periodically ingests validated
//! ROA payload JSON from one or more upstream validators, maintains the
//! resulting set under monotonically increasing serial numbers, and serves
//! full and incremental synchronization to routers over TCP, built atop
//! [Tokio]. It speaks versions 1 and 2 of the protocol; router keys are
//! not served.
//!
//! You can read more about RPKI in [RFC 6480]. RTR is currently specified
//! in [RFC 8210].
//!
//! [Tokio]: https://crates.io/crates/tokio
//! [RFC 6480]: https://tools.ietf.org/html/rfc6480
//! [RFC 8210]: https://tools.ietf.org/html/rfc8210

pub mod config;
pub mod diff;
pub mod payload;
pub mod pdu;
pub mod refresh;
pub mod serial;
pub mod server;
pub mod store;
pub mod vrp;
