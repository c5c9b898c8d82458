//! quorumdb-rpc: mutual-TLS request/response and one-way RPC transport (C4).
//!
//! Every call — request/response or one-way — travels as one
//! length-prefixed, JSON-encoded [`envelope::Envelope`] over a
//! `tokio-rustls` stream. [`daemon::Daemon`] serves inbound calls;
//! [`proxy::Proxy`] makes outbound ones with a bounded connect timeout.
//! Framing and the envelope shape are internal to this crate.

mod channel;
mod daemon;
mod envelope;
mod proxy;
mod tls;

pub use daemon::{Daemon, Handler};
pub use envelope::Envelope;
pub use proxy::{Proxy, ProxyHandle};
pub use tls::{common_name_of, TlsMaterial};
