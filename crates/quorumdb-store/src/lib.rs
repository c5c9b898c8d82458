//! quorumdb-store: the on-disk encrypted credential store (C1).
//!
//! This is an external-collaborator component per the design doc — its
//! cryptographic choices are not part of the coordination layer's testable
//! surface — but it has to be real and exercised so the rest of the system
//! has something to call. `Store` is a tree of [`quorumdb_core::Group`] and
//! [`quorumdb_core::Entry`] persisted as an AES-256-GCM sealed blob, keyed
//! by an Argon2id-stretched master password (see [`crypto`]).

mod crypto;
mod store;

pub use store::Store;
