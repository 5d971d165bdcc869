//! An educational ledger of signed transactions.
//!
//! Transactions are signed by their sender, committed per block by a Merkle root and
//! chained by proof-of-work. [`blockchain::Blockchain`] is the validated chain value,
//! [`blockchain::Ledger`] the single-writer service that owns it, and [`api`] exposes the
//! ledger over HTTP.

pub mod api;
pub mod blockchain;
pub mod config;
