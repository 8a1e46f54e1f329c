//! Ledger ports and the Orca Whirlpool adapter.
//!
//! The [`ledger`] module defines the read, write and trigger interfaces the
//! keeper is written against. The [`orca`] module implements them for a
//! single Whirlpool and owner keypair on top of [`rpc::RpcProvider`].

/// Ledger ports used by the keeper.
pub mod ledger;
/// Orca Whirlpools adapter.
pub mod orca;
/// Prelude module for convenient imports.
pub mod prelude;
/// Solana RPC and websocket access.
pub mod rpc;
