//! ERC-4337 smart accounts driven from a personal signing key.
//!
//! [`SmartAccount`] resolves the counterfactual account address, builds and
//! signs EntryPoint v0.6/v0.7 UserOperations, negotiates paymaster
//! sponsorship and submits through a bundler. On chains with native account
//! abstraction it signs and broadcasts zkSync EIP-712 transactions instead.

pub mod account;
pub mod backend;
pub mod bundler;
pub mod chain;
pub mod config;
pub mod contracts;
pub mod eip712;
pub mod encoding;
pub mod error;
pub mod execution;
pub mod gas;
pub mod guard;
pub mod hasher;
pub mod paymaster;
pub mod permissions;
pub mod resolver;
pub mod signer;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use account::SmartAccount;
pub use chain::{ChainClient, Connector, HttpConnector};
pub use config::{AccountConfig, Erc20PaymasterConfig};
pub use error::{AccountError, ChainError, Result, RpcError, UsageError};
pub use execution::AccountVariant;
pub use guard::DeploymentState;
pub use permissions::{SessionKeyGrant, SignerPermissions};
pub use signer::PersonalSigner;
pub use transport::{HttpTransport, RpcTransport};
pub use types::{Call, EntryPointVersion, TransactionInput, UserOperationReceipt, VersionedUserOp};
