//! Solana RPC access.

/// Slot subscription over the websocket endpoint.
pub mod pubsub;

pub use pubsub::SlotFeed;

use crate::ledger::LedgerError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use solana_client::client_error::{ClientError, ClientErrorKind};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_request::TokenAccountsFilter;
use solana_commitment_config::CommitmentConfig;
use solana_sdk::instruction::Instruction;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature};
use solana_sdk::transaction::Transaction;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// `getMultipleAccounts` accepts at most this many keys per call.
const MAX_MULTIPLE_ACCOUNTS: usize = 100;

/// RPC endpoint configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcConfig {
    /// HTTP JSON-RPC endpoint.
    pub url: String,
    /// Websocket endpoint for subscriptions.
    pub ws_url: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: "https://api.mainnet-beta.solana.com".to_string(),
            ws_url: "wss://api.mainnet-beta.solana.com".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Owner program and raw data of an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSnapshot {
    pub owner: Pubkey,
    pub data: Vec<u8>,
}

/// Thin wrapper over the nonblocking RPC client at `confirmed` commitment.
pub struct RpcProvider {
    client: RpcClient,
    config: RpcConfig,
}

impl RpcProvider {
    pub fn new(config: RpcConfig) -> Self {
        let client = RpcClient::new_with_timeout_and_commitment(
            config.url.clone(),
            Duration::from_secs(config.timeout_secs),
            CommitmentConfig::confirmed(),
        );
        Self { client, config }
    }

    pub fn config(&self) -> &RpcConfig {
        &self.config
    }

    /// Fetches an account. A missing account is `Ok(None)`.
    pub async fn get_account(
        &self,
        address: &Pubkey,
    ) -> Result<Option<AccountSnapshot>, LedgerError> {
        let response = self
            .client
            .get_account_with_commitment(address, CommitmentConfig::confirmed())
            .await
            .map_err(|e| LedgerError::Rpc(format!("get_account {address}: {e}")))?;
        Ok(response.value.map(|account| AccountSnapshot {
            owner: account.owner,
            data: account.data,
        }))
    }

    /// Fetches many accounts, preserving input order.
    pub async fn get_multiple_accounts(
        &self,
        addresses: &[Pubkey],
    ) -> Result<Vec<Option<AccountSnapshot>>, LedgerError> {
        let mut accounts = Vec::with_capacity(addresses.len());
        for chunk in addresses.chunks(MAX_MULTIPLE_ACCOUNTS) {
            let response = self
                .client
                .get_multiple_accounts(chunk)
                .await
                .map_err(|e| LedgerError::Rpc(format!("get_multiple_accounts: {e}")))?;
            accounts.extend(response.into_iter().map(|account| {
                account.map(|account| AccountSnapshot {
                    owner: account.owner,
                    data: account.data,
                })
            }));
        }
        Ok(accounts)
    }

    /// Token accounts of `owner` under `token_program`, in RPC order.
    pub async fn token_accounts_by_owner(
        &self,
        owner: &Pubkey,
        token_program: &Pubkey,
    ) -> Result<Vec<Pubkey>, LedgerError> {
        let keyed = self
            .client
            .get_token_accounts_by_owner(owner, TokenAccountsFilter::ProgramId(*token_program))
            .await
            .map_err(|e| LedgerError::Rpc(format!("get_token_accounts_by_owner: {e}")))?;

        keyed
            .iter()
            .map(|account| {
                Pubkey::from_str(&account.pubkey).map_err(|e| {
                    LedgerError::Decode(format!("token account {}: {e}", account.pubkey))
                })
            })
            .collect()
    }

    /// Signs with a fresh blockhash and submits without waiting for
    /// confirmation.
    ///
    /// Errors that prove the node refused the transaction map to
    /// [`LedgerError::NotSubmitted`]; transport errors leave the outcome
    /// unknown and map to [`LedgerError::Rpc`].
    pub async fn send_instructions(
        &self,
        instructions: &[Instruction],
        payer: &Pubkey,
        signers: &[&Keypair],
    ) -> Result<Signature, LedgerError> {
        let blockhash = self
            .client
            .get_latest_blockhash()
            .await
            .map_err(|e| LedgerError::NotSubmitted(format!("get_latest_blockhash: {e}")))?;

        let transaction =
            Transaction::new_signed_with_payer(instructions, Some(payer), signers, blockhash);

        debug!(instructions = instructions.len(), "Sending transaction");

        self.client
            .send_transaction(&transaction)
            .await
            .map_err(classify_send_error)
    }

    /// Status of a signature: `None` while unknown to the node,
    /// `Some(Err(reason))` when it landed and failed.
    pub async fn signature_status(
        &self,
        signature: &Signature,
    ) -> Result<Option<std::result::Result<(), String>>, LedgerError> {
        let status = self
            .client
            .get_signature_status(signature)
            .await
            .map_err(|e| LedgerError::Rpc(format!("get_signature_status {signature}: {e}")))?;
        Ok(status.map(|result| result.map_err(|e| e.to_string())))
    }
}

fn classify_send_error(err: ClientError) -> LedgerError {
    match err.kind() {
        ClientErrorKind::RpcError(_)
        | ClientErrorKind::TransactionError(_)
        | ClientErrorKind::SigningError(_) => LedgerError::NotSubmitted(err.to_string()),
        _ => LedgerError::Rpc(err.to_string()),
    }
}

/// Reads a keypair stored as a JSON array of 64 bytes.
pub fn read_keypair(path: impl AsRef<Path>) -> Result<Keypair> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read keypair file {}", path.display()))?;
    let bytes: Vec<u8> = serde_json::from_str(&raw)
        .with_context(|| format!("Keypair file {} is not a JSON byte array", path.display()))?;
    Keypair::try_from(bytes.as_slice())
        .map_err(|e| anyhow::anyhow!("Invalid keypair in {}: {e}", path.display()))
}
