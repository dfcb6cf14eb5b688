//! Direct (same-asset) transfer construction
//!
//! Solana transfers are produced as bincode-serialized, unsigned
//! `VersionedTransaction` payloads. EVM transfers are produced as call data
//! for the signer to populate with nonce and gas.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::{
    hash::Hash,
    instruction::Instruction,
    message::{Message, VersionedMessage},
    pubkey::Pubkey,
    signature::Signature,
    system_instruction,
    transaction::VersionedTransaction,
};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::core::{
    parse_units, AmountError, Chain, ChainFamily, ChainRegistry, NftHolding, NftStandard,
    TokenHolding,
};

const ERC20_TRANSFER: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];
const ERC721_SAFE_TRANSFER_FROM: [u8; 4] = [0x42, 0x84, 0x2e, 0x0e];
const ERC1155_SAFE_TRANSFER_FROM: [u8; 4] = [0xf2, 0x42, 0x43, 0x2a];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error(transparent)]
    Amount(#[from] AmountError),

    #[error("Failed to prepare transaction: {0}")]
    Rpc(String),

    #[error("Unsupported transfer: {0}")]
    Unsupported(String),
}

/// EVM call for the signer to complete (nonce, gas) and sign
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvmTransactionRequest {
    pub chain: Chain,
    /// EIP-155 chain id
    pub chain_id: u64,
    /// Sender; must match the signing account
    pub from: String,
    /// Recipient for native sends, token contract otherwise
    pub to: String,
    /// Native value in wei, decimal string
    pub value: String,
    /// `0x`-prefixed call data
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnsignedTransaction {
    /// Serialized `VersionedTransaction` with placeholder signatures
    Solana { payload: Vec<u8> },
    Evm(EvmTransactionRequest),
}

impl UnsignedTransaction {
    pub fn chain(&self) -> Chain {
        match self {
            UnsignedTransaction::Solana { .. } => Chain::Solana,
            UnsignedTransaction::Evm(request) => request.chain,
        }
    }
}

/// Builds unsigned same-asset transfers
#[async_trait]
pub trait TransferBuilder: Send + Sync {
    async fn build_token_transfer(
        &self,
        token: &TokenHolding,
        from: &str,
        to: &str,
        amount: &str,
    ) -> Result<UnsignedTransaction, TransferError>;

    async fn build_nft_transfer(
        &self,
        nft: &NftHolding,
        from: &str,
        to: &str,
        quantity: u64,
    ) -> Result<UnsignedTransaction, TransferError>;
}

pub fn parse_solana_address(address: &str) -> Result<Pubkey, TransferError> {
    Pubkey::from_str(address.trim()).map_err(|_| TransferError::InvalidAddress(address.to_string()))
}

/// 20-byte EVM address, left-padded to an ABI word
pub fn evm_address_word(address: &str) -> Result<[u8; 32], TransferError> {
    let invalid = || TransferError::InvalidAddress(address.to_string());
    let hex_part = address.trim().strip_prefix("0x").ok_or_else(invalid)?;
    if hex_part.len() != 40 {
        return Err(invalid());
    }
    let bytes = hex::decode(hex_part).map_err(|_| invalid())?;

    let mut word = [0u8; 32];
    word[12..].copy_from_slice(&bytes);
    Ok(word)
}

pub fn is_evm_address(address: &str) -> bool {
    evm_address_word(address).is_ok()
}

pub fn u128_word(value: u128) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[16..].copy_from_slice(&value.to_be_bytes());
    word
}

/// Base-10 integer string (token ids may exceed u128) to a big-endian ABI word
pub fn decimal_word(value: &str) -> Result<[u8; 32], TransferError> {
    let value = value.trim();
    let invalid = || TransferError::Amount(AmountError::Invalid(value.to_string()));
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }

    let mut word = [0u8; 32];
    for digit in value.bytes().map(|b| (b - b'0') as u16) {
        let mut carry = digit;
        for byte in word.iter_mut().rev() {
            let v = (*byte as u16) * 10 + carry;
            *byte = (v & 0xff) as u8;
            carry = v >> 8;
        }
        if carry != 0 {
            return Err(TransferError::Amount(AmountError::Overflow));
        }
    }
    Ok(word)
}

fn call_data(selector: [u8; 4], words: &[[u8; 32]]) -> String {
    let mut data = Vec::with_capacity(4 + words.len() * 32);
    data.extend_from_slice(&selector);
    for word in words {
        data.extend_from_slice(word);
    }
    format!("0x{}", hex::encode(data))
}

pub fn erc20_transfer_data(to: &str, amount: u128) -> Result<String, TransferError> {
    Ok(call_data(ERC20_TRANSFER, &[evm_address_word(to)?, u128_word(amount)]))
}

pub fn erc721_transfer_data(from: &str, to: &str, token_id: &str) -> Result<String, TransferError> {
    Ok(call_data(
        ERC721_SAFE_TRANSFER_FROM,
        &[evm_address_word(from)?, evm_address_word(to)?, decimal_word(token_id)?],
    ))
}

pub fn erc1155_transfer_data(
    from: &str,
    to: &str,
    token_id: &str,
    quantity: u64,
) -> Result<String, TransferError> {
    // Trailing `bytes data` argument: offset to the tail, then a zero length
    Ok(call_data(
        ERC1155_SAFE_TRANSFER_FROM,
        &[
            evm_address_word(from)?,
            evm_address_word(to)?,
            decimal_word(token_id)?,
            u128_word(quantity as u128),
            u128_word(0xa0),
            u128_word(0),
        ],
    ))
}

fn serialize_unsigned(
    instructions: &[Instruction],
    payer: &Pubkey,
    blockhash: Hash,
) -> Result<Vec<u8>, TransferError> {
    let mut message = Message::new(instructions, Some(payer));
    message.recent_blockhash = blockhash;

    let transaction = VersionedTransaction {
        signatures: vec![Signature::default(); message.header.num_required_signatures as usize],
        message: VersionedMessage::Legacy(message),
    };

    bincode::serialize(&transaction).map_err(|e| TransferError::Rpc(e.to_string()))
}

/// Native SOL transfer
pub fn solana_native_transfer(
    from: &Pubkey,
    to: &Pubkey,
    lamports: u64,
    blockhash: Hash,
) -> Result<Vec<u8>, TransferError> {
    let instruction = system_instruction::transfer(from, to, lamports);
    serialize_unsigned(&[instruction], from, blockhash)
}

/// Only mints owned by the original SPL Token program can be moved with
/// `solana_token_transfer`. Token-2022 mints use a different program and
/// account layout.
pub fn ensure_spl_token_mint(mint: &Pubkey, owner_program: &Pubkey) -> Result<(), TransferError> {
    if *owner_program == spl_token::id() {
        return Ok(());
    }
    Err(TransferError::Unsupported(format!(
        "mint {} belongs to program {}; only SPL Token mints can be transferred",
        mint, owner_program
    )))
}

/// SPL token (or Metaplex NFT) transfer between associated token accounts,
/// creating the recipient's account if it does not exist yet.
///
/// Always targets the SPL Token program; check the mint with
/// `ensure_spl_token_mint` first. Programmable NFTs keep their token account
/// frozen and need the Metaplex token-metadata transfer instead, so a plain
/// `transfer_checked` for them fails on-chain.
pub fn solana_token_transfer(
    owner: &Pubkey,
    recipient: &Pubkey,
    mint: &Pubkey,
    amount: u64,
    decimals: u8,
    blockhash: Hash,
) -> Result<Vec<u8>, TransferError> {
    let token_program = spl_token::id();
    let source = spl_associated_token_account::get_associated_token_address(owner, mint);
    let destination = spl_associated_token_account::get_associated_token_address(recipient, mint);

    let create_destination =
        spl_associated_token_account::instruction::create_associated_token_account_idempotent(
            owner,
            recipient,
            mint,
            &token_program,
        );
    let transfer = spl_token::instruction::transfer_checked(
        &token_program,
        &source,
        mint,
        &destination,
        owner,
        &[],
        amount,
        decimals,
    )
    .map_err(|e| TransferError::Rpc(e.to_string()))?;

    serialize_unsigned(&[create_destination, transfer], owner, blockhash)
}

fn to_u64(raw: u128) -> Result<u64, TransferError> {
    u64::try_from(raw).map_err(|_| TransferError::Amount(AmountError::Overflow))
}

/// Builds transfers against live chain state (Solana blockhash)
pub struct ChainTransferBuilder {
    registry: Arc<ChainRegistry>,
}

impl ChainTransferBuilder {
    pub fn new(registry: Arc<ChainRegistry>) -> Self {
        Self { registry }
    }

    fn solana_rpc(&self) -> Result<RpcClient, TransferError> {
        let descriptor = self
            .registry
            .describe_chain(Chain::Solana)
            .map_err(|e| TransferError::Rpc(e.to_string()))?;
        Ok(RpcClient::new(descriptor.rpc_url.clone()))
    }

    async fn latest_blockhash(&self) -> Result<Hash, TransferError> {
        self.solana_rpc()?
            .get_latest_blockhash()
            .await
            .map_err(|e| TransferError::Rpc(e.to_string()))
    }

    /// Reject mints the SPL Token instruction builder cannot serve
    async fn check_mint_program(&self, mint: &Pubkey) -> Result<(), TransferError> {
        let account = self
            .solana_rpc()?
            .get_account(mint)
            .await
            .map_err(|e| TransferError::Rpc(e.to_string()))?;
        ensure_spl_token_mint(mint, &account.owner)
    }

    fn evm_request(
        &self,
        chain: Chain,
        from: &str,
        to: &str,
        value: u128,
        data: String,
    ) -> Result<UnsignedTransaction, TransferError> {
        let chain_id = self
            .registry
            .describe_chain(chain)
            .map_err(|e| TransferError::Unsupported(e.to_string()))?
            .chain_id
            .ok_or_else(|| TransferError::Unsupported(format!("{} has no chain id", chain)))?;

        evm_address_word(from)?;
        evm_address_word(to)?;

        Ok(UnsignedTransaction::Evm(EvmTransactionRequest {
            chain,
            chain_id,
            from: from.to_string(),
            to: to.to_string(),
            value: value.to_string(),
            data,
        }))
    }
}

#[async_trait]
impl TransferBuilder for ChainTransferBuilder {
    #[instrument(skip(self, token), fields(chain = %token.chain, symbol = %token.symbol))]
    async fn build_token_transfer(
        &self,
        token: &TokenHolding,
        from: &str,
        to: &str,
        amount: &str,
    ) -> Result<UnsignedTransaction, TransferError> {
        let raw = parse_units(amount, token.decimals)?;
        debug!(raw_amount = raw, "Building token transfer");

        match token.chain.family() {
            ChainFamily::Solana => {
                let owner = parse_solana_address(from)?;
                let recipient = parse_solana_address(to)?;
                let blockhash = self.latest_blockhash().await?;

                let payload = match &token.contract_address {
                    None => solana_native_transfer(&owner, &recipient, to_u64(raw)?, blockhash)?,
                    Some(mint) => {
                        let mint = parse_solana_address(mint)?;
                        self.check_mint_program(&mint).await?;
                        solana_token_transfer(
                            &owner,
                            &recipient,
                            &mint,
                            to_u64(raw)?,
                            token.decimals,
                            blockhash,
                        )?
                    }
                };
                Ok(UnsignedTransaction::Solana { payload })
            }
            ChainFamily::Evm => match &token.contract_address {
                None => self.evm_request(token.chain, from, to, raw, "0x".to_string()),
                Some(contract) => {
                    let data = erc20_transfer_data(to, raw)?;
                    self.evm_request(token.chain, from, contract, 0, data)
                }
            },
        }
    }

    #[instrument(skip(self, nft), fields(chain = %nft.chain, token_id = %nft.token_id))]
    async fn build_nft_transfer(
        &self,
        nft: &NftHolding,
        from: &str,
        to: &str,
        quantity: u64,
    ) -> Result<UnsignedTransaction, TransferError> {
        if quantity == 0 {
            return Err(TransferError::Amount(AmountError::NotPositive));
        }

        match nft.standard {
            NftStandard::Metaplex => {
                let owner = parse_solana_address(from)?;
                let recipient = parse_solana_address(to)?;
                let mint = parse_solana_address(&nft.contract_address)?;
                self.check_mint_program(&mint).await?;
                let blockhash = self.latest_blockhash().await?;
                let payload = solana_token_transfer(&owner, &recipient, &mint, 1, 0, blockhash)?;
                Ok(UnsignedTransaction::Solana { payload })
            }
            NftStandard::Erc721 => {
                if quantity != 1 {
                    return Err(TransferError::Unsupported(
                        "ERC-721 tokens are transferred one at a time".to_string(),
                    ));
                }
                let data = erc721_transfer_data(from, to, &nft.token_id)?;
                self.evm_request(nft.chain, from, &nft.contract_address, 0, data)
            }
            NftStandard::Erc1155 => {
                let data = erc1155_transfer_data(from, to, &nft.token_id, quantity)?;
                self.evm_request(nft.chain, from, &nft.contract_address, 0, data)
            }
        }
    }
}
