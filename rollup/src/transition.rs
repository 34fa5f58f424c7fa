//! Transitions: applied transactions as they appear in a block.
//!
//! A transition refers to accounts by slot index rather than address, and
//! carries the state root the aggregator claims results from applying it.

use ethereum_types::{Address, H256};
use rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream};
use serde::{Deserialize, Serialize};

use crate::error::{StateMachineError, StateMachineResult};
use crate::transaction::{SignedTransaction, Transaction};
use crate::types::StateUpdate;

#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct TransferTransition {
    pub state_root: H256,
    pub sender_slot_index: u64,
    pub recipient_slot_index: u64,
    pub token_type: u8,
    pub amount: u64,
    pub signature: Vec<u8>,
}

#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct SwapTransition {
    pub state_root: H256,
    pub sender_slot_index: u64,
    pub uniswap_slot_index: u64,
    pub token_type: u8,
    pub input_amount: u64,
    pub min_output_amount: u64,
    pub timeout: u64,
    pub signature: Vec<u8>,
}

/// A transfer to an account that had no slot, which gets created in
/// `recipient_slot_index`.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct CreateAndTransferTransition {
    pub state_root: H256,
    pub sender_slot_index: u64,
    pub recipient_slot_index: u64,
    pub created_account_pubkey: Address,
    pub token_type: u8,
    pub amount: u64,
    pub signature: Vec<u8>,
}

#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RollupTransition {
    Transfer(TransferTransition),
    Swap(SwapTransition),
    CreateAndTransfer(CreateAndTransferTransition),
}

impl RollupTransition {
    const TRANSFER: u8 = 0;
    const SWAP: u8 = 1;
    const CREATE_AND_TRANSFER: u8 = 2;

    /// The root claimed after this transition.
    pub const fn state_root(&self) -> H256 {
        match self {
            RollupTransition::Transfer(t) => t.state_root,
            RollupTransition::Swap(t) => t.state_root,
            RollupTransition::CreateAndTransfer(t) => t.state_root,
        }
    }

    pub fn set_state_root(&mut self, root: H256) {
        match self {
            RollupTransition::Transfer(t) => t.state_root = root,
            RollupTransition::Swap(t) => t.state_root = root,
            RollupTransition::CreateAndTransfer(t) => t.state_root = root,
        }
    }

    pub fn signature(&self) -> &[u8] {
        match self {
            RollupTransition::Transfer(t) => &t.signature,
            RollupTransition::Swap(t) => &t.signature,
            RollupTransition::CreateAndTransfer(t) => &t.signature,
        }
    }

    pub const fn sender_slot_index(&self) -> u64 {
        match self {
            RollupTransition::Transfer(t) => t.sender_slot_index,
            RollupTransition::Swap(t) => t.sender_slot_index,
            RollupTransition::CreateAndTransfer(t) => t.sender_slot_index,
        }
    }

    /// Records `signed` as applied with result `update`. A transfer that
    /// created its recipient becomes a [`CreateAndTransferTransition`].
    pub fn from_update(
        signed: &SignedTransaction,
        update: &StateUpdate,
    ) -> StateMachineResult<Self> {
        let signature = signed.signature.clone();
        let state_root = update.state_root;
        Ok(match &signed.transaction {
            Transaction::Transfer(tx) if update.receiver_created => {
                RollupTransition::CreateAndTransfer(CreateAndTransferTransition {
                    state_root,
                    sender_slot_index: update.sender_slot_index,
                    recipient_slot_index: update.receiver_slot_index,
                    created_account_pubkey: tx.recipient,
                    token_type: tx.token_type,
                    amount: tx.amount,
                    signature,
                })
            }
            Transaction::Transfer(tx) => RollupTransition::Transfer(TransferTransition {
                state_root,
                sender_slot_index: update.sender_slot_index,
                recipient_slot_index: update.receiver_slot_index,
                token_type: tx.token_type,
                amount: tx.amount,
                signature,
            }),
            Transaction::Swap(tx) => RollupTransition::Swap(SwapTransition {
                state_root,
                sender_slot_index: update.sender_slot_index,
                uniswap_slot_index: update.receiver_slot_index,
                token_type: tx.token_type,
                input_amount: tx.input_amount,
                min_output_amount: tx.min_output_amount,
                timeout: tx.timeout,
                signature,
            }),
            Transaction::FaucetRequest(_) => {
                return Err(StateMachineError::InvalidTransactionType(
                    signed.transaction.kind().to_string(),
                ))
            }
        })
    }

    /// The other slot the transition touches: the recipient, or the swap
    /// pool.
    pub const fn counterparty_slot_index(&self) -> u64 {
        match self {
            RollupTransition::Transfer(t) => t.recipient_slot_index,
            RollupTransition::Swap(t) => t.uniswap_slot_index,
            RollupTransition::CreateAndTransfer(t) => t.recipient_slot_index,
        }
    }
}

impl Encodable for RollupTransition {
    fn rlp_append(&self, s: &mut RlpStream) {
        match self {
            RollupTransition::Transfer(t) => {
                s.begin_list(7)
                    .append(&Self::TRANSFER)
                    .append(&t.state_root)
                    .append(&t.sender_slot_index)
                    .append(&t.recipient_slot_index)
                    .append(&t.token_type)
                    .append(&t.amount)
                    .append(&t.signature);
            }
            RollupTransition::Swap(t) => {
                s.begin_list(9)
                    .append(&Self::SWAP)
                    .append(&t.state_root)
                    .append(&t.sender_slot_index)
                    .append(&t.uniswap_slot_index)
                    .append(&t.token_type)
                    .append(&t.input_amount)
                    .append(&t.min_output_amount)
                    .append(&t.timeout)
                    .append(&t.signature);
            }
            RollupTransition::CreateAndTransfer(t) => {
                s.begin_list(8)
                    .append(&Self::CREATE_AND_TRANSFER)
                    .append(&t.state_root)
                    .append(&t.sender_slot_index)
                    .append(&t.recipient_slot_index)
                    .append(&t.created_account_pubkey)
                    .append(&t.token_type)
                    .append(&t.amount)
                    .append(&t.signature);
            }
        }
    }
}

impl Decodable for RollupTransition {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        let kind: u8 = rlp.val_at(0)?;
        let expected = match kind {
            Self::TRANSFER => 7,
            Self::SWAP => 9,
            Self::CREATE_AND_TRANSFER => 8,
            _ => return Err(DecoderError::Custom("unknown transition kind")),
        };
        if rlp.item_count()? != expected {
            return Err(DecoderError::RlpIncorrectListLen);
        }

        Ok(match kind {
            Self::TRANSFER => RollupTransition::Transfer(TransferTransition {
                state_root: rlp.val_at(1)?,
                sender_slot_index: rlp.val_at(2)?,
                recipient_slot_index: rlp.val_at(3)?,
                token_type: rlp.val_at(4)?,
                amount: rlp.val_at(5)?,
                signature: rlp.val_at(6)?,
            }),
            Self::SWAP => RollupTransition::Swap(SwapTransition {
                state_root: rlp.val_at(1)?,
                sender_slot_index: rlp.val_at(2)?,
                uniswap_slot_index: rlp.val_at(3)?,
                token_type: rlp.val_at(4)?,
                input_amount: rlp.val_at(5)?,
                min_output_amount: rlp.val_at(6)?,
                timeout: rlp.val_at(7)?,
                signature: rlp.val_at(8)?,
            }),
            _ => RollupTransition::CreateAndTransfer(CreateAndTransferTransition {
                state_root: rlp.val_at(1)?,
                sender_slot_index: rlp.val_at(2)?,
                recipient_slot_index: rlp.val_at(3)?,
                created_account_pubkey: rlp.val_at(4)?,
                token_type: rlp.val_at(5)?,
                amount: rlp.val_at(6)?,
                signature: rlp.val_at(7)?,
            }),
        })
    }
}
