//! Account-level state and the views the state machine hands out.

use ethereum_types::{Address, H256};
use rlp::DecoderError;
use rlp_derive::{RlpDecodable, RlpEncodable};
use serde::{Deserialize, Serialize};
use smt_trie::{SparseMerkleProof, EMPTY_LEAF};

use crate::error::StateMachineError;

/// The two assets the rollup knows about.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub enum TokenType {
    Uni = 0,
    Pigi = 1,
}

impl TokenType {
    pub const ALL: [TokenType; 2] = [TokenType::Uni, TokenType::Pigi];

    /// The token on the other side of a swap.
    pub const fn other(self) -> Self {
        match self {
            TokenType::Uni => TokenType::Pigi,
            TokenType::Pigi => TokenType::Uni,
        }
    }

    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for TokenType {
    type Error = StateMachineError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(TokenType::Uni),
            1 => Ok(TokenType::Pigi),
            other => Err(StateMachineError::InvalidTokenType(other)),
        }
    }
}

impl From<TokenType> for u8 {
    fn from(token: TokenType) -> Self {
        token.as_u8()
    }
}

#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Eq,
    Hash,
    PartialEq,
    RlpEncodable,
    RlpDecodable,
    Serialize,
    Deserialize,
)]
pub struct Balances {
    pub uni: u64,
    pub pigi: u64,
}

impl Balances {
    pub const fn new(uni: u64, pigi: u64) -> Self {
        Self { uni, pigi }
    }

    pub const fn get(&self, token: TokenType) -> u64 {
        match token {
            TokenType::Uni => self.uni,
            TokenType::Pigi => self.pigi,
        }
    }

    pub fn get_mut(&mut self, token: TokenType) -> &mut u64 {
        match token {
            TokenType::Uni => &mut self.uni,
            TokenType::Pigi => &mut self.pigi,
        }
    }
}

/// The value stored in an account's slot.
#[derive(
    Clone, Debug, Default, Eq, Hash, PartialEq, RlpEncodable, RlpDecodable, Serialize, Deserialize,
)]
pub struct AccountState {
    pub pubkey: Address,
    pub balances: Balances,
}

impl AccountState {
    pub const fn new(pubkey: Address, balances: Balances) -> Self {
        Self { pubkey, balances }
    }

    /// An account that owns nothing yet.
    pub fn empty(pubkey: Address) -> Self {
        Self::new(pubkey, Balances::default())
    }

    /// The leaf bytes stored in the state tree.
    pub fn encode(&self) -> Vec<u8> {
        rlp::encode(self).to_vec()
    }

    /// Decodes a leaf. The empty leaf decodes to `None`.
    pub fn decode(leaf: &[u8]) -> Result<Option<Self>, DecoderError> {
        if leaf == EMPTY_LEAF {
            return Ok(None);
        }
        rlp::decode(leaf).map(Some)
    }
}

/// Result of applying one transaction: both touched accounts after the
/// transaction, with proofs against the new root.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct StateUpdate {
    pub sender_slot_index: u64,
    pub receiver_slot_index: u64,
    pub sender_state: AccountState,
    pub receiver_state: AccountState,
    pub state_root: H256,
    pub sender_state_inclusion_proof: SparseMerkleProof,
    pub receiver_state_inclusion_proof: SparseMerkleProof,
    /// The receiver had no slot before this transaction.
    pub receiver_created: bool,
}

/// A consistent read of one slot together with the root it was read at.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub address: Option<Address>,
    /// `None` when the address owns no slot.
    pub slot_index: Option<u64>,
    pub state: Option<AccountState>,
    pub state_root: H256,
    /// Absent when there is no slot to prove.
    pub inclusion_proof: Option<SparseMerkleProof>,
}
