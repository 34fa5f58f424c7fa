use ethereum_types::Address;
use interval_tree::IntervalTreeError;
use rlp::DecoderError;
use rollup_common::DbError;
use smt_trie::SmtError;
use thiserror::Error;

use crate::signatures::SignatureError;
use crate::validator::ValidationPosition;

pub type StateMachineResult<T> = Result<T, StateMachineError>;
pub type ValidatorResult<T> = Result<T, ValidatorError>;
pub type AggregatorResult<T> = Result<T, AggregatorError>;
pub type SubmitterResult<T> = Result<T, SubmitterError>;

/// Errors from applying transactions to the rollup state.
///
/// [`StateMachineError::is_semantic`] splits these into rejections of a
/// single transaction, which leave the state untouched, and faults of the
/// state machine itself.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum StateMachineError {
    #[error("{address:?} holds {balance} of token {token}, needs {requested}")]
    InsufficientBalance {
        address: Address,
        token: u8,
        balance: u64,
        requested: u64,
    },

    #[error("Amounts must be at least 1")]
    NegativeAmount,

    #[error("Swap would output {output}, below the minimum of {min_output}")]
    Slippage { output: u64, min_output: u64 },

    #[error("Unknown token type {0}")]
    InvalidTokenType(u8),

    #[error("Transaction from {sender:?} was signed by {signer:?}")]
    SignatureMismatch { signer: Address, sender: Address },

    #[error("Transaction type not accepted here: {0}")]
    InvalidTransactionType(String),

    #[error("The swap pool has no liquidity")]
    EmptyReserves,

    #[error("Crediting the account would overflow its balance")]
    BalanceOverflow,

    #[error(transparent)]
    Signature(#[from] SignatureError),

    /// Tree heights are limited so every slot index fits a `u64`.
    #[error("State tree height must be in 1..={max}, got {height}")]
    InvalidTreeHeight { height: usize, max: usize },

    #[error("All {capacity} account slots are allocated")]
    SlotsExhausted { capacity: u64 },

    /// The state tree lacks a node it needs to update `slot`.
    #[error("State tree is missing nodes on the path to slot {0}")]
    IncompleteTree(u64),

    #[error(transparent)]
    Smt(#[from] SmtError),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error("Failed to decode persisted state: {0}")]
    Decode(#[from] DecoderError),
}

impl StateMachineError {
    /// `true` if the error rejects one transaction rather than signalling a
    /// broken state machine.
    pub const fn is_semantic(&self) -> bool {
        matches!(
            self,
            StateMachineError::InsufficientBalance { .. }
                | StateMachineError::NegativeAmount
                | StateMachineError::Slippage { .. }
                | StateMachineError::InvalidTokenType(_)
                | StateMachineError::SignatureMismatch { .. }
                | StateMachineError::InvalidTransactionType(_)
                | StateMachineError::EmptyReserves
                | StateMachineError::BalanceOverflow
                | StateMachineError::Signature(_)
        )
    }
}

#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum ValidatorError {
    #[error("Expected block {expected}, got block {got}")]
    OutOfOrder { expected: u64, got: u64 },

    #[error("Block {0} was never stored")]
    BlockNotFound(u64),

    /// Accounts are only ever created in the next sequential slot.
    #[error("Account created in slot {got}, but the next new slot is {expected}")]
    Unsupported { expected: u64, got: u64 },

    #[error("Validation stopped at fraud in {0}")]
    FraudAlreadyFound(ValidationPosition),

    #[error("Transition {transition_index} is not in block {block_number}")]
    TransitionNotFound {
        block_number: u64,
        transition_index: usize,
    },

    #[error(transparent)]
    StateMachine(#[from] StateMachineError),

    #[error(transparent)]
    IntervalTree(#[from] IntervalTreeError),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error("Failed to decode a stored block: {0}")]
    Decode(#[from] DecoderError),
}

#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum SubmitterError {
    #[error("Expected block {expected}, got block {got}")]
    OutOfOrder { expected: u64, got: u64 },

    #[error("Block {block} has not been queued, last queued is {last_queued}")]
    NotQueued { block: u64, last_queued: u64 },

    #[error(transparent)]
    Db(#[from] DbError),

    #[error("Failed to decode a queued block: {0}")]
    Decode(#[from] DecoderError),
}

#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum AggregatorError {
    #[error("Aggregator {aggregator:?} holds {balance} of token {token}, faucet needs {requested}")]
    FaucetEmpty {
        aggregator: Address,
        token: u8,
        balance: u64,
        requested: u64,
    },

    #[error(transparent)]
    StateMachine(#[from] StateMachineError),

    #[error(transparent)]
    Submitter(#[from] SubmitterError),
}

impl From<SignatureError> for AggregatorError {
    fn from(e: SignatureError) -> Self {
        AggregatorError::StateMachine(e.into())
    }
}
