//! An optimistic rollup over two tokens and a constant-product swap pool.
//!
//! Accounts live in the slots of a sparse Merkle tree. The
//! [`RollupStateMachine`] applies signed [`Transaction`]s to them and returns
//! the touched accounts with inclusion proofs. The [`RollupAggregator`]
//! records every applied transaction as a [`RollupTransition`] carrying the
//! resulting state root and cuts the transitions into [`RollupBlock`]s,
//! which it hands to a [`BlockSubmitter`]. A [`RollupStateValidator`]
//! replays blocks against its own state machine and turns the first
//! transition that does not hold up into a [`ContractFraudProof`].
//!
//! Nothing here installs a `tracing` subscriber; binaries call
//! [`tracing::init`](crate::tracing::init) themselves.

#![deny(rustdoc::broken_intra_doc_links)]
#![deny(missing_debug_implementations)]

pub mod aggregator;
pub mod block;
pub mod block_submitter;
pub mod config;
pub mod error;
pub mod signatures;
pub mod state_machine;
pub mod tracing;
pub mod transaction;
pub mod transition;
pub mod types;
pub mod validator;

pub use aggregator::RollupAggregator;
pub use block::{IncludedTransition, RollupBlock, TransitionInclusionProof};
pub use block_submitter::{BlockSubmitter, QueuedBlockSubmitter, SubmissionCounters};
pub use config::{CliRollupConfig, RollupConfig};
pub use error::{
    AggregatorError, AggregatorResult, StateMachineError, StateMachineResult, SubmitterError,
    SubmitterResult, ValidatorError, ValidatorResult,
};
pub use signatures::{
    EcdsaVerifier, IdentitySigner, IdentityVerifier, LocalSigner, SignatureError,
    SignatureProvider, SignatureVerifier,
};
pub use state_machine::{RollupStateMachine, StateMachineConfig};
pub use transaction::{FaucetRequest, SignedTransaction, Swap, Transaction, Transfer};
pub use transition::{
    CreateAndTransferTransition, RollupTransition, SwapTransition, TransferTransition,
};
pub use types::{AccountState, Balances, StateSnapshot, StateUpdate, TokenType};
pub use validator::{
    ContractFraudProof, IncludedStorageSlot, LocalFraudProof, RollupStateValidator, StorageSlot,
    ValidationPosition,
};
