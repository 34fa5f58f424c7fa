//! Replays aggregated blocks against a private state machine and builds
//! fraud proofs when a transition does not hold up.
//!
//! The validator waits for block `n`, validates its transitions in order and
//! only then moves on to `n + 1`. The first bad transition stops it for good:
//! every later call fails with [`ValidatorError::FraudAlreadyFound`].

use std::fmt::{self, Display};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ethereum_types::{Address, H256};
use rollup_common::{Bucket, DbError, KvStore, KvStoreExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::block::{IncludedTransition, RollupBlock};
use crate::error::{ValidatorError, ValidatorResult};
use crate::signatures::SignatureVerifier;
use crate::state_machine::{RollupStateMachine, StateMachineConfig};
use crate::transaction::{SignedTransaction, Swap, Transaction, Transfer};
use crate::transition::RollupTransition;
use crate::types::{AccountState, StateSnapshot};

/// Bucket the validator keeps everything under, its state machine included.
pub const VALIDATOR_PREFIX: &[u8] = b"rollup_validator/";

const BLOCKS_PREFIX: &[u8] = b"blocks/";
const STATE_PREFIX: &[u8] = b"state/";
const META_PREFIX: &[u8] = b"meta/";

const POSITION_KEY: &[u8] = b"position";
const FRAUD_KEY: &[u8] = b"fraud";

fn block_key(block_number: u64) -> [u8; 8] {
    block_number.to_be_bytes()
}

/// The next transition to validate.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct ValidationPosition {
    pub block_number: u64,
    pub transition_index: usize,
}

impl ValidationPosition {
    /// Blocks are numbered from 1.
    pub const GENESIS: Self = Self {
        block_number: 1,
        transition_index: 0,
    };

    fn to_bytes(self) -> Vec<u8> {
        [
            self.block_number.to_be_bytes(),
            (self.transition_index as u64).to_be_bytes(),
        ]
        .concat()
    }

    fn from_bytes(key: &[u8], bytes: &[u8]) -> Result<Self, DbError> {
        if bytes.len() != 16 {
            return Err(DbError::corrupted(key, "validation position is not 16 bytes"));
        }
        let mut block_number = [0; 8];
        let mut transition_index = [0; 8];
        block_number.copy_from_slice(&bytes[..8]);
        transition_index.copy_from_slice(&bytes[8..]);
        Ok(Self {
            block_number: u64::from_be_bytes(block_number),
            transition_index: usize::try_from(u64::from_be_bytes(transition_index))
                .map_err(|_| DbError::corrupted(key, "transition index overflows usize"))?,
        })
    }
}

impl Display for ValidationPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "block {} transition {}",
            self.block_number, self.transition_index
        )
    }
}

/// Evidence of a bad transition, in terms of the validator's own state.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct LocalFraudProof {
    pub fraud_position: ValidationPosition,
    /// The sender and counterparty slots as they were before the transition.
    pub fraud_inputs: [StateSnapshot; 2],
    pub fraud_transition: RollupTransition,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct StorageSlot {
    pub value: AccountState,
    pub slot_index: u64,
}

/// A storage slot with its siblings in contract order, root to leaf.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct IncludedStorageSlot {
    pub storage_slot: StorageSlot,
    pub siblings: Vec<H256>,
}

/// What an on-chain verifier needs to check a [`LocalFraudProof`]: the last
/// good transition (whose root the fraudulent one starts from), the
/// fraudulent transition and both storage slots it read.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ContractFraudProof {
    /// `None` when the fraud is in the very first transition of the rollup.
    pub valid_included_transition: Option<IncludedTransition>,
    pub fraudulent_included_transition: IncludedTransition,
    pub included_storage_slots: [IncludedStorageSlot; 2],
}

#[derive(Debug)]
pub struct RollupStateValidator {
    state_machine: RollupStateMachine,
    blocks: Bucket,
    meta: Bucket,
    position: ValidationPosition,
    fraud: Option<ValidationPosition>,
}

impl RollupStateValidator {
    /// Opens the validator persisted in `store`, seeding its private state
    /// machine with `genesis` on first use.
    pub fn new(
        genesis: &[AccountState],
        store: Arc<dyn KvStore>,
        verifier: Arc<dyn SignatureVerifier>,
        config: StateMachineConfig,
    ) -> ValidatorResult<Self> {
        let bucket = store.bucket(VALIDATOR_PREFIX);
        let state_machine = RollupStateMachine::create(
            genesis,
            Arc::new(bucket.bucket(STATE_PREFIX)),
            verifier,
            config,
        )?;
        let meta = bucket.bucket(META_PREFIX);

        let position = match meta.get(POSITION_KEY)? {
            Some(bytes) => ValidationPosition::from_bytes(POSITION_KEY, &bytes)?,
            None => ValidationPosition::GENESIS,
        };
        let fraud = meta
            .get(FRAUD_KEY)?
            .map(|bytes| ValidationPosition::from_bytes(FRAUD_KEY, &bytes))
            .transpose()?;
        if let Some(fraud) = fraud {
            warn!("validator halted at fraud in {fraud}");
        }

        Ok(Self {
            state_machine,
            blocks: bucket.bucket(BLOCKS_PREFIX),
            meta,
            position,
            fraud,
        })
    }

    pub const fn position(&self) -> ValidationPosition {
        self.position
    }

    /// Where fraud was found, if it was.
    pub const fn fraud_position(&self) -> Option<ValidationPosition> {
        self.fraud
    }

    pub const fn state_machine(&self) -> &RollupStateMachine {
        &self.state_machine
    }

    /// Stores `block` for later validation. Storing a block number twice
    /// replaces the earlier block.
    pub fn store_block(&self, block: &RollupBlock) -> ValidatorResult<()> {
        self.blocks
            .put(&block_key(block.block_number), &rlp::encode(block))?;
        debug!(
            block_number = block.block_number,
            "stored block with {} transitions",
            block.len()
        );
        Ok(())
    }

    pub fn get_block(&self, block_number: u64) -> ValidatorResult<Option<RollupBlock>> {
        self.blocks
            .get(&block_key(block_number))?
            .map(|bytes| rlp::decode(&bytes))
            .transpose()
            .map_err(ValidatorError::from)
    }

    /// Validates the stored block `block_number`, which must be the block the
    /// validator is waiting for.
    pub async fn validate_stored_block(
        &mut self,
        block_number: u64,
    ) -> ValidatorResult<Option<LocalFraudProof>> {
        self.ensure_not_halted()?;
        if block_number != self.position.block_number {
            return Err(ValidatorError::OutOfOrder {
                expected: self.position.block_number,
                got: block_number,
            });
        }
        let block = self
            .get_block(block_number)?
            .ok_or(ValidatorError::BlockNotFound(block_number))?;

        let start = self.position.transition_index;
        for transition in block.transitions.iter().skip(start) {
            if let Some(fraud) = self.check_next_transition(transition).await? {
                return Ok(Some(fraud));
            }
        }

        self.position = ValidationPosition {
            block_number: block_number + 1,
            transition_index: 0,
        };
        self.meta.put(POSITION_KEY, &self.position.to_bytes())?;
        info!("validated block {block_number} with {} transitions", block.len());
        Ok(None)
    }

    /// Replays `transition` as the one at the current position.
    ///
    /// Returns a fraud proof when the transition is rejected by the state
    /// machine, references accounts it cannot, or claims a different root.
    pub async fn check_next_transition(
        &mut self,
        transition: &RollupTransition,
    ) -> ValidatorResult<Option<LocalFraudProof>> {
        self.ensure_not_halted()?;
        let position = self.position;
        let sm = &self.state_machine;

        let slots = [
            transition.sender_slot_index(),
            transition.counterparty_slot_index(),
        ];
        if let Some(slot) = slots.iter().find(|slot| **slot >= sm.slot_capacity()) {
            debug!("transition at {position} references slot {slot} beyond capacity");
            let inputs = [
                self.snapshot_or_unprovable(slots[0]).await?,
                self.snapshot_or_unprovable(slots[1]).await?,
            ];
            return self.fraud(position, inputs, transition);
        }
        let inputs = [
            sm.get_state_at_slot(slots[0]).await?,
            sm.get_state_at_slot(slots[1]).await?,
        ];

        let Some(transaction) = self.rebuild_transaction(transition, &inputs).await? else {
            return self.fraud(position, inputs, transition);
        };
        let signed = SignedTransaction::new(transition.signature().to_vec(), transaction);

        match self.state_machine.apply_transaction(&signed).await {
            Ok(update) if update.state_root == transition.state_root() => {
                self.position.transition_index += 1;
                self.meta.put(POSITION_KEY, &self.position.to_bytes())?;
                Ok(None)
            }
            Ok(update) => {
                debug!(
                    "transition at {position} claims root {:?}, replay gives {:?}",
                    transition.state_root(),
                    update.state_root
                );
                self.fraud(position, inputs, transition)
            }
            Err(e) if e.is_semantic() => {
                debug!("transition at {position} is invalid: {e}");
                self.fraud(position, inputs, transition)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Turns a transition back into the transaction it records. `None` when
    /// the slots it names do not hold the accounts it needs.
    async fn rebuild_transaction(
        &self,
        transition: &RollupTransition,
        [sender, counterparty]: &[StateSnapshot; 2],
    ) -> ValidatorResult<Option<Transaction>> {
        let Some(sender) = sender.address else {
            return Ok(None);
        };

        Ok(match transition {
            RollupTransition::Transfer(t) => counterparty.address.map(|recipient| {
                Transfer {
                    sender,
                    recipient,
                    token_type: t.token_type,
                    amount: t.amount,
                }
                .into()
            }),
            RollupTransition::Swap(t) => {
                let pool = self.state_machine.config().uniswap_address;
                (counterparty.address == Some(pool)).then(|| {
                    Swap {
                        sender,
                        token_type: t.token_type,
                        input_amount: t.input_amount,
                        min_output_amount: t.min_output_amount,
                        timeout: t.timeout,
                    }
                    .into()
                })
            }
            RollupTransition::CreateAndTransfer(t) => {
                let expected = self.state_machine.next_new_account_slot().await;
                if t.recipient_slot_index != expected {
                    return Err(ValidatorError::Unsupported {
                        expected,
                        got: t.recipient_slot_index,
                    });
                }
                let existing = self
                    .state_machine
                    .get_state(t.created_account_pubkey)
                    .await?;
                existing.slot_index.is_none().then(|| {
                    Transfer {
                        sender,
                        recipient: t.created_account_pubkey,
                        token_type: t.token_type,
                        amount: t.amount,
                    }
                    .into()
                })
            }
        })
    }

    /// A snapshot without a proof for slots the tree cannot hold.
    async fn snapshot_or_unprovable(&self, slot: u64) -> ValidatorResult<StateSnapshot> {
        if slot < self.state_machine.slot_capacity() {
            return Ok(self.state_machine.get_state_at_slot(slot).await?);
        }
        Ok(StateSnapshot {
            address: None,
            slot_index: Some(slot),
            state: None,
            state_root: self.state_machine.state_root().await,
            inclusion_proof: None,
        })
    }

    fn fraud(
        &mut self,
        position: ValidationPosition,
        fraud_inputs: [StateSnapshot; 2],
        transition: &RollupTransition,
    ) -> ValidatorResult<Option<LocalFraudProof>> {
        warn!("fraud found in {position}");
        self.fraud = Some(position);
        self.meta.put(FRAUD_KEY, &position.to_bytes())?;
        Ok(Some(LocalFraudProof {
            fraud_position: position,
            fraud_inputs,
            fraud_transition: transition.clone(),
        }))
    }

    fn ensure_not_halted(&self) -> ValidatorResult<()> {
        match self.fraud {
            Some(position) => Err(ValidatorError::FraudAlreadyFound(position)),
            None => Ok(()),
        }
    }

    /// Packages `local` for submission on chain.
    pub fn generate_contract_fraud_proof(
        &self,
        local: &LocalFraudProof,
    ) -> ValidatorResult<ContractFraudProof> {
        let ValidationPosition {
            block_number,
            transition_index,
        } = local.fraud_position;
        let block = self
            .get_block(block_number)?
            .ok_or(ValidatorError::BlockNotFound(block_number))?;
        if transition_index >= block.len() {
            return Err(ValidatorError::TransitionNotFound {
                block_number,
                transition_index,
            });
        }
        let fraudulent_included_transition = block.included_transition(transition_index)?;

        let valid_included_transition = match transition_index {
            0 => self.last_transition_before(block_number)?,
            i => Some(block.included_transition(i - 1)?),
        };

        let [sender, counterparty] = &local.fraud_inputs;
        Ok(ContractFraudProof {
            valid_included_transition,
            fraudulent_included_transition,
            included_storage_slots: [included_slot(sender), included_slot(counterparty)],
        })
    }

    /// The last transition of the closest earlier non-empty stored block.
    fn last_transition_before(
        &self,
        block_number: u64,
    ) -> ValidatorResult<Option<IncludedTransition>> {
        for earlier in (1..block_number).rev() {
            match self.get_block(earlier)? {
                Some(block) if !block.is_empty() => {
                    return Ok(Some(block.included_transition(block.len() - 1)?));
                }
                Some(_) => continue,
                None => return Ok(None),
            }
        }
        Ok(None)
    }

    /// Validates stored blocks in order while `liveness` is set.
    ///
    /// Stops at the first fraud, returning its contract proof, or at the
    /// first block that has not been stored yet.
    pub async fn run_stored_blocks(
        &mut self,
        liveness: &AtomicBool,
    ) -> ValidatorResult<Option<ContractFraudProof>> {
        while liveness.load(Ordering::Relaxed) {
            let block_number = self.position.block_number;
            if !self.blocks.has(&block_key(block_number))? {
                debug!("waiting for block {block_number}");
                return Ok(None);
            }
            if let Some(local) = self.validate_stored_block(block_number).await? {
                return self.generate_contract_fraud_proof(&local).map(Some);
            }
        }
        Ok(None)
    }
}

fn included_slot(snapshot: &StateSnapshot) -> IncludedStorageSlot {
    IncludedStorageSlot {
        storage_slot: StorageSlot {
            value: snapshot.state.clone().unwrap_or_else(|| AccountState {
                pubkey: snapshot.address.unwrap_or_else(Address::zero),
                ..Default::default()
            }),
            slot_index: snapshot.slot_index.unwrap_or_default(),
        },
        siblings: snapshot
            .inclusion_proof
            .as_ref()
            .map(|proof| proof.to_contract_proof().siblings)
            .unwrap_or_default(),
    }
}
