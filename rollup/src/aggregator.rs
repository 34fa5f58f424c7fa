use std::sync::Arc;

use ethereum_types::Address;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::block::RollupBlock;
use crate::block_submitter::BlockSubmitter;
use crate::error::{AggregatorError, AggregatorResult, StateMachineError};
use crate::signatures::SignatureProvider;
use crate::state_machine::RollupStateMachine;
use crate::transaction::{SignedTransaction, Transaction, Transfer};
use crate::transition::RollupTransition;
use crate::types::{StateSnapshot, StateUpdate, TokenType};

/// Applies user transactions, records them as transitions and cuts blocks.
///
/// The state machine's configured aggregator address must be the address of
/// `signer`, or faucet payouts are rejected as forged.
///
/// A block the submitter refuses stays pending and is offered again once the
/// next transition lands or [`RollupAggregator::submit_pending_block`] is
/// called.
#[derive(Debug)]
pub struct RollupAggregator<S> {
    state_machine: RollupStateMachine,
    signer: Arc<dyn SignatureProvider>,
    submitter: S,
    pending: Mutex<RollupBlock>,
    block_size: usize,
}

impl<S: BlockSubmitter> RollupAggregator<S> {
    /// The first block cut gets the number the submitter expects next.
    pub fn new(
        state_machine: RollupStateMachine,
        signer: Arc<dyn SignatureProvider>,
        submitter: S,
        block_size: usize,
    ) -> Self {
        let pending = RollupBlock::new(submitter.next_block_number());
        Self {
            state_machine,
            signer,
            submitter,
            pending: Mutex::new(pending),
            block_size: block_size.max(1),
        }
    }

    pub const fn state_machine(&self) -> &RollupStateMachine {
        &self.state_machine
    }

    pub const fn submitter(&self) -> &S {
        &self.submitter
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// The block being filled.
    pub async fn pending_block(&self) -> RollupBlock {
        self.pending.lock().await.clone()
    }

    pub async fn get_state(&self, address: Address) -> AggregatorResult<StateSnapshot> {
        Ok(self.state_machine.get_state(address).await?)
    }

    /// Applies `signed` and appends its transition to the pending block,
    /// handing the block off once it is full.
    ///
    /// Errors only when the transaction itself is rejected; a failed hand-off
    /// is logged and leaves the block pending.
    pub async fn apply_transaction(
        &self,
        signed: &SignedTransaction,
    ) -> AggregatorResult<StateUpdate> {
        // Held across the apply so transitions land in the order they were
        // applied.
        let mut pending = self.pending.lock().await;
        self.apply_pending(&mut pending, signed).await
    }

    /// Pays the requester `amount` of every token from the aggregator's own
    /// account. Either every token is paid or none is.
    pub async fn request_faucet_funds(
        &self,
        signed: &SignedTransaction,
    ) -> AggregatorResult<Vec<StateUpdate>> {
        let Transaction::FaucetRequest(request) = &signed.transaction else {
            return Err(StateMachineError::InvalidTransactionType(
                signed.transaction.kind().to_string(),
            )
            .into());
        };
        let signer = self.state_machine.recover_signer(signed)?;
        if signer != request.sender {
            return Err(StateMachineError::SignatureMismatch {
                signer,
                sender: request.sender,
            }
            .into());
        }
        if request.amount == 0 {
            return Err(StateMachineError::NegativeAmount.into());
        }

        let mut pending = self.pending.lock().await;
        self.check_faucet(request.sender, request.amount).await?;

        debug!(
            "faucet request for {} of each token from {:?}",
            request.amount, request.sender
        );
        let mut updates = Vec::with_capacity(TokenType::ALL.len());
        for token in TokenType::ALL {
            let payout: Transaction = Transfer {
                sender: self.signer.address(),
                recipient: request.sender,
                token_type: token.into(),
                amount: request.amount,
            }
            .into();
            let signature = self.signer.sign(&payout.encode())?;
            let payout = SignedTransaction::new(signature, payout);
            updates.push(self.apply_pending(&mut pending, &payout).await?);
        }
        Ok(updates)
    }

    /// Hands the pending block off even if it is not full. Returns the number
    /// of the submitted block, or `None` if there was nothing to submit.
    pub async fn submit_pending_block(&self) -> AggregatorResult<Option<u64>> {
        let mut pending = self.pending.lock().await;
        self.flush(&mut pending).await
    }

    async fn apply_pending(
        &self,
        pending: &mut RollupBlock,
        signed: &SignedTransaction,
    ) -> AggregatorResult<StateUpdate> {
        let update = self.state_machine.apply_transaction(signed).await?;
        pending
            .transitions
            .push(RollupTransition::from_update(signed, &update)?);

        if pending.len() >= self.block_size {
            if let Err(e) = self.flush(pending).await {
                warn!(
                    "block {} stays pending with {} transitions: {e}",
                    pending.block_number,
                    pending.len()
                );
            }
        }
        Ok(update)
    }

    /// Both payouts of a faucet request must go through before the first is
    /// applied.
    async fn check_faucet(&self, recipient: Address, amount: u64) -> AggregatorResult<()> {
        let aggregator = self.signer.address();
        let funds = self
            .state_machine
            .get_state(aggregator)
            .await?
            .state
            .map(|state| state.balances)
            .unwrap_or_default();
        let held = self
            .state_machine
            .get_state(recipient)
            .await?
            .state
            .map(|state| state.balances)
            .unwrap_or_default();

        for token in TokenType::ALL {
            let balance = funds.get(token);
            if balance < amount {
                return Err(AggregatorError::FaucetEmpty {
                    aggregator,
                    token: token.into(),
                    balance,
                    requested: amount,
                });
            }
            if recipient != aggregator && held.get(token).checked_add(amount).is_none() {
                return Err(StateMachineError::BalanceOverflow.into());
            }
        }
        Ok(())
    }

    async fn flush(&self, pending: &mut RollupBlock) -> AggregatorResult<Option<u64>> {
        if pending.is_empty() {
            return Ok(None);
        }
        let block_number = pending.block_number;
        self.submitter.submit_block(pending.clone()).await?;
        info!(
            "submitted block {block_number} with {} transitions",
            pending.len()
        );
        *pending = RollupBlock::new(block_number + 1);
        Ok(Some(block_number))
    }
}
