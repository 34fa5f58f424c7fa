//! The rollup state machine.
//!
//! Every account owns one slot of a sparse Merkle tree; the slot's leaf is
//! the RLP of its [`AccountState`]. Slots are handed out sequentially the
//! first time an address receives anything, and the address-to-slot map is
//! persisted next to the tree so a restarted instance picks up where it left
//! off.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use ethereum_types::{Address, H256, U256};
use rlp_derive::{RlpDecodable, RlpEncodable};
use rollup_common::{BatchOp, Bucket, DbError, KvStore, KvStoreExt};
use serde::{Deserialize, Serialize};
use smt_trie::{Smt, SparseMerkleProof, EMPTY_LEAF};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{StateMachineError, StateMachineResult};
use crate::signatures::SignatureVerifier;
use crate::transaction::{SignedTransaction, Swap, Transaction, Transfer};
use crate::types::{AccountState, StateSnapshot, StateUpdate, TokenType};

/// Bucket holding the root, the allocation cursor and the address map.
pub const STATE_MACHINE_PREFIX: &[u8] = b"rollup_state_machine/";
/// Bucket holding the state tree's nodes.
pub const STATE_TREE_PREFIX: &[u8] = b"rollup_state_tree/";

const ROOT_KEY: &[u8] = b"root";
const LAST_OPEN_KEY: &[u8] = b"last_open_key";
const ADDRESS_TO_KEYS_COUNT_KEY: &[u8] = b"address_to_keys_count";

/// Slot indices are `u64`s, so `2^height` must fit one.
pub const MAX_TREE_HEIGHT: usize = 63;

const BASIS_POINTS: u64 = 10_000;

fn addr_idx_key(i: u64) -> Vec<u8> {
    format!("addr_idx_{i}").into_bytes()
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct StateMachineConfig {
    pub fee_basis_points: u64,
    pub tree_height: usize,
    /// The account holding the swap pool's reserves.
    pub uniswap_address: Address,
    /// May sign transactions on behalf of any sender. The zero address
    /// grants this to nobody.
    pub aggregator_address: Address,
}

impl StateMachineConfig {
    fn may_sign_for(&self, signer: Address, sender: Address) -> bool {
        signer == sender
            || (!self.aggregator_address.is_zero() && signer == self.aggregator_address)
    }
}

/// A persisted entry of the address map.
#[derive(Debug, RlpEncodable, RlpDecodable)]
struct AddressSlot {
    address: Address,
    slot_index: u64,
}

#[derive(Debug)]
pub struct RollupStateMachine {
    config: StateMachineConfig,
    verifier: Arc<dyn SignatureVerifier>,
    state: Mutex<SlotState>,
}

/// Everything guarded by the state machine's lock.
#[derive(Debug)]
struct SlotState {
    tree: Smt<Bucket>,
    meta: Bucket,
    slots: HashMap<Address, u64>,
    addresses: BTreeMap<u64, Address>,
    last_open_key: u64,
    capacity: u64,
}

impl RollupStateMachine {
    /// Opens the state machine persisted in `store`, or seeds a new one with
    /// `genesis` if the store holds none. Genesis accounts get slots in the
    /// order given.
    pub fn create(
        genesis: &[AccountState],
        store: Arc<dyn KvStore>,
        verifier: Arc<dyn SignatureVerifier>,
        config: StateMachineConfig,
    ) -> StateMachineResult<Self> {
        if config.tree_height == 0 || config.tree_height > MAX_TREE_HEIGHT {
            return Err(StateMachineError::InvalidTreeHeight {
                height: config.tree_height,
                max: MAX_TREE_HEIGHT,
            });
        }

        let meta = store.bucket(STATE_MACHINE_PREFIX);
        let tree_db = store.bucket(STATE_TREE_PREFIX);
        let state = match meta.get(ROOT_KEY)? {
            Some(root) => SlotState::recover(meta, tree_db, &root, config.tree_height)?,
            None => SlotState::genesis(meta, tree_db, genesis, config.tree_height)?,
        };

        Ok(Self {
            config,
            verifier,
            state: Mutex::new(state),
        })
    }

    pub const fn config(&self) -> &StateMachineConfig {
        &self.config
    }

    /// Number of slots the state tree holds.
    pub const fn slot_capacity(&self) -> u64 {
        1 << self.config.tree_height
    }

    /// Recovers who signed `signed`'s body.
    pub fn recover_signer(&self, signed: &SignedTransaction) -> StateMachineResult<Address> {
        Ok(self
            .verifier
            .verify_message(&signed.transaction.encode(), &signed.signature)?)
    }

    /// Applies one transaction.
    ///
    /// Rejected transactions leave the state untouched: all checks run before
    /// the first write.
    pub async fn apply_transaction(
        &self,
        signed: &SignedTransaction,
    ) -> StateMachineResult<StateUpdate> {
        let signer = self.recover_signer(signed)?;
        let sender = signed.transaction.sender();
        if !self.config.may_sign_for(signer, sender) {
            return Err(StateMachineError::SignatureMismatch { signer, sender });
        }

        let mut state = self.state.lock().await;
        let result = match &signed.transaction {
            Transaction::Transfer(tx) => state.apply_transfer(tx),
            Transaction::Swap(tx) => state.apply_swap(tx, &self.config),
            Transaction::FaucetRequest(_) => Err(StateMachineError::InvalidTransactionType(
                signed.transaction.kind().to_string(),
            )),
        };

        match &result {
            Ok(update) => debug!(
                "applied {} from slot {} to slot {}, new root {:?}",
                signed.transaction.kind(),
                update.sender_slot_index,
                update.receiver_slot_index,
                update.state_root
            ),
            Err(e) if e.is_semantic() => {
                debug!("rejected {}: {e}", signed.transaction.kind())
            }
            Err(e) => warn!("failed to apply {}: {e}", signed.transaction.kind()),
        }
        result
    }

    pub async fn get_state(&self, address: Address) -> StateMachineResult<StateSnapshot> {
        let state = self.state.lock().await;
        match state.slots.get(&address) {
            Some(slot) => state.snapshot(*slot),
            None => Ok(StateSnapshot {
                address: Some(address),
                slot_index: None,
                state: None,
                state_root: state.tree.root(),
                inclusion_proof: None,
            }),
        }
    }

    /// Snapshot of any slot, allocated or not.
    pub async fn get_state_at_slot(&self, slot_index: u64) -> StateMachineResult<StateSnapshot> {
        self.state.lock().await.snapshot(slot_index)
    }

    pub async fn get_address_from_slot(&self, slot_index: u64) -> Option<Address> {
        self.state.lock().await.addresses.get(&slot_index).copied()
    }

    /// The slot the next new account will get.
    pub async fn next_new_account_slot(&self) -> u64 {
        self.state.lock().await.last_open_key
    }

    pub async fn state_root(&self) -> H256 {
        self.state.lock().await.tree.root()
    }
}

impl SlotState {
    fn genesis(
        meta: Bucket,
        tree_db: Bucket,
        genesis: &[AccountState],
        height: usize,
    ) -> StateMachineResult<Self> {
        let mut state = Self {
            tree: Smt::with_keccak(tree_db, None, height)?,
            meta,
            slots: HashMap::new(),
            addresses: BTreeMap::new(),
            last_open_key: 0,
            capacity: 1 << height,
        };

        for account in genesis {
            let (slot, created) = state.tentative_slot(account.pubkey)?;
            let created = created.then_some(account.pubkey);
            state.commit(created, &[(slot, account)])?;
        }
        // An empty genesis still needs a root on disk to be recoverable.
        state.persist(None)?;

        info!(
            "seeded rollup state with {} genesis accounts, root {:?}",
            genesis.len(),
            state.tree.root()
        );
        Ok(state)
    }

    fn recover(
        meta: Bucket,
        tree_db: Bucket,
        root: &[u8],
        height: usize,
    ) -> StateMachineResult<Self> {
        if root.len() != 32 {
            return Err(DbError::corrupted(ROOT_KEY, "state root is not 32 bytes").into());
        }
        let root = H256::from_slice(root);
        let last_open_key = read_u64(&meta, LAST_OPEN_KEY)?;
        let count = read_u64(&meta, ADDRESS_TO_KEYS_COUNT_KEY)?;

        let mut slots = HashMap::new();
        let mut addresses = BTreeMap::new();
        for i in 0..count {
            let key = addr_idx_key(i);
            let bytes = meta
                .get(&key)?
                .ok_or_else(|| DbError::corrupted(&key, "missing address map entry"))?;
            let entry: AddressSlot = rlp::decode(&bytes)?;
            slots.insert(entry.address, entry.slot_index);
            addresses.insert(entry.slot_index, entry.address);
        }

        info!("recovered rollup state at root {root:?} with {count} accounts");
        Ok(Self {
            tree: Smt::with_keccak(tree_db, Some(root), height)?,
            meta,
            slots,
            addresses,
            last_open_key,
            capacity: 1 << height,
        })
    }

    fn account(&self, address: &Address) -> StateMachineResult<Option<(u64, AccountState)>> {
        let Some(slot) = self.slots.get(address).copied() else {
            return Ok(None);
        };
        Ok(self.read_slot(slot)?.map(|state| (slot, state)))
    }

    fn read_slot(&self, slot: u64) -> StateMachineResult<Option<AccountState>> {
        match self.tree.get_leaf(U256::from(slot))? {
            Some(leaf) => Ok(AccountState::decode(&leaf)?),
            None => Ok(None),
        }
    }

    /// The slot `address` owns, or the one it would get. The `bool` is `true`
    /// when the slot is not yet allocated.
    fn tentative_slot(&self, address: Address) -> StateMachineResult<(u64, bool)> {
        if let Some(slot) = self.slots.get(&address) {
            return Ok((*slot, false));
        }
        if self.last_open_key >= self.capacity {
            return Err(StateMachineError::SlotsExhausted {
                capacity: self.capacity,
            });
        }
        Ok((self.last_open_key, true))
    }

    fn snapshot(&self, slot: u64) -> StateMachineResult<StateSnapshot> {
        let key = U256::from(slot);
        let leaf = self.tree.get_leaf(key)?;
        let state = match &leaf {
            Some(leaf) => AccountState::decode(leaf)?,
            None => None,
        };
        let value = leaf.unwrap_or_else(|| EMPTY_LEAF.to_vec());

        Ok(StateSnapshot {
            address: self.addresses.get(&slot).copied(),
            slot_index: Some(slot),
            state,
            state_root: self.tree.root(),
            inclusion_proof: Some(self.tree.get_merkle_proof(key, &value)?),
        })
    }

    fn apply_transfer(&mut self, tx: &Transfer) -> StateMachineResult<StateUpdate> {
        let token = TokenType::try_from(tx.token_type)?;
        if tx.amount == 0 {
            return Err(StateMachineError::NegativeAmount);
        }

        let (sender_slot, mut sender_state) = self.funded_account(&tx.sender, token, tx.amount)?;
        *sender_state.balances.get_mut(token) -= tx.amount;

        let (recipient_slot, created) = self.tentative_slot(tx.recipient)?;
        let mut recipient_state = if tx.recipient == tx.sender {
            sender_state.clone()
        } else if created {
            AccountState::empty(tx.recipient)
        } else {
            self.read_slot(recipient_slot)?
                .unwrap_or_else(|| AccountState::empty(tx.recipient))
        };
        credit(&mut recipient_state, token, tx.amount)?;
        if tx.recipient == tx.sender {
            sender_state = recipient_state.clone();
        }

        let created_address = created.then_some(tx.recipient);
        self.commit(
            created_address,
            &[
                (sender_slot, &sender_state),
                (recipient_slot, &recipient_state),
            ],
        )?;
        self.state_update(
            (sender_slot, sender_state),
            (recipient_slot, recipient_state),
            created,
        )
    }

    fn apply_swap(
        &mut self,
        tx: &Swap,
        config: &StateMachineConfig,
    ) -> StateMachineResult<StateUpdate> {
        let token = TokenType::try_from(tx.token_type)?;
        if tx.input_amount == 0 {
            return Err(StateMachineError::NegativeAmount);
        }
        if tx.sender == config.uniswap_address {
            return Err(StateMachineError::InvalidTransactionType(
                "Swap sent by the pool account".to_string(),
            ));
        }

        let (sender_slot, mut sender_state) =
            self.funded_account(&tx.sender, token, tx.input_amount)?;
        let (pool_slot, mut pool_state) = self
            .account(&config.uniswap_address)?
            .ok_or(StateMachineError::EmptyReserves)?;

        let output = swap_output(
            pool_state.balances.get(token),
            pool_state.balances.get(token.other()),
            tx.input_amount,
            config.fee_basis_points,
        )?;
        if output < tx.min_output_amount {
            return Err(StateMachineError::Slippage {
                output,
                min_output: tx.min_output_amount,
            });
        }

        *sender_state.balances.get_mut(token) -= tx.input_amount;
        credit(&mut sender_state, token.other(), output)?;
        credit(&mut pool_state, token, tx.input_amount)?;
        // `swap_output` never returns more than the output reserve.
        *pool_state.balances.get_mut(token.other()) -= output;

        self.commit(None, &[(sender_slot, &sender_state), (pool_slot, &pool_state)])?;
        self.state_update((sender_slot, sender_state), (pool_slot, pool_state), false)
    }

    /// The sender's slot and state, provided it holds at least `amount` of
    /// `token`.
    fn funded_account(
        &self,
        address: &Address,
        token: TokenType,
        amount: u64,
    ) -> StateMachineResult<(u64, AccountState)> {
        let account = self.account(address)?;
        let balance = account
            .as_ref()
            .map_or(0, |(_, state)| state.balances.get(token));
        match account {
            Some(account) if balance >= amount => Ok(account),
            _ => Err(StateMachineError::InsufficientBalance {
                address: *address,
                token: token.as_u8(),
                balance,
                requested: amount,
            }),
        }
    }

    /// Writes `accounts` to the tree, allocating the next slot for `created`
    /// first, and persists the metadata.
    fn commit(
        &mut self,
        created: Option<Address>,
        accounts: &[(u64, &AccountState)],
    ) -> StateMachineResult<()> {
        let new_entry = created.map(|address| {
            let slot_index = self.last_open_key;
            self.slots.insert(address, slot_index);
            self.addresses.insert(slot_index, address);
            self.last_open_key += 1;
            AddressSlot {
                address,
                slot_index,
            }
        });

        for (slot, state) in accounts {
            self.set_address_state(*slot, state)?;
        }
        self.persist(new_entry)
    }

    fn set_address_state(&mut self, slot: u64, state: &AccountState) -> StateMachineResult<()> {
        if !self.tree.update(U256::from(slot), &state.encode())? {
            return Err(StateMachineError::IncompleteTree(slot));
        }
        Ok(())
    }

    fn persist(&self, new_entry: Option<AddressSlot>) -> StateMachineResult<()> {
        let count = self.slots.len() as u64;
        let mut ops = vec![
            BatchOp::put(ROOT_KEY, self.tree.root().as_bytes().to_vec()),
            BatchOp::put(LAST_OPEN_KEY, self.last_open_key.to_be_bytes().to_vec()),
            BatchOp::put(ADDRESS_TO_KEYS_COUNT_KEY, count.to_be_bytes().to_vec()),
        ];
        if let Some(entry) = new_entry {
            ops.push(BatchOp::put(
                addr_idx_key(count - 1),
                rlp::encode(&entry).to_vec(),
            ));
        }
        Ok(self.meta.batch(ops)?)
    }

    fn state_update(
        &self,
        (sender_slot, sender_state): (u64, AccountState),
        (receiver_slot, receiver_state): (u64, AccountState),
        receiver_created: bool,
    ) -> StateMachineResult<StateUpdate> {
        let sender_proof = self.proof(sender_slot, &sender_state)?;
        let receiver_proof = self.proof(receiver_slot, &receiver_state)?;
        Ok(StateUpdate {
            sender_slot_index: sender_slot,
            receiver_slot_index: receiver_slot,
            sender_state,
            receiver_state,
            state_root: self.tree.root(),
            sender_state_inclusion_proof: sender_proof,
            receiver_state_inclusion_proof: receiver_proof,
            receiver_created,
        })
    }

    fn proof(&self, slot: u64, state: &AccountState) -> StateMachineResult<SparseMerkleProof> {
        Ok(self
            .tree
            .get_merkle_proof(U256::from(slot), &state.encode())?)
    }
}

fn credit(state: &mut AccountState, token: TokenType, amount: u64) -> StateMachineResult<()> {
    let balance = state.balances.get_mut(token);
    *balance = balance
        .checked_add(amount)
        .ok_or(StateMachineError::BalanceOverflow)?;
    Ok(())
}

fn read_u64(bucket: &Bucket, key: &[u8]) -> StateMachineResult<u64> {
    let bytes = bucket
        .get(key)?
        .ok_or_else(|| DbError::corrupted(key, "missing"))?;
    let bytes = <[u8; 8]>::try_from(bytes.as_slice())
        .map_err(|_| DbError::corrupted(key, "not a big-endian u64"))?;
    Ok(u64::from_be_bytes(bytes))
}

/// Constant-product swap pricing.
///
/// The fee is taken from the input before pricing, and the new output
/// reserve is rounded up, so the reserve product never decreases.
pub fn swap_output(
    input_reserve: u64,
    output_reserve: u64,
    input_amount: u64,
    fee_basis_points: u64,
) -> StateMachineResult<u64> {
    if input_reserve == 0 || output_reserve == 0 {
        return Err(StateMachineError::EmptyReserves);
    }
    let k = u128::from(input_reserve) * u128::from(output_reserve);
    let input_after_fee = u128::from(input_amount)
        * u128::from(BASIS_POINTS.saturating_sub(fee_basis_points))
        / u128::from(BASIS_POINTS);
    let new_output_reserve = k.div_ceil(u128::from(input_reserve) + input_after_fee);
    let new_output_reserve =
        u64::try_from(new_output_reserve).map_err(|_| StateMachineError::BalanceOverflow)?;
    Ok(output_reserve - new_output_reserve)
}

#[cfg(test)]
mod tests {
    use rand::{thread_rng, Rng};
    use rollup_common::MemoryDb;

    use super::*;
    use crate::signatures::{IdentitySigner, IdentityVerifier, SignatureProvider};
    use crate::transaction::FaucetRequest;
    use crate::types::Balances;

    fn alice() -> Address {
        Address::repeat_byte(0xa1)
    }

    fn bob() -> Address {
        Address::repeat_byte(0xb0)
    }

    fn pool() -> Address {
        Address::repeat_byte(0x99)
    }

    fn aggregator() -> Address {
        Address::repeat_byte(0xaa)
    }

    fn config(tree_height: usize) -> StateMachineConfig {
        StateMachineConfig {
            fee_basis_points: 30,
            tree_height,
            uniswap_address: pool(),
            aggregator_address: aggregator(),
        }
    }

    fn genesis() -> Vec<AccountState> {
        vec![
            AccountState::new(alice(), Balances::new(50, 50)),
            AccountState::new(pool(), Balances::new(50, 50)),
        ]
    }

    fn machine_on(store: Arc<dyn KvStore>, tree_height: usize) -> RollupStateMachine {
        RollupStateMachine::create(
            &genesis(),
            store,
            Arc::new(IdentityVerifier),
            config(tree_height),
        )
        .unwrap()
    }

    fn machine() -> RollupStateMachine {
        machine_on(Arc::new(MemoryDb::new()), 16)
    }

    fn signed(signer: Address, tx: impl Into<Transaction>) -> SignedTransaction {
        let tx = tx.into();
        let signature = IdentitySigner::new(signer).sign(&tx.encode()).unwrap();
        SignedTransaction::new(signature, tx)
    }

    fn transfer(from: Address, to: Address, token_type: u8, amount: u64) -> SignedTransaction {
        signed(
            from,
            Transfer {
                sender: from,
                recipient: to,
                token_type,
                amount,
            },
        )
    }

    fn swap(
        from: Address,
        token_type: u8,
        input_amount: u64,
        min_output: u64,
    ) -> SignedTransaction {
        signed(
            from,
            Swap {
                sender: from,
                token_type,
                input_amount,
                min_output_amount: min_output,
                timeout: u64::MAX,
            },
        )
    }

    #[tokio::test]
    async fn genesis_allocates_sequential_slots() {
        let sm = machine();

        assert_eq!(sm.get_state(alice()).await.unwrap().slot_index, Some(0));
        assert_eq!(sm.get_state(pool()).await.unwrap().slot_index, Some(1));
        assert_eq!(sm.get_address_from_slot(1).await, Some(pool()));
        assert_eq!(sm.next_new_account_slot().await, 2);

        let missing = sm.get_state(bob()).await.unwrap();
        assert_eq!(missing.slot_index, None);
        assert_eq!(missing.state, None);
        assert_eq!(missing.state_root, sm.state_root().await);
    }

    #[tokio::test]
    async fn transfer_creates_the_recipient() {
        let sm = machine();
        let update = sm
            .apply_transaction(&transfer(alice(), bob(), 0, 5))
            .await
            .unwrap();

        assert!(update.receiver_created);
        assert_eq!(update.receiver_slot_index, 2);
        assert_eq!(update.sender_state.balances, Balances::new(45, 50));
        assert_eq!(update.receiver_state.balances, Balances::new(5, 0));
        assert!(update.sender_state_inclusion_proof.verify(rollup_common::keccak256));
        assert!(update.receiver_state_inclusion_proof.verify(rollup_common::keccak256));
        assert_eq!(update.state_root, sm.state_root().await);
        assert_eq!(sm.next_new_account_slot().await, 3);

        // Paying Bob again reuses his slot.
        let again = sm
            .apply_transaction(&transfer(alice(), bob(), 1, 2))
            .await
            .unwrap();
        assert!(!again.receiver_created);
        assert_eq!(again.receiver_state.balances, Balances::new(5, 2));
    }

    #[tokio::test]
    async fn rejections_leave_the_state_untouched() {
        let sm = machine();
        let root = sm.state_root().await;

        let cases = [
            (transfer(alice(), bob(), 0, 0), StateMachineError::NegativeAmount),
            (
                transfer(alice(), bob(), 0, 51),
                StateMachineError::InsufficientBalance {
                    address: alice(),
                    token: 0,
                    balance: 50,
                    requested: 51,
                },
            ),
            (
                transfer(bob(), alice(), 1, 1),
                StateMachineError::InsufficientBalance {
                    address: bob(),
                    token: 1,
                    balance: 0,
                    requested: 1,
                },
            ),
            (
                transfer(alice(), bob(), 7, 1),
                StateMachineError::InvalidTokenType(7),
            ),
            (swap(alice(), 0, 10, 8), StateMachineError::Slippage {
                output: 7,
                min_output: 8,
            }),
        ];
        for (tx, expected) in cases {
            let err = sm.apply_transaction(&tx).await.unwrap_err();
            assert!(err.is_semantic());
            assert_eq!(err, expected);
        }

        assert_eq!(sm.state_root().await, root);
        assert_eq!(sm.next_new_account_slot().await, 2);
    }

    #[tokio::test]
    async fn signer_must_be_sender_or_aggregator() {
        let sm = RollupStateMachine::create(
            &[
                AccountState::new(alice(), Balances::new(50, 50)),
                AccountState::new(aggregator(), Balances::new(100, 100)),
            ],
            Arc::new(MemoryDb::new()),
            Arc::new(IdentityVerifier),
            config(8),
        )
        .unwrap();

        let tx = Transfer {
            sender: alice(),
            recipient: bob(),
            token_type: 0,
            amount: 1,
        };
        assert_eq!(
            sm.apply_transaction(&signed(bob(), tx.clone()))
                .await
                .unwrap_err(),
            StateMachineError::SignatureMismatch {
                signer: bob(),
                sender: alice()
            }
        );
        sm.apply_transaction(&signed(aggregator(), tx)).await.unwrap();
    }

    #[tokio::test]
    async fn zero_aggregator_signs_for_nobody() {
        let sm = RollupStateMachine::create(
            &genesis(),
            Arc::new(MemoryDb::new()),
            Arc::new(IdentityVerifier),
            StateMachineConfig {
                aggregator_address: Address::zero(),
                ..config(8)
            },
        )
        .unwrap();

        let forged = signed(
            Address::zero(),
            Transfer {
                sender: alice(),
                recipient: bob(),
                token_type: 0,
                amount: 1,
            },
        );
        assert_eq!(
            sm.apply_transaction(&forged).await.unwrap_err(),
            StateMachineError::SignatureMismatch {
                signer: Address::zero(),
                sender: alice()
            }
        );
        assert_eq!(
            sm.get_state(alice()).await.unwrap().state.unwrap().balances,
            Balances::new(50, 50)
        );
    }

    #[tokio::test]
    async fn faucet_requests_are_not_applied() {
        let sm = machine();
        let tx = signed(
            alice(),
            FaucetRequest {
                sender: alice(),
                amount: 10,
            },
        );
        assert!(matches!(
            sm.apply_transaction(&tx).await,
            Err(StateMachineError::InvalidTransactionType(_))
        ));
    }

    #[tokio::test]
    async fn swap_moves_both_reserves() {
        let sm = machine();
        let update = sm.apply_transaction(&swap(alice(), 0, 10, 7)).await.unwrap();

        assert_eq!(update.receiver_slot_index, 1);
        assert!(!update.receiver_created);
        assert_eq!(update.sender_state.balances, Balances::new(40, 57));
        assert_eq!(update.receiver_state.balances, Balances::new(60, 43));
    }

    #[tokio::test]
    async fn swap_never_shrinks_the_reserve_product() {
        let mut rng = thread_rng();
        let sm = RollupStateMachine::create(
            &[
                AccountState::new(alice(), Balances::new(1_000_000, 1_000_000)),
                AccountState::new(pool(), Balances::new(500_000, 800_000)),
            ],
            Arc::new(MemoryDb::new()),
            Arc::new(IdentityVerifier),
            config(8),
        )
        .unwrap();

        for _ in 0..50 {
            let before = sm.get_state(pool()).await.unwrap().state.unwrap().balances;
            let token = rng.gen_range(0..2u8);
            let input = rng.gen_range(1..5_000);
            sm.apply_transaction(&swap(alice(), token, input, 0))
                .await
                .unwrap();
            let after = sm.get_state(pool()).await.unwrap().state.unwrap().balances;

            let k = |b: Balances| u128::from(b.uni) * u128::from(b.pigi);
            assert!(k(after) >= k(before));
        }
    }

    #[test]
    fn swap_pricing() {
        assert_eq!(swap_output(50, 50, 10, 30).unwrap(), 7);
        assert_eq!(swap_output(50, 50, 10, 0).unwrap(), 8);
        // Everything disappears into the fee.
        assert_eq!(swap_output(50, 50, 1, 30).unwrap(), 0);
        assert_eq!(
            swap_output(0, 50, 10, 30).unwrap_err(),
            StateMachineError::EmptyReserves
        );
    }

    #[tokio::test]
    async fn pool_cannot_swap_with_itself() {
        let sm = machine();
        assert!(matches!(
            sm.apply_transaction(&swap(pool(), 0, 1, 0)).await,
            Err(StateMachineError::InvalidTransactionType(_))
        ));
    }

    #[tokio::test]
    async fn self_transfer_keeps_the_balance() {
        let sm = machine();
        let update = sm
            .apply_transaction(&transfer(alice(), alice(), 0, 10))
            .await
            .unwrap();
        assert_eq!(update.sender_slot_index, update.receiver_slot_index);
        assert_eq!(update.sender_state.balances, Balances::new(50, 50));
        assert_eq!(update.receiver_state, update.sender_state);
    }

    #[tokio::test]
    async fn slot_capacity_is_enforced() {
        // Height 1 holds two accounts, both taken by genesis.
        let sm = machine_on(Arc::new(MemoryDb::new()), 1);
        assert_eq!(sm.slot_capacity(), 2);
        assert_eq!(
            sm.apply_transaction(&transfer(alice(), bob(), 0, 1))
                .await
                .unwrap_err(),
            StateMachineError::SlotsExhausted { capacity: 2 }
        );
    }

    #[test]
    fn tree_height_is_bounded() {
        for height in [0, 64] {
            assert!(matches!(
                RollupStateMachine::create(
                    &genesis(),
                    Arc::new(MemoryDb::new()),
                    Arc::new(IdentityVerifier),
                    config(height),
                ),
                Err(StateMachineError::InvalidTreeHeight { .. })
            ));
        }
    }

    #[tokio::test]
    async fn restart_recovers_instead_of_reseeding() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryDb::new());
        let root = {
            let sm = machine_on(store.clone(), 16);
            sm.apply_transaction(&transfer(alice(), bob(), 0, 5))
                .await
                .unwrap();
            sm.state_root().await
        };

        let sm = machine_on(store, 16);
        assert_eq!(sm.state_root().await, root);
        assert_eq!(sm.next_new_account_slot().await, 3);
        assert_eq!(
            sm.get_state(bob()).await.unwrap().state.unwrap().balances,
            Balances::new(5, 0)
        );

        // New accounts keep getting fresh slots.
        let carol = Address::repeat_byte(0xc0);
        let update = sm
            .apply_transaction(&transfer(bob(), carol, 0, 1))
            .await
            .unwrap();
        assert_eq!(update.receiver_slot_index, 3);
    }

    #[tokio::test]
    async fn snapshot_of_an_empty_slot_proves_the_empty_leaf() {
        let sm = machine();
        let snapshot = sm.get_state_at_slot(9).await.unwrap();

        assert_eq!(snapshot.address, None);
        assert_eq!(snapshot.state, None);
        let proof = snapshot.inclusion_proof.unwrap();
        assert_eq!(proof.value, EMPTY_LEAF);
        assert!(proof.verify(rollup_common::keccak256));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_transactions_are_serialized() {
        const SENDS: u64 = 20;
        let sm = Arc::new(machine());

        let mut writers = tokio::task::JoinSet::new();
        let mut readers = tokio::task::JoinSet::new();
        for i in 0..SENDS {
            let writer = sm.clone();
            writers.spawn(async move {
                let recipient = Address::from_low_u64_be(0x1000 + i);
                writer.apply_transaction(&transfer(alice(), recipient, 0, 1)).await
            });
            let reader = sm.clone();
            readers.spawn(async move {
                let snapshot = reader.get_state(alice()).await.unwrap();
                let proof = snapshot.inclusion_proof.unwrap();
                assert_eq!(proof.root_hash, snapshot.state_root);
                assert!(proof.verify(rollup_common::keccak256));
            });
        }
        while let Some(joined) = readers.join_next().await {
            joined.unwrap();
        }

        let mut updates = Vec::new();
        while let Some(joined) = writers.join_next().await {
            let update = joined.unwrap().unwrap();
            assert!(update.receiver_created);
            assert!(update.sender_state_inclusion_proof.verify(rollup_common::keccak256));
            assert!(update.receiver_state_inclusion_proof.verify(rollup_common::keccak256));
            assert_eq!(update.sender_state_inclusion_proof.root_hash, update.state_root);
            assert_eq!(update.receiver_state_inclusion_proof.root_hash, update.state_root);
            updates.push(update);
        }

        // Slots are handed out in lock order, and each transfer saw the
        // balance the one before it left behind.
        updates.sort_by_key(|update| update.receiver_slot_index);
        let slots: Vec<_> = updates.iter().map(|u| u.receiver_slot_index).collect();
        assert_eq!(slots, (2..2 + SENDS).collect::<Vec<_>>());
        let uni: Vec<_> = updates.iter().map(|u| u.sender_state.balances.uni).collect();
        assert_eq!(uni, (50 - SENDS..50).rev().collect::<Vec<_>>());

        let alice_state = sm.get_state(alice()).await.unwrap().state.unwrap();
        assert_eq!(alice_state.balances, Balances::new(50 - SENDS, 50));
        for i in 0..SENDS {
            let snapshot = sm.get_state(Address::from_low_u64_be(0x1000 + i)).await.unwrap();
            assert_eq!(snapshot.state.unwrap().balances, Balances::new(1, 0));
        }
        assert_eq!(sm.next_new_account_slot().await, 2 + SENDS);
    }
}
