use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use rollup_common::{BatchOp, Bucket, DbError, KvStore, KvStoreExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::block::RollupBlock;
use crate::error::{SubmitterError, SubmitterResult};

/// Where aggregated blocks go.
pub trait BlockSubmitter: Send + Sync {
    /// The block number the next [`BlockSubmitter::submit_block`] must carry.
    fn next_block_number(&self) -> u64;

    fn submit_block(&self, block: RollupBlock) -> impl Future<Output = SubmitterResult<()>> + Send;
}

pub const SUBMITTER_PREFIX: &[u8] = b"rollup_block_submitter/";

const BLOCKS_PREFIX: &[u8] = b"blocks/";
const LAST_QUEUED_KEY: &[u8] = b"last_queued";
const LAST_SUBMITTED_KEY: &[u8] = b"last_submitted";
const LAST_CONFIRMED_KEY: &[u8] = b"last_confirmed";

/// Block numbers the queue has reached. Block numbers start at 1, so 0 means
/// nothing yet.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct SubmissionCounters {
    pub last_queued: u64,
    pub last_submitted: u64,
    pub last_confirmed: u64,
}

/// Queues blocks until they are confirmed on chain.
///
/// Blocks must arrive in sequence. A block stays queued until it is
/// confirmed; the counters and the queue survive restarts.
#[derive(Debug)]
pub struct QueuedBlockSubmitter {
    meta: Bucket,
    blocks: Bucket,
    counters: Mutex<SubmissionCounters>,
}

impl QueuedBlockSubmitter {
    pub fn new(store: Arc<dyn KvStore>) -> SubmitterResult<Self> {
        let meta = store.bucket(SUBMITTER_PREFIX);
        let counters = SubmissionCounters {
            last_queued: read_counter(&meta, LAST_QUEUED_KEY)?,
            last_submitted: read_counter(&meta, LAST_SUBMITTED_KEY)?,
            last_confirmed: read_counter(&meta, LAST_CONFIRMED_KEY)?,
        };
        if counters.last_queued > 0 {
            info!(
                "recovered block queue: queued {}, submitted {}, confirmed {}",
                counters.last_queued, counters.last_submitted, counters.last_confirmed
            );
        }

        Ok(Self {
            blocks: meta.bucket(BLOCKS_PREFIX),
            meta,
            counters: Mutex::new(counters),
        })
    }

    pub fn counters(&self) -> SubmissionCounters {
        *self.counters.lock()
    }

    /// A queued, not yet confirmed block.
    pub fn get_block(&self, block_number: u64) -> SubmitterResult<Option<RollupBlock>> {
        Ok(self
            .blocks
            .get(&block_number.to_be_bytes())?
            .map(|bytes| rlp::decode(&bytes))
            .transpose()?)
    }

    /// The queued block after the last submitted one.
    pub fn next_block_to_submit(&self) -> SubmitterResult<Option<RollupBlock>> {
        let counters = self.counters();
        if counters.last_submitted >= counters.last_queued {
            return Ok(None);
        }
        self.get_block(counters.last_submitted + 1)
    }

    fn queue_block(&self, block: &RollupBlock) -> SubmitterResult<()> {
        let mut counters = self.counters.lock();
        let expected = counters.last_queued + 1;
        if block.block_number != expected {
            return Err(SubmitterError::OutOfOrder {
                expected,
                got: block.block_number,
            });
        }

        self.blocks
            .put(&block.block_number.to_be_bytes(), &rlp::encode(block))?;
        self.meta
            .put(LAST_QUEUED_KEY, &block.block_number.to_be_bytes())?;
        counters.last_queued = block.block_number;

        debug!(
            block_number = block.block_number,
            "queued block with {} transitions",
            block.len()
        );
        Ok(())
    }

    /// Records that `block_number` was sent on chain. Blocks are submitted in
    /// sequence.
    pub fn mark_submitted(&self, block_number: u64) -> SubmitterResult<()> {
        let mut counters = self.counters.lock();
        check_queued(&counters, block_number)?;
        let expected = counters.last_submitted + 1;
        if block_number != expected {
            return Err(SubmitterError::OutOfOrder {
                expected,
                got: block_number,
            });
        }

        self.meta
            .put(LAST_SUBMITTED_KEY, &block_number.to_be_bytes())?;
        counters.last_submitted = block_number;
        debug!("block {block_number} submitted");
        Ok(())
    }

    /// Records that every block up to `block_number` is final and drops them
    /// from the queue. Stale confirmations are ignored.
    pub fn handle_block_confirmed(&self, block_number: u64) -> SubmitterResult<()> {
        let mut counters = self.counters.lock();
        check_queued(&counters, block_number)?;
        if block_number <= counters.last_confirmed {
            debug!("ignoring stale confirmation of block {block_number}");
            return Ok(());
        }

        let last_submitted = counters.last_submitted.max(block_number);
        let confirmed = (counters.last_confirmed + 1..=block_number)
            .map(|n| BatchOp::del(n.to_be_bytes()))
            .collect();
        self.blocks.batch(confirmed)?;
        self.meta.batch(vec![
            BatchOp::put(LAST_SUBMITTED_KEY, last_submitted.to_be_bytes().to_vec()),
            BatchOp::put(LAST_CONFIRMED_KEY, block_number.to_be_bytes().to_vec()),
        ])?;
        counters.last_submitted = last_submitted;
        counters.last_confirmed = block_number;

        info!("block {block_number} confirmed");
        Ok(())
    }
}

impl BlockSubmitter for QueuedBlockSubmitter {
    fn next_block_number(&self) -> u64 {
        self.counters.lock().last_queued + 1
    }

    async fn submit_block(&self, block: RollupBlock) -> SubmitterResult<()> {
        self.queue_block(&block)
    }
}

fn check_queued(counters: &SubmissionCounters, block_number: u64) -> SubmitterResult<()> {
    if block_number == 0 || block_number > counters.last_queued {
        return Err(SubmitterError::NotQueued {
            block: block_number,
            last_queued: counters.last_queued,
        });
    }
    Ok(())
}

fn read_counter(bucket: &Bucket, key: &[u8]) -> SubmitterResult<u64> {
    match bucket.get(key)? {
        Some(bytes) => {
            let bytes = <[u8; 8]>::try_from(bytes.as_slice())
                .map_err(|_| DbError::corrupted(key, "not a big-endian u64"))?;
            Ok(u64::from_be_bytes(bytes))
        }
        None => Ok(0),
    }
}

#[cfg(test)]
mod tests {
    use ethereum_types::H256;
    use rollup_common::MemoryDb;

    use super::*;
    use crate::transition::{RollupTransition, TransferTransition};

    fn block(block_number: u64) -> RollupBlock {
        RollupBlock {
            block_number,
            transitions: vec![RollupTransition::Transfer(TransferTransition {
                state_root: H256::from_low_u64_be(block_number),
                sender_slot_index: 0,
                recipient_slot_index: 1,
                token_type: 0,
                amount: 1,
                signature: vec![],
            })],
        }
    }

    fn submitter() -> QueuedBlockSubmitter {
        QueuedBlockSubmitter::new(Arc::new(MemoryDb::new())).unwrap()
    }

    #[tokio::test]
    async fn blocks_are_queued_in_sequence() {
        let submitter = submitter();
        submitter.submit_block(block(1)).await.unwrap();
        submitter.submit_block(block(2)).await.unwrap();

        assert_eq!(
            submitter.submit_block(block(4)).await.unwrap_err(),
            SubmitterError::OutOfOrder {
                expected: 3,
                got: 4
            }
        );
        assert_eq!(
            submitter.submit_block(block(2)).await.unwrap_err(),
            SubmitterError::OutOfOrder {
                expected: 3,
                got: 2
            }
        );
        assert_eq!(submitter.counters().last_queued, 2);
        assert_eq!(submitter.next_block_number(), 3);
        assert_eq!(submitter.get_block(2).unwrap(), Some(block(2)));
    }

    #[tokio::test]
    async fn submit_then_confirm() {
        let submitter = submitter();
        for n in 1..=3 {
            submitter.submit_block(block(n)).await.unwrap();
        }

        assert_eq!(submitter.next_block_to_submit().unwrap(), Some(block(1)));
        submitter.mark_submitted(1).unwrap();
        assert_eq!(submitter.next_block_to_submit().unwrap(), Some(block(2)));
        assert_eq!(
            submitter.mark_submitted(3).unwrap_err(),
            SubmitterError::OutOfOrder {
                expected: 2,
                got: 3
            }
        );
        assert_eq!(
            submitter.mark_submitted(4).unwrap_err(),
            SubmitterError::NotQueued {
                block: 4,
                last_queued: 3
            }
        );

        // Confirming block 2 confirms everything before it as well.
        submitter.handle_block_confirmed(2).unwrap();
        assert_eq!(
            submitter.counters(),
            SubmissionCounters {
                last_queued: 3,
                last_submitted: 2,
                last_confirmed: 2,
            }
        );
        assert_eq!(submitter.get_block(1).unwrap(), None);
        assert_eq!(submitter.get_block(2).unwrap(), None);
        assert_eq!(submitter.next_block_to_submit().unwrap(), Some(block(3)));

        submitter.handle_block_confirmed(1).unwrap();
        assert_eq!(submitter.counters().last_confirmed, 2);
    }

    #[tokio::test]
    async fn counters_survive_a_restart() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryDb::new());
        {
            let submitter = QueuedBlockSubmitter::new(store.clone()).unwrap();
            for n in 1..=3 {
                submitter.submit_block(block(n)).await.unwrap();
            }
            submitter.mark_submitted(1).unwrap();
            submitter.handle_block_confirmed(1).unwrap();
        }

        let submitter = QueuedBlockSubmitter::new(store).unwrap();
        assert_eq!(
            submitter.counters(),
            SubmissionCounters {
                last_queued: 3,
                last_submitted: 1,
                last_confirmed: 1,
            }
        );
        assert_eq!(submitter.next_block_to_submit().unwrap(), Some(block(2)));
        submitter.submit_block(block(4)).await.unwrap();
    }

    #[test]
    fn nothing_to_confirm_before_queueing() {
        let submitter = submitter();
        assert_eq!(submitter.next_block_to_submit().unwrap(), None);
        assert_eq!(
            submitter.handle_block_confirmed(1).unwrap_err(),
            SubmitterError::NotQueued {
                block: 1,
                last_queued: 0
            }
        );
    }
}
