//! User transactions.
//!
//! Every transaction body encodes as the RLP list `[kind, fields...]`; that
//! encoding is what gets signed.

use ethereum_types::Address;
use rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct Transfer {
    pub sender: Address,
    pub recipient: Address,
    /// Raw token discriminant, validated when the transaction is applied.
    pub token_type: u8,
    pub amount: u64,
}

#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct Swap {
    pub sender: Address,
    /// The token being sold.
    pub token_type: u8,
    pub input_amount: u64,
    pub min_output_amount: u64,
    pub timeout: u64,
}

/// Asks the aggregator for funds. Never applied by the state machine
/// directly.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct FaucetRequest {
    pub sender: Address,
    pub amount: u64,
}

#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Transaction {
    Transfer(Transfer),
    Swap(Swap),
    FaucetRequest(FaucetRequest),
}

impl Transaction {
    const TRANSFER: u8 = 0;
    const SWAP: u8 = 1;
    const FAUCET_REQUEST: u8 = 2;

    pub const fn sender(&self) -> Address {
        match self {
            Transaction::Transfer(tx) => tx.sender,
            Transaction::Swap(tx) => tx.sender,
            Transaction::FaucetRequest(tx) => tx.sender,
        }
    }

    pub const fn kind(&self) -> &'static str {
        match self {
            Transaction::Transfer(_) => "Transfer",
            Transaction::Swap(_) => "Swap",
            Transaction::FaucetRequest(_) => "FaucetRequest",
        }
    }

    /// The bytes a sender signs.
    pub fn encode(&self) -> Vec<u8> {
        rlp::encode(self).to_vec()
    }
}

impl From<Transfer> for Transaction {
    fn from(tx: Transfer) -> Self {
        Transaction::Transfer(tx)
    }
}

impl From<Swap> for Transaction {
    fn from(tx: Swap) -> Self {
        Transaction::Swap(tx)
    }
}

impl From<FaucetRequest> for Transaction {
    fn from(tx: FaucetRequest) -> Self {
        Transaction::FaucetRequest(tx)
    }
}

impl Encodable for Transaction {
    fn rlp_append(&self, s: &mut RlpStream) {
        match self {
            Transaction::Transfer(tx) => {
                s.begin_list(5)
                    .append(&Self::TRANSFER)
                    .append(&tx.sender)
                    .append(&tx.recipient)
                    .append(&tx.token_type)
                    .append(&tx.amount);
            }
            Transaction::Swap(tx) => {
                s.begin_list(6)
                    .append(&Self::SWAP)
                    .append(&tx.sender)
                    .append(&tx.token_type)
                    .append(&tx.input_amount)
                    .append(&tx.min_output_amount)
                    .append(&tx.timeout);
            }
            Transaction::FaucetRequest(tx) => {
                s.begin_list(3)
                    .append(&Self::FAUCET_REQUEST)
                    .append(&tx.sender)
                    .append(&tx.amount);
            }
        }
    }
}

impl Decodable for Transaction {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        let expect_fields = |count: usize| -> Result<(), DecoderError> {
            match rlp.item_count()? {
                n if n == count => Ok(()),
                n if n < count => Err(DecoderError::RlpIsTooShort),
                _ => Err(DecoderError::RlpIncorrectListLen),
            }
        };

        match rlp.val_at::<u8>(0)? {
            Self::TRANSFER => {
                expect_fields(5)?;
                Ok(Transaction::Transfer(Transfer {
                    sender: rlp.val_at(1)?,
                    recipient: rlp.val_at(2)?,
                    token_type: rlp.val_at(3)?,
                    amount: rlp.val_at(4)?,
                }))
            }
            Self::SWAP => {
                expect_fields(6)?;
                Ok(Transaction::Swap(Swap {
                    sender: rlp.val_at(1)?,
                    token_type: rlp.val_at(2)?,
                    input_amount: rlp.val_at(3)?,
                    min_output_amount: rlp.val_at(4)?,
                    timeout: rlp.val_at(5)?,
                }))
            }
            Self::FAUCET_REQUEST => {
                expect_fields(3)?;
                Ok(Transaction::FaucetRequest(FaucetRequest {
                    sender: rlp.val_at(1)?,
                    amount: rlp.val_at(2)?,
                }))
            }
            _ => Err(DecoderError::Custom("unknown transaction kind")),
        }
    }
}

/// A transaction together with its sender's signature over
/// [`Transaction::encode`].
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub signature: Vec<u8>,
    pub transaction: Transaction,
}

impl SignedTransaction {
    pub fn new(signature: Vec<u8>, transaction: impl Into<Transaction>) -> Self {
        Self {
            signature,
            transaction: transaction.into(),
        }
    }
}

impl Encodable for SignedTransaction {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(2)
            .append(&self.signature)
            .append(&self.transaction);
    }
}

impl Decodable for SignedTransaction {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        if rlp.item_count()? != 2 {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        Ok(Self {
            signature: rlp.val_at(0)?,
            transaction: rlp.val_at(1)?,
        })
    }
}
