//! Transaction envelope, signing hash and sender recovery.

use crate::{DATA_GAS_PER_BLOB, RecoveryError};
use alloy_primitives::{Address, B256, Bytes, FixedBytes, Signature, TxKind, U256, keccak256};
use alloy_rlp::{BufMut, Encodable, Header as RlpHeader};
use serde::{Deserialize, Serialize};

/// The transaction type, used as the typed-envelope prefix byte.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TxType {
    /// Pre fee-market transaction paying a flat gas price.
    #[default]
    Legacy = 0,
    /// EIP-1559 transaction with a fee cap and a priority fee.
    DynamicFee = 2,
    /// EIP-4844 transaction referencing blobs by versioned hash.
    Blob = 3,
}

impl TxType {
    /// Returns true if the type is encoded with a type prefix.
    pub const fn is_typed(self) -> bool {
        !matches!(self, Self::Legacy)
    }
}

/// Blob data travelling next to a blob transaction.
///
/// Sidecars are separated from the transaction at the protocol layer and must never be part of a
/// canonical block body.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobSidecar {
    /// The blobs.
    pub blobs: Vec<Bytes>,
    /// KZG commitments, one per blob.
    pub commitments: Vec<FixedBytes<48>>,
    /// KZG proofs, one per blob.
    pub proofs: Vec<FixedBytes<48>>,
}

/// An unsigned transaction.
///
/// Every type shares one field layout. For [`TxType::Legacy`] the gas price lives in
/// `max_fee_per_gas` and `max_priority_fee_per_gas` mirrors it.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Transaction {
    /// Envelope type.
    pub tx_type: TxType,
    /// Replay protection chain id.
    pub chain_id: u64,
    /// Sender nonce.
    pub nonce: u64,
    /// Gas the sender is willing to spend.
    pub gas_limit: u64,
    /// Gas price for legacy transactions, fee cap otherwise.
    pub max_fee_per_gas: u128,
    /// Tip cap paid to the fee recipient.
    pub max_priority_fee_per_gas: u128,
    /// Call target, or [`TxKind::Create`] for contract creation.
    pub to: TxKind,
    /// Value transferred with the call.
    pub value: U256,
    /// Call data or init code.
    pub input: Bytes,
    /// Versioned hashes of the referenced blobs.
    pub blob_versioned_hashes: Vec<B256>,
    /// Fee cap for blob gas.
    pub max_fee_per_blob_gas: u128,
}

impl Transaction {
    /// Returns true if the transaction deploys a contract.
    pub const fn is_create(&self) -> bool {
        matches!(self.to, TxKind::Create)
    }

    /// Returns the gas consumed by the blobs the transaction references.
    pub fn blob_gas(&self) -> u64 {
        self.blob_versioned_hashes.len() as u64 * DATA_GAS_PER_BLOB
    }

    /// Returns the per-gas price the sender pays under the given base fee.
    pub fn effective_gas_price(&self, base_fee: Option<u64>) -> u128 {
        match (self.tx_type, base_fee) {
            (TxType::Legacy, _) | (_, None) => self.max_fee_per_gas,
            (_, Some(base_fee)) => {
                let base_fee = base_fee as u128;
                let tip = self
                    .max_priority_fee_per_gas
                    .min(self.max_fee_per_gas.saturating_sub(base_fee));
                base_fee + tip
            }
        }
    }

    /// Returns the per-gas tip credited to the fee recipient, or `None` if the fee cap does not
    /// cover the base fee.
    ///
    /// Without a base fee the full gas price is the tip.
    pub fn effective_tip_per_gas(&self, base_fee: Option<u64>) -> Option<u128> {
        let Some(base_fee) = base_fee else {
            return Some(self.max_fee_per_gas);
        };
        let base_fee = base_fee as u128;
        if self.max_fee_per_gas < base_fee {
            return None;
        }
        let cap = self.max_fee_per_gas - base_fee;
        Some(match self.tx_type {
            TxType::Legacy => cap,
            _ => self.max_priority_fee_per_gas.min(cap),
        })
    }

    /// Hash signed by the sender.
    pub fn signature_hash(&self) -> B256 {
        let mut buf = Vec::with_capacity(self.fields_len() + 8);
        if self.tx_type.is_typed() {
            buf.put_u8(self.tx_type as u8);
        }
        RlpHeader { list: true, payload_length: self.fields_len() }.encode(&mut buf);
        self.encode_fields(&mut buf);
        keccak256(&buf)
    }

    fn fields_len(&self) -> usize {
        self.chain_id.length() +
            self.nonce.length() +
            self.gas_limit.length() +
            self.max_fee_per_gas.length() +
            self.max_priority_fee_per_gas.length() +
            self.to.length() +
            self.value.length() +
            self.input.length() +
            self.blob_versioned_hashes.length() +
            self.max_fee_per_blob_gas.length()
    }

    fn encode_fields(&self, out: &mut dyn BufMut) {
        self.chain_id.encode(out);
        self.nonce.encode(out);
        self.gas_limit.encode(out);
        self.max_fee_per_gas.encode(out);
        self.max_priority_fee_per_gas.encode(out);
        self.to.encode(out);
        self.value.encode(out);
        self.input.encode(out);
        self.blob_versioned_hashes.encode(out);
        self.max_fee_per_blob_gas.encode(out);
    }

    /// Signs the transaction with a local signer.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn sign<S: alloy_signer::SignerSync>(self, signer: &S) -> TransactionSigned {
        let signature =
            signer.sign_hash_sync(&self.signature_hash()).expect("local signing does not fail");
        TransactionSigned::new(self, signature)
    }
}

/// A signed transaction together with its hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionSigned {
    /// The signed payload.
    pub transaction: Transaction,
    /// Sender signature over [`Transaction::signature_hash`].
    pub signature: Signature,
    /// Blob sidecar, only present while the transaction travels outside a block.
    pub sidecar: Option<BlobSidecar>,
    hash: B256,
}

impl TransactionSigned {
    /// Creates a signed transaction and computes its hash.
    pub fn new(transaction: Transaction, signature: Signature) -> Self {
        let mut tx = Self { transaction, signature, sidecar: None, hash: B256::ZERO };
        let mut buf = Vec::with_capacity(tx.payload_len() + 8);
        tx.encode_2718(&mut buf);
        tx.hash = keccak256(&buf);
        tx
    }

    /// Attaches a blob sidecar. The sidecar is not part of the transaction hash.
    pub fn with_sidecar(mut self, sidecar: BlobSidecar) -> Self {
        self.sidecar = Some(sidecar);
        self
    }

    /// Returns the transaction hash.
    pub const fn hash(&self) -> B256 {
        self.hash
    }

    /// Recovers the sender from the signature.
    pub fn recover_signer(&self) -> Result<Address, RecoveryError> {
        self.signature
            .recover_address_from_prehash(&self.transaction.signature_hash())
            .map_err(|_| RecoveryError::InvalidSignature(self.hash))
    }

    /// Encodes the transaction as a trie leaf: `type || rlp(fields)` for typed transactions and
    /// `rlp(fields)` for legacy ones.
    pub fn encode_2718(&self, out: &mut dyn BufMut) {
        if self.transaction.tx_type.is_typed() {
            out.put_u8(self.transaction.tx_type as u8);
        }
        RlpHeader { list: true, payload_length: self.payload_len() }.encode(out);
        self.transaction.encode_fields(out);
        self.signature.v().encode(out);
        self.signature.r().encode(out);
        self.signature.s().encode(out);
    }

    fn payload_len(&self) -> usize {
        self.transaction.fields_len() +
            self.signature.v().length() +
            self.signature.r().length() +
            self.signature.s().length()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;
    use alloy_signer_local::PrivateKeySigner;
    use rstest::rstest;

    fn dynamic_fee(max_fee: u128, tip: u128) -> Transaction {
        Transaction {
            tx_type: TxType::DynamicFee,
            max_fee_per_gas: max_fee,
            max_priority_fee_per_gas: tip,
            ..Default::default()
        }
    }

    #[rstest]
    #[case::tip_capped_by_fee_cap(dynamic_fee(12, 5), Some(10), Some(2))]
    #[case::tip_fits(dynamic_fee(20, 5), Some(10), Some(5))]
    #[case::fee_cap_below_base(dynamic_fee(9, 5), Some(10), None)]
    #[case::no_base_fee(dynamic_fee(9, 5), None, Some(9))]
    fn test_effective_tip(
        #[case] tx: Transaction,
        #[case] base_fee: Option<u64>,
        #[case] expected: Option<u128>,
    ) {
        assert_eq!(tx.effective_tip_per_gas(base_fee), expected);
    }

    #[test]
    fn test_legacy_tip_is_price_minus_base_fee() {
        let tx = Transaction { max_fee_per_gas: 30, max_priority_fee_per_gas: 30, ..Default::default() };
        assert_eq!(tx.effective_tip_per_gas(Some(10)), Some(20));
        assert_eq!(tx.effective_gas_price(Some(10)), 30);
    }

    #[test]
    fn test_sign_and_recover() {
        let signer = PrivateKeySigner::from_bytes(&B256::with_last_byte(1)).unwrap();
        let tx = Transaction {
            chain_id: 1,
            nonce: 7,
            gas_limit: 21_000,
            max_fee_per_gas: 1,
            max_priority_fee_per_gas: 1,
            to: TxKind::Call(address!("0x00000000000000000000000000000000000000aa")),
            value: U256::from(5),
            ..Default::default()
        };
        let signed = tx.sign(&signer);
        assert_eq!(signed.recover_signer(), Ok(signer.address()));
    }

    #[test]
    fn test_sidecar_not_part_of_hash() {
        let signer = PrivateKeySigner::from_bytes(&B256::with_last_byte(1)).unwrap();
        let tx = Transaction {
            tx_type: TxType::Blob,
            blob_versioned_hashes: vec![B256::with_last_byte(1)],
            ..Default::default()
        }
        .sign(&signer);
        let hash = tx.hash();
        let with_sidecar = tx.with_sidecar(BlobSidecar::default());
        assert_eq!(with_sidecar.hash(), hash);
        assert_eq!(with_sidecar.transaction.blob_gas(), DATA_GAS_PER_BLOB);
    }
}
