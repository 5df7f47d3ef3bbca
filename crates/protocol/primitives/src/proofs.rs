//! Merkle root computations over block contents and world state.

use crate::{Account, Header, Receipt, TransactionSigned, Withdrawal};
use alloy_primitives::{Address, B256, U256, keccak256};
use alloy_trie::{
    TrieAccount,
    root::{ordered_trie_root, ordered_trie_root_with_encoder},
};

/// Root of the transactions trie.
pub fn calculate_transaction_root(transactions: &[TransactionSigned]) -> B256 {
    ordered_trie_root_with_encoder(transactions, |tx, buf| tx.encode_2718(buf))
}

/// Root of the receipts trie.
pub fn calculate_receipt_root(receipts: &[Receipt]) -> B256 {
    ordered_trie_root_with_encoder(receipts, |receipt, buf| receipt.encode_2718(buf))
}

/// Root of the withdrawals trie.
pub fn calculate_withdrawals_root(withdrawals: &[Withdrawal]) -> B256 {
    ordered_trie_root(withdrawals)
}

/// Hash of the RLP-encoded uncle list.
pub fn calculate_ommers_root(ommers: &[Header]) -> B256 {
    let mut out = Vec::new();
    alloy_rlp::encode_list::<_, Header>(ommers, &mut out);
    keccak256(out)
}

/// Root of a storage trie from its unhashed slots. Zero-valued slots are skipped.
pub fn storage_root<'a>(slots: impl IntoIterator<Item = (&'a B256, &'a U256)>) -> B256 {
    alloy_trie::root::storage_root_unhashed(
        slots.into_iter().filter(|(_, value)| !value.is_zero()).map(|(k, v)| (*k, *v)),
    )
}

/// Root of the account trie from unhashed addresses.
pub fn state_root<'a>(accounts: impl IntoIterator<Item = (&'a Address, &'a Account)>) -> B256 {
    alloy_trie::root::state_root_unhashed(
        accounts.into_iter().map(|(address, account)| (*address, TrieAccount::from(*account))),
    )
}
