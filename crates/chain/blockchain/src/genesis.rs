use meridian_primitives::{BlockBody, ChainSpec, SealedBlock};
use meridian_storage::{StateCommit, StateSnapshot, StorageSlots};
use std::{collections::BTreeMap, sync::Arc};

/// The genesis block of `spec`.
pub fn genesis_block(spec: &ChainSpec) -> SealedBlock {
    SealedBlock::new(spec.genesis_header(), BlockBody::default())
}

/// The state of the genesis allocation of `spec`, ready to be committed to a state store.
pub fn genesis_state(spec: &ChainSpec) -> StateCommit {
    let mut accounts = BTreeMap::new();
    let mut storage = BTreeMap::new();
    let mut codes = Vec::new();
    for (address, account, alloc) in spec.genesis_accounts() {
        if let Some(code) = &alloc.code {
            codes.push((account.code_hash, code.clone()));
        }
        let slots = alloc
            .storage
            .iter()
            .filter(|(_, value)| !value.is_zero())
            .map(|(slot, value)| (*slot, *value))
            .collect::<StorageSlots>();
        if !slots.is_empty() {
            storage.insert(address, Arc::new(slots));
        }
        accounts.insert(address, account);
    }
    StateCommit {
        snapshot: StateSnapshot { root: spec.genesis.state_root(), accounts, storage },
        codes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, B256, Bytes, U256, keccak256};
    use meridian_primitives::{EMPTY_ROOT_HASH, GenesisAccount, proofs};

    #[test]
    fn test_genesis_state_matches_header() {
        let mut spec = ChainSpec::default();
        spec.genesis.alloc.insert(
            Address::with_last_byte(1),
            GenesisAccount {
                balance: U256::from(100),
                code: Some(Bytes::from_static(&[0x60, 0x00])),
                storage: BTreeMap::from([
                    (B256::with_last_byte(1), U256::from(7)),
                    (B256::with_last_byte(2), U256::ZERO),
                ]),
                ..Default::default()
            },
        );
        spec.genesis.alloc.insert(
            Address::with_last_byte(2),
            GenesisAccount { balance: U256::from(5), ..Default::default() },
        );

        let commit = genesis_state(&spec);
        assert_eq!(commit.root(), genesis_block(&spec).header.state_root);
        assert_eq!(commit.root(), proofs::state_root(commit.snapshot.accounts.iter()));
        assert_eq!(commit.codes, vec![(keccak256([0x60, 0x00]), Bytes::from_static(&[0x60, 0x00]))]);
        assert_eq!(commit.snapshot.storage[&Address::with_last_byte(1)].len(), 1);
        assert!(!commit.snapshot.storage.contains_key(&Address::with_last_byte(2)));
    }

    #[test]
    fn test_empty_genesis() {
        let commit = genesis_state(&ChainSpec::default());
        assert_eq!(commit.root(), EMPTY_ROOT_HASH);
        assert!(commit.snapshot.accounts.is_empty());
    }
}
