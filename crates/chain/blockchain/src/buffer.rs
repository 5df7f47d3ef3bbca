//! Side blocks awaiting deferred execution.

use alloy_primitives::{B256, BlockNumber};
use lru::LruCache;
use meridian_primitives::{BlockNumHash, SealedBlock};
use std::{
    collections::{BTreeMap, HashMap, HashSet, btree_map, hash_map},
    num::NonZeroUsize,
};

/// The nearest ancestor of a buffered block whose state is available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateAnchor {
    /// The ancestor block.
    pub block: BlockNumHash,
    /// Its state root.
    pub state_root: B256,
}

#[derive(Debug, Clone)]
struct BufferedBlock {
    block: SealedBlock,
    anchor: StateAnchor,
}

/// Blocks ordered by number, then by hash.
type BufferedBlocks = BTreeMap<BlockNumber, HashMap<B256, BufferedBlock>>;

/// Side blocks stored without state because the state of their parent was pruned.
///
/// A buffered block is only executed once its branch outweighs the canonical chain. Each entry
/// remembers its [`StateAnchor`]: the state execution would start from. The retention window
/// must keep every anchor available, see [`BlockBuffer::anchor_roots`].
///
/// The buffer is bounded. Once full, the least recently inserted block is evicted. Evicted
/// blocks stay in the chain store and are re-executed from an older anchor if needed.
#[derive(Debug)]
pub struct BlockBuffer {
    blocks: BufferedBlocks,
    parent_to_child: HashMap<B256, HashSet<BlockNumHash>>,
    hash_to_num: HashMap<B256, BlockNumber>,
    lru: LruCache<BlockNumHash, ()>,
}

impl BlockBuffer {
    /// Creates a buffer holding at most `limit` blocks.
    pub fn new(limit: usize) -> Self {
        Self {
            blocks: BTreeMap::new(),
            parent_to_child: HashMap::new(),
            hash_to_num: HashMap::new(),
            lru: LruCache::new(NonZeroUsize::new(limit).unwrap_or(NonZeroUsize::MIN)),
        }
    }

    /// Buffers `block` with its anchor. Returns the evicted block if the buffer was full.
    pub fn insert_block(&mut self, block: SealedBlock, anchor: StateAnchor) -> Option<SealedBlock> {
        let num_hash = block.num_hash();
        self.parent_to_child.entry(block.parent_hash()).or_default().insert(num_hash);
        self.hash_to_num.insert(num_hash.hash, num_hash.number);
        self.blocks
            .entry(num_hash.number)
            .or_default()
            .insert(num_hash.hash, BufferedBlock { block, anchor });

        let (evicted, _) = self.lru.push(num_hash, ()).filter(|(b, _)| *b != num_hash)?;
        let evicted = self.remove_from_blocks(&evicted)?;
        self.remove_from_parent(evicted.block.parent_hash(), &evicted.block.num_hash());
        Some(evicted.block)
    }

    /// Removes a single block, leaving its children buffered.
    pub fn remove_block(&mut self, hash: &B256) -> Option<SealedBlock> {
        let number = *self.hash_to_num.get(hash)?;
        let num_hash = BlockNumHash::new(number, *hash);
        let removed = self.remove_from_blocks(&num_hash)?;
        self.remove_from_parent(removed.block.parent_hash(), &num_hash);
        Some(removed.block)
    }

    /// Removes `parent` if buffered and every buffered descendant of it.
    ///
    /// Blocks are returned parents first.
    pub fn remove_with_children(&mut self, parent: BlockNumHash) -> Vec<SealedBlock> {
        let mut taken = Vec::new();
        if let Some(block) = self.remove_from_blocks(&parent) {
            self.remove_from_parent(block.block.parent_hash(), &parent);
            taken.push(block.block);
        }
        taken.extend(self.remove_children(vec![parent]));
        taken
    }

    /// Drops every block at or below `number` together with its descendants.
    pub fn clean_old_blocks(&mut self, number: BlockNumber) {
        let mut removed = Vec::new();
        while let Some(entry) = self.blocks.first_entry() {
            if *entry.key() > number {
                break;
            }
            let blocks = entry.remove();
            removed.extend(blocks.into_values().map(|buffered| buffered.block));
        }
        let mut parents = Vec::with_capacity(removed.len());
        for block in removed {
            let num_hash = block.num_hash();
            self.lru.pop(&num_hash);
            self.hash_to_num.remove(&num_hash.hash);
            self.remove_from_parent(block.parent_hash(), &num_hash);
            parents.push(num_hash);
        }
        self.remove_children(parents);
    }

    /// Returns the buffered block with the given hash.
    pub fn block_by_hash(&self, hash: &B256) -> Option<&SealedBlock> {
        self.entry(hash).map(|buffered| &buffered.block)
    }

    /// Returns the anchor of the buffered block with the given hash.
    pub fn anchor(&self, hash: &B256) -> Option<StateAnchor> {
        self.entry(hash).map(|buffered| buffered.anchor)
    }

    /// Returns the lowest buffered ancestor of `hash`, the block itself if its parent is not
    /// buffered.
    pub fn lowest_ancestor(&self, hash: &B256) -> Option<&SealedBlock> {
        let mut current = self.block_by_hash(hash)?;
        while let Some(parent) = self.block_by_hash(&current.parent_hash()) {
            current = parent;
        }
        Some(current)
    }

    /// State roots that must stay available for the buffered blocks to be executable.
    pub fn anchor_roots(&self) -> HashSet<B256> {
        self.blocks
            .values()
            .flat_map(|blocks| blocks.values().map(|buffered| buffered.anchor.state_root))
            .collect()
    }

    /// Number of buffered blocks.
    pub fn len(&self) -> usize {
        self.lru.len()
    }

    /// Returns true if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.lru.is_empty()
    }

    fn entry(&self, hash: &B256) -> Option<&BufferedBlock> {
        let number = self.hash_to_num.get(hash)?;
        self.blocks.get(number)?.get(hash)
    }

    /// Unlinks `block` from its parent. Children of `block` are left alone.
    fn remove_from_parent(&mut self, parent: B256, block: &BlockNumHash) {
        if let hash_map::Entry::Occupied(mut entry) = self.parent_to_child.entry(parent) {
            entry.get_mut().remove(block);
            if entry.get().is_empty() {
                entry.remove();
            }
        }
    }

    /// Removes `block` from the block maps and the LRU, keeping its child links.
    fn remove_from_blocks(&mut self, block: &BlockNumHash) -> Option<BufferedBlock> {
        self.hash_to_num.remove(&block.hash);
        let btree_map::Entry::Occupied(mut entry) = self.blocks.entry(block.number) else {
            return None;
        };
        let removed = entry.get_mut().remove(&block.hash);
        if entry.get().is_empty() {
            entry.remove();
        }
        self.lru.pop(block);
        removed
    }

    fn remove_children(&mut self, parents: Vec<BlockNumHash>) -> Vec<SealedBlock> {
        let mut pending = parents;
        let mut removed = Vec::new();
        while let Some(parent) = pending.pop() {
            let Some(children) = self.parent_to_child.remove(&parent.hash) else { continue };
            let mut children = children.into_iter().collect::<Vec<_>>();
            children.sort_unstable_by_key(|child| child.number);
            for child in &children {
                if let Some(buffered) = self.remove_from_blocks(child) {
                    removed.push(buffered.block);
                }
            }
            pending.extend(children);
        }
        removed.sort_by_key(|block| block.number());
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_primitives::{BlockBody, Header, SealedHeader};

    fn create_block(number: u64, parent: B256) -> SealedBlock {
        SealedBlock::new(
            SealedHeader::seal_slow(Header {
                number,
                parent_hash: parent,
                extra_data: B256::random().to_vec().into(),
                ..Default::default()
            }),
            BlockBody::default(),
        )
    }

    fn anchor(byte: u8) -> StateAnchor {
        StateAnchor {
            block: BlockNumHash::new(byte as u64, B256::repeat_byte(byte)),
            state_root: B256::repeat_byte(byte),
        }
    }

    #[test]
    fn test_simple_insertion() {
        let block = create_block(10, B256::random());
        let mut buffer = BlockBuffer::new(3);
        assert!(buffer.insert_block(block.clone(), anchor(1)).is_none());
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.block_by_hash(&block.hash()), Some(&block));
        assert_eq!(buffer.anchor(&block.hash()), Some(anchor(1)));
    }

    #[test]
    fn test_take_all_chain_of_children() {
        let main_parent = BlockNumHash::new(9, B256::random());
        let block1 = create_block(10, main_parent.hash);
        let block2 = create_block(11, block1.hash());
        let block3 = create_block(12, block2.hash());
        let block4 = create_block(14, B256::random());

        let mut buffer = BlockBuffer::new(5);
        for block in [&block1, &block2, &block3, &block4] {
            buffer.insert_block(block.clone(), anchor(9));
        }

        assert_eq!(buffer.len(), 4);
        assert_eq!(buffer.lowest_ancestor(&block4.hash()), Some(&block4));
        assert_eq!(buffer.lowest_ancestor(&block3.hash()), Some(&block1));
        assert_eq!(buffer.remove_with_children(main_parent), vec![block1, block2, block3]);
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_remove_block_keeps_children() {
        let block1 = create_block(10, B256::random());
        let block2 = create_block(11, block1.hash());
        let mut buffer = BlockBuffer::new(5);
        buffer.insert_block(block1.clone(), anchor(1));
        buffer.insert_block(block2.clone(), anchor(1));

        assert_eq!(buffer.remove_block(&block1.hash()), Some(block1.clone()));
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.lowest_ancestor(&block2.hash()), Some(&block2));
        assert_eq!(buffer.remove_with_children(block1.num_hash()), vec![block2]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_eviction() {
        let block1 = create_block(10, B256::random());
        let block2 = create_block(11, block1.hash());
        let block3 = create_block(12, block2.hash());
        let mut buffer = BlockBuffer::new(2);
        buffer.insert_block(block1.clone(), anchor(1));
        buffer.insert_block(block2.clone(), anchor(2));

        assert_eq!(buffer.insert_block(block3.clone(), anchor(3)), Some(block1.clone()));
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.block_by_hash(&block1.hash()), None);
        assert_eq!(buffer.anchor_roots(), HashSet::from([anchor(2).state_root, anchor(3).state_root]));
    }

    #[test]
    fn test_clean_multi_level_children() {
        let main_parent = BlockNumHash::new(9, B256::random());
        let block1 = create_block(10, main_parent.hash);
        let block2 = create_block(11, block1.hash());
        let block3 = create_block(11, block1.hash());
        let block4 = create_block(12, block2.hash());
        let unrelated = create_block(14, B256::random());

        let mut buffer = BlockBuffer::new(10);
        for block in [&block1, &block2, &block3, &block4, &unrelated] {
            buffer.insert_block(block.clone(), anchor(7));
        }

        buffer.clean_old_blocks(block1.number());
        assert_eq!(buffer.len(), 1);
        assert!(buffer.block_by_hash(&unrelated.hash()).is_some());
        assert!(buffer.parent_to_child.keys().all(|parent| *parent == unrelated.parent_hash()));
    }
}
