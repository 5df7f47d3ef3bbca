//! Protocol constants.

use alloy_primitives::{B256, b256};

/// Root hash of an empty trie.
pub const EMPTY_ROOT_HASH: B256 =
    b256!("56e81f171bcc55a6ff8345e692c0f86e5b48e01b996cadc001622fb5e363b421");

/// Hash of the RLP encoding of an empty ommer list.
pub const EMPTY_OMMER_ROOT_HASH: B256 =
    b256!("1dcc4de8dec75d7aab85b567b6ccd41ad312451b948a7413f0a142fd40d49347");

/// Keccak-256 of empty input, the code hash of accounts without code.
pub const KECCAK_EMPTY: B256 =
    b256!("c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470");

/// Multiplier from gwei to wei, applied to withdrawal amounts.
pub const GWEI_TO_WEI: u64 = 1_000_000_000;

/// Gas consumed per blob.
pub const DATA_GAS_PER_BLOB: u64 = alloy_eips::eip4844::DATA_GAS_PER_BLOB;

/// Upper bound on the number of blobs a single block may reference.
pub const MAX_BLOBS_PER_BLOCK: u64 = 6;

/// Minimum price of a unit of blob gas.
pub const MIN_BLOB_GASPRICE: u128 = 1;

/// Controls the maximum rate of change of the blob gas price.
pub const BLOB_BASE_FEE_UPDATE_FRACTION: u128 = 3_338_477;

/// Computes the blob gas price from the header's excess blob gas.
///
/// Approximates `MIN_BLOB_GASPRICE * e ** (excess_blob_gas / BLOB_BASE_FEE_UPDATE_FRACTION)`
/// with the integer Taylor expansion used by the protocol.
pub fn blob_gas_price(excess_blob_gas: u64) -> u128 {
    fake_exponential(MIN_BLOB_GASPRICE, excess_blob_gas as u128, BLOB_BASE_FEE_UPDATE_FRACTION)
}

fn fake_exponential(factor: u128, numerator: u128, denominator: u128) -> u128 {
    let mut i = 1u128;
    let mut output = 0u128;
    let mut accum = factor.saturating_mul(denominator);
    while accum > 0 {
        output = output.saturating_add(accum);
        accum = accum.saturating_mul(numerator) / denominator.saturating_mul(i);
        i += 1;
    }
    output / denominator
}
