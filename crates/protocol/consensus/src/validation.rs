//! Header checks shared by every engine.

use crate::ConsensusError;
use alloy_eips::eip1559::{BaseFeeParams, INITIAL_BASE_FEE, calc_next_block_base_fee};
use meridian_primitives::{ChainSpec, DATA_GAS_PER_BLOB, Header, MAX_BLOBS_PER_BLOCK};

/// Maximum length of the extra-data field.
pub const MAXIMUM_EXTRA_DATA_SIZE: usize = 32;

/// Lower bound on the gas limit.
pub const MINIMUM_GAS_LIMIT: u64 = 5000;

/// Bound divisor of the gas limit: it may move by at most `parent / 1024` per block.
pub const GAS_LIMIT_BOUND_DIVISOR: u64 = 1024;

/// Blob gas a block targets.
pub const TARGET_BLOB_GAS_PER_BLOCK: u64 = DATA_GAS_PER_BLOB * MAX_BLOBS_PER_BLOCK / 2;

/// Checks the number, timestamp and gas bounds of `header` against `parent`.
pub fn validate_against_parent(header: &Header, parent: &Header) -> Result<(), ConsensusError> {
    if header.number != parent.number + 1 {
        return Err(ConsensusError::InvalidNumber { expected: parent.number + 1, got: header.number });
    }
    if header.timestamp <= parent.timestamp {
        return Err(ConsensusError::TimestampNotAfterParent {
            timestamp: header.timestamp,
            parent_timestamp: parent.timestamp,
        });
    }
    if header.gas_used > header.gas_limit {
        return Err(ConsensusError::GasUsedExceedsLimit {
            used: header.gas_used,
            limit: header.gas_limit,
        });
    }
    Ok(())
}

/// Checks the extra-data length.
pub fn validate_extra_data(header: &Header, max: usize) -> Result<(), ConsensusError> {
    let len = header.extra_data.len();
    if len > max {
        return Err(ConsensusError::ExtraDataTooLong { len, max });
    }
    Ok(())
}

/// Checks that the gas limit stays within the bound of the parent's limit. On the fee-market
/// fork block the parent limit is scaled by the elasticity multiplier.
pub fn validate_gas_limit(
    spec: &ChainSpec,
    header: &Header,
    parent: &Header,
) -> Result<(), ConsensusError> {
    let mut parent_limit = parent.gas_limit;
    if spec.is_london(header.number) && !spec.is_london(parent.number) {
        parent_limit *= BaseFeeParams::ethereum().elasticity_multiplier as u64;
    }
    let diff = header.gas_limit.abs_diff(parent_limit);
    if diff >= parent_limit / GAS_LIMIT_BOUND_DIVISOR || header.gas_limit < MINIMUM_GAS_LIMIT {
        return Err(ConsensusError::InvalidGasLimit { parent: parent_limit, got: header.gas_limit });
    }
    Ok(())
}

/// Computes the base fee a child of `parent` must carry, or `None` before the fee market.
pub fn expected_base_fee(spec: &ChainSpec, parent: &Header) -> Option<u64> {
    if !spec.is_london(parent.number + 1) {
        return None;
    }
    Some(match parent.base_fee_per_gas {
        Some(base_fee) if spec.is_london(parent.number) => calc_next_block_base_fee(
            parent.gas_used,
            parent.gas_limit,
            base_fee,
            BaseFeeParams::ethereum(),
        ),
        _ => INITIAL_BASE_FEE,
    })
}

/// Checks the base fee field.
pub fn validate_base_fee(
    spec: &ChainSpec,
    header: &Header,
    parent: &Header,
) -> Result<(), ConsensusError> {
    match (expected_base_fee(spec, parent), header.base_fee_per_gas) {
        (None, None) => Ok(()),
        (None, Some(_)) => Err(ConsensusError::UnexpectedBaseFee),
        (Some(_), None) => Err(ConsensusError::BaseFeeMissing),
        (Some(expected), Some(got)) if expected != got => {
            Err(ConsensusError::BaseFeeMismatch { expected, got })
        }
        _ => Ok(()),
    }
}

/// Computes the excess blob gas of a child of `parent`.
pub fn calc_excess_blob_gas(parent: &Header) -> u64 {
    let excess = parent.excess_blob_gas.unwrap_or_default();
    let used = parent.blob_gas_used.unwrap_or_default();
    (excess + used).saturating_sub(TARGET_BLOB_GAS_PER_BLOCK)
}

/// Checks the withdrawals root and blob gas fields against fork activation.
pub fn validate_fork_fields(
    spec: &ChainSpec,
    header: &Header,
    parent: &Header,
) -> Result<(), ConsensusError> {
    match (spec.is_shanghai(header.timestamp), header.withdrawals_root.is_some()) {
        (true, false) => return Err(ConsensusError::WithdrawalsRootMissing),
        (false, true) => return Err(ConsensusError::UnexpectedWithdrawalsRoot),
        _ => {}
    }
    if !spec.is_cancun(header.timestamp) {
        if header.blob_gas_used.is_some() || header.excess_blob_gas.is_some() {
            return Err(ConsensusError::UnexpectedBlobGasFields);
        }
        return Ok(());
    }
    let Some(excess) = header.excess_blob_gas else {
        return Err(ConsensusError::BlobGasFieldsMissing);
    };
    if header.blob_gas_used.is_none() {
        return Err(ConsensusError::BlobGasFieldsMissing);
    }
    let expected = calc_excess_blob_gas(parent);
    if excess != expected {
        return Err(ConsensusError::ExcessBlobGasMismatch { expected, got: excess });
    }
    Ok(())
}

/// Runs every shared check.
pub fn validate_header_standalone(
    spec: &ChainSpec,
    header: &Header,
    parent: &Header,
    max_extra_data: usize,
) -> Result<(), ConsensusError> {
    validate_against_parent(header, parent)?;
    validate_extra_data(header, max_extra_data)?;
    validate_gas_limit(spec, header, parent)?;
    validate_base_fee(spec, header, parent)?;
    validate_fork_fields(spec, header, parent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn parent() -> Header {
        Header { number: 9, timestamp: 100, gas_limit: 10_240_000, ..Default::default() }
    }

    #[rstest]
    #[case::unchanged(10_240_000, true)]
    #[case::max_increase(10_249_999, true)]
    #[case::too_high(10_250_000, false)]
    #[case::too_low(10_230_000, false)]
    #[case::below_minimum(4_999, false)]
    fn test_gas_limit_bound(#[case] gas_limit: u64, #[case] ok: bool) {
        let header = Header { number: 10, timestamp: 101, gas_limit, ..Default::default() };
        let res = validate_gas_limit(&ChainSpec::default(), &header, &parent());
        assert_eq!(res.is_ok(), ok);
    }

    #[test]
    fn test_london_transition_base_fee() {
        let spec = ChainSpec { london_block: Some(10), ..Default::default() };
        assert_eq!(expected_base_fee(&spec, &parent()), Some(INITIAL_BASE_FEE));
        let header = Header { number: 10, timestamp: 101, ..Default::default() };
        assert_eq!(validate_base_fee(&spec, &header, &parent()), Err(ConsensusError::BaseFeeMissing));
    }

    #[test]
    fn test_timestamp_must_advance() {
        let header = Header { number: 10, timestamp: 100, gas_limit: 10_240_000, ..Default::default() };
        assert!(matches!(
            validate_against_parent(&header, &parent()),
            Err(ConsensusError::TimestampNotAfterParent { .. })
        ));
    }

    #[test]
    fn test_excess_blob_gas() {
        let parent = Header {
            excess_blob_gas: Some(TARGET_BLOB_GAS_PER_BLOCK),
            blob_gas_used: Some(DATA_GAS_PER_BLOB),
            ..Default::default()
        };
        assert_eq!(calc_excess_blob_gas(&parent), DATA_GAS_PER_BLOB);
        assert_eq!(calc_excess_blob_gas(&Header::default()), 0);
    }
}
