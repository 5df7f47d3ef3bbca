//! Gas schedule and the block gas pool.

use crate::InvalidTransaction;

/// Base cost of every transaction.
pub const TX_GAS: u64 = 21_000;

/// Base cost of a contract creation transaction.
pub const TX_GAS_CONTRACT_CREATION: u64 = 53_000;

/// Cost per zero byte of call data.
pub const TX_DATA_ZERO_GAS: u64 = 4;

/// Cost per non-zero byte of call data.
pub const TX_DATA_NON_ZERO_GAS: u64 = 16;

/// Cost per 32-byte word of init code from Shanghai on.
pub const INIT_CODE_WORD_GAS: u64 = 2;

/// Maximum init code size from Shanghai on.
pub const MAX_INIT_CODE_SIZE: usize = 2 * 24_576;

/// Cost per byte of deployed code.
pub const CREATE_DATA_GAS: u64 = 200;

/// Refund quotient before London: at most half of the gas used is refunded.
pub const REFUND_QUOTIENT: u64 = 2;

/// Refund quotient from London on.
pub const REFUND_QUOTIENT_EIP3529: u64 = 5;

/// Computes the gas charged before any code runs.
pub fn intrinsic_gas(input: &[u8], is_create: bool, shanghai: bool) -> u64 {
    let mut gas = if is_create { TX_GAS_CONTRACT_CREATION } else { TX_GAS };
    let zeros = input.iter().filter(|byte| **byte == 0).count() as u64;
    let non_zeros = input.len() as u64 - zeros;
    gas += zeros * TX_DATA_ZERO_GAS + non_zeros * TX_DATA_NON_ZERO_GAS;
    if is_create && shanghai {
        gas += (input.len() as u64).div_ceil(32) * INIT_CODE_WORD_GAS;
    }
    gas
}

/// Caps `refund` at the fork-dependent fraction of `gas_used`.
pub const fn capped_refund(gas_used: u64, refund: u64, london: bool) -> u64 {
    let quotient = if london { REFUND_QUOTIENT_EIP3529 } else { REFUND_QUOTIENT };
    let cap = gas_used / quotient;
    if refund < cap { refund } else { cap }
}

/// Gas left for transactions in a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasPool(u64);

impl GasPool {
    /// Creates a pool holding `gas`.
    pub const fn new(gas: u64) -> Self {
        Self(gas)
    }

    /// Gas left.
    pub const fn gas(&self) -> u64 {
        self.0
    }

    /// Takes `amount` out of the pool.
    pub const fn sub_gas(&mut self, amount: u64) -> Result<(), InvalidTransaction> {
        if self.0 < amount {
            return Err(InvalidTransaction::GasLimitExceeded { available: self.0, wanted: amount });
        }
        self.0 -= amount;
        Ok(())
    }

    /// Returns `amount` to the pool.
    pub const fn add_gas(&mut self, amount: u64) {
        self.0 = self.0.saturating_add(amount);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::transfer(&[], false, false, 21_000)]
    #[case::call_data(&[0, 1, 0, 2], false, false, 21_000 + 2 * 4 + 2 * 16)]
    #[case::create(&[1; 32], true, false, 53_000 + 32 * 16)]
    #[case::create_shanghai(&[1; 33], true, true, 53_000 + 33 * 16 + 2 * 2)]
    fn test_intrinsic_gas(
        #[case] input: &[u8],
        #[case] is_create: bool,
        #[case] shanghai: bool,
        #[case] expected: u64,
    ) {
        assert_eq!(intrinsic_gas(input, is_create, shanghai), expected);
    }

    #[rstest]
    #[case::below_cap(100_000, 10_000, true, 10_000)]
    #[case::london_cap(100_000, 50_000, true, 20_000)]
    #[case::frontier_cap(100_000, 80_000, false, 50_000)]
    fn test_capped_refund(
        #[case] used: u64,
        #[case] refund: u64,
        #[case] london: bool,
        #[case] expected: u64,
    ) {
        assert_eq!(capped_refund(used, refund, london), expected);
    }

    #[test]
    fn test_gas_pool() {
        let mut pool = GasPool::new(30_000);
        assert!(pool.sub_gas(21_000).is_ok());
        assert_eq!(
            pool.sub_gas(21_000),
            Err(InvalidTransaction::GasLimitExceeded { available: 9_000, wanted: 21_000 })
        );
        pool.add_gas(1_000);
        assert_eq!(pool.gas(), 10_000);
    }
}
