//! A minimal interpreter for tests.

use crate::{BlockEnv, CallInputs, CallOutcome, Evm, StateDb};
use alloy_primitives::{B256, Bytes, Log, U256};

/// First topic of every log emitted by [`TestEvm`].
pub const LOG_TOPIC: B256 = B256::repeat_byte(0x10);

/// Gas charged by [`TestEvm`] per emitted log.
pub const LOG_GAS: u64 = 1_000;

/// Gas charged by [`TestEvm`] per storage write.
pub const STORE_GAS: u64 = 20_000;

/// Call data emitting `count` logs.
pub fn log_call(count: u8) -> Bytes {
    Bytes::from(vec![0x01, count])
}

/// Call data incrementing storage slot `slot` of the callee.
pub fn store_call(slot: u8) -> Bytes {
    Bytes::from(vec![0x02, slot])
}

/// Call data that reverts.
pub fn revert_call() -> Bytes {
    Bytes::from_static(&[0xfe])
}

/// Call data that halts.
pub fn halt_call() -> Bytes {
    Bytes::from_static(&[0xff])
}

/// Interprets call data as a single command:
///
/// - `0x01 n`: emits `n` logs with topics `[LOG_TOPIC, caller]`.
/// - `0x02 s`: increments slot `s` of the callee.
/// - `0xfe`: reverts.
/// - `0xff`: halts.
///
/// Anything else, including empty call data, is a plain value transfer. Creation deploys the
/// init code as runtime code.
#[derive(Debug, Clone, Copy, Default)]
pub struct TestEvm;

impl Evm for TestEvm {
    fn call(&self, state: &mut StateDb, _env: &BlockEnv, inputs: &CallInputs) -> CallOutcome {
        let gas = inputs.gas_limit;
        match inputs.input.as_ref() {
            [0x01, count] => {
                let cost = LOG_GAS * *count as u64;
                if cost > gas {
                    return CallOutcome::halt("out of gas");
                }
                for _ in 0..*count {
                    state.add_log(Log::new_unchecked(
                        inputs.target,
                        vec![LOG_TOPIC, inputs.caller.into_word()],
                        Bytes::new(),
                    ));
                }
                CallOutcome::success(Bytes::new(), gas - cost)
            }
            [0x02, slot] => {
                if STORE_GAS > gas {
                    return CallOutcome::halt("out of gas");
                }
                let slot = B256::with_last_byte(*slot);
                let value = state.storage(inputs.target, slot) + U256::from(1);
                state.set_storage(inputs.target, slot, value);
                CallOutcome::success(Bytes::new(), gas - STORE_GAS)
            }
            [0xfe] => CallOutcome::revert(Bytes::new(), gas / 2),
            [0xff] => CallOutcome::halt("invalid opcode"),
            _ => CallOutcome::success(Bytes::new(), gas),
        }
    }

    fn create(&self, _state: &mut StateDb, _env: &BlockEnv, inputs: &CallInputs) -> CallOutcome {
        CallOutcome::success(inputs.input.clone(), inputs.gas_limit)
    }
}
