use crate::TxType;
use alloy_primitives::{Bloom, Log};
use alloy_rlp::{BufMut, Encodable, Header as RlpHeader};
use serde::{Deserialize, Serialize};

/// The outcome of executing a single transaction.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// Type of the transaction that produced the receipt.
    pub tx_type: TxType,
    /// Whether execution succeeded.
    pub success: bool,
    /// Gas used in the block up to and including this transaction.
    pub cumulative_gas_used: u64,
    /// Logs emitted by the transaction.
    pub logs: Vec<Log>,
}

impl Receipt {
    /// Bloom filter over the receipt's logs.
    pub fn bloom(&self) -> Bloom {
        logs_bloom(self.logs.iter())
    }

    /// Encodes the receipt as a trie leaf, prefixed with its type for typed transactions.
    pub fn encode_2718(&self, out: &mut dyn BufMut) {
        let bloom = self.bloom();
        if self.tx_type.is_typed() {
            out.put_u8(self.tx_type as u8);
        }
        let logs_len = self.logs.iter().map(log_len).sum::<usize>();
        let payload_length = self.success.length() +
            self.cumulative_gas_used.length() +
            bloom.length() +
            logs_len +
            alloy_rlp::length_of_length(logs_len);
        RlpHeader { list: true, payload_length }.encode(out);
        self.success.encode(out);
        self.cumulative_gas_used.encode(out);
        bloom.encode(out);
        RlpHeader { list: true, payload_length: logs_len }.encode(out);
        for log in &self.logs {
            encode_log(log, out);
        }
    }
}

/// Accrues the address and topics of every log into a bloom filter.
pub fn logs_bloom<'a>(logs: impl IntoIterator<Item = &'a Log>) -> Bloom {
    let mut bloom = Bloom::ZERO;
    for log in logs {
        bloom.accrue_log(log);
    }
    bloom
}

fn log_payload_len(log: &Log) -> usize {
    log.address.length() + log.data.topics().to_vec().length() + log.data.data.length()
}

fn log_len(log: &Log) -> usize {
    let payload = log_payload_len(log);
    payload + alloy_rlp::length_of_length(payload)
}

fn encode_log(log: &Log, out: &mut dyn BufMut) {
    RlpHeader { list: true, payload_length: log_payload_len(log) }.encode(out);
    log.address.encode(out);
    log.data.topics().to_vec().encode(out);
    log.data.data.encode(out);
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, B256, Bytes, LogData};

    #[test]
    fn test_bloom_contains_log_address() {
        let address = Address::with_last_byte(0x42);
        let topic = B256::with_last_byte(7);
        let log = Log { address, data: LogData::new_unchecked(vec![topic], Bytes::new()) };
        let receipt = Receipt { success: true, logs: vec![log], ..Default::default() };
        let bloom = receipt.bloom();
        assert!(bloom.contains_input(alloy_primitives::BloomInput::Raw(address.as_slice())));
        assert!(bloom.contains_input(alloy_primitives::BloomInput::Raw(topic.as_slice())));
    }

    #[test]
    fn test_typed_receipt_prefix() {
        let receipt = Receipt { tx_type: TxType::DynamicFee, success: true, ..Default::default() };
        let mut buf = Vec::new();
        receipt.encode_2718(&mut buf);
        assert_eq!(buf[0], 2);

        let legacy = Receipt { success: true, ..Default::default() };
        let mut buf = Vec::new();
        legacy.encode_2718(&mut buf);
        assert!(buf[0] >= 0xc0);
    }
}
