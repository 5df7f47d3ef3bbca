//! # meridian-prefetch
//!
//! A [`TriePrefetcher`] loads the accounts and storage slots a block is about to touch on
//! background threads, so execution finds them already warm.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod config;
pub use config::PrefetchConfig;

mod error;
pub use error::PrefetchError;

mod trie;
pub use trie::{PrefetchKey, PrefetchedTrie, TrieId};

mod fetcher;

mod prefetcher;
pub use prefetcher::{PrefetchReport, TriePrefetcher};

mod metrics;

/// Describes and zeroes the prefetcher metrics. Call once at startup.
pub fn init_metrics() {
    metrics::Metrics::init();
}
