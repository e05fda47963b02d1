//! Shared test utilities for the facade integration suites.
//!
//! Import via `mod common;` from any test's main.rs.

#![allow(dead_code)]
#![allow(unused_imports)]

use std::sync::{Arc, Once};
pub use tessel::*;

// ============================================================================
// Initialization
// ============================================================================

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    });
}

// ============================================================================
// TestDb - one in-memory log and a runtime over it
// ============================================================================

pub struct TestDb {
    pub log: Arc<MemoryLog>,
    pub runtime: Runtime,
}

impl TestDb {
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        init_tracing();
        let (log, runtime) = open_in_memory_with(config);
        TestDb { log, runtime }
    }

    /// Fast backoff and a deep retry budget, for contention
    pub fn contended() -> Self {
        Self::with_config(
            RuntimeConfig::default().with_retry(
                RetryConfig::new()
                    .with_max_retries(500)
                    .with_base_delay_ms(1)
                    .with_max_delay_ms(4),
            ),
        )
    }

    /// A second runtime over the same log, as another client would have
    pub fn peer(&self) -> Runtime {
        Runtime::new(self.log.clone(), self.log.clone(), self.runtime.config().clone())
    }

    pub fn counter(&self) -> SharedCounter {
        SharedCounter::open(&self.runtime, StreamId::new())
    }

    pub fn map(&self) -> SharedMap {
        SharedMap::open(&self.runtime, StreamId::new())
    }
}

pub fn raw() -> TransactionBuilder {
    TransactionBuilder::read_after_write()
}

pub fn waw() -> TransactionBuilder {
    TransactionBuilder::write_after_write()
}
