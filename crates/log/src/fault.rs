//! Fault injection for the in-memory log
//!
//! Faults are armed per call site and fire on the next matching calls,
//! either a fixed number of times or until `heal()`.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tessel_core::{Address, StreamId, TesselError};

/// Which collaborator call a fault applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultSite {
    /// `SharedLog::read`
    Read,
    /// `SharedLog::append`
    Append,
    /// `Sequencer::next_snapshot_timestamp`
    Sequencer,
}

/// The failure to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The collaborator is unreachable
    Network,
    /// The requested range was reclaimed
    Trim,
}

#[derive(Debug, Clone, Copy)]
struct Armed {
    fault: Fault,
    /// `None` fires until healed
    remaining: Option<u32>,
}

/// Armed faults plus per-site fire counts
#[derive(Debug, Default)]
pub struct FaultInjector {
    armed: Mutex<FxHashMap<FaultSite, Armed>>,
    fired: Mutex<FxHashMap<FaultSite, u64>>,
}

impl FaultInjector {
    /// Create an injector with nothing armed
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `fault` at `site` for the next `times` calls (`None` = forever)
    ///
    /// Re-arming a site replaces whatever was armed there.
    pub fn inject(&self, site: FaultSite, fault: Fault, times: Option<u32>) {
        if times == Some(0) {
            self.armed.lock().remove(&site);
            return;
        }
        self.armed.lock().insert(
            site,
            Armed {
                fault,
                remaining: times,
            },
        );
    }

    /// Disarm every site
    pub fn heal(&self) {
        self.armed.lock().clear();
    }

    /// How many times a fault fired at `site`
    pub fn fired(&self, site: FaultSite) -> u64 {
        self.fired.lock().get(&site).copied().unwrap_or(0)
    }

    /// Consume one shot at `site`, if armed
    pub(crate) fn take(&self, site: FaultSite) -> Option<Fault> {
        let mut armed = self.armed.lock();
        let entry = armed.get_mut(&site)?;
        let fault = entry.fault;
        let exhausted = match entry.remaining.as_mut() {
            Some(n) => {
                *n -= 1;
                *n == 0
            }
            None => false,
        };
        if exhausted {
            armed.remove(&site);
        }
        drop(armed);
        *self.fired.lock().entry(site).or_insert(0) += 1;
        Some(fault)
    }

    /// Fire the armed fault at `site` as an error, if any
    pub(crate) fn check(
        &self,
        site: FaultSite,
        stream: Option<StreamId>,
        address: Address,
    ) -> Result<(), TesselError> {
        match self.take(site) {
            None => Ok(()),
            Some(Fault::Network) => {
                tracing::debug!(?site, "injected network fault");
                Err(TesselError::network(format!("injected fault at {:?}", site)))
            }
            Some(Fault::Trim) => {
                tracing::debug!(?site, address, "injected trim fault");
                Err(TesselError::Trimmed { stream, address })
            }
        }
    }
}
