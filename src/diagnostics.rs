//! Postmortem dispatch trace.
//!
//! Before every dispatch the scheduler persists the packed id of the
//! work it is about to run. After a watchdog reset or crash, the host
//! reads the record back and renders it with
//! [`decode_for_humans`](crate::scheduler::id::decode_for_humans) to
//! answer "what was the node doing when it died". A second marker
//! distinguishes deliberate restarts from crashes.
//!
//! Every write here is best-effort: diagnostics must never affect
//! scheduling, and the record is never used to resume timer state.

use serde::{Deserialize, Serialize};

use crate::ports::StoragePort;
use crate::scheduler::id::{self, TimerId};

const SCHED_NAMESPACE: &str = "sched";
const LAST_DISPATCH_KEY: &str = "last_id";
const REBOOT_KEY: &str = "reboot";

/// Persisted form of the most recent dispatch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DispatchRecord {
    /// Packed mixed id (category in the high bits).
    pub raw_id: u32,
    /// Category tag kept redundantly so a postmortem tool can bucket
    /// records even if the sub-key layout changes between firmwares.
    pub category: u8,
}

/// Persist the id of the work about to be dispatched. Best-effort.
pub fn persist_last_dispatch(store: &mut dyn StoragePort, id: TimerId) {
    let record = DispatchRecord {
        raw_id: id::encode(id),
        category: id.category() as u8,
    };
    if let Ok(bytes) = postcard::to_allocvec(&record) {
        let _ = store.write(SCHED_NAMESPACE, LAST_DISPATCH_KEY, &bytes);
    }
}

/// Read the surviving dispatch record, if any.
pub fn read_last_dispatch(store: &dyn StoragePort) -> Option<DispatchRecord> {
    let mut buf = [0u8; 16];
    let len = store.read(SCHED_NAMESPACE, LAST_DISPATCH_KEY, &mut buf).ok()?;
    postcard::from_bytes(&buf[..len]).ok()
}

/// Human-readable rendering of the surviving record, for boot logs.
pub fn render_last_dispatch(store: &dyn StoragePort) -> Option<String> {
    read_last_dispatch(store).map(|r| id::decode_for_humans(r.raw_id))
}

/// Mark that the upcoming reset is intentional (OTA, user command).
///
/// Boot code that finds this marker knows the reset was commanded and
/// clears it; its absence after a reset means a crash or watchdog.
pub fn mark_intended_reboot(store: &mut dyn StoragePort, reason: u8) {
    persist_last_dispatch(store, TimerId::RebootMarker { reason });
    let _ = store.write(SCHED_NAMESPACE, REBOOT_KEY, &[reason]);
}

/// Read and interpret the intended-reboot marker.
pub fn read_intended_reboot(store: &dyn StoragePort) -> Option<u8> {
    let mut buf = [0u8; 1];
    match store.read(SCHED_NAMESPACE, REBOOT_KEY, &mut buf) {
        Ok(1) => Some(buf[0]),
        _ => None,
    }
}

/// Clear the marker once boot code has consumed it.
pub fn clear_intended_reboot(store: &mut dyn StoragePort) {
    let _ = store.delete(SCHED_NAMESPACE, REBOOT_KEY);
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::StorageError;
    use crate::scheduler::id::GpioKind;
    use std::collections::HashMap;

    struct MockStorage {
        data: HashMap<String, Vec<u8>>,
    }

    impl MockStorage {
        fn new() -> Self {
            Self {
                data: HashMap::new(),
            }
        }
    }

    impl StoragePort for MockStorage {
        fn read(&self, ns: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
            match self.data.get(&format!("{ns}::{key}")) {
                Some(v) => {
                    let len = v.len().min(buf.len());
                    buf[..len].copy_from_slice(&v[..len]);
                    Ok(len)
                }
                None => Err(StorageError::NotFound),
            }
        }

        fn write(&mut self, ns: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
            self.data.insert(format!("{ns}::{key}"), data.to_vec());
            Ok(())
        }

        fn delete(&mut self, ns: &str, key: &str) -> Result<(), StorageError> {
            self.data.remove(&format!("{ns}::{key}"));
            Ok(())
        }

        fn exists(&self, ns: &str, key: &str) -> bool {
            self.data.contains_key(&format!("{ns}::{key}"))
        }
    }

    #[test]
    fn persist_then_read_roundtrip() {
        let mut store = MockStorage::new();
        let id = TimerId::Gpio {
            expander: GpioKind::Internal,
            pin: 4,
            value: 1,
        };
        persist_last_dispatch(&mut store, id);

        let record = read_last_dispatch(&store).unwrap();
        assert_eq!(record.raw_id, id::encode(id));
        assert_eq!(record.category, id.category() as u8);
    }

    #[test]
    fn newer_dispatch_overwrites_older() {
        let mut store = MockStorage::new();
        persist_last_dispatch(&mut store, TimerId::Rules { index: 1 });
        persist_last_dispatch(&mut store, TimerId::TaskDevice { task: 5 });

        let record = read_last_dispatch(&store).unwrap();
        assert_eq!(
            id::decode(record.raw_id),
            Some(TimerId::TaskDevice { task: 5 })
        );
    }

    #[test]
    fn render_produces_readable_text() {
        let mut store = MockStorage::new();
        persist_last_dispatch(&mut store, TimerId::Rules { index: 3 });
        let text = render_last_dispatch(&store).unwrap();
        assert!(text.contains("rules timer #3"));
    }

    #[test]
    fn empty_store_reads_nothing() {
        let store = MockStorage::new();
        assert!(read_last_dispatch(&store).is_none());
        assert!(render_last_dispatch(&store).is_none());
        assert!(read_intended_reboot(&store).is_none());
    }

    #[test]
    fn intended_reboot_marker_lifecycle() {
        let mut store = MockStorage::new();
        mark_intended_reboot(&mut store, 2);
        assert_eq!(read_intended_reboot(&store), Some(2));

        // The dispatch record also carries the marker for the postmortem log.
        let text = render_last_dispatch(&store).unwrap();
        assert!(text.contains("intended reboot"));

        clear_intended_reboot(&mut store);
        assert!(read_intended_reboot(&store).is_none());
    }
}
