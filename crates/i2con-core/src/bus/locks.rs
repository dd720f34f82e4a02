use i2con_proto::BusId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// One mutex per bus id, shared by all sessions of a server.
///
/// Selecting a device and transferring a register are two separate bus
/// operations; sessions hold the bus lock across both so another session on the
/// same bus cannot re-select in between.
#[derive(Debug, Default)]
pub struct BusLocks {
    inner: Mutex<HashMap<BusId, Arc<Mutex<()>>>>,
}

impl BusLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_for(&self, bus: BusId) -> Arc<Mutex<()>> {
        self.inner.lock().entry(bus).or_default().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_bus_shares_a_lock() {
        let locks = BusLocks::new();
        let a = locks.lock_for(1);
        let b = locks.lock_for(1);
        let c = locks.lock_for(0);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));

        let _held = a.lock();
        assert!(b.try_lock().is_none());
        assert!(c.try_lock().is_some());
    }
}
