//! Per-station mutual exclusion.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::models::HardwareNumber;

/// Registry of one async lock per station.
///
/// Writers holding a station's guard see a consistent read-modify-write of
/// that station; different stations proceed in parallel.
#[derive(Debug, Default)]
pub struct StationLocks {
    locks: Mutex<HashMap<HardwareNumber, Arc<Mutex<()>>>>,
}

impl StationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `station`
    pub async fn lock(&self, station: HardwareNumber) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.entry(station).or_default().clone()
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_station_is_exclusive() {
        let locks = Arc::new(StationLocks::new());
        let station = HardwareNumber::try_from(7i64).unwrap();

        let guard = locks.lock(station).await;
        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(station).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());
        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn test_different_stations_do_not_block() {
        let locks = StationLocks::new();
        let _a = locks.lock(HardwareNumber::try_from(1i64).unwrap()).await;
        let b = tokio::time::timeout(
            Duration::from_millis(100),
            locks.lock(HardwareNumber::try_from(2i64).unwrap()),
        )
        .await;
        assert!(b.is_ok());
    }
}
