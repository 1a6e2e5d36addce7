//! Column types shared by the row structs

use chrono::{DateTime, Utc};

use crate::errors::TrackerError;
use crate::models::HardwareNumber;

/// Timestamp stored as whole seconds from Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, sqlx::Type)]
#[sqlx(transparent)]
pub struct EpochSeconds(i64);

impl From<DateTime<Utc>> for EpochSeconds {
    fn from(value: DateTime<Utc>) -> Self {
        Self(value.timestamp())
    }
}

impl TryFrom<EpochSeconds> for DateTime<Utc> {
    type Error = TrackerError;

    fn try_from(value: EpochSeconds) -> Result<Self, Self::Error> {
        DateTime::from_timestamp(value.0, 0)
            .ok_or_else(|| TrackerError::validation(format!("timestamp out of range: {}", value.0)))
    }
}

/// Station number column, signed as SQLite integers are
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(transparent)]
pub struct StoredNumber(i64);

impl From<HardwareNumber> for StoredNumber {
    fn from(value: HardwareNumber) -> Self {
        Self(value.value() as i64)
    }
}

impl TryFrom<StoredNumber> for HardwareNumber {
    type Error = TrackerError;

    fn try_from(value: StoredNumber) -> Result<Self, Self::Error> {
        HardwareNumber::try_from(value.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_seconds_drop_subsecond_part() {
        let at = DateTime::from_timestamp(1_715_126_400, 750_000_000).unwrap();
        let stored = EpochSeconds::from(at);
        let back = DateTime::<Utc>::try_from(stored).unwrap();
        assert_eq!(back.timestamp(), 1_715_126_400);
        assert_eq!(back.timestamp_subsec_millis(), 0);
    }

    #[test]
    fn test_stored_number_rejects_invalid() {
        assert!(HardwareNumber::try_from(StoredNumber(0)).is_err());
        let n = HardwareNumber::try_from(0xa1b2c3d4u32).unwrap();
        assert_eq!(HardwareNumber::try_from(StoredNumber::from(n)).unwrap(), n);
    }
}
