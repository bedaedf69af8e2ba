use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// A point in time relative to the Unix epoch.
///
/// The nanosecond part is always in `[0, 1e9)`; times before the epoch carry
/// a negative `sec` with a positive `nsec`, the same way `struct timespec`
/// represents them.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Timespec {
    sec: i64,
    nsec: u32,
}

impl Timespec {
    pub const ZERO: Timespec = Timespec { sec: 0, nsec: 0 };

    /// Builds a timespec, carrying any out of range nanoseconds into seconds.
    pub fn new(sec: i64, nsec: i64) -> Self {
        let carry = nsec.div_euclid(NANOS_PER_SEC);
        Self {
            sec: sec.saturating_add(carry),
            nsec: nsec.rem_euclid(NANOS_PER_SEC) as u32,
        }
    }

    pub fn now() -> Self {
        SystemTime::now().into()
    }

    pub fn sec(&self) -> i64 {
        self.sec
    }

    pub fn nsec(&self) -> u32 {
        self.nsec
    }

    pub fn is_zero(&self) -> bool {
        self.sec == 0 && self.nsec == 0
    }

    pub fn to_system_time(&self) -> SystemTime {
        if self.sec >= 0 {
            UNIX_EPOCH + Duration::new(self.sec as u64, self.nsec)
        } else {
            // sec < 0 with a positive nsec: step back whole seconds, then forward.
            UNIX_EPOCH - Duration::from_secs(self.sec.unsigned_abs()) + Duration::from_nanos(self.nsec as u64)
        }
    }
}

impl From<SystemTime> for Timespec {
    fn from(t: SystemTime) -> Self {
        match t.duration_since(UNIX_EPOCH) {
            Ok(d) => Timespec::new(d.as_secs().min(i64::MAX as u64) as i64, d.subsec_nanos() as i64),
            Err(e) => {
                let d = e.duration();
                Timespec::new(
                    -(d.as_secs().min(i64::MAX as u64) as i64),
                    -(d.subsec_nanos() as i64),
                )
            }
        }
    }
}

impl fmt::Debug for Timespec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timespec({}.{:09})", self.sec, self.nsec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_normalizes_nanos() {
        let t = Timespec::new(5, 1_500_000_000);
        assert_eq!((t.sec(), t.nsec()), (6, 500_000_000));

        let t = Timespec::new(5, -1);
        assert_eq!((t.sec(), t.nsec()), (4, 999_999_999));
    }

    #[test]
    fn test_system_time_round_trip() {
        let t = Timespec::new(1_700_000_000, 123_456_789);
        assert_eq!(Timespec::from(t.to_system_time()), t);

        let before_epoch = Timespec::new(-2, 250_000_000);
        assert_eq!(Timespec::from(before_epoch.to_system_time()), before_epoch);
    }

    #[test]
    fn test_zero_and_ordering() {
        assert!(Timespec::ZERO.is_zero());
        assert!(Timespec::new(1, 0) > Timespec::new(0, 999_999_999));
        assert!(Timespec::now() > Timespec::ZERO);
    }

    #[test]
    fn test_debug_format() {
        assert_eq!(format!("{:?}", Timespec::new(3, 7)), "Timespec(3.000000007)");
    }
}
