//! IdGenerator port - correlation ids for deliveries without an order.

use crate::domain::CorrelationId;
use crate::ports::Clock;
use ulid::Ulid;

/// Mints correlation ids.
///
/// `Send + Sync` because the robot driver shares one generator across every
/// task that calls it.
pub trait IdGenerator: Send + Sync {
    fn generate_correlation_id(&self) -> CorrelationId;
}

/// ULID-based generator. The timestamp part comes from the supplied clock, so
/// tests with a `FixedClock` get a predictable prefix.
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_correlation_id(&self) -> CorrelationId {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        let ulid = Ulid::from_parts(timestamp_ms, rand::random());
        CorrelationId::from(ulid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{FixedClock, SystemClock};
    use chrono::{TimeZone, Utc};

    #[test]
    fn ulid_generator_generates_unique_ids() {
        let id_gen = UlidGenerator::new(SystemClock);

        let id1 = id_gen.generate_correlation_id();
        let id2 = id_gen.generate_correlation_id();

        assert_ne!(id1, id2);
        assert!(id1.to_string().starts_with("dlv-"));
    }

    #[test]
    fn fixed_clock_pins_the_timestamp_part() {
        let fixed_time = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let id_gen = UlidGenerator::new(FixedClock::new(fixed_time));

        let id1 = id_gen.generate_correlation_id();
        let id2 = id_gen.generate_correlation_id();

        // random part still differs
        assert_ne!(id1, id2);
        assert_eq!(id1.as_ulid().timestamp_ms(), fixed_time.timestamp_millis() as u64);
        assert_eq!(id2.as_ulid().timestamp_ms(), fixed_time.timestamp_millis() as u64);
    }
}
