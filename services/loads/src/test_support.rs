use chrono::{DateTime, Duration, Local, Utc};
use mockable::Clock;
use parking_lot::Mutex;

/// Clock that only moves when a test advances it
pub struct MutableClock(Mutex<DateTime<Utc>>);

impl MutableClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self(Mutex::new(now))
    }

    pub fn advance(&self, delta: Duration) {
        *self.0.lock() += delta;
    }

    pub fn now_ms(&self) -> i64 {
        self.utc().timestamp_millis()
    }
}

impl Clock for MutableClock {
    fn local(&self) -> DateTime<Local> {
        self.utc().with_timezone(&Local)
    }

    fn utc(&self) -> DateTime<Utc> {
        *self.0.lock()
    }
}
