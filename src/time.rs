use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crate::error::Result;

/// Seconds since the unix epoch, the unit connect token timestamps are expressed in.
pub fn time_now_secs() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}

/// Feeds the cooperative `update(dt, now)` loops of the client and server.
#[derive(Debug, Clone)]
pub struct Clock {
    last_tick: Instant,
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock {
    pub fn new() -> Self {
        Self {
            last_tick: Instant::now(),
        }
    }
    /// Returns the seconds elapsed since the previous tick and the current unix time.
    pub fn tick(&mut self) -> Result<(f64, u64)> {
        let now = Instant::now();
        let dt = now.duration_since(self.last_tick).as_secs_f64();
        self.last_tick = now;
        Ok((dt, time_now_secs()?))
    }
}
