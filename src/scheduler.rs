use std::time::Duration;

/// Open-loop ramp-up: hands out user ids at a fixed cadence until the
/// target population has been spawned.
#[derive(Debug, Clone)]
pub struct RampUp {
    total_users: u32,
    spawned: u32,
    interval: Duration,
}

impl RampUp {
    pub fn new(total_users: u32, test_duration: Duration) -> Self {
        Self {
            total_users,
            spawned: 0,
            interval: spawn_interval(test_duration, total_users),
        }
    }

    /// Time between two spawns.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn spawned(&self) -> u32 {
        self.spawned
    }

    pub fn is_complete(&self) -> bool {
        self.spawned >= self.total_users
    }

    /// Claims the next user id, or `None` once the population is reached.
    pub fn next_user(&mut self) -> Option<u32> {
        if self.is_complete() {
            return None;
        }
        let id = self.spawned;
        self.spawned += 1;
        Some(id)
    }
}

/// `test_duration / total_users`, never zero so it can drive a timer.
pub fn spawn_interval(test_duration: Duration, total_users: u32) -> Duration {
    (test_duration / total_users.max(1)).max(Duration::from_nanos(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_spreads_users_over_the_test() {
        assert_eq!(
            spawn_interval(Duration::from_secs(60), 200),
            Duration::from_millis(300)
        );
        assert_eq!(
            spawn_interval(Duration::from_secs(3), 3),
            Duration::from_secs(1)
        );
        assert_eq!(
            spawn_interval(Duration::from_secs(10), 1),
            Duration::from_secs(10)
        );
        assert_eq!(
            spawn_interval(Duration::from_nanos(5), 1000),
            Duration::from_nanos(1)
        );
    }

    #[test]
    fn stops_after_target_population() {
        let mut ramp = RampUp::new(3, Duration::from_secs(3));
        assert_eq!(ramp.next_user(), Some(0));
        assert_eq!(ramp.next_user(), Some(1));
        assert!(!ramp.is_complete());
        assert_eq!(ramp.next_user(), Some(2));
        assert!(ramp.is_complete());

        for _ in 0..10 {
            assert_eq!(ramp.next_user(), None);
        }
        assert_eq!(ramp.spawned(), 3);
    }
}
