/// How often a board whose station link is down asks the radio to rejoin.
pub const RECONNECT_GRACE_SECS: u32 = 30;

/// Decides when a dropped network link should be kicked again. The first
/// request goes out as soon as the outage is seen, then at most once per
/// grace period until the link is back.
#[derive(Debug, Clone)]
pub struct LinkMonitor {
    grace_secs: i64,
    next_attempt_at: Option<i64>,
}

impl LinkMonitor {
    pub fn new(grace_secs: u32) -> Self {
        Self {
            grace_secs: i64::from(grace_secs.max(1)),
            next_attempt_at: None,
        }
    }

    pub fn observe(&mut self, now: i64, link_up: bool) -> bool {
        if link_up {
            self.next_attempt_at = None;
            return false;
        }
        match self.next_attempt_at {
            Some(at) if now < at => false,
            _ => {
                self.next_attempt_at = Some(now.saturating_add(self.grace_secs));
                true
            }
        }
    }
}

impl Default for LinkMonitor {
    fn default() -> Self {
        Self::new(RECONNECT_GRACE_SECS)
    }
}

#[cfg(test)]
mod tests {
    use std::ops::Range;

    use pretty_assertions::assert_eq;

    use super::*;

    fn attempts(
        monitor: &mut LinkMonitor,
        link: impl Fn(i64) -> bool,
        seconds: Range<i64>,
    ) -> Vec<i64> {
        seconds.filter(|&now| monitor.observe(now, link(now))).collect()
    }

    #[test]
    fn healthy_link_is_left_alone() {
        let mut monitor = LinkMonitor::default();
        assert_eq!(attempts(&mut monitor, |_| true, 0..300), Vec::<i64>::new());
    }

    #[test]
    fn outage_retries_immediately_then_once_per_grace() {
        let mut monitor = LinkMonitor::new(30);
        assert_eq!(
            attempts(&mut monitor, |now| now < 10, 0..100),
            vec![10, 40, 70]
        );
    }

    #[test]
    fn recovery_resets_the_window() {
        let mut monitor = LinkMonitor::new(30);
        // Down 10..15, up 15..50, down again from 50.
        let link = |now: i64| !(10..15).contains(&now) && now < 50;
        assert_eq!(attempts(&mut monitor, link, 0..90), vec![10, 50, 80]);
    }
}
