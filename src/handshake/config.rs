use std::time::Duration;

/// SAML token polling bounds.
///
/// Polling stops at whichever comes first: `max_attempts` requests or `timeout` of wall
/// clock. A request still in flight when the wall-clock budget runs out is abandoned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
    pub timeout: Duration,
}

impl Default for PollPolicy {
    /// 1s interval, 180 attempts, 180s ceiling.
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_attempts: 180,
            timeout: Duration::from_secs(180),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HandshakeConfig {
    popup_interval: Duration,
    popup_width: u32,
    popup_height: u32,
    poll: PollPolicy,
    message_timeout: Option<Duration>,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl HandshakeConfig {
    /// Default config: popup checked every 500ms, 500x600 popup, default poll policy,
    /// no absolute timeout for callback messages.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            popup_interval: Duration::from_millis(500),
            popup_width: 500,
            popup_height: 600,
            poll: PollPolicy {
                interval: Duration::from_secs(1),
                max_attempts: 180,
                timeout: Duration::from_secs(180),
            },
            message_timeout: None,
        }
    }

    #[must_use]
    pub const fn with_popup_interval(mut self, interval: Duration) -> Self {
        self.popup_interval = interval;
        self
    }

    #[must_use]
    pub const fn with_popup_size(mut self, width: u32, height: u32) -> Self {
        self.popup_width = width;
        self.popup_height = height;
        self
    }

    #[must_use]
    pub const fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    #[must_use]
    pub const fn with_message_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.message_timeout = timeout;
        self
    }

    /// Replace zero durations and counts with usable minimums.
    #[must_use]
    pub fn normalize(self) -> Self {
        let popup_interval = if self.popup_interval.is_zero() {
            Duration::from_millis(500)
        } else {
            self.popup_interval
        };
        let interval = if self.poll.interval.is_zero() {
            Duration::from_secs(1)
        } else {
            self.poll.interval
        };
        let timeout = if self.poll.timeout.is_zero() {
            Duration::from_secs(180)
        } else {
            self.poll.timeout
        };

        Self {
            popup_interval,
            popup_width: self.popup_width.max(1),
            popup_height: self.popup_height.max(1),
            poll: PollPolicy {
                interval,
                max_attempts: self.poll.max_attempts.max(1),
                timeout,
            },
            message_timeout: self.message_timeout.filter(|t| !t.is_zero()),
        }
    }

    #[must_use]
    pub const fn popup_interval(&self) -> Duration {
        self.popup_interval
    }

    #[must_use]
    pub const fn popup_size(&self) -> (u32, u32) {
        (self.popup_width, self.popup_height)
    }

    #[must_use]
    pub const fn poll(&self) -> PollPolicy {
        self.poll
    }

    #[must_use]
    pub const fn message_timeout(&self) -> Option<Duration> {
        self.message_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HandshakeConfig::default();
        assert_eq!(config.popup_interval(), Duration::from_millis(500));
        assert_eq!(config.popup_size(), (500, 600));
        assert_eq!(config.poll(), PollPolicy::default());
        assert_eq!(config.message_timeout(), None);
    }

    #[test]
    fn test_normalize_replaces_zeroes() {
        let config = HandshakeConfig::new()
            .with_popup_interval(Duration::ZERO)
            .with_popup_size(0, 0)
            .with_poll_policy(PollPolicy {
                interval: Duration::ZERO,
                max_attempts: 0,
                timeout: Duration::ZERO,
            })
            .with_message_timeout(Some(Duration::ZERO))
            .normalize();

        assert_eq!(config.popup_interval(), Duration::from_millis(500));
        assert_eq!(config.popup_size(), (1, 1));
        assert_eq!(
            config.poll(),
            PollPolicy {
                max_attempts: 1,
                ..PollPolicy::default()
            }
        );
        assert_eq!(config.message_timeout(), None);
    }
}
