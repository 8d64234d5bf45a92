//! Interpretation of the `keep-alive` response header.

use std::time::Duration;

use http::HeaderValue;

/// Shortest idle period worth keeping a socket open for.
pub const MIN_KEEP_ALIVE: Duration = Duration::from_secs(1);

/// Outcome of keep-alive negotiation for the next idle period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepAlive {
    /// Keep the socket for at most this long while idle.
    Timeout(Duration),
    /// The header carried no timeout; keep the current one.
    Unchanged,
    /// Do not reuse the socket.
    Reset,
}

/// Extract `timeout=<seconds>` from a `keep-alive` header value.
pub fn parse_keep_alive_timeout(value: &HeaderValue) -> Option<Duration> {
    let value = value.to_str().ok()?;
    value.split(',').find_map(|param| {
        let (key, secs) = param.split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("timeout") {
            return None;
        }
        secs.trim().parse::<u64>().ok().map(Duration::from_secs)
    })
}

/// Decide how long an idle socket may be kept after a response.
///
/// Without a `keep-alive` header the configured idle timeout applies. A
/// header without `timeout=` leaves the current timeout alone. An advertised
/// timeout is shortened by `threshold` (the server may close at
/// the exact deadline) and capped at `max`. Anything under one second is not
/// worth keeping.
pub fn negotiate_keep_alive(
    header: Option<&HeaderValue>,
    idle_timeout: Duration,
    threshold: Duration,
    max: Duration,
) -> KeepAlive {
    let Some(header) = header else {
        return KeepAlive::Timeout(idle_timeout);
    };
    let Some(advertised) = parse_keep_alive_timeout(header) else {
        return KeepAlive::Unchanged;
    };

    let timeout = advertised.saturating_sub(threshold).min(max);
    if timeout < MIN_KEEP_ALIVE {
        KeepAlive::Reset
    } else {
        KeepAlive::Timeout(timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IDLE: Duration = Duration::from_secs(4);
    const THRESHOLD: Duration = Duration::from_secs(1);
    const MAX: Duration = Duration::from_secs(600);

    #[test]
    fn test_parse_timeout() {
        let value = HeaderValue::from_static("timeout=5, max=100");
        assert_eq!(parse_keep_alive_timeout(&value), Some(Duration::from_secs(5)));

        let value = HeaderValue::from_static("max=100, Timeout = 7");
        assert_eq!(parse_keep_alive_timeout(&value), Some(Duration::from_secs(7)));

        let value = HeaderValue::from_static("max=100");
        assert_eq!(parse_keep_alive_timeout(&value), None);

        let value = HeaderValue::from_static("timeout=abc");
        assert_eq!(parse_keep_alive_timeout(&value), None);
    }

    #[test]
    fn test_negotiate_default() {
        assert_eq!(
            negotiate_keep_alive(None, IDLE, THRESHOLD, MAX),
            KeepAlive::Timeout(IDLE)
        );
    }

    #[test]
    fn test_negotiate_without_timeout_param() {
        let value = HeaderValue::from_static("max=100");
        assert_eq!(
            negotiate_keep_alive(Some(&value), IDLE, THRESHOLD, MAX),
            KeepAlive::Unchanged
        );
    }

    #[test]
    fn test_negotiate_subtracts_threshold() {
        let value = HeaderValue::from_static("timeout=5");
        assert_eq!(
            negotiate_keep_alive(Some(&value), IDLE, THRESHOLD, MAX),
            KeepAlive::Timeout(Duration::from_secs(4))
        );
    }

    #[test]
    fn test_negotiate_caps_at_max() {
        let value = HeaderValue::from_static("timeout=3600");
        assert_eq!(
            negotiate_keep_alive(Some(&value), IDLE, THRESHOLD, MAX),
            KeepAlive::Timeout(MAX)
        );
    }

    #[test]
    fn test_negotiate_short_timeout_resets() {
        let value = HeaderValue::from_static("timeout=1");
        assert_eq!(
            negotiate_keep_alive(Some(&value), IDLE, THRESHOLD, MAX),
            KeepAlive::Reset
        );
    }
}
