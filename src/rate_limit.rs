//! Fixed-window, per-IP rate limiting.
//!
//! A [`RateLimiter`] counts requests per client IP inside windows of a fixed
//! period. A [`RateLimitSystem`] stacks three of them (5 minutes, 15 minutes
//! and 1 hour) and admits a request only if every tier does.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::Tiers;

pub const FIVE_MINUTES: Duration = Duration::from_secs(5 * 60);
pub const FIFTEEN_MINUTES: Duration = Duration::from_secs(15 * 60);
pub const ONE_HOUR: Duration = Duration::from_secs(60 * 60);

/// A request was rejected by one of the tiers.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("rate limited, retry after {retry_after} seconds")]
pub struct RateLimited {
    /// Seconds until the rejecting window resets.
    pub retry_after: u64,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    start: i64,
    count: u32,
}

/// Fixed-window counter keyed by client IP.
#[derive(Debug)]
pub struct RateLimiter {
    period: i64,
    limit: u32,
    windows: Mutex<HashMap<IpAddr, Window>>,
}

impl RateLimiter {
    /// A limiter admitting `limit` requests per IP every `period`.
    /// A limit of `0` disables it.
    pub fn new(period: Duration, limit: u32) -> Self {
        RateLimiter {
            period: period.as_secs().max(1) as i64,
            limit,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.limit > 0
    }

    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period as u64)
    }

    /// Count a request from `ip`.
    ///
    /// Returns `0` if it is allowed, otherwise the seconds until the window
    /// for `ip` resets.
    pub async fn check_and_use(&self, ip: IpAddr) -> u64 {
        self.check_and_use_at(ip, Utc::now().timestamp()).await
    }

    async fn check_and_use_at(&self, ip: IpAddr, now: i64) -> u64 {
        if !self.is_enabled() {
            return 0;
        }

        let mut windows = self.windows.lock().await;
        let fresh = Window {
            start: now,
            count: 0,
        };
        let window = windows.entry(ip).or_insert(fresh);
        if window.start + self.period <= now {
            *window = fresh;
        }

        if window.count < self.limit {
            window.count += 1;
            0
        } else {
            (window.start + self.period - now) as u64
        }
    }

    /// Forget every IP whose window has elapsed. Returns how many were dropped.
    pub async fn sweep(&self) -> usize {
        self.sweep_at(Utc::now().timestamp()).await
    }

    async fn sweep_at(&self, now: i64) -> usize {
        let mut windows = self.windows.lock().await;
        let before = windows.len();
        windows.retain(|_, window| window.start + self.period > now);
        before - windows.len()
    }

    #[cfg(test)]
    async fn tracked(&self) -> usize {
        self.windows.lock().await.len()
    }

    /// Sweep once per period until `token` is cancelled.
    pub fn spawn_sweeper(self: &Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let period = limiter.period();
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(period) => {
                        let dropped = limiter.sweep().await;
                        if dropped > 0 {
                            debug!(?period, "dropped {dropped} idle rate limit windows");
                        }
                    }
                }
            }
        })
    }
}

/// Three stacked limiters that must all admit a request.
#[derive(Debug, Clone)]
pub struct RateLimitSystem {
    tiers: [Arc<RateLimiter>; 3],
}

impl RateLimitSystem {
    pub fn new(tiers: Tiers) -> Self {
        RateLimitSystem {
            tiers: [
                Arc::new(RateLimiter::new(FIVE_MINUTES, tiers.per_5_min)),
                Arc::new(RateLimiter::new(FIFTEEN_MINUTES, tiers.per_15_min)),
                Arc::new(RateLimiter::new(ONE_HOUR, tiers.per_1_hour)),
            ],
        }
    }

    /// Count a request from `ip` against each tier, shortest window first.
    ///
    /// Stops at the first tier that rejects; tiers after it are not charged.
    pub async fn check_and_use(&self, ip: IpAddr) -> Result<(), RateLimited> {
        for tier in &self.tiers {
            let retry_after = tier.check_and_use(ip).await;
            if retry_after > 0 {
                debug!(%ip, retry_after, "rate limited");
                return Err(RateLimited { retry_after });
            }
        }
        Ok(())
    }

    /// Start a sweeper for every enabled tier.
    pub fn spawn_sweepers(&self, token: &CancellationToken) -> Vec<JoinHandle<()>> {
        self.tiers
            .iter()
            .filter(|tier| tier.is_enabled())
            .map(|tier| tier.spawn_sweeper(token.child_token()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    const ALICE: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1));
    const BOB: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 2));

    #[tokio::test]
    async fn rejects_after_limit_within_window() {
        let limiter = RateLimiter::new(FIVE_MINUTES, 3);
        let start = 1_000_000;

        for i in 0..3 {
            assert_eq!(limiter.check_and_use_at(ALICE, start + i).await, 0);
        }
        assert_eq!(limiter.check_and_use_at(ALICE, start + 10).await, 290);
        assert_eq!(limiter.check_and_use_at(ALICE, start + 299).await, 1);
    }

    #[tokio::test]
    async fn window_resets_after_period() {
        let limiter = RateLimiter::new(FIVE_MINUTES, 2);
        let start = 1_000_000;

        assert_eq!(limiter.check_and_use_at(ALICE, start).await, 0);
        assert_eq!(limiter.check_and_use_at(ALICE, start).await, 0);
        assert!(limiter.check_and_use_at(ALICE, start).await > 0);

        // the window is half-open: start + period is already a new window
        assert_eq!(limiter.check_and_use_at(ALICE, start + 300).await, 0);
        assert_eq!(limiter.check_and_use_at(ALICE, start + 301).await, 0);
        assert_eq!(limiter.check_and_use_at(ALICE, start + 302).await, 298);
    }

    #[tokio::test]
    async fn reset_starts_count_at_one() {
        let limiter = RateLimiter::new(FIVE_MINUTES, 1);
        assert_eq!(limiter.check_and_use_at(ALICE, 0).await, 0);
        assert_eq!(limiter.check_and_use_at(ALICE, 400).await, 0);
        assert_eq!(limiter.check_and_use_at(ALICE, 401).await, 299);
    }

    #[tokio::test]
    async fn ips_are_counted_separately() {
        let limiter = RateLimiter::new(FIVE_MINUTES, 1);
        assert_eq!(limiter.check_and_use_at(ALICE, 0).await, 0);
        assert_eq!(limiter.check_and_use_at(BOB, 0).await, 0);
        assert!(limiter.check_and_use_at(ALICE, 1).await > 0);
        assert!(limiter.check_and_use_at(BOB, 1).await > 0);
    }

    #[tokio::test]
    async fn zero_limit_disables_tier() {
        let limiter = RateLimiter::new(FIVE_MINUTES, 0);
        for _ in 0..1000 {
            assert_eq!(limiter.check_and_use(ALICE).await, 0);
        }
        assert_eq!(limiter.tracked().await, 0);
    }

    #[tokio::test]
    async fn system_rejects_fourth_request() {
        let system = RateLimitSystem::new(Tiers {
            per_5_min: 3,
            per_15_min: 0,
            per_1_hour: 0,
        });

        for _ in 0..3 {
            assert!(system.check_and_use(ALICE).await.is_ok());
        }
        let limited = system.check_and_use(ALICE).await.unwrap_err();
        assert!(limited.retry_after > 0);
        assert!(limited.retry_after <= 300);
    }

    #[tokio::test]
    async fn disabled_tier_does_not_block_others() {
        let system = RateLimitSystem::new(Tiers {
            per_5_min: 0,
            per_15_min: 5,
            per_1_hour: 10,
        });
        for _ in 0..5 {
            assert!(system.check_and_use(ALICE).await.is_ok());
        }

        let limited = system.check_and_use(ALICE).await.unwrap_err();
        assert!(limited.retry_after > 300, "came from the 15 minute tier");
        assert!(limited.retry_after <= 900);
    }

    #[tokio::test]
    async fn first_rejecting_tier_wins() {
        let system = RateLimitSystem::new(Tiers {
            per_5_min: 2,
            per_15_min: 2,
            per_1_hour: 2,
        });
        assert!(system.check_and_use(ALICE).await.is_ok());
        assert!(system.check_and_use(ALICE).await.is_ok());

        let limited = system.check_and_use(ALICE).await.unwrap_err();
        assert!(limited.retry_after <= 300);
        // later tiers were not charged for the rejected request
        let [_, fifteen, hour] = &system.tiers;
        assert_eq!(fifteen.windows.lock().await[&ALICE].count, 2);
        assert_eq!(hour.windows.lock().await[&ALICE].count, 2);
    }

    #[tokio::test]
    async fn sweep_drops_only_elapsed_windows() {
        let limiter = RateLimiter::new(FIVE_MINUTES, 5);
        limiter.check_and_use_at(ALICE, 0).await;
        limiter.check_and_use_at(BOB, 200).await;
        assert_eq!(limiter.tracked().await, 2);

        assert_eq!(limiter.sweep_at(299).await, 0);
        assert_eq!(limiter.sweep_at(300).await, 1);
        assert_eq!(limiter.tracked().await, 1);
        assert_eq!(limiter.sweep_at(500).await, 1);
        assert_eq!(limiter.tracked().await, 0);
    }

    #[tokio::test]
    async fn sweepers_stop_on_cancel() {
        let system = RateLimitSystem::new(Tiers {
            per_5_min: 1,
            per_15_min: 0,
            per_1_hour: 1,
        });
        let token = CancellationToken::new();
        let handles = system.spawn_sweepers(&token);
        assert_eq!(handles.len(), 2);

        token.cancel();
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(1), handle)
                .await
                .expect("sweeper did not stop")
                .unwrap();
        }
    }
}
