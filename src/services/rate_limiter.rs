use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use sqlx::{PgPool, Row};

use crate::error::{Error, Result};

/// Maximum hits allowed per fixed window.
#[derive(Debug, Clone, Copy)]
pub struct RateLimit {
    pub max: u32,
    pub window: Duration,
}

impl RateLimit {
    pub fn new(max: u32, window: Duration) -> Self {
        Self {
            max: max.max(1),
            window,
        }
    }

    pub fn per_second(max: u32) -> Self {
        Self::new(max, Duration::from_secs(1))
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub allowed: bool,
    pub current: u32,
    pub limit: u32,
    pub reset_in_ms: u64,
}

/// Fixed-window counter keyed by an arbitrary string.
///
/// The increment and the first-hit window expiry happen in one atomic step in
/// both backends, so a window can never be reset between the two.
#[derive(Clone)]
pub enum RateLimiter {
    Memory(MemoryRateLimiter),
    Postgres(PgRateLimiter),
}

impl RateLimiter {
    pub fn memory() -> Self {
        RateLimiter::Memory(MemoryRateLimiter::default())
    }

    pub fn postgres(pool: PgPool) -> Self {
        RateLimiter::Postgres(PgRateLimiter { pool })
    }

    pub async fn check(&self, key: &str, limit: RateLimit) -> Result<Decision> {
        match self {
            RateLimiter::Memory(l) => l.check(key, limit),
            RateLimiter::Postgres(l) => l.check(key, limit).await,
        }
    }

    /// Current window state without counting a hit.
    pub async fn status(&self, key: &str, limit: RateLimit) -> Result<Decision> {
        match self {
            RateLimiter::Memory(l) => l.status(key, limit),
            RateLimiter::Postgres(l) => l.status(key, limit).await,
        }
    }

    /// `check` that turns a denial into [`Error::RateLimited`].
    pub async fn enforce(&self, key: &str, limit: RateLimit) -> Result<Decision> {
        let decision = self.check(key, limit).await?;
        if decision.allowed {
            Ok(decision)
        } else {
            tracing::info!(key, current = decision.current, limit = decision.limit, "rate limit hit");
            Err(Error::RateLimited(format!(
                "retry in {}s",
                decision.reset_in_ms.div_ceil(1000)
            )))
        }
    }
}

#[derive(Debug)]
struct WindowState {
    expires_at: Instant,
    count: u32,
}

const PRUNE_THRESHOLD: usize = 10_000;

#[derive(Clone, Default)]
pub struct MemoryRateLimiter {
    windows: Arc<Mutex<HashMap<String, WindowState>>>,
}

impl MemoryRateLimiter {
    fn check(&self, key: &str, limit: RateLimit) -> Result<Decision> {
        let mut windows = self
            .windows
            .lock()
            .map_err(|_| Error::Internal("rate limiter mutex poisoned".into()))?;
        let now = Instant::now();

        if windows.len() > PRUNE_THRESHOLD {
            windows.retain(|_, w| w.expires_at > now);
        }

        let window = windows
            .entry(key.to_string())
            .or_insert_with(|| WindowState {
                expires_at: now + limit.window,
                count: 0,
            });
        if window.expires_at <= now {
            window.expires_at = now + limit.window;
            window.count = 0;
        }
        window.count = window.count.saturating_add(1);

        Ok(Decision {
            allowed: window.count <= limit.max,
            current: window.count,
            limit: limit.max,
            reset_in_ms: window.expires_at.saturating_duration_since(now).as_millis() as u64,
        })
    }

    fn status(&self, key: &str, limit: RateLimit) -> Result<Decision> {
        let windows = self
            .windows
            .lock()
            .map_err(|_| Error::Internal("rate limiter mutex poisoned".into()))?;
        let now = Instant::now();
        let (current, reset_in) = match windows.get(key) {
            Some(w) if w.expires_at > now => (w.count, w.expires_at - now),
            _ => (0, Duration::ZERO),
        };
        Ok(Decision {
            allowed: current < limit.max,
            current,
            limit: limit.max,
            reset_in_ms: reset_in.as_millis() as u64,
        })
    }
}

#[derive(Clone)]
pub struct PgRateLimiter {
    pool: PgPool,
}

impl PgRateLimiter {
    async fn check(&self, key: &str, limit: RateLimit) -> Result<Decision> {
        let row = sqlx::query(
            r#"
            INSERT INTO rate_limits (key, count, expires_at)
            VALUES ($1, 1, NOW() + make_interval(secs => $2))
            ON CONFLICT (key) DO UPDATE SET
                count = CASE WHEN rate_limits.expires_at <= NOW() THEN 1
                             ELSE rate_limits.count + 1 END,
                expires_at = CASE WHEN rate_limits.expires_at <= NOW()
                                  THEN NOW() + make_interval(secs => $2)
                                  ELSE rate_limits.expires_at END
            RETURNING count,
                GREATEST(0, EXTRACT(EPOCH FROM (expires_at - NOW())) * 1000)::BIGINT AS reset_in_ms
            "#,
        )
        .bind(key)
        .bind(limit.window.as_secs_f64())
        .fetch_one(&self.pool)
        .await?;

        let current: i32 = row.try_get("count")?;
        let reset_in_ms: i64 = row.try_get("reset_in_ms")?;
        let current = current.max(0) as u32;
        Ok(Decision {
            allowed: current <= limit.max,
            current,
            limit: limit.max,
            reset_in_ms: reset_in_ms.max(0) as u64,
        })
    }

    async fn status(&self, key: &str, limit: RateLimit) -> Result<Decision> {
        let row = sqlx::query(
            r#"
            SELECT count,
                GREATEST(0, EXTRACT(EPOCH FROM (expires_at - NOW())) * 1000)::BIGINT AS reset_in_ms
            FROM rate_limits
            WHERE key = $1 AND expires_at > NOW()
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        let (current, reset_in_ms) = match row {
            Some(row) => (
                row.try_get::<i32, _>("count")?.max(0) as u32,
                row.try_get::<i64, _>("reset_in_ms")?.max(0) as u64,
            ),
            None => (0, 0),
        };
        Ok(Decision {
            allowed: current < limit.max,
            current,
            limit: limit.max,
            reset_in_ms,
        })
    }
}
