//! Gateway configuration.
//!
//! Everything is resolved once at startup: built-in defaults, overridden by
//! `KONRO_*` environment variables, with host/port additionally
//! overridable from the command line. The core holds no persisted state;
//! all jobs are in-memory and lost on restart.

use std::time::Duration;

use crate::request::GenerationParams;

/// Tunables consumed by the admission scheduler.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// Maximum concurrent generations `C`. The single serialization point
    /// guarding the accelerator's memory budget.
    pub max_concurrency: usize,
    /// Wait-queue capacity `Q`. The `Q+1`-th pending request is rejected.
    pub queue_capacity: usize,
    /// How long a job may wait in the queue before it is marked timed out.
    pub queue_timeout: Duration,
    /// Hard wall-clock ceiling on a single execution.
    pub execution_ceiling: Duration,
    /// Sampling defaults applied when the request leaves a field unset.
    pub defaults: GenerationParams,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 1,
            queue_capacity: 16,
            queue_timeout: Duration::from_secs(300),
            execution_ceiling: Duration::from_secs(600),
            defaults: GenerationParams::default(),
        }
    }
}

/// Top-level server configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub scheduler: SchedulerConfig,
    /// Maximum age of a cached health snapshot.
    pub health_ttl: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8000,
            scheduler: SchedulerConfig::default(),
            health_ttl: Duration::from_secs(1),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup. Unparseable values
    /// fall back to the default rather than failing startup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let base = Self::default();
        let scheduler_base = base.scheduler.clone();
        Self {
            host: lookup("KONRO_HOST").unwrap_or(base.host),
            port: parse(&lookup, "KONRO_PORT", base.port),
            scheduler: SchedulerConfig {
                max_concurrency: parse(
                    &lookup,
                    "KONRO_MAX_CONCURRENCY",
                    scheduler_base.max_concurrency,
                )
                .max(1),
                queue_capacity: parse(
                    &lookup,
                    "KONRO_QUEUE_CAPACITY",
                    scheduler_base.queue_capacity,
                ),
                queue_timeout: Duration::from_secs(parse(
                    &lookup,
                    "KONRO_QUEUE_TIMEOUT_SECS",
                    scheduler_base.queue_timeout.as_secs(),
                )),
                execution_ceiling: Duration::from_secs(parse(
                    &lookup,
                    "KONRO_EXECUTION_CEILING_SECS",
                    scheduler_base.execution_ceiling.as_secs(),
                )),
                defaults: GenerationParams {
                    max_tokens: parse(
                        &lookup,
                        "KONRO_MAX_TOKENS",
                        scheduler_base.defaults.max_tokens,
                    ),
                    temperature: parse(
                        &lookup,
                        "KONRO_TEMPERATURE",
                        scheduler_base.defaults.temperature,
                    ),
                    top_p: parse(&lookup, "KONRO_TOP_P", scheduler_base.defaults.top_p),
                },
            },
            health_ttl: Duration::from_millis(parse(
                &lookup,
                "KONRO_HEALTH_TTL_MS",
                base.health_ttl.as_millis() as u64,
            )),
        }
    }
}

fn parse<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}
