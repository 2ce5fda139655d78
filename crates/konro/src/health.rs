//! # Health Monitor
//!
//! Samples engine and host resource state through a [`ResourceProbe`] and
//! serves readiness/liveness queries in O(1). Snapshots are cached for a
//! short TTL so probe traffic stays bounded without readiness going stale.
//!
//! The monitor never touches scheduler state: an overloaded-but-alive
//! service must still answer its probes, so a saturated wait queue cannot
//! delay a health response.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::warn;

use crate::engine::{GpuMemory, ResourceProbe};
use crate::error::EngineError;

/// Service condition reported to probes.
///
/// `Degraded` means the service is up but the model has not finished
/// loading; it is deliberately distinct from `Unhealthy`, which means the
/// engine's state could not be determined at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Point-in-time, immutable record of service health.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    pub model_loaded: bool,
    pub gpu_memory: BTreeMap<String, GpuMemory>,
    /// Host memory in use, percent.
    pub system_memory: f64,
}

struct CachedSnapshot {
    snapshot: HealthSnapshot,
    taken_at: Instant,
}

/// TTL-cached view over a [`ResourceProbe`].
pub struct HealthMonitor {
    probe: Arc<dyn ResourceProbe>,
    ttl: Duration,
    cached: RwLock<Option<CachedSnapshot>>,
}

impl HealthMonitor {
    pub fn new(probe: Arc<dyn ResourceProbe>, ttl: Duration) -> Self {
        Self {
            probe,
            ttl,
            cached: RwLock::new(None),
        }
    }

    /// Returns the current health snapshot, reusing a cached one younger
    /// than the TTL.
    ///
    /// # Errors
    ///
    /// [`EngineError::Unavailable`] only when the model-loaded flag cannot
    /// be determined at all. Memory probe failures degrade to empty
    /// readings rather than failing the whole snapshot, matching the
    /// best-effort semantics of accelerator introspection.
    pub async fn snapshot(&self) -> Result<HealthSnapshot, EngineError> {
        {
            let cached = self.cached.read().await;
            if let Some(entry) = cached.as_ref() {
                if entry.taken_at.elapsed() < self.ttl {
                    return Ok(entry.snapshot.clone());
                }
            }
        }

        let model_loaded = self.probe.model_loaded().await?;

        let gpu_memory = match self.probe.gpu_memory().await {
            Ok(devices) => devices,
            Err(err) => {
                warn!(error = %err, "gpu memory probe failed");
                BTreeMap::new()
            }
        };
        let system_memory = match self.probe.system_memory_percent().await {
            Ok(percent) => percent,
            Err(err) => {
                warn!(error = %err, "system memory probe failed");
                0.0
            }
        };

        let snapshot = HealthSnapshot {
            status: if model_loaded {
                HealthStatus::Healthy
            } else {
                HealthStatus::Degraded
            },
            model_loaded,
            gpu_memory,
            system_memory,
        };

        let mut cached = self.cached.write().await;
        *cached = Some(CachedSnapshot {
            snapshot: snapshot.clone(),
            taken_at: Instant::now(),
        });
        Ok(snapshot)
    }
}
