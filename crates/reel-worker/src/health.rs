//! Adapter and toolchain probes behind `reelsmith test-adapters`.

use reel_adapters::{Adapter, AdapterError, AdapterResult};
use reel_media::{Compositor, MediaError};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeStatus {
    Ok(String),
    /// Reachable but currently limited, e.g. rate limited or timing out
    Degraded(String),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    pub name: &'static str,
    pub status: ProbeStatus,
}

impl ProbeReport {
    pub fn is_fatal(&self) -> bool {
        matches!(self.status, ProbeStatus::Failed(_))
    }

    /// Report for an adapter that could not even be constructed.
    pub fn from_error(name: &'static str, error: &AdapterError) -> Self {
        let status = if error.is_retryable() {
            ProbeStatus::Degraded(error.to_string())
        } else {
            ProbeStatus::Failed(error.to_string())
        };
        Self { name, status }
    }

    pub fn from_result(name: &'static str, result: AdapterResult<String>) -> Self {
        match result {
            Ok(detail) => Self {
                name,
                status: ProbeStatus::Ok(detail),
            },
            Err(e) => Self::from_error(name, &e),
        }
    }
}

impl fmt::Display for ProbeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.status {
            ProbeStatus::Ok(detail) => write!(f, "{:<12} ok        {}", self.name, detail),
            ProbeStatus::Degraded(msg) => write!(f, "{:<12} degraded  {}", self.name, msg),
            ProbeStatus::Failed(msg) => write!(f, "{:<12} FAILED    {}", self.name, msg),
        }
    }
}

pub async fn probe_adapter<A: Adapter + ?Sized>(adapter: &A) -> ProbeReport {
    ProbeReport::from_result(adapter.name(), adapter.probe().await)
}

pub async fn probe_compositor(compositor: &dyn Compositor) -> ProbeReport {
    let status = match compositor.check().await {
        Ok(version) => ProbeStatus::Ok(version),
        Err(e @ MediaError::Timeout(_)) => ProbeStatus::Degraded(e.to_string()),
        Err(e) => ProbeStatus::Failed(e.to_string()),
    };
    ProbeReport {
        name: "ffmpeg",
        status,
    }
}

/// True when no probe failed fatally.
pub fn all_healthy(reports: &[ProbeReport]) -> bool {
    reports.iter().all(|r| !r.is_fatal())
}
