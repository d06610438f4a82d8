//! One-time discovery of the sampling keywords a text backend accepts.
//!
//! Some backends accept only part of `{temp, temperature, top_p}` and the
//! only way to find out is to try. [`probe`] runs a one-token generation with
//! every candidate key, drops whichever key the failure names, and repeats
//! until a call succeeds or the failure no longer names a candidate.

use super::{GenerationParams, SamplingKwargs, TextBackend};
use crate::error::{GatewayError, unexpected_argument_key};
use futures_util::StreamExt;
use std::collections::BTreeSet;
use std::sync::OnceLock;
use tracing::{debug, info};

/// Keys tried on the first probe call.
pub const CANDIDATE_KEYS: [&str; 3] = ["temp", "temperature", "top_p"];

const PROBE_PROMPT: &str = "hello";

/// What a backend was found to accept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    /// Candidate keys the backend accepted.
    pub supported_keys: BTreeSet<&'static str>,
    /// Key used to pass the temperature, if any. `None` means the backend runs
    /// at its own default temperature.
    pub temperature_key: Option<&'static str>,
}

impl Capabilities {
    fn from_supported(supported_keys: BTreeSet<&'static str>) -> Self {
        let temperature_key = ["temperature", "temp"]
            .into_iter()
            .find(|key| supported_keys.contains(key));
        Self {
            supported_keys,
            temperature_key,
        }
    }

    pub fn supports(&self, key: &str) -> bool {
        self.supported_keys.contains(key)
    }

    /// Keyword arguments for one generation call.
    pub fn sampling_kwargs(&self, params: &GenerationParams) -> SamplingKwargs {
        let mut kwargs = SamplingKwargs::new();
        if let Some(key) = self.temperature_key {
            kwargs.insert(key, params.temperature);
        }
        if self.supports("top_p") {
            kwargs.insert("top_p", params.top_p);
        }
        kwargs
    }
}

/// Probe a backend. Never fails: an unrecognised failure ends the search with
/// the keys still standing.
pub async fn probe(backend: &dyn TextBackend) -> Capabilities {
    let mut supported: BTreeSet<&'static str> = CANDIDATE_KEYS.into_iter().collect();
    loop {
        let kwargs = probe_kwargs(&supported);
        let Err(err) = try_generate(backend, &kwargs).await else {
            break;
        };
        match rejected_key(&err, &supported) {
            Some(key) => {
                debug!("backend rejected sampling key '{key}'");
                supported.remove(key);
            }
            None => {
                debug!("probe stopped on unrelated failure: {err}");
                break;
            }
        }
    }
    Capabilities::from_supported(supported)
}

fn probe_kwargs(supported: &BTreeSet<&'static str>) -> SamplingKwargs {
    [("temp", 0.0), ("temperature", 0.0), ("top_p", 1.0)]
        .into_iter()
        .filter(|(key, _)| supported.contains(key))
        .collect()
}

async fn try_generate(
    backend: &dyn TextBackend,
    kwargs: &SamplingKwargs,
) -> Result<(), GatewayError> {
    let mut stream = backend.stream(PROBE_PROMPT, 1, kwargs)?;
    match stream.next().await {
        Some(Err(e)) => Err(e),
        _ => Ok(()),
    }
}

fn rejected_key(err: &GatewayError, supported: &BTreeSet<&'static str>) -> Option<&'static str> {
    match err {
        GatewayError::UnexpectedArgument(key) => supported.get(key.as_str()).copied(),
        GatewayError::Backend { message, .. } => {
            unexpected_argument_key(message, supported.iter().copied())
        }
        _ => None,
    }
}

/// Write-once cache of a backend's [`Capabilities`].
///
/// Concurrent first callers may each run the probe; the first result stored
/// wins and every caller returns that stored value.
#[derive(Debug, Default)]
pub struct CapabilityCache {
    cell: OnceLock<Capabilities>,
}

impl CapabilityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached result, if the probe already ran.
    pub fn get(&self) -> Option<&Capabilities> {
        self.cell.get()
    }

    /// Return the cached result, probing the backend on first use.
    pub async fn get_or_probe(&self, backend: &dyn TextBackend) -> Capabilities {
        if let Some(cached) = self.cell.get() {
            return cached.clone();
        }
        let probed = probe(backend).await;
        if self.cell.set(probed.clone()).is_ok() {
            info!(
                "text backend capabilities: supported_keys={:?} temperature_key={:?}",
                probed.supported_keys, probed.temperature_key
            );
        }
        self.cell.get().cloned().unwrap_or(probed)
    }
}
