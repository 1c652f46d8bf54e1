// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Environment variable names, defaults, and the typed configuration built
//! from them. The core types never read the environment themselves; the host
//! binary loads these structs once at startup.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `ATTESTATION_CHALLENGE_TTL_SECS` | Challenge lifetime | `300` |
//! | `ATTESTATION_SWEEP_INTERVAL_SECS` | Expired-challenge sweep period | `60` |
//! | `ATTESTATION_RESULT_VALIDITY_SECS` | Verification result lifetime | `86400` |
//! | `ATTESTATION_ALLOW_DEBUG` | Accept debug enclaves | `false` |
//! | `ATTESTATION_BIND_REPORT_DATA` | Require report data to hash the challenge | `false` |
//! | `ATTESTATION_MEASUREMENTS` | `service:mrenclave:mrsigner`, comma separated | empty |
//! | `ATTESTATION_AUTHORITY_URL` | Attestation authority base URL | Optional |
//! | `ATTESTATION_AUTHORITY_API_KEY` | Authority subscription key | Optional |
//! | `ATTESTATION_TRUST_ROOT_PATH` | PEM bundle of pinned authority roots | Required with URL |
//! | `ATTESTATION_STRICT_VERDICTS` | Reject degraded authority verdicts | `false` |
//! | `ATTESTATION_VERDICT_CACHE_SIZE` | Cached authority verdicts | `256` |
//! | `ATTESTATION_VERDICT_CACHE_TTL_SECS` | Verdict cache lifetime | `600` |
//! | `ATTESTATION_AUTHORITY_RATE_PER_MIN` | Authority requests per minute, `0` disables | `50` |
//! | `ATTESTATION_AUTHORITY_RATE_BURST` | Authority requests allowed back to back | `5` |
//! | `ATTESTATION_AUTHORITY_RATE_MAX_WAIT_SECS` | Longest wait for a request slot | `30` |
//! | `ENCLAVE_IMAGE_PATH` | Enclave image; enables the enclave manager | Optional |
//! | `ENCLAVE_CPU_COUNT` | vCPUs given to the enclave | `2` |
//! | `ENCLAVE_MEMORY_MIB` | Enclave memory | `512` |
//! | `ENCLAVE_CID` | Requested vsock context id | runtime-assigned |
//! | `ENCLAVE_PORT` | vsock port served inside the enclave | `5005` |
//! | `ENCLAVE_DEBUG_MODE` | Launch in debug mode | `false` |
//! | `ENCLAVE_SETTLE_DELAY_MS` | Wait after launch before use | `2000` |
//! | `ENCLAVE_REQUEST_TIMEOUT_SECS` | Enclave request deadline | `30` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info` |

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::attestation::challenge::{DEFAULT_CHALLENGE_TTL, DEFAULT_SWEEP_INTERVAL};
use crate::attestation::sgx::DEFAULT_RESULT_VALIDITY;
use crate::attestation::trust_root::TrustRootError;
use crate::attestation::{
    rate_limit, verdict_cache, Measurement, MeasurementPolicy, RemoteAttestationClient,
    RequestLimiter, SgxVerifier, TrustRoot, VerdictCache, VerifierSettings,
};
use crate::error::Error;

pub const CHALLENGE_TTL_ENV: &str = "ATTESTATION_CHALLENGE_TTL_SECS";
pub const SWEEP_INTERVAL_ENV: &str = "ATTESTATION_SWEEP_INTERVAL_SECS";
pub const RESULT_VALIDITY_ENV: &str = "ATTESTATION_RESULT_VALIDITY_SECS";

/// Accept quotes with the debug flag set, for every caller.
///
/// Debug enclaves expose their memory to the host. Only enable for
/// development.
pub const ALLOW_DEBUG_ENV: &str = "ATTESTATION_ALLOW_DEBUG";

/// Require `reportData[0..32]` to be the SHA-256 of the challenge.
pub const BIND_REPORT_DATA_ENV: &str = "ATTESTATION_BIND_REPORT_DATA";

/// Measurement allow-list.
///
/// # Format
/// `service:mrenclave:mrsigner[,service:mrenclave:mrsigner...]`, identities
/// in hex. A service may appear several times.
pub const MEASUREMENTS_ENV: &str = "ATTESTATION_MEASUREMENTS";

/// Base URL of the attestation authority. Unset disables the authority.
pub const AUTHORITY_URL_ENV: &str = "ATTESTATION_AUTHORITY_URL";
pub const AUTHORITY_API_KEY_ENV: &str = "ATTESTATION_AUTHORITY_API_KEY";

/// PEM bundle of pinned root certificates for authority responses.
pub const TRUST_ROOT_PATH_ENV: &str = "ATTESTATION_TRUST_ROOT_PATH";

pub const STRICT_VERDICTS_ENV: &str = "ATTESTATION_STRICT_VERDICTS";
pub const VERDICT_CACHE_SIZE_ENV: &str = "ATTESTATION_VERDICT_CACHE_SIZE";
pub const VERDICT_CACHE_TTL_ENV: &str = "ATTESTATION_VERDICT_CACHE_TTL_SECS";

/// Authority request budget. `0` turns throttling off.
pub const AUTHORITY_RATE_ENV: &str = "ATTESTATION_AUTHORITY_RATE_PER_MIN";
pub const AUTHORITY_BURST_ENV: &str = "ATTESTATION_AUTHORITY_RATE_BURST";
pub const AUTHORITY_MAX_WAIT_ENV: &str = "ATTESTATION_AUTHORITY_RATE_MAX_WAIT_SECS";

/// Enclave image file. Unset means the host runs without an enclave.
pub const ENCLAVE_IMAGE_PATH_ENV: &str = "ENCLAVE_IMAGE_PATH";
pub const ENCLAVE_CPU_COUNT_ENV: &str = "ENCLAVE_CPU_COUNT";
pub const ENCLAVE_MEMORY_MIB_ENV: &str = "ENCLAVE_MEMORY_MIB";
pub const ENCLAVE_CID_ENV: &str = "ENCLAVE_CID";
pub const ENCLAVE_PORT_ENV: &str = "ENCLAVE_PORT";
pub const ENCLAVE_DEBUG_MODE_ENV: &str = "ENCLAVE_DEBUG_MODE";
pub const ENCLAVE_SETTLE_DELAY_ENV: &str = "ENCLAVE_SETTLE_DELAY_MS";
pub const ENCLAVE_REQUEST_TIMEOUT_ENV: &str = "ENCLAVE_REQUEST_TIMEOUT_SECS";

/// `json` or `pretty`.
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

pub const DEFAULT_ENCLAVE_CPU_COUNT: u32 = 2;
pub const DEFAULT_ENCLAVE_MEMORY_MIB: u64 = 512;
pub const DEFAULT_ENCLAVE_PORT: u32 = 5005;
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(2000);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },

    #[error("{var} is required when {required_by} is set")]
    Missing {
        var: &'static str,
        required_by: &'static str,
    },

    #[error("Cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid trust root bundle: {0}")]
    TrustRoot(#[from] TrustRootError),
}

impl ConfigError {
    pub fn error_code(&self) -> &'static str {
        match self {
            ConfigError::Invalid { .. } => "invalid_config",
            ConfigError::Missing { .. } => "missing_config",
            ConfigError::Io { .. } => "config_io",
            ConfigError::TrustRoot(_) => "invalid_trust_root",
        }
    }

    fn invalid(var: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            var,
            reason: reason.into(),
        }
    }
}

/// Attestation authority settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorityConfig {
    pub base_url: Url,
    pub api_key: Option<String>,
    pub trust_root_path: PathBuf,
    pub cache_size: usize,
    pub cache_ttl: Duration,
    /// `None` when throttling is off.
    pub rate_limit: Option<RateLimitConfig>,
}

/// Authority request budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub per_minute: u32,
    pub burst: u32,
    pub max_wait: Duration,
}

impl RateLimitConfig {
    pub fn limiter(&self) -> RequestLimiter {
        RequestLimiter::new(self.per_minute, self.burst).with_max_wait(self.max_wait)
    }
}

/// Everything needed to build the SGX verifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestationConfig {
    pub verifier: VerifierSettings,
    /// `(service_id, measurement)` pairs.
    pub measurements: Vec<(String, Measurement)>,
    pub authority: Option<AuthorityConfig>,
}

impl AttestationConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);

        let verifier = VerifierSettings {
            challenge_ttl: vars.secs(CHALLENGE_TTL_ENV, DEFAULT_CHALLENGE_TTL)?,
            sweep_interval: vars.secs(SWEEP_INTERVAL_ENV, DEFAULT_SWEEP_INTERVAL)?,
            result_validity: vars.secs(RESULT_VALIDITY_ENV, DEFAULT_RESULT_VALIDITY)?,
            allow_debug: vars.flag(ALLOW_DEBUG_ENV)?,
            bind_report_data: vars.flag(BIND_REPORT_DATA_ENV)?,
            strict_verdicts: vars.flag(STRICT_VERDICTS_ENV)?,
        };
        if verifier.challenge_ttl.is_zero() {
            return Err(ConfigError::invalid(CHALLENGE_TTL_ENV, "must be positive"));
        }
        if verifier.sweep_interval.is_zero() {
            return Err(ConfigError::invalid(SWEEP_INTERVAL_ENV, "must be positive"));
        }

        let measurements = match vars.get(MEASUREMENTS_ENV) {
            Some(raw) => parse_measurements(&raw)?,
            None => Vec::new(),
        };

        let authority = match vars.get(AUTHORITY_URL_ENV) {
            Some(raw) => {
                let base_url = Url::parse(&raw)
                    .map_err(|e| ConfigError::invalid(AUTHORITY_URL_ENV, e.to_string()))?;
                let trust_root_path = vars.get(TRUST_ROOT_PATH_ENV).map(PathBuf::from).ok_or(
                    ConfigError::Missing {
                        var: TRUST_ROOT_PATH_ENV,
                        required_by: AUTHORITY_URL_ENV,
                    },
                )?;
                Some(AuthorityConfig {
                    base_url,
                    api_key: vars.get(AUTHORITY_API_KEY_ENV),
                    trust_root_path,
                    cache_size: vars
                        .parsed(VERDICT_CACHE_SIZE_ENV, verdict_cache::DEFAULT_CAPACITY)?,
                    cache_ttl: vars.secs(VERDICT_CACHE_TTL_ENV, verdict_cache::DEFAULT_TTL)?,
                    rate_limit: rate_limit_config(&vars)?,
                })
            }
            None => None,
        };

        Ok(Self {
            verifier,
            measurements,
            authority,
        })
    }

    /// Build the SGX verifier, loading the trust root if an authority is
    /// configured.
    pub fn build_verifier(&self) -> Result<SgxVerifier, Error> {
        let policy = MeasurementPolicy::from_entries(self.measurements.iter().cloned());
        let verifier = SgxVerifier::new(self.verifier.clone(), policy);

        let Some(authority) = &self.authority else {
            return Ok(verifier);
        };
        let trust_root = load_trust_root(&authority.trust_root_path)?;
        let client = RemoteAttestationClient::new(
            &authority.base_url,
            authority.api_key.clone(),
            trust_root,
        )?
        .with_cache(VerdictCache::new(authority.cache_size, authority.cache_ttl));
        let client = match &authority.rate_limit {
            Some(rate_limit) => client.with_limiter(rate_limit.limiter()),
            None => client,
        };

        Ok(verifier.with_authority(Arc::new(client)))
    }
}

fn rate_limit_config<F>(vars: &Vars<F>) -> Result<Option<RateLimitConfig>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let per_minute = vars.parsed(AUTHORITY_RATE_ENV, rate_limit::DEFAULT_REQUESTS_PER_MINUTE)?;
    if per_minute == 0 {
        return Ok(None);
    }
    let burst = vars.parsed(AUTHORITY_BURST_ENV, rate_limit::DEFAULT_BURST)?;
    if burst == 0 {
        return Err(ConfigError::invalid(AUTHORITY_BURST_ENV, "must be positive"));
    }
    Ok(Some(RateLimitConfig {
        per_minute,
        burst,
        max_wait: vars.secs(AUTHORITY_MAX_WAIT_ENV, rate_limit::DEFAULT_MAX_WAIT)?,
    }))
}

/// Read a PEM trust-root bundle from disk.
pub fn load_trust_root(path: &Path) -> Result<TrustRoot, ConfigError> {
    let bundle = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(TrustRoot::from_pem(&bundle)?)
}

fn parse_measurements(raw: &str) -> Result<Vec<(String, Measurement)>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let parts: Vec<&str> = entry.split(':').map(str::trim).collect();
            let [service, code, signer] = parts.as_slice() else {
                return Err(ConfigError::invalid(
                    MEASUREMENTS_ENV,
                    format!("expected service:mrenclave:mrsigner, got {entry:?}"),
                ));
            };
            if service.is_empty() {
                return Err(ConfigError::invalid(MEASUREMENTS_ENV, "empty service id"));
            }
            for identity in [code, signer] {
                if identity.is_empty() || hex::decode(identity).is_err() {
                    return Err(ConfigError::invalid(
                        MEASUREMENTS_ENV,
                        format!("{identity:?} is not a hex identity"),
                    ));
                }
            }
            Ok((service.to_string(), Measurement::new(code, signer)))
        })
        .collect()
}

/// Resources and endpoint for one enclave instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnclaveConfig {
    pub image_path: PathBuf,
    pub cpu_count: u32,
    pub memory_mib: u64,
    /// Requested context id; the runtime assigns one when `None`.
    pub context_id: Option<u32>,
    pub port: u32,
    pub debug_mode: bool,
    pub settle_delay: Duration,
    pub request_timeout: Duration,
}

impl EnclaveConfig {
    pub fn new(image_path: impl Into<PathBuf>) -> Self {
        Self {
            image_path: image_path.into(),
            cpu_count: DEFAULT_ENCLAVE_CPU_COUNT,
            memory_mib: DEFAULT_ENCLAVE_MEMORY_MIB,
            context_id: None,
            port: DEFAULT_ENCLAVE_PORT,
            debug_mode: false,
            settle_delay: DEFAULT_SETTLE_DELAY,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// `None` when `ENCLAVE_IMAGE_PATH` is unset.
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Option<Self>, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);
        let Some(image_path) = vars.get(ENCLAVE_IMAGE_PATH_ENV) else {
            return Ok(None);
        };

        let config = Self {
            image_path: PathBuf::from(image_path),
            cpu_count: vars.parsed(ENCLAVE_CPU_COUNT_ENV, DEFAULT_ENCLAVE_CPU_COUNT)?,
            memory_mib: vars.parsed(ENCLAVE_MEMORY_MIB_ENV, DEFAULT_ENCLAVE_MEMORY_MIB)?,
            context_id: vars
                .get(ENCLAVE_CID_ENV)
                .map(|raw| parse(ENCLAVE_CID_ENV, &raw))
                .transpose()?,
            port: vars.parsed(ENCLAVE_PORT_ENV, DEFAULT_ENCLAVE_PORT)?,
            debug_mode: vars.flag(ENCLAVE_DEBUG_MODE_ENV)?,
            settle_delay: Duration::from_millis(
                vars.parsed(ENCLAVE_SETTLE_DELAY_ENV, DEFAULT_SETTLE_DELAY.as_millis() as u64)?,
            ),
            request_timeout: vars.secs(ENCLAVE_REQUEST_TIMEOUT_ENV, DEFAULT_REQUEST_TIMEOUT)?,
        };

        if config.cpu_count == 0 {
            return Err(ConfigError::invalid(ENCLAVE_CPU_COUNT_ENV, "must be positive"));
        }
        if config.memory_mib == 0 {
            return Err(ConfigError::invalid(ENCLAVE_MEMORY_MIB_ENV, "must be positive"));
        }
        if config.request_timeout.is_zero() {
            return Err(ConfigError::invalid(ENCLAVE_REQUEST_TIMEOUT_ENV, "must be positive"));
        }
        Ok(Some(config))
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

impl LogFormat {
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var(LOG_FORMAT_ENV) {
            Ok(raw) => raw.parse(),
            Err(_) => Ok(LogFormat::default()),
        }
    }
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" | "" => Ok(LogFormat::Pretty),
            other => Err(ConfigError::invalid(
                LOG_FORMAT_ENV,
                format!("expected json or pretty, got {other:?}"),
            )),
        }
    }
}

struct Vars<F>(F);

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    /// Trimmed value; empty counts as unset.
    fn get(&self, var: &str) -> Option<String> {
        (self.0)(var)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn parsed<T>(&self, var: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(var) {
            Some(raw) => parse(var, &raw),
            None => Ok(default),
        }
    }

    fn secs(&self, var: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        self.parsed(var, default.as_secs()).map(Duration::from_secs)
    }

    fn flag(&self, var: &'static str) -> Result<bool, ConfigError> {
        match self.get(var).map(|raw| raw.to_ascii_lowercase()) {
            None => Ok(false),
            Some(raw) => match raw.as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(ConfigError::invalid(var, format!("expected a boolean, got {raw:?}"))),
            },
        }
    }
}

fn parse<T>(var: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse()
        .map_err(|e: T::Err| ConfigError::invalid(var, format!("{raw:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;
    use crate::attestation::fixtures;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn attestation_defaults() {
        let config = AttestationConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.verifier, VerifierSettings::default());
        assert_eq!(config.verifier.challenge_ttl, Duration::from_secs(300));
        assert_eq!(config.verifier.result_validity, Duration::from_secs(86_400));
        assert!(config.measurements.is_empty());
        assert!(config.authority.is_none());
    }

    #[test]
    fn attestation_overrides() {
        let config = AttestationConfig::from_lookup(lookup(&[
            (CHALLENGE_TTL_ENV, "120"),
            (ALLOW_DEBUG_ENV, "true"),
            (STRICT_VERDICTS_ENV, "1"),
            (BIND_REPORT_DATA_ENV, "no"),
        ]))
        .unwrap();
        assert_eq!(config.verifier.challenge_ttl, Duration::from_secs(120));
        assert!(config.verifier.allow_debug);
        assert!(config.verifier.strict_verdicts);
        assert!(!config.verifier.bind_report_data);
    }

    #[test]
    fn measurement_list_parses() {
        let raw = format!(
            "oracle:{}:{}, oracle:{}:{},gas:AB:CD,",
            "11".repeat(32),
            "22".repeat(32),
            "33".repeat(32),
            "22".repeat(32)
        );
        let config = AttestationConfig::from_lookup(lookup(&[(MEASUREMENTS_ENV, &raw)])).unwrap();
        assert_eq!(config.measurements.len(), 3);
        assert_eq!(config.measurements[2], ("gas".to_string(), Measurement::new("ab", "cd")));
    }

    #[test]
    fn malformed_values_name_the_variable() {
        for (var, value) in [
            (MEASUREMENTS_ENV, "oracle:11"),
            (MEASUREMENTS_ENV, "oracle:zz:11"),
            (MEASUREMENTS_ENV, ":11:22"),
            (CHALLENGE_TTL_ENV, "five"),
            (CHALLENGE_TTL_ENV, "0"),
            (ALLOW_DEBUG_ENV, "maybe"),
            (AUTHORITY_URL_ENV, "not a url"),
        ] {
            let err = AttestationConfig::from_lookup(lookup(&[(var, value)])).unwrap_err();
            match err {
                ConfigError::Invalid { var: reported, .. } => assert_eq!(reported, var),
                other => panic!("{var}={value}: unexpected {other}"),
            }
        }
    }

    #[test]
    fn authority_requires_trust_root() {
        let err = AttestationConfig::from_lookup(lookup(&[(
            AUTHORITY_URL_ENV,
            "https://authority.example/sgx/dev",
        )]))
        .unwrap_err();
        assert_eq!(err.error_code(), "missing_config");
    }

    #[test]
    fn build_verifier_with_authority() {
        let mut bundle = tempfile::NamedTempFile::new().unwrap();
        bundle.write_all(fixtures::ROOT_PEM.as_bytes()).unwrap();
        let path = bundle.path().to_str().unwrap().to_string();

        let config = AttestationConfig::from_lookup(lookup(&[
            (AUTHORITY_URL_ENV, "https://authority.example/sgx/dev"),
            (AUTHORITY_API_KEY_ENV, "secret"),
            (TRUST_ROOT_PATH_ENV, &path),
            (VERDICT_CACHE_SIZE_ENV, "8"),
            (MEASUREMENTS_ENV, "oracle:aa:bb"),
        ]))
        .unwrap();
        let authority = config.authority.as_ref().unwrap();
        assert_eq!(authority.api_key.as_deref(), Some("secret"));
        assert_eq!(authority.cache_size, 8);
        assert_eq!(authority.cache_ttl, Duration::from_secs(600));
        assert_eq!(
            authority.rate_limit,
            Some(RateLimitConfig {
                per_minute: 50,
                burst: 5,
                max_wait: Duration::from_secs(30),
            })
        );

        let verifier = config.build_verifier().unwrap();
        assert!(verifier.has_authority());
        assert!(verifier.policy().is_allowed("oracle", "AA", "bb"));
    }

    #[test]
    fn authority_rate_limit_settings() {
        let base = [
            (AUTHORITY_URL_ENV, "https://authority.example/sgx/dev"),
            (TRUST_ROOT_PATH_ENV, "/etc/authority/roots.pem"),
        ];

        let mut vars = base.to_vec();
        vars.extend([
            (AUTHORITY_RATE_ENV, "120"),
            (AUTHORITY_BURST_ENV, "2"),
            (AUTHORITY_MAX_WAIT_ENV, "4"),
        ]);
        let config = AttestationConfig::from_lookup(lookup(&vars)).unwrap();
        let rate_limit = config.authority.unwrap().rate_limit.unwrap();
        assert_eq!(rate_limit.per_minute, 120);
        assert_eq!(rate_limit.burst, 2);
        assert_eq!(rate_limit.limiter().max_wait(), Duration::from_secs(4));

        let mut vars = base.to_vec();
        vars.push((AUTHORITY_RATE_ENV, "0"));
        let config = AttestationConfig::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(config.authority.unwrap().rate_limit, None);

        let mut vars = base.to_vec();
        vars.push((AUTHORITY_BURST_ENV, "0"));
        let err = AttestationConfig::from_lookup(lookup(&vars)).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: AUTHORITY_BURST_ENV, .. }));
    }

    #[test]
    fn build_verifier_rejects_bad_trust_root() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.pem");
        let err = load_trust_root(&missing).unwrap_err();
        assert_eq!(err.error_code(), "config_io");

        let empty = dir.path().join("empty.pem");
        std::fs::write(&empty, "").unwrap();
        let err = load_trust_root(&empty).unwrap_err();
        assert_eq!(err.error_code(), "invalid_trust_root");
    }

    #[test]
    fn enclave_config_requires_image() {
        assert_eq!(EnclaveConfig::from_lookup(lookup(&[])).unwrap(), None);

        let config = EnclaveConfig::from_lookup(lookup(&[(ENCLAVE_IMAGE_PATH_ENV, "/opt/app.eif")]))
            .unwrap()
            .unwrap();
        assert_eq!(config, EnclaveConfig::new("/opt/app.eif"));
        assert_eq!(config.port, 5005);
        assert_eq!(config.settle_delay, Duration::from_millis(2000));
    }

    #[test]
    fn enclave_config_overrides() {
        let config = EnclaveConfig::from_lookup(lookup(&[
            (ENCLAVE_IMAGE_PATH_ENV, "/opt/app.eif"),
            (ENCLAVE_CPU_COUNT_ENV, "4"),
            (ENCLAVE_MEMORY_MIB_ENV, "2048"),
            (ENCLAVE_CID_ENV, "16"),
            (ENCLAVE_DEBUG_MODE_ENV, "true"),
            (ENCLAVE_SETTLE_DELAY_ENV, "0"),
            (ENCLAVE_REQUEST_TIMEOUT_ENV, "5"),
        ]))
        .unwrap()
        .unwrap();
        assert_eq!(config.cpu_count, 4);
        assert_eq!(config.memory_mib, 2048);
        assert_eq!(config.context_id, Some(16));
        assert!(config.debug_mode);
        assert!(config.settle_delay.is_zero());
        assert_eq!(config.request_timeout, Duration::from_secs(5));

        let err = EnclaveConfig::from_lookup(lookup(&[
            (ENCLAVE_IMAGE_PATH_ENV, "/opt/app.eif"),
            (ENCLAVE_CPU_COUNT_ENV, "0"),
        ]))
        .unwrap_err();
        assert_eq!(err.error_code(), "invalid_config");
    }

    #[test]
    fn log_format_parses() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("PRETTY".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
