// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Remote attestation authority client.
//!
//! Submits quotes to an IAS-style report endpoint and turns the signed report
//! into an [`AuthorityVerdict`].
//!
//! ## Security
//!
//! - The response signature and signing certificate are checked against the
//!   pinned [`TrustRoot`] before the body is parsed.
//! - Transport errors, non-2xx responses and signature failures all surface as
//!   `AttestationAuthorityFailure`; nothing is retried here.
//! - Cache misses pass through the optional [`RequestLimiter`] before any
//!   network call; running out of request budget is also an authority failure.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use base64ct::{Base64, Encoding};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use super::evidence::{ISVSVN, MRENCLAVE, MRSIGNER};
use super::quote::Quote;
use super::rate_limit::RequestLimiter;
use super::trust_root::TrustRoot;
use super::verdict_cache::VerdictCache;
use super::AttestationError;

/// Report endpoint, relative to the authority base URL.
const REPORT_PATH: &str = "attestation/v4/report";

const SUBSCRIPTION_KEY_HEADER: &str = "ocp-apim-subscription-key";
const SIGNATURE_HEADER: &str = "x-iasreport-signature";
const CERTIFICATE_HEADER: &str = "x-iasreport-signing-certificate";

/// Report timestamps carry no zone and are UTC.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// HTTP timeout for authority requests.
pub const DEFAULT_AUTHORITY_TIMEOUT: Duration = Duration::from_secs(30);

/// Extracted-measurement key for the authority's raw quote status.
pub const STATUS: &str = "STATUS";
/// Extracted-measurement key for the authority's report id.
pub const REPORT_ID: &str = "REPORT_ID";

/// Authority assessment of a quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorityStatus {
    Accepted,
    /// Platform is genuine but its TCB is not fully up to date.
    Degraded,
    Rejected,
}

impl AuthorityStatus {
    /// Map an `isvEnclaveQuoteStatus` value.
    pub fn from_quote_status(status: &str) -> Self {
        match status {
            "OK" => AuthorityStatus::Accepted,
            "GROUP_OUT_OF_DATE"
            | "CONFIGURATION_NEEDED"
            | "SW_HARDENING_NEEDED"
            | "CONFIGURATION_AND_SW_HARDENING_NEEDED" => AuthorityStatus::Degraded,
            _ => AuthorityStatus::Rejected,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AuthorityStatus::Accepted => "accepted",
            AuthorityStatus::Degraded => "degraded",
            AuthorityStatus::Rejected => "rejected",
        }
    }
}

/// Verified authority response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorityVerdict {
    pub status: AuthorityStatus,
    /// Status string exactly as reported.
    pub raw_status: String,
    /// `MRENCLAVE`, `MRSIGNER`, `ISVSVN`, `STATUS`, `REPORT_ID`.
    pub extracted_measurements: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

/// Something that can vouch for a quote.
#[async_trait]
pub trait AttestationAuthority: Send + Sync {
    async fn submit(&self, quote: &[u8]) -> Result<AuthorityVerdict, AttestationError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReportRequest {
    isv_enclave_quote: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttestationReport {
    id: String,
    timestamp: String,
    isv_enclave_quote_status: String,
    isv_enclave_quote_body: String,
}

impl AttestationReport {
    fn into_verdict(self) -> Result<AuthorityVerdict, AttestationError> {
        let body = Base64::decode_vec(&self.isv_enclave_quote_body)
            .map_err(|e| {
                AttestationError::authority(format!("report quote body is not base64: {e}"))
            })?;
        let quote = Quote::decode(&body)
            .map_err(|e| AttestationError::authority(format!("report quote body: {e}")))?;
        let timestamp = NaiveDateTime::parse_from_str(&self.timestamp, TIMESTAMP_FORMAT)
            .map_err(|e| AttestationError::authority(format!("invalid report timestamp: {e}")))?
            .and_utc();

        let extracted_measurements = BTreeMap::from([
            (MRENCLAVE.to_string(), quote.code_identity()),
            (MRSIGNER.to_string(), quote.signer_identity()),
            (ISVSVN.to_string(), quote.isv_svn.to_string()),
            (STATUS.to_string(), self.isv_enclave_quote_status.clone()),
            (REPORT_ID.to_string(), self.id),
        ]);

        Ok(AuthorityVerdict {
            status: AuthorityStatus::from_quote_status(&self.isv_enclave_quote_status),
            raw_status: self.isv_enclave_quote_status,
            extracted_measurements,
            timestamp,
        })
    }
}

/// HTTP client for the attestation authority.
pub struct RemoteAttestationClient {
    report_url: Url,
    api_key: Option<String>,
    trust_root: TrustRoot,
    http: reqwest::Client,
    cache: Option<VerdictCache>,
    limiter: Option<RequestLimiter>,
}

impl RemoteAttestationClient {
    /// Create a client for the authority at `base_url`.
    ///
    /// `api_key` is sent as the subscription-key header when present.
    pub fn new(
        base_url: &Url,
        api_key: Option<String>,
        trust_root: TrustRoot,
    ) -> Result<Self, AttestationError> {
        let report_url = Url::parse(&format!(
            "{}/{REPORT_PATH}",
            base_url.as_str().trim_end_matches('/')
        ))
        .map_err(|e| AttestationError::authority(format!("invalid authority URL: {e}")))?;

        let http = reqwest::Client::builder()
            .timeout(DEFAULT_AUTHORITY_TIMEOUT)
            .build()
            .map_err(|e| AttestationError::authority(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            report_url,
            api_key,
            trust_root,
            http,
            cache: None,
            limiter: None,
        })
    }

    /// Cache accepting verdicts by quote hash.
    pub fn with_cache(mut self, cache: VerdictCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Throttle requests that miss the cache.
    pub fn with_limiter(mut self, limiter: RequestLimiter) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn report_url(&self) -> &Url {
        &self.report_url
    }

    async fn fetch_report(&self, quote: &[u8]) -> Result<AuthorityVerdict, AttestationError> {
        let mut request = self.http.post(self.report_url.clone()).json(&ReportRequest {
            isv_enclave_quote: Base64::encode_string(quote),
        });
        if let Some(key) = &self.api_key {
            request = request.header(SUBSCRIPTION_KEY_HEADER, key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AttestationError::authority(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AttestationError::authority(format!("HTTP {status}")));
        }

        let signature = header(&response, SIGNATURE_HEADER)?;
        let certificate = header(&response, CERTIFICATE_HEADER)?;
        let body = response
            .bytes()
            .await
            .map_err(|e| AttestationError::authority(format!("cannot read response: {e}")))?;

        self.trust_root
            .verify_response(&body, &signature, &certificate)?;

        let report: AttestationReport = serde_json::from_slice(&body)
            .map_err(|e| AttestationError::authority(format!("invalid report JSON: {e}")))?;
        report.into_verdict()
    }
}

#[async_trait]
impl AttestationAuthority for RemoteAttestationClient {
    async fn submit(&self, quote: &[u8]) -> Result<AuthorityVerdict, AttestationError> {
        if let Some(verdict) = self.cache.as_ref().and_then(|cache| cache.get(quote)) {
            return Ok(verdict);
        }
        if let Some(limiter) = &self.limiter {
            limiter.acquire().await?;
        }

        let verdict = self.fetch_report(quote).await?;
        if let Some(cache) = &self.cache {
            cache.put(quote, &verdict);
        }
        Ok(verdict)
    }
}

fn header(response: &reqwest::Response, name: &str) -> Result<String, AttestationError> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| AttestationError::authority(format!("response is missing {name}")))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use axum::extract::State;
    use axum::http::{HeaderMap, HeaderValue, StatusCode};
    use axum::response::{IntoResponse, Response};
    use axum::routing::post;
    use axum::{Json, Router};

    use super::*;
    use crate::attestation::fixtures;
    use crate::attestation::quote::tests::sample_quote;

    #[derive(Clone)]
    struct MockAuthority {
        status: StatusCode,
        body: &'static [u8],
        signature: Option<&'static str>,
        certificate: Option<&'static str>,
        calls: Arc<AtomicUsize>,
        last_key: Arc<Mutex<Option<String>>>,
        last_quote: Arc<Mutex<Option<String>>>,
    }

    impl MockAuthority {
        fn serving(body: &'static [u8], signature: &'static str) -> Self {
            Self {
                status: StatusCode::OK,
                body,
                signature: Some(signature),
                certificate: Some(fixtures::SIGNER_DER_B64),
                calls: Arc::new(AtomicUsize::new(0)),
                last_key: Arc::new(Mutex::new(None)),
                last_quote: Arc::new(Mutex::new(None)),
            }
        }
    }

    async fn report(
        State(mock): State<MockAuthority>,
        headers: HeaderMap,
        Json(request): Json<serde_json::Value>,
    ) -> Response {
        mock.calls.fetch_add(1, Ordering::SeqCst);
        *mock.last_key.lock().unwrap() = headers
            .get(SUBSCRIPTION_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        *mock.last_quote.lock().unwrap() = request["isvEnclaveQuote"].as_str().map(str::to_string);

        let mut response = (mock.status, mock.body.to_vec()).into_response();
        if let Some(signature) = mock.signature {
            response
                .headers_mut()
                .insert(SIGNATURE_HEADER, HeaderValue::from_static(signature));
        }
        if let Some(certificate) = mock.certificate {
            response
                .headers_mut()
                .insert(CERTIFICATE_HEADER, HeaderValue::from_static(certificate));
        }
        response
    }

    async fn serve(mock: MockAuthority) -> Url {
        let app = Router::new()
            .route("/attestation/v4/report", post(report))
            .with_state(mock);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Url::parse(&format!("http://{addr}/")).unwrap()
    }

    fn client(base: &Url) -> RemoteAttestationClient {
        RemoteAttestationClient::new(
            base,
            Some("test-key".to_string()),
            TrustRoot::from_pem(fixtures::ROOT_PEM).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn status_mapping() {
        assert_eq!(AuthorityStatus::from_quote_status("OK"), AuthorityStatus::Accepted);
        for degraded in [
            "GROUP_OUT_OF_DATE",
            "CONFIGURATION_NEEDED",
            "SW_HARDENING_NEEDED",
            "CONFIGURATION_AND_SW_HARDENING_NEEDED",
        ] {
            assert_eq!(AuthorityStatus::from_quote_status(degraded), AuthorityStatus::Degraded);
        }
        for rejected in ["SIGNATURE_INVALID", "GROUP_REVOKED", "KEY_REVOKED", "ok", ""] {
            assert_eq!(AuthorityStatus::from_quote_status(rejected), AuthorityStatus::Rejected);
        }
    }

    #[test]
    fn report_url_joins_base_path() {
        let base = Url::parse("https://authority.example/sgx/dev").unwrap();
        let client = client(&base);
        assert_eq!(
            client.report_url().as_str(),
            "https://authority.example/sgx/dev/attestation/v4/report"
        );
    }

    #[tokio::test]
    async fn accepted_report_yields_measurements() {
        let mock = MockAuthority::serving(fixtures::REPORT_ACCEPTED, fixtures::REPORT_ACCEPTED_SIG);
        let base = serve(mock.clone()).await;
        let quote = sample_quote().encode();

        let verdict = client(&base).submit(&quote).await.unwrap();

        assert_eq!(verdict.status, AuthorityStatus::Accepted);
        assert_eq!(verdict.raw_status, "OK");
        let m = &verdict.extracted_measurements;
        assert_eq!(m[MRENCLAVE], "11".repeat(32));
        assert_eq!(m[MRSIGNER], "22".repeat(32));
        assert_eq!(m[ISVSVN], "6");
        assert_eq!(m[STATUS], "OK");
        assert_eq!(m[REPORT_ID], "100342731086430570647295023189732744265");
        assert_eq!(verdict.timestamp.to_rfc3339(), "2026-10-19T12:00:00+00:00");

        assert_eq!(mock.last_key.lock().unwrap().as_deref(), Some("test-key"));
        assert_eq!(
            mock.last_quote.lock().unwrap().as_deref(),
            Some(Base64::encode_string(&quote).as_str())
        );
    }

    #[tokio::test]
    async fn degraded_and_rejected_reports_are_verdicts() {
        let degraded = serve(MockAuthority::serving(
            fixtures::REPORT_DEGRADED,
            fixtures::REPORT_DEGRADED_SIG,
        ))
        .await;
        let verdict = client(&degraded).submit(b"quote").await.unwrap();
        assert_eq!(verdict.status, AuthorityStatus::Degraded);
        assert_eq!(verdict.raw_status, "GROUP_OUT_OF_DATE");

        let rejected = serve(MockAuthority::serving(
            fixtures::REPORT_REJECTED,
            fixtures::REPORT_REJECTED_SIG,
        ))
        .await;
        let verdict = client(&rejected).submit(b"quote").await.unwrap();
        assert_eq!(verdict.status, AuthorityStatus::Rejected);
    }

    #[tokio::test]
    async fn forged_signature_is_authority_failure() {
        let base = serve(MockAuthority::serving(
            fixtures::REPORT_ACCEPTED,
            fixtures::REPORT_REJECTED_SIG,
        ))
        .await;
        let err = client(&base).submit(b"quote").await.unwrap_err();
        assert_eq!(err.error_code(), "attestation_authority_failure");
    }

    #[tokio::test]
    async fn unpinned_signer_is_authority_failure() {
        let base = serve(MockAuthority::serving(
            fixtures::REPORT_ACCEPTED,
            fixtures::REPORT_ACCEPTED_SIG,
        ))
        .await;
        let client = RemoteAttestationClient::new(
            &base,
            None,
            TrustRoot::from_pem(fixtures::ROGUE_ROOT_PEM).unwrap(),
        )
        .unwrap();
        let err = client.submit(b"quote").await.unwrap_err();
        assert!(err.to_string().contains("pinned root"), "{err}");
    }

    #[tokio::test]
    async fn missing_headers_are_authority_failure() {
        let mut mock =
            MockAuthority::serving(fixtures::REPORT_ACCEPTED, fixtures::REPORT_ACCEPTED_SIG);
        mock.certificate = None;
        let base = serve(mock).await;
        let err = client(&base).submit(b"quote").await.unwrap_err();
        assert!(err.to_string().contains(CERTIFICATE_HEADER), "{err}");
    }

    #[tokio::test]
    async fn http_error_is_authority_failure() {
        let mut mock = MockAuthority::serving(b"", fixtures::REPORT_ACCEPTED_SIG);
        mock.status = StatusCode::SERVICE_UNAVAILABLE;
        let base = serve(mock).await;
        let err = client(&base).submit(b"quote").await.unwrap_err();
        assert!(err.to_string().contains("503"), "{err}");
    }

    #[tokio::test]
    async fn unreachable_authority_is_authority_failure() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let base = Url::parse(&format!("http://{addr}")).unwrap();
        let err = client(&base).submit(b"quote").await.unwrap_err();
        assert_eq!(err.error_code(), "attestation_authority_failure");
    }

    #[tokio::test]
    async fn accepting_verdicts_are_served_from_cache() {
        let mock = MockAuthority::serving(fixtures::REPORT_ACCEPTED, fixtures::REPORT_ACCEPTED_SIG);
        let base = serve(mock.clone()).await;
        let client = client(&base).with_cache(VerdictCache::default());

        client.submit(b"quote").await.unwrap();
        client.submit(b"quote").await.unwrap();
        assert_eq!(mock.calls.load(Ordering::SeqCst), 1);

        client.submit(b"another quote").await.unwrap();
        assert_eq!(mock.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn rejected_verdicts_are_not_cached() {
        let mock = MockAuthority::serving(fixtures::REPORT_REJECTED, fixtures::REPORT_REJECTED_SIG);
        let base = serve(mock.clone()).await;
        let client = client(&base).with_cache(VerdictCache::default());

        client.submit(b"quote").await.unwrap();
        client.submit(b"quote").await.unwrap();
        assert_eq!(mock.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn throttled_requests_fail_without_reaching_authority() {
        let mock = MockAuthority::serving(fixtures::REPORT_ACCEPTED, fixtures::REPORT_ACCEPTED_SIG);
        let base = serve(mock.clone()).await;
        let client = client(&base)
            .with_cache(VerdictCache::default())
            .with_limiter(RequestLimiter::new(1, 1).with_max_wait(Duration::from_millis(100)));

        client.submit(b"quote").await.unwrap();
        // Cache hits spend no request budget.
        client.submit(b"quote").await.unwrap();

        let err = client.submit(b"another quote").await.unwrap_err();
        assert_eq!(err.error_code(), "attestation_authority_failure");
        assert!(err.to_string().contains("rate limit"));
        assert_eq!(mock.calls.load(Ordering::SeqCst), 1);
    }
}
