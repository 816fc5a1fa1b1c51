//! HTTP interface for polling vulnerability jobs.
//!
//! `GET /vulnerabilities?platform=<name>` starts a fetch and answers with a
//! `requestID`; repeating the request with `&requestID=<id>` returns
//! everything found so far until `finished` is true.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::config::Config;
use crate::job::JobSnapshot;
use crate::model::{Platform, Vulnerability};
use crate::registry::{JobError, JobRegistry};
use crate::service::{ServiceError, VulnerabilityService};
use crate::traits::VulnerabilitySource;

#[derive(Debug, Default, Deserialize)]
pub struct VulnsQuery {
    pub platform: Option<String>,
    #[serde(rename = "requestID")]
    pub request_id: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct VulnsResponse {
    pub error: Option<String>,
    #[serde(rename = "requestID")]
    pub request_id: String,
    pub finished: bool,
    pub vulns: Vec<Vulnerability>,
    pub errors: Vec<String>,
}

impl VulnsResponse {
    fn failure(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }

    fn from_snapshot(request_id: String, snapshot: JobSnapshot<Vulnerability>) -> Self {
        Self {
            error: None,
            request_id,
            finished: snapshot.done,
            vulns: snapshot.records,
            errors: snapshot.errors.iter().map(ToString::to_string).collect(),
        }
    }
}

pub fn router(service: VulnerabilityService) -> Router {
    Router::new()
        .route("/vulnerabilities", get(get_vulnerabilities))
        .with_state(service)
}

/// Binds the configured address and serves requests until the listener
/// fails.
pub async fn serve(config: &Config, source: Arc<dyn VulnerabilitySource>) -> std::io::Result<()> {
    let listener = TcpListener::bind(config.bind_address()).await?;
    serve_on(listener, config, source).await
}

/// Serves requests on an already bound listener.
///
/// Owns the job registry and its eviction sweep for as long as it runs.
pub async fn serve_on(
    listener: TcpListener,
    config: &Config,
    source: Arc<dyn VulnerabilitySource>,
) -> std::io::Result<()> {
    let jobs = Arc::new(JobRegistry::new(config.jobs.registry_options()));
    let _sweeper = jobs.spawn_sweeper();

    info!(
        address = %listener.local_addr()?,
        source = source.name(),
        "Serving vulnerability requests"
    );
    axum::serve(listener, router(VulnerabilityService::new(source, jobs))).await
}

pub async fn get_vulnerabilities(
    State(service): State<VulnerabilityService>,
    Query(query): Query<VulnsQuery>,
) -> (StatusCode, Json<VulnsResponse>) {
    let Some(name) = query.platform else {
        return (
            StatusCode::BAD_REQUEST,
            Json(VulnsResponse::failure("missing query parameter 'platform'")),
        );
    };

    let platform: Platform = match name.parse() {
        Ok(platform) => platform,
        Err(unknown) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(VulnsResponse::failure(unknown.to_string())),
            )
        }
    };

    let result = match query.request_id {
        Some(request_id) => service
            .poll(&request_id)
            .await
            .map(|snapshot| (request_id, snapshot)),
        None => service.start(&platform).await,
    };

    match result {
        Ok((request_id, snapshot)) => (
            StatusCode::OK,
            Json(VulnsResponse::from_snapshot(request_id, snapshot)),
        ),
        Err(ServiceError::Job(JobError::NotFound(_))) => (
            StatusCode::BAD_REQUEST,
            Json(VulnsResponse::failure("invalid request id")),
        ),
        Err(e @ ServiceError::Source(_)) => {
            error!(error = %e, platform = %platform, "Could not start vulnerability fetch");
            (
                StatusCode::BAD_GATEWAY,
                Json(VulnsResponse::failure(e.to_string())),
            )
        }
        Err(e @ ServiceError::Job(JobError::Registration(_))) => {
            error!(error = %e, "Could not register vulnerability job");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(VulnsResponse::failure("failed to create request")),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Package, Severity};
    use crate::registry::{JobRegistry, JobRegistryOptions};
    use crate::traits::{FetchError, FetchStream};
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tower::ServiceExt;

    // Emits one vulnerability and one error, then finishes immediately
    struct OneShotSource;

    #[async_trait]
    impl VulnerabilitySource for OneShotSource {
        fn name(&self) -> &str {
            "one-shot"
        }

        async fn vulnerabilities(
            &self,
            platform: &Platform,
        ) -> Result<FetchStream<Vulnerability>, FetchError> {
            let (tx, stream) = FetchStream::channel();
            tx.send_record(Vulnerability {
                name: "CVE-2016-2183".to_string(),
                affected_packages: vec![Package {
                    name: "openssl".to_string(),
                    version: "1.0.1t-1+deb8u5".to_string(),
                }],
                detection_link: format!("https://scanner.local/{}", platform.namespace()),
                severity: Severity::High,
            });
            tx.send_error(FetchError::Upstream("page 3 timed out".to_string()));
            tx.finish();
            Ok(stream)
        }
    }

    struct OfflineSource;

    #[async_trait]
    impl VulnerabilitySource for OfflineSource {
        fn name(&self) -> &str {
            "offline"
        }

        async fn vulnerabilities(
            &self,
            _platform: &Platform,
        ) -> Result<FetchStream<Vulnerability>, FetchError> {
            Err(FetchError::Unavailable("connection refused".to_string()))
        }
    }

    fn app_with(source: Arc<dyn VulnerabilitySource>, options: JobRegistryOptions) -> Router {
        let jobs = Arc::new(JobRegistry::new(options));
        router(VulnerabilityService::new(source, jobs))
    }

    fn app() -> Router {
        app_with(Arc::new(OneShotSource), JobRegistryOptions::default())
    }

    async fn send_get(app: &Router, uri: &str) -> (StatusCode, VulnsResponse) {
        let response = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_missing_platform() {
        let (status, body) = send_get(&app(), "/vulnerabilities").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body.error.as_deref(),
            Some("missing query parameter 'platform'")
        );
    }

    #[tokio::test]
    async fn test_unknown_platform() {
        let (status, body) = send_get(&app(), "/vulnerabilities?platform=plan9").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.error.as_deref(), Some("no such platform 'plan9'"));
    }

    #[tokio::test]
    async fn test_new_request_then_poll() {
        let app = app();

        let (status, first) = send_get(&app, "/vulnerabilities?platform=debian%208").await;
        assert_eq!(status, StatusCode::OK);
        assert!(first.error.is_none());
        assert_eq!(first.request_id.len(), 32);
        assert_eq!(first.vulns.len(), 1);
        assert_eq!(first.vulns[0].detection_link, "https://scanner.local/debian:8");

        let uri = format!(
            "/vulnerabilities?platform=debian%208&requestID={}",
            first.request_id
        );
        let (status, second) = send_get(&app, &uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(second.request_id, first.request_id);
        assert!(second.finished);
        assert_eq!(second.vulns, first.vulns);
        assert_eq!(
            second.errors,
            vec!["Upstream request failed: page 3 timed out".to_string()]
        );
    }

    #[tokio::test]
    async fn test_invalid_request_id() {
        let (status, body) = send_get(
            &app(),
            "/vulnerabilities?platform=debian%208&requestID=missing-id",
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.error.as_deref(), Some("invalid request id"));
        assert!(body.vulns.is_empty());
    }

    #[tokio::test]
    async fn test_empty_platform_is_unknown_not_missing() {
        let (status, body) = send_get(&app(), "/vulnerabilities?platform=").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.error.as_deref(), Some("no such platform ''"));
    }

    #[tokio::test]
    async fn test_empty_request_id_is_polled_not_started() {
        let jobs = Arc::new(JobRegistry::new(JobRegistryOptions::default()));
        let app = router(VulnerabilityService::new(
            Arc::new(OneShotSource),
            Arc::clone(&jobs),
        ));

        let (status, body) =
            send_get(&app, "/vulnerabilities?platform=debian%208&requestID=").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.error.as_deref(), Some("invalid request id"));
        assert!(jobs.is_empty().await);
    }

    #[tokio::test]
    async fn test_source_failure_is_bad_gateway() {
        let app = app_with(Arc::new(OfflineSource), JobRegistryOptions::default());

        let (status, body) = send_get(&app, "/vulnerabilities?platform=debian%209").await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(
            body.error.as_deref(),
            Some("Failed to start vulnerability fetch: Source unavailable: connection refused")
        );
        assert!(body.request_id.is_empty());
    }

    #[tokio::test]
    async fn test_registration_failure_is_internal_error() {
        let options = JobRegistryOptions {
            identifier_length: 0,
            ..JobRegistryOptions::default()
        };
        let app = app_with(Arc::new(OneShotSource), options);

        let (status, body) = send_get(&app, "/vulnerabilities?platform=alpine%203.8").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.error.as_deref(), Some("failed to create request"));
    }

    #[tokio::test]
    async fn test_serve_on_answers_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            serve_on(listener, &Config::default(), Arc::new(OneShotSource)).await
        });

        let mut stream = TcpStream::connect(address).await.unwrap();
        stream
            .write_all(
                b"GET /vulnerabilities?platform=debian%208 HTTP/1.1\r\n\
                  Host: localhost\r\n\
                  Connection: close\r\n\r\n",
            )
            .await
            .unwrap();
        let mut raw = String::new();
        stream.read_to_string(&mut raw).await.unwrap();

        assert!(raw.starts_with("HTTP/1.1 200 OK"));
        assert!(raw.contains("\"requestID\""));
        assert!(raw.contains("CVE-2016-2183"));

        server.abort();
    }

    #[tokio::test]
    async fn test_serve_reports_bind_failure() {
        let mut config = Config::default();
        config.server.host = "not a host".to_string();

        let result = serve(&config, Arc::new(OneShotSource)).await;
        assert!(result.is_err());
    }
}
