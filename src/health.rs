//! Service health checks.
//!
//! Two levels: a basic check that only probes the active database
//! connection, and a detailed check that additionally probes the external
//! services the platform depends on (object storage, user pool, key-value
//! table). Every probe is bounded by the configured probe timeout so a hung
//! dependency cannot stall the report.

use crate::config::Config;
use crate::db::{BackendKind, DatabaseManager};
use aws_config::{BehaviorVersion, Region};
use aws_sdk_dynamodb::error::ProvideErrorMetadata as _;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Up,
    Down,
}

/// Aggregate verdict over all probed services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Outcome of probing one service.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceReport {
    pub name: &'static str,
    pub status: ServiceStatus,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Full detailed health report.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: OverallStatus,
    pub backend: BackendKind,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub checked_at: DateTime<Utc>,
    pub services: Vec<ServiceReport>,
}

/// Aggregate the database probe and dependency probes into a verdict.
///
/// The database is the one service the platform cannot run without, so it
/// being down is immediately unhealthy. A single dependency down leaves the
/// platform working in a reduced capacity; more than one does not.
pub fn aggregate(database: ServiceStatus, dependencies: &[ServiceStatus]) -> OverallStatus {
    if database == ServiceStatus::Down {
        return OverallStatus::Unhealthy;
    }
    let down = dependencies
        .iter()
        .filter(|s| **s == ServiceStatus::Down)
        .count();
    match down {
        0 => OverallStatus::Healthy,
        1 => OverallStatus::Degraded,
        _ => OverallStatus::Unhealthy,
    }
}

/// Prober for the platform's service dependencies.
///
/// External-service clients are only built for services that are actually
/// configured; unconfigured services report as up with a note so the report
/// shape stays stable across deployments.
pub struct HealthCheckService {
    manager: Arc<DatabaseManager>,
    started_at: Instant,
    probe_timeout: Duration,
    s3: Option<(aws_sdk_s3::Client, String)>,
    cognito: Option<(aws_sdk_cognitoidentityprovider::Client, String)>,
    dynamodb: Option<(aws_sdk_dynamodb::Client, String)>,
}

impl HealthCheckService {
    pub async fn new(manager: Arc<DatabaseManager>, config: &Config) -> Self {
        let needs_aws = config.s3_bucket.is_some()
            || config.cognito_user_pool_id.is_some()
            || config.dynamodb_table.is_some();

        let shared = if needs_aws {
            Some(
                aws_config::defaults(BehaviorVersion::latest())
                    .region(Region::new(config.aws_region.clone()))
                    .load()
                    .await,
            )
        } else {
            None
        };

        let s3 = match (&shared, &config.s3_bucket) {
            (Some(shared), Some(bucket)) => {
                Some((aws_sdk_s3::Client::new(shared), bucket.clone()))
            }
            _ => None,
        };
        let cognito = match (&shared, &config.cognito_user_pool_id) {
            (Some(shared), Some(pool_id)) => Some((
                aws_sdk_cognitoidentityprovider::Client::new(shared),
                pool_id.clone(),
            )),
            _ => None,
        };
        let dynamodb = match (&shared, &config.dynamodb_table) {
            (Some(shared), Some(table)) => {
                Some((aws_sdk_dynamodb::Client::new(shared), table.clone()))
            }
            _ => None,
        };

        Self {
            manager,
            started_at: Instant::now(),
            probe_timeout: config.probe_timeout_duration(),
            s3,
            cognito,
            dynamodb,
        }
    }

    /// Liveness: the process itself is responding. Always true when this
    /// code runs; exists so orchestrators have a restart signal distinct
    /// from readiness.
    pub fn alive(&self) -> bool {
        true
    }

    /// Readiness: is the active database connection answering.
    pub async fn ready(&self) -> bool {
        self.manager.test_connection().await
    }

    /// Basic liveness of the database dependency, same probe as readiness.
    pub async fn basic(&self) -> bool {
        self.ready().await
    }

    /// Probe every service and aggregate the results.
    ///
    /// Probes run concurrently, each bounded by its own timeout, so one
    /// slow dependency cannot delay the others.
    pub async fn detailed(&self) -> HealthReport {
        let (database, s3, cognito, dynamodb) = tokio::join!(
            self.probe_database(),
            self.probe_s3(),
            self.probe_cognito(),
            self.probe_dynamodb(),
        );
        let dependencies = vec![s3, cognito, dynamodb];

        let dep_statuses: Vec<ServiceStatus> = dependencies.iter().map(|s| s.status).collect();
        let status = aggregate(database.status, &dep_statuses);
        if status != OverallStatus::Healthy {
            warn!(?status, "Health check found degraded services");
        }

        let mut services = vec![database];
        services.extend(dependencies);

        HealthReport {
            status,
            backend: self.manager.database_type().await,
            version: env!("CARGO_PKG_VERSION"),
            uptime_secs: self.started_at.elapsed().as_secs(),
            checked_at: Utc::now(),
            services,
        }
    }

    async fn probe_database(&self) -> ServiceReport {
        let started = Instant::now();
        let up = self.manager.test_connection().await;
        report("database", started, up, None)
    }

    async fn probe_s3(&self) -> ServiceReport {
        let started = Instant::now();
        let Some((client, bucket)) = self.s3.as_ref() else {
            return skipped("s3", started);
        };
        let result = timeout(
            self.probe_timeout,
            client.head_bucket().bucket(bucket).send(),
        )
        .await;
        match result {
            Ok(Ok(_)) => report("s3", started, true, None),
            Ok(Err(e)) => report("s3", started, false, Some(e.to_string())),
            Err(_) => report("s3", started, false, Some("probe timed out".to_string())),
        }
    }

    async fn probe_cognito(&self) -> ServiceReport {
        let started = Instant::now();
        let Some((client, pool_id)) = self.cognito.as_ref() else {
            return skipped("cognito", started);
        };
        let result = timeout(
            self.probe_timeout,
            client.describe_user_pool().user_pool_id(pool_id).send(),
        )
        .await;
        match result {
            Ok(Ok(_)) => report("cognito", started, true, None),
            Ok(Err(e)) => report("cognito", started, false, Some(e.to_string())),
            Err(_) => report(
                "cognito",
                started,
                false,
                Some("probe timed out".to_string()),
            ),
        }
    }

    async fn probe_dynamodb(&self) -> ServiceReport {
        let started = Instant::now();
        let Some((client, table)) = self.dynamodb.as_ref() else {
            return skipped("dynamodb", started);
        };
        let result = timeout(
            self.probe_timeout,
            client.describe_table().table_name(table).send(),
        )
        .await;
        match result {
            Ok(Ok(_)) => report("dynamodb", started, true, None),
            // A missing table still proves the service itself answered.
            Ok(Err(e)) if e.code() == Some("ResourceNotFoundException") => {
                debug!(table = %table, "DynamoDB table not found but service reachable");
                report("dynamodb", started, true, Some("table not found".to_string()))
            }
            Ok(Err(e)) => report("dynamodb", started, false, Some(e.to_string())),
            Err(_) => report(
                "dynamodb",
                started,
                false,
                Some("probe timed out".to_string()),
            ),
        }
    }
}

fn report(name: &'static str, started: Instant, up: bool, detail: Option<String>) -> ServiceReport {
    ServiceReport {
        name,
        status: if up {
            ServiceStatus::Up
        } else {
            ServiceStatus::Down
        },
        latency_ms: started.elapsed().as_millis() as u64,
        detail,
    }
}

fn skipped(name: &'static str, started: Instant) -> ServiceReport {
    report(name, started, true, Some("not configured".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Connector;
    use crate::db::mock::{MockBehavior, MockConnector};

    #[test]
    fn test_aggregate_all_up() {
        let deps = [ServiceStatus::Up, ServiceStatus::Up, ServiceStatus::Up];
        assert_eq!(aggregate(ServiceStatus::Up, &deps), OverallStatus::Healthy);
    }

    #[test]
    fn test_aggregate_one_dependency_down_is_degraded() {
        let deps = [ServiceStatus::Up, ServiceStatus::Down, ServiceStatus::Up];
        assert_eq!(aggregate(ServiceStatus::Up, &deps), OverallStatus::Degraded);
    }

    #[test]
    fn test_aggregate_two_dependencies_down_is_unhealthy() {
        let deps = [ServiceStatus::Down, ServiceStatus::Down, ServiceStatus::Up];
        assert_eq!(
            aggregate(ServiceStatus::Up, &deps),
            OverallStatus::Unhealthy
        );
    }

    #[test]
    fn test_aggregate_database_down_is_always_unhealthy() {
        let all_up = [ServiceStatus::Up, ServiceStatus::Up, ServiceStatus::Up];
        assert_eq!(
            aggregate(ServiceStatus::Down, &all_up),
            OverallStatus::Unhealthy
        );
    }

    #[test]
    fn test_aggregate_no_dependencies() {
        assert_eq!(aggregate(ServiceStatus::Up, &[]), OverallStatus::Healthy);
        assert_eq!(
            aggregate(ServiceStatus::Down, &[]),
            OverallStatus::Unhealthy
        );
    }

    fn mock_service(behavior: MockBehavior) -> HealthCheckService {
        let manager = DatabaseManager::with_connector(
            Config::default(),
            Connector::Mock(MockConnector::new(BackendKind::StandardSql, behavior)),
        );
        HealthCheckService {
            manager: Arc::new(manager),
            started_at: Instant::now(),
            probe_timeout: Duration::from_secs(5),
            s3: None,
            cognito: None,
            dynamodb: None,
        }
    }

    #[tokio::test]
    async fn test_detailed_reports_every_service() {
        let report = mock_service(MockBehavior::Ok).detailed().await;
        assert_eq!(report.status, OverallStatus::Healthy);
        assert_eq!(report.backend, BackendKind::StandardSql);
        assert_eq!(report.version, env!("CARGO_PKG_VERSION"));

        let names: Vec<&str> = report.services.iter().map(|s| s.name).collect();
        assert_eq!(names, ["database", "s3", "cognito", "dynamodb"]);
    }

    #[tokio::test]
    async fn test_unconfigured_dependencies_report_up_with_note() {
        let report = mock_service(MockBehavior::Ok).detailed().await;
        let s3 = report.services.iter().find(|s| s.name == "s3").unwrap();
        assert_eq!(s3.status, ServiceStatus::Up);
        assert_eq!(s3.detail.as_deref(), Some("not configured"));
    }

    #[tokio::test]
    async fn test_database_down_makes_report_unhealthy() {
        let report = mock_service(MockBehavior::Fail).detailed().await;
        assert_eq!(report.status, OverallStatus::Unhealthy);
        assert_eq!(report.services[0].status, ServiceStatus::Down);
    }

    #[tokio::test]
    async fn test_readiness_follows_connection_probe() {
        assert!(mock_service(MockBehavior::Ok).ready().await);
        assert!(!mock_service(MockBehavior::Fail).ready().await);
        assert!(mock_service(MockBehavior::Fail).alive());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dependency_probes_share_one_timeout_window() {
        // A server that accepts connections and never answers, so both
        // probes run into their own timeout. If they queued behind each
        // other the report would take two windows instead of one.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            loop {
                match listener.accept().await {
                    Ok((socket, _)) => held.push(socket),
                    Err(_) => return,
                }
            }
        });

        let endpoint = format!("http://{addr}");
        let credentials =
            aws_sdk_s3::config::Credentials::new("test", "test", None, None, "test");
        let s3 = aws_sdk_s3::Client::from_conf(
            aws_sdk_s3::Config::builder()
                .behavior_version(BehaviorVersion::latest())
                .region(Region::new("us-east-1"))
                .credentials_provider(credentials.clone())
                .endpoint_url(&endpoint)
                .build(),
        );
        let dynamodb = aws_sdk_dynamodb::Client::from_conf(
            aws_sdk_dynamodb::Config::builder()
                .behavior_version(BehaviorVersion::latest())
                .region(Region::new("us-east-1"))
                .credentials_provider(credentials)
                .endpoint_url(&endpoint)
                .build(),
        );

        let mut service = mock_service(MockBehavior::Ok);
        service.probe_timeout = Duration::from_secs(5);
        service.s3 = Some((s3, "edudb-assets".to_string()));
        service.dynamodb = Some((dynamodb, "edudb-sessions".to_string()));

        let started = tokio::time::Instant::now();
        let report = service.detailed().await;

        assert!(
            started.elapsed() < Duration::from_secs(8),
            "probes did not run concurrently: {:?}",
            started.elapsed()
        );
        let s3_report = report.services.iter().find(|s| s.name == "s3").unwrap();
        let ddb_report = report
            .services
            .iter()
            .find(|s| s.name == "dynamodb")
            .unwrap();
        assert_eq!(s3_report.status, ServiceStatus::Down);
        assert_eq!(ddb_report.status, ServiceStatus::Down);
        assert_eq!(report.status, OverallStatus::Unhealthy);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_value(OverallStatus::Degraded).unwrap();
        assert_eq!(json, serde_json::json!("degraded"));
    }
}
