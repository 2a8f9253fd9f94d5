use async_trait::async_trait;
use lambda_runtime::tracing;
use serde_json::{json, Value};
use shared::{
    configuration::CollectorEnvironment,
    core::{Collector, CollectorInvocation, CredentialPair, MetricStatistic},
};

const CHECKIN_PATH: &str = "/aws/cwe/checkin";

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum EventKind {
    Checkin,
    Data,
}

impl EventKind {
    pub fn classify(event: &Value) -> Self {
        match event.get("Type").and_then(Value::as_str) {
            Some("Checkin") => EventKind::Checkin,
            _ => EventKind::Data,
        }
    }
}

/// Delivers collected batches and checkin reports over HTTPS. A failed request fails the
/// invocation; retrying is left to the Lambda event source.
pub(crate) struct HttpCollector {
    http_client: reqwest::Client,
}

impl HttpCollector {
    pub fn new(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }

    async fn send_collected(
        &self,
        invocation: CollectorInvocation,
        event: &Value,
    ) -> Result<Value, String> {
        let batch = (invocation.formatter)(event, &invocation.context).map_err(|e| e.to_string())?;
        let Some(batch) = batch else {
            tracing::info!("No GuardDuty findings to send");
            return Ok(json!({ "status": "no_messages" }));
        };

        let ingest_api = invocation
            .environment
            .ingest_api
            .as_deref()
            .ok_or_else(|| "ingest_api is not configured".to_string())?;
        let message_count = batch.collected_messages.len();

        self.post(
            &endpoint_url(ingest_api, ""),
            &invocation.credentials,
            &json!({ "collected_batch": batch }),
        )
        .await?;

        tracing::info!("Sent {} GuardDuty findings", message_count);
        Ok(json!({ "status": "sent", "messages": message_count }))
    }

    async fn checkin(&self, invocation: CollectorInvocation) -> Result<Value, String> {
        let health =
            futures::future::join_all(invocation.health_providers.iter().map(|check| check()))
                .await;
        let statistics =
            futures::future::join_all(invocation.stats_providers.iter().map(|fetch| fetch()))
                .await;

        if invocation.environment.skips_registration() {
            tracing::info!("Checkin reports register=false for collector_id NA");
        }
        let report = build_checkin_report(&invocation.environment, health, statistics);

        let azcollect_api = invocation
            .environment
            .azcollect_api
            .as_deref()
            .ok_or_else(|| "azcollect_api is not configured".to_string())?;

        self.post(
            &endpoint_url(azcollect_api, CHECKIN_PATH),
            &invocation.credentials,
            &report,
        )
        .await?;

        Ok(report)
    }

    async fn post(
        &self,
        url: &str,
        credentials: &CredentialPair,
        body: &Value,
    ) -> Result<(), String> {
        self.http_client
            .post(url)
            .basic_auth(&credentials.access_key_id, Some(&credentials.secret_key))
            .json(body)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map(|_| ())
            .map_err(|e| format!("Error posting to {}: {:?}", url, e))
    }
}

#[async_trait]
impl Collector for HttpCollector {
    async fn handle_event(
        &self,
        invocation: CollectorInvocation,
        event: Value,
    ) -> Result<Value, String> {
        match EventKind::classify(&event) {
            EventKind::Checkin => self.checkin(invocation).await,
            EventKind::Data => self.send_collected(invocation, &event).await,
        }
    }
}

/// Accepts either a bare host, as older deployments configure it, or a full base URL.
fn endpoint_url(api: &str, path: &str) -> String {
    let base = api.trim_end_matches('/');
    if base.contains("://") {
        format!("{}{}", base, path)
    } else {
        format!("https://{}{}", base, path)
    }
}

pub(crate) fn build_checkin_report(
    environment: &CollectorEnvironment,
    health: Vec<Result<(), String>>,
    statistics: Vec<Result<MetricStatistic, String>>,
) -> Value {
    let errors: Vec<String> = health.into_iter().filter_map(Result::err).collect();
    let statistics: Vec<MetricStatistic> = statistics
        .into_iter()
        .filter_map(|statistic| match statistic {
            Ok(statistic) => Some(statistic),
            Err(e) => {
                tracing::warn!("Skipping statistic: {}", e);
                None
            }
        })
        .collect();

    let status = if errors.is_empty() { "ok" } else { "error" };

    json!({
        "status": status,
        "error_details": errors,
        "statistics": statistics,
        "stack_name": environment.stack_name,
        "application_id": environment.al_application_id,
        "register": !environment.skips_registration(),
    })
}
