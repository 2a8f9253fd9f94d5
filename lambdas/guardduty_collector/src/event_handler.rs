use lambda_runtime::{tracing, Error, LambdaEvent};
use serde_json::Value;
use shared::{
    configuration::{bootstrap_environment, CollectorEnvironment},
    core::{
        Collector, CollectorInvocation, Decryptor, EnvironmentUpdater, HealthCheck, InboundEvent,
        KinesisMetrics,
    },
    credentials::CredentialCache,
    error::CollectorError,
    pipeline::format_messages,
    stats::statistics_providers,
};
use std::sync::Arc;
use tokio::sync::Mutex;

pub(crate) struct HandlerDeps<D, U, C, H, M>
where
    D: Decryptor,
    U: EnvironmentUpdater,
    C: Collector,
    H: HealthCheck,
    M: KinesisMetrics + 'static,
{
    pub decryptor: D,
    pub env_updater: U,
    pub collector: C,
    pub health_check: H,
    pub metrics: Arc<M>,
    pub credentials: CredentialCache,
    pub environment: Mutex<CollectorEnvironment>,
}

#[tracing::instrument(skip(deps, event))]
pub(crate) async fn function_handler<D, U, C, H, M>(
    deps: &HandlerDeps<D, U, C, H, M>,
    event: LambdaEvent<Value>,
) -> Result<Value, Error>
where
    D: Decryptor,
    U: EnvironmentUpdater,
    C: Collector,
    H: HealthCheck,
    M: KinesisMetrics + 'static,
{
    let payload = event.payload;
    let context = event.context;

    // An unreadable envelope is reported by the pipeline once the collector runs it.
    let inbound = InboundEvent::from_payload(&payload);

    let mut environment = deps.environment.lock().await;
    bootstrap_environment(&mut environment, &deps.env_updater, &inbound).await;

    let credentials = deps
        .credentials
        .get_decrypted_credentials(&deps.decryptor)
        .await?
        .clone();

    if environment.repair_legacy_api_alias() {
        tracing::info!("Restored azcollect_api from azollect_api, collector_id set to NA");
    }

    let invocation = CollectorInvocation {
        health_providers: vec![deps.health_check.check_health(&payload, &context)],
        stats_providers: statistics_providers(&inbound, deps.metrics.clone()),
        context,
        credentials,
        formatter: format_messages,
        environment: environment.clone(),
    };
    drop(environment);

    tracing::debug!("Received event: {}", payload);
    let result = deps
        .collector
        .handle_event(invocation, payload)
        .await
        .map_err(CollectorError::Delegate)?;

    Ok(result)
}
