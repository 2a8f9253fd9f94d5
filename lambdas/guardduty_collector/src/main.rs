use std::sync::Arc;

use collector::HttpCollector;
use event_handler::{function_handler, HandlerDeps};
use lambda_runtime::{run, service_fn, tracing, Error};
use shared::adapters::{
    CloudWatchKinesisMetrics, KinesisStreamHealthCheck, KmsDecryptor, LambdaEnvironmentUpdater,
};
use shared::configuration::CollectorEnvironment;
use shared::credentials::CredentialCache;
use tokio::sync::Mutex;

mod collector;
mod event_handler;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing::init_default_subscriber();
    let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let environment = CollectorEnvironment::load()?;
    tracing::info!("{}", environment);

    let credentials = CredentialCache::new(
        environment.aims_access_key_id.clone(),
        environment.aims_secret_key.clone(),
    );
    let http_client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()?;

    let handler_deps = HandlerDeps {
        decryptor: KmsDecryptor::new(aws_sdk_kms::Client::new(&aws_config)),
        env_updater: LambdaEnvironmentUpdater::new(
            aws_sdk_lambda::Client::new(&aws_config),
            environment.aws_lambda_function_name.clone(),
        ),
        collector: HttpCollector::new(http_client),
        health_check: KinesisStreamHealthCheck::new(aws_sdk_kinesis::Client::new(&aws_config)),
        metrics: Arc::new(CloudWatchKinesisMetrics::new(
            aws_sdk_cloudwatch::Client::new(&aws_config),
        )),
        credentials,
        environment: Mutex::new(environment),
    };

    run(service_fn(|event| function_handler(&handler_deps, event))).await
}
