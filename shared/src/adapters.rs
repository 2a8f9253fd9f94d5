use crate::core::{
    Decryptor, EnvironmentUpdater, HealthCheck, HealthProvider, InboundEvent, KinesisMetrics,
    MetricDatapoint, MetricStatistic,
};
use crate::stats::arn_to_name;
use async_trait::async_trait;
use aws_sdk_cloudwatch::primitives::DateTime;
use aws_sdk_cloudwatch::types::{Dimension, Statistic};
use aws_sdk_kinesis::types::StreamStatus;
use aws_sdk_kms::primitives::Blob;
use aws_sdk_lambda::types::Environment;
use futures::future::BoxFuture;
use lambda_runtime::Context;
use serde_json::Value;
use std::collections::HashMap;
use std::time::SystemTime;

const KINESIS_NAMESPACE: &str = "AWS/Kinesis";
const METRIC_WINDOW_SECS: i64 = 3600;

#[derive(Debug)]
pub struct KmsDecryptor {
    kms_client: aws_sdk_kms::Client,
}

impl KmsDecryptor {
    pub fn new(kms_client: aws_sdk_kms::Client) -> Self {
        Self { kms_client }
    }
}

#[async_trait]
impl Decryptor for KmsDecryptor {
    async fn decrypt(&self, ciphertext: Vec<u8>) -> Result<Vec<u8>, String> {
        let output = self
            .kms_client
            .decrypt()
            .ciphertext_blob(Blob::new(ciphertext))
            .send()
            .await
            .map_err(|e| format!("Error decrypting secret: {:?}", e))?;

        output
            .plaintext
            .map(|plaintext| plaintext.into_inner())
            .ok_or_else(|| "Decrypt returned no plaintext".to_string())
    }
}

/// Persists variables onto this function's own configuration, keeping the ones already set.
#[derive(Debug)]
pub struct LambdaEnvironmentUpdater {
    lambda_client: aws_sdk_lambda::Client,
    function_name: Option<String>,
}

impl LambdaEnvironmentUpdater {
    pub fn new(lambda_client: aws_sdk_lambda::Client, function_name: Option<String>) -> Self {
        Self {
            lambda_client,
            function_name,
        }
    }
}

#[async_trait]
impl EnvironmentUpdater for LambdaEnvironmentUpdater {
    async fn set_env(&self, vars: HashMap<String, String>) -> Result<(), String> {
        let function_name = self
            .function_name
            .as_deref()
            .ok_or_else(|| "Function name is not known".to_string())?;

        let current = self
            .lambda_client
            .get_function_configuration()
            .function_name(function_name)
            .send()
            .await
            .map_err(|e| format!("Error reading function configuration: {:?}", e))?;

        let mut variables = current
            .environment
            .and_then(|environment| environment.variables)
            .unwrap_or_default();
        variables.extend(vars);

        self.lambda_client
            .update_function_configuration()
            .function_name(function_name)
            .environment(Environment::builder().set_variables(Some(variables)).build())
            .send()
            .await
            .map(|_| ())
            .map_err(|e| format!("Error updating function configuration: {:?}", e))
    }
}

#[derive(Debug)]
pub struct CloudWatchKinesisMetrics {
    cloudwatch_client: aws_sdk_cloudwatch::Client,
}

impl CloudWatchKinesisMetrics {
    pub fn new(cloudwatch_client: aws_sdk_cloudwatch::Client) -> Self {
        Self { cloudwatch_client }
    }
}

#[async_trait]
impl KinesisMetrics for CloudWatchKinesisMetrics {
    async fn kinesis_metric(
        &self,
        stream_name: &str,
        metric_name: &str,
    ) -> Result<MetricStatistic, String> {
        let end_time = DateTime::from(SystemTime::now());
        let start_time = DateTime::from_secs(end_time.secs() - METRIC_WINDOW_SECS);

        let output = self
            .cloudwatch_client
            .get_metric_statistics()
            .namespace(KINESIS_NAMESPACE)
            .metric_name(metric_name)
            .dimensions(stream_dimension(stream_name))
            .start_time(start_time)
            .end_time(end_time)
            .period(METRIC_WINDOW_SECS as i32)
            .statistics(Statistic::Sum)
            .send()
            .await
            .map_err(|e| format!("Error fetching {} for {}: {:?}", metric_name, stream_name, e))?;

        let datapoints = output
            .datapoints
            .unwrap_or_default()
            .into_iter()
            .map(|datapoint| MetricDatapoint {
                timestamp: datapoint.timestamp.map(|timestamp| timestamp.secs()),
                sum: datapoint.sum,
                unit: datapoint.unit.map(|unit| unit.as_str().to_string()),
            })
            .collect();

        Ok(MetricStatistic {
            stream_name: stream_name.to_string(),
            metric_name: metric_name.to_string(),
            datapoints,
        })
    }
}

/// Reports unhealthy when the stream feeding the collector is not active.
#[derive(Debug, Clone)]
pub struct KinesisStreamHealthCheck {
    kinesis_client: aws_sdk_kinesis::Client,
}

impl KinesisStreamHealthCheck {
    pub fn new(kinesis_client: aws_sdk_kinesis::Client) -> Self {
        Self { kinesis_client }
    }
}

impl HealthCheck for KinesisStreamHealthCheck {
    fn check_health(&self, event: &Value, _context: &Context) -> HealthProvider {
        let stream_name = InboundEvent::from_payload(event)
            .kinesis_arn
            .map(|arn| arn_to_name(&arn).to_string());
        let kinesis_client = self.kinesis_client.clone();

        Box::new(move || -> BoxFuture<'static, Result<(), String>> {
            let kinesis_client = kinesis_client.clone();
            let stream_name = stream_name.clone();
            Box::pin(async move {
                let Some(stream_name) = stream_name else {
                    return Ok(());
                };
                let output = kinesis_client
                    .describe_stream_summary()
                    .stream_name(&stream_name)
                    .send()
                    .await
                    .map_err(|e| format!("Error describing stream {}: {:?}", stream_name, e))?;

                let status = output
                    .stream_description_summary
                    .map(|summary| summary.stream_status);
                stream_health(&stream_name, status.as_ref())
            })
        })
    }
}

fn stream_dimension(stream_name: &str) -> Dimension {
    Dimension::builder()
        .name("StreamName")
        .value(stream_name)
        .build()
}

fn stream_health(stream_name: &str, status: Option<&StreamStatus>) -> Result<(), String> {
    match status {
        Some(StreamStatus::Active) => Ok(()),
        Some(other) => Err(format!(
            "Stream {} is {}, expected ACTIVE",
            stream_name,
            other.as_str()
        )),
        None => Err(format!("Stream {} returned no summary", stream_name)),
    }
}
