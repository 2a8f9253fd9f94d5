use crate::configuration::CollectorEnvironment;
use crate::error::CollectorError;
use async_trait::async_trait;
use futures::future::BoxFuture;
use lambda_runtime::Context;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

#[cfg(any(test, feature = "mocks"))]
use mockall::{automock, predicate::*};

/// A deferred metric fetch, handed to the collector and never invoked by the pipeline itself.
pub type StatsProvider =
    Box<dyn Fn() -> BoxFuture<'static, Result<MetricStatistic, String>> + Send + Sync>;

/// A deferred health probe, resolved by the collector during checkin.
pub type HealthProvider = Box<dyn Fn() -> BoxFuture<'static, Result<(), String>> + Send + Sync>;

/// The decode, filter and batch pipeline, passed to the collector uninvoked.
pub type Formatter = fn(&Value, &Context) -> Result<Option<CollectedBatch>, CollectorError>;

#[cfg_attr(any(test, feature = "mocks"), automock)]
#[async_trait]
pub trait Decryptor {
    async fn decrypt(&self, ciphertext: Vec<u8>) -> Result<Vec<u8>, String>;
}

#[cfg_attr(any(test, feature = "mocks"), automock)]
#[async_trait]
pub trait EnvironmentUpdater {
    async fn set_env(&self, vars: HashMap<String, String>) -> Result<(), String>;
}

#[cfg_attr(any(test, feature = "mocks"), automock)]
#[async_trait]
pub trait KinesisMetrics: Send + Sync {
    async fn kinesis_metric(
        &self,
        stream_name: &str,
        metric_name: &str,
    ) -> Result<MetricStatistic, String>;
}

#[cfg_attr(any(test, feature = "mocks"), automock)]
pub trait HealthCheck {
    fn check_health(&self, event: &Value, context: &Context) -> HealthProvider;
}

/// The delivery delegate. Everything it needs for one invocation arrives in `invocation`.
#[cfg_attr(any(test, feature = "mocks"), automock)]
#[async_trait]
pub trait Collector {
    async fn handle_event(
        &self,
        invocation: CollectorInvocation,
        event: Value,
    ) -> Result<Value, String>;
}

pub struct CollectorInvocation {
    pub context: Context,
    pub credentials: CredentialPair,
    pub formatter: Formatter,
    pub health_providers: Vec<HealthProvider>,
    pub stats_providers: Vec<StatsProvider>,
    pub environment: CollectorEnvironment,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CredentialPair {
    pub access_key_id: String,
    pub secret_key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricDatapoint {
    pub timestamp: Option<i64>,
    pub sum: Option<f64>,
    pub unit: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricStatistic {
    pub stream_name: String,
    pub metric_name: String,
    pub datapoints: Vec<MetricDatapoint>,
}

/// The payload a Lambda invocation hands to the collector.
#[derive(Debug, Default, Deserialize)]
pub struct InboundEvent {
    #[serde(rename = "Records", default)]
    pub records: Vec<RawRecord>,
    #[serde(rename = "KinesisArn", default)]
    pub kinesis_arn: Option<String>,
    #[serde(rename = "StackName", default)]
    pub stack_name: Option<String>,
}

impl InboundEvent {
    /// Reads the envelope, treating an unreadable payload as an event with no records.
    pub fn from_payload(payload: &Value) -> Self {
        InboundEvent::deserialize(payload).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRecord {
    #[serde(default)]
    pub kinesis: KinesisPayload,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct KinesisPayload {
    /// Base64 encoded record body, kept as received.
    #[serde(default)]
    pub data: String,
}

/// A parsed record. `source` and `detail-type` are lifted out when they are strings,
/// everything else stays in `fields` so the event serialises back unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(
    from = "serde_json::Map<String, serde_json::Value>",
    into = "serde_json::Map<String, serde_json::Value>"
)]
pub struct DecodedEvent {
    pub source: Option<String>,
    pub detail_type: Option<String>,
    pub fields: Map<String, Value>,
}

const SOURCE_KEY: &str = "source";
const DETAIL_TYPE_KEY: &str = "detail-type";

#[cfg(test)]
impl DecodedEvent {
    pub fn is_empty(&self) -> bool {
        self.source.is_none() && self.detail_type.is_none() && self.fields.is_empty()
    }
}

fn take_string(fields: &mut Map<String, Value>, key: &str) -> Option<String> {
    match fields.get(key) {
        Some(Value::String(_)) => match fields.remove(key) {
            Some(Value::String(value)) => Some(value),
            _ => None,
        },
        _ => None,
    }
}

impl From<Map<String, Value>> for DecodedEvent {
    fn from(mut fields: Map<String, Value>) -> Self {
        let source = take_string(&mut fields, SOURCE_KEY);
        let detail_type = take_string(&mut fields, DETAIL_TYPE_KEY);
        Self {
            source,
            detail_type,
            fields,
        }
    }
}

impl From<DecodedEvent> for Map<String, Value> {
    fn from(event: DecodedEvent) -> Self {
        let mut fields = event.fields;
        if let Some(source) = event.source {
            fields.insert(SOURCE_KEY.to_string(), Value::String(source));
        }
        if let Some(detail_type) = event.detail_type {
            fields.insert(DETAIL_TYPE_KEY.to_string(), Value::String(detail_type));
        }
        fields
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectedBatch {
    pub source_id: String,
    pub collected_messages: Vec<DecodedEvent>,
}

#[cfg(test)]
mod tests {
    use super::{DecodedEvent, InboundEvent};
    use serde_json::json;

    #[test]
    fn when_source_fields_are_strings_should_lift_them_out() {
        let event: DecodedEvent = serde_json::from_value(json!({
            "source": "aws.guardduty",
            "detail-type": "GuardDuty Finding",
            "detail": { "severity": 5 }
        }))
        .unwrap();

        assert_eq!(event.source.as_deref(), Some("aws.guardduty"));
        assert_eq!(event.detail_type.as_deref(), Some("GuardDuty Finding"));
        assert_eq!(event.fields.len(), 1);
    }

    #[test]
    fn when_source_is_not_a_string_should_keep_it_in_fields() {
        let event: DecodedEvent = serde_json::from_value(json!({ "source": 42 })).unwrap();

        assert!(event.source.is_none());
        assert_eq!(event.fields["source"], json!(42));
    }

    #[test]
    fn when_serialized_should_reproduce_the_input_object() {
        let input = json!({
            "source": "aws.guardduty",
            "detail-type": "GuardDuty Finding",
            "account": "123456789012"
        });
        let event: DecodedEvent = serde_json::from_value(input.clone()).unwrap();

        assert_eq!(serde_json::to_value(&event).unwrap(), input);
    }

    #[test]
    fn when_inbound_event_has_no_records_should_default_to_empty() {
        let event: InboundEvent =
            serde_json::from_value(json!({ "KinesisArn": "arn:aws:kinesis:us-east-1:1:stream/s" }))
                .unwrap();

        assert!(event.records.is_empty());
        assert!(event.stack_name.is_none());
        assert!(event.kinesis_arn.is_some());
    }

    #[test]
    fn when_record_has_no_data_should_default_to_empty_payload() {
        let event: InboundEvent =
            serde_json::from_value(json!({ "Records": [ { "eventID": "1" } ] })).unwrap();

        assert_eq!(event.records.len(), 1);
        assert_eq!(event.records[0].kinesis.data, "");
    }
}
