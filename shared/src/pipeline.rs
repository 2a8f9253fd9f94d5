use crate::core::{CollectedBatch, DecodedEvent, InboundEvent, RawRecord};
use crate::error::CollectorError;
use base64::{engine::general_purpose::STANDARD, Engine};
use lambda_runtime::Context;
use serde::Deserialize;
use serde_json::Value;

pub const GUARDDUTY_SOURCE: &str = "aws.guardduty";
pub const GUARDDUTY_DETAIL_TYPE: &str = "GuardDuty Finding";

/// Decodes every record, substituting an empty event for any record that fails.
/// The output always has one entry per input record, in input order.
pub fn decode_records(records: &[RawRecord]) -> Vec<DecodedEvent> {
    records.iter().map(decode_record).collect()
}

fn decode_record(record: &RawRecord) -> DecodedEvent {
    let data = &record.kinesis.data;
    let parsed = STANDARD
        .decode(data)
        .map_err(|e| e.to_string())
        .and_then(|bytes| {
            let text = String::from_utf8_lossy(&bytes);
            serde_json::from_str::<DecodedEvent>(&text).map_err(|e| e.to_string())
        });

    match parsed {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!("Event parse failed. {}", e);
            tracing::warn!("Skipping: {:?}", data);
            DecodedEvent::default()
        }
    }
}

pub fn is_guardduty_finding(event: &DecodedEvent) -> bool {
    event.source.as_deref() == Some(GUARDDUTY_SOURCE)
        && event.detail_type.as_deref() == Some(GUARDDUTY_DETAIL_TYPE)
}

pub fn filter_guardduty_events(events: Vec<DecodedEvent>) -> Vec<DecodedEvent> {
    events
        .into_iter()
        .filter(|event| {
            let keep = is_guardduty_finding(event);
            if keep {
                tracing::debug!("Including event: {:?}", event);
            } else {
                tracing::debug!("Filtering out event: {:?}", event);
            }
            keep
        })
        .collect()
}

/// Wraps the findings into one batch; an empty input means there is nothing to send.
pub fn assemble_batch(events: Vec<DecodedEvent>, source_id: &str) -> Option<CollectedBatch> {
    if events.is_empty() {
        return None;
    }
    Some(CollectedBatch {
        source_id: source_id.to_string(),
        collected_messages: events,
    })
}

/// Runs decode, filter and assembly over a raw invocation payload.
pub fn format_messages(
    event: &Value,
    context: &Context,
) -> Result<Option<CollectedBatch>, CollectorError> {
    let inbound = InboundEvent::deserialize(event)?;
    let decoded = decode_records(&inbound.records);
    let findings = filter_guardduty_events(decoded);
    Ok(assemble_batch(findings, &context.invoked_function_arn))
}
