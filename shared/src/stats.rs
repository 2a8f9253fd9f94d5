use crate::core::{InboundEvent, KinesisMetrics, MetricStatistic, StatsProvider};
use futures::future::BoxFuture;
use std::sync::Arc;

pub const KINESIS_METRIC_NAMES: [&str; 4] = [
    "IncomingRecords",
    "IncomingBytes",
    "ReadProvisionedThroughputExceeded",
    "WriteProvisionedThroughputExceeded",
];

/// Short resource name from an ARN, e.g. `stream/guardduty-events` -> `guardduty-events`.
pub fn arn_to_name(arn: &str) -> &str {
    let resource = arn.rsplit(':').next().unwrap_or(arn);
    resource.rsplit('/').next().unwrap_or(resource)
}

/// One provider per Kinesis metric for the stream named in the event, or none when the
/// event does not name a stream.
pub fn statistics_providers<M>(event: &InboundEvent, metrics: Arc<M>) -> Vec<StatsProvider>
where
    M: KinesisMetrics + 'static,
{
    let Some(kinesis_arn) = event.kinesis_arn.as_deref() else {
        return vec![];
    };
    let stream_name = arn_to_name(kinesis_arn).to_string();

    KINESIS_METRIC_NAMES
        .into_iter()
        .map(|metric_name| {
            let metrics = metrics.clone();
            let stream_name = stream_name.clone();
            let provider: StatsProvider =
                Box::new(move || -> BoxFuture<'static, Result<MetricStatistic, String>> {
                    let metrics = metrics.clone();
                    let stream_name = stream_name.clone();
                    Box::pin(async move { metrics.kinesis_metric(&stream_name, metric_name).await })
                });
            provider
        })
        .collect()
}
