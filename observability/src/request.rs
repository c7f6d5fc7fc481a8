use std::{
    future::Future,
    pin::Pin,
    task::{self, Poll},
    time::Instant,
};

use futures::TryFuture;

use crate::{Counter, Histogram, KeyValue};

/// Latency and outcome of one kind of outgoing request.
///
/// Both instruments carry an `outcome` attribute, either `ok` or `error`, next to the
/// attributes given by the caller.
#[derive(Debug, Clone)]
pub struct RequestMetrics {
    latency: Histogram<f64>,
    requests: Counter<u64>,
}

impl RequestMetrics {
    pub fn new(meter_name: &'static str, metric_name: &'static str) -> Self {
        let meter = crate::meter(meter_name);

        let latency = meter
            .f64_histogram(format!("{metric_name}.latency"))
            .with_description(format!("latency of {metric_name}"))
            .with_unit("s")
            .with_boundaries(vec![
                0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0, 60.0,
            ])
            .build();

        let requests = meter
            .u64_counter(format!("{metric_name}.count"))
            .with_description(format!("number of {metric_name} by outcome"))
            .build();

        Self { latency, requests }
    }

    fn record(&self, elapsed: f64, is_ok: bool, attributes: &[KeyValue]) {
        let outcome = if is_ok { "ok" } else { "error" };
        let mut attributes = attributes.to_vec();
        attributes.push(KeyValue::new("outcome", outcome));

        self.latency.record(elapsed, &attributes);
        self.requests.add(1, &attributes);
    }
}

/// Future returned by [RecordRequest].
#[pin_project::pin_project]
pub struct RecordedRequest<T> {
    #[pin]
    inner: T,
    started_at: Instant,
    metrics: RequestMetrics,
    attributes: Vec<KeyValue>,
}

/// Records latency and outcome of a fallible future.
pub trait RecordRequest: TryFuture + Sized {
    fn record_request(self, metrics: RequestMetrics) -> RecordedRequest<Self> {
        self.record_request_with_attributes(metrics, &[])
    }

    fn record_request_with_attributes(
        self,
        metrics: RequestMetrics,
        attributes: &[KeyValue],
    ) -> RecordedRequest<Self> {
        RecordedRequest {
            inner: self,
            started_at: Instant::now(),
            metrics,
            attributes: attributes.to_vec(),
        }
    }
}

impl<T: TryFuture> RecordRequest for T {}

impl<T: TryFuture> Future for RecordedRequest<T> {
    type Output = Result<T::Ok, T::Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let output = futures::ready!(this.inner.try_poll(cx));

        let elapsed = this.started_at.elapsed().as_secs_f64();
        this.metrics.record(elapsed, output.is_ok(), this.attributes);

        Poll::Ready(output)
    }
}

#[cfg(test)]
mod tests {
    use super::{RecordRequest, RequestMetrics};

    #[tokio::test]
    async fn test_recorded_request_passes_output_through() {
        let metrics = RequestMetrics::new("test", "test.request");

        let ok = async { Ok::<_, ()>(42u64) }
            .record_request(metrics.clone())
            .await;
        assert_eq!(ok, Ok(42));

        let err = async { Err::<u64, _>("boom") }
            .record_request_with_attributes(metrics, &[crate::KeyValue::new("method", "x")])
            .await;
        assert_eq!(err, Err("boom"));
    }
}
