use ::metrics::{counter, histogram};
use tracing::trace;

// Each helper records into the `metrics` facade, which the Prometheus
// recorder installed in main renders at /metrics, and emits a trace event.

pub fn inc_requests(route: &'static str) {
    counter!("furniflip_requests_total", "route" => route).increment(1);
    trace!(
        target = "furniflip.metrics",
        route = route,
        "requests_total_inc"
    );
}

pub fn stage_elapsed(stage: &'static str, elapsed_ms: u128) {
    histogram!("furniflip_stage_duration_ms", "stage" => stage).record(elapsed_ms as f64);
    trace!(
        target = "furniflip.metrics",
        stage = stage,
        elapsed_ms = elapsed_ms as u64,
        "stage_elapsed"
    );
}

pub fn image_failed(stage: &'static str) {
    counter!("furniflip_images_failed_total", "stage" => stage).increment(1);
    trace!(
        target = "furniflip.metrics",
        stage = stage,
        "image_failed_total_inc"
    );
}

pub fn extraction_partial(missing: usize) {
    counter!("furniflip_extractions_partial_total").increment(1);
    trace!(
        target = "furniflip.metrics",
        missing = missing as u64,
        "extraction_partial_total_inc"
    );
}

pub fn document_dropped(reason: &'static str) {
    counter!("furniflip_documents_dropped_total", "reason" => reason).increment(1);
    trace!(
        target = "furniflip.metrics",
        reason = reason,
        "document_dropped_total_inc"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusBuilder;

    #[test]
    fn helpers_show_up_in_prometheus_output() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        ::metrics::with_local_recorder(&recorder, || {
            image_failed("scrape");
            image_failed("scrape");
            document_dropped("timeout");
            stage_elapsed("extract", 120);
        });

        let rendered = handle.render();
        assert!(rendered.contains(r#"furniflip_images_failed_total{stage="scrape"} 2"#));
        assert!(rendered.contains(r#"furniflip_documents_dropped_total{reason="timeout"} 1"#));
        assert!(rendered.contains("furniflip_stage_duration_ms"));
    }
}
