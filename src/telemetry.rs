use prometheus::{
    exponential_buckets, linear_buckets, Encoder, Histogram, HistogramOpts, IntCounter,
    IntCounterVec, Opts, Registry, TextEncoder,
};

pub struct Metrics {
    upload_counter: IntCounterVec,
    inference_duration: Histogram,
    detections_counter: IntCounter,
    pub registry: Registry,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("yolo_upload".to_string()), None)?;

        let upload_counter = IntCounterVec::new(
            Opts::new("uploads_total", "Total number of processed uploads by outcome"),
            &["outcome"],
        )?;

        let inference_duration = Histogram::with_opts(
            HistogramOpts::new(
                "inference_duration_ms",
                "Duration of model inference in milliseconds",
            )
            .buckets(inference_buckets()?),
        )?;

        let detections_counter =
            IntCounter::new("detections_total", "Total number of detected objects")?;

        registry.register(Box::new(upload_counter.clone()))?;
        registry.register(Box::new(inference_duration.clone()))?;
        registry.register(Box::new(detections_counter.clone()))?;

        Ok(Metrics {
            upload_counter,
            inference_duration,
            detections_counter,
            registry,
        })
    }

    pub fn record_upload(&self, outcome: &str) {
        self.upload_counter.with_label_values(&[outcome]).inc();
    }

    pub fn record_inference(&self, duration_ms: u64, detections: usize) {
        self.inference_duration.observe(duration_ms as f64);
        self.detections_counter.inc_by(detections as u64);
    }

    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&metric_families, &mut buffer)?;

        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Histogram buckets in milliseconds: fine steps for fast CPU inference,
/// then doubling up to two seconds.
fn inference_buckets() -> Result<Vec<f64>, prometheus::Error> {
    let mut buckets = linear_buckets(5., 5., 10)?;
    buckets.extend(linear_buckets(75., 25., 7)?);
    buckets.extend(exponential_buckets(250., 2., 4)?);
    Ok(buckets)
}
