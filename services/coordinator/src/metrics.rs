use prometheus::{exponential_buckets, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};

/// Request outcome counters scraped through the core `/metrics` endpoint.
#[derive(Clone)]
pub struct CoordinatorMetrics {
    pub dispense_total: IntCounterVec,
    pub uploads_total: IntCounterVec,
    pub upload_bytes: Histogram,
    pub list_models_total: IntCounter,
}

impl CoordinatorMetrics {
    pub fn register(registry: &Registry) -> prometheus::Result<Self> {
        let dispense_total = IntCounterVec::new(
            Opts::new("trainhub_dispense_total", "Dataset dispense requests by outcome"),
            &["outcome"],
        )?;
        let uploads_total = IntCounterVec::new(
            Opts::new("trainhub_uploads_total", "Model upload requests by outcome"),
            &["outcome"],
        )?;
        let upload_bytes = Histogram::with_opts(
            HistogramOpts::new("trainhub_upload_bytes", "Size of stored model artifacts in bytes")
                .buckets(exponential_buckets(1024.0, 4.0, 12)?),
        )?;
        let list_models_total = IntCounter::new("trainhub_list_models_total", "Artifact listing requests")?;

        registry.register(Box::new(dispense_total.clone()))?;
        registry.register(Box::new(uploads_total.clone()))?;
        registry.register(Box::new(upload_bytes.clone()))?;
        registry.register(Box::new(list_models_total.clone()))?;
        Ok(Self { dispense_total, uploads_total, upload_bytes, list_models_total })
    }

    /// Metrics on a private registry, for tests and embedded routers.
    pub fn unregistered() -> prometheus::Result<Self> {
        Self::register(&Registry::new())
    }
}
