//! Metric recording helpers, grouped by pipeline stage. Names follow the
//! Prometheus convention `aqi_<stage>_<what>_<unit>`. No exporter is wired
//! here; recording is a no-op until a consumer installs one.

pub mod registry {
    pub fn load_success() {
        ::metrics::counter!("aqi_registry_loads_success_total").increment(1);
    }

    pub fn load_error() {
        ::metrics::counter!("aqi_registry_loads_error_total").increment(1);
    }
}

pub mod sources {
    pub fn request_success() {
        ::metrics::counter!("aqi_sources_requests_success_total").increment(1);
    }

    pub fn request_error() {
        ::metrics::counter!("aqi_sources_requests_error_total").increment(1);
    }

    pub fn payload_bytes(bytes: usize) {
        ::metrics::histogram!("aqi_sources_payload_bytes").record(bytes as f64);
    }
}

pub mod cache {
    pub fn hit() {
        ::metrics::counter!("aqi_cache_hits_total").increment(1);
    }

    pub fn miss() {
        ::metrics::counter!("aqi_cache_misses_total").increment(1);
    }

    pub fn write() {
        ::metrics::counter!("aqi_cache_writes_total").increment(1);
    }
}

pub mod normalize {
    pub fn records_produced(count: usize) {
        ::metrics::counter!("aqi_normalize_records_produced_total").increment(count as u64);
    }

    pub fn record_discarded(reason: &'static str) {
        ::metrics::counter!("aqi_normalize_records_discarded_total", "reason" => reason)
            .increment(1);
    }
}

pub mod validate {
    pub fn issue_detected(kind: &'static str, severity: &'static str) {
        ::metrics::counter!(
            "aqi_validate_issues_total",
            "kind" => kind,
            "severity" => severity
        )
        .increment(1);
    }

    pub fn batch_passed() {
        ::metrics::counter!("aqi_validate_batches_passed_total").increment(1);
    }

    pub fn batch_failed() {
        ::metrics::counter!("aqi_validate_batches_failed_total").increment(1);
    }
}
