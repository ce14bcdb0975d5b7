//! Prometheus metrics exposition
//!
//! The router records its counters through the `metrics` facade:
//!
//! - `quota_router_attempts_total` (counter): labels `model`, `outcome`
//! - `quota_router_exhausted_marks_total` (counter): label `reason`
//! - `quota_router_all_exhausted_total` (counter)
//!
//! The CLI is short-lived, so instead of serving `/metrics` it renders the
//! text exposition to stderr when `--metrics` is passed.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and return a handle for rendering metrics.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

#[cfg(test)]
mod tests {
    use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};

    fn isolated_recorder() -> (PrometheusRecorder, PrometheusHandle) {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        (recorder, handle)
    }

    #[test]
    fn router_counters_render_in_exposition() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        quota_router::metrics::record_attempt("gemini-2.0-flash", "success");
        quota_router::metrics::record_exhausted_mark("daily_exhausted");
        quota_router::metrics::record_all_exhausted();

        let output = handle.render();
        assert!(output.contains("quota_router_attempts_total"), "got: {output}");
        assert!(output.contains("model=\"gemini-2.0-flash\""));
        assert!(output.contains("reason=\"daily_exhausted\""));
        assert!(output.contains("quota_router_all_exhausted_total"));
    }
}
