/*!
 * Tracing Setup
 * Subscriber initialization and timed spans using the tracing crate
 *
 * The primitives only emit events at cold points (starvation transitions,
 * pool sweeps, map promotion, contract violations). Binaries call
 * [`init_tracing`] once to route them somewhere.
 */

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info, span, warn, Level};
use tracing_subscriber::{
    fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

/// Initialize structured tracing
///
/// Environment variables:
/// - RUST_LOG: Set log level (default: info)
/// - SYNC_TRACE_JSON: Enable JSON output (default: false)
///
/// Does nothing if a global subscriber is already installed.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let use_json = std::env::var("SYNC_TRACE_JSON")
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = if use_json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_thread_names(true)
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_thread_names(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .compact(),
            )
            .try_init()
    };

    if installed.is_ok() {
        info!(json = use_json, "Structured tracing initialized");
    }
}

static NEXT_RUN_ID: AtomicU64 = AtomicU64::new(1);

/// Span covering one named workload, logging its duration when dropped
pub struct ScenarioSpan {
    span: tracing::Span,
    start: Instant,
    run_id: u64,
    slow_ms: u128,
}

impl ScenarioSpan {
    pub fn new(scenario: &str, slow_ms: u128) -> Self {
        let run_id = NEXT_RUN_ID.fetch_add(1, Ordering::Relaxed);

        let span = span!(
            Level::INFO,
            "scenario",
            run_id,
            scenario,
            duration_ms = tracing::field::Empty,
            operations = tracing::field::Empty,
            result = tracing::field::Empty,
        );

        let _entered = span.enter();
        debug!(scenario, run_id, "scenario started");
        drop(_entered);

        Self {
            span,
            start: Instant::now(),
            run_id,
            slow_ms,
        }
    }

    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    /// Record how many operations the scenario performed
    pub fn record_operations(&self, count: u64) {
        self.span.record("operations", count);
    }

    pub fn record_result(&self, success: bool) {
        self.span
            .record("result", if success { "success" } else { "failure" });
    }

    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

impl Drop for ScenarioSpan {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        let _entered = self.span.enter();
        self.span.record("duration_ms", duration.as_millis());

        if duration.as_millis() > self.slow_ms {
            warn!(
                run_id = self.run_id,
                duration_ms = duration.as_millis(),
                slow = true,
                "slow scenario"
            );
        } else {
            debug!(
                run_id = self.run_id,
                duration_ms = duration.as_millis(),
                "scenario completed"
            );
        }
    }
}

/// Helper to open a scenario span
#[inline]
pub fn span_scenario(name: &str, slow_ms: u128) -> ScenarioSpan {
    ScenarioSpan::new(name, slow_ms)
}
