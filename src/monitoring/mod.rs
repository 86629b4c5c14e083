/*!
 * Monitoring
 * Structured tracing setup and timed spans for long-running workloads
 */

mod tracer;

pub use tracer::{init_tracing, span_scenario, ScenarioSpan};
