//! Prometheus metrics for the agent loop, the guardrail and the shell
//!
//! Everything registers into the default registry on first use.
//! `render()` returns the text exposition format.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram, register_histogram_vec, register_int_counter,
    CounterVec, Encoder, Histogram, HistogramVec, IntCounter, TextEncoder,
};

lazy_static! {
    // ─────────────────────────────────────────────────────────────────────────────
    // Agent Loop Metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Finished agent turns by outcome.
    ///
    /// Labels:
    /// - outcome: "answered", "unknown_action", "step_limit", "time_budget", "transport_error"
    pub static ref AGENT_TURNS: CounterVec = register_counter_vec!(
        "clawmini_agent_turns_total",
        "Agent turns by outcome",
        &["outcome"]
    ).expect("failed to register AGENT_TURNS metric");

    /// Model calls needed per turn.
    pub static ref AGENT_STEPS: Histogram = register_histogram!(
        "clawmini_agent_steps",
        "Model calls made per agent turn",
        vec![1.0, 2.0, 3.0, 5.0, 8.0, 13.0, 25.0, 50.0]
    ).expect("failed to register AGENT_STEPS metric");

    /// Latency of a single model call.
    ///
    /// Labels:
    /// - model: model identifier, or "default" when the transport picks one
    pub static ref LLM_CALL_DURATION: HistogramVec = register_histogram_vec!(
        "clawmini_llm_call_duration_seconds",
        "Latency of model transport calls",
        &["model"],
        vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
    ).expect("failed to register LLM_CALL_DURATION metric");

    // ─────────────────────────────────────────────────────────────────────────────
    // Tool Metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Executed tool calls by result status.
    ///
    /// Labels:
    /// - status: "succeeded", "blocked", "unknown_action", "failed"
    pub static ref TOOL_CALLS: CounterVec = register_counter_vec!(
        "clawmini_tool_calls_total",
        "Tool calls by result status",
        &["status"]
    ).expect("failed to register TOOL_CALLS metric");

    /// Commands refused by the guardrail.
    ///
    /// Labels:
    /// - executable: first token of the refused command ("<unparsed>" on tokenizer errors)
    pub static ref GUARDRAIL_DENIALS: CounterVec = register_counter_vec!(
        "clawmini_guardrail_denials_total",
        "Commands denied by the guardrail",
        &["executable"]
    ).expect("failed to register GUARDRAIL_DENIALS metric");

    // ─────────────────────────────────────────────────────────────────────────────
    // Shell Metrics
    // ─────────────────────────────────────────────────────────────────────────────

    pub static ref SHELL_COMMAND_DURATION: Histogram = register_histogram!(
        "clawmini_shell_command_duration_seconds",
        "Wall time of commands run in the persistent shell",
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0]
    ).expect("failed to register SHELL_COMMAND_DURATION metric");

    pub static ref SHELL_TIMEOUTS: IntCounter = register_int_counter!(
        "clawmini_shell_timeouts_total",
        "Commands killed because they exceeded their timeout"
    ).expect("failed to register SHELL_TIMEOUTS metric");

    pub static ref SHELL_RESPAWNS: IntCounter = register_int_counter!(
        "clawmini_shell_respawns_total",
        "Persistent shells recreated after the previous one died"
    ).expect("failed to register SHELL_RESPAWNS metric");
}

/// Render every registered metric in the Prometheus text format.
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&families, &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_touched_metrics() {
        TOOL_CALLS.with_label_values(&["succeeded"]).inc();
        SHELL_TIMEOUTS.inc();

        let text = render();
        assert!(text.contains("clawmini_tool_calls_total"));
        assert!(text.contains("clawmini_shell_timeouts_total"));
    }
}
