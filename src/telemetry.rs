use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// Initialize structured logging for the orchestrator process.
///
/// JSON output with span context so an external log pipeline can correlate
/// per-agent operations. Level defaults to INFO and is overridable through
/// `RUST_LOG`.
pub fn init_telemetry() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(true),
        )
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("soda-fountain telemetry initialized");
    Ok(())
}

/// Generate a correlation ID for linking related operations across agents.
pub fn generate_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Create a span with the common agent coordination attributes.
pub fn create_agent_span(
    operation: &str,
    agent_id: Option<u32>,
    issue_number: Option<u64>,
    correlation_id: Option<&str>,
) -> tracing::Span {
    tracing::info_span!(
        "agent_coordination",
        operation = operation,
        agent.id = agent_id,
        issue.number = issue_number,
        correlation.id = correlation_id,
    )
}
