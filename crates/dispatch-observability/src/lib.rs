use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;

/// Counter names emitted by the dispatch engine.
pub mod names {
    pub const ASSIGNMENTS_COMMITTED: &str = "dispatch_assignments_committed_total";
    pub const ASSIGNMENTS_REJECTED: &str = "dispatch_assignments_rejected_total";
    pub const INCIDENTS_RESOLVED: &str = "dispatch_incidents_resolved_total";
    pub const MUTUAL_AID_REQUESTS: &str = "dispatch_mutual_aid_requests_total";
    pub const POSITION_SAMPLES_REJECTED: &str = "dispatch_position_samples_rejected_total";
    pub const REPLAY_TICKS: &str = "dispatch_replay_ticks_total";
}

#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub service_name: String,
    pub environment: String,
    pub log_level: String,
    pub metrics_addr: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ObservabilityHandle {
    pub service_name: String,
    pub metrics_enabled: bool,
}

pub fn init(config: &ObservabilityConfig) -> ObservabilityHandle {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);

    let metrics_enabled = init_metrics(config);
    if metrics_enabled {
        describe_metrics();
    }

    ObservabilityHandle {
        service_name: config.service_name.clone(),
        metrics_enabled,
    }
}

pub fn log_startup(handle: &ObservabilityHandle, environment: &str) {
    tracing::info!(
        service = %handle.service_name,
        environment = %environment,
        metrics_enabled = handle.metrics_enabled,
        "dispatch service starting"
    );
}

fn describe_metrics() {
    metrics::describe_counter!(
        names::ASSIGNMENTS_COMMITTED,
        "Units committed to an incident"
    );
    metrics::describe_counter!(
        names::ASSIGNMENTS_REJECTED,
        "Assignment commits refused, labelled by reason"
    );
    metrics::describe_counter!(names::INCIDENTS_RESOLVED, "Incidents resolved");
    metrics::describe_counter!(
        names::MUTUAL_AID_REQUESTS,
        "Mutual-aid requests issued to neighbouring agencies"
    );
    metrics::describe_counter!(
        names::POSITION_SAMPLES_REJECTED,
        "Live position samples dropped for arriving out of order"
    );
    metrics::describe_counter!(names::REPLAY_TICKS, "Replay playback ticks rendered");
}

fn init_metrics(config: &ObservabilityConfig) -> bool {
    let Some(addr) = config.metrics_addr.as_ref() else {
        return false;
    };
    let addr: SocketAddr = match addr.parse() {
        Ok(parsed) => parsed,
        Err(err) => {
            tracing::warn!(
                service = %config.service_name,
                error = %err,
                "Invalid DISPATCH_METRICS_ADDR value"
            );
            return false;
        }
    };

    let builder = PrometheusBuilder::new()
        .with_http_listener(addr)
        .add_global_label("service", config.service_name.clone())
        .add_global_label("environment", config.environment.clone());

    match builder.install() {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!(
                service = %config.service_name,
                error = %err,
                "Failed to initialize Prometheus exporter"
            );
            false
        }
    }
}
