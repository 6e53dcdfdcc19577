//! Prometheus metrics setup and metric definitions

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and return a handle for rendering metrics.
pub fn install_prometheus_recorder() -> anyhow::Result<PrometheusHandle> {
    // Directory round trips are usually a few milliseconds; nested expansion
    // against a slow server can take seconds.
    let buckets = vec![
        0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
    ];

    let handle = PrometheusBuilder::new()
        .set_buckets(&buckets)?
        .install_recorder()?;
    Ok(handle)
}

/// Register metric descriptions and emit initial zero values so Prometheus output
/// includes HELP/TYPE lines for all metrics from startup (not just after first use).
pub fn describe_metrics() {
    describe_counter!(
        "ldap_authz_resolutions_total",
        "Total number of role resolutions by result"
    );
    describe_histogram!(
        "ldap_authz_resolution_duration_seconds",
        "Role resolution duration in seconds"
    );
    describe_counter!(
        "ldap_authz_directory_operations_total",
        "Total number of directory lookups and searches"
    );
    describe_counter!(
        "ldap_authz_nested_roles_total",
        "Total number of roles discovered through nested expansion"
    );
    describe_gauge!(
        "ldap_authz_pool_connections_idle",
        "Number of idle pooled directory connections"
    );

    counter!("ldap_authz_resolutions_total", "result" => "success").absolute(0);
    histogram!("ldap_authz_resolution_duration_seconds").record(0.0);
    counter!("ldap_authz_directory_operations_total", "operation" => "search", "result" => "ok")
        .absolute(0);
    counter!("ldap_authz_nested_roles_total").absolute(0);
    gauge!("ldap_authz_pool_connections_idle").set(0.0);
}
