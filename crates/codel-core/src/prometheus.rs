use crate::api::DrainStats;

/// Renderiza las stats de drenado en el formato de texto de Prometheus.
///
/// `queue` se vuelve un label `queue="..."` en cada muestra, así varias colas
/// pueden compartir un namespace.
pub fn render_stats(stats: &DrainStats, namespace: &str, queue: &str) -> String {
    let ns = if namespace.is_empty() {
        "codel"
    } else {
        namespace
    };
    let labels = format!("{{queue=\"{}\"}}", escape_label(queue));

    let mut out = String::new();
    let mut metric = |name: &str, kind: &str, help: &str, value: String| {
        out.push_str(&format!(
            "# HELP {ns}_{name} {help}\n# TYPE {ns}_{name} {kind}\n{ns}_{name}{labels} {value}\n"
        ));
    };

    metric(
        "passes_total",
        "counter",
        "Total drain passes",
        stats.passes.to_string(),
    );
    metric(
        "idle_passes_total",
        "counter",
        "Drain passes that found the queue empty",
        stats.idle_passes.to_string(),
    );
    metric(
        "congested_passes_total",
        "counter",
        "Drain passes that took the congested branch",
        stats.congested_passes.to_string(),
    );
    metric(
        "delivered_total",
        "counter",
        "Items consumed by the visitor",
        stats.delivered.to_string(),
    );
    metric(
        "requeued_total",
        "counter",
        "Items deferred by the visitor",
        stats.requeued.to_string(),
    );
    metric(
        "dropped_total",
        "counter",
        "Items dropped by congestion control",
        stats.dropped.to_string(),
    );
    metric(
        "queue_len",
        "gauge",
        "Items currently queued",
        stats.queue_len.to_string(),
    );
    metric(
        "consecutive_drops",
        "gauge",
        "Current run of back-to-back congested passes",
        stats.consecutive_drops.to_string(),
    );
    metric(
        "suggested_interval_seconds",
        "gauge",
        "Suggested wait before the next drain pass",
        stats.suggested_interval.as_secs_f64().to_string(),
    );

    out
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
