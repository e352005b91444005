//! Metrics definitions. Every usecase metric carries a `usecase` label.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Histogram,
}

#[derive(Debug, Clone, Copy)]
pub struct MetricDef {
    pub name: &'static str,
    pub metric_type: MetricType,
    pub description: &'static str,
}

pub const USECASE_DURATION: MetricDef = MetricDef {
    name: "usecase.duration",
    metric_type: MetricType::Histogram,
    description: "Time from start to settlement of a usecase in seconds",
};

pub const USECASE_SUCCESS: MetricDef = MetricDef {
    name: "usecase.success",
    metric_type: MetricType::Counter,
    description: "Number of usecases that completed successfully",
};

pub const USECASE_FAILURE: MetricDef = MetricDef {
    name: "usecase.failure",
    metric_type: MetricType::Counter,
    description: "Number of usecases that failed",
};

pub const ALL_METRICS: &[MetricDef] = &[USECASE_DURATION, USECASE_SUCCESS, USECASE_FAILURE];

/// Register descriptions of all metrics with the installed recorder.
pub fn describe_metrics() {
    for def in ALL_METRICS {
        match def.metric_type {
            MetricType::Counter => metrics::describe_counter!(def.name, def.description),
            MetricType::Histogram => metrics::describe_histogram!(def.name, def.description),
        }
    }
}
