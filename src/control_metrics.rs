//! Prometheus metrics for control channel commands

use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};
use std::sync::Arc;
use std::time::Duration;

/// Metrics for control commands
#[derive(Clone)]
pub struct ControlMetrics {
    registry: Registry,

    /// Total number of control commands received, by type
    pub commands_total: Arc<CounterVec>,

    /// Total number of control commands by type and result
    pub commands_by_result: Arc<CounterVec>,

    /// Total number of generations removed by clear commands
    pub generations_cleared_total: Arc<CounterVec>,

    /// Duration of control commands
    pub command_duration_seconds: Arc<HistogramVec>,
}

impl ControlMetrics {
    /// Create metrics in a private registry
    pub fn new() -> Result<Self, prometheus::Error> {
        Self::with_registry(&Registry::new())
    }

    /// Create metrics with custom registry
    pub fn with_registry(registry: &Registry) -> Result<Self, prometheus::Error> {
        let commands_total = CounterVec::new(
            Opts::new(
                "offline_cache_control_commands_total",
                "Total number of control commands received",
            ),
            &["command"], // command: skip_waiting, clear_image_cache, clear_all_caches, invalid
        )?;
        registry.register(Box::new(commands_total.clone()))?;

        let commands_by_result = CounterVec::new(
            Opts::new(
                "offline_cache_control_commands_by_result",
                "Total number of control commands by result",
            ),
            &["command", "result"],
        )?;
        registry.register(Box::new(commands_by_result.clone()))?;

        let generations_cleared_total = CounterVec::new(
            Opts::new(
                "offline_cache_control_generations_cleared_total",
                "Total number of cache generations removed by control commands",
            ),
            &["command"],
        )?;
        registry.register(Box::new(generations_cleared_total.clone()))?;

        let command_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "offline_cache_control_command_duration_seconds",
                "Duration of control commands in seconds",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
            &["command"],
        )?;
        registry.register(Box::new(command_duration_seconds.clone()))?;

        Ok(Self {
            registry: registry.clone(),
            commands_total: Arc::new(commands_total),
            commands_by_result: Arc::new(commands_by_result),
            generations_cleared_total: Arc::new(generations_cleared_total),
            command_duration_seconds: Arc::new(command_duration_seconds),
        })
    }

    pub fn record_command(&self, command: &str) {
        self.commands_total.with_label_values(&[command]).inc();
    }

    pub fn record_result(&self, command: &str, success: bool) {
        let result = if success { "success" } else { "failure" };
        self.commands_by_result
            .with_label_values(&[command, result])
            .inc();
    }

    pub fn record_cleared(&self, command: &str, count: usize) {
        self.generations_cleared_total
            .with_label_values(&[command])
            .inc_by(count as f64);
    }

    pub fn record_duration(&self, command: &str, duration: Duration) {
        self.command_duration_seconds
            .with_label_values(&[command])
            .observe(duration.as_secs_f64());
    }

    /// Render the registry in Prometheus text format
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
