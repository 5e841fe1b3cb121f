//! Console and JSON-lines rendering for the `ndt7` binary

use crate::error::SpeedTestError;
use crate::models::{MeasurementProgress, SpeedTestMeasurement, TestDirection, TestServer};
use colored::Colorize;
use serde_json::json;
use std::sync::Mutex;

/// Final outcome of one direction
#[derive(Debug, Clone)]
pub struct DirectionResult {
    pub direction: TestDirection,
    pub progress: MeasurementProgress,
    pub error: Option<SpeedTestError>,
}

/// Renders session events; shared across callback closures
pub struct ConsolePrinter {
    json: bool,
    use_color: bool,
    verbose: bool,
    results: Mutex<Vec<DirectionResult>>,
}

impl ConsolePrinter {
    pub fn new(json: bool, use_color: bool, verbose: bool) -> Self {
        Self {
            json,
            use_color,
            verbose,
            results: Mutex::new(Vec::new()),
        }
    }

    pub fn progress(&self, progress: &MeasurementProgress) {
        println!("{}", self.render_progress(progress));
    }

    /// Server-side measurements are only shown in JSON and verbose modes
    pub fn measurement(&self, direction: TestDirection, measurement: &SpeedTestMeasurement) {
        if let Some(line) = self.render_measurement(direction, measurement) {
            println!("{}", line);
        }
    }

    pub fn finish(&self, progress: MeasurementProgress, error: Option<SpeedTestError>) {
        let result = DirectionResult {
            direction: progress.test,
            progress,
            error,
        };
        println!("{}", self.render_result(&result));
        self.lock_results().push(result);
    }

    pub fn results(&self) -> Vec<DirectionResult> {
        self.lock_results().clone()
    }

    pub fn summary(&self, server: &TestServer) -> String {
        let results = self.results();
        if self.json {
            let directions: Vec<_> = results
                .iter()
                .map(|r| {
                    json!({
                        "direction": r.direction,
                        "mbps": r.progress.mbps(),
                        "num_bytes": r.progress.num_bytes(),
                        "elapsed_micros": r.progress.elapsed_micros(),
                        "error": r.error.as_ref().map(|e| e.to_string()),
                    })
                })
                .collect();
            return json!({
                "type": "summary",
                "server": server.machine,
                "location": server.location_label(),
                "results": directions,
            })
            .to_string();
        }

        let mut lines = vec![format!("Server: {} ({})", server.machine, server.location_label())];
        for result in &results {
            let label = format!("{:>8}", result.direction.as_str());
            let value = match &result.error {
                None => format!("{:.2} Mbit/s", result.progress.mbps()),
                Some(error) => format!("failed ({})", error),
            };
            let value = if !self.use_color {
                value
            } else if result.error.is_none() {
                value.green().bold().to_string()
            } else {
                value.red().to_string()
            };
            lines.push(format!("{}: {}", label, value));
        }
        lines.join("\n")
    }

    fn render_progress(&self, progress: &MeasurementProgress) -> String {
        if self.json {
            return json!({ "type": "progress", "data": progress }).to_string();
        }

        let label = format!("{:>8}", progress.test.as_str());
        let label = if self.use_color {
            match progress.test {
                TestDirection::Download => label.cyan().to_string(),
                TestDirection::Upload => label.magenta().to_string(),
            }
        } else {
            label
        };
        format!(
            "{}  {:>5.1}s  {:>9.2} Mbit/s",
            label,
            progress.elapsed_micros() as f64 / 1_000_000.0,
            progress.mbps()
        )
    }

    fn render_measurement(&self, direction: TestDirection, measurement: &SpeedTestMeasurement) -> Option<String> {
        if self.json {
            return Some(json!({ "type": "measurement", "direction": direction, "data": measurement }).to_string());
        }
        if !self.verbose {
            return None;
        }

        let app = measurement.app_info.as_ref()?;
        let mbps = if app.elapsed_time > 0 {
            (app.num_bytes as f64 * 8.0) / app.elapsed_time as f64
        } else {
            0.0
        };
        Some(format!(
            "{:>8}  server: {} bytes in {:.1}s ({:.2} Mbit/s)",
            direction.as_str(),
            app.num_bytes,
            app.elapsed_time as f64 / 1_000_000.0,
            mbps
        ))
    }

    fn render_result(&self, result: &DirectionResult) -> String {
        if self.json {
            return json!({
                "type": "result",
                "data": result.progress,
                "error": result.error.as_ref().map(|e| e.to_string()),
            })
            .to_string();
        }

        let megabytes = result.progress.num_bytes() as f64 / 1_000_000.0;
        let seconds = result.progress.elapsed_micros() as f64 / 1_000_000.0;
        match &result.error {
            None => {
                let line = format!(
                    "{:>8}  done: {:.2} Mbit/s ({:.1} MB in {:.1}s)",
                    result.direction.as_str(),
                    result.progress.mbps(),
                    megabytes,
                    seconds
                );
                if self.use_color {
                    line.green().to_string()
                } else {
                    line
                }
            }
            Some(error) => format!(
                "{:>8}  {} after {:.1} MB: {}",
                result.direction.as_str(),
                if self.use_color { "failed".red().bold().to_string() } else { "failed".to_string() },
                megabytes,
                error.format_for_console(self.use_color)
            ),
        }
    }

    fn lock_results(&self) -> std::sync::MutexGuard<'_, Vec<DirectionResult>> {
        self.results.lock().unwrap_or_else(|e| e.into_inner())
    }
}
