//! Progress estimation
//!
//! Each running step may carry an estimator that turns the tool's live log
//! (or just the elapsed time) into a completion fraction. Estimation is best
//! effort: an estimator never fails, it reports 0.0 when it knows nothing.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Strategy for deriving a completion fraction in `[0, 1]`
pub trait ProgressEstimator: Send + Sync {
    fn estimate(&self, log_path: &Path, elapsed: Duration) -> f64;
}

/// Solver progress from the last `Time = <t>` line against the end time
///
/// The log is read incrementally: each call only consumes the bytes appended
/// since the previous one.
#[derive(Debug)]
pub struct SolverTimeEstimator {
    end_time: f64,
    state: Mutex<LogCursor>,
}

#[derive(Debug, Default)]
struct LogCursor {
    offset: u64,
    partial: String,
    last_time: Option<f64>,
}

impl SolverTimeEstimator {
    pub fn new(end_time: f64) -> Self {
        Self {
            end_time,
            state: Mutex::new(LogCursor::default()),
        }
    }

    fn fraction(&self, time: Option<f64>) -> f64 {
        match time {
            Some(t) if self.end_time > 0.0 => (t / self.end_time).clamp(0.0, 1.0),
            _ => 0.0,
        }
    }
}

impl ProgressEstimator for SolverTimeEstimator {
    fn estimate(&self, log_path: &Path, _elapsed: Duration) -> f64 {
        let mut cursor = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        match cursor.advance(log_path) {
            Ok(()) => self.fraction(cursor.last_time),
            Err(_) => 0.0,
        }
    }
}

impl LogCursor {
    fn advance(&mut self, log_path: &Path) -> std::io::Result<()> {
        let mut file = File::open(log_path)?;
        let len = file.metadata()?.len();

        if len < self.offset {
            // Log was replaced; start over
            *self = Self::default();
        }
        if len == self.offset {
            return Ok(());
        }

        file.seek(SeekFrom::Start(self.offset))?;
        let mut buf = Vec::with_capacity((len - self.offset) as usize);
        let read = file.read_to_end(&mut buf)?;
        self.offset += read as u64;
        self.partial.push_str(&String::from_utf8_lossy(&buf));

        // Only complete lines are parsed; the tail waits for its newline.
        let Some(end) = self.partial.rfind('\n') else {
            return Ok(());
        };
        let rest = self.partial.split_off(end + 1);
        for line in self.partial.lines() {
            if let Some(time) = parse_time_marker(line) {
                self.last_time = Some(time);
            }
        }
        self.partial = rest;

        Ok(())
    }
}

/// Parses `Time = 42` or `Time = 42s`, ignoring `ExecutionTime = ...`
fn parse_time_marker(line: &str) -> Option<f64> {
    let value = line.trim_start().strip_prefix("Time =")?;
    value
        .trim()
        .trim_end_matches('s')
        .parse::<f64>()
        .ok()
        .filter(|t| t.is_finite())
}

/// Heuristic progress from elapsed wall-clock time against a budget
///
/// The meshing tools do not print a normalised progress marker, so this only
/// says how much of the expected run time has passed. It is not accurate
/// within a phase and saturates at 1.0 if the tool runs long.
#[derive(Debug, Clone, Copy)]
pub struct WallClockEstimator {
    budget: Duration,
}

impl WallClockEstimator {
    pub fn new(budget: Duration) -> Self {
        Self { budget }
    }
}

impl ProgressEstimator for WallClockEstimator {
    fn estimate(&self, _log_path: &Path, elapsed: Duration) -> f64 {
        if self.budget.is_zero() {
            return 0.0;
        }
        (elapsed.as_secs_f64() / self.budget.as_secs_f64()).clamp(0.0, 1.0)
    }
}

/// Slice of the 0-100 progress scale a step occupies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressBand {
    pub start: u8,
    pub end: u8,
}

impl ProgressBand {
    pub const fn new(start: u8, end: u8) -> Self {
        Self { start, end }
    }

    /// Step reporting a single fixed value
    pub const fn fixed(value: u8) -> Self {
        Self::new(value, value)
    }

    /// Progress value for a step that is `fraction` done
    pub fn at(&self, fraction: f64) -> u8 {
        let fraction = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let span = f64::from(self.end.saturating_sub(self.start));
        self.start + (span * fraction).floor() as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn append(path: &Path, text: &str) {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        file.write_all(text.as_bytes()).unwrap();
    }

    #[test]
    fn test_time_marker_parsing() {
        assert_eq!(parse_time_marker("Time = 125"), Some(125.0));
        assert_eq!(parse_time_marker("Time = 0.5s"), Some(0.5));
        assert_eq!(parse_time_marker("  Time = 3"), Some(3.0));
        assert_eq!(parse_time_marker("ExecutionTime = 1.2 s  ClockTime = 2 s"), None);
        assert_eq!(parse_time_marker("deltaT = 1"), None);
        assert_eq!(parse_time_marker("Time = abc"), None);
    }

    #[test]
    fn test_solver_estimate_follows_latest_marker() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("log.simpleFoam");
        let estimator = SolverTimeEstimator::new(200.0);

        append(&log, "Starting time loop\n\nTime = 1\n\nsmoothSolver: ...\n");
        assert_eq!(estimator.estimate(&log, Duration::ZERO), 0.005);

        append(&log, "ExecutionTime = 9 s\n\nTime = 100\n");
        assert_eq!(estimator.estimate(&log, Duration::ZERO), 0.5);

        // Nothing new: value holds
        assert_eq!(estimator.estimate(&log, Duration::ZERO), 0.5);
    }

    #[test]
    fn test_solver_estimate_waits_for_complete_line() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("log.simpleFoam");
        let estimator = SolverTimeEstimator::new(100.0);

        append(&log, "Time = 5");
        assert_eq!(estimator.estimate(&log, Duration::ZERO), 0.0);

        append(&log, "0\n");
        assert_eq!(estimator.estimate(&log, Duration::ZERO), 0.5);
    }

    #[test]
    fn test_solver_estimate_is_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("log.simpleFoam");
        append(&log, "Time = 1500\n");

        let estimator = SolverTimeEstimator::new(1000.0);
        assert_eq!(estimator.estimate(&log, Duration::ZERO), 1.0);
    }

    #[test]
    fn test_unreadable_or_empty_log_is_zero() {
        let dir = tempfile::tempdir().unwrap();
        let estimator = SolverTimeEstimator::new(1000.0);

        assert_eq!(
            estimator.estimate(&dir.path().join("missing"), Duration::ZERO),
            0.0
        );

        let log = dir.path().join("log.simpleFoam");
        append(&log, "Create mesh for time = 0\n");
        assert_eq!(estimator.estimate(&log, Duration::ZERO), 0.0);
    }

    #[test]
    fn test_wall_clock_estimate() {
        let estimator = WallClockEstimator::new(Duration::from_secs(100));
        let log = Path::new("/nonexistent");

        assert_eq!(estimator.estimate(log, Duration::from_secs(25)), 0.25);
        assert_eq!(estimator.estimate(log, Duration::from_secs(500)), 1.0);
    }

    #[test]
    fn test_progress_band() {
        let band = ProgressBand::new(50, 90);
        assert_eq!(band.at(0.0), 50);
        assert_eq!(band.at(0.5), 70);
        assert_eq!(band.at(1.0), 90);
        assert_eq!(band.at(7.0), 90);
        assert_eq!(band.at(f64::NAN), 50);
        assert_eq!(ProgressBand::fixed(45).at(0.9), 45);
    }
}
