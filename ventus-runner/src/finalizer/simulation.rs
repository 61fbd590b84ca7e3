//! Simulation job finalization

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use ventus_core::domain::summary::ForceCoefficients;

use crate::config::Tool;
use crate::finalizer::fields::field_statistics;
use crate::finalizer::{
    FinalizationError, FinalizeContext, JobSummary, ResultFinalizer, copy_file, latest_time_dir,
};
use crate::supervisor::ExternalCommand;
use crate::workspace::copy_dir_all;
use crate::workspace::simulation::SAMPLE_FUNCTION;

/// Field files published from the final time step when present
const RESULT_FIELDS: [&str; 6] = ["U", "p", "k", "epsilon", "omega", "nut"];

/// Samples the final solution and publishes fields and force coefficients
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulationFinalizer;

#[async_trait]
impl ResultFinalizer for SimulationFinalizer {
    async fn finalize(&self, ctx: &FinalizeContext<'_>) -> Result<JobSummary, FinalizationError> {
        let sample = ExternalCommand::new(ctx.tools.program(Tool::PostProcess)).args([
            "-func",
            SAMPLE_FUNCTION,
            "-latestTime",
        ]);
        match ctx.run_tool(&sample, "postProcess").await {
            Ok(outcome) if outcome.success() => {}
            Ok(outcome) => warn!("postProcess sampling ended with {:?}, continuing", outcome),
            Err(FinalizationError::Execution(e)) => warn!("postProcess sampling skipped: {}", e),
            Err(e) => return Err(e),
        }

        let root = ctx.workspace.root();
        let result = ctx.workspace.result_dir();

        let (time, time_dir) = latest_time_dir(root).ok_or(FinalizationError::NoOutput)?;
        let copied = copy_fields(&time_dir, &result.join(&time))?;
        if copied == 0 {
            return Err(FinalizationError::NoOutput);
        }
        info!("Published {} fields from time {}", copied, time);

        let force_coefficients = match force_coeffs_file(root) {
            Some(path) => {
                copy_file(&path, &result.join("forceCoeffs.dat"))?;
                let parsed = std::fs::read_to_string(&path)
                    .ok()
                    .and_then(|text| parse_force_coeffs(&text));
                if parsed.is_none() {
                    warn!("Could not parse {}", path.display());
                }
                parsed
            }
            None => None,
        };

        let sets = root.join("postProcessing").join(SAMPLE_FUNCTION);
        if sets.is_dir() {
            copy_dir_all(&sets, &result.join("sets"))
                .map_err(FinalizationError::io("Failed to publish sampled sets"))?;
        }

        let fields = {
            let (time, time_dir) = (time.clone(), time_dir.clone());
            match tokio::task::spawn_blocking(move || field_statistics(&time, &time_dir)).await {
                Ok(stats) => stats,
                Err(e) => {
                    warn!("Field statistics task failed: {}", e);
                    None
                }
            }
        };
        if fields.is_none() {
            warn!("No field statistics for time {}", time);
        }

        Ok(JobSummary {
            force_coefficients,
            field_statistics: fields,
            ..JobSummary::default()
        })
    }
}

fn copy_fields(time_dir: &Path, target: &Path) -> Result<usize, FinalizationError> {
    let mut copied = 0;
    for field in RESULT_FIELDS {
        let source = time_dir.join(field);
        if source.is_file() {
            copy_file(&source, &target.join(field))?;
            copied += 1;
        } else {
            debug!("No {} in {}", field, time_dir.display());
        }
    }
    Ok(copied)
}

/// Force coefficient history written by the solver's function object
///
/// Older releases name it `forceCoeffs.dat`, newer ones `coefficient.dat`.
fn force_coeffs_file(root: &Path) -> Option<PathBuf> {
    let dir = root.join("postProcessing").join("forceCoeffs").join("0");
    ["forceCoeffs.dat", "coefficient.dat"]
        .into_iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
}

/// Final row of a force coefficient table
///
/// Column positions come from the last `# Time ...` header line; without one
/// the classic `Time Cm Cd Cl` order is assumed.
pub fn parse_force_coeffs(text: &str) -> Option<ForceCoefficients> {
    let mut columns: Vec<String> = ["Time", "Cm", "Cd", "Cl"].map(String::from).to_vec();
    let mut samples = 0;
    let mut last: Option<Vec<f64>> = None;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(comment) = line.strip_prefix('#') {
            let names: Vec<String> = comment.split_whitespace().map(String::from).collect();
            if names.first().map(String::as_str) == Some("Time") {
                columns = names;
            }
            continue;
        }

        let values: Result<Vec<f64>, _> = line.split_whitespace().map(str::parse).collect();
        if let Ok(values) = values {
            samples += 1;
            last = Some(values);
        }
    }

    let last = last?;
    let column = |names: &[&str]| {
        names
            .iter()
            .find_map(|name| columns.iter().position(|c| c == name))
            .and_then(|i| last.get(i).copied())
    };

    Some(ForceCoefficients {
        samples,
        final_time: column(&["Time"])?,
        cd: column(&["Cd"])?,
        cl: column(&["Cl"])?,
        cm: column(&["Cm", "CmPitch"])?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classic_force_coeffs() {
        let text = "\
# Force coefficients
# dragDir     : (1 0 0)
# Time          Cm              Cd              Cl              Cl(f)           Cl(r)
10\t0.01\t1.20\t0.30\t0.16\t0.14
20\t0.02\t1.10\t0.25\t0.13\t0.12
";
        let coeffs = parse_force_coeffs(text).unwrap();
        assert_eq!(coeffs.samples, 2);
        assert_eq!(coeffs.final_time, 20.0);
        assert_eq!(coeffs.cm, 0.02);
        assert_eq!(coeffs.cd, 1.10);
        assert_eq!(coeffs.cl, 0.25);
    }

    #[test]
    fn test_newer_column_layout() {
        let text = "\
# Force and moment coefficients
# Time\tCd\tCd(f)\tCd(r)\tCl\tCl(f)\tCl(r)\tCmPitch\tCmRoll\tCmYaw\tCs\tCs(f)\tCs(r)
100\t0.9\t0.45\t0.45\t0.2\t0.1\t0.1\t-0.05\t0\t0\t0\t0\t0
";
        let coeffs = parse_force_coeffs(text).unwrap();
        assert_eq!(coeffs.samples, 1);
        assert_eq!(coeffs.cd, 0.9);
        assert_eq!(coeffs.cl, 0.2);
        assert_eq!(coeffs.cm, -0.05);
    }

    #[test]
    fn test_headerless_defaults_and_empty() {
        let coeffs = parse_force_coeffs("5 0.1 0.2 0.3\n").unwrap();
        assert_eq!(coeffs.cm, 0.1);
        assert_eq!(coeffs.cd, 0.2);
        assert_eq!(coeffs.cl, 0.3);

        assert!(parse_force_coeffs("# Time Cm Cd Cl\n").is_none());
    }

    #[test]
    fn test_copy_fields_counts_present_files() {
        let dir = tempfile::tempdir().unwrap();
        let time_dir = dir.path().join("1000");
        std::fs::create_dir(&time_dir).unwrap();
        std::fs::write(time_dir.join("U"), "u").unwrap();
        std::fs::write(time_dir.join("p"), "p").unwrap();

        let target = dir.path().join("result/1000");
        assert_eq!(copy_fields(&time_dir, &target).unwrap(), 2);
        assert!(target.join("U").is_file());
        assert!(!target.join("k").exists());
    }
}
