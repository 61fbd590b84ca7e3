//! Mesh job finalization

use async_trait::async_trait;
use tracing::{info, warn};
use ventus_core::domain::summary::MeshStats;

use crate::config::Tool;
use crate::finalizer::{FinalizationError, FinalizeContext, JobSummary, ResultFinalizer};
use crate::supervisor::ExternalCommand;
use crate::workspace::publish_dir;

/// Checks the generated mesh and publishes `constant/polyMesh`
#[derive(Debug, Clone, Copy, Default)]
pub struct MeshFinalizer;

#[async_trait]
impl ResultFinalizer for MeshFinalizer {
    async fn finalize(&self, ctx: &FinalizeContext<'_>) -> Result<JobSummary, FinalizationError> {
        let poly_mesh = ctx.workspace.poly_mesh_dir();
        if !poly_mesh.is_dir() {
            return Err(FinalizationError::NoOutput);
        }

        let check = ExternalCommand::new(ctx.tools.program(Tool::CheckMesh));
        let outcome = ctx.run_tool(&check, "checkMesh").await?;
        if !outcome.success() {
            // checkMesh also exits non-zero for quality warnings; the counts
            // are still printed.
            warn!("checkMesh reported {:?}", outcome);
        }

        let log_path = ctx.workspace.log_path("checkMesh");
        let log = std::fs::read_to_string(&log_path).map_err(FinalizationError::io(format!(
            "Failed to read {}",
            log_path.display()
        )))?;
        let stats = parse_mesh_stats(&log).ok_or(FinalizationError::StatsUnavailable)?;

        // Simulations may read the result while this job is still running
        let target = ctx.workspace.result_dir().join("constant").join("polyMesh");
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .map_err(FinalizationError::io("Failed to publish polyMesh"))?;
        }
        publish_dir(&poly_mesh, &target)
            .map_err(FinalizationError::io("Failed to publish polyMesh"))?;

        info!(
            "Mesh has {} cells, {} points, {} faces",
            stats.cells, stats.points, stats.faces
        );

        Ok(JobSummary {
            mesh_stats: Some(stats),
            ..JobSummary::default()
        })
    }
}

/// Extracts cell, point and face counts from checkMesh output
///
/// Keys are matched exactly so `faces per cell:` and `internal faces:` do
/// not count. All three must be present and positive.
pub fn parse_mesh_stats(log: &str) -> Option<MeshStats> {
    let mut points = None;
    let mut faces = None;
    let mut cells = None;

    for line in log.lines() {
        let Some((key, value)) = line.trim().split_once(':') else {
            continue;
        };
        let slot = match key.trim() {
            "points" => &mut points,
            "faces" => &mut faces,
            "cells" => &mut cells,
            _ => continue,
        };
        if let Ok(count) = value.trim().parse::<u64>() {
            *slot = Some(count);
        }
    }

    let stats = MeshStats {
        cells: cells?,
        points: points?,
        faces: faces?,
    };
    (stats.cells > 0 && stats.points > 0 && stats.faces > 0).then_some(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHECK_MESH_LOG: &str = "\
Create time

Create polyMesh for time = 0

Time = 0

Mesh stats
    points:           186340
    faces:            522880
    internal faces:   493760
    cells:            168000
    faces per cell:   6.05
    boundary patches: 6
    point zones:      0

Checking topology...
    Boundary definition OK.
";

    #[test]
    fn test_parse_mesh_stats() {
        let stats = parse_mesh_stats(CHECK_MESH_LOG).unwrap();
        assert_eq!(
            stats,
            MeshStats {
                cells: 168000,
                points: 186340,
                faces: 522880,
            }
        );
    }

    #[test]
    fn test_missing_or_zero_counts_are_unavailable() {
        assert!(parse_mesh_stats("--> FOAM FATAL ERROR: cannot find polyMesh").is_none());
        assert!(parse_mesh_stats("    points: 10\n    faces: 20\n    cells: 0\n").is_none());
        assert!(parse_mesh_stats("    points: 10\n    faces per cell: 6\n    cells: 4\n").is_none());
    }
}
