//! Mesh generation case files

use std::path::Path;
use tracing::debug;
use ventus_core::domain::params::MeshParams;

use crate::workspace::foam::{dictionary, vector};
use crate::workspace::geometry::{Bounds, Point, SurfaceMesh};
use crate::workspace::{SetupError, Workspace};

/// Surface file name inside `constant/triSurface`
pub const SURFACE_NAME: &str = "building";

/// Largest background block mesh handed to the mesher
pub const MAX_BACKGROUND_CELLS: u64 = 50_000_000;

/// Background block mesh around the geometry
#[derive(Debug, Clone, PartialEq)]
pub struct Domain {
    pub min: Point,
    pub max: Point,
    pub cells: [u32; 3],
}

impl Domain {
    /// Sizes the wind-tunnel box for a geometry
    ///
    /// The box extends half a scaled extent upstream and laterally, one and a
    /// half downstream, sits on the ground at z = 0 and is twice the scaled
    /// height tall.
    pub fn around(bounds: &Bounds, params: &MeshParams) -> Self {
        let center = bounds.center();
        let extent = bounds.size().map(|s| s.max(params.cell_size) * params.domain_factor);

        let min = [
            center[0] - extent[0] * 0.5,
            center[1] - extent[1] * 0.5,
            0.0,
        ];
        let max = [
            center[0] + extent[0] * 1.5,
            center[1] + extent[1] * 0.5,
            (extent[2] * 2.0).max(bounds.max[2] + params.cell_size),
        ];

        let cells = [0, 1, 2].map(|axis| {
            let n = ((max[axis] - min[axis]) / params.cell_size).ceil();
            n.clamp(1.0, f64::from(u32::MAX)) as u32
        });

        Self { min, max, cells }
    }

    /// A point inside the fluid region, used by snappyHexMesh to decide
    /// which side of the surface to keep
    ///
    /// Upstream, above the geometry, and off every background cell face.
    pub fn location_in_mesh(&self) -> Point {
        let width = |axis: usize| (self.max[axis] - self.min[axis]) / f64::from(self.cells[axis]);
        [
            self.min[0] + 0.5137 * width(0),
            self.min[1] + 0.5137 * width(1),
            self.max[2] - 0.5137 * width(2),
        ]
    }

    /// Total background cells, saturating at `u64::MAX`
    pub fn cell_count(&self) -> u64 {
        self.cells
            .iter()
            .fold(1u64, |total, &n| total.saturating_mul(u64::from(n)))
    }
}

/// Writes every mesh input: the surface and the five dictionaries
pub fn write_case(
    workspace: &Workspace,
    params: &MeshParams,
    geometry: &Path,
) -> Result<Domain, SetupError> {
    let surface = SurfaceMesh::load(geometry)?;
    let domain = Domain::around(&surface.bounds(), params);

    debug!(
        "Geometry {} has {} triangles, background mesh {:?} ({} cells)",
        geometry.display(),
        surface.triangle_count(),
        domain.cells,
        domain.cell_count()
    );

    if domain.cell_count() > MAX_BACKGROUND_CELLS {
        return Err(SetupError::MeshTooLarge {
            cells: domain.cell_count(),
            limit: MAX_BACKGROUND_CELLS,
        });
    }

    workspace.write_file(
        format!("constant/triSurface/{SURFACE_NAME}.stl"),
        &surface.to_ascii_stl(SURFACE_NAME),
    )?;
    workspace.write_file("system/controlDict", &control_dict())?;
    workspace.write_file("system/blockMeshDict", &block_mesh_dict(&domain))?;
    workspace.write_file(
        "system/surfaceFeatureExtractDict",
        &surface_feature_extract_dict(),
    )?;
    workspace.write_file(
        "system/snappyHexMeshDict",
        &snappy_hex_mesh_dict(params, &domain),
    )?;
    workspace.write_file("system/meshQualityDict", &mesh_quality_dict())?;

    Ok(domain)
}

fn control_dict() -> String {
    dictionary(
        "system",
        "controlDict",
        r#"
application     snappyHexMesh;

startFrom       startTime;

startTime       0;

stopAt          endTime;

endTime         1;

deltaT          1;

writeControl    timeStep;

writeInterval   1;

writeFormat     ascii;

writePrecision  6;

timeFormat      general;

runTimeModifiable false;
"#,
    )
}

fn block_mesh_dict(domain: &Domain) -> String {
    let [x0, y0, z0] = domain.min;
    let [x1, y1, z1] = domain.max;
    let [nx, ny, nz] = domain.cells;

    let body = format!(
        r#"
convertToMeters 1;

vertices
(
    {}
    {}
    {}
    {}
    {}
    {}
    {}
    {}
);

blocks
(
    hex (0 1 2 3 4 5 6 7) ({nx} {ny} {nz}) simpleGrading (1 1 1)
);

edges
(
);

boundary
(
    inlet
    {{
        type patch;
        faces ((0 4 7 3));
    }}
    outlet
    {{
        type patch;
        faces ((1 2 6 5));
    }}
    walls
    {{
        type wall;
        faces
        (
            (0 1 5 4)
            (3 7 6 2)
        );
    }}
    ground
    {{
        type wall;
        faces ((0 3 2 1));
    }}
    top
    {{
        type patch;
        faces ((4 5 6 7));
    }}
);

mergePatchPairs
(
);
"#,
        vector(x0, y0, z0),
        vector(x1, y0, z0),
        vector(x1, y1, z0),
        vector(x0, y1, z0),
        vector(x0, y0, z1),
        vector(x1, y0, z1),
        vector(x1, y1, z1),
        vector(x0, y1, z1),
    );

    dictionary("system", "blockMeshDict", &body)
}

fn surface_feature_extract_dict() -> String {
    let body = format!(
        r#"
{SURFACE_NAME}.stl
{{
    extractionMethod    extractFromSurface;

    extractFromSurfaceCoeffs
    {{
        includedAngle   150;
    }}

    writeObj            no;
}}
"#
    );
    dictionary("system", "surfaceFeatureExtractDict", &body)
}

fn snappy_hex_mesh_dict(params: &MeshParams, domain: &Domain) -> String {
    let level = params.refinement_level;
    let [lx, ly, lz] = domain.location_in_mesh();
    let location = vector(lx, ly, lz);

    let body = format!(
        r#"
castellatedMesh true;
snap            true;
addLayers       true;

geometry
{{
    {SURFACE_NAME}.stl
    {{
        type triSurfaceMesh;
        name {SURFACE_NAME};
    }}
}};

castellatedMeshControls
{{
    maxLocalCells 100000000;
    maxGlobalCells 200000000;
    minRefinementCells 10;
    maxLoadUnbalance 0.10;
    nCellsBetweenLevels 3;

    features
    (
        {{
            file "{SURFACE_NAME}.eMesh";
            level {level};
        }}
    );

    refinementSurfaces
    {{
        {SURFACE_NAME}
        {{
            level ({level} {level});
            patchInfo
            {{
                type wall;
            }}
        }}
    }}

    resolveFeatureAngle 30;

    refinementRegions
    {{
    }}

    locationInMesh {location};

    allowFreeStandingZoneFaces true;
}}

snapControls
{{
    nSmoothPatch 3;
    tolerance 2.0;
    nSolveIter 30;
    nRelaxIter 5;
    nFeatureSnapIter 10;
    implicitFeatureSnap false;
    explicitFeatureSnap true;
    multiRegionFeatureSnap false;
}}

addLayersControls
{{
    relativeSizes true;

    layers
    {{
        "{SURFACE_NAME}.*"
        {{
            nSurfaceLayers 3;
        }}
    }}

    expansionRatio 1.2;
    finalLayerThickness 0.3;
    minThickness 0.1;
    nGrow 0;
    featureAngle 130;
    slipFeatureAngle 30;
    nRelaxIter 5;
    nSmoothSurfaceNormals 1;
    nSmoothNormals 3;
    nSmoothThickness 10;
    maxFaceThicknessRatio 0.5;
    maxThicknessToMedialRatio 0.3;
    minMedianAxisAngle 90;
    nBufferCellsNoExtrude 0;
    nLayerIter 50;
}}

meshQualityControls
{{
    #include "meshQualityDict"
}}

mergeTolerance 1e-6;
"#
    );

    dictionary("system", "snappyHexMeshDict", &body)
}

fn mesh_quality_dict() -> String {
    dictionary(
        "system",
        "meshQualityDict",
        r#"
maxNonOrtho 65;
maxBoundarySkewness 20;
maxInternalSkewness 4;
maxConcave 80;
minVol 1e-13;
minTetQuality -1;
minArea -1;
minTwist 0.02;
minDeterminant 0.001;
minFaceWeight 0.05;
minVolRatio 0.01;
minTriangleTwist -1;
nSmoothScale 4;
errorReduction 0.75;
"#,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOX_OBJ: &str = "v 0 0 0\nv 10 0 0\nv 10 4 0\nv 0 4 0\nv 0 0 6\nv 10 0 6\nv 10 4 6\nv 0 4 6\n\
f 1 2 3 4\nf 5 6 7 8\nf 1 2 6 5\nf 2 3 7 6\nf 3 4 8 7\nf 4 1 5 8\n";

    fn params(refinement_level: u32, cell_size: f64, domain_factor: f64) -> MeshParams {
        MeshParams {
            geometry_file: "box.obj".to_string(),
            refinement_level,
            cell_size,
            domain_factor,
        }
    }

    fn bounds() -> Bounds {
        Bounds {
            min: [0.0, 0.0, 0.0],
            max: [10.0, 4.0, 6.0],
        }
    }

    #[test]
    fn test_domain_extents() {
        let domain = Domain::around(&bounds(), &params(3, 1.0, 5.0));

        // 50 x 20 x 30 scaled extent around center (5, 2, 3)
        assert_eq!(domain.min, [-20.0, -8.0, 0.0]);
        assert_eq!(domain.max, [80.0, 12.0, 60.0]);
        assert_eq!(domain.cells, [100, 20, 60]);
    }

    #[test]
    fn test_location_is_outside_geometry_and_inside_domain() {
        let domain = Domain::around(&bounds(), &params(3, 2.0, 1.0));
        let point = domain.location_in_mesh();

        for axis in 0..3 {
            assert!(point[axis] > domain.min[axis] && point[axis] < domain.max[axis]);
        }
        assert!(point[2] > bounds().max[2]);
    }

    #[test]
    fn test_flat_geometry_still_gets_cells() {
        let flat = Bounds {
            min: [0.0, 0.0, 0.0],
            max: [10.0, 10.0, 0.0],
        };
        let domain = Domain::around(&flat, &params(3, 1.0, 5.0));
        assert!(domain.cells.iter().all(|&n| n >= 1));
        assert!(domain.max[2] > 0.0);
    }

    #[test]
    fn test_cell_count_saturates() {
        let domain = Domain::around(&bounds(), &params(3, 1e-6, 5.0));
        assert!(domain.cells.iter().all(|&n| n > 1_000_000));
        assert_eq!(domain.cell_count(), u64::MAX);
    }

    #[test]
    fn test_tiny_cell_size_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let geometry = dir.path().join("box.obj");
        std::fs::write(&geometry, BOX_OBJ).unwrap();

        let workspace = Workspace::new(dir.path().join("ws"), dir.path().join("result"));
        let err = write_case(&workspace, &params(2, 1e-6, 5.0), &geometry).unwrap_err();

        assert!(matches!(
            err,
            SetupError::MeshTooLarge { limit: MAX_BACKGROUND_CELLS, .. }
        ));
        assert!(err.to_string().starts_with("Background mesh too large"));
        assert!(!workspace.root().join("system/blockMeshDict").exists());
    }

    #[test]
    fn test_write_case_produces_every_input() {
        let dir = tempfile::tempdir().unwrap();
        let geometry = dir.path().join("box.obj");
        std::fs::write(&geometry, BOX_OBJ).unwrap();

        let workspace = Workspace::new(dir.path().join("ws"), dir.path().join("result"));
        write_case(&workspace, &params(2, 1.0, 5.0), &geometry).unwrap();

        let root = workspace.root();
        for file in [
            "constant/triSurface/building.stl",
            "system/controlDict",
            "system/blockMeshDict",
            "system/surfaceFeatureExtractDict",
            "system/snappyHexMeshDict",
            "system/meshQualityDict",
        ] {
            assert!(root.join(file).is_file(), "missing {file}");
        }

        let snappy = std::fs::read_to_string(root.join("system/snappyHexMeshDict")).unwrap();
        assert!(snappy.contains("level (2 2);"));
        let stl = std::fs::read_to_string(root.join("constant/triSurface/building.stl")).unwrap();
        assert_eq!(stl.matches("facet normal").count(), 12);
    }
}
