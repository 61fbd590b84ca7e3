//! Wind simulation case files
//!
//! Boundary patch names follow the mesh case: `inlet`, `outlet`, `walls`,
//! `ground`, `top` from the background block and `building*` from the
//! snapped surface.

use std::fmt::Write;
use std::path::Path;
use tracing::debug;
use ventus_core::domain::params::SimulationParams;

use crate::workspace::foam::{dictionary, header, num, vector};
use crate::workspace::{SetupError, Workspace, copy_dir_all};

/// Turbulence intensity assumed at the inlet
const INLET_INTENSITY: f64 = 0.05;
/// Turbulent length scale at the inlet in metres
const INLET_LENGTH_SCALE: f64 = 0.7;
const C_MU: f64 = 0.09;
/// Kinematic viscosity of air in m^2/s
const NU_AIR: f64 = 1.5e-5;
/// Reference length and area for the force coefficients
const REF_LENGTH: f64 = 10.0;
const REF_AREA: f64 = 100.0;

/// Function object name of the sampled sets, also its output directory
pub const SAMPLE_FUNCTION: &str = "sampleDict";

/// Inlet turbulence quantities derived from the wind speed
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InletTurbulence {
    pub k: f64,
    pub epsilon: f64,
    pub omega: f64,
}

impl InletTurbulence {
    pub fn for_speed(speed: f64) -> Self {
        let k = 1.5 * (speed * INLET_INTENSITY).powi(2);
        let epsilon = C_MU.powf(0.75) * k.powf(1.5) / INLET_LENGTH_SCALE;
        let omega = k.sqrt() / (C_MU.powf(0.25) * INLET_LENGTH_SCALE);
        Self { k, epsilon, omega }
    }
}

/// Copies the mesh into the workspace and writes every solver input
///
/// `mesh_result` is the result directory of the mesh job named by
/// `params.mesh_id`.
pub fn write_case(
    workspace: &Workspace,
    params: &SimulationParams,
    mesh_result: &Path,
) -> Result<(), SetupError> {
    let source = mesh_result.join("constant").join("polyMesh");
    if !source.is_dir() {
        return Err(SetupError::InputNotFound(format!(
            "Mesh {} not found",
            params.mesh_id
        )));
    }

    let copied = copy_dir_all(&source, &workspace.poly_mesh_dir()).map_err(SetupError::io(
        format!("Failed to copy mesh {}", params.mesh_id),
    ))?;
    debug!("Copied {} mesh files from {}", copied, source.display());

    let inlet = InletTurbulence::for_speed(params.wind_speed);

    workspace.write_file("0/U", &velocity_field(params))?;
    workspace.write_file("0/p", &pressure_field())?;
    workspace.write_file("0/k", &k_field(inlet.k))?;
    workspace.write_file("0/epsilon", &epsilon_field(inlet.epsilon))?;
    if params.turbulence_model.uses_omega() {
        workspace.write_file("0/omega", &omega_field(inlet.omega))?;
    }
    workspace.write_file("0/nut", &nut_field())?;

    workspace.write_file("constant/transportProperties", &transport_properties())?;
    workspace.write_file(
        "constant/turbulenceProperties",
        &turbulence_properties(params),
    )?;

    workspace.write_file("system/controlDict", &control_dict(params))?;
    workspace.write_file("system/fvSchemes", &fv_schemes())?;
    workspace.write_file("system/fvSolution", &fv_solution())?;
    workspace.write_file(format!("system/{SAMPLE_FUNCTION}"), &sample_dict())?;

    Ok(())
}

/// Field file with the six standard patches
fn field(class: &str, object: &str, dimensions: &str, internal: &str, patches: &[(&str, String)]) -> String {
    let mut out = header(class, "0", object);
    let _ = writeln!(out, "dimensions      {dimensions};");
    out.push('\n');
    let _ = writeln!(out, "internalField   {internal};");
    out.push('\n');
    out.push_str("boundaryField\n{\n");
    for (patch, condition) in patches {
        let _ = writeln!(out, "    {patch}\n    {{");
        for line in condition.lines() {
            let _ = writeln!(out, "        {line}");
        }
        out.push_str("    }\n\n");
    }
    out.push_str("}\n");
    out
}

fn fixed(value: &str) -> String {
    format!("type            fixedValue;\nvalue           uniform {value};")
}

fn zero_gradient() -> String {
    "type            zeroGradient;".to_string()
}

fn wall_function(kind: &str, value: f64) -> String {
    format!("type            {kind};\nvalue           uniform {};", num(value))
}

fn velocity_field(params: &SimulationParams) -> String {
    let (ux, uy, uz) = params.inflow_vector();
    let inflow = vector(ux, uy, uz);
    let no_slip = "type            noSlip;".to_string();

    field(
        "volVectorField",
        "U",
        "[0 1 -1 0 0 0 0]",
        &format!("uniform {inflow}"),
        &[
            ("inlet", fixed(&inflow)),
            (
                "outlet",
                format!("type            inletOutlet;\ninletValue      uniform (0 0 0);\nvalue           uniform {inflow};"),
            ),
            ("walls", "type            slip;".to_string()),
            ("ground", no_slip.clone()),
            ("top", "type            slip;".to_string()),
            ("\"building.*\"", no_slip),
        ],
    )
}

fn pressure_field() -> String {
    field(
        "volScalarField",
        "p",
        "[0 2 -2 0 0 0 0]",
        "uniform 0",
        &[
            ("inlet", zero_gradient()),
            ("outlet", fixed("0")),
            ("walls", "type            slip;".to_string()),
            ("ground", zero_gradient()),
            ("top", "type            slip;".to_string()),
            ("\"building.*\"", zero_gradient()),
        ],
    )
}

fn scalar_field(object: &str, dimensions: &str, value: f64, wall: &str) -> String {
    let uniform = num(value);
    field(
        "volScalarField",
        object,
        dimensions,
        &format!("uniform {uniform}"),
        &[
            ("inlet", fixed(&uniform)),
            (
                "outlet",
                format!("type            inletOutlet;\ninletValue      uniform {uniform};\nvalue           uniform {uniform};"),
            ),
            ("walls", "type            slip;".to_string()),
            ("ground", wall_function(wall, value)),
            ("top", "type            slip;".to_string()),
            ("\"building.*\"", wall_function(wall, value)),
        ],
    )
}

fn k_field(k: f64) -> String {
    scalar_field("k", "[0 2 -2 0 0 0 0]", k, "kqRWallFunction")
}

fn epsilon_field(epsilon: f64) -> String {
    scalar_field("epsilon", "[0 2 -3 0 0 0 0]", epsilon, "epsilonWallFunction")
}

fn omega_field(omega: f64) -> String {
    scalar_field("omega", "[0 0 -1 0 0 0 0]", omega, "omegaWallFunction")
}

fn nut_field() -> String {
    let wall = "nutkWallFunction";
    let calculated = "type            calculated;\nvalue           uniform 0;".to_string();

    field(
        "volScalarField",
        "nut",
        "[0 2 -1 0 0 0 0]",
        "uniform 0",
        &[
            ("inlet", calculated.clone()),
            ("outlet", calculated.clone()),
            ("walls", calculated.clone()),
            ("ground", wall_function(wall, 0.0)),
            ("top", calculated),
            ("\"building.*\"", wall_function(wall, 0.0)),
        ],
    )
}

fn transport_properties() -> String {
    let body = format!(
        "\ntransportModel  Newtonian;\n\nnu              [0 2 -1 0 0 0 0] {};\n",
        NU_AIR
    );
    dictionary("constant", "transportProperties", &body)
}

fn turbulence_properties(params: &SimulationParams) -> String {
    let body = format!(
        r#"
simulationType  RAS;

RAS
{{
    RASModel        {};

    turbulence      on;

    printCoeffs     on;
}}
"#,
        params.turbulence_model.as_str()
    );
    dictionary("constant", "turbulenceProperties", &body)
}

fn control_dict(params: &SimulationParams) -> String {
    let (ux, uy, _) = params.inflow_vector();
    let speed = params.wind_speed;
    let drag = vector(ux / speed, uy / speed, 0.0);
    let pitch = vector(-uy / speed, ux / speed, 0.0);

    let body = format!(
        r#"
application     simpleFoam;

startFrom       startTime;

startTime       0;

stopAt          endTime;

endTime         {end_time};

deltaT          1;

writeControl    timeStep;

writeInterval   100;

purgeWrite      2;

writeFormat     ascii;

writePrecision  6;

writeCompression off;

timeFormat      general;

timePrecision   6;

runTimeModifiable true;

functions
{{
    forceCoeffs
    {{
        type            forceCoeffs;
        libs            ("libforces.so");
        writeControl    timeStep;
        writeInterval   10;

        patches         ("building.*");
        rho             rhoInf;
        rhoInf          1.225;
        liftDir         (0 0 1);
        dragDir         {drag};
        CofR            (0 0 0);
        pitchAxis       {pitch};
        magUInf         {speed};
        lRef            {lref};
        Aref            {aref};
    }}
}}
"#,
        end_time = num(params.simulation_time),
        speed = num(speed),
        lref = num(REF_LENGTH),
        aref = num(REF_AREA),
    );
    dictionary("system", "controlDict", &body)
}

fn fv_schemes() -> String {
    dictionary(
        "system",
        "fvSchemes",
        r#"
ddtSchemes
{
    default         steadyState;
}

gradSchemes
{
    default         Gauss linear;
}

divSchemes
{
    default         none;
    div(phi,U)      bounded Gauss linearUpwind grad(U);
    div(phi,k)      bounded Gauss upwind;
    div(phi,epsilon) bounded Gauss upwind;
    div(phi,omega)  bounded Gauss upwind;
    div((nuEff*dev2(T(grad(U))))) Gauss linear;
}

laplacianSchemes
{
    default         Gauss linear corrected;
}

interpolationSchemes
{
    default         linear;
}

snGradSchemes
{
    default         corrected;
}

wallDist
{
    method          meshWave;
}
"#,
    )
}

fn fv_solution() -> String {
    dictionary(
        "system",
        "fvSolution",
        r#"
solvers
{
    p
    {
        solver          GAMG;
        tolerance       1e-06;
        relTol          0.1;
        smoother        GaussSeidel;
    }

    "(U|k|epsilon|omega)"
    {
        solver          smoothSolver;
        smoother        GaussSeidel;
        tolerance       1e-05;
        relTol          0.1;
    }
}

SIMPLE
{
    nNonOrthogonalCorrectors 0;
    consistent      yes;

    residualControl
    {
        p               1e-5;
        U               1e-5;
        "(k|epsilon|omega)" 1e-5;
    }
}

relaxationFactors
{
    fields
    {
        p               0.3;
    }
    equations
    {
        U               0.7;
        "(k|epsilon|omega)" 0.7;
    }
}
"#,
    )
}

fn sample_dict() -> String {
    dictionary(
        "system",
        SAMPLE_FUNCTION,
        r#"
type            sets;
libs            ("libsampling.so");

interpolationScheme cellPoint;

setFormat       raw;

fields          (U p k);

sets
(
    verticalProfile
    {
        type        lineUniform;
        axis        z;
        start       (0 0 0);
        end         (0 0 50);
        nPoints     100;
    }
);
"#,
    )
}
