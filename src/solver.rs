use std::{path::PathBuf, time::Duration};

use indicatif::ProgressBar;
use num_complex::Complex64;
use tracing::{debug, info};

use crate::{
    datatypes::Mesh,
    error::{GuidemeshError, Result},
    field::ElementField,
    post_processor,
};

/// Inputs of an eigenmode computation besides mesh and permittivity
#[derive(Debug, Clone, PartialEq)]
pub struct ModeParameters {
    pub wavelength: f64,
    pub mu_r: f64,
    pub num_modes: usize,
}

impl Default for ModeParameters {
    fn default() -> Self {
        ModeParameters {
            wavelength: 1.55,
            mu_r: 1.0,
            num_modes: 1,
        }
    }
}

impl ModeParameters {
    pub fn validate(&self) -> Result<()> {
        if !self.wavelength.is_finite() || self.wavelength <= 0.0 {
            return Err(GuidemeshError::Solver(format!(
                "wavelength must be positive, got {}",
                self.wavelength
            )));
        }
        if !self.mu_r.is_finite() || self.mu_r <= 0.0 {
            return Err(GuidemeshError::Solver(format!(
                "relative permeability must be positive, got {}",
                self.mu_r
            )));
        }
        if self.num_modes == 0 {
            return Err(GuidemeshError::Solver(
                "at least one mode must be requested".to_owned(),
            ));
        }
        Ok(())
    }
}

/// One eigenmode: its eigenvalue and a nodal field profile
#[derive(Debug, Clone, PartialEq)]
pub struct Mode {
    pub eigenvalue: Complex64,
    pub profile: Vec<Complex64>,
}

/// Modes ordered as the solver returned them, dominant first
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ModeSet {
    pub modes: Vec<Mode>,
}

impl ModeSet {
    pub fn eigenvalues(&self) -> Vec<Complex64> {
        self.modes.iter().map(|m| m.eigenvalue).collect()
    }

    pub fn dominant(&self) -> Option<&Mode> {
        self.modes.first()
    }
}

/// A mode solver fed with the prepared mesh and permittivity
pub trait ModeSolver {
    fn compute_modes(
        &self,
        mesh: &Mesh,
        epsilon: &ElementField<Complex64>,
        params: &ModeParameters,
    ) -> Result<ModeSet>;
}

/// Hands the problem to an external program through CSV files
///
/// The program is called as `<program> [args...] <dir>`. `<dir>` holds
/// `nodes.csv`, `elements.csv` and `parameters.json`, and the program
/// must write `<dir>/modes.csv` with one mode per line:
/// `lam_re,lam_im,p0_re,p0_im,...` with one profile pair per node.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalModeSolver {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl ExternalModeSolver {
    pub fn new(program: impl Into<PathBuf>) -> ExternalModeSolver {
        ExternalModeSolver {
            program: program.into(),
            args: Vec::new(),
        }
    }
}

fn solver_io(context: &str) -> impl Fn(std::io::Error) -> GuidemeshError + '_ {
    move |err| GuidemeshError::Solver(format!("{context}: {err}"))
}

/// Parses the `modes.csv` written by an external solver
///
/// # Arguments
/// * `contents` - The file contents
/// * `num_nodes` - Expected profile length
/// * `num_modes` - Minimum number of modes expected
pub fn parse_modes(contents: &str, num_nodes: usize, num_modes: usize) -> Result<ModeSet> {
    let mut modes: Vec<Mode> = Vec::new();

    for (line_number, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let values: Vec<f64> = line
            .split(',')
            .map(|v| v.trim().parse::<f64>())
            .collect::<std::result::Result<_, _>>()
            .map_err(|err| {
                GuidemeshError::Solver(format!(
                    "non-numeric value on modes line {}: {err}",
                    line_number + 1
                ))
            })?;

        if values.len() != 2 + 2 * num_nodes {
            return Err(GuidemeshError::Solver(format!(
                "mode on line {} has {} values, expected {} for {num_nodes} nodes",
                line_number + 1,
                values.len(),
                2 + 2 * num_nodes
            )));
        }

        modes.push(Mode {
            eigenvalue: Complex64::new(values[0], values[1]),
            profile: values[2..]
                .chunks_exact(2)
                .map(|pair| Complex64::new(pair[0], pair[1]))
                .collect(),
        });
    }

    if modes.len() < num_modes {
        return Err(GuidemeshError::Solver(format!(
            "solver returned {} modes, {num_modes} requested",
            modes.len()
        )));
    }

    Ok(ModeSet { modes })
}

impl ModeSolver for ExternalModeSolver {
    fn compute_modes(
        &self,
        mesh: &Mesh,
        epsilon: &ElementField<Complex64>,
        params: &ModeParameters,
    ) -> Result<ModeSet> {
        params.validate()?;
        if epsilon.len() != mesh.num_elements() {
            return Err(GuidemeshError::Solver(format!(
                "permittivity has {} values for {} elements",
                epsilon.len(),
                mesh.num_elements()
            )));
        }

        let workspace = tempfile::Builder::new()
            .prefix("guidemesh-solve")
            .tempdir()
            .map_err(solver_io("unable to create solver workspace"))?;
        let dir = workspace.path();

        post_processor::csv_output(mesh, epsilon, &dir.join("nodes.csv"), &dir.join("elements.csv"))
            .map_err(|err| GuidemeshError::Solver(format!("unable to write solver input: {err}")))?;

        let mut parameters = json::JsonValue::new_object();
        parameters["wavelength"] = params.wavelength.into();
        parameters["mu_r"] = params.mu_r.into();
        parameters["num_modes"] = params.num_modes.into();
        std::fs::write(dir.join("parameters.json"), parameters.pretty(2))
            .map_err(solver_io("unable to write solver parameters"))?;

        info!(
            "solving for {} modes at wavelength {} with {}",
            params.num_modes,
            params.wavelength,
            self.program.display()
        );
        let spinner = ProgressBar::new_spinner();
        spinner.set_message("computing modes...");
        spinner.enable_steady_tick(Duration::from_millis(100));

        let start = std::time::Instant::now();
        let result = std::process::Command::new(&self.program)
            .args(&self.args)
            .arg(dir)
            .output();
        spinner.finish_and_clear();

        let output = result.map_err(|err| {
            GuidemeshError::Solver(format!(
                "failed to launch mode solver {}: {err}",
                self.program.display()
            ))
        })?;
        debug!(
            "mode solver stdout:\n{}",
            String::from_utf8_lossy(&output.stdout)
        );
        if !output.status.success() {
            return Err(GuidemeshError::Solver(format!(
                "mode solver exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let contents = std::fs::read_to_string(dir.join("modes.csv"))
            .map_err(solver_io("mode solver did not produce modes.csv"))?;
        let modes = parse_modes(&contents, mesh.num_nodes(), params.num_modes)?;

        info!(
            "solved {} modes in {:.3} seconds",
            modes.modes.len(),
            start.elapsed().as_secs_f32()
        );
        Ok(modes)
    }
}
