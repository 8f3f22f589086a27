use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use num_complex::Complex64;
use tracing::info;

use crate::{
    datatypes::Mesh,
    error::{GuidemeshError, Result},
    field::{nodal_average, ElementField},
    solver::Mode,
};

fn create(path: &Path) -> Result<BufWriter<File>> {
    match File::create(path) {
        Ok(f) => Ok(BufWriter::new(f)),
        Err(err) => Err(GuidemeshError::PostProcessor(format!(
            "Failed to create {}: {err}",
            path.display()
        ))),
    }
}

fn write_failed(path: &Path) -> impl Fn(std::io::Error) -> GuidemeshError + '_ {
    move |err| GuidemeshError::PostProcessor(format!("Failed to write {}: {err}", path.display()))
}

/// Writes the mesh and its permittivity to two CSV files
///
/// The nodes file carries the area-weighted nodal average of the field so
/// external tools can shade it without the element connectivity.
///
/// # Arguments
/// * `mesh` - The loaded mesh
/// * `epsilon` - One permittivity per element
/// * `nodes_output` - The filename of the output nodes csv
/// * `elements_output` - The filename of the output elements csv
pub fn csv_output(
    mesh: &Mesh,
    epsilon: &ElementField<Complex64>,
    nodes_output: &Path,
    elements_output: &Path,
) -> Result<()> {
    let nodal = nodal_average(mesh, epsilon);

    let mut nodes_file = create(nodes_output)?;
    let on_nodes = write_failed(nodes_output);
    writeln!(nodes_file, "x,y,eps_re,eps_im").map_err(&on_nodes)?;
    for (node, eps) in mesh.nodes.iter().zip(&nodal) {
        writeln!(nodes_file, "{},{},{},{}", node.x, node.y, eps.re, eps.im).map_err(&on_nodes)?;
    }
    nodes_file.flush().map_err(&on_nodes)?;

    let mut elements_file = create(elements_output)?;
    let on_elements = write_failed(elements_output);
    writeln!(elements_file, "n0,n1,n2,eps_re,eps_im").map_err(&on_elements)?;
    for (element, eps) in mesh.elements.iter().zip(epsilon.iter()) {
        writeln!(
            elements_file,
            "{n0},{n1},{n2},{re},{im}",
            n0 = element.nodes[0],
            n1 = element.nodes[1],
            n2 = element.nodes[2],
            re = eps.re,
            im = eps.im,
        )
        .map_err(&on_elements)?;
    }
    elements_file.flush().map_err(&on_elements)?;

    info!(
        "wrote output to {} and {}",
        nodes_output.display(),
        elements_output.display()
    );

    Ok(())
}

/// Writes the real part of a mode profile next to the element connectivity
pub fn mode_csv_output(
    mesh: &Mesh,
    mode: &Mode,
    nodes_output: &Path,
    elements_output: &Path,
) -> Result<()> {
    if mode.profile.len() != mesh.num_nodes() {
        return Err(GuidemeshError::PostProcessor(format!(
            "mode profile has {} values for {} nodes",
            mode.profile.len(),
            mesh.num_nodes()
        )));
    }

    let mut nodes_file = create(nodes_output)?;
    let on_nodes = write_failed(nodes_output);
    writeln!(nodes_file, "x,y,value").map_err(&on_nodes)?;
    for (node, value) in mesh.nodes.iter().zip(&mode.profile) {
        writeln!(nodes_file, "{},{},{}", node.x, node.y, value.re).map_err(&on_nodes)?;
    }
    nodes_file.flush().map_err(&on_nodes)?;

    let mut elements_file = create(elements_output)?;
    let on_elements = write_failed(elements_output);
    writeln!(elements_file, "n0,n1,n2").map_err(&on_elements)?;
    for element in &mesh.elements {
        writeln!(
            elements_file,
            "{},{},{}",
            element.nodes[0], element.nodes[1], element.nodes[2]
        )
        .map_err(&on_elements)?;
    }
    elements_file.flush().map_err(&on_elements)
}

/// Options forwarded to the plotting script
#[derive(Debug, Clone, PartialEq)]
pub struct PlotOptions {
    pub python: PathBuf,
    pub colorbar: bool,
    /// Save the figure instead of showing it
    pub output: Option<PathBuf>,
}

impl Default for PlotOptions {
    fn default() -> Self {
        PlotOptions {
            python: PathBuf::from("python"),
            colorbar: true,
            output: None,
        }
    }
}

/// Renders a mode with an external python plotting script
///
/// # Arguments
/// * `mesh` - The mesh the mode lives on
/// * `mode` - The mode to draw, usually the dominant one
/// * `plotter_path` - The plotting script, called with the nodes and
///     elements CSV paths
/// * `options` - Interpreter and figure options
pub fn plot_mode(
    mesh: &Mesh,
    mode: &Mode,
    plotter_path: &Path,
    options: &PlotOptions,
) -> Result<()> {
    let workspace = tempfile::Builder::new()
        .prefix("guidemesh-plot")
        .tempdir()
        .map_err(|err| GuidemeshError::PostProcessor(format!("Failed to create plot workspace: {err}")))?;
    let nodes_csv = workspace.path().join("mode_nodes.csv");
    let elements_csv = workspace.path().join("mode_elements.csv");
    mode_csv_output(mesh, mode, &nodes_csv, &elements_csv)?;

    info!("plotting mode with eigenvalue {} in python...", mode.eigenvalue);
    let mut command = std::process::Command::new(&options.python);
    command.arg(plotter_path).arg(&nodes_csv).arg(&elements_csv);
    if options.colorbar {
        command.arg("--colorbar");
    }
    if let Some(output) = &options.output {
        command.arg("--output").arg(output);
    }

    let output = command.output().map_err(|err| {
        GuidemeshError::PostProcessor(format!(
            "Failed to run plotter {}: {err}",
            plotter_path.display()
        ))
    })?;
    if !output.status.success() {
        return Err(GuidemeshError::PostProcessor(format!(
            "Plotter exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    Ok(())
}
