use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use guidemesh::{
    datatypes::Mesh,
    error::{GuidemeshError, Result},
    field::Coverage,
    input::load_problem,
    mesher::{build_geo, compute_mesh, MeshOptions},
    pipeline,
    post_processor::{self, PlotOptions},
    solver::ExternalModeSolver,
};

/// Meshes waveguide cross-sections and prepares their permittivity
#[derive(Parser)]
#[command(name = "guidemesh")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error). RUST_LOG takes precedence.
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// gmsh executable
    #[arg(long, default_value = "gmsh")]
    gmsh: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print or write the gmsh script for a problem
    Geo {
        problem: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Mesh a problem to a .msh file
    Mesh {
        problem: PathBuf,
        #[arg(short, long, default_value = "mesh.msh")]
        output: PathBuf,
    },
    /// Mesh, assign permittivity and optionally solve and plot
    Run {
        problem: PathBuf,
        /// External mode solver program
        #[arg(long)]
        solver: Option<PathBuf>,
        /// Extra argument passed to the solver before the work directory
        #[arg(long = "solver-arg")]
        solver_args: Vec<String>,
        /// Python script used to plot the dominant mode
        #[arg(long, requires = "solver")]
        plotter: Option<PathBuf>,
        /// Directory to write nodes.csv and elements.csv to
        #[arg(long)]
        csv: Option<PathBuf>,
        /// Fail when an element is not claimed by any material
        #[arg(long)]
        strict: bool,
    },
}

fn mesh_options(gmsh: &Path, default_resolution_max: f64) -> MeshOptions {
    MeshOptions {
        gmsh: gmsh.to_path_buf(),
        ..MeshOptions::new(default_resolution_max)
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Geo { problem, output } => {
            let problem = load_problem(&problem)?;
            let options = mesh_options(&cli.gmsh, problem.default_resolution_max);
            let script = build_geo(&problem.regions, &problem.policy, &options)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, script)?;
                    info!("wrote {}", path.display());
                }
                None => print!("{script}"),
            }
        }
        Commands::Mesh { problem, output } => {
            let problem = load_problem(&problem)?;
            let options = mesh_options(&cli.gmsh, problem.default_resolution_max);
            compute_mesh(&problem.regions, &problem.policy, &options, &output)?;

            let mesh = Mesh::load(&output)?;
            for region in &mesh.regions {
                info!("region '{}': {} elements", region.name, region.elements.len());
            }
        }
        Commands::Run {
            problem,
            solver,
            solver_args,
            plotter,
            csv,
            strict,
        } => {
            let problem = load_problem(&problem)?;
            let options = mesh_options(&cli.gmsh, problem.default_resolution_max);
            let coverage = if strict { Coverage::Deny } else { Coverage::Warn };

            let prepared = pipeline::prepare(&problem, &options, coverage)?;

            if let Some(dir) = csv {
                std::fs::create_dir_all(&dir)?;
                post_processor::csv_output(
                    &prepared.mesh,
                    &prepared.epsilon,
                    &dir.join("nodes.csv"),
                    &dir.join("elements.csv"),
                )?;
            }

            let Some(program) = solver else {
                info!("no mode solver given, stopping after field assignment");
                return Ok(());
            };
            let params = problem.modes.clone().ok_or_else(|| {
                GuidemeshError::Input("problem has no modes section to solve".to_owned())
            })?;

            let solver = ExternalModeSolver {
                program,
                args: solver_args,
            };
            let modes = pipeline::solve(&prepared, &solver, &params)?;

            if let (Some(plotter), Some(dominant)) = (plotter, modes.dominant()) {
                post_processor::plot_mode(
                    &prepared.mesh,
                    dominant,
                    &plotter,
                    &PlotOptions::default(),
                )?;
            }
        }
    }

    Ok(())
}

fn main() {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if let Err(err) = run(cli) {
        error!("{err}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plotter_needs_a_solver() {
        let alone = Cli::try_parse_from(["guidemesh", "run", "problem.json", "--plotter", "plot.py"]);
        assert!(alone.is_err());

        let paired = Cli::try_parse_from([
            "guidemesh",
            "run",
            "problem.json",
            "--solver",
            "solve-modes",
            "--plotter",
            "plot.py",
        ]);
        assert!(paired.is_ok());
    }
}
