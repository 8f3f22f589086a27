use num_complex::Complex64;
use tracing::info;

use crate::{
    datatypes::Mesh,
    error::Result,
    field::{assign_materials, Coverage, ElementField, FieldReport},
    input::Problem,
    mesher::{mesh_regions, MeshOptions},
    solver::{ModeParameters, ModeSet, ModeSolver},
};

/// A meshed cross-section with its permittivity filled in
#[derive(Debug, Clone)]
pub struct PreparedProblem {
    pub mesh: Mesh,
    pub epsilon: ElementField<Complex64>,
    pub report: FieldReport,
}

/// Meshes the problem's regions and assigns each element its permittivity
///
/// # Arguments
/// * `problem` - Regions, resolution policy and materials
/// * `options` - Meshing settings. `default_resolution_max` is taken from
///     the problem.
/// * `coverage` - Policy for elements no material claims
pub fn prepare(
    problem: &Problem,
    options: &MeshOptions,
    coverage: Coverage,
) -> Result<PreparedProblem> {
    let options = MeshOptions {
        default_resolution_max: problem.default_resolution_max,
        ..options.clone()
    };

    let mesh = mesh_regions(&problem.regions, &problem.policy, &options)?;
    for region in &mesh.regions {
        info!("region '{}': {} elements", region.name, region.elements.len());
    }

    let mut epsilon = ElementField::zeros(&mesh);
    let report = assign_materials(&mut epsilon, &mesh, &problem.materials, coverage)?;

    Ok(PreparedProblem {
        mesh,
        epsilon,
        report,
    })
}

/// Hands a prepared problem to a mode solver
pub fn solve(
    prepared: &PreparedProblem,
    solver: &dyn ModeSolver,
    params: &ModeParameters,
) -> Result<ModeSet> {
    params.validate()?;
    let modes = solver.compute_modes(&prepared.mesh, &prepared.epsilon, params)?;
    for (i, mode) in modes.modes.iter().enumerate() {
        info!("mode {i}: eigenvalue {}", mode.eigenvalue);
    }
    Ok(modes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        datatypes::{Element, RegionTag, Vertex},
        error::GuidemeshError,
        solver::Mode,
    };

    struct ConstantSolver;

    impl ModeSolver for ConstantSolver {
        fn compute_modes(
            &self,
            mesh: &Mesh,
            epsilon: &ElementField<Complex64>,
            params: &ModeParameters,
        ) -> Result<ModeSet> {
            let peak = epsilon.iter().map(|e| e.re).fold(0.0, f64::max);
            Ok(ModeSet {
                modes: (0..params.num_modes)
                    .map(|_| Mode {
                        eigenvalue: Complex64::new(peak.sqrt(), 0.0),
                        profile: vec![Complex64::new(1.0, 0.0); mesh.num_nodes()],
                    })
                    .collect(),
            })
        }
    }

    fn prepared() -> PreparedProblem {
        let mesh = Mesh {
            nodes: vec![
                Vertex::new(0.0, 0.0),
                Vertex::new(1.0, 0.0),
                Vertex::new(0.0, 1.0),
            ],
            elements: vec![Element { nodes: [0, 1, 2] }],
            regions: vec![RegionTag {
                name: "core".to_owned(),
                elements: vec![0],
            }],
        };
        let mut epsilon = ElementField::zeros(&mesh);
        epsilon.assign(&[0], Complex64::new(4.0, 0.0));
        PreparedProblem {
            mesh,
            epsilon,
            report: FieldReport::default(),
        }
    }

    #[test]
    fn solve_forwards_to_solver() {
        let params = ModeParameters {
            num_modes: 2,
            ..Default::default()
        };
        let modes = solve(&prepared(), &ConstantSolver, &params).unwrap();
        assert_eq!(modes.modes.len(), 2);
        assert_eq!(modes.eigenvalues()[0], Complex64::new(2.0, 0.0));
    }

    #[test]
    fn solve_rejects_invalid_parameters() {
        let params = ModeParameters {
            wavelength: -1.0,
            ..Default::default()
        };
        assert!(matches!(
            solve(&prepared(), &ConstantSolver, &params),
            Err(GuidemeshError::Solver(_))
        ));
    }
}
