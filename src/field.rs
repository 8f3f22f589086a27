use nalgebra::DVector;
use nalgebra_sparse::{coo::CooMatrix, csr::CsrMatrix};
use num_complex::Complex64;
use tracing::{info, warn};

use crate::{
    datatypes::{Material, Mesh},
    error::{GuidemeshError, Result},
};

/// A piecewise-constant field holding one value per mesh element
#[derive(Debug, Clone, PartialEq)]
pub struct ElementField<T> {
    values: Vec<T>,
}

impl<T: Clone + Default> ElementField<T> {
    /// A field sized to the mesh with every element at `T::default()`
    pub fn zeros(mesh: &Mesh) -> ElementField<T> {
        ElementField {
            values: vec![T::default(); mesh.num_elements()],
        }
    }

    /// Overwrites the value of every listed element
    pub fn assign(&mut self, elements: &[usize], value: T) {
        for &element in elements {
            self.values[element] = value.clone();
        }
    }
}

impl<T> ElementField<T> {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }

    pub fn get(&self, element: usize) -> Option<&T> {
        self.values.get(element)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.values.iter()
    }
}

/// Ordered `(region, material)` pairs. Later entries win where tag sets overlap.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MaterialAssignment {
    entries: Vec<(String, Material)>,
}

impl MaterialAssignment {
    pub fn new() -> MaterialAssignment {
        MaterialAssignment::default()
    }

    pub fn push(&mut self, region: &str, material: Material) {
        self.entries.push((region.to_owned(), material));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Material)> {
        self.entries.iter().map(|(region, m)| (region.as_str(), m))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// What to do with elements no region claimed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Coverage {
    /// Log them and keep the zero default
    #[default]
    Warn,
    /// Fail with `UnclaimedElements`
    Deny,
}

/// Outcome of a material assignment
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FieldReport {
    /// Elements written per region, in assignment order
    pub claimed: Vec<(String, usize)>,
    /// Elements written by more than one region
    pub overlapping: Vec<usize>,
    /// Elements left at the default value
    pub unclaimed: Vec<usize>,
}

impl FieldReport {
    pub fn is_complete(&self) -> bool {
        self.unclaimed.is_empty()
    }
}

/// Writes each region's permittivity into the field
///
/// Every region is resolved before anything is written, so a missing
/// region leaves the field untouched. Values are overwritten, never
/// accumulated, which makes repeated calls idempotent.
///
/// # Arguments
/// * `field` - The permittivity field, one value per element
/// * `mesh` - The mesh the field was sized for
/// * `materials` - Ordered region to material pairs
/// * `coverage` - Policy for elements left unclaimed
///
/// # Returns
/// A report of claimed, overlapping and unclaimed elements
pub fn assign_materials(
    field: &mut ElementField<Complex64>,
    mesh: &Mesh,
    materials: &MaterialAssignment,
    coverage: Coverage,
) -> Result<FieldReport> {
    if field.len() != mesh.num_elements() {
        return Err(GuidemeshError::Input(format!(
            "field has {} values but the mesh has {} elements",
            field.len(),
            mesh.num_elements()
        )));
    }

    let mut targets: Vec<(&str, &[usize], Complex64)> = Vec::with_capacity(materials.len());
    for (region, material) in materials.iter() {
        targets.push((region, mesh.elements_in(region)?, material.permittivity()));
    }

    let mut claims: Vec<u32> = vec![0; mesh.num_elements()];
    let mut report = FieldReport::default();

    for (region, elements, permittivity) in targets {
        field.assign(elements, permittivity);
        for &element in elements {
            claims[element] += 1;
        }
        info!(
            "assigned eps = {permittivity} to {} elements of '{region}'",
            elements.len()
        );
        report.claimed.push((region.to_owned(), elements.len()));
    }

    for (element, &count) in claims.iter().enumerate() {
        match count {
            0 => report.unclaimed.push(element),
            1 => {}
            _ => report.overlapping.push(element),
        }
    }

    if !report.overlapping.is_empty() {
        warn!(
            "{} elements belong to more than one region; the last assignment wins",
            report.overlapping.len()
        );
    }
    if !report.unclaimed.is_empty() {
        match coverage {
            Coverage::Warn => warn!(
                "{} elements were not claimed by any region and keep the zero default",
                report.unclaimed.len()
            ),
            Coverage::Deny => {
                return Err(GuidemeshError::UnclaimedElements {
                    count: report.unclaimed.len(),
                })
            }
        }
    }

    Ok(report)
}

/// Projects an element field onto the nodes by area-weighted averaging
///
/// Nodes not touched by any element get zero.
pub fn nodal_average(mesh: &Mesh, field: &ElementField<Complex64>) -> Vec<Complex64> {
    let mut weights = vec![0.0; mesh.num_nodes()];
    let mut coo: CooMatrix<f64> = CooMatrix::new(mesh.num_nodes(), mesh.num_elements());

    for (i, element) in mesh.elements.iter().enumerate() {
        let area = mesh.element_area(i);
        for &node in &element.nodes {
            coo.push(node, i, area);
            weights[node] += area;
        }
    }
    let projection = CsrMatrix::from(&coo);

    let real = DVector::from_iterator(field.len(), field.iter().map(|v| v.re));
    let imag = DVector::from_iterator(field.len(), field.iter().map(|v| v.im));
    let summed_re = &projection * &real;
    let summed_im = &projection * &imag;

    weights
        .iter()
        .enumerate()
        .map(|(node, &w)| {
            if w > 0.0 {
                Complex64::new(summed_re[node] / w, summed_im[node] / w)
            } else {
                Complex64::new(0.0, 0.0)
            }
        })
        .collect()
}
