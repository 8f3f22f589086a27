use nalgebra::Point2;
use num_complex::Complex64;

use crate::error::{GuidemeshError, Result};

pub type Vertex = Point2<f64>;

/// A first-order triangle referencing three mesh nodes
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub nodes: [usize; 3],
}

/// A named physical group of the mesh and the elements tagged with it
#[derive(Debug, Clone, PartialEq)]
pub struct RegionTag {
    pub name: String,
    pub elements: Vec<usize>,
}

/// Triangulated cross-section loaded from a mesh file. Read-only once loaded.
#[derive(Debug, Clone, Default)]
pub struct Mesh {
    pub nodes: Vec<Vertex>,
    pub elements: Vec<Element>,
    pub regions: Vec<RegionTag>,
}

impl Mesh {
    pub fn num_elements(&self) -> usize {
        self.elements.len()
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Region labels in the order they appear in the mesh file
    pub fn region_names(&self) -> Vec<String> {
        self.regions.iter().map(|r| r.name.clone()).collect()
    }

    /// Returns the indices of every element tagged with `name`
    ///
    /// # Arguments
    /// * `name` - The region label to look up
    ///
    /// # Returns
    /// A slice of element indices, or `RegionNotFound` when no physical
    /// group carries that label
    pub fn elements_in(&self, name: &str) -> Result<&[usize]> {
        match self.regions.iter().find(|r| r.name == name) {
            Some(region) => Ok(&region.elements),
            None => Err(GuidemeshError::RegionNotFound {
                region: name.to_owned(),
                available: self.region_names(),
            }),
        }
    }

    /// Calculates the unsigned area of an element
    pub fn element_area(&self, element: usize) -> f64 {
        let [n0, n1, n2] = self.elements[element].nodes;
        let v0 = &self.nodes[n0];
        let v1 = &self.nodes[n1];
        let v2 = &self.nodes[n2];

        0.5 * (v0.x * (v1.y - v2.y) + v1.x * (v2.y - v0.y) + v2.x * (v0.y - v1.y)).abs()
    }

    /// Total area covered by the elements of one region
    pub fn region_area(&self, name: &str) -> Result<f64> {
        Ok(self
            .elements_in(name)?
            .iter()
            .map(|&e| self.element_area(e))
            .sum())
    }
}

/// A material described by its complex refractive index `n + ik`
#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub name: String,
    pub refractive_index: Complex64,
}

impl Material {
    pub fn new(name: &str, n: f64, k: f64) -> Material {
        Material {
            name: name.to_owned(),
            refractive_index: Complex64::new(n, k),
        }
    }

    /// Relative permittivity, the square of the refractive index
    pub fn permittivity(&self) -> Complex64 {
        self.refractive_index * self.refractive_index
    }
}
