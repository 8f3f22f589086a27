use crate::{
    error::{GuidemeshError, Result},
    geometry::RegionMap,
};

/// Meshing parameters for one region
#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionSpec {
    /// Target maximum element edge length inside the region
    pub resolution: f64,
    /// Radius beyond the region boundary over which refinement still applies
    pub distance: f64,
    /// Element size reached at `distance`. Falls back to the global maximum.
    pub size_max: Option<f64>,
}

impl ResolutionSpec {
    pub fn new(resolution: f64, distance: f64) -> ResolutionSpec {
        ResolutionSpec {
            resolution,
            distance,
            size_max: None,
        }
    }

    pub fn with_size_max(mut self, size_max: f64) -> ResolutionSpec {
        self.size_max = Some(size_max);
        self
    }
}

/// Ordered `(region, spec)` pairs. Regions left out mesh at the global
/// default maximum size.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolutionPolicy {
    entries: Vec<(String, ResolutionSpec)>,
}

impl ResolutionPolicy {
    pub fn new() -> ResolutionPolicy {
        ResolutionPolicy::default()
    }

    pub fn insert(&mut self, region: &str, spec: ResolutionSpec) -> Result<()> {
        if self.get(region).is_some() {
            return Err(GuidemeshError::Input(format!(
                "resolution for region '{region}' is defined more than once"
            )));
        }
        self.entries.push((region.to_owned(), spec));
        Ok(())
    }

    pub fn get(&self, region: &str) -> Option<&ResolutionSpec> {
        self.entries
            .iter()
            .find(|(name, _)| name == region)
            .map(|(_, spec)| spec)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ResolutionSpec)> {
        self.entries.iter().map(|(name, spec)| (name.as_str(), spec))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Checks the policy against the regions it will be applied to
    ///
    /// # Arguments
    /// * `regions` - The regions handed to the mesh generator
    /// * `default_resolution_max` - The global maximum element size
    pub fn validate(&self, regions: &RegionMap, default_resolution_max: f64) -> Result<()> {
        if !default_resolution_max.is_finite() || default_resolution_max <= 0.0 {
            return Err(GuidemeshError::MeshGeneration(format!(
                "default maximum element size must be positive, got {default_resolution_max}"
            )));
        }

        for (name, spec) in self.iter() {
            if regions.get(name).is_none() {
                return Err(GuidemeshError::MeshGeneration(format!(
                    "resolution given for unknown region '{name}' (regions: {:?})",
                    regions.names()
                )));
            }
            if !spec.resolution.is_finite() || spec.resolution <= 0.0 {
                return Err(GuidemeshError::MeshGeneration(format!(
                    "region '{name}' has non-positive resolution {}",
                    spec.resolution
                )));
            }
            if !spec.distance.is_finite() || spec.distance < 0.0 {
                return Err(GuidemeshError::MeshGeneration(format!(
                    "region '{name}' has negative refinement distance {}",
                    spec.distance
                )));
            }
            let size_max = spec.size_max.unwrap_or(default_resolution_max);
            if !size_max.is_finite() || size_max < spec.resolution {
                return Err(GuidemeshError::MeshGeneration(format!(
                    "region '{name}' has maximum size {size_max} below its resolution {}",
                    spec.resolution
                )));
            }
        }

        Ok(())
    }
}
