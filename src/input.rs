use std::path::{Path, PathBuf};

use json::JsonValue;
use tracing::info;

use crate::{
    datatypes::{Material, Vertex},
    error::{GuidemeshError, Result},
    field::MaterialAssignment,
    geometry::{symmetric_waveguide, Polygon, RegionMap, WaveguideParameters},
    resolution::{ResolutionPolicy, ResolutionSpec},
    solver::ModeParameters,
    svg,
};

/// Everything needed to mesh a cross-section and fill its permittivity
#[derive(Debug, Clone, PartialEq)]
pub struct Problem {
    pub regions: RegionMap,
    pub policy: ResolutionPolicy,
    pub default_resolution_max: f64,
    pub materials: MaterialAssignment,
    pub modes: Option<ModeParameters>,
}

fn missing(key: &str, context: &str) -> GuidemeshError {
    GuidemeshError::Input(format!("Input json missing {key} field in {context}"))
}

fn number(value: &JsonValue, key: &str, context: &str) -> Result<f64> {
    if !value.has_key(key) {
        return Err(missing(key, context));
    }
    value[key].as_f64().ok_or_else(|| {
        GuidemeshError::Input(format!("Bad value for {key} in {context}, expected a number"))
    })
}

fn optional_number(value: &JsonValue, key: &str, context: &str) -> Result<Option<f64>> {
    if !value.has_key(key) {
        return Ok(None);
    }
    number(value, key, context).map(Some)
}

fn text<'a>(value: &'a JsonValue, key: &str, context: &str) -> Result<&'a str> {
    if !value.has_key(key) {
        return Err(missing(key, context));
    }
    value[key].as_str().ok_or_else(|| {
        GuidemeshError::Input(format!("Bad value for {key} in {context}, expected a string"))
    })
}

fn count(value: &JsonValue, key: &str, context: &str) -> Result<usize> {
    if !value.has_key(key) {
        return Err(missing(key, context));
    }
    value[key].as_usize().ok_or_else(|| {
        GuidemeshError::Input(format!(
            "Bad value for {key} in {context}, expected a non-negative integer"
        ))
    })
}

fn array<'a>(value: &'a JsonValue, key: &str) -> Result<&'a JsonValue> {
    let entry = &value[key];
    if !entry.is_array() {
        return Err(GuidemeshError::Input(format!(
            "Input json field {key} must be an array"
        )));
    }
    Ok(entry)
}

fn parse_waveguide(json: &JsonValue) -> Result<WaveguideParameters> {
    let context = "geometry.symmetric_waveguide";
    let defaults = WaveguideParameters::default();

    Ok(WaveguideParameters {
        core_half_width: number(json, "core_half_width", context)?,
        core_half_height: number(json, "core_half_height", context)?,
        buffer_distance: number(json, "buffer_distance", context)?,
        buffer_resolution: if json.has_key("buffer_resolution") {
            count(json, "buffer_resolution", context)?
        } else {
            defaults.buffer_resolution
        },
        clad_x_scale: optional_number(json, "clad_x_scale", context)?
            .unwrap_or(defaults.clad_x_scale),
        clad_y_scale: optional_number(json, "clad_y_scale", context)?
            .unwrap_or(defaults.clad_y_scale),
    })
}

fn parse_polygon_regions(json: &JsonValue) -> Result<RegionMap> {
    let mut regions = RegionMap::new();

    for entry in json.members() {
        let name = text(entry, "name", "geometry.regions")?;
        let context = format!("region {name}");
        if !entry["points"].is_array() {
            return Err(missing("points", &context));
        }

        let mut vertices: Vec<Vertex> = Vec::new();
        for point in entry["points"].members() {
            match (point[0].as_f64(), point[1].as_f64(), point.len()) {
                (Some(x), Some(y), 2) => vertices.push(Vertex::new(x, y)),
                _ => {
                    return Err(GuidemeshError::Input(format!(
                        "Bad point {point} in {context}, expected [x, y]"
                    )))
                }
            }
        }
        regions.insert(name, Polygon::new(vertices)?)?;
    }

    Ok(regions)
}

fn parse_geometry(json: &JsonValue, base_dir: &Path) -> Result<RegionMap> {
    let geometry = &json["geometry"];

    if geometry.has_key("symmetric_waveguide") {
        symmetric_waveguide(&parse_waveguide(&geometry["symmetric_waveguide"])?)
    } else if geometry.has_key("svg") {
        let svg_path = PathBuf::from(text(geometry, "svg", "geometry")?);
        svg::load_regions(&base_dir.join(svg_path))
    } else if geometry.has_key("regions") {
        parse_polygon_regions(array(geometry, "regions")?)
    } else {
        Err(GuidemeshError::Input(
            "geometry must contain one of symmetric_waveguide, svg or regions".to_owned(),
        ))
    }
}

fn parse_resolutions(json: &JsonValue) -> Result<ResolutionPolicy> {
    let mut policy = ResolutionPolicy::new();
    if !json.has_key("resolutions") {
        return Ok(policy);
    }

    for entry in array(json, "resolutions")?.members() {
        let region = text(entry, "region", "resolutions")?;
        let context = format!("resolution of {region}");
        let mut spec = ResolutionSpec::new(
            number(entry, "resolution", &context)?,
            number(entry, "distance", &context)?,
        );
        if let Some(size_max) = optional_number(entry, "size_max", &context)? {
            spec = spec.with_size_max(size_max);
        }
        policy.insert(region, spec)?;
    }

    Ok(policy)
}

fn parse_materials(json: &JsonValue) -> Result<MaterialAssignment> {
    let mut materials = MaterialAssignment::new();

    for entry in array(json, "materials")?.members() {
        let region = text(entry, "region", "materials")?;
        let context = format!("material of {region}");
        let n = number(entry, "n", &context)?;
        let k = optional_number(entry, "k", &context)?.unwrap_or(0.0);
        let name = if entry.has_key("name") {
            text(entry, "name", &context)?
        } else {
            region
        };
        materials.push(region, Material::new(name, n, k));
    }

    if materials.is_empty() {
        return Err(GuidemeshError::Input(
            "Input json materials array is empty".to_owned(),
        ));
    }
    Ok(materials)
}

fn parse_modes(json: &JsonValue) -> Result<Option<ModeParameters>> {
    if !json.has_key("modes") {
        return Ok(None);
    }
    let modes = &json["modes"];
    let defaults = ModeParameters::default();

    Ok(Some(ModeParameters {
        wavelength: number(modes, "wavelength", "modes")?,
        mu_r: optional_number(modes, "mu_r", "modes")?.unwrap_or(defaults.mu_r),
        num_modes: if modes.has_key("num_modes") {
            count(modes, "num_modes", "modes")?
        } else {
            defaults.num_modes
        },
    }))
}

/// Parses a problem description
///
/// # Arguments
/// * `contents` - The problem json
/// * `base_dir` - Directory relative geometry paths are resolved against
pub fn parse_problem(contents: &str, base_dir: &Path) -> Result<Problem> {
    let json = json::parse(contents)
        .map_err(|err| GuidemeshError::Input(format!("Error in input file json: {err}")))?;

    for key in ["geometry", "default_resolution_max", "materials"] {
        if !json.has_key(key) {
            return Err(GuidemeshError::Input(format!("Input json missing {key} field")));
        }
    }

    let problem = Problem {
        regions: parse_geometry(&json, base_dir)?,
        policy: parse_resolutions(&json)?,
        default_resolution_max: number(&json, "default_resolution_max", "problem")?,
        materials: parse_materials(&json)?,
        modes: parse_modes(&json)?,
    };

    info!(
        "loaded {} regions, {} resolution rules and {} materials",
        problem.regions.len(),
        problem.policy.len(),
        problem.materials.len()
    );
    Ok(problem)
}

/// Reads and parses a problem file
pub fn load_problem(input_file: &Path) -> Result<Problem> {
    let contents = std::fs::read_to_string(input_file).map_err(|_| {
        GuidemeshError::Input(format!(
            "Unable to open input file {}",
            input_file.display()
        ))
    })?;
    let base_dir = input_file.parent().unwrap_or_else(|| Path::new("."));
    parse_problem(&contents, base_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const EXAMPLE: &str = r#"{
        "geometry": {"symmetric_waveguide": {
            "core_half_width": 0.5, "core_half_height": 0.17,
            "buffer_distance": 5, "buffer_resolution": 8,
            "clad_x_scale": 1, "clad_y_scale": 0.3}},
        "resolutions": [{"region": "core", "resolution": 0.03, "distance": 0.1}],
        "default_resolution_max": 10,
        "materials": [{"region": "core", "n": 1.9963}, {"region": "clad", "n": 1.444}],
        "modes": {"wavelength": 1.55, "mu_r": 1, "num_modes": 1}
    }"#;

    #[test]
    fn parses_example_problem() {
        let problem = parse_problem(EXAMPLE, Path::new(".")).unwrap();

        assert_eq!(problem.regions.names(), vec!["core", "clad"]);
        assert_relative_eq!(problem.regions.get("core").unwrap().area(), 4.0 * 0.5 * 0.17);
        let core = problem.policy.get("core").unwrap();
        assert_relative_eq!(core.resolution, 0.03);
        assert_relative_eq!(core.distance, 0.1);
        assert!(core.size_max.is_none());
        assert_relative_eq!(problem.default_resolution_max, 10.0);

        let materials: Vec<(&str, f64)> = problem
            .materials
            .iter()
            .map(|(region, m)| (region, m.refractive_index.re))
            .collect();
        assert_eq!(materials.len(), 2);
        assert_eq!(materials[0].0, "core");
        assert_relative_eq!(materials[0].1, 1.9963);
        assert_eq!(materials[1].0, "clad");
        assert_relative_eq!(materials[1].1, 1.444);

        let modes = problem.modes.unwrap();
        assert_relative_eq!(modes.wavelength, 1.55);
        assert_relative_eq!(modes.mu_r, 1.0);
        assert_eq!(modes.num_modes, 1);
    }

    #[test]
    fn parses_explicit_polygons() {
        let contents = r#"{
            "geometry": {"regions": [
                {"name": "rib", "points": [[0, 0], [2, 0], [2, 1], [0, 1]]}
            ]},
            "default_resolution_max": 0.5,
            "materials": [{"region": "rib", "n": 3.48, "k": 0.01, "name": "Si"}]
        }"#;
        let problem = parse_problem(contents, Path::new(".")).unwrap();

        assert_relative_eq!(problem.regions.get("rib").unwrap().area(), 2.0);
        assert!(problem.policy.is_empty());
        assert!(problem.modes.is_none());
        let (_, silicon) = problem.materials.iter().next().unwrap();
        assert_eq!(silicon.name, "Si");
        assert_relative_eq!(silicon.refractive_index.im, 0.01);
    }

    #[test]
    fn reports_missing_and_bad_fields() {
        let no_materials = EXAMPLE.replace("\"materials\"", "\"material\"");
        let bad_width = EXAMPLE.replace("\"core_half_width\": 0.5", "\"core_half_width\": \"wide\"");
        let zero_width = EXAMPLE.replace("\"core_half_width\": 0.5", "\"core_half_width\": 0");
        let no_wavelength = EXAMPLE.replace("\"wavelength\": 1.55, ", "");

        for contents in [no_materials, bad_width, no_wavelength, "{".to_owned()] {
            assert!(matches!(
                parse_problem(&contents, Path::new(".")),
                Err(GuidemeshError::Input(_))
            ));
        }
        assert!(matches!(
            parse_problem(&zero_width, Path::new(".")),
            Err(GuidemeshError::Geometry(_))
        ));
    }
}
