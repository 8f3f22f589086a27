use std::{
    collections::HashMap,
    fmt::{self, Write},
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use indicatif::ProgressBar;
use tracing::{debug, info};

use crate::{
    datatypes::{Element, Mesh, RegionTag, Vertex},
    error::{GuidemeshError, Result},
    geometry::{RegionMap, Relation},
    resolution::{ResolutionPolicy, ResolutionSpec},
};

/// gmsh element type of a 3-node triangle
const TRIANGLE_3: usize = 2;

/// Settings handed to the external mesh generator
#[derive(Debug, Clone, PartialEq)]
pub struct MeshOptions {
    /// Maximum element size for regions without their own resolution
    pub default_resolution_max: f64,
    /// Path or name of the gmsh executable
    pub gmsh: PathBuf,
    /// gmsh 2D meshing algorithm (6 = Frontal-Delaunay)
    pub algorithm: u32,
    /// Samples per curve used by distance fields
    pub sampling: usize,
}

impl MeshOptions {
    pub fn new(default_resolution_max: f64) -> MeshOptions {
        MeshOptions {
            default_resolution_max,
            gmsh: PathBuf::from("gmsh"),
            algorithm: 6,
            sampling: 100,
        }
    }
}

/// Works out which earlier regions each region has to cut out of itself
///
/// Regions are taken in insertion order and earlier regions win. A region
/// that covers earlier regions gets their outlines as holes; only the
/// outermost of nested holes are kept. Regions whose outlines touch are
/// rejected since their lines would not be shared in the mesh.
///
/// # Returns
/// For every region, the indices of the regions used as its holes
pub fn plan_surfaces(regions: &RegionMap) -> Result<Vec<Vec<usize>>> {
    let list: Vec<_> = regions.iter().collect();
    let mut plan: Vec<Vec<usize>> = Vec::with_capacity(list.len());

    for (k, region) in list.iter().enumerate() {
        let mut covered: Vec<usize> = Vec::new();

        for (j, earlier) in list[..k].iter().enumerate() {
            let relation = region.polygon.relate(&earlier.polygon);
            if relation != Relation::Overlaps && region.polygon.touches(&earlier.polygon) {
                return Err(GuidemeshError::MeshGeneration(format!(
                    "outlines of regions '{}' and '{}' touch; keep a gap between them or nest them strictly",
                    earlier.name, region.name
                )));
            }

            match relation {
                Relation::Contains if !earlier.polygon.contains_polygon(&region.polygon) => {
                    covered.push(j)
                }
                Relation::Contains | Relation::Within => {
                    return Err(GuidemeshError::MeshGeneration(format!(
                        "region '{}' lies entirely inside earlier region '{}' and has no area left to mesh",
                        region.name, earlier.name
                    )));
                }
                Relation::Overlaps => {
                    return Err(GuidemeshError::MeshGeneration(format!(
                        "regions '{}' and '{}' partially overlap; only nested or disjoint regions are supported",
                        earlier.name, region.name
                    )));
                }
                Relation::Disjoint => {}
            }
        }

        let holes = covered
            .iter()
            .copied()
            .filter(|&j| {
                !covered
                    .iter()
                    .any(|&i| i != j && list[i].polygon.contains_polygon(&list[j].polygon))
            })
            .collect();
        plan.push(holes);
    }

    Ok(plan)
}

fn join_ids(ids: &[usize]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<String>>()
        .join(", ")
}

/// A refinement rule resolved to the region it applies to
struct Refinement<'a> {
    name: &'a str,
    index: usize,
    spec: &'a ResolutionSpec,
}

fn write_outlines(
    geo: &mut String,
    regions: &RegionMap,
) -> std::result::Result<Vec<Vec<usize>>, fmt::Error> {
    let mut region_curves: Vec<Vec<usize>> = Vec::with_capacity(regions.len());
    let mut point_id: usize = 1;
    let mut line_id: usize = 1;

    writeln!(geo, "// Define region outlines")?;
    for region in regions {
        writeln!(geo, "\n// Outline of {}", region.name)?;

        let first_point = point_id;
        for vertex in region.polygon.vertices() {
            writeln!(geo, "Point({point_id}) = {{ {}, {}, 0 }};", vertex.x, vertex.y)?;
            point_id += 1;
        }

        let count = region.polygon.len();
        let mut curves: Vec<usize> = Vec::with_capacity(count);
        for i in 0..count {
            writeln!(
                geo,
                "Line({line_id}) = {{ {}, {} }};",
                first_point + i,
                first_point + (i + 1) % count
            )?;
            curves.push(line_id);
            line_id += 1;
        }
        region_curves.push(curves);
    }

    Ok(region_curves)
}

fn write_surfaces(
    geo: &mut String,
    regions: &RegionMap,
    region_curves: &[Vec<usize>],
    plan: &[Vec<usize>],
) -> fmt::Result {
    writeln!(geo, "\n// Register loops")?;
    for (i, curves) in region_curves.iter().enumerate() {
        writeln!(geo, "Curve Loop({}) = {{ {} }};", i + 1, join_ids(curves))?;
    }

    writeln!(geo, "\n// Define surfaces")?;
    for (i, (region, holes)) in regions.iter().zip(plan).enumerate() {
        let mut loops = vec![i + 1];
        loops.extend(holes.iter().map(|h| h + 1));
        writeln!(geo, "Plane Surface({}) = {{ {} }};", i + 1, join_ids(&loops))?;
        writeln!(
            geo,
            "Physical Surface(\"{}\", {}) = {{ {} }};",
            region.name,
            i + 1,
            i + 1
        )?;
    }
    Ok(())
}

fn write_fields(
    geo: &mut String,
    refinements: &[Refinement],
    region_curves: &[Vec<usize>],
    options: &MeshOptions,
) -> fmt::Result {
    let mut field_id: usize = 1;
    let mut background: Vec<usize> = Vec::new();

    for refinement in refinements {
        let spec = refinement.spec;
        let curves = join_ids(&region_curves[refinement.index]);
        let size_max = spec.size_max.unwrap_or(options.default_resolution_max);

        writeln!(geo, "\n// Refinement for {}", refinement.name)?;
        if spec.distance > 0.0 {
            writeln!(geo, "Field[{field_id}] = Distance;")?;
            writeln!(geo, "Field[{field_id}].CurvesList = {{ {curves} }};")?;
            writeln!(geo, "Field[{field_id}].Sampling = {};", options.sampling)?;
            let distance_field = field_id;
            field_id += 1;

            writeln!(geo, "Field[{field_id}] = Threshold;")?;
            writeln!(geo, "Field[{field_id}].InField = {distance_field};")?;
            writeln!(geo, "Field[{field_id}].SizeMin = {};", spec.resolution)?;
            writeln!(geo, "Field[{field_id}].SizeMax = {size_max};")?;
            writeln!(geo, "Field[{field_id}].DistMin = 0;")?;
            writeln!(geo, "Field[{field_id}].DistMax = {};", spec.distance)?;
            background.push(field_id);
            field_id += 1;
        }

        writeln!(geo, "Field[{field_id}] = MathEval;")?;
        writeln!(geo, "Field[{field_id}].F = \"{}\";", spec.resolution)?;
        let eval_field = field_id;
        field_id += 1;

        writeln!(geo, "Field[{field_id}] = Restrict;")?;
        writeln!(geo, "Field[{field_id}].InField = {eval_field};")?;
        writeln!(geo, "Field[{field_id}].SurfacesList = {{ {} }};", refinement.index + 1)?;
        writeln!(geo, "Field[{field_id}].CurvesList = {{ {curves} }};")?;
        background.push(field_id);
        field_id += 1;
    }

    if !background.is_empty() {
        writeln!(geo, "\n// Combine refinements")?;
        writeln!(geo, "Field[{field_id}] = Min;")?;
        writeln!(geo, "Field[{field_id}].FieldsList = {{ {} }};", join_ids(&background))?;
        writeln!(geo, "Background Field = {field_id};")?;
    }

    write!(
        geo,
        "\n// Define Mesh Settings\n\
        Mesh.MeshSizeMax = {size_max};\n\
        Mesh.MeshSizeExtendFromBoundary = 0;\n\
        Mesh.MeshSizeFromPoints = 0;\n\
        Mesh.MeshSizeFromCurvature = 0;\n\
        Mesh.ElementOrder = 1;\n\
        Mesh.Algorithm = {algorithm};\n\
        Mesh.MshFileVersion = 4.1;\n",
        size_max = options.default_resolution_max,
        algorithm = options.algorithm,
    )
}

/// Builds a gmsh .geo script for the regions and their resolution policy
///
/// # Arguments
/// * `regions` - The ordered regions to mesh
/// * `policy` - Per-region refinement
/// * `options` - Global meshing settings
///
/// # Returns
/// The script text
pub fn build_geo(
    regions: &RegionMap,
    policy: &ResolutionPolicy,
    options: &MeshOptions,
) -> Result<String> {
    if regions.is_empty() {
        return Err(GuidemeshError::MeshGeneration(
            "no regions to mesh".to_owned(),
        ));
    }
    policy.validate(regions, options.default_resolution_max)?;
    let plan = plan_surfaces(regions)?;

    let refinements = policy
        .iter()
        .map(|(name, spec)| {
            regions
                .iter()
                .position(|r| r.name == name)
                .map(|index| Refinement { name, index, spec })
                .ok_or_else(|| GuidemeshError::MeshGeneration(format!("unknown region '{name}'")))
        })
        .collect::<Result<Vec<Refinement>>>()?;

    let mut geo = String::new();
    write_outlines(&mut geo, regions)
        .and_then(|curves| {
            write_surfaces(&mut geo, regions, &curves, &plan)?;
            write_fields(&mut geo, &refinements, &curves, options)
        })
        .map_err(|_| {
            GuidemeshError::MeshGeneration("failed to format the gmsh script".to_owned())
        })?;

    Ok(geo)
}

fn gmsh_error_line(output: &str) -> Option<&str> {
    output
        .lines()
        .map(|l| l.trim())
        .find(|l| l.starts_with("Error"))
}

/// Runs gmsh to mesh the regions into a file at `output`
///
/// # Arguments
/// * `regions` - The ordered regions to mesh
/// * `policy` - Per-region refinement
/// * `options` - Global meshing settings and the gmsh executable
/// * `output` - Where the .msh file is written. The .geo script lives in a
///     scratch directory of its own and never touches the output directory.
pub fn compute_mesh(
    regions: &RegionMap,
    policy: &ResolutionPolicy,
    options: &MeshOptions,
    output: &Path,
) -> Result<()> {
    info!(
        "building .geo for gmsh with {} regions, default max size {}",
        regions.len(),
        options.default_resolution_max
    );
    let script = build_geo(regions, policy, options)?;
    debug!("generated gmsh script:\n{script}");

    let scratch = tempfile::Builder::new().prefix("guidemesh-geo").tempdir()?;
    let geo_filepath = scratch.path().join("regions.geo");
    std::fs::write(&geo_filepath, script)?;

    let spinner = ProgressBar::new_spinner();
    spinner.set_message("running gmsh...");
    spinner.enable_steady_tick(Duration::from_millis(100));

    let result = std::process::Command::new(&options.gmsh)
        .arg(&geo_filepath)
        .arg("-2")
        .arg("-format")
        .arg("msh41")
        .arg("-o")
        .arg(output)
        .output();

    spinner.finish_and_clear();

    let gmsh_output = result.map_err(|err| {
        GuidemeshError::MeshGeneration(format!(
            "failed to launch gmsh ({}): {err}",
            options.gmsh.display()
        ))
    })?;

    let stdout = String::from_utf8_lossy(&gmsh_output.stdout);
    let stderr = String::from_utf8_lossy(&gmsh_output.stderr);
    debug!("gmsh stdout:\n{stdout}");

    if !gmsh_output.status.success() {
        return Err(GuidemeshError::MeshGeneration(format!(
            "gmsh exited with {}: {}",
            gmsh_output.status,
            stderr.trim()
        )));
    }
    if let Some(line) = gmsh_error_line(&stderr).or_else(|| gmsh_error_line(&stdout)) {
        return Err(GuidemeshError::MeshGeneration(format!(
            "gmsh reported: {line}"
        )));
    }
    if !output.exists() {
        return Err(GuidemeshError::MeshGeneration(format!(
            "gmsh did not write {}",
            output.display()
        )));
    }

    info!("gmsh wrote {}", output.display());
    Ok(())
}

/// Meshes the regions inside a scoped temporary directory and loads the result
///
/// The directory and the mesh file inside it are removed when this returns,
/// whether meshing succeeded or not.
pub fn mesh_regions(
    regions: &RegionMap,
    policy: &ResolutionPolicy,
    options: &MeshOptions,
) -> Result<Mesh> {
    mesh_regions_in(&std::env::temp_dir(), regions, policy, options)
}

/// Like [`mesh_regions`], with the scoped directory created under `parent`
pub fn mesh_regions_in(
    parent: &Path,
    regions: &RegionMap,
    policy: &ResolutionPolicy,
    options: &MeshOptions,
) -> Result<Mesh> {
    let workspace = tempfile::Builder::new()
        .prefix("guidemesh")
        .tempdir_in(parent)?;
    let mesh_filepath = workspace.path().join("mesh.msh");

    compute_mesh(regions, policy, options, &mesh_filepath)?;
    Mesh::load(&mesh_filepath)
}

enum MeshSection {
    Format,
    PhysicalNames,
    Entities,
    Nodes,
    Elements,
    Other,
}

struct MeshLines<'a> {
    lines: std::iter::Enumerate<std::str::Lines<'a>>,
    line_number: usize,
}

impl<'a> MeshLines<'a> {
    fn new(contents: &'a str) -> MeshLines<'a> {
        MeshLines {
            lines: contents.lines().enumerate(),
            line_number: 0,
        }
    }

    fn next_line(&mut self) -> Option<&'a str> {
        for (i, line) in self.lines.by_ref() {
            let line = line.trim();
            if !line.is_empty() {
                self.line_number = i + 1;
                return Some(line);
            }
        }
        None
    }

    fn expect_line(&mut self) -> Result<&'a str> {
        self.next_line().ok_or_else(|| {
            GuidemeshError::MeshGeneration("unexpected end of mesh file".to_owned())
        })
    }

    fn numbers<T: FromStr>(&mut self) -> Result<Vec<T>> {
        let line = self.expect_line()?;
        line.split_whitespace()
            .map(|token| {
                token.parse().map_err(|_| {
                    GuidemeshError::MeshGeneration(format!(
                        "unexpected value '{token}' on mesh line {}",
                        self.line_number
                    ))
                })
            })
            .collect()
    }

    fn numbers_at_least<T: FromStr>(&mut self, count: usize) -> Result<Vec<T>> {
        let values: Vec<T> = self.numbers()?;
        if values.len() < count {
            return Err(GuidemeshError::MeshGeneration(format!(
                "expected {count} values on mesh line {}, found {}",
                self.line_number,
                values.len()
            )));
        }
        Ok(values)
    }

    fn skip(&mut self, count: usize) -> Result<()> {
        for _ in 0..count {
            self.expect_line()?;
        }
        Ok(())
    }

    fn expect_end(&mut self, section: &str) -> Result<()> {
        let line = self.expect_line()?;
        if line != format!("$End{section}") {
            return Err(GuidemeshError::MeshGeneration(format!(
                "expected $End{section} on mesh line {}, found '{line}'",
                self.line_number
            )));
        }
        Ok(())
    }
}

#[derive(Default)]
struct MeshSections {
    physical_names: Vec<(i64, String)>,
    surface_physicals: HashMap<i64, Vec<i64>>,
    nodes: Vec<Vertex>,
    node_indexes: HashMap<usize, usize>,
    elements: Vec<Element>,
    element_entities: Vec<i64>,
}

fn parse_format(lines: &mut MeshLines) -> Result<()> {
    let line = lines.expect_line()?;
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 2 || fields[0] != "4.1" {
        return Err(GuidemeshError::MeshGeneration(format!(
            "unsupported mesh format '{line}', expected msh 4.1"
        )));
    }
    if fields[1] != "0" {
        return Err(GuidemeshError::MeshGeneration(
            "binary mesh files are not supported".to_owned(),
        ));
    }
    lines.expect_end("MeshFormat")
}

fn parse_physical_names(lines: &mut MeshLines, sections: &mut MeshSections) -> Result<()> {
    let count: usize = lines.numbers_at_least(1)?[0];
    for _ in 0..count {
        let line = lines.expect_line()?;
        let mut parts = line.splitn(3, char::is_whitespace);
        let dim = parts.next().and_then(|d| d.parse::<usize>().ok());
        let tag = parts.next().and_then(|t| t.parse::<i64>().ok());
        let name = parts.next().map(|n| n.trim().trim_matches('"').to_owned());

        match (dim, tag, name) {
            (Some(2), Some(tag), Some(name)) => sections.physical_names.push((tag, name)),
            (Some(_), Some(_), Some(_)) => {}
            _ => {
                return Err(GuidemeshError::MeshGeneration(format!(
                    "malformed physical name on mesh line {}",
                    lines.line_number
                )))
            }
        }
    }
    lines.expect_end("PhysicalNames")
}

fn parse_entities(lines: &mut MeshLines, sections: &mut MeshSections) -> Result<()> {
    let counts: Vec<usize> = lines.numbers_at_least(4)?;
    lines.skip(counts[0] + counts[1])?;

    for _ in 0..counts[2] {
        // tag, bounding box, physical count
        let values: Vec<f64> = lines.numbers_at_least(8)?;
        let tag = values[0] as i64;
        let num_physicals = values[7] as usize;
        if values.len() < 8 + num_physicals {
            return Err(GuidemeshError::MeshGeneration(format!(
                "truncated surface entity on mesh line {}",
                lines.line_number
            )));
        }
        let physicals = values[8..8 + num_physicals]
            .iter()
            .map(|p| (*p as i64).abs())
            .collect();
        sections.surface_physicals.insert(tag, physicals);
    }

    lines.skip(counts[3])?;
    lines.expect_end("Entities")
}

fn parse_nodes(lines: &mut MeshLines, sections: &mut MeshSections) -> Result<()> {
    let header: Vec<usize> = lines.numbers_at_least(4)?;
    sections.nodes.reserve(header[1]);

    for _ in 0..header[0] {
        let block: Vec<usize> = lines.numbers_at_least(4)?;
        let num_nodes_local = block[3];

        let mut node_tags: Vec<usize> = Vec::with_capacity(num_nodes_local);
        for _ in 0..num_nodes_local {
            node_tags.push(lines.numbers_at_least(1)?[0]);
        }

        for tag in node_tags {
            let coords: Vec<f64> = lines.numbers_at_least(2)?;
            sections.node_indexes.insert(tag, sections.nodes.len());
            sections.nodes.push(Vertex::new(coords[0], coords[1]));
        }
    }

    lines.expect_end("Nodes")
}

fn parse_elements(lines: &mut MeshLines, sections: &mut MeshSections) -> Result<()> {
    let header: Vec<usize> = lines.numbers_at_least(4)?;

    for _ in 0..header[0] {
        let block: Vec<i64> = lines.numbers_at_least(4)?;
        let entity_dim = block[0];
        let entity_tag = block[1];
        let element_type = block[2] as usize;
        let num_elements = block[3] as usize;

        if entity_dim != 2 {
            lines.skip(num_elements)?;
            continue;
        }
        if element_type != TRIANGLE_3 {
            return Err(GuidemeshError::MeshGeneration(format!(
                "unsupported 2D element type {element_type}, only 3-node triangles are handled"
            )));
        }

        for _ in 0..num_elements {
            let data: Vec<usize> = lines.numbers_at_least(4)?;
            let mut nodes = [0usize; 3];
            for (slot, tag) in nodes.iter_mut().zip(&data[1..4]) {
                *slot = *sections.node_indexes.get(tag).ok_or_else(|| {
                    GuidemeshError::MeshGeneration(format!(
                        "element on mesh line {} references unknown node {tag}",
                        lines.line_number
                    ))
                })?;
            }
            sections.elements.push(Element { nodes });
            sections.element_entities.push(entity_tag);
        }
    }

    lines.expect_end("Elements")
}

/// Collects the element indices of every 2D physical group, named groups
/// first in file order, then unnamed ones by tag
fn collect_regions(sections: &MeshSections) -> Vec<RegionTag> {
    let mut groups: Vec<(i64, String)> = sections.physical_names.clone();
    let mut unnamed: Vec<i64> = sections
        .surface_physicals
        .values()
        .flatten()
        .copied()
        .filter(|tag| !groups.iter().any(|(t, _)| t == tag))
        .collect();
    unnamed.sort_unstable();
    unnamed.dedup();
    groups.extend(unnamed.into_iter().map(|tag| (tag, tag.to_string())));

    groups
        .into_iter()
        .map(|(tag, name)| {
            let elements = sections
                .element_entities
                .iter()
                .enumerate()
                .filter(|(_, entity)| {
                    sections
                        .surface_physicals
                        .get(*entity)
                        .is_some_and(|physicals| physicals.contains(&tag))
                })
                .map(|(i, _)| i)
                .collect();
            RegionTag { name, elements }
        })
        .collect()
}

/// Parses the contents of an ASCII msh 4.1 file
///
/// # Arguments
/// * `contents` - The text of the mesh file
///
/// # Returns
/// The mesh with its nodes, triangles and 2D physical groups
pub fn parse_mesh(contents: &str) -> Result<Mesh> {
    let mut lines = MeshLines::new(contents);
    let mut sections = MeshSections::default();
    let mut seen_format = false;

    while let Some(line) = lines.next_line() {
        let section = match line {
            "$MeshFormat" => MeshSection::Format,
            "$PhysicalNames" => MeshSection::PhysicalNames,
            "$Entities" => MeshSection::Entities,
            "$Nodes" => MeshSection::Nodes,
            "$Elements" => MeshSection::Elements,
            _ if line.starts_with('$') => MeshSection::Other,
            _ => {
                return Err(GuidemeshError::MeshGeneration(format!(
                    "unexpected content on mesh line {}: '{line}'",
                    lines.line_number
                )))
            }
        };

        match section {
            MeshSection::Format => {
                parse_format(&mut lines)?;
                seen_format = true;
            }
            MeshSection::PhysicalNames => parse_physical_names(&mut lines, &mut sections)?,
            MeshSection::Entities => parse_entities(&mut lines, &mut sections)?,
            MeshSection::Nodes => parse_nodes(&mut lines, &mut sections)?,
            MeshSection::Elements => parse_elements(&mut lines, &mut sections)?,
            MeshSection::Other => {
                let end = format!("$End{}", &line[1..]);
                while lines.expect_line()? != end {}
            }
        }
    }

    if !seen_format {
        return Err(GuidemeshError::MeshGeneration(
            "mesh file has no $MeshFormat section".to_owned(),
        ));
    }

    let regions = collect_regions(&sections);
    info!(
        "loaded {} nodes and {} elements",
        sections.nodes.len(),
        sections.elements.len()
    );

    Ok(Mesh {
        nodes: sections.nodes,
        elements: sections.elements,
        regions,
    })
}

impl Mesh {
    /// Loads a mesh written by gmsh in ASCII msh 4.1 format
    pub fn load(path: &Path) -> Result<Mesh> {
        let contents = std::fs::read_to_string(path).map_err(|err| {
            GuidemeshError::MeshGeneration(format!(
                "unable to open mesh file {}: {err}",
                path.display()
            ))
        })?;
        parse_mesh(&contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        geometry::{symmetric_waveguide, Polygon, WaveguideParameters},
        resolution::ResolutionSpec,
    };

    const FIXTURE: &str = "$MeshFormat
4.1 0 8
$EndMeshFormat
$PhysicalNames
2
2 1 \"core\"
2 2 \"clad\"
$EndPhysicalNames
$Entities
0 0 2 0
1 0 0 0 1 1 0 1 1 0
2 -1 -1 0 2 2 0 1 2 0
$EndEntities
$Nodes
2 5 1 5
2 1 0 4
4
3
2
1
0 1 0
1 1 0
1 0 0
0 0 0
2 2 0 1
5
2 2 0
$EndNodes
$Elements
2 3 1 3
2 1 2 2
1 1 2 3
2 1 3 4
2 2 2 1
3 3 2 5
$EndElements
";

    fn example_inputs() -> (RegionMap, ResolutionPolicy, MeshOptions) {
        let regions = symmetric_waveguide(&WaveguideParameters::default()).unwrap();
        let mut policy = ResolutionPolicy::new();
        policy
            .insert("core", ResolutionSpec::new(0.03, 0.1))
            .unwrap();
        (regions, policy, MeshOptions::new(10.0))
    }

    #[test]
    fn core_is_carved_out_of_clad() {
        let (regions, _, _) = example_inputs();
        assert_eq!(plan_surfaces(&regions).unwrap(), vec![vec![], vec![0]]);
    }

    #[test]
    fn only_outermost_holes_are_kept() {
        let mut regions = RegionMap::new();
        regions
            .insert("a", Polygon::centered_box(1.0, 1.0).unwrap())
            .unwrap();
        regions
            .insert("b", Polygon::centered_box(2.0, 2.0).unwrap())
            .unwrap();
        regions
            .insert("c", Polygon::centered_box(3.0, 3.0).unwrap())
            .unwrap();
        regions
            .insert("far", Polygon::centered_box(1.0, 1.0).unwrap().translate(10.0, 0.0).unwrap())
            .unwrap();
        assert_eq!(
            plan_surfaces(&regions).unwrap(),
            vec![vec![], vec![0], vec![1], vec![]]
        );
    }

    #[test]
    fn shadowed_and_overlapping_regions_fail() {
        let mut shadowed = RegionMap::new();
        shadowed
            .insert("clad", Polygon::centered_box(5.0, 5.0).unwrap())
            .unwrap();
        shadowed
            .insert("core", Polygon::centered_box(1.0, 1.0).unwrap())
            .unwrap();
        assert!(matches!(
            plan_surfaces(&shadowed),
            Err(GuidemeshError::MeshGeneration(_))
        ));

        let mut overlapping = RegionMap::new();
        overlapping
            .insert("a", Polygon::centered_box(1.0, 1.0).unwrap())
            .unwrap();
        overlapping
            .insert("b", Polygon::centered_box(1.0, 1.0).unwrap().translate(1.0, 0.5).unwrap())
            .unwrap();
        assert!(matches!(
            plan_surfaces(&overlapping),
            Err(GuidemeshError::MeshGeneration(_))
        ));
    }

    #[test]
    fn geo_script_for_example_waveguide() {
        let (regions, policy, options) = example_inputs();
        let geo = build_geo(&regions, &policy, &options).unwrap();

        assert_eq!(geo.lines().filter(|l| l.starts_with("Point(")).count(), 40);
        assert_eq!(geo.lines().filter(|l| l.starts_with("Line(")).count(), 40);
        assert!(geo.contains("Curve Loop(1) = { 1, 2, 3, 4 };"));
        assert!(geo.contains("Plane Surface(1) = { 1 };"));
        assert!(geo.contains("Plane Surface(2) = { 2, 1 };"));
        assert!(geo.contains("Physical Surface(\"core\", 1) = { 1 };"));
        assert!(geo.contains("Physical Surface(\"clad\", 2) = { 2 };"));
        assert!(geo.contains("Field[1] = Distance;"));
        assert!(geo.contains("Field[2].SizeMin = 0.03;"));
        assert!(geo.contains("Field[2].SizeMax = 10;"));
        assert!(geo.contains("Field[2].DistMax = 0.1;"));
        assert!(geo.contains("Field[4].SurfacesList = { 1 };"));
        assert!(geo.contains("Field[5].FieldsList = { 2, 4 };"));
        assert!(geo.contains("Background Field = 5;"));
        assert!(geo.contains("Mesh.MeshSizeMax = 10;"));
        assert!(geo.contains("Mesh.MshFileVersion = 4.1;"));
    }

    #[test]
    fn geo_script_without_policy_has_no_background_field() {
        let (regions, _, options) = example_inputs();
        let geo = build_geo(&regions, &ResolutionPolicy::new(), &options).unwrap();
        assert!(!geo.contains("Field["));
        assert!(!geo.contains("Background Field"));
    }

    #[test]
    fn geo_script_rejects_bad_policy() {
        let (regions, _, options) = example_inputs();
        let mut policy = ResolutionPolicy::new();
        policy.insert("box", ResolutionSpec::new(0.1, 0.1)).unwrap();
        assert!(build_geo(&regions, &policy, &options).is_err());
        assert!(build_geo(&RegionMap::new(), &ResolutionPolicy::new(), &options).is_err());
    }

    #[test]
    fn parses_msh41_fixture() {
        let mesh = parse_mesh(FIXTURE).unwrap();
        assert_eq!(mesh.num_nodes(), 5);
        assert_eq!(mesh.num_elements(), 3);

        // node tag 1 was listed last in its block
        assert_eq!(mesh.nodes[3], Vertex::new(0.0, 0.0));
        assert_eq!(mesh.elements[0].nodes, [3, 2, 1]);

        assert_eq!(mesh.region_names(), vec!["core", "clad"]);
        assert_eq!(mesh.elements_in("core").unwrap(), &[0, 1]);
        assert_eq!(mesh.elements_in("clad").unwrap(), &[2]);
        assert!((mesh.region_area("core").unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn rejects_broken_mesh_files() {
        let binary = FIXTURE.replace("4.1 0 8", "4.1 1 8");
        let old = FIXTURE.replace("4.1 0 8", "2.2 0 8");
        let quads = FIXTURE.replace("2 2 2 1\n3 3 2 5", "2 2 3 1\n3 3 2 5 1");
        let unknown_node = FIXTURE.replace("3 3 2 5", "3 3 2 9");
        let truncated = &FIXTURE[..FIXTURE.find("$EndElements").unwrap()];

        for broken in [binary.as_str(), old.as_str(), quads.as_str(), unknown_node.as_str(), truncated] {
            assert!(matches!(
                parse_mesh(broken),
                Err(GuidemeshError::MeshGeneration(_))
            ));
        }
        assert!(parse_mesh("$Nodes\n0 0 0 0\n$EndNodes\n").is_err());
    }

    #[test]
    fn missing_gmsh_is_a_mesh_generation_error() {
        let (regions, policy, mut options) = example_inputs();
        options.gmsh = PathBuf::from("/nonexistent/gmsh-binary");
        let result = mesh_regions(&regions, &policy, &options);
        assert!(matches!(result, Err(GuidemeshError::MeshGeneration(_))));
    }

    #[test]
    fn loading_missing_file_fails() {
        let result = Mesh::load(Path::new("/nonexistent/mesh.msh"));
        assert!(matches!(result, Err(GuidemeshError::MeshGeneration(_))));
    }

    #[test]
    fn touching_regions_fail() {
        let mut side_by_side = RegionMap::new();
        side_by_side
            .insert(
                "left",
                Polygon::rectangle(Vertex::new(0.0, 0.0), Vertex::new(1.0, 1.0)).unwrap(),
            )
            .unwrap();
        side_by_side
            .insert(
                "right",
                Polygon::rectangle(Vertex::new(1.0, 0.0), Vertex::new(2.0, 0.5)).unwrap(),
            )
            .unwrap();
        assert!(matches!(
            plan_surfaces(&side_by_side),
            Err(GuidemeshError::MeshGeneration(_))
        ));

        let mut flush = RegionMap::new();
        flush
            .insert(
                "core",
                Polygon::rectangle(Vertex::new(0.0, 0.25), Vertex::new(0.5, 0.75)).unwrap(),
            )
            .unwrap();
        flush
            .insert(
                "clad",
                Polygon::rectangle(Vertex::new(0.0, 0.0), Vertex::new(1.0, 1.0)).unwrap(),
            )
            .unwrap();
        assert!(matches!(
            plan_surfaces(&flush),
            Err(GuidemeshError::MeshGeneration(_))
        ));
    }

    #[test]
    fn compute_mesh_leaves_neighbouring_files_alone() {
        let (regions, policy, mut options) = example_inputs();
        options.gmsh = PathBuf::from("/nonexistent/gmsh-binary");

        let dir = tempfile::tempdir().unwrap();
        let user_geo = dir.path().join("waveguide.geo");
        std::fs::write(&user_geo, "// hand written\n").unwrap();

        let result = compute_mesh(&regions, &policy, &options, &dir.path().join("waveguide.msh"));
        assert!(result.is_err());
        assert_eq!(
            std::fs::read_to_string(&user_geo).unwrap(),
            "// hand written\n"
        );
    }

    fn entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[test]
    fn workspace_is_removed_after_failure() {
        let (regions, policy, mut options) = example_inputs();
        options.gmsh = PathBuf::from("/nonexistent/gmsh-binary");

        let parent = tempfile::tempdir().unwrap();
        let result = mesh_regions_in(parent.path(), &regions, &policy, &options);
        assert!(matches!(result, Err(GuidemeshError::MeshGeneration(_))));
        assert_eq!(entries(parent.path()), 0);
    }

    /// Stands in for gmsh by copying a prepared mesh to the `-o` target
    #[cfg(unix)]
    fn fake_gmsh(dir: &Path) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let fixture = dir.join("fixture.msh");
        std::fs::write(&fixture, FIXTURE).unwrap();
        let script = dir.join("fake-gmsh");
        std::fs::write(
            &script,
            format!("#!/bin/sh\ncp '{}' \"$6\"\n", fixture.display()),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    #[cfg(unix)]
    #[test]
    fn workspace_is_removed_after_success() {
        let (regions, policy, mut options) = example_inputs();
        let tools = tempfile::tempdir().unwrap();
        options.gmsh = fake_gmsh(tools.path());

        let parent = tempfile::tempdir().unwrap();
        let mesh = mesh_regions_in(parent.path(), &regions, &policy, &options).unwrap();
        assert_eq!(mesh.num_elements(), 3);
        assert_eq!(entries(parent.path()), 0);
    }
}
