use std::path::Path;

use tracing::warn;

use crate::{
    datatypes::Vertex,
    error::{GuidemeshError, Result},
    geometry::{Polygon, RegionMap},
};

fn parse_number(value: &str, node: &roxmltree::Node) -> Result<f64> {
    value.trim().parse().map_err(|_| {
        GuidemeshError::Input(format!(
            "Non-float value '{value}' in svg element {:?}",
            node.tag_name().name()
        ))
    })
}

/// Resolves the region name of a shape from its id or its parent's id
fn region_id<'a>(node: &roxmltree::Node<'a, '_>) -> Option<&'a str> {
    node.attribute("id")
        .or_else(|| node.parent().and_then(|p| p.attribute("id")))
        .map(str::trim)
}

fn parse_points(node: &roxmltree::Node) -> Result<Vec<Vertex>> {
    let raw = node.attribute("points").ok_or_else(|| {
        GuidemeshError::Input(format!(
            "Error in svg file. No points in {} element",
            node.tag_name().name()
        ))
    })?;

    let coords: Vec<f64> = raw
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(|s| parse_number(s, node))
        .collect::<Result<_>>()?;
    if coords.len() % 2 != 0 {
        return Err(GuidemeshError::Input(format!(
            "Odd number of coordinates in svg element {:?}",
            region_id(node)
        )));
    }

    let mut points: Vec<Vertex> = Vec::with_capacity(coords.len() / 2);
    for pair in coords.chunks_exact(2) {
        // svg y axis points down
        let vertex = Vertex::new(pair[0], -pair[1]);
        if points.contains(&vertex) {
            warn!(
                "duplicate point at ({}, {}) in svg element {:?}",
                vertex.x,
                vertex.y,
                region_id(node)
            );
            continue;
        }
        points.push(vertex);
    }
    Ok(points)
}

fn parse_rect(node: &roxmltree::Node) -> Result<Vec<Vertex>> {
    let coordinate = |name: &str| -> Result<f64> {
        match node.attribute(name) {
            Some(v) => parse_number(v, node),
            None => {
                warn!(
                    "Missing {name} definition in rectangle {:?}. Assuming zero.",
                    region_id(node)
                );
                Ok(0.0)
            }
        }
    };
    let extent = |name: &str| -> Result<f64> {
        match node.attribute(name) {
            Some(v) => parse_number(v, node),
            None => Err(GuidemeshError::Input(format!(
                "Error in svg file. No {name} definition in rectangle {:?}",
                region_id(node)
            ))),
        }
    };

    let x = coordinate("x")?;
    let y = coordinate("y")?;
    let width = extent("width")?;
    let height = extent("height")?;

    Ok(vec![
        Vertex::new(x, -y),
        Vertex::new(x + width, -y),
        Vertex::new(x + width, -y - height),
        Vertex::new(x, -y - height),
    ])
}

/// Parses named regions from svg text
///
/// `polygon`, `polyline` and `rect` elements become regions in document
/// order, named after their id (or their parent's id).
pub fn parse_regions(contents: &str) -> Result<RegionMap> {
    let doc = roxmltree::Document::parse(contents)
        .map_err(|err| GuidemeshError::Input(format!("Error in svg file: {err}")))?;

    let mut regions = RegionMap::new();
    for node in doc.descendants() {
        let points = match node.tag_name().name() {
            "polygon" | "polyline" => parse_points(&node)?,
            "rect" => parse_rect(&node)?,
            _ => continue,
        };

        let name = region_id(&node).ok_or_else(|| {
            GuidemeshError::Input(format!(
                "Error in svg file. Missing id field on {} element",
                node.tag_name().name()
            ))
        })?;
        regions.insert(name, Polygon::new(points)?)?;
    }

    if regions.is_empty() {
        return Err(GuidemeshError::Input(
            "svg file contains no polygon, polyline or rect elements".to_owned(),
        ));
    }

    Ok(regions)
}

/// Loads named regions from an svg drawing
pub fn load_regions(svg_file: &Path) -> Result<RegionMap> {
    let contents = std::fs::read_to_string(svg_file).map_err(|_| {
        GuidemeshError::Input(format!("Unable to open svg file {}", svg_file.display()))
    })?;
    parse_regions(&contents)
}
