use std::f64::consts::{FRAC_PI_2, PI, TAU};

use nalgebra::Vector2;

use crate::{
    datatypes::Vertex,
    error::{GuidemeshError, Result},
};

/// Coordinates closer than this are treated as the same point
pub const TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min: Vertex,
    pub max: Vertex,
}

impl BoundingBox {
    pub fn width(&self) -> f64 {
        self.max.x - self.min.x
    }

    pub fn height(&self) -> f64 {
        self.max.y - self.min.y
    }

    pub fn center(&self) -> Vertex {
        Vertex::new(
            0.5 * (self.min.x + self.max.x),
            0.5 * (self.min.y + self.max.y),
        )
    }
}

/// How two polygons sit relative to each other
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Disjoint,
    /// The first polygon covers the second (boundaries may touch)
    Contains,
    /// The first polygon lies inside the second
    Within,
    /// Interiors intersect but neither covers the other
    Overlaps,
}

/// A simple polygon stored counter-clockwise without a closing vertex
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    vertices: Vec<Vertex>,
}

fn signed_area(points: &[Vertex]) -> f64 {
    let n = points.len();
    let mut sum = 0.0;
    for i in 0..n {
        let j = (i + 1) % n;
        sum += points[i].x * points[j].y - points[j].x * points[i].y;
    }
    sum * 0.5
}

fn cross(o: &Vertex, a: &Vertex, b: &Vertex) -> f64 {
    (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
}

/// True when segments `ab` and `cd` cross at a point interior to both
fn segments_cross(a: &Vertex, b: &Vertex, c: &Vertex, d: &Vertex) -> bool {
    let d1 = cross(a, b, c);
    let d2 = cross(a, b, d);
    let d3 = cross(c, d, a);
    let d4 = cross(c, d, b);

    ((d1 > TOLERANCE && d2 < -TOLERANCE) || (d1 < -TOLERANCE && d2 > TOLERANCE))
        && ((d3 > TOLERANCE && d4 < -TOLERANCE) || (d3 < -TOLERANCE && d4 > TOLERANCE))
}

fn distance_to_segment(p: &Vertex, a: &Vertex, b: &Vertex) -> f64 {
    let ab = b - a;
    let len_sq = ab.norm_squared();
    if len_sq < TOLERANCE * TOLERANCE {
        return (p - a).norm();
    }
    let t = ((p - a).dot(&ab) / len_sq).clamp(0.0, 1.0);
    (p - (a + ab * t)).norm()
}

/// Outward unit normal of a counter-clockwise edge
fn outward_normal(from: &Vertex, to: &Vertex) -> Vector2<f64> {
    let d = to - from;
    Vector2::new(d.y, -d.x).normalize()
}

fn check_factor(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(GuidemeshError::Geometry(format!(
            "{name} must be a positive number, got {value}"
        )));
    }
    Ok(())
}

impl Polygon {
    /// Builds a polygon from an ordered boundary
    ///
    /// Consecutive duplicates and a repeated closing vertex are dropped and
    /// the ring is reoriented counter-clockwise.
    ///
    /// # Arguments
    /// * `vertices` - The boundary coordinates, in either orientation
    pub fn new(vertices: Vec<Vertex>) -> Result<Polygon> {
        if let Some(bad) = vertices
            .iter()
            .find(|v| !v.x.is_finite() || !v.y.is_finite())
        {
            return Err(GuidemeshError::Geometry(format!(
                "non-finite polygon vertex ({}, {})",
                bad.x, bad.y
            )));
        }

        let mut ring: Vec<Vertex> = Vec::with_capacity(vertices.len());
        for v in vertices {
            if let Some(last) = ring.last() {
                if (v - last).norm() < TOLERANCE {
                    continue;
                }
            }
            ring.push(v);
        }
        while ring.len() > 1 && (ring[0] - ring[ring.len() - 1]).norm() < TOLERANCE {
            ring.pop();
        }

        if ring.len() < 3 {
            return Err(GuidemeshError::Geometry(format!(
                "polygon needs at least 3 distinct vertices, got {}",
                ring.len()
            )));
        }

        let area = signed_area(&ring);
        if area.abs() < TOLERANCE {
            return Err(GuidemeshError::Geometry(
                "polygon has zero area".to_owned(),
            ));
        }
        if area < 0.0 {
            ring.reverse();
        }

        Ok(Polygon { vertices: ring })
    }

    /// Axis-aligned rectangle spanning `min` to `max`
    pub fn rectangle(min: Vertex, max: Vertex) -> Result<Polygon> {
        let width = max.x - min.x;
        let height = max.y - min.y;
        if !width.is_finite() || !height.is_finite() || width <= 0.0 || height <= 0.0 {
            return Err(GuidemeshError::Geometry(format!(
                "rectangle from ({}, {}) to ({}, {}) has no positive extent",
                min.x, min.y, max.x, max.y
            )));
        }

        Polygon::new(vec![
            Vertex::new(min.x, min.y),
            Vertex::new(max.x, min.y),
            Vertex::new(max.x, max.y),
            Vertex::new(min.x, max.y),
        ])
    }

    /// Rectangle centred on the origin with the given half-extents
    pub fn centered_box(half_width: f64, half_height: f64) -> Result<Polygon> {
        check_factor("half_width", half_width)?;
        check_factor("half_height", half_height)?;

        Polygon::rectangle(
            Vertex::new(-half_width, -half_height),
            Vertex::new(half_width, half_height),
        )
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Iterates over the boundary edges, including the closing one
    pub fn edges(&self) -> impl Iterator<Item = (&Vertex, &Vertex)> + '_ {
        let n = self.vertices.len();
        (0..n).map(move |i| (&self.vertices[i], &self.vertices[(i + 1) % n]))
    }

    pub fn area(&self) -> f64 {
        signed_area(&self.vertices)
    }

    pub fn bounds(&self) -> BoundingBox {
        let mut min = self.vertices[0];
        let mut max = self.vertices[0];
        for v in &self.vertices[1..] {
            min.x = min.x.min(v.x);
            min.y = min.y.min(v.y);
            max.x = max.x.max(v.x);
            max.y = max.y.max(v.y);
        }
        BoundingBox { min, max }
    }

    pub fn is_convex(&self) -> bool {
        let n = self.vertices.len();
        (0..n).all(|i| {
            cross(
                &self.vertices[i],
                &self.vertices[(i + 1) % n],
                &self.vertices[(i + 2) % n],
            ) >= -TOLERANCE
        })
    }

    /// Point-in-polygon test. Points on the boundary count as inside.
    pub fn contains_point(&self, p: &Vertex) -> bool {
        if self.on_boundary(p) {
            return true;
        }
        self.strictly_contains_point(p)
    }

    fn on_boundary(&self, p: &Vertex) -> bool {
        self.edges()
            .any(|(a, b)| distance_to_segment(p, a, b) < TOLERANCE)
    }

    fn strictly_contains_point(&self, p: &Vertex) -> bool {
        let mut inside = false;
        for (a, b) in self.edges() {
            if (a.y > p.y) != (b.y > p.y) {
                let x_cross = a.x + (p.y - a.y) * (b.x - a.x) / (b.y - a.y);
                if p.x < x_cross {
                    inside = !inside;
                }
            }
        }
        inside && !self.on_boundary(p)
    }

    /// Classifies how `other` sits relative to this polygon
    pub fn relate(&self, other: &Polygon) -> Relation {
        let crossing = self
            .edges()
            .any(|(a, b)| other.edges().any(|(c, d)| segments_cross(a, b, c, d)));
        if crossing {
            return Relation::Overlaps;
        }

        if other.vertices.iter().all(|v| self.contains_point(v)) {
            return Relation::Contains;
        }
        if self.vertices.iter().all(|v| other.contains_point(v)) {
            return Relation::Within;
        }

        let interior_hit = other
            .vertices
            .iter()
            .any(|v| self.strictly_contains_point(v))
            || self
                .vertices
                .iter()
                .any(|v| other.strictly_contains_point(v));
        if interior_hit {
            Relation::Overlaps
        } else {
            Relation::Disjoint
        }
    }

    pub fn contains_polygon(&self, other: &Polygon) -> bool {
        self.relate(other) == Relation::Contains
    }

    pub fn overlaps(&self, other: &Polygon) -> bool {
        self.relate(other) == Relation::Overlaps
    }

    /// True when the two outlines share at least one point
    ///
    /// Shared edge stretches always start or end at a vertex of one of the
    /// polygons, so checking vertices against the other boundary is enough.
    pub fn touches(&self, other: &Polygon) -> bool {
        self.vertices.iter().any(|v| other.on_boundary(v))
            || other.vertices.iter().any(|v| self.on_boundary(v))
    }

    /// Offsets the boundary outward by `distance` with round joins
    ///
    /// # Arguments
    /// * `distance` - The outward offset, zero returns the polygon unchanged
    /// * `resolution` - Number of segments used per quarter circle of a join
    ///
    /// # Returns
    /// The buffered polygon. Only convex polygons are supported.
    pub fn buffer(&self, distance: f64, resolution: usize) -> Result<Polygon> {
        if !distance.is_finite() || distance < 0.0 {
            return Err(GuidemeshError::Geometry(format!(
                "buffer distance must be a non-negative number, got {distance}"
            )));
        }
        if resolution == 0 {
            return Err(GuidemeshError::Geometry(
                "buffer resolution must be at least 1".to_owned(),
            ));
        }
        if distance == 0.0 {
            return Ok(self.clone());
        }
        if !self.is_convex() {
            return Err(GuidemeshError::Geometry(
                "buffering is only supported for convex polygons".to_owned(),
            ));
        }

        let n = self.vertices.len();
        let step = FRAC_PI_2 / resolution as f64;
        let mut ring: Vec<Vertex> = Vec::new();

        for i in 0..n {
            let prev = &self.vertices[(i + n - 1) % n];
            let current = &self.vertices[i];
            let next = &self.vertices[(i + 1) % n];

            let normal_in = outward_normal(prev, current);
            let normal_out = outward_normal(current, next);

            let start = normal_in.y.atan2(normal_in.x);
            let mut sweep = normal_out.y.atan2(normal_out.x) - start;
            if sweep < 0.0 {
                sweep += TAU;
            }
            // collinear vertices can land just below a full turn
            if sweep > PI {
                sweep = 0.0;
            }

            let segments = (sweep / step - 1e-9).ceil().max(0.0) as usize;
            if segments == 0 {
                ring.push(current + normal_in * distance);
                continue;
            }
            for k in 0..=segments {
                let angle = start + sweep * k as f64 / segments as f64;
                ring.push(current + Vector2::new(angle.cos(), angle.sin()) * distance);
            }
        }

        Polygon::new(ring)
    }

    /// Scales about the bounding-box centre
    pub fn scale(&self, xfact: f64, yfact: f64) -> Result<Polygon> {
        self.scale_about(xfact, yfact, self.bounds().center())
    }

    /// Scales each axis independently about `origin`
    pub fn scale_about(&self, xfact: f64, yfact: f64, origin: Vertex) -> Result<Polygon> {
        check_factor("xfact", xfact)?;
        check_factor("yfact", yfact)?;

        Polygon::new(
            self.vertices
                .iter()
                .map(|v| {
                    Vertex::new(
                        origin.x + (v.x - origin.x) * xfact,
                        origin.y + (v.y - origin.y) * yfact,
                    )
                })
                .collect(),
        )
    }

    pub fn translate(&self, dx: f64, dy: f64) -> Result<Polygon> {
        Polygon::new(
            self.vertices
                .iter()
                .map(|v| Vertex::new(v.x + dx, v.y + dy))
                .collect(),
        )
    }
}

/// A named material domain of the cross-section
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub name: String,
    pub polygon: Polygon,
}

/// Regions kept in insertion order. Order decides meshing precedence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegionMap {
    regions: Vec<Region>,
}

impl RegionMap {
    pub fn new() -> RegionMap {
        RegionMap::default()
    }

    pub fn insert(&mut self, name: &str, polygon: Polygon) -> Result<()> {
        if name.trim().is_empty() {
            return Err(GuidemeshError::Input(
                "region name must not be empty".to_owned(),
            ));
        }
        if self.get(name).is_some() {
            return Err(GuidemeshError::Input(format!(
                "region '{name}' is defined more than once"
            )));
        }
        self.regions.push(Region {
            name: name.to_owned(),
            polygon,
        });
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Polygon> {
        self.regions
            .iter()
            .find(|r| r.name == name)
            .map(|r| &r.polygon)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Region> {
        self.regions.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.regions.iter().map(|r| r.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

impl<'a> IntoIterator for &'a RegionMap {
    type Item = &'a Region;
    type IntoIter = std::slice::Iter<'a, Region>;

    fn into_iter(self) -> Self::IntoIter {
        self.regions.iter()
    }
}

/// Shape of a rectangular core with a buffered, squashed cladding
#[derive(Debug, Clone, PartialEq)]
pub struct WaveguideParameters {
    pub core_half_width: f64,
    pub core_half_height: f64,
    pub buffer_distance: f64,
    pub buffer_resolution: usize,
    pub clad_x_scale: f64,
    pub clad_y_scale: f64,
}

impl Default for WaveguideParameters {
    fn default() -> Self {
        WaveguideParameters {
            core_half_width: 0.5,
            core_half_height: 0.17,
            buffer_distance: 5.0,
            buffer_resolution: 8,
            clad_x_scale: 1.0,
            clad_y_scale: 0.3,
        }
    }
}

/// Builds the `core` and `clad` regions of a symmetric waveguide, core first
pub fn symmetric_waveguide(params: &WaveguideParameters) -> Result<RegionMap> {
    let core = Polygon::centered_box(params.core_half_width, params.core_half_height)?;
    let clad = core
        .buffer(params.buffer_distance, params.buffer_resolution)?
        .scale(params.clad_x_scale, params.clad_y_scale)?;

    let mut regions = RegionMap::new();
    regions.insert("core", core)?;
    regions.insert("clad", clad)?;
    Ok(regions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn centered_box_area_is_four_w_h() {
        for (w, h) in [(0.5, 0.17), (1.0, 1.0), (3.25, 0.01), (1e-3, 40.0)] {
            let core = Polygon::centered_box(w, h).unwrap();
            assert_relative_eq!(core.area(), 4.0 * w * h, max_relative = 1e-12);
        }
    }

    #[test]
    fn invalid_extents_are_rejected() {
        for (w, h) in [(0.0, 1.0), (1.0, -0.2), (f64::NAN, 1.0), (1.0, f64::INFINITY)] {
            assert!(matches!(
                Polygon::centered_box(w, h),
                Err(GuidemeshError::Geometry(_))
            ));
        }
    }

    #[test]
    fn new_normalises_orientation_and_closing_vertex() {
        let clockwise = Polygon::new(vec![
            Vertex::new(0.0, 0.0),
            Vertex::new(0.0, 1.0),
            Vertex::new(1.0, 1.0),
            Vertex::new(1.0, 0.0),
            Vertex::new(0.0, 0.0),
        ])
        .unwrap();
        assert_eq!(clockwise.len(), 4);
        assert!(clockwise.area() > 0.0);

        let degenerate = Polygon::new(vec![
            Vertex::new(0.0, 0.0),
            Vertex::new(1.0, 1.0),
            Vertex::new(2.0, 2.0),
        ]);
        assert!(degenerate.is_err());
    }

    #[test]
    fn buffered_box_has_rounded_corners() {
        let (w, h, d) = (0.5, 0.17, 5.0);
        let buffered = Polygon::centered_box(w, h).unwrap().buffer(d, 8).unwrap();

        // 9 points per corner arc
        assert_eq!(buffered.len(), 36);

        let corner_area = 0.5 * d * d * 32.0 * (PI / 16.0).sin();
        let expected = 4.0 * w * h + 2.0 * d * (2.0 * w + 2.0 * h) + corner_area;
        assert_relative_eq!(buffered.area(), expected, max_relative = 1e-9);

        let bounds = buffered.bounds();
        assert_relative_eq!(bounds.width(), 2.0 * (w + d), max_relative = 1e-12);
        assert_relative_eq!(bounds.height(), 2.0 * (h + d), max_relative = 1e-12);
    }

    #[test]
    fn buffer_then_scale_compresses_one_axis() {
        let buffered = Polygon::centered_box(0.5, 0.17)
            .unwrap()
            .buffer(5.0, 8)
            .unwrap();
        let clad = buffered.scale(1.0, 0.3).unwrap();

        let before = buffered.bounds();
        let after = clad.bounds();
        assert_relative_eq!(after.width(), before.width(), max_relative = 1e-12);
        assert_relative_eq!(after.height(), 0.3 * before.height(), max_relative = 1e-12);
        assert_relative_eq!(after.center().y, before.center().y, epsilon = 1e-12);
    }

    #[test]
    fn buffer_edge_cases() {
        let core = Polygon::centered_box(1.0, 1.0).unwrap();
        assert_eq!(core.buffer(0.0, 8).unwrap(), core);
        assert!(core.buffer(-1.0, 8).is_err());
        assert!(core.buffer(1.0, 0).is_err());

        let notch = Polygon::new(vec![
            Vertex::new(0.0, 0.0),
            Vertex::new(2.0, 0.0),
            Vertex::new(2.0, 2.0),
            Vertex::new(1.0, 1.0),
            Vertex::new(0.0, 2.0),
        ])
        .unwrap();
        assert!(!notch.is_convex());
        assert!(matches!(
            notch.buffer(0.5, 4),
            Err(GuidemeshError::Geometry(_))
        ));
    }

    #[test]
    fn scale_about_explicit_origin() {
        let unit = Polygon::rectangle(Vertex::new(0.0, 0.0), Vertex::new(1.0, 1.0)).unwrap();
        let scaled = unit.scale_about(2.0, 3.0, Vertex::origin()).unwrap();
        let bounds = scaled.bounds();
        assert_relative_eq!(bounds.max.x, 2.0);
        assert_relative_eq!(bounds.max.y, 3.0);
        assert!(unit.scale(0.0, 1.0).is_err());
    }

    #[test]
    fn relations_between_polygons() {
        let outer = Polygon::centered_box(2.0, 2.0).unwrap();
        let inner = Polygon::centered_box(1.0, 1.0).unwrap();
        let shifted = inner.translate(1.5, 0.0).unwrap();
        let far = inner.translate(10.0, 0.0).unwrap();

        assert_eq!(outer.relate(&inner), Relation::Contains);
        assert_eq!(inner.relate(&outer), Relation::Within);
        assert_eq!(outer.relate(&shifted), Relation::Overlaps);
        assert_eq!(outer.relate(&far), Relation::Disjoint);
        assert!(outer.contains_polygon(&inner));
        assert!(outer.overlaps(&shifted));

        assert!(outer.contains_point(&Vertex::new(2.0, 0.0)));
        assert!(!outer.contains_point(&Vertex::new(2.1, 0.0)));
    }

    #[test]
    fn touching_outlines() {
        let unit = Polygon::rectangle(Vertex::new(0.0, 0.0), Vertex::new(1.0, 1.0)).unwrap();
        let neighbour =
            Polygon::rectangle(Vertex::new(1.0, 0.0), Vertex::new(2.0, 0.5)).unwrap();
        let flush_inside =
            Polygon::rectangle(Vertex::new(0.0, 0.25), Vertex::new(0.5, 0.75)).unwrap();
        let inside =
            Polygon::rectangle(Vertex::new(0.25, 0.25), Vertex::new(0.75, 0.75)).unwrap();

        assert_eq!(unit.relate(&neighbour), Relation::Disjoint);
        assert!(unit.touches(&neighbour));
        assert!(neighbour.touches(&unit));
        assert_eq!(unit.relate(&flush_inside), Relation::Contains);
        assert!(unit.touches(&flush_inside));
        assert!(!unit.touches(&inside));
        assert!(!unit.touches(&unit.translate(5.0, 0.0).unwrap()));
    }

    #[test]
    fn region_map_keeps_insertion_order() {
        let regions = symmetric_waveguide(&WaveguideParameters::default()).unwrap();
        assert_eq!(regions.names(), vec!["core", "clad"]);
        let ordered: Vec<&str> = regions.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(ordered, vec!["core", "clad"]);

        let core = regions.get("core").unwrap();
        let clad = regions.get("clad").unwrap();
        assert!(clad.contains_polygon(core));
    }

    #[test]
    fn region_map_rejects_duplicates() {
        let mut regions = RegionMap::new();
        regions
            .insert("core", Polygon::centered_box(1.0, 1.0).unwrap())
            .unwrap();
        let again = regions.insert("core", Polygon::centered_box(2.0, 2.0).unwrap());
        assert!(matches!(again, Err(GuidemeshError::Input(_))));
        assert_eq!(regions.len(), 1);
    }
}
