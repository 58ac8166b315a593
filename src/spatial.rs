//! Spatial constraints.
//!
//! A [`SpatialExtent`] is either a bounding box or a closed polygon, validated
//! once at construction and rendered on demand into the search dialect
//! ([`SpatialExtent::to_cmr_format`]), the subsetting dialect
//! ([`SpatialExtent::to_subsetter_format`]) or a GeoJSON shape for the async
//! job backend ([`SpatialExtent::to_geojson`]).

use geo::orient::{Direction, Orient};
use geo::{LineString, Polygon, SimplifyVwPreserve};
use serde::Deserialize;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::geometry_file::{DefaultGeometryReader, GeometryReader, extension};
use crate::util::fmt_coord;

/// Longitude jump between consecutive polygon vertices above which the
/// polygon is taken to cross the antimeridian.
const DATELINE_JUMP_DEG: f64 = 270.0;

/// Polygon simplification tolerance (degrees), bounding request size.
const SIMPLIFY_TOLERANCE_DEG: f64 = 0.05;

const SUPPORTED_FILE_EXTENSIONS: [&str; 3] = ["kml", "shp", "gpkg"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtentKind {
    BoundingBox,
    Polygon,
}

/// Raw spatial input, as it may arrive from configuration or JSON.
///
/// Deserialization picks the first matching shape: a 4-number list is a
/// bounding box, a list of `[lon, lat]` pairs or a flat list of alternating
/// lon/lat values is a polygon, a string is a geometry file path.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum SpatialInput {
    BoundingBox([f64; 4]),
    Pairs(Vec<(f64, f64)>),
    Flat(Vec<f64>),
    File(PathBuf),
}

impl SpatialInput {
    pub fn from_json(value: &Value) -> Result<Self> {
        serde_json::from_value(value.clone())
            .map_err(|_| Error::UnrecognizedExtentShape(value.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpatialExtent {
    kind: ExtentKind,
    // BoundingBox: [(minlon, minlat), (maxlon, maxlat)]. Polygon: closed ring.
    coordinates: Vec<(f64, f64)>,
    source_file: Option<PathBuf>,
    crosses_dateline: bool,
}

impl SpatialExtent {
    /// Dispatches to the constructor matching the input's shape.
    pub fn from_input(input: SpatialInput, xdateline: Option<bool>) -> Result<Self> {
        match input {
            SpatialInput::BoundingBox(bbox) => Self::from_bbox(bbox, xdateline),
            SpatialInput::Pairs(pairs) => Self::from_polygon_pairs(&pairs, xdateline),
            SpatialInput::Flat(values) => Self::from_polygon_flat(&values, xdateline),
            SpatialInput::File(path) => Self::from_file(path, xdateline),
        }
    }

    /// `[minlon, minlat, maxlon, maxlat]`. `minlon > maxlon` is read as a box
    /// crossing the antimeridian unless `xdateline` says otherwise.
    pub fn from_bbox(bbox: [f64; 4], xdateline: Option<bool>) -> Result<Self> {
        let [minlon, minlat, maxlon, maxlat] = bbox;
        validate_pairs(&[(minlon, minlat), (maxlon, maxlat)])?;

        if minlat > maxlat {
            return Err(Error::InvalidBoundingBox(format!(
                "lower-left latitude {} is greater than upper-right latitude {}",
                minlat, maxlat
            )));
        }

        let detected = minlon > maxlon;
        if detected {
            if minlon - 360.0 > maxlon {
                return Err(Error::InvalidBoundingBox(format!(
                    "longitudes {} and {} do not describe a box crossing the dateline",
                    minlon, maxlon
                )));
            }
            if xdateline == Some(false) {
                return Err(Error::InvalidBoundingBox(format!(
                    "lower-left longitude {} is greater than upper-right longitude {} but dateline crossing was disabled",
                    minlon, maxlon
                )));
            }
            if xdateline.is_none() {
                log::warn!(
                    "bounding box {:?} has minlon > maxlon and is interpreted as crossing the dateline; pass xdateline = Some(true) to confirm",
                    bbox
                );
            }
        }

        Ok(Self {
            kind: ExtentKind::BoundingBox,
            coordinates: vec![(minlon, minlat), (maxlon, maxlat)],
            source_file: None,
            crosses_dateline: xdateline.unwrap_or(detected),
        })
    }

    /// Polygon from `(lon, lat)` vertices; closed automatically if needed.
    pub fn from_polygon_pairs(pairs: &[(f64, f64)], xdateline: Option<bool>) -> Result<Self> {
        Self::polygon(pairs.to_vec(), None, xdateline)
    }

    /// Polygon from a flat `[lon1, lat1, lon2, lat2, ...]` list.
    pub fn from_polygon_flat(values: &[f64], xdateline: Option<bool>) -> Result<Self> {
        if values.len() % 2 != 0 {
            return Err(Error::OddCoordinateCount(values.len()));
        }
        let pairs: Vec<(f64, f64)> = values.chunks_exact(2).map(|c| (c[0], c[1])).collect();
        Self::polygon(pairs, None, xdateline)
    }

    /// Polygon from the first feature of a `.kml`, `.shp` or `.gpkg` file.
    pub fn from_file(path: impl AsRef<Path>, xdateline: Option<bool>) -> Result<Self> {
        Self::from_file_with(path, &DefaultGeometryReader, xdateline)
    }

    pub fn from_file_with(
        path: impl AsRef<Path>,
        reader: &dyn GeometryReader,
        xdateline: Option<bool>,
    ) -> Result<Self> {
        let path = path.as_ref();
        match extension(path) {
            Some(ext) if SUPPORTED_FILE_EXTENSIONS.contains(&ext.as_str()) => {}
            _ => return Err(Error::UnsupportedFileFormat(path.to_path_buf())),
        }
        if !path.exists() {
            return Err(Error::FileNotFound(path.to_path_buf()));
        }

        let features = reader.read(path)?;
        if let Some(crs) = features.crs.as_deref() {
            if !is_wgs84(crs) {
                log::warn!(
                    "{} uses CRS {}; coordinates are assumed to be WGS84 degrees",
                    path.display(),
                    crs
                );
            }
        }

        let count = features.polygons.len();
        let first = features.polygons.into_iter().next().ok_or_else(|| {
            Error::Geometry(format!("no polygon features in {}", path.display()))
        })?;
        if count > 1 {
            log::warn!(
                "{} contains {} polygon features; only the first one is used",
                path.display(),
                count
            );
        }

        Self::polygon(first, Some(path.to_path_buf()), xdateline)
    }

    fn polygon(
        mut pairs: Vec<(f64, f64)>,
        source_file: Option<PathBuf>,
        xdateline: Option<bool>,
    ) -> Result<Self> {
        if pairs.len() < 4 {
            return Err(Error::TooFewVertices(pairs.len()));
        }
        validate_pairs(&pairs)?;

        if pairs.first() != pairs.last() {
            log::warn!("polygon is not closed; appending the first vertex to close it");
            pairs.push(pairs[0]);
        }

        let detected = Self::check_dateline(ExtentKind::Polygon, &pairs);
        if detected && xdateline.is_none() {
            log::warn!(
                "polygon has consecutive vertices more than {} degrees apart in longitude and is interpreted as crossing the dateline; pass xdateline = Some(true) to confirm",
                DATELINE_JUMP_DEG
            );
        }

        Ok(Self {
            kind: ExtentKind::Polygon,
            coordinates: pairs,
            source_file,
            crosses_dateline: xdateline.unwrap_or(detected),
        })
    }

    /// Dateline heuristic: a box with `minlon > maxlon`, or a polygon with a
    /// longitude jump above 270 degrees between consecutive vertices.
    pub fn check_dateline(kind: ExtentKind, coordinates: &[(f64, f64)]) -> bool {
        match kind {
            ExtentKind::BoundingBox => match coordinates {
                [(minlon, _), (maxlon, _), ..] => minlon > maxlon,
                _ => false,
            },
            ExtentKind::Polygon => coordinates
                .windows(2)
                .any(|w| (w[1].0 - w[0].0).abs() > DATELINE_JUMP_DEG),
        }
    }

    pub fn kind(&self) -> ExtentKind {
        self.kind
    }

    pub fn coordinates(&self) -> &[(f64, f64)] {
        &self.coordinates
    }

    pub fn source_file(&self) -> Option<&Path> {
        self.source_file.as_deref()
    }

    pub fn crosses_dateline(&self) -> bool {
        self.crosses_dateline
    }

    /// `[minlon, minlat, maxlon, maxlat]` for bounding boxes.
    pub fn bounds(&self) -> Option<[f64; 4]> {
        match (self.kind, self.coordinates.as_slice()) {
            (ExtentKind::BoundingBox, [(minlon, minlat), (maxlon, maxlat)]) => {
                Some([*minlon, *minlat, *maxlon, *maxlat])
            }
            _ => None,
        }
    }

    pub fn to_cmr_format(&self) -> String {
        let values: Vec<f64> = match self.bounds() {
            Some(bbox) => bbox.to_vec(),
            None => self
                .oriented_ring()
                .into_iter()
                .flat_map(|(lon, lat)| [lon, lat])
                .collect(),
        };
        values.into_iter().map(fmt_coord).collect::<Vec<_>>().join(",")
    }

    pub fn to_subsetter_format(&self) -> String {
        match self.kind {
            ExtentKind::BoundingBox => self.to_cmr_format(),
            ExtentKind::Polygon => {
                let ring = ring_json(&self.oriented_ring());
                json!({
                    "type": "FeatureCollection",
                    "features": [{
                        "type": "Feature",
                        "properties": {},
                        "geometry": { "type": "Polygon", "coordinates": [ring] },
                    }],
                })
                .to_string()
                .replace(char::is_whitespace, "")
            }
        }
    }

    /// GeoJSON geometry for shape uploads. Boxes crossing the dateline are
    /// split into a two-part MultiPolygon at the antimeridian.
    pub fn to_geojson(&self) -> String {
        let geometry = match self.bounds() {
            Some([minlon, minlat, maxlon, maxlat]) if self.crosses_dateline => json!({
                "type": "MultiPolygon",
                "coordinates": [
                    [ring_json(&box_ring(minlon, minlat, 180.0, maxlat))],
                    [ring_json(&box_ring(-180.0, minlat, maxlon, maxlat))],
                ],
            }),
            Some([minlon, minlat, maxlon, maxlat]) => json!({
                "type": "Polygon",
                "coordinates": [ring_json(&box_ring(minlon, minlat, maxlon, maxlat))],
            }),
            None => json!({
                "type": "Polygon",
                "coordinates": [ring_json(&self.oriented_ring())],
            }),
        };
        geometry.to_string()
    }

    /// Exterior ring, simplified and counter-clockwise. Dateline-crossing
    /// rings are processed in the [0, 360) domain.
    fn oriented_ring(&self) -> Vec<(f64, f64)> {
        let shift = self.crosses_dateline;
        let ring: Vec<(f64, f64)> = self
            .coordinates
            .iter()
            .map(|&(lon, lat)| {
                if shift && lon < 0.0 {
                    (lon + 360.0, lat)
                } else {
                    (lon, lat)
                }
            })
            .collect();

        // Visvalingam-Whyatt thresholds on triangle area.
        let polygon = Polygon::new(LineString::from(ring), vec![])
            .simplify_vw_preserve(&(SIMPLIFY_TOLERANCE_DEG * SIMPLIFY_TOLERANCE_DEG))
            .orient(Direction::Default);

        polygon
            .exterior()
            .coords()
            .map(|c| {
                if shift && c.x > 180.0 {
                    (c.x - 360.0, c.y)
                } else {
                    (c.x, c.y)
                }
            })
            .collect()
    }
}

fn validate_pairs(pairs: &[(f64, f64)]) -> Result<()> {
    for (index, &(lon, lat)) in pairs.iter().enumerate() {
        if !(-90.0..=90.0).contains(&lat) {
            return Err(Error::InvalidLatitude { value: lat, index });
        }
        if !(-180.0..=180.0).contains(&lon) {
            return Err(Error::InvalidLongitude { value: lon, index });
        }
    }
    Ok(())
}

fn is_wgs84(crs: &str) -> bool {
    let crs = crs.to_ascii_uppercase();
    crs.contains("4326") || crs.contains("CRS84") || crs.contains("WGS84") || crs.contains("WGS 84")
}

fn box_ring(minlon: f64, minlat: f64, maxlon: f64, maxlat: f64) -> Vec<(f64, f64)> {
    vec![
        (minlon, minlat),
        (maxlon, minlat),
        (maxlon, maxlat),
        (minlon, maxlat),
        (minlon, minlat),
    ]
}

fn ring_json(ring: &[(f64, f64)]) -> Value {
    Value::Array(ring.iter().map(|&(lon, lat)| json!([lon, lat])).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry_file::GeometryFeatures;

    const CLOSED: [(f64, f64); 5] = [(-55.0, 68.0), (-55.0, 71.0), (-48.0, 71.0), (-48.0, 68.0), (-55.0, 68.0)];

    fn signed_area(flat: &str) -> f64 {
        let v: Vec<f64> = flat.split(',').map(|s| s.parse().unwrap()).collect();
        let pts: Vec<(f64, f64)> = v.chunks(2).map(|c| (c[0], c[1])).collect();
        pts.windows(2).map(|w| w[0].0 * w[1].1 - w[1].0 * w[0].1).sum::<f64>() / 2.0
    }

    #[test]
    fn bbox_renders_verbatim() {
        let ext = SpatialExtent::from_bbox([-55.0, 68.0, -48.0, 71.0], None).unwrap();
        assert_eq!(ext.kind(), ExtentKind::BoundingBox);
        assert!(!ext.crosses_dateline());
        assert_eq!(ext.to_cmr_format(), "-55,68,-48,71");
        assert_eq!(ext.to_subsetter_format(), "-55,68,-48,71");
    }

    #[test]
    fn bbox_bounds_are_checked() {
        assert!(matches!(
            SpatialExtent::from_bbox([-55.0, 91.0, -48.0, 92.0], None),
            Err(Error::InvalidLatitude { value, index: 0 }) if value == 91.0
        ));
        assert!(matches!(
            SpatialExtent::from_bbox([-55.0, 68.0, 181.0, 71.0], None),
            Err(Error::InvalidLongitude { index: 1, .. })
        ));
        assert!(matches!(
            SpatialExtent::from_bbox([-55.0, 71.0, -48.0, 68.0], None),
            Err(Error::InvalidBoundingBox(_))
        ));
    }

    #[test]
    fn bbox_with_inverted_longitudes_crosses_dateline() {
        let ext = SpatialExtent::from_bbox([170.0, -70.0, -170.0, -60.0], None).unwrap();
        assert!(ext.crosses_dateline());
        assert_eq!(ext.to_cmr_format(), "170,-70,-170,-60");

        let confirmed = SpatialExtent::from_bbox([170.0, -70.0, -170.0, -60.0], Some(true)).unwrap();
        assert!(confirmed.crosses_dateline());

        assert!(matches!(
            SpatialExtent::from_bbox([170.0, -70.0, -170.0, -60.0], Some(false)),
            Err(Error::InvalidBoundingBox(_))
        ));
    }

    #[test]
    fn dateline_box_geojson_is_split() {
        let ext = SpatialExtent::from_bbox([170.0, -70.0, -170.0, -60.0], Some(true)).unwrap();
        let geo: Value = serde_json::from_str(&ext.to_geojson()).unwrap();
        assert_eq!(geo["type"], "MultiPolygon");
        assert_eq!(geo["coordinates"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn closed_polygon_is_kept() {
        let ext = SpatialExtent::from_polygon_pairs(&CLOSED, None).unwrap();
        assert_eq!(ext.coordinates().len(), 5);
        assert_eq!(ext.coordinates(), &CLOSED);
    }

    #[test]
    fn open_polygon_is_closed_once() {
        let ext = SpatialExtent::from_polygon_pairs(&CLOSED[..4], None).unwrap();
        assert_eq!(ext.coordinates(), &CLOSED);

        let again = SpatialExtent::from_polygon_pairs(ext.coordinates(), None).unwrap();
        assert_eq!(again.coordinates().len(), 5);
    }

    #[test]
    fn flat_polygon_matches_pairs() {
        let flat = [-55.0, 68.0, -55.0, 71.0, -48.0, 71.0, -48.0, 68.0];
        let ext = SpatialExtent::from_polygon_flat(&flat, None).unwrap();
        assert_eq!(ext.coordinates(), &CLOSED);

        assert!(matches!(
            SpatialExtent::from_polygon_flat(&flat[..7], None),
            Err(Error::OddCoordinateCount(7))
        ));
        assert!(matches!(
            SpatialExtent::from_polygon_flat(&flat[..6], None),
            Err(Error::TooFewVertices(3))
        ));
    }

    #[test]
    fn polygon_cmr_ring_is_counter_clockwise_and_closed() {
        let ext = SpatialExtent::from_polygon_pairs(&CLOSED, None).unwrap();
        let cmr = ext.to_cmr_format();
        let values: Vec<&str> = cmr.split(',').collect();
        assert_eq!(values.len(), 10);
        assert_eq!(&values[..2], &values[8..]);
        assert!(signed_area(&cmr) > 0.0);
    }

    #[test]
    fn dense_polygons_are_simplified_and_stay_closed() {
        let ellipse: Vec<(f64, f64)> = (0..2000)
            .map(|i| {
                let t = i as f64 / 2000.0 * std::f64::consts::TAU;
                (-50.0 + 10.0 * t.cos(), 70.0 + 5.0 * t.sin())
            })
            .collect();
        let ext = SpatialExtent::from_polygon_pairs(&ellipse, None).unwrap();
        assert_eq!(ext.coordinates().len(), 2001);

        let cmr = ext.to_cmr_format();
        let values: Vec<&str> = cmr.split(',').collect();
        let vertices = values.len() / 2;
        assert!(vertices >= 4 && vertices < 2001, "{vertices} vertices");
        assert_eq!(&values[..2], &values[values.len() - 2..]);
        assert!(signed_area(&cmr) > 0.0);

        let shape: Value = serde_json::from_str(&ext.to_subsetter_format()).unwrap();
        let ring = shape["features"][0]["geometry"]["coordinates"][0].as_array().unwrap();
        assert_eq!(ring.len(), vertices);
    }

    #[test]
    fn polygon_subsetter_format_is_compact_geojson() {
        let ext = SpatialExtent::from_polygon_pairs(&CLOSED, None).unwrap();
        let shape = ext.to_subsetter_format();
        assert!(!shape.contains(' '));
        let parsed: Value = serde_json::from_str(&shape).unwrap();
        let ring = &parsed["features"][0]["geometry"]["coordinates"][0];
        assert_eq!(ring.as_array().unwrap().len(), 5);
    }

    #[test]
    fn polygon_dateline_heuristic() {
        let pairs = [(175.0, -70.0), (-175.0, -70.0), (-175.0, -65.0), (175.0, -65.0)];
        let ext = SpatialExtent::from_polygon_pairs(&pairs, None).unwrap();
        assert!(ext.crosses_dateline());

        // Rendering shifts through [0, 360) and back.
        let cmr = ext.to_cmr_format();
        for lon in cmr.split(',').step_by(2) {
            let lon: f64 = lon.parse().unwrap();
            assert!((-180.0..=180.0).contains(&lon));
        }

        let overridden = SpatialExtent::from_polygon_pairs(&pairs, Some(false)).unwrap();
        assert!(!overridden.crosses_dateline());

        let wide = [(-100.0, 10.0), (100.0, 10.0), (100.0, 20.0), (-100.0, 20.0)];
        assert!(!SpatialExtent::check_dateline(ExtentKind::Polygon, &wide));
    }

    #[test]
    fn input_shapes_dispatch() {
        let bbox = SpatialInput::from_json(&json!([-55, 68, -48, 71])).unwrap();
        assert_eq!(bbox, SpatialInput::BoundingBox([-55.0, 68.0, -48.0, 71.0]));

        let pairs = SpatialInput::from_json(&json!([[-55, 68], [-55, 71], [-48, 71], [-48, 68]])).unwrap();
        assert!(matches!(pairs, SpatialInput::Pairs(ref p) if p.len() == 4));

        let flat = SpatialInput::from_json(&json!([-55, 68, -55, 71, -48, 71, -48, 68])).unwrap();
        assert!(matches!(flat, SpatialInput::Flat(ref v) if v.len() == 8));

        let file = SpatialInput::from_json(&json!("area.kml")).unwrap();
        assert_eq!(file, SpatialInput::File(PathBuf::from("area.kml")));

        assert!(matches!(
            SpatialInput::from_json(&json!({"west": -55})),
            Err(Error::UnrecognizedExtentShape(_))
        ));
    }

    #[test]
    fn file_checks_extension_then_existence() {
        assert!(matches!(
            SpatialExtent::from_file("area.geojson", None),
            Err(Error::UnsupportedFileFormat(_))
        ));
        assert!(matches!(
            SpatialExtent::from_file("/nonexistent/area.kml", None),
            Err(Error::FileNotFound(_))
        ));
    }

    struct TwoFeatures;

    impl GeometryReader for TwoFeatures {
        fn read(&self, _path: &Path) -> Result<GeometryFeatures> {
            Ok(GeometryFeatures {
                polygons: vec![CLOSED[..4].to_vec(), vec![(0.0, 0.0), (0.0, 1.0), (1.0, 1.0), (0.0, 0.0)]],
                crs: Some("EPSG:4326".to_string()),
            })
        }
    }

    #[test]
    fn file_uses_first_feature_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("areas.shp");
        std::fs::write(&path, b"").unwrap();

        let ext = SpatialExtent::from_file_with(&path, &TwoFeatures, None).unwrap();
        assert_eq!(ext.coordinates(), &CLOSED);
        assert_eq!(ext.source_file(), Some(path.as_path()));
        // Simplification keeps a simple box intact.
        assert_eq!(ext.to_cmr_format().split(',').count(), 10);
    }
}
