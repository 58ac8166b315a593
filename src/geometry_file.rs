use quick_xml::Reader;
use quick_xml::events::Event;
use std::path::Path;

use crate::error::{Error, Result};

/// Polygon features read from a vector geometry file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeometryFeatures {
    /// Outer boundary of each polygon feature, as `(lon, lat)` pairs.
    pub polygons: Vec<Vec<(f64, f64)>>,
    /// Coordinate reference system identifier, e.g. `EPSG:4326`.
    pub crs: Option<String>,
}

/// Reads polygon features from a geometry file.
pub trait GeometryReader {
    fn read(&self, path: &Path) -> Result<GeometryFeatures>;
}

/// KML is parsed natively; Shapefile and GeoPackage go through GDAL when the
/// `gdal` feature is enabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultGeometryReader;

impl GeometryReader for DefaultGeometryReader {
    fn read(&self, path: &Path) -> Result<GeometryFeatures> {
        match extension(path).as_deref() {
            Some("kml") => read_kml(path),
            Some("shp") | Some("gpkg") => read_with_gdal(path),
            _ => Err(Error::UnsupportedFileFormat(path.to_path_buf())),
        }
    }
}

pub(crate) fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

pub fn read_kml(path: &Path) -> Result<GeometryFeatures> {
    let text = std::fs::read_to_string(path)?;
    parse_kml(&text)
}

/// Collects the outer boundary of every `<Polygon>` in a KML document.
pub fn parse_kml(text: &str) -> Result<GeometryFeatures> {
    let mut reader = Reader::from_str(text);
    reader.trim_text(true);

    let mut polygons = Vec::new();
    let mut in_polygon = false;
    let mut in_outer = false;
    let mut in_coords = false;
    let mut coords = String::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"Polygon" => in_polygon = true,
                b"outerBoundaryIs" => in_outer = in_polygon,
                b"coordinates" => {
                    in_coords = in_outer;
                    coords.clear();
                }
                _ => {}
            },
            Event::End(e) => match e.local_name().as_ref() {
                b"Polygon" => in_polygon = false,
                b"outerBoundaryIs" => in_outer = false,
                b"coordinates" => {
                    if in_coords {
                        polygons.push(parse_kml_coordinates(&coords)?);
                    }
                    in_coords = false;
                }
                _ => {}
            },
            Event::Text(t) if in_coords => coords.push_str(&t.unescape()?),
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(GeometryFeatures {
        polygons,
        // KML coordinates are always WGS84 lon/lat.
        crs: Some("EPSG:4326".to_string()),
    })
}

fn parse_kml_coordinates(text: &str) -> Result<Vec<(f64, f64)>> {
    text.split_whitespace()
        .map(|tuple| {
            let mut parts = tuple.split(',');
            let lon = parts.next().and_then(|v| v.trim().parse::<f64>().ok());
            let lat = parts.next().and_then(|v| v.trim().parse::<f64>().ok());
            match (lon, lat) {
                (Some(lon), Some(lat)) => Ok((lon, lat)),
                _ => Err(Error::Geometry(format!("malformed KML coordinate `{}`", tuple))),
            }
        })
        .collect()
}

#[cfg(feature = "gdal")]
fn read_with_gdal(path: &Path) -> Result<GeometryFeatures> {
    use gdal::Dataset;
    use gdal::vector::{Geometry, LayerAccess};

    fn outer_ring(geom: &Geometry) -> Vec<(f64, f64)> {
        match geom.geometry_name().as_str() {
            "POLYGON" if geom.geometry_count() > 0 => geom
                .get_geometry(0)
                .get_point_vec()
                .into_iter()
                .map(|(x, y, _)| (x, y))
                .collect(),
            "MULTIPOLYGON" if geom.geometry_count() > 0 => outer_ring(&geom.get_geometry(0)),
            _ => Vec::new(),
        }
    }

    let gdal_err = |e: gdal::errors::GdalError| Error::Geometry(e.to_string());
    let dataset = Dataset::open(path).map_err(gdal_err)?;
    let mut layer = dataset.layer(0).map_err(gdal_err)?;
    let crs = layer
        .spatial_ref()
        .and_then(|srs| srs.auth_code().ok())
        .map(|code| format!("EPSG:{}", code));

    let polygons = layer
        .features()
        .filter_map(|feature| feature.geometry().map(outer_ring))
        .filter(|ring| !ring.is_empty())
        .collect();

    Ok(GeometryFeatures { polygons, crs })
}

#[cfg(not(feature = "gdal"))]
fn read_with_gdal(path: &Path) -> Result<GeometryFeatures> {
    Err(Error::Geometry(format!(
        "reading {} requires the `gdal` cargo feature",
        path.display()
    )))
}
