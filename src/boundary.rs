//! Boundary geometry: loading, caching, and the strict-interior test.
//!
//! A boundary is loaded from a GeoJSON resource (or built from a plain
//! longitude/latitude box) and is never mutated afterwards. Each worker owns
//! its own copy through a [`BoundaryCache`], so no geometry is shared across
//! threads.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use geo::{coord, BoundingRect, Contains, Coord, LineString, Point, Polygon, Rect};
use serde_json::Value as JsonValue;

use crate::error::BoundaryLoadError;

// ---------------------------------------------------------------------------
// BoundarySource – where a boundary comes from
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum BoundarySource {
    /// `Polygon`, `MultiPolygon`, `Feature`, `FeatureCollection` or
    /// `GeometryCollection` GeoJSON document.
    GeoJson(PathBuf),
    /// Axis-aligned box in degrees.
    BoundingBox {
        min_lon: f64,
        min_lat: f64,
        max_lon: f64,
        max_lat: f64,
    },
}

impl BoundarySource {
    pub fn bounding_box(
        min_lon: f64,
        min_lat: f64,
        max_lon: f64,
        max_lat: f64,
    ) -> Result<Self, BoundaryLoadError> {
        let all_finite = [min_lon, min_lat, max_lon, max_lat]
            .iter()
            .all(|v| v.is_finite());
        if !all_finite {
            return Err(BoundaryLoadError::InvalidBounds(
                "coordinates must be finite".into(),
            ));
        }
        if min_lon >= max_lon || min_lat >= max_lat {
            return Err(BoundaryLoadError::InvalidBounds(format!(
                "min must be below max (lon {min_lon}..{max_lon}, lat {min_lat}..{max_lat})"
            )));
        }
        Ok(BoundarySource::BoundingBox {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        })
    }

    /// Parse `min_lon,min_lat,max_lon,max_lat`.
    pub fn parse_bbox(s: &str) -> Result<Self, BoundaryLoadError> {
        let parts = s
            .split(',')
            .map(|p| p.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| BoundaryLoadError::InvalidBounds(format!("'{s}': {e}")))?;
        match parts.as_slice() {
            [a, b, c, d] => Self::bounding_box(*a, *b, *c, *d),
            _ => Err(BoundaryLoadError::InvalidBounds(format!(
                "'{s}': expected 4 comma-separated numbers"
            ))),
        }
    }

    pub fn load(&self) -> Result<Boundary, BoundaryLoadError> {
        match self {
            BoundarySource::GeoJson(path) => load_geojson(path),
            BoundarySource::BoundingBox {
                min_lon,
                min_lat,
                max_lon,
                max_lat,
            } => {
                let rect = Rect::new(
                    coord! { x: *min_lon, y: *min_lat },
                    coord! { x: *max_lon, y: *max_lat },
                );
                Ok(Boundary::from_polygons(vec![rect.to_polygon()]))
            }
        }
    }
}

impl fmt::Display for BoundarySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoundarySource::GeoJson(path) => write!(f, "{}", path.display()),
            BoundarySource::BoundingBox {
                min_lon,
                min_lat,
                max_lon,
                max_lat,
            } => write!(f, "bbox({min_lon},{min_lat},{max_lon},{max_lat})"),
        }
    }
}

// ---------------------------------------------------------------------------
// Boundary – immutable polygon set
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Part {
    bounds: Rect<f64>,
    polygon: Polygon<f64>,
}

/// Union of one or more polygons (holes honoured).
#[derive(Debug, Clone)]
pub struct Boundary {
    parts: Vec<Part>,
}

impl Boundary {
    pub fn from_polygons(polygons: Vec<Polygon<f64>>) -> Self {
        let parts = polygons
            .into_iter()
            .filter_map(|polygon| {
                polygon
                    .bounding_rect()
                    .map(|bounds| Part { bounds, polygon })
            })
            .collect();
        Boundary { parts }
    }

    pub fn polygon_count(&self) -> usize {
        self.parts.len()
    }

    /// Strict interior test: a point on an edge or vertex is outside.
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        let point = Point::new(lon, lat);
        self.parts.iter().any(|part| {
            let (min, max) = (part.bounds.min(), part.bounds.max());
            lon >= min.x
                && lon <= max.x
                && lat >= min.y
                && lat <= max.y
                && part.polygon.contains(&point)
        })
    }
}

// ---------------------------------------------------------------------------
// GeoJSON loader
// ---------------------------------------------------------------------------

fn load_geojson(path: &Path) -> Result<Boundary, BoundaryLoadError> {
    let text = std::fs::read_to_string(path).map_err(|e| BoundaryLoadError::Io {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let parse_err = |reason: String| BoundaryLoadError::Parse {
        path: path.to_path_buf(),
        reason,
    };
    let root: JsonValue = serde_json::from_str(&text).map_err(|e| parse_err(e.to_string()))?;

    let mut polygons = Vec::new();
    collect_polygons(&root, &mut polygons).map_err(parse_err)?;

    let boundary = Boundary::from_polygons(polygons);
    if boundary.polygon_count() == 0 {
        return Err(BoundaryLoadError::NoPolygon {
            path: path.to_path_buf(),
        });
    }
    log::debug!(
        "loaded boundary {} ({} polygons)",
        path.display(),
        boundary.polygon_count()
    );
    Ok(boundary)
}

/// Walk a GeoJSON object, collecting every polygonal geometry. Points and
/// lines are skipped.
fn collect_polygons(v: &JsonValue, out: &mut Vec<Polygon<f64>>) -> Result<(), String> {
    let kind = v
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or("object without a 'type' member")?;

    match kind {
        "FeatureCollection" => {
            let features = v
                .get("features")
                .and_then(|f| f.as_array())
                .ok_or("FeatureCollection without 'features' array")?;
            for feature in features {
                collect_polygons(feature, out)?;
            }
        }
        "Feature" => match v.get("geometry") {
            Some(JsonValue::Null) | None => {}
            Some(geometry) => collect_polygons(geometry, out)?,
        },
        "GeometryCollection" => {
            let geometries = v
                .get("geometries")
                .and_then(|g| g.as_array())
                .ok_or("GeometryCollection without 'geometries' array")?;
            for geometry in geometries {
                collect_polygons(geometry, out)?;
            }
        }
        "Polygon" => out.push(polygon_from(coordinates(v)?)?),
        "MultiPolygon" => {
            let polys = coordinates(v)?
                .as_array()
                .ok_or("MultiPolygon coordinates must be an array")?;
            for p in polys {
                out.push(polygon_from(p)?);
            }
        }
        _ => {}
    }
    Ok(())
}

fn coordinates(v: &JsonValue) -> Result<&JsonValue, String> {
    v.get("coordinates")
        .ok_or_else(|| "geometry without 'coordinates'".to_string())
}

fn polygon_from(rings: &JsonValue) -> Result<Polygon<f64>, String> {
    let rings = rings.as_array().ok_or("polygon must be an array of rings")?;
    let mut rings = rings.iter().map(ring_from);
    let exterior = rings.next().ok_or("polygon has no rings")??;
    let interiors = rings.collect::<Result<Vec<_>, _>>()?;
    Ok(Polygon::new(exterior, interiors))
}

fn ring_from(ring: &JsonValue) -> Result<LineString<f64>, String> {
    let positions = ring.as_array().ok_or("ring must be an array of positions")?;
    if positions.len() < 3 {
        return Err(format!("ring has {} positions, need at least 3", positions.len()));
    }
    positions
        .iter()
        .map(|pos| {
            let xy = pos.as_array().filter(|a| a.len() >= 2);
            match xy.map(|a| (a[0].as_f64(), a[1].as_f64())) {
                Some((Some(x), Some(y))) => Ok(Coord { x, y }),
                _ => Err(format!("invalid position {pos}")),
            }
        })
        .collect::<Result<Vec<_>, _>>()
        .map(LineString::from)
}

// ---------------------------------------------------------------------------
// BoundaryCache – one load per worker lifetime
// ---------------------------------------------------------------------------

/// Holds the boundary a worker loaded, so later files reuse it.
///
/// A failed load is cached as well: every task on the worker reports the same
/// error instead of re-reading a resource already known to be bad.
#[derive(Debug, Default)]
pub struct BoundaryCache {
    loaded: Option<(BoundarySource, Result<Arc<Boundary>, BoundaryLoadError>)>,
    loads: usize,
}

impl BoundaryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, source: &BoundarySource) -> Result<Arc<Boundary>, BoundaryLoadError> {
        if let Some((cached, result)) = &self.loaded {
            if cached == source {
                return result.clone();
            }
        }
        let result = source.load().map(Arc::new);
        self.loads += 1;
        self.loaded = Some((source.clone(), result.clone()));
        result
    }

    /// How many times a boundary was actually loaded.
    pub fn loads(&self) -> usize {
        self.loads
    }
}
