//! Obstacle polygons: GeoJSON polygon features whose interiors routings
//! must stay out of.

use std::io::Read;

use geo::{LineString, Polygon};
use geojson::{GeoJson, Value};
use log::debug;

use crate::io::InputError;

/// Reads every polygon feature of the file.
pub fn read_obstacles<R: Read>(mut r: R) -> Result<Vec<Polygon<f64>>, InputError> {
    let mut raw = String::new();
    r.read_to_string(&mut raw)
        .map_err(|e| InputError::malformed("unreadable obstacle file", e.to_string()))?;
    let gj: GeoJson = raw
        .parse()
        .map_err(|e| InputError::malformed("invalid obstacle GeoJSON", format!("{e}")))?;
    let GeoJson::FeatureCollection(fc) = gj else {
        return Err(InputError::malformed(
            "expected a FeatureCollection",
            "obstacle file",
        ));
    };

    let mut out = Vec::new();
    for feature in fc.features {
        let Some(geom) = feature.geometry else {
            continue;
        };
        if let Value::Polygon(rings) = geom.value {
            let mut rings = rings.into_iter().map(|ring| {
                LineString::from(
                    ring.iter()
                        .filter(|c| c.len() >= 2)
                        .map(|c| (c[0], c[1]))
                        .collect::<Vec<_>>(),
                )
            });
            let Some(exterior) = rings.next() else {
                continue;
            };
            out.push(Polygon::new(exterior, rings.collect()));
        }
    }
    debug!("{} obstacle polygons read", out.len());
    Ok(out)
}
