//! Local meter-scale math, through the UTM projection.

use utm::{
    lat_lon_to_zone_number, lat_to_zone_letter, to_utm_wgs84,
    wsg84_utm_to_lat_lon,
};

/// A geodetic point projected onto its UTM zone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalPoint {
    pub easting: f64,
    pub northing: f64,
    zone: u8,
    letter: char,
}

pub fn project(latitude_deg: f64, longitude_deg: f64) -> LocalPoint {
    let zone = lat_lon_to_zone_number(latitude_deg, longitude_deg);
    let letter = lat_to_zone_letter(latitude_deg).unwrap_or('N');
    let (northing, easting, _convergence) =
        to_utm_wgs84(latitude_deg, longitude_deg, zone);
    LocalPoint {
        easting,
        northing,
        zone,
        letter,
    }
}

pub fn unproject(point: LocalPoint) -> Option<(f64, f64)> {
    wsg84_utm_to_lat_lon(
        point.easting,
        point.northing,
        point.zone,
        point.letter,
    )
    .ok()
}

/// Euclidean distance in meters between two points, in the projection of
/// the first. Only meaningful at local scale.
pub fn distance_m(
    lat1_deg: f64,
    lon1_deg: f64,
    lat2_deg: f64,
    lon2_deg: f64,
) -> f64 {
    let a = project(lat1_deg, lon1_deg);
    let b = project(lat2_deg, lon2_deg);
    let de = a.easting - b.easting;
    let dn = a.northing - b.northing;
    (de * de + dn * dn).sqrt()
}

/// Step `distance_m` along `heading_deg` (0 = north, clockwise) and return
/// the resulting latitude and longitude.
pub fn offset(
    latitude_deg: f64,
    longitude_deg: f64,
    heading_deg: f64,
    distance_m: f64,
) -> Option<(f64, f64)> {
    let mut point = project(latitude_deg, longitude_deg);
    let heading = heading_deg.to_radians();
    point.easting += heading.sin() * distance_m;
    point.northing += heading.cos() * distance_m;
    unproject(point)
}
