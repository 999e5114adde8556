//! Route encodings: the provider's precision-5 encoded polyline, and the
//! `lat,lng;lat,lng` list synthesized in fallback mode.

use crate::models::courier::GeoPoint;

const PRECISION: f64 = 1e5;

/// Decodes either encoding. Encoded polylines never contain `,` so its presence
/// selects the delimited form.
pub fn decode_route(route: &str) -> Option<Vec<GeoPoint>> {
    let trimmed = route.trim();
    if trimmed.is_empty() {
        return None;
    }

    if trimmed.contains(',') {
        decode_delimited(trimmed)
    } else {
        decode_polyline(trimmed)
    }
}

pub fn encode_delimited(points: &[GeoPoint]) -> String {
    points
        .iter()
        .map(|point| format!("{:.6},{:.6}", point.lat, point.lng))
        .collect::<Vec<_>>()
        .join(";")
}

pub fn decode_delimited(route: &str) -> Option<Vec<GeoPoint>> {
    route
        .split(';')
        .filter(|pair| !pair.trim().is_empty())
        .map(|pair| {
            let (lat, lng) = pair.split_once(',')?;
            Some(GeoPoint {
                lat: lat.trim().parse().ok()?,
                lng: lng.trim().parse().ok()?,
            })
        })
        .collect()
}

pub fn decode_polyline(encoded: &str) -> Option<Vec<GeoPoint>> {
    let bytes = encoded.as_bytes();
    let mut index = 0;
    let mut lat: i64 = 0;
    let mut lng: i64 = 0;
    let mut points = Vec::new();

    while index < bytes.len() {
        lat = lat.checked_add(next_value(bytes, &mut index)?)?;
        lng = lng.checked_add(next_value(bytes, &mut index)?)?;
        let point = GeoPoint {
            lat: lat as f64 / PRECISION,
            lng: lng as f64 / PRECISION,
        };
        if !(-90.0..=90.0).contains(&point.lat) || !(-180.0..=180.0).contains(&point.lng) {
            return None;
        }
        points.push(point);
    }

    Some(points)
}

pub fn encode_polyline(points: &[GeoPoint]) -> String {
    let mut out = String::new();
    let mut prev_lat: i64 = 0;
    let mut prev_lng: i64 = 0;

    for point in points {
        let lat = (point.lat * PRECISION).round() as i64;
        let lng = (point.lng * PRECISION).round() as i64;
        push_value(&mut out, lat - prev_lat);
        push_value(&mut out, lng - prev_lng);
        prev_lat = lat;
        prev_lng = lng;
    }

    out
}

fn next_value(bytes: &[u8], index: &mut usize) -> Option<i64> {
    let mut result: i64 = 0;
    let mut shift = 0;

    loop {
        let byte = *bytes.get(*index)?;
        if !(63..=126).contains(&byte) || shift > 60 {
            return None;
        }
        *index += 1;

        let chunk = (byte - 63) as i64;
        result |= (chunk & 0x1f) << shift;
        shift += 5;

        if chunk < 0x20 {
            break;
        }
    }

    Some(if result & 1 != 0 {
        !(result >> 1)
    } else {
        result >> 1
    })
}

fn push_value(out: &mut String, value: i64) {
    let mut value = if value < 0 { !(value << 1) } else { value << 1 };

    while value >= 0x20 {
        out.push((((0x20 | (value & 0x1f)) + 63) as u8) as char);
        value >>= 5;
    }
    out.push(((value + 63) as u8) as char);
}
