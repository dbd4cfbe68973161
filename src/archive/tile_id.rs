//! Tile coordinate to tile id mapping
//!
//! Tile ids enumerate the whole pyramid: all tiles of zoom 0, then zoom 1, and
//! so on, with tiles inside a zoom level ordered along a Hilbert curve.

use crate::models::TileCoord;

/// Deepest zoom level whose ids fit in a `u64`
pub const MAX_ZOOM: u8 = 31;

/// Number of tiles in all zoom levels below `z`
fn tiles_before_zoom(z: u8) -> u64 {
    // sum of 4^i for i in 0..z == (4^z - 1) / 3
    ((1u64 << (2 * z as u32)) - 1) / 3
}

/// Tile id for a coordinate, or `None` when the coordinate is outside the
/// pyramid (`z > 31` or `x`/`y` not below `2^z`)
pub fn zxy_to_tile_id(coord: TileCoord) -> Option<u64> {
    if coord.z > MAX_ZOOM {
        return None;
    }
    let n = 1u64 << coord.z;
    let (mut x, mut y) = (coord.x as u64, coord.y as u64);
    if x >= n || y >= n {
        return None;
    }

    let mut d = 0u64;
    let mut s = n / 2;
    while s > 0 {
        let rx = u64::from(x & s > 0);
        let ry = u64::from(y & s > 0);
        d += s * s * ((3 * rx) ^ ry);
        rotate(s, &mut x, &mut y, rx, ry);
        s /= 2;
    }

    Some(tiles_before_zoom(coord.z) + d)
}

/// Quadrant rotation; `x`/`y` keep their high bits, so the reflection wraps
fn rotate(n: u64, x: &mut u64, y: &mut u64, rx: u64, ry: u64) {
    if ry == 0 {
        if rx == 1 {
            *x = (n - 1).wrapping_sub(*x);
            *y = (n - 1).wrapping_sub(*y);
        }
        std::mem::swap(x, y);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn id(z: u8, x: u32, y: u32) -> u64 {
        zxy_to_tile_id(TileCoord::new(z, x, y)).unwrap()
    }

    #[test]
    fn test_known_ids() {
        assert_eq!(id(0, 0, 0), 0);
        assert_eq!(id(1, 0, 0), 1);
        assert_eq!(id(1, 0, 1), 2);
        assert_eq!(id(1, 1, 1), 3);
        assert_eq!(id(1, 1, 0), 4);
        assert_eq!(id(2, 0, 0), 5);
    }

    #[test]
    fn test_reference_ids_at_deeper_zooms() {
        // The curve starts at (0, 0) and ends at (2^z - 1, 0)
        assert_eq!(id(3, 0, 0), 21);
        assert_eq!(id(3, 7, 0), 84);
        assert_eq!(id(4, 0, 0), 85);
        assert_eq!(id(4, 15, 0), 340);
        assert_eq!(id(5, 10, 12), 523);
        assert_eq!(id(12, 3423, 1763), 19078479);
    }

    #[test]
    fn test_right_half_coordinates_resolve() {
        // x >= 2^(z-1) takes the reflected quadrant on the first step
        for z in 1..=MAX_ZOOM {
            let n = 1u32 << z;
            assert!(zxy_to_tile_id(TileCoord::new(z, n - 1, 0)).is_some());
            assert!(zxy_to_tile_id(TileCoord::new(z, n - 1, n / 2 - 1)).is_some());
        }
    }

    #[test]
    fn test_ids_fill_their_zoom_level() {
        for z in 0..=4u8 {
            let n = 1u32 << z;
            let start = tiles_before_zoom(z);
            let ids: HashSet<u64> = (0..n)
                .flat_map(|x| (0..n).map(move |y| (x, y)))
                .map(|(x, y)| id(z, x, y))
                .collect();
            assert_eq!(ids.len() as u64, (n as u64) * (n as u64));
            assert!(ids.iter().all(|&i| i >= start && i < start + (n as u64) * (n as u64)));
        }
    }

    #[test]
    fn test_out_of_bounds() {
        assert!(zxy_to_tile_id(TileCoord::new(1, 2, 0)).is_none());
        assert!(zxy_to_tile_id(TileCoord::new(3, 0, 8)).is_none());
        assert!(zxy_to_tile_id(TileCoord::new(32, 0, 0)).is_none());
    }

    #[test]
    fn test_max_zoom_does_not_overflow() {
        let max = (1u32 << MAX_ZOOM) - 1;
        assert!(zxy_to_tile_id(TileCoord::new(MAX_ZOOM, max, max)).is_some());
    }
}
