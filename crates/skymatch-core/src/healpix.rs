//! # HEALPix Sky Pixelization
//!
//! Equal-area hierarchical tessellation of the sphere, NESTED scheme.
//!
//! The sphere is split into 12 base faces; each face into `nside × nside`
//! pixels addressed by bit-interleaved (x, y) face coordinates. Pixel ids are
//! `u64` in `[0, 12·nside²)`.
//!
//! Only what catalog matching needs is implemented:
//! - position → pixel
//! - pixel → center position
//! - the 8 (or 7) neighbours of a pixel
//! - inclusive disc queries
//! - NESTED → RING conversion for RING-ordered localization maps

use crate::primitives::{FOUR_PI, MAX_NSIDE};
use crate::{MatchError, SkyPosition};
use std::collections::{BTreeSet, VecDeque};
use std::f64::consts::{FRAC_PI_2, FRAC_PI_4, PI};

// =============================================================================
// FACE GEOMETRY TABLES
// =============================================================================

/// Ring index (in units of nside) of the southernmost corner of each face.
const JRLL: [i64; 12] = [2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4];

/// Longitude index (in units of π/4) of the center of each face.
const JPLL: [i64; 12] = [1, 3, 5, 7, 0, 2, 4, 6, 1, 3, 5, 7];

/// Neighbour offsets, ordered SW, W, NW, N, NE, E, SE, S.
const X_OFFSET: [i64; 8] = [-1, -1, 0, 1, 1, 1, 0, -1];
const Y_OFFSET: [i64; 8] = [0, 1, 1, 1, 0, -1, -1, -1];

/// Face reached when leaving `face` across an edge or corner.
///
/// Row index is `4 + dx + 3·dy` where dx/dy ∈ {-1, 0, 1} mark the overflow
/// direction; -1 means no face touches that corner.
const FACE_ARRAY: [[i8; 12]; 9] = [
    [8, 9, 10, 11, -1, -1, -1, -1, 10, 11, 8, 9],
    [5, 6, 7, 4, 8, 9, 10, 11, 9, 10, 11, 8],
    [-1, -1, -1, -1, 5, 6, 7, 4, -1, -1, -1, -1],
    [4, 5, 6, 7, 11, 8, 9, 10, 11, 8, 9, 10],
    [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11],
    [1, 2, 3, 0, 0, 1, 2, 3, 5, 6, 7, 4],
    [-1, -1, -1, -1, 7, 4, 5, 6, -1, -1, -1, -1],
    [3, 0, 1, 2, 3, 0, 1, 2, 4, 5, 6, 7],
    [2, 3, 0, 1, -1, -1, -1, -1, 0, 1, 2, 3],
];

/// Coordinate transform when crossing into the neighbour face, per face row
/// (north, equator, south). Bit 1 flips x, bit 2 flips y, bit 4 swaps x/y.
const SWAP_ARRAY: [[u8; 3]; 9] = [
    [0, 0, 3],
    [0, 0, 6],
    [0, 0, 0],
    [0, 0, 5],
    [0, 0, 0],
    [5, 0, 0],
    [0, 0, 0],
    [6, 0, 0],
    [3, 0, 0],
];

// =============================================================================
// BIT INTERLEAVING
// =============================================================================

fn spread_bits(v: u64) -> u64 {
    let mut x = v & 0xFFFF_FFFF;
    x = (x | (x << 16)) & 0x0000_FFFF_0000_FFFF;
    x = (x | (x << 8)) & 0x00FF_00FF_00FF_00FF;
    x = (x | (x << 4)) & 0x0F0F_0F0F_0F0F_0F0F;
    x = (x | (x << 2)) & 0x3333_3333_3333_3333;
    (x | (x << 1)) & 0x5555_5555_5555_5555
}

fn compress_bits(v: u64) -> u64 {
    let mut x = v & 0x5555_5555_5555_5555;
    x = (x | (x >> 1)) & 0x3333_3333_3333_3333;
    x = (x | (x >> 2)) & 0x0F0F_0F0F_0F0F_0F0F;
    x = (x | (x >> 4)) & 0x00FF_00FF_00FF_00FF;
    x = (x | (x >> 8)) & 0x0000_FFFF_0000_FFFF;
    (x | (x >> 16)) & 0x0000_0000_FFFF_FFFF
}

// =============================================================================
// HEALPIX GRID
// =============================================================================

/// A NESTED HEALPix grid of fixed resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Healpix {
    nside: u32,
    order: u32,
}

impl Healpix {
    /// Create a grid. `nside` must be a power of two in `[1, 2^29]`.
    pub fn new(nside: u32) -> Result<Self, MatchError> {
        if nside == 0 || !nside.is_power_of_two() || nside > MAX_NSIDE {
            return Err(MatchError::Config(format!(
                "nside must be a power of two in [1, {MAX_NSIDE}], got {nside}"
            )));
        }
        Ok(Self {
            nside,
            order: nside.trailing_zeros(),
        })
    }

    #[must_use]
    pub fn nside(&self) -> u32 {
        self.nside
    }

    /// Number of pixels, `12·nside²`.
    #[must_use]
    pub fn npix(&self) -> u64 {
        let n = u64::from(self.nside);
        12 * n * n
    }

    /// Solid angle of one pixel in steradians.
    #[must_use]
    pub fn pixel_area_sr(&self) -> f64 {
        FOUR_PI / self.npix() as f64
    }

    /// Characteristic pixel size (square root of the pixel area) in radians.
    #[must_use]
    pub fn resolution_rad(&self) -> f64 {
        self.pixel_area_sr().sqrt()
    }

    /// Characteristic pixel size in arcseconds.
    #[must_use]
    pub fn resolution_arcsec(&self) -> f64 {
        self.resolution_rad().to_degrees() * 3600.0
    }

    /// Whether `pixel` is a valid id on this grid.
    #[must_use]
    pub fn contains(&self, pixel: u64) -> bool {
        pixel < self.npix()
    }

    // -------------------------------------------------------------------------
    // Position <-> pixel
    // -------------------------------------------------------------------------

    /// Pixel containing `pos`.
    #[must_use]
    pub fn pixel_of(&self, pos: &SkyPosition) -> u64 {
        let z = pos.dec.to_radians().sin();
        let phi = pos.ra.to_radians();
        let (ix, iy, face) = self.loc_to_xyf(z, phi);
        self.xyf_to_nest(ix, iy, face)
    }

    /// Center of `pixel`.
    #[must_use]
    pub fn pixel_center(&self, pixel: u64) -> SkyPosition {
        let (ix, iy, face) = self.nest_to_xyf(pixel);
        let n = f64::from(self.nside);
        face_point(
            (ix as f64 + 0.5) / n,
            (iy as f64 + 0.5) / n,
            face,
        )
    }

    /// Largest angular distance (radians) from the center of `pixel` to any
    /// of its four corners.
    #[must_use]
    pub fn pixel_max_radius(&self, pixel: u64) -> f64 {
        let (ix, iy, face) = self.nest_to_xyf(pixel);
        let n = f64::from(self.nside);
        let center = self.pixel_center(pixel);
        [(0.0, 0.0), (1.0, 0.0), (0.0, 1.0), (1.0, 1.0)]
            .iter()
            .map(|(dx, dy)| {
                let corner = face_point((ix as f64 + dx) / n, (iy as f64 + dy) / n, face);
                center.separation_rad(&corner)
            })
            .fold(0.0, f64::max)
    }

    fn loc_to_xyf(&self, z: f64, phi: f64) -> (i64, i64, usize) {
        let nside = i64::from(self.nside);
        let n = f64::from(self.nside);
        let za = z.abs();
        let tt = (phi / FRAC_PI_2).rem_euclid(4.0);

        if za <= 2.0 / 3.0 {
            // Equatorial belt: the pixel is bounded by ascending and
            // descending edge lines.
            let temp1 = n * (0.5 + tt);
            let temp2 = n * (z * 0.75);
            let jp = (temp1 - temp2) as i64;
            let jm = (temp1 + temp2) as i64;
            let ifp = jp >> self.order;
            let ifm = jm >> self.order;
            let face = if ifp == ifm {
                ifp | 4
            } else if ifp < ifm {
                ifp
            } else {
                ifm + 8
            };
            let ix = jm & (nside - 1);
            let iy = nside - (jp & (nside - 1)) - 1;
            (ix, iy, face as usize)
        } else {
            // Polar caps.
            let ntt = (tt as i64).min(3);
            let tp = tt - ntt as f64;
            let tmp = n * (3.0 * (1.0 - za)).sqrt();
            let jp = ((tp * tmp) as i64).min(nside - 1);
            let jm = (((1.0 - tp) * tmp) as i64).min(nside - 1);
            if z >= 0.0 {
                (nside - jm - 1, nside - jp - 1, ntt as usize)
            } else {
                (jp, jm, (ntt + 8) as usize)
            }
        }
    }

    fn xyf_to_nest(&self, ix: i64, iy: i64, face: usize) -> u64 {
        ((face as u64) << (2 * self.order))
            + spread_bits(ix as u64)
            + (spread_bits(iy as u64) << 1)
    }

    fn nest_to_xyf(&self, pixel: u64) -> (i64, i64, usize) {
        let face = (pixel >> (2 * self.order)) as usize;
        let n = u64::from(self.nside);
        let local = pixel & (n * n - 1);
        (
            compress_bits(local) as i64,
            compress_bits(local >> 1) as i64,
            face,
        )
    }

    // -------------------------------------------------------------------------
    // Neighbourhood
    // -------------------------------------------------------------------------

    /// The pixels sharing an edge or a corner with `pixel`, in SW, W, NW, N,
    /// NE, E, SE, S order. `None` where no pixel exists (7-neighbour corners
    /// of the equatorial faces).
    #[must_use]
    pub fn neighbors(&self, pixel: u64) -> [Option<u64>; 8] {
        let (ix, iy, face) = self.nest_to_xyf(pixel);
        let nside = i64::from(self.nside);
        let mut result = [None; 8];

        let interior = ix > 0 && ix < nside - 1 && iy > 0 && iy < nside - 1;
        for m in 0..8 {
            let mut x = ix + X_OFFSET[m];
            let mut y = iy + Y_OFFSET[m];
            if interior {
                result[m] = Some(self.xyf_to_nest(x, y, face));
                continue;
            }

            let mut nbnum = 4usize;
            if x < 0 {
                x += nside;
                nbnum -= 1;
            } else if x >= nside {
                x -= nside;
                nbnum += 1;
            }
            if y < 0 {
                y += nside;
                nbnum -= 3;
            } else if y >= nside {
                y -= nside;
                nbnum += 3;
            }

            let target = FACE_ARRAY[nbnum][face];
            if target < 0 {
                continue;
            }
            let bits = SWAP_ARRAY[nbnum][face >> 2];
            if bits & 1 != 0 {
                x = nside - x - 1;
            }
            if bits & 2 != 0 {
                y = nside - y - 1;
            }
            if bits & 4 != 0 {
                std::mem::swap(&mut x, &mut y);
            }
            result[m] = Some(self.xyf_to_nest(x, y, target as usize));
        }
        result
    }

    /// `pixel` followed by its existing neighbours.
    #[must_use]
    pub fn pixel_with_neighbors(&self, pixel: u64) -> Vec<u64> {
        let mut out = Vec::with_capacity(9);
        out.push(pixel);
        out.extend(self.neighbors(pixel).into_iter().flatten());
        out
    }

    /// Every pixel that overlaps the disc of `radius_rad` around `center`.
    ///
    /// Inclusive: a pixel is kept when its center lies within the radius
    /// plus the pixel's own center-to-corner extent, so the result may hold
    /// a few pixels that only come close to the disc.
    #[must_use]
    pub fn query_disc(&self, center: &SkyPosition, radius_rad: f64) -> BTreeSet<u64> {
        if radius_rad >= PI {
            return (0..self.npix()).collect();
        }

        let start = self.pixel_of(center);
        let mut found = BTreeSet::new();
        let mut visited = BTreeSet::new();
        let mut queue = VecDeque::new();
        visited.insert(start);
        queue.push_back(start);

        while let Some(pixel) = queue.pop_front() {
            let distance = center.separation_rad(&self.pixel_center(pixel));
            if distance > radius_rad + self.pixel_max_radius(pixel) {
                continue;
            }
            found.insert(pixel);
            for neighbor in self.neighbors(pixel).into_iter().flatten() {
                if visited.insert(neighbor) {
                    queue.push_back(neighbor);
                }
            }
        }
        found
    }

    // -------------------------------------------------------------------------
    // Ordering conversion
    // -------------------------------------------------------------------------

    /// RING-scheme id of a NESTED pixel.
    #[must_use]
    pub fn nest_to_ring(&self, pixel: u64) -> u64 {
        let (ix, iy, face) = self.nest_to_xyf(pixel);
        let nside = i64::from(self.nside);
        let ring = JRLL[face] * nside - ix - iy - 1;

        let ncap = 2 * nside * (nside - 1);
        let npix = 12 * nside * nside;
        let (start, ring_pixels, shifted) = if ring < nside {
            (2 * ring * (ring - 1), 4 * ring, true)
        } else if ring < 3 * nside {
            (
                ncap + (ring - nside) * 4 * nside,
                4 * nside,
                ((ring - nside) & 1) == 0,
            )
        } else {
            let nr = 4 * nside - ring;
            (npix - 2 * nr * (nr + 1), 4 * nr, true)
        };

        let nr = ring_pixels >> 2;
        let kshift = i64::from(!shifted);
        let mut jp = (JPLL[face] * nr + ix - iy + 1 + kshift) / 2;
        if jp < 1 {
            jp += 4 * nside;
        }
        (start + jp - 1) as u64
    }
}

/// Position of the point at fractional face coordinates `(x, y)` ∈ [0, 1]².
fn face_point(x: f64, y: f64, face: usize) -> SkyPosition {
    let jr = JRLL[face] as f64 - x - y;
    let (nr, z) = if jr < 1.0 {
        (jr, 1.0 - jr * jr / 3.0)
    } else if jr > 3.0 {
        let nr = 4.0 - jr;
        (nr, nr * nr / 3.0 - 1.0)
    } else {
        (1.0, (2.0 - jr) * 2.0 / 3.0)
    };

    let mut tmp = JPLL[face] as f64 * nr + x - y;
    if tmp < 0.0 {
        tmp += 8.0;
    }
    if tmp >= 8.0 {
        tmp -= 8.0;
    }
    let phi = if nr < 1e-15 {
        0.0
    } else {
        FRAC_PI_4 * tmp / nr
    };

    let mut ra = phi.to_degrees().rem_euclid(360.0);
    if ra >= 360.0 {
        ra -= 360.0;
    }
    SkyPosition {
        ra,
        dec: z.clamp(-1.0, 1.0).asin().to_degrees(),
    }
}

// =============================================================================
// TESTS
// =============================================================================
