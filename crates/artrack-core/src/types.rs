//! Core geometry and feature types for planar tracking

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};

/// 2-D point in pixel coordinates
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point2f {
    pub x: f32,
    pub y: f32,
}

impl Point2f {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point
    pub fn distance_to(&self, other: &Point2f) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Detected feature point with detector metadata
///
/// `angle` is the dominant orientation in radians (0.0 when the detector
/// does not compute one); `octave` is the pyramid level of detection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct KeyPoint {
    /// Position in reference-image pixels
    pub pt: Point2f,
    /// Detector response strength (used for capping)
    pub response: f32,
    /// Diameter of the meaningful neighborhood
    pub size: f32,
    /// Dominant orientation in radians
    pub angle: f32,
    /// Pyramid octave the keypoint was detected at
    pub octave: i32,
}

impl KeyPoint {
    pub fn new(x: f32, y: f32, response: f32) -> Self {
        Self {
            pt: Point2f::new(x, y),
            response,
            size: 7.0,
            angle: 0.0,
            octave: 0,
        }
    }
}

/// Descriptor element type, fixed for the lifetime of one build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DescriptorKind {
    /// Binary rows compared with Hamming distance
    Binary,
    /// Float rows compared with L2 distance
    Float,
}

impl DescriptorKind {
    /// Stable identifier hashed into the config signature
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Binary => "binary",
            Self::Float => "float",
        }
    }
}

/// Row-major descriptor matrix
///
/// All rows share one element type and one width. For the binary variant
/// `cols` is bytes per row; for the float variant it is floats per row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Descriptors {
    Binary {
        rows: usize,
        cols: usize,
        data: Vec<u8>,
    },
    Float {
        rows: usize,
        cols: usize,
        data: Vec<f32>,
    },
}

impl Descriptors {
    /// Build a binary matrix, validating `data.len() == rows * cols`
    pub fn binary(rows: usize, cols: usize, data: Vec<u8>) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(CoreError::shape(
                format!("{}x{} = {} bytes", rows, cols, rows * cols),
                format!("{} bytes", data.len()),
            ));
        }
        Ok(Self::Binary { rows, cols, data })
    }

    /// Build a float matrix, validating `data.len() == rows * cols`
    pub fn float(rows: usize, cols: usize, data: Vec<f32>) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(CoreError::shape(
                format!("{}x{} = {} floats", rows, cols, rows * cols),
                format!("{} floats", data.len()),
            ));
        }
        Ok(Self::Float { rows, cols, data })
    }

    /// Empty matrix of the given kind and row width
    pub fn empty(kind: DescriptorKind, cols: usize) -> Self {
        match kind {
            DescriptorKind::Binary => Self::Binary {
                rows: 0,
                cols,
                data: Vec::new(),
            },
            DescriptorKind::Float => Self::Float {
                rows: 0,
                cols,
                data: Vec::new(),
            },
        }
    }

    pub fn kind(&self) -> DescriptorKind {
        match self {
            Self::Binary { .. } => DescriptorKind::Binary,
            Self::Float { .. } => DescriptorKind::Float,
        }
    }

    pub fn rows(&self) -> usize {
        match self {
            Self::Binary { rows, .. } | Self::Float { rows, .. } => *rows,
        }
    }

    /// Elements per row (bytes for binary, floats for float)
    pub fn cols(&self) -> usize {
        match self {
            Self::Binary { cols, .. } | Self::Float { cols, .. } => *cols,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows() == 0
    }

    /// Binary row accessor
    ///
    /// # Panics
    /// Panics if the matrix is the float variant or `row` is out of range.
    pub fn binary_row(&self, row: usize) -> &[u8] {
        match self {
            Self::Binary { cols, data, .. } => &data[row * cols..(row + 1) * cols],
            Self::Float { .. } => panic!("binary_row on float descriptors"),
        }
    }

    /// Float row accessor
    ///
    /// # Panics
    /// Panics if the matrix is the binary variant or `row` is out of range.
    pub fn float_row(&self, row: usize) -> &[f32] {
        match self {
            Self::Float { cols, data, .. } => &data[row * cols..(row + 1) * cols],
            Self::Binary { .. } => panic!("float_row on binary descriptors"),
        }
    }

    /// Append one row copied from another matrix of the same shape
    pub fn push_row_from(&mut self, src: &Descriptors, src_row: usize) -> Result<()> {
        if self.kind() != src.kind() || self.cols() != src.cols() {
            return Err(CoreError::shape(
                format!("{:?} cols={}", self.kind(), self.cols()),
                format!("{:?} cols={}", src.kind(), src.cols()),
            ));
        }
        match (self, src) {
            (Descriptors::Binary { rows, cols, data }, Descriptors::Binary { .. }) => {
                data.extend_from_slice(src.binary_row(src_row));
                debug_assert_eq!(data.len(), (*rows + 1) * *cols);
                *rows += 1;
            }
            (Descriptors::Float { rows, cols, data }, Descriptors::Float { .. }) => {
                data.extend_from_slice(src.float_row(src_row));
                debug_assert_eq!(data.len(), (*rows + 1) * *cols);
                *rows += 1;
            }
            _ => unreachable!(),
        }
        Ok(())
    }

    /// New matrix holding the given rows of `self`, in the given order
    pub fn select_rows(&self, indices: &[usize]) -> Descriptors {
        let mut out = Descriptors::empty(self.kind(), self.cols());
        for &i in indices {
            // Shapes match by construction
            out.push_row_from(self, i).unwrap();
        }
        out
    }

    /// Drop all rows past `n` (no-op when `n >= rows`)
    pub fn truncate(&mut self, n: usize) {
        match self {
            Self::Binary { rows, cols, data } => {
                if n < *rows {
                    data.truncate(n * *cols);
                    *rows = n;
                }
            }
            Self::Float { rows, cols, data } => {
                if n < *rows {
                    data.truncate(n * *cols);
                    *rows = n;
                }
            }
        }
    }
}

/// Hamming distance between two binary descriptor rows
#[inline]
pub fn hamming_distance(a: &[u8], b: &[u8]) -> u32 {
    debug_assert_eq!(a.len(), b.len());
    let mut dist = 0u32;
    // Popcount 8 bytes at a time; descriptor widths are byte multiples of 8
    let mut chunks_a = a.chunks_exact(8);
    let mut chunks_b = b.chunks_exact(8);
    for (ca, cb) in chunks_a.by_ref().zip(chunks_b.by_ref()) {
        let xa = u64::from_le_bytes(ca.try_into().unwrap());
        let xb = u64::from_le_bytes(cb.try_into().unwrap());
        dist += (xa ^ xb).count_ones();
    }
    for (&xa, &xb) in chunks_a.remainder().iter().zip(chunks_b.remainder()) {
        dist += (xa ^ xb).count_ones();
    }
    dist
}

/// Squared L2 distance between two float descriptor rows
#[inline]
pub fn l2_squared(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// Four corners of a planar target, ordered `[TL, TR, BR, BL]`
pub type Corners = [Point2f; 4];

/// Reference corners of a `width x height` target image
pub fn reference_corners(width: f32, height: f32) -> Corners {
    [
        Point2f::new(0.0, 0.0),
        Point2f::new(width, 0.0),
        Point2f::new(width, height),
        Point2f::new(0.0, height),
    ]
}

/// True when the ordered quadrilateral is convex and consistently wound:
/// the four signed cross-products of consecutive edge triples share a sign
pub fn quad_is_convex(corners: &Corners) -> bool {
    let mut sign = 0.0f32;
    for i in 0..4 {
        let a = corners[i];
        let b = corners[(i + 1) % 4];
        let c = corners[(i + 2) % 4];
        let cross = (b.x - a.x) * (c.y - b.y) - (b.y - a.y) * (c.x - b.x);
        if cross == 0.0 {
            return false;
        }
        if sign == 0.0 {
            sign = cross.signum();
        } else if cross.signum() != sign {
            return false;
        }
    }
    true
}

/// Shortest edge of the quadrilateral
pub fn quad_min_edge(corners: &Corners) -> f32 {
    (0..4)
        .map(|i| corners[i].distance_to(&corners[(i + 1) % 4]))
        .fold(f32::INFINITY, f32::min)
}

/// Axis-aligned bounding box as `(min_x, min_y, max_x, max_y)`
pub fn quad_bounds(corners: &Corners) -> (f32, f32, f32, f32) {
    let mut min_x = f32::INFINITY;
    let mut min_y = f32::INFINITY;
    let mut max_x = f32::NEG_INFINITY;
    let mut max_y = f32::NEG_INFINITY;
    for c in corners {
        min_x = min_x.min(c.x);
        min_y = min_y.min(c.y);
        max_x = max_x.max(c.x);
        max_y = max_y.max(c.y);
    }
    (min_x, min_y, max_x, max_y)
}

/// Point-in-quadrilateral test for a convex, consistently wound quad
pub fn quad_contains(corners: &Corners, p: Point2f) -> bool {
    let mut sign = 0.0f32;
    for i in 0..4 {
        let a = corners[i];
        let b = corners[(i + 1) % 4];
        let cross = (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x);
        if cross == 0.0 {
            continue;
        }
        if sign == 0.0 {
            sign = cross.signum();
        } else if cross.signum() != sign {
            return false;
        }
    }
    true
}

/// How a per-frame result was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackingMode {
    /// Full feature-based detection
    Detection,
    /// Lucas-Kanade optical-flow tracking
    OpticalFlow,
}

impl TrackingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Detection => "detection",
            Self::OpticalFlow => "optical_flow",
        }
    }
}

/// Per-target, per-frame tracking output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingResult {
    /// Target identifier
    pub target_id: String,
    /// Whether the target was located this frame
    pub success: bool,
    /// Located corners in frame pixels, `[TL, TR, BR, BL]`
    pub corners: Corners,
    /// Confidence in `[0, 1]`
    pub confidence: f32,
    /// Whether this came from detection or optical flow
    pub mode: TrackingMode,
}

#[allow(unused_imports, dead_code, unused_variables)]
#[cfg(test)]
mod tests {
    include!("types_test.rs");
}
