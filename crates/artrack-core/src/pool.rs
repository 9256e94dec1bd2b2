//! Memory pool for per-frame buffer reuse
//!
//! The hot path must not allocate: grayscale frames, descriptor matrices and
//! tracked-point vectors are recycled across frames through three
//! independently locked pools. Acquisition is scoped — dropping a handle
//! marks its slot free but keeps the allocation for the next frame.
//!
//! Handles are `!Send`: they must be released on the thread that acquired
//! them.

use crate::types::Point2f;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// Upper bound on slots per pool before acquisitions fall back to
/// non-pooled temporaries
const DEFAULT_SLOTS_PER_POOL: usize = 16;

// ============================================================================
// Frame pool
// ============================================================================

struct FrameSlot {
    /// `Some` while the slot is free; taken by the handle while in use
    buf: Option<Vec<u8>>,
    width: usize,
    height: usize,
    channels: usize,
}

struct FramePoolInner {
    slots: Vec<FrameSlot>,
    max_slots: usize,
}

/// Scoped handle to a pooled (or overflow) frame buffer
pub struct FrameHandle {
    buf: Vec<u8>,
    width: usize,
    height: usize,
    channels: usize,
    /// `None` for non-pooled temporaries
    home: Option<(Arc<Mutex<FramePoolInner>>, usize)>,
    _not_send: PhantomData<*const u8>,
}

impl FrameHandle {
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// True when the buffer came from a pool slot rather than a fresh
    /// allocation
    pub fn is_pooled(&self) -> bool {
        self.home.is_some()
    }
}

impl Deref for FrameHandle {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf
    }
}

impl DerefMut for FrameHandle {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

impl Drop for FrameHandle {
    fn drop(&mut self) {
        if let Some((pool, slot)) = self.home.take() {
            let mut inner = pool.lock();
            inner.slots[slot].buf = Some(std::mem::take(&mut self.buf));
        }
    }
}

// ============================================================================
// Descriptor pool
// ============================================================================

struct DescriptorSlot {
    buf: Option<Vec<u8>>,
    /// Bytes per row the slot was shaped for
    row_bytes: usize,
}

struct DescriptorPoolInner {
    slots: Vec<DescriptorSlot>,
    max_slots: usize,
}

/// Scoped handle to a pooled descriptor byte buffer
///
/// The view spans exactly `rows * row_bytes`; the underlying allocation may
/// be larger and is retained on release.
pub struct DescriptorHandle {
    buf: Vec<u8>,
    rows: usize,
    row_bytes: usize,
    home: Option<(Arc<Mutex<DescriptorPoolInner>>, usize)>,
    _not_send: PhantomData<*const u8>,
}

impl DescriptorHandle {
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn row_bytes(&self) -> usize {
        self.row_bytes
    }

    pub fn is_pooled(&self) -> bool {
        self.home.is_some()
    }
}

impl Deref for DescriptorHandle {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf[..self.rows * self.row_bytes]
    }
}

impl DerefMut for DescriptorHandle {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf[..self.rows * self.row_bytes]
    }
}

impl Drop for DescriptorHandle {
    fn drop(&mut self) {
        if let Some((pool, slot)) = self.home.take() {
            let mut inner = pool.lock();
            inner.slots[slot].buf = Some(std::mem::take(&mut self.buf));
        }
    }
}

// ============================================================================
// Point pool
// ============================================================================

struct PointPoolInner {
    slots: Vec<Option<Vec<Point2f>>>,
    max_slots: usize,
}

/// Scoped handle to a cleared, pre-reserved point vector
pub struct PointHandle {
    pts: Vec<Point2f>,
    home: Option<(Arc<Mutex<PointPoolInner>>, usize)>,
    _not_send: PhantomData<*const u8>,
}

impl PointHandle {
    pub fn is_pooled(&self) -> bool {
        self.home.is_some()
    }
}

impl Deref for PointHandle {
    type Target = Vec<Point2f>;

    fn deref(&self) -> &Vec<Point2f> {
        &self.pts
    }
}

impl DerefMut for PointHandle {
    fn deref_mut(&mut self) -> &mut Vec<Point2f> {
        &mut self.pts
    }
}

impl Drop for PointHandle {
    fn drop(&mut self) {
        if let Some((pool, slot)) = self.home.take() {
            let mut inner = pool.lock();
            inner.slots[slot] = Some(std::mem::take(&mut self.pts));
        }
    }
}

// ============================================================================
// Pool facade
// ============================================================================

/// Per-pool occupancy and byte accounting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Allocated frame slots / currently free
    pub frame_slots: usize,
    pub frame_free: usize,
    /// Allocated descriptor slots / currently free
    pub descriptor_slots: usize,
    pub descriptor_free: usize,
    /// Allocated point slots / currently free
    pub point_slots: usize,
    pub point_free: usize,
    /// Total bytes currently parked in free slots
    pub free_bytes: usize,
}

/// Typed, mutex-guarded pools of reusable image, descriptor and point
/// buffers
///
/// Each resource class has its own lock, so a frame release never contends
/// with a descriptor acquisition.
pub struct MemoryPool {
    frames: Arc<Mutex<FramePoolInner>>,
    descriptors: Arc<Mutex<DescriptorPoolInner>>,
    points: Arc<Mutex<PointPoolInner>>,
}

impl Default for MemoryPool {
    fn default() -> Self {
        Self::new(DEFAULT_SLOTS_PER_POOL)
    }
}

impl MemoryPool {
    /// Create pools holding at most `max_slots` buffers each
    pub fn new(max_slots: usize) -> Self {
        Self {
            frames: Arc::new(Mutex::new(FramePoolInner {
                slots: Vec::new(),
                max_slots,
            })),
            descriptors: Arc::new(Mutex::new(DescriptorPoolInner {
                slots: Vec::new(),
                max_slots,
            })),
            points: Arc::new(Mutex::new(PointPoolInner {
                slots: Vec::new(),
                max_slots,
            })),
        }
    }

    /// Acquire a `width x height x channels` byte buffer
    ///
    /// Reuses a free slot of the same shape when one exists, allocates into
    /// an empty slot otherwise, and falls back to a non-pooled temporary
    /// when the pool is full. Contents of a reused buffer are unspecified.
    pub fn acquire_frame(&self, width: usize, height: usize, channels: usize) -> FrameHandle {
        let len = width * height * channels;
        let mut inner = self.frames.lock();

        if let Some(i) = inner.slots.iter().position(|s| {
            s.buf.is_some() && s.width == width && s.height == height && s.channels == channels
        }) {
            let buf = inner.slots[i].buf.take().unwrap();
            return FrameHandle {
                buf,
                width,
                height,
                channels,
                home: Some((Arc::clone(&self.frames), i)),
                _not_send: PhantomData,
            };
        }

        if inner.slots.len() < inner.max_slots {
            let i = inner.slots.len();
            inner.slots.push(FrameSlot {
                buf: None,
                width,
                height,
                channels,
            });
            return FrameHandle {
                buf: vec![0u8; len],
                width,
                height,
                channels,
                home: Some((Arc::clone(&self.frames), i)),
                _not_send: PhantomData,
            };
        }

        tracing::trace!(width, height, channels, "frame pool full, temporary allocation");
        FrameHandle {
            buf: vec![0u8; len],
            width,
            height,
            channels,
            home: None,
            _not_send: PhantomData,
        }
    }

    /// Acquire a descriptor buffer spanning `rows` rows of `row_bytes` bytes
    ///
    /// Reuses any free slot with matching row width and enough capacity;
    /// the allocation is retained across releases so capacity grows to the
    /// high-water mark and stays there.
    pub fn acquire_descriptors(&self, rows: usize, row_bytes: usize) -> DescriptorHandle {
        let len = rows * row_bytes;
        let mut inner = self.descriptors.lock();

        if let Some(i) = inner.slots.iter().position(|s| {
            s.row_bytes == row_bytes
                && s.buf.as_ref().map(|b| b.capacity() >= len).unwrap_or(false)
        }) {
            let mut buf = inner.slots[i].buf.take().unwrap();
            buf.clear();
            buf.resize(len, 0);
            return DescriptorHandle {
                buf,
                rows,
                row_bytes,
                home: Some((Arc::clone(&self.descriptors), i)),
                _not_send: PhantomData,
            };
        }

        if inner.slots.len() < inner.max_slots {
            let i = inner.slots.len();
            inner.slots.push(DescriptorSlot {
                buf: None,
                row_bytes,
            });
            return DescriptorHandle {
                buf: vec![0u8; len],
                rows,
                row_bytes,
                home: Some((Arc::clone(&self.descriptors), i)),
                _not_send: PhantomData,
            };
        }

        tracing::trace!(rows, row_bytes, "descriptor pool full, temporary allocation");
        DescriptorHandle {
            buf: vec![0u8; len],
            rows,
            row_bytes,
            home: None,
            _not_send: PhantomData,
        }
    }

    /// Acquire a cleared point vector with at least `capacity` reserved
    pub fn acquire_points(&self, capacity: usize) -> PointHandle {
        let mut inner = self.points.lock();

        if let Some(i) = inner.slots.iter().position(|s| s.is_some()) {
            let mut pts = inner.slots[i].take().unwrap();
            pts.clear();
            pts.reserve(capacity);
            return PointHandle {
                pts,
                home: Some((Arc::clone(&self.points), i)),
                _not_send: PhantomData,
            };
        }

        if inner.slots.len() < inner.max_slots {
            let i = inner.slots.len();
            inner.slots.push(None);
            return PointHandle {
                pts: Vec::with_capacity(capacity),
                home: Some((Arc::clone(&self.points), i)),
                _not_send: PhantomData,
            };
        }

        PointHandle {
            pts: Vec::with_capacity(capacity),
            home: None,
            _not_send: PhantomData,
        }
    }

    /// Snapshot of slot occupancy and parked bytes across all three pools
    pub fn stats(&self) -> PoolStats {
        let frames = self.frames.lock();
        let descriptors = self.descriptors.lock();
        let points = self.points.lock();

        let mut stats = PoolStats {
            frame_slots: frames.slots.len(),
            descriptor_slots: descriptors.slots.len(),
            point_slots: points.slots.len(),
            ..Default::default()
        };
        for s in &frames.slots {
            if let Some(b) = &s.buf {
                stats.frame_free += 1;
                stats.free_bytes += b.capacity();
            }
        }
        for s in &descriptors.slots {
            if let Some(b) = &s.buf {
                stats.descriptor_free += 1;
                stats.free_bytes += b.capacity();
            }
        }
        for s in &points.slots {
            if let Some(p) = s {
                stats.point_free += 1;
                stats.free_bytes += p.capacity() * std::mem::size_of::<Point2f>();
            }
        }
        stats
    }
}
