//! Pointer-driven disturbances waiting to be splatted into the fields.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// One pending injection, in normalized grid coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Disturbance {
    /// Position in [0, 1]², y pointing up.
    pub x: f32,
    pub y: f32,
    /// Velocity impulse.
    pub vx: f32,
    pub vy: f32,
}

/// Shared backlog of disturbances.
///
/// Cloning yields another handle to the same queue, so input handlers can
/// push from wherever pointer events arrive while the frame loop drains.
#[derive(Debug, Clone, Default)]
pub struct DisturbanceQueue {
    inner: Arc<Mutex<Vec<Disturbance>>>,
}

impl DisturbanceQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Disturbance>> {
        // A panicked pusher cannot leave a Vec half-written
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a disturbance.
    pub fn push(&self, disturbance: Disturbance) {
        self.lock().push(disturbance);
    }

    /// Append a pointer movement given in surface pixels.
    ///
    /// `(x, y)` is the pointer position with y pointing down, `(dx, dy)` the
    /// movement since the previous event. The vertical axis is flipped and
    /// the impulse scaled by `force`.
    pub fn push_pointer(
        &self,
        x: f32,
        y: f32,
        dx: f32,
        dy: f32,
        surface: (u32, u32),
        force: f32,
    ) {
        let width = surface.0.max(1) as f32;
        let height = surface.1.max(1) as f32;
        self.push(Disturbance {
            x: x / width,
            y: 1.0 - y / height,
            vx: dx * force,
            vy: -dy * force,
        });
    }

    /// Remove and return every pending disturbance, most recent first.
    pub fn drain(&self) -> Vec<Disturbance> {
        let mut pending = std::mem::take(&mut *self.lock());
        pending.reverse();
        pending
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Output surface size in pixels, shared between handles.
///
/// A pipeline updates its handle on resize, so trackers holding a clone
/// normalize pointer positions against the current surface.
#[derive(Debug, Clone, Default)]
pub struct SurfaceSize {
    packed: Arc<AtomicU64>,
}

impl SurfaceSize {
    pub fn new(width: u32, height: u32) -> Self {
        let size = Self::default();
        size.set(width, height);
        size
    }

    pub fn get(&self) -> (u32, u32) {
        let packed = self.packed.load(Ordering::Relaxed);
        ((packed >> 32) as u32, packed as u32)
    }

    pub fn set(&self, width: u32, height: u32) {
        self.packed
            .store(((width as u64) << 32) | height as u64, Ordering::Relaxed);
    }
}

/// Turns absolute pointer positions into queue entries.
///
/// The first move only records the position; every later move pushes the
/// delta from the previous one.
#[derive(Debug, Clone)]
pub struct PointerTracker {
    queue: DisturbanceQueue,
    last: Option<(f32, f32)>,
    surface: SurfaceSize,
    force: f32,
}

impl PointerTracker {
    /// Tracker with its own fixed surface size.
    pub fn new(queue: DisturbanceQueue, surface: (u32, u32), force: f32) -> Self {
        Self::with_surface(queue, SurfaceSize::new(surface.0, surface.1), force)
    }

    /// Tracker following a shared surface size.
    pub fn with_surface(queue: DisturbanceQueue, surface: SurfaceSize, force: f32) -> Self {
        Self {
            queue,
            last: None,
            surface,
            force,
        }
    }

    /// Handle a pointer move to `(x, y)` in surface pixels.
    pub fn on_move(&mut self, x: f32, y: f32) {
        let Some((last_x, last_y)) = self.last.replace((x, y)) else {
            return;
        };
        self.queue
            .push_pointer(x, y, x - last_x, y - last_y, self.surface.get(), self.force);
    }

    /// Forget the last position, e.g. when the pointer leaves the surface.
    pub fn reset(&mut self) {
        self.last = None;
    }

    /// Also updates every handle sharing this tracker's surface.
    pub fn set_surface(&mut self, width: u32, height: u32) {
        self.surface.set(width, height);
    }

    pub fn queue(&self) -> &DisturbanceQueue {
        &self.queue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_pointer_normalization() {
        let queue = DisturbanceQueue::new();
        queue.push_pointer(200.0, 100.0, 10.0, 4.0, (400, 200), 1.5);

        let drained = queue.drain();
        assert_eq!(drained.len(), 1);
        let d = drained[0];
        assert_eq!(d.x, 0.5);
        assert_eq!(d.y, 0.5);
        assert_eq!(d.vx, 15.0);
        assert_eq!(d.vy, -6.0);
    }

    #[test]
    fn test_top_left_maps_to_top_of_grid() {
        let queue = DisturbanceQueue::new();
        queue.push_pointer(0.0, 0.0, 0.0, 0.0, (640, 480), 1.0);
        let d = queue.drain()[0];
        assert_eq!((d.x, d.y), (0.0, 1.0));
    }

    #[test]
    fn test_drain_empties_most_recent_first() {
        let queue = DisturbanceQueue::new();
        for i in 0..3 {
            queue.push(Disturbance {
                x: i as f32,
                y: 0.0,
                vx: 0.0,
                vy: 0.0,
            });
        }

        let drained = queue.drain();
        let xs: Vec<f32> = drained.iter().map(|d| d.x).collect();
        assert_eq!(xs, vec![2.0, 1.0, 0.0]);
        assert!(queue.is_empty());
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn test_clones_share_the_backlog() {
        let queue = DisturbanceQueue::new();
        let producer = queue.clone();

        let handle = std::thread::spawn(move || {
            for _ in 0..100 {
                producer.push_pointer(1.0, 1.0, 1.0, 1.0, (10, 10), 1.0);
            }
        });
        handle.join().unwrap();

        assert_eq!(queue.len(), 100);
        assert_eq!(queue.drain().len(), 100);
    }

    #[test]
    fn test_tracker_skips_first_move() {
        let queue = DisturbanceQueue::new();
        let mut tracker = PointerTracker::new(queue.clone(), (100, 100), 2.0);

        tracker.on_move(10.0, 10.0);
        assert!(queue.is_empty());

        tracker.on_move(15.0, 5.0);
        let d = queue.drain()[0];
        assert_eq!(d.vx, 10.0);
        assert_eq!(d.vy, 10.0);
        assert!((d.x - 0.15).abs() < 1e-6);
        assert!((d.y - 0.95).abs() < 1e-6);

        tracker.reset();
        tracker.on_move(50.0, 50.0);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_shared_surface_reaches_tracker() {
        let queue = DisturbanceQueue::new();
        let surface = SurfaceSize::new(100, 100);
        let mut tracker = PointerTracker::with_surface(queue.clone(), surface.clone(), 1.0);

        surface.set(200, 50);
        assert_eq!(surface.get(), (200, 50));
        tracker.on_move(0.0, 0.0);
        tracker.on_move(100.0, 25.0);
        let d = queue.drain()[0];
        assert_eq!((d.x, d.y), (0.5, 0.5));
    }

    proptest! {
        #[test]
        fn prop_drain_preserves_every_entry(n in 0usize..64) {
            let queue = DisturbanceQueue::new();
            for i in 0..n {
                queue.push(Disturbance { x: i as f32, y: 0.0, vx: 0.0, vy: 0.0 });
            }
            let drained = queue.drain();
            prop_assert_eq!(drained.len(), n);
            prop_assert!(queue.is_empty());
            for (k, d) in drained.iter().enumerate() {
                prop_assert_eq!(d.x, (n - 1 - k) as f32);
            }
        }
    }
}
