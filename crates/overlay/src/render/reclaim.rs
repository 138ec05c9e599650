use std::any::Any;
use std::fmt;
use std::mem::ManuallyDrop;
use std::ops::Deref;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::callbacks::panic_message;

/// A texture whose GPU memory must outlive every frame that sampled it.
pub trait GpuTexture: Send {
    fn release_gpu(self: Box<Self>);
}

struct Stamped<T> {
    frame: u64,
    value: T,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReclaimReport {
    pub textures_released: usize,
    pub values_dropped: usize,
    pub held_back: usize,
}

impl ReclaimReport {
    pub fn is_empty(&self) -> bool {
        self.textures_released == 0 && self.values_dropped == 0
    }
}

/// Frame-stamped disposal queues drained by the render thread right after
/// the frame's draw call.
pub struct DeferredResourceReclaimer {
    frame: AtomicU64,
    texture_tx: Sender<Stamped<Box<dyn GpuTexture>>>,
    texture_rx: Receiver<Stamped<Box<dyn GpuTexture>>>,
    value_tx: Sender<Stamped<Box<dyn Any + Send>>>,
    value_rx: Receiver<Stamped<Box<dyn Any + Send>>>,
    held: Mutex<Held>,
}

#[derive(Default)]
struct Held {
    textures: Vec<Stamped<Box<dyn GpuTexture>>>,
    values: Vec<Stamped<Box<dyn Any + Send>>>,
}

impl Default for DeferredResourceReclaimer {
    fn default() -> Self {
        let (texture_tx, texture_rx) = crossbeam_channel::unbounded();
        let (value_tx, value_rx) = crossbeam_channel::unbounded();
        Self {
            frame: AtomicU64::new(0),
            texture_tx,
            texture_rx,
            value_tx,
            value_rx,
            held: Mutex::new(Held::default()),
        }
    }
}

impl DeferredResourceReclaimer {
    pub fn current_frame(&self) -> u64 {
        self.frame.load(Ordering::Acquire)
    }

    /// Advances the frame sequence. Called by the render thread before any
    /// per-frame work.
    pub fn begin_frame(&self) -> u64 {
        self.frame.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn defer_texture(&self, texture: Box<dyn GpuTexture>) {
        let frame = self.current_frame();
        let _ = self.texture_tx.send(Stamped {
            frame,
            value: texture,
        });
    }

    pub fn defer_keep_alive<T: Send + 'static>(&self, value: T) {
        let frame = self.current_frame();
        let _ = self.value_tx.send(Stamped {
            frame,
            value: Box::new(value) as Box<dyn Any + Send>,
        });
    }

    pub fn pending(&self) -> usize {
        let held = self.held.lock();
        self.texture_rx.len() + self.value_rx.len() + held.textures.len() + held.values.len()
    }

    /// Releases every entry stamped at or before `frame`. Later entries stay
    /// queued for a future drain.
    pub fn drain_after_draw(&self, frame: u64) -> ReclaimReport {
        let mut held = self.held.lock();
        held.textures.extend(self.texture_rx.try_iter());
        held.values.extend(self.value_rx.try_iter());

        let (due_textures, kept_textures): (Vec<_>, Vec<_>) = std::mem::take(&mut held.textures)
            .into_iter()
            .partition(|entry| entry.frame <= frame);
        let (due_values, kept_values): (Vec<_>, Vec<_>) = std::mem::take(&mut held.values)
            .into_iter()
            .partition(|entry| entry.frame <= frame);
        held.textures = kept_textures;
        held.values = kept_values;
        let held_back = held.textures.len() + held.values.len();
        drop(held);

        let report = ReclaimReport {
            textures_released: due_textures.len(),
            values_dropped: due_values.len(),
            held_back,
        };

        for entry in due_textures {
            release_texture(entry.value);
        }
        drop(due_values);

        if !report.is_empty() {
            debug!(
                frame,
                textures = report.textures_released,
                values = report.values_dropped,
                held_back = report.held_back,
                "deferred_resources_reclaimed"
            );
        }
        report
    }

    /// Releases everything regardless of stamp. Only valid once no frame can
    /// still reference the queued resources.
    pub fn release_all(&self) -> ReclaimReport {
        self.drain_after_draw(u64::MAX)
    }
}

fn release_texture(texture: Box<dyn GpuTexture>) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(move || texture.release_gpu())) {
        warn!(panic = %panic_message(payload.as_ref()), "gpu_texture_release_panicked");
    }
}

impl Drop for DeferredResourceReclaimer {
    fn drop(&mut self) {
        self.release_all();
    }
}

impl fmt::Debug for DeferredResourceReclaimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredResourceReclaimer")
            .field("frame", &self.current_frame())
            .field("pending", &self.pending())
            .finish()
    }
}

/// Owns a GPU texture whose drop defers the real release to the reclaimer.
pub struct DeferredTexture<T: GpuTexture + 'static> {
    inner: ManuallyDrop<T>,
    reclaimer: Weak<DeferredResourceReclaimer>,
}

impl<T: GpuTexture + 'static> DeferredTexture<T> {
    pub fn new(texture: T, reclaimer: &Arc<DeferredResourceReclaimer>) -> Self {
        Self {
            inner: ManuallyDrop::new(texture),
            reclaimer: Arc::downgrade(reclaimer),
        }
    }

    /// Logical dispose; the GPU release happens after the current frame.
    pub fn dispose(self) {
        drop(self);
    }
}

impl<T: GpuTexture + 'static> Deref for DeferredTexture<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T: GpuTexture + 'static> Drop for DeferredTexture<T> {
    fn drop(&mut self) {
        // SAFETY: `inner` is taken exactly once, here, and never touched again.
        let texture = unsafe { ManuallyDrop::take(&mut self.inner) };
        match self.reclaimer.upgrade() {
            Some(reclaimer) => reclaimer.defer_texture(Box::new(texture)),
            None => release_texture(Box::new(texture)),
        }
    }
}

impl<T: GpuTexture + fmt::Debug + 'static> fmt::Debug for DeferredTexture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DeferredTexture").field(&*self.inner).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    use super::*;

    #[derive(Debug)]
    struct CountingTexture {
        id: u32,
        released: Arc<AtomicUsize>,
    }

    impl GpuTexture for CountingTexture {
        fn release_gpu(self: Box<Self>) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct DropFlag(Arc<AtomicUsize>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn texture_deferred_in_frame_is_released_after_that_frames_draw() {
        let reclaimer = Arc::new(DeferredResourceReclaimer::default());
        let released = Arc::new(AtomicUsize::new(0));

        let frame = reclaimer.begin_frame();
        reclaimer.defer_texture(Box::new(CountingTexture {
            id: 1,
            released: Arc::clone(&released),
        }));
        assert_eq!(released.load(Ordering::SeqCst), 0);

        let report = reclaimer.drain_after_draw(frame);
        assert_eq!(report.textures_released, 1);
        assert_eq!(released.load(Ordering::SeqCst), 1);

        let next = reclaimer.begin_frame();
        assert!(reclaimer.drain_after_draw(next).is_empty());
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn entries_stamped_after_drained_frame_are_held_back() {
        let reclaimer = DeferredResourceReclaimer::default();
        let dropped = Arc::new(AtomicUsize::new(0));

        let first = reclaimer.begin_frame();
        let second = reclaimer.begin_frame();
        reclaimer.defer_keep_alive(DropFlag(Arc::clone(&dropped)));

        let report = reclaimer.drain_after_draw(first);
        assert_eq!(report.values_dropped, 0);
        assert_eq!(report.held_back, 1);
        assert_eq!(dropped.load(Ordering::SeqCst), 0);

        let report = reclaimer.drain_after_draw(second);
        assert_eq!(report.values_dropped, 1);
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn deferred_texture_drop_is_a_logical_dispose() {
        let reclaimer = Arc::new(DeferredResourceReclaimer::default());
        let released = Arc::new(AtomicUsize::new(0));
        let frame = reclaimer.begin_frame();

        let texture = DeferredTexture::new(
            CountingTexture {
                id: 9,
                released: Arc::clone(&released),
            },
            &reclaimer,
        );
        assert_eq!(texture.id, 9);
        texture.dispose();

        assert_eq!(released.load(Ordering::SeqCst), 0);
        assert_eq!(reclaimer.pending(), 1);
        reclaimer.drain_after_draw(frame);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn deferred_texture_without_reclaimer_releases_immediately() {
        let reclaimer = Arc::new(DeferredResourceReclaimer::default());
        let released = Arc::new(AtomicUsize::new(0));
        let texture = DeferredTexture::new(
            CountingTexture {
                id: 1,
                released: Arc::clone(&released),
            },
            &reclaimer,
        );

        drop(reclaimer);
        drop(texture);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn each_entry_is_released_exactly_once_across_producers() {
        let reclaimer = Arc::new(DeferredResourceReclaimer::default());
        let released = Arc::new(AtomicUsize::new(0));
        let frame = reclaimer.begin_frame();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let reclaimer = Arc::clone(&reclaimer);
                let released = Arc::clone(&released);
                thread::spawn(move || {
                    for id in 0..25 {
                        reclaimer.defer_texture(Box::new(CountingTexture {
                            id,
                            released: Arc::clone(&released),
                        }));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("producer");
        }

        assert_eq!(reclaimer.drain_after_draw(frame).textures_released, 100);
        assert_eq!(reclaimer.drain_after_draw(frame).textures_released, 0);
        assert_eq!(released.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn dropping_reclaimer_releases_everything_pending() {
        let released = Arc::new(AtomicUsize::new(0));
        let dropped = Arc::new(AtomicUsize::new(0));
        {
            let reclaimer = DeferredResourceReclaimer::default();
            reclaimer.begin_frame();
            reclaimer.defer_texture(Box::new(CountingTexture {
                id: 3,
                released: Arc::clone(&released),
            }));
            reclaimer.defer_keep_alive(DropFlag(Arc::clone(&dropped)));
        }

        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
    }
}
