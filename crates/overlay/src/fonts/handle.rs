use std::fmt;
use std::ops::Deref;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::warn;

use super::atlas::{BuiltAtlas, BuiltFont};
use super::{FontError, FontRole};
use crate::render::callbacks::panic_message;
use crate::render::RenderThread;

type FontChanged = Arc<dyn Fn(&ResolvedFont) + Send + Sync>;

/// A font resolved against one published atlas generation.
#[derive(Clone)]
pub struct ResolvedFont {
    atlas: Arc<BuiltAtlas>,
    index: usize,
}

impl ResolvedFont {
    fn resolve(atlas: &Arc<BuiltAtlas>, role: FontRole) -> Result<Self, FontError> {
        atlas
            .font_index(role)
            .map(|index| Self {
                atlas: Arc::clone(atlas),
                index,
            })
            .ok_or(FontError::MissingRole { role })
    }

    pub fn generation(&self) -> u64 {
        self.atlas.generation
    }

    pub fn atlas(&self) -> &Arc<BuiltAtlas> {
        &self.atlas
    }
}

impl Deref for ResolvedFont {
    type Target = BuiltFont;

    fn deref(&self) -> &BuiltFont {
        self.atlas.font_at(self.index)
    }
}

impl fmt::Debug for ResolvedFont {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedFont")
            .field("role", &self.role)
            .field("generation", &self.generation())
            .field("glyphs", &self.glyph_count())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Listener {
    id: ListenerId,
    role: FontRole,
    callback: FontChanged,
}

#[derive(Default)]
pub(crate) struct PublishedState {
    pub(crate) atlas: Option<Arc<BuiltAtlas>>,
    pub(crate) failure: Option<FontError>,
}

/// State shared by the pipeline and every handle it issued.
pub(crate) struct FontShared {
    state: Mutex<PublishedState>,
    published: Condvar,
    listeners: Mutex<Vec<Listener>>,
    next_listener: AtomicU64,
    render_thread: Arc<RenderThread>,
}

impl FontShared {
    pub(crate) fn new(render_thread: Arc<RenderThread>) -> Self {
        Self {
            state: Mutex::new(PublishedState::default()),
            published: Condvar::new(),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
            render_thread,
        }
    }

    pub(crate) fn render_thread(&self) -> &RenderThread {
        &self.render_thread
    }

    pub(crate) fn current(&self) -> Option<Arc<BuiltAtlas>> {
        self.state.lock().atlas.clone()
    }

    /// Swaps in `atlas` for every handle at once and wakes waiters.
    pub(crate) fn publish(&self, atlas: Arc<BuiltAtlas>) -> Option<Arc<BuiltAtlas>> {
        let previous = {
            let mut state = self.state.lock();
            state.failure = None;
            state.atlas.replace(atlas)
        };
        self.published.notify_all();
        previous
    }

    /// Runs every font-changed listener once against `atlas`. A panicking
    /// listener is logged and the rest still run.
    pub(crate) fn notify_listeners(&self, atlas: &Arc<BuiltAtlas>) {
        let listeners: Vec<(ListenerId, FontRole, FontChanged)> = self
            .listeners
            .lock()
            .iter()
            .map(|listener| (listener.id, listener.role, Arc::clone(&listener.callback)))
            .collect();
        for (id, role, callback) in listeners {
            let Ok(font) = ResolvedFont::resolve(atlas, role) else {
                continue;
            };
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback(&font))) {
                warn!(
                    listener = id.0,
                    role = role.name(),
                    generation = atlas.generation,
                    panic = %panic_message(payload.as_ref()),
                    "font_listener_panicked"
                );
            }
        }
    }

    /// Only blocks waiters while nothing has been published yet.
    pub(crate) fn record_failure(&self, error: FontError) {
        let mut state = self.state.lock();
        if state.atlas.is_none() {
            state.failure = Some(error);
            drop(state);
            self.published.notify_all();
        }
    }

    pub(crate) fn clear_failure(&self) {
        self.state.lock().failure = None;
    }
}

/// Stable reference to a named font. The font it resolves to changes only
/// when the pipeline publishes a new atlas.
#[derive(Clone)]
pub struct FontHandle {
    role: FontRole,
    shared: Arc<FontShared>,
}

impl FontHandle {
    pub(crate) fn new(role: FontRole, shared: Arc<FontShared>) -> Self {
        Self { role, shared }
    }

    pub fn role(&self) -> FontRole {
        self.role
    }

    /// Zero until the first publish.
    pub fn generation(&self) -> u64 {
        self.shared
            .state
            .lock()
            .atlas
            .as_ref()
            .map_or(0, |atlas| atlas.generation)
    }

    pub fn try_font(&self) -> Option<ResolvedFont> {
        let atlas = self.shared.current()?;
        ResolvedFont::resolve(&atlas, self.role).ok()
    }

    /// Blocks until the first atlas is published.
    pub fn wait_font(&self) -> Result<ResolvedFont, FontError> {
        self.wait(None)
    }

    pub fn wait_font_timeout(&self, timeout: Duration) -> Result<ResolvedFont, FontError> {
        self.wait(Some(Instant::now() + timeout))
    }

    fn wait(&self, deadline: Option<Instant>) -> Result<ResolvedFont, FontError> {
        // Publication happens on the render thread, so it would never arrive.
        if self.shared.render_thread.is_current() {
            return Err(FontError::WaitOnRenderThread);
        }

        let mut state = self.shared.state.lock();
        loop {
            if let Some(atlas) = &state.atlas {
                return ResolvedFont::resolve(atlas, self.role);
            }
            if let Some(error) = &state.failure {
                return Err(error.clone());
            }
            match deadline {
                None => self.shared.published.wait(&mut state),
                Some(deadline) => {
                    if self
                        .shared
                        .published
                        .wait_until(&mut state, deadline)
                        .timed_out()
                        && state.atlas.is_none()
                        && state.failure.is_none()
                    {
                        return Err(FontError::Timeout);
                    }
                }
            }
        }
    }

    /// Registers a callback fired once per publish with the new font.
    pub fn on_font_changed<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&ResolvedFont) + Send + Sync + 'static,
    {
        let id = ListenerId(self.shared.next_listener.fetch_add(1, Ordering::Relaxed));
        self.shared.listeners.lock().push(Listener {
            id,
            role: self.role,
            callback: Arc::new(callback),
        });
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.shared.listeners.lock();
        let before = listeners.len();
        listeners.retain(|listener| listener.id != id);
        listeners.len() != before
    }
}

impl fmt::Debug for FontHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FontHandle")
            .field("role", &self.role)
            .field("generation", &self.generation())
            .finish()
    }
}
