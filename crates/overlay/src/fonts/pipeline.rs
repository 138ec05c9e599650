use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use super::atlas::{AtlasBuilder, BuiltAtlas};
use super::handle::{FontHandle, FontShared};
use super::{
    BitmapGlyphSource, FontError, FontRole, FontSpec, GlyphRange, IconGlyphSource,
    PostBuildStep, ICON_RANGE,
};
use crate::config::FontSizes;
use crate::render::callbacks::panic_message;
use crate::render::RenderThread;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    Idle,
    Building,
    Built,
    Dirty,
}

struct TicketInner {
    id: u64,
    result: Mutex<Option<Result<u64, FontError>>>,
    done: Condvar,
}

/// Resolves with the published generation once the requested build is
/// visible through every handle.
#[derive(Clone)]
pub struct BuildTicket {
    inner: Arc<TicketInner>,
}

impl BuildTicket {
    fn new(id: u64) -> Self {
        Self {
            inner: Arc::new(TicketInner {
                id,
                result: Mutex::new(None),
                done: Condvar::new(),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn is_complete(&self) -> bool {
        self.inner.result.lock().is_some()
    }

    pub fn wait(&self) -> Result<u64, FontError> {
        let mut result = self.inner.result.lock();
        loop {
            if let Some(result) = result.as_ref() {
                return result.clone();
            }
            self.inner.done.wait(&mut result);
        }
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<u64, FontError>> {
        let mut result = self.inner.result.lock();
        if result.is_none() {
            self.inner.done.wait_for(&mut result, timeout);
        }
        result.clone()
    }

    fn resolve(&self, value: Result<u64, FontError>) {
        *self.inner.result.lock() = Some(value);
        self.inner.done.notify_all();
    }
}

impl fmt::Debug for BuildTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildTicket")
            .field("id", &self.id())
            .field("complete", &self.is_complete())
            .finish()
    }
}

/// Result of publishing a staged build at a render-thread safe point.
#[derive(Debug)]
pub struct PublishOutcome {
    pub generation: u64,
    /// The atlas the new one replaced; frames may still reference it.
    pub superseded: Option<Arc<BuiltAtlas>>,
}

struct Staged {
    ticket: BuildTicket,
    result: Result<BuiltAtlas, FontError>,
}

struct Control {
    state: BuildState,
    in_flight: Option<BuildTicket>,
    staged: Option<Staged>,
    dirty_while_building: bool,
    next_generation: u64,
}

struct PipelineInner {
    builder: AtlasBuilder,
    shared: Arc<FontShared>,
    control: Mutex<Control>,
}

/// Builds the font atlas off the render thread and publishes it at a safe
/// point so no frame ever samples a half-built atlas.
#[derive(Clone)]
pub struct FontAtlasPipeline {
    inner: Arc<PipelineInner>,
}

impl FontAtlasPipeline {
    pub fn new(builder: AtlasBuilder, render_thread: Arc<RenderThread>) -> Self {
        Self {
            inner: Arc::new(PipelineInner {
                builder,
                shared: Arc::new(FontShared::new(render_thread)),
                control: Mutex::new(Control {
                    state: BuildState::Idle,
                    in_flight: None,
                    staged: None,
                    dirty_while_building: false,
                    next_generation: 1,
                }),
            }),
        }
    }

    /// Default, icon and mono fonts; icons are merged into both text fonts.
    pub fn with_default_fonts(sizes: &FontSizes, render_thread: Arc<RenderThread>) -> Self {
        Self::new(default_font_builder(sizes), render_thread)
    }

    pub fn handle(&self, role: FontRole) -> FontHandle {
        FontHandle::new(role, Arc::clone(&self.inner.shared))
    }

    pub fn state(&self) -> BuildState {
        self.inner.control.lock().state
    }

    /// True once any atlas has been published.
    pub fn has_built(&self) -> bool {
        self.inner.shared.current().is_some()
    }

    pub fn current_atlas(&self) -> Option<Arc<BuiltAtlas>> {
        self.inner.shared.current()
    }

    /// Starts a build unless one is already in flight, in which case the
    /// in-flight build's ticket is returned.
    pub fn rebuild(&self) -> BuildTicket {
        let mut control = self.inner.control.lock();
        if control.state == BuildState::Building {
            if let Some(ticket) = &control.in_flight {
                debug!(ticket = ticket.id(), "font_atlas_rebuild_coalesced");
                return ticket.clone();
            }
        }

        let generation = control.next_generation;
        control.next_generation += 1;
        let ticket = BuildTicket::new(generation);
        control.state = BuildState::Building;
        control.in_flight = Some(ticket.clone());
        control.dirty_while_building = false;
        drop(control);

        self.inner.shared.clear_failure();
        debug!(generation, "font_atlas_build_started");

        let worker = Arc::clone(&self.inner);
        let worker_ticket = ticket.clone();
        let spawned = thread::Builder::new()
            .name("font-atlas-build".to_string())
            .spawn(move || worker.run_build(generation, worker_ticket));
        if let Err(error) = spawned {
            warn!(error = %error, "font_atlas_worker_spawn_failed");
            self.inner.run_build(generation, ticket.clone());
        }

        ticket
    }

    /// Requests a rebuild at the next frame. A build already in flight is
    /// followed by another one.
    pub fn mark_dirty(&self) {
        let mut control = self.inner.control.lock();
        if control.state == BuildState::Building {
            control.dirty_while_building = true;
        } else {
            control.state = BuildState::Dirty;
        }
    }

    pub fn rebuild_if_dirty(&self) -> Option<BuildTicket> {
        if self.state() == BuildState::Dirty {
            Some(self.rebuild())
        } else {
            None
        }
    }

    /// Render-thread safe point: makes a finished build visible.
    pub fn publish_pending(&self) -> Option<PublishOutcome> {
        let mut control = self.inner.control.lock();
        let staged = control.staged.take()?;
        self.inner.finish(control, staged)
    }

    #[cfg(test)]
    pub(crate) fn has_staged(&self) -> bool {
        self.inner.control.lock().staged.is_some()
    }
}

pub fn default_font_builder(sizes: &FontSizes) -> AtlasBuilder {
    AtlasBuilder::default()
        .add_font(FontSpec {
            role: FontRole::Default,
            pixel_size: sizes.default_px,
            ranges: vec![GlyphRange::ASCII_PRINTABLE],
            source: Arc::new(BitmapGlyphSource),
        })
        .add_font(FontSpec {
            role: FontRole::Icon,
            pixel_size: sizes.icon_px,
            ranges: vec![ICON_RANGE],
            source: Arc::new(IconGlyphSource),
        })
        .add_font(FontSpec {
            role: FontRole::Mono,
            pixel_size: sizes.mono_px,
            ranges: vec![GlyphRange::ASCII_PRINTABLE],
            source: Arc::new(BitmapGlyphSource),
        })
        .post_step(PostBuildStep::CopyMissingGlyphs {
            from: FontRole::Icon,
            to: FontRole::Default,
        })
        .post_step(PostBuildStep::CopyMissingGlyphs {
            from: FontRole::Icon,
            to: FontRole::Mono,
        })
}

impl PipelineInner {
    fn run_build(&self, generation: u64, ticket: BuildTicket) {
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.builder.build(generation)))
            .unwrap_or_else(|payload| Err(FontError::BuildPanicked(panic_message(payload.as_ref()))));
        self.complete(Staged { ticket, result });
    }

    fn complete(&self, staged: Staged) {
        let mut control = self.control.lock();
        if self.shared.render_thread().is_observed() {
            debug!(ticket = staged.ticket.id(), "font_atlas_build_staged");
            control.staged = Some(staged);
            return;
        }

        // Nothing is rendering yet, so there is no frame to tear.
        self.finish(control, staged);
    }

    fn finish(&self, mut control: MutexGuard<'_, Control>, staged: Staged) -> Option<PublishOutcome> {
        control.in_flight = None;
        let dirty = std::mem::take(&mut control.dirty_while_building);

        match staged.result {
            Ok(atlas) => {
                control.state = if dirty {
                    BuildState::Dirty
                } else {
                    BuildState::Built
                };
                drop(control);

                let generation = atlas.generation;
                let (width, height) = (atlas.width, atlas.height);
                let atlas = Arc::new(atlas);
                let superseded = self.shared.publish(Arc::clone(&atlas));
                info!(generation, width, height, "font_atlas_published");
                staged.ticket.resolve(Ok(generation));
                self.shared.notify_listeners(&atlas);
                Some(PublishOutcome {
                    generation,
                    superseded,
                })
            }
            Err(error) => {
                let has_atlas = self.shared.current().is_some();
                control.state = match (dirty, has_atlas) {
                    (true, _) => BuildState::Dirty,
                    (false, true) => BuildState::Built,
                    (false, false) => BuildState::Idle,
                };
                drop(control);

                warn!(error = %error, "font_atlas_build_failed");
                self.shared.record_failure(error.clone());
                staged.ticket.resolve(Err(error));
                None
            }
        }
    }
}

impl fmt::Debug for FontAtlasPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FontAtlasPipeline")
            .field("state", &self.state())
            .field("has_built", &self.has_built())
            .finish()
    }
}
