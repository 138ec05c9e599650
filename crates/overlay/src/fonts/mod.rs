//! Font atlas construction and publication.
//!
//! Fonts are declared once at setup as [`FontSpec`]s plus optional
//! [`PostBuildStep`]s. The [`FontAtlasPipeline`] builds the atlas on a worker
//! thread and publishes it at a render-thread safe point, after which every
//! [`FontHandle`] resolves to the new generation.

mod atlas;
mod bitmap;
mod handle;
mod pipeline;

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

pub use atlas::{
    copy_missing_glyphs, AtlasBuilder, BuiltAtlas, BuiltFont, GlyphBitmap, GlyphInfo, GlyphSource,
};
pub use bitmap::{BitmapGlyphSource, IconGlyphSource, ICON_RANGE};
pub use handle::{FontHandle, ListenerId, ResolvedFont};
pub use pipeline::{
    default_font_builder, BuildState, BuildTicket, FontAtlasPipeline, PublishOutcome,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FontRole {
    Default,
    Icon,
    Mono,
}

impl FontRole {
    pub const ALL: [FontRole; 3] = [FontRole::Default, FontRole::Icon, FontRole::Mono];

    pub fn name(self) -> &'static str {
        match self {
            FontRole::Default => "default",
            FontRole::Icon => "icon",
            FontRole::Mono => "mono",
        }
    }
}

impl fmt::Display for FontRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Inclusive range of code points rasterised into a font.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlyphRange {
    pub first: char,
    pub last: char,
}

impl GlyphRange {
    pub const ASCII_PRINTABLE: GlyphRange = GlyphRange {
        first: ' ',
        last: '~',
    };

    pub const fn new(first: char, last: char) -> Self {
        Self { first, last }
    }

    pub fn chars(self) -> impl Iterator<Item = char> {
        self.first..=self.last
    }
}

/// Pre-build step: which glyphs a font carries and at what size.
#[derive(Clone)]
pub struct FontSpec {
    pub role: FontRole,
    pub pixel_size: f32,
    pub ranges: Vec<GlyphRange>,
    pub source: Arc<dyn GlyphSource>,
}

impl fmt::Debug for FontSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FontSpec")
            .field("role", &self.role)
            .field("pixel_size", &self.pixel_size)
            .field("ranges", &self.ranges)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostBuildStep {
    /// Adds glyphs from `from` that `to` lacks; existing glyphs in `to` win.
    CopyMissingGlyphs { from: FontRole, to: FontRole },
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum FontError {
    #[error("no fonts were declared for the atlas")]
    NoFonts,
    #[error("font {role} is declared more than once")]
    DuplicateRole { role: FontRole },
    #[error("font {role} is not part of the atlas")]
    MissingRole { role: FontRole },
    #[error("atlas needs {required}px but the limit is {max}px")]
    AtlasTooLarge { required: u32, max: u32 },
    #[error("font atlas build panicked: {0}")]
    BuildPanicked(String),
    #[error("waiting for a font on the render thread would deadlock")]
    WaitOnRenderThread,
    #[error("timed out waiting for the font atlas")]
    Timeout,
}
