use std::collections::HashMap;

use super::{FontError, FontRole, FontSpec, PostBuildStep};

const INITIAL_ATLAS_WIDTH: u32 = 256;
const GLYPH_PADDING: u32 = 1;
pub(crate) const MAX_ATLAS_SIZE: u32 = 4096;

/// Alpha coverage for one rasterised glyph, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlyphBitmap {
    pub width: u32,
    pub height: u32,
    pub advance: u32,
    pub coverage: Vec<u8>,
}

pub trait GlyphSource: Send + Sync {
    fn line_height(&self, pixel_size: f32) -> u32;

    /// `None` when the source has no glyph for `ch`.
    fn rasterize(&self, ch: char, pixel_size: f32) -> Option<GlyphBitmap>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlyphInfo {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub advance: u32,
    /// `[u0, v0, u1, v1]` in atlas texture space.
    pub uv: [f32; 4],
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuiltFont {
    pub role: FontRole,
    pub pixel_size: f32,
    pub line_height: u32,
    glyphs: HashMap<char, GlyphInfo>,
}

impl BuiltFont {
    pub fn glyph(&self, ch: char) -> Option<&GlyphInfo> {
        self.glyphs.get(&ch)
    }

    pub fn glyph_count(&self) -> usize {
        self.glyphs.len()
    }

    pub fn contains(&self, ch: char) -> bool {
        self.glyphs.contains_key(&ch)
    }

    /// Horizontal extent of `text`; unknown characters advance by nothing.
    pub fn measure(&self, text: &str) -> u32 {
        text.chars()
            .filter_map(|ch| self.glyph(ch))
            .map(|glyph| glyph.advance)
            .sum()
    }
}

/// A finished, immutable atlas: one alpha8 texture shared by every font.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltAtlas {
    pub generation: u64,
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
    fonts: Vec<BuiltFont>,
}

impl BuiltAtlas {
    pub fn font(&self, role: FontRole) -> Option<&BuiltFont> {
        self.fonts.iter().find(|font| font.role == role)
    }

    pub(crate) fn font_index(&self, role: FontRole) -> Option<usize> {
        self.fonts.iter().position(|font| font.role == role)
    }

    pub(crate) fn font_at(&self, index: usize) -> &BuiltFont {
        &self.fonts[index]
    }

    pub fn fonts(&self) -> impl Iterator<Item = &BuiltFont> {
        self.fonts.iter()
    }

    pub fn coverage_at(&self, x: u32, y: u32) -> u8 {
        if x >= self.width || y >= self.height {
            return 0;
        }
        self.pixels[(y * self.width + x) as usize]
    }
}

/// Adds every glyph of `from` that `to` does not already carry.
pub fn copy_missing_glyphs(from: &BuiltFont, to: &mut BuiltFont) -> usize {
    let mut copied = 0;
    for (ch, glyph) in &from.glyphs {
        if !to.glyphs.contains_key(ch) {
            to.glyphs.insert(*ch, *glyph);
            copied += 1;
        }
    }
    copied
}

/// Declarative atlas description; `build` is pure and may run on any thread.
#[derive(Debug, Clone)]
pub struct AtlasBuilder {
    fonts: Vec<FontSpec>,
    post_steps: Vec<PostBuildStep>,
    max_size: u32,
}

impl Default for AtlasBuilder {
    fn default() -> Self {
        Self {
            fonts: Vec::new(),
            post_steps: Vec::new(),
            max_size: MAX_ATLAS_SIZE,
        }
    }
}

struct PendingGlyph {
    font: usize,
    ch: char,
    bitmap: GlyphBitmap,
}

impl AtlasBuilder {
    pub fn add_font(mut self, spec: FontSpec) -> Self {
        self.fonts.push(spec);
        self
    }

    pub fn post_step(mut self, step: PostBuildStep) -> Self {
        self.post_steps.push(step);
        self
    }

    pub fn max_size(mut self, max_size: u32) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn roles(&self) -> impl Iterator<Item = FontRole> + '_ {
        self.fonts.iter().map(|spec| spec.role)
    }

    pub fn build(&self, generation: u64) -> Result<BuiltAtlas, FontError> {
        self.validate()?;

        let mut pending = Vec::new();
        for (font, spec) in self.fonts.iter().enumerate() {
            for range in &spec.ranges {
                for ch in range.chars() {
                    if let Some(bitmap) = spec.source.rasterize(ch, spec.pixel_size) {
                        pending.push(PendingGlyph { font, ch, bitmap });
                    }
                }
            }
        }

        // Tallest first keeps shelves tight.
        pending.sort_by(|a, b| b.bitmap.height.cmp(&a.bitmap.height));

        let (width, height, placements) = self.pack(&pending)?;
        let mut pixels = vec![0u8; (width * height) as usize];
        let mut fonts: Vec<BuiltFont> = self
            .fonts
            .iter()
            .map(|spec| BuiltFont {
                role: spec.role,
                pixel_size: spec.pixel_size,
                line_height: spec.source.line_height(spec.pixel_size),
                glyphs: HashMap::new(),
            })
            .collect();

        for (glyph, (x, y)) in pending.iter().zip(placements) {
            blit(&mut pixels, width, x, y, &glyph.bitmap);
            fonts[glyph.font].glyphs.insert(
                glyph.ch,
                GlyphInfo {
                    x,
                    y,
                    width: glyph.bitmap.width,
                    height: glyph.bitmap.height,
                    advance: glyph.bitmap.advance,
                    uv: [
                        x as f32 / width as f32,
                        y as f32 / height as f32,
                        (x + glyph.bitmap.width) as f32 / width as f32,
                        (y + glyph.bitmap.height) as f32 / height as f32,
                    ],
                },
            );
        }

        for step in &self.post_steps {
            match *step {
                PostBuildStep::CopyMissingGlyphs { from, to } => {
                    let source = fonts
                        .iter()
                        .find(|font| font.role == from)
                        .cloned()
                        .ok_or(FontError::MissingRole { role: from })?;
                    let target = fonts
                        .iter_mut()
                        .find(|font| font.role == to)
                        .ok_or(FontError::MissingRole { role: to })?;
                    copy_missing_glyphs(&source, target);
                }
            }
        }

        Ok(BuiltAtlas {
            generation,
            width,
            height,
            pixels,
            fonts,
        })
    }

    fn validate(&self) -> Result<(), FontError> {
        if self.fonts.is_empty() {
            return Err(FontError::NoFonts);
        }
        for (index, spec) in self.fonts.iter().enumerate() {
            if self.fonts[..index].iter().any(|other| other.role == spec.role) {
                return Err(FontError::DuplicateRole { role: spec.role });
            }
        }
        for step in &self.post_steps {
            let PostBuildStep::CopyMissingGlyphs { from, to } = *step;
            for role in [from, to] {
                if !self.fonts.iter().any(|spec| spec.role == role) {
                    return Err(FontError::MissingRole { role });
                }
            }
        }
        Ok(())
    }

    /// Shelf packing. The width doubles until everything fits within
    /// `max_size`; the height is rounded up to a power of two.
    fn pack(&self, glyphs: &[PendingGlyph]) -> Result<(u32, u32, Vec<(u32, u32)>), FontError> {
        let widest = glyphs
            .iter()
            .map(|glyph| glyph.bitmap.width + GLYPH_PADDING * 2)
            .max()
            .unwrap_or(0);
        let mut width = INITIAL_ATLAS_WIDTH.min(self.max_size).max(1);
        while width < widest {
            width *= 2;
        }

        loop {
            if width > self.max_size {
                return Err(FontError::AtlasTooLarge {
                    required: width,
                    max: self.max_size,
                });
            }

            let (used_height, placements) = shelf_pack(width, glyphs);
            let height = used_height.max(1).next_power_of_two();
            if height <= self.max_size {
                return Ok((width, height, placements));
            }
            if width == self.max_size {
                return Err(FontError::AtlasTooLarge {
                    required: height,
                    max: self.max_size,
                });
            }
            width = (width * 2).min(self.max_size);
        }
    }
}

fn shelf_pack(width: u32, glyphs: &[PendingGlyph]) -> (u32, Vec<(u32, u32)>) {
    let mut placements = Vec::with_capacity(glyphs.len());
    let mut cursor_x = GLYPH_PADDING;
    let mut shelf_y = GLYPH_PADDING;
    let mut shelf_height = 0;

    for glyph in glyphs {
        let w = glyph.bitmap.width;
        let h = glyph.bitmap.height;
        if cursor_x + w + GLYPH_PADDING > width {
            shelf_y += shelf_height + GLYPH_PADDING;
            cursor_x = GLYPH_PADDING;
            shelf_height = 0;
        }
        placements.push((cursor_x, shelf_y));
        cursor_x += w + GLYPH_PADDING;
        shelf_height = shelf_height.max(h);
    }

    (shelf_y + shelf_height + GLYPH_PADDING, placements)
}

fn blit(pixels: &mut [u8], atlas_width: u32, x: u32, y: u32, bitmap: &GlyphBitmap) {
    for row in 0..bitmap.height {
        let src = (row * bitmap.width) as usize;
        let dst = ((y + row) * atlas_width + x) as usize;
        let len = bitmap.width as usize;
        let (Some(src_row), Some(dst_row)) = (
            bitmap.coverage.get(src..src + len),
            pixels.get_mut(dst..dst + len),
        ) else {
            continue;
        };
        dst_row.copy_from_slice(src_row);
    }
}
