use super::atlas::{GlyphBitmap, GlyphSource};
use super::GlyphRange;

const GLYPH_WIDTH: u32 = 3;
const GLYPH_HEIGHT: u32 = 5;
const ICON_SIZE: u32 = 5;

/// 3x5 glyphs for `' '..='~'`, packed five rows of three bits, top row in
/// the high bits.
const ASCII_GLYPHS: [u16; 95] = [
    0x0000, 0x2482, 0x5A00, 0x5F7D, 0x7DDF, 0x52A5, 0x2AAB, 0x2400, //
    0x1491, 0x4494, 0x0AA8, 0x05D0, 0x0014, 0x01C0, 0x0002, 0x12A4, //
    0x7B6F, 0x2C97, 0x73E7, 0x73CF, 0x5BC9, 0x79CF, 0x79EF, 0x7292, //
    0x7BEF, 0x7BCF, 0x0410, 0x0414, 0x1511, 0x0E38, 0x4454, 0x72C2, //
    0x7BE7, 0x2BED, 0x6BAE, 0x7927, 0x6B6E, 0x79A7, 0x79A4, 0x796F, //
    0x5BED, 0x7497, 0x726F, 0x5BAD, 0x4927, 0x5FED, 0x5FFD, 0x7B6F, //
    0x6BA4, 0x7B79, 0x6BAD, 0x79CF, 0x7492, 0x5B6F, 0x5B6A, 0x5BFD, //
    0x5AAD, 0x5A92, 0x72A7, 0x6926, 0x4889, 0x324B, 0x2A00, 0x0007, //
    0x4400, 0x0E7F, 0x49AE, 0x0F27, 0x13EF, 0x0FA7, 0x39A4, 0x0F79, //
    0x49AD, 0x2092, 0x106A, 0x4BAD, 0x4927, 0x0DED, 0x0D6D, 0x0F6F, //
    0x0D74, 0x0F79, 0x0D64, 0x0F8F, 0x2E93, 0x0B6F, 0x0B6A, 0x0B7A, //
    0x0A95, 0x0B79, 0x0E57, 0x3593, 0x2492, 0x64D6, 0x0780,
];

/// Private-use code points served by [`IconGlyphSource`].
pub const ICON_RANGE: GlyphRange = GlyphRange::new('\u{E000}', '\u{E007}');

/// 5x5 icons, five bits per row.
const ICONS: [[u8; 5]; 8] = [
    [0b00000, 0b00001, 0b00010, 0b10100, 0b01000], // check
    [0b10001, 0b01010, 0b00100, 0b01010, 0b10001], // cross
    [0b00100, 0b01110, 0b10101, 0b00100, 0b00100], // arrow up
    [0b00100, 0b00100, 0b10101, 0b01110, 0b00100], // arrow down
    [0b00100, 0b01000, 0b11111, 0b01000, 0b00100], // arrow left
    [0b00100, 0b00010, 0b11111, 0b00010, 0b00100], // arrow right
    [0b11111, 0b10001, 0b10001, 0b10001, 0b11111], // box
    [0b00000, 0b01110, 0b01110, 0b01110, 0b00000], // dot
];

fn scale_for(pixel_size: f32, base: u32) -> u32 {
    ((pixel_size / base as f32).round() as u32).max(1)
}

fn rasterize_rows(rows: &[u8], bits: u32, scale: u32, advance: u32) -> GlyphBitmap {
    let width = bits * scale;
    let height = rows.len() as u32 * scale;
    let mut coverage = vec![0u8; (width * height) as usize];

    for (row_index, row_bits) in rows.iter().enumerate() {
        for col in 0..bits {
            if row_bits & (1 << (bits - 1 - col)) == 0 {
                continue;
            }
            for sy in 0..scale {
                let y = row_index as u32 * scale + sy;
                let start = (y * width + col * scale) as usize;
                coverage[start..start + scale as usize].fill(255);
            }
        }
    }

    GlyphBitmap {
        width,
        height,
        advance,
        coverage,
    }
}

pub(crate) fn ascii_rows(ch: char) -> Option<[u8; GLYPH_HEIGHT as usize]> {
    let index = (ch as u32).checked_sub(' ' as u32)? as usize;
    let packed = *ASCII_GLYPHS.get(index)?;
    let mut rows = [0u8; GLYPH_HEIGHT as usize];
    for (row, slot) in rows.iter_mut().enumerate() {
        let shift = (GLYPH_HEIGHT as usize - 1 - row) * GLYPH_WIDTH as usize;
        *slot = ((packed >> shift) & 0b111) as u8;
    }
    Some(rows)
}

/// Blocky ASCII font scaled in whole pixels from the 3x5 base glyphs.
#[derive(Debug, Default, Clone, Copy)]
pub struct BitmapGlyphSource;

impl GlyphSource for BitmapGlyphSource {
    fn line_height(&self, pixel_size: f32) -> u32 {
        (GLYPH_HEIGHT + 2) * scale_for(pixel_size, GLYPH_HEIGHT)
    }

    fn rasterize(&self, ch: char, pixel_size: f32) -> Option<GlyphBitmap> {
        let rows = ascii_rows(ch)?;
        let scale = scale_for(pixel_size, GLYPH_HEIGHT);
        Some(rasterize_rows(
            &rows,
            GLYPH_WIDTH,
            scale,
            (GLYPH_WIDTH + 1) * scale,
        ))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct IconGlyphSource;

impl GlyphSource for IconGlyphSource {
    fn line_height(&self, pixel_size: f32) -> u32 {
        (ICON_SIZE + 2) * scale_for(pixel_size, ICON_SIZE)
    }

    fn rasterize(&self, ch: char, pixel_size: f32) -> Option<GlyphBitmap> {
        let index = (ch as u32).checked_sub(ICON_RANGE.first as u32)? as usize;
        let rows = ICONS.get(index)?;
        let scale = scale_for(pixel_size, ICON_SIZE);
        Some(rasterize_rows(rows, ICON_SIZE, scale, (ICON_SIZE + 1) * scale))
    }
}
