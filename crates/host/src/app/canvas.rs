/// CPU back buffer the host renders into and the overlay composites onto.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Canvas {
    width: u32,
    height: u32,
    rgba: Vec<u8>,
}

impl Canvas {
    pub(crate) fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            rgba: vec![0; width as usize * height as usize * 4],
        }
    }

    pub(crate) fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub(crate) fn resize(&mut self, width: u32, height: u32) {
        if (width, height) == (self.width, self.height) {
            return;
        }
        self.width = width;
        self.height = height;
        self.rgba = vec![0; width as usize * height as usize * 4];
    }

    pub(crate) fn clear(&mut self, color: [u8; 4]) {
        for pixel in self.rgba.chunks_exact_mut(4) {
            pixel.copy_from_slice(&color);
        }
    }

    pub(crate) fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        let offset = self.offset(x as usize, y as usize)?;
        let mut color = [0; 4];
        color.copy_from_slice(&self.rgba[offset..offset + 4]);
        Some(color)
    }

    /// Copies as much of the canvas as fits into `frame`.
    pub(crate) fn copy_to(&self, frame: &mut [u8]) {
        let len = frame.len().min(self.rgba.len());
        frame[..len].copy_from_slice(&self.rgba[..len]);
    }

    /// Source-over blend of `color` scaled by `coverage`.
    pub(crate) fn blend_pixel(&mut self, x: i32, y: i32, color: [u8; 4], coverage: u8) {
        if x < 0 || y < 0 {
            return;
        }
        let Some(offset) = self.offset(x as usize, y as usize) else {
            return;
        };
        let alpha = u32::from(color[3]) * u32::from(coverage) / 255;
        if alpha == 0 {
            return;
        }
        let dst = &mut self.rgba[offset..offset + 4];
        for channel in 0..3 {
            let src = u32::from(color[channel]);
            let old = u32::from(dst[channel]);
            dst[channel] = ((src * alpha + old * (255 - alpha)) / 255) as u8;
        }
        dst[3] = 255;
    }

    pub(crate) fn fill_rect(&mut self, x: i32, y: i32, width: i32, height: i32, color: [u8; 4]) {
        let start_x = x.max(0);
        let start_y = y.max(0);
        let end_x = (x + width).min(self.width as i32);
        let end_y = (y + height).min(self.height as i32);
        if end_x <= start_x || end_y <= start_y {
            return;
        }

        for py in start_y..end_y {
            for px in start_x..end_x {
                self.blend_pixel(px, py, color, 255);
            }
        }
    }

    pub(crate) fn outline_rect(&mut self, x: i32, y: i32, width: i32, height: i32, color: [u8; 4]) {
        if width <= 1 || height <= 1 {
            return;
        }
        self.fill_rect(x, y, width, 1, color);
        self.fill_rect(x, y + height - 1, width, 1, color);
        self.fill_rect(x, y, 1, height, color);
        self.fill_rect(x + width - 1, y, 1, height, color);
    }

    fn offset(&self, x: usize, y: usize) -> Option<usize> {
        if x >= self.width as usize || y >= self.height as usize {
            return None;
        }
        let pixel = y.checked_mul(self.width as usize)?.checked_add(x)?;
        pixel.checked_mul(4)
    }
}
