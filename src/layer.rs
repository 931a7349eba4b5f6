/// RGBA drawing buffer the size of the render surface.
///
/// Pixels with alpha 0 are transparent and let the frame layer show through.
#[derive(Debug, Clone, Default)]
pub struct PixelLayer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl PixelLayer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize * 4],
        }
    }

    /// Resize and clear.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.data.clear();
        self.data.resize(width as usize * height as usize * 4, 0);
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    fn index(&self, x: u32, y: u32) -> Option<usize> {
        (x < self.width && y < self.height)
            .then(|| (y as usize * self.width as usize + x as usize) * 4)
    }

    /// Out-of-bounds writes are ignored. Returns whether the pixel was inside.
    pub fn set_pixel(&mut self, x: u32, y: u32, rgba: [u8; 4]) -> bool {
        match self.index(x, y) {
            Some(idx) => {
                self.data[idx..idx + 4].copy_from_slice(&rgba);
                true
            }
            None => false,
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        let idx = self.index(x, y)?;
        let mut out = [0; 4];
        out.copy_from_slice(&self.data[idx..idx + 4]);
        Some(out)
    }

    pub fn fill_rect(&mut self, x: u32, y: u32, width: u32, height: u32, rgba: [u8; 4]) {
        let x_end = x.saturating_add(width).min(self.width);
        let y_end = y.saturating_add(height).min(self.height);
        for row in y.min(y_end)..y_end {
            let start = (row as usize * self.width as usize + x as usize) * 4;
            let end = (row as usize * self.width as usize + x_end as usize) * 4;
            if start >= end {
                continue;
            }
            for px in self.data[start..end].chunks_exact_mut(4) {
                px.copy_from_slice(&rgba);
            }
        }
    }

    /// Make a rectangle transparent; clipped to the layer.
    pub fn clear_rect(&mut self, x: u32, y: u32, width: u32, height: u32) {
        self.fill_rect(x, y, width, height, [0; 4]);
    }

    pub fn clear(&mut self) {
        self.data.fill(0);
    }

    pub fn is_blank(&self) -> bool {
        self.data.chunks_exact(4).all(|px| px[3] == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_outside_bounds_are_ignored() {
        let mut layer = PixelLayer::new(4, 3);
        assert!(layer.set_pixel(3, 2, [9, 9, 9, 255]));
        assert!(!layer.set_pixel(4, 0, [1, 1, 1, 255]));
        assert_eq!(layer.pixel(3, 2), Some([9, 9, 9, 255]));
        assert_eq!(layer.pixel(0, 3), None);
    }

    #[test]
    fn rects_clip_to_layer() {
        let mut layer = PixelLayer::new(4, 4);
        layer.fill_rect(2, 2, 10, 10, [1, 2, 3, 255]);
        assert_eq!(layer.pixel(3, 3), Some([1, 2, 3, 255]));
        assert_eq!(layer.pixel(1, 1), Some([0, 0, 0, 0]));

        layer.clear_rect(3, 0, 5, 5);
        assert_eq!(layer.pixel(3, 3), Some([0, 0, 0, 0]));
        assert_eq!(layer.pixel(2, 3), Some([1, 2, 3, 255]));

        layer.fill_rect(9, 9, 2, 2, [5; 4]);
        layer.clear();
        assert!(layer.is_blank());
    }
}
