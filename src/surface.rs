//! The pixel target playback draws into.
//!
//! Terminal renderers implement [`RenderSurface`]; the player only ever writes
//! packed `0xRRGGBBAA` words into the image buffer and then asks for a repaint.

/// Packs RGBA bytes into one `0xRRGGBBAA` word.
pub fn pack_rgba(rgba: [u8; 4]) -> u32 {
    u32::from_be_bytes(rgba)
}

pub fn unpack_rgba(word: u32) -> [u8; 4] {
    word.to_be_bytes()
}

pub trait RenderSurface: Send + 'static {
    /// Width and height in pixels of the image buffer.
    fn pixel_size(&self) -> (u32, u32);

    /// Row-major, `width * height` long.
    fn image_color_buffer_mut(&mut self) -> &mut [u32];

    /// Reallocate the image buffer; contents afterwards are unspecified.
    fn resize(&mut self, width: u32, height: u32);

    fn mark_dirty(&mut self);

    /// Ask the host to repaint. Must not block on the repaint itself.
    fn request_render(&mut self);
}

impl<S: RenderSurface + ?Sized> RenderSurface for Box<S> {
    fn pixel_size(&self) -> (u32, u32) {
        (**self).pixel_size()
    }

    fn image_color_buffer_mut(&mut self) -> &mut [u32] {
        (**self).image_color_buffer_mut()
    }

    fn resize(&mut self, width: u32, height: u32) {
        (**self).resize(width, height)
    }

    fn mark_dirty(&mut self) {
        (**self).mark_dirty()
    }

    fn request_render(&mut self) {
        (**self).request_render()
    }
}

/// Heap-backed surface for tests and headless runs.
#[derive(Debug, Clone, Default)]
pub struct MemorySurface {
    width: u32,
    height: u32,
    pixels: Vec<u32>,
    dirty: bool,
    render_requests: u64,
}

impl MemorySurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize],
            dirty: false,
            render_requests: 0,
        }
    }

    pub fn pixels(&self) -> &[u32] {
        &self.pixels
    }

    pub fn rgba_at(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        Some(unpack_rgba(
            self.pixels[y as usize * self.width as usize + x as usize],
        ))
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    pub fn render_requests(&self) -> u64 {
        self.render_requests
    }
}

impl RenderSurface for MemorySurface {
    fn pixel_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn image_color_buffer_mut(&mut self) -> &mut [u32] {
        &mut self.pixels
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.pixels.clear();
        self.pixels.resize(width as usize * height as usize, 0);
    }

    fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    fn request_render(&mut self) {
        self.render_requests += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packing_is_rrggbbaa() {
        assert_eq!(pack_rgba([0x11, 0x22, 0x33, 0x44]), 0x1122_3344);
        assert_eq!(unpack_rgba(0xAABB_CCDD), [0xAA, 0xBB, 0xCC, 0xDD]);
    }

    #[test]
    fn memory_surface_tracks_requests() {
        let mut surface = MemorySurface::new(2, 2);
        surface.image_color_buffer_mut()[3] = pack_rgba([1, 2, 3, 4]);
        surface.mark_dirty();
        surface.request_render();
        assert_eq!(surface.rgba_at(1, 1), Some([1, 2, 3, 4]));
        assert!(surface.take_dirty());
        assert!(!surface.is_dirty());
        assert_eq!(surface.render_requests(), 1);
    }
}
