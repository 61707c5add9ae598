use crossterm::terminal;
use image::DynamicImage;

const ASCII_RAMP: &str = " .·:;+=xX#@";
const DEFAULT_WIDTH: usize = 80;
const DEFAULT_HEIGHT: usize = 30;

/// Renders still frames as terminal art, e.g. for the confirmation step.
pub struct AsciiRenderer {
    width: usize,
    height: usize,
}

impl AsciiRenderer {
    pub fn new(width: Option<usize>, height: Option<usize>) -> Self {
        let (term_width, term_height) = terminal::size()
            .map(|(w, h)| (w as usize, h as usize))
            .unwrap_or((DEFAULT_WIDTH, DEFAULT_HEIGHT));

        // Leave room for the status lines under the preview
        Self {
            width: width.unwrap_or((term_width / 2).min(DEFAULT_WIDTH / 2)).max(1),
            height: height
                .unwrap_or((term_height.saturating_sub(12) / 2).min(DEFAULT_HEIGHT / 2))
                .max(1),
        }
    }

    /// Renders the frame with `caption` centered on its bottom row. An empty
    /// caption leaves the frame untouched.
    pub fn render_with_caption(&self, image: &DynamicImage, caption: &str) -> Vec<String> {
        let mut grid = self.image_to_ascii(image);
        self.overlay_text(&mut grid, caption, self.width / 2, self.height.saturating_sub(1));
        self.grid_to_lines(&grid)
    }

    fn image_to_ascii(&self, image: &DynamicImage) -> Vec<Vec<char>> {
        let mut grid = vec![vec![' '; self.width]; self.height];
        let ramp: Vec<char> = ASCII_RAMP.chars().collect();

        let gray = image.to_luma8();
        let (img_width, img_height) = gray.dimensions();

        for (term_y, row) in grid.iter_mut().enumerate() {
            for (term_x, cell) in row.iter_mut().enumerate() {
                let img_x = (term_x as f32 / self.width as f32 * img_width as f32) as u32;
                let img_y = (term_y as f32 / self.height as f32 * img_height as f32) as u32;

                if img_x < img_width && img_y < img_height {
                    let brightness = gray.get_pixel(img_x, img_y)[0];
                    let idx = (brightness as usize * (ramp.len() - 1)) / 255;
                    *cell = ramp[idx];
                }
            }
        }

        grid
    }

    fn overlay_text(&self, grid: &mut [Vec<char>], text: &str, center_x: usize, y: usize) {
        if y >= self.height {
            return;
        }

        let text_len = text.chars().count();
        let start_x = center_x.saturating_sub(text_len / 2);

        for (i, ch) in text.chars().enumerate() {
            let x = start_x + i;
            if x < self.width {
                grid[y][x] = ch;
            }
        }
    }

    fn grid_to_lines(&self, grid: &[Vec<char>]) -> Vec<String> {
        grid.iter()
            .map(|row| row.iter().take(self.width).collect())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Luma};

    #[test]
    fn maps_brightness_onto_ramp() {
        let renderer = AsciiRenderer::new(Some(4), Some(2));
        let black = DynamicImage::ImageLuma8(ImageBuffer::from_pixel(8, 8, Luma([0u8])));
        let white = DynamicImage::ImageLuma8(ImageBuffer::from_pixel(8, 8, Luma([255u8])));

        assert_eq!(renderer.render_with_caption(&black, ""), vec!["    ".to_string(); 2]);
        assert_eq!(renderer.render_with_caption(&white, ""), vec!["@@@@".to_string(); 2]);
    }

    #[test]
    fn caption_is_centered_on_last_row() {
        let renderer = AsciiRenderer::new(Some(10), Some(3));
        let black = DynamicImage::ImageLuma8(ImageBuffer::from_pixel(10, 10, Luma([0u8])));

        let lines = renderer.render_with_caption(&black, "OK?");
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[2], "    OK?   ");
        assert_eq!(lines[0], " ".repeat(10));
    }

    #[test]
    fn captions_wider_than_frame_are_clipped() {
        let renderer = AsciiRenderer::new(Some(4), Some(1));
        let black = DynamicImage::ImageLuma8(ImageBuffer::from_pixel(4, 4, Luma([0u8])));
        let lines = renderer.render_with_caption(&black, "confirm this");
        assert_eq!(lines[0].chars().count(), 4);
    }
}
