//! Placeholder image shown when a frame cannot be encoded.
//!
//! Dark background with the camera id and a failure label in white, drawn
//! with a built-in 5x7 bitmap font so rendering never depends on external
//! font files.

use image::{Rgb, RgbImage};

/// Background color.
pub const BACKGROUND: Rgb<u8> = Rgb([40, 40, 40]);

/// Text color.
pub const FOREGROUND: Rgb<u8> = Rgb([255, 255, 255]);

/// Label drawn under the camera id.
pub const FAILURE_LABEL: &str = "Stream Error - Using Test Image";

const GLYPH_WIDTH: u32 = 5;
const GLYPH_HEIGHT: u32 = 7;
const MIN_SIZE: (u32, u32) = (160, 120);
const MAX_SIZE: (u32, u32) = (1920, 1080);
const FALLBACK_SIZE: (u32, u32) = (640, 480);

/// Renders a placeholder roughly the size of the failed frame.
///
/// Zero dimensions fall back to 640x480. Other sizes are clamped to
/// 160x120 ..= 1920x1080.
#[must_use]
pub fn render(width: u32, height: u32, camera_id: &str, label: &str) -> RgbImage {
    let (width, height) = if width == 0 || height == 0 {
        FALLBACK_SIZE
    } else {
        (
            width.clamp(MIN_SIZE.0, MAX_SIZE.0),
            height.clamp(MIN_SIZE.1, MAX_SIZE.1),
        )
    };
    let mut image = RgbImage::from_pixel(width, height, BACKGROUND);

    let scale = (width / 320).max(1);
    let line_height = (GLYPH_HEIGHT + 4) * scale;
    let margin = 10 * scale;
    let top = (height / 2).saturating_sub(line_height);

    draw_text(&mut image, margin, top, scale, &format!("Camera: {camera_id}"));
    draw_text(&mut image, margin, top + line_height, scale, label);
    image
}

fn draw_text(image: &mut RgbImage, x: u32, y: u32, scale: u32, text: &str) {
    let advance = (GLYPH_WIDTH + 1) * scale;
    let mut cursor = x;
    for ch in text.chars() {
        if cursor + GLYPH_WIDTH * scale > image.width() {
            break;
        }
        draw_glyph(image, cursor, y, scale, glyph(ch));
        cursor += advance;
    }
}

fn draw_glyph(image: &mut RgbImage, x: u32, y: u32, scale: u32, rows: [u8; 7]) {
    for (row, bits) in (0..GLYPH_HEIGHT).zip(rows) {
        for col in 0..GLYPH_WIDTH {
            if bits >> (GLYPH_WIDTH - 1 - col) & 1 == 0 {
                continue;
            }
            for dy in 0..scale {
                for dx in 0..scale {
                    let (px, py) = (x + col * scale + dx, y + row * scale + dy);
                    if px < image.width() && py < image.height() {
                        image.put_pixel(px, py, FOREGROUND);
                    }
                }
            }
        }
    }
}

fn glyph(ch: char) -> [u8; 7] {
    match ch.to_ascii_uppercase() {
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1E],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x11, 0x19, 0x15, 0x13, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x11, 0x0A, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        ' ' => [0; 7],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        '_' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x1F],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        ':' => [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00],
        '/' => [0x00, 0x01, 0x02, 0x04, 0x08, 0x10, 0x00],
        '(' => [0x02, 0x04, 0x08, 0x08, 0x08, 0x04, 0x02],
        ')' => [0x08, 0x04, 0x02, 0x02, 0x02, 0x04, 0x08],
        _ => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x00, 0x04],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_frame_size_within_bounds() {
        let image = render(320, 240, "cam1", FAILURE_LABEL);
        assert_eq!(image.dimensions(), (320, 240));
    }

    #[test]
    fn zero_size_uses_fallback() {
        let image = render(0, 0, "cam1", FAILURE_LABEL);
        assert_eq!(image.dimensions(), FALLBACK_SIZE);
    }

    #[test]
    fn tiny_and_huge_sizes_are_clamped() {
        assert_eq!(render(2, 2, "c", "x").dimensions(), MIN_SIZE);
        assert_eq!(render(10_000, 10_000, "c", "x").dimensions(), MAX_SIZE);
    }

    #[test]
    fn draws_text_on_background() {
        let image = render(320, 240, "cam1", FAILURE_LABEL);
        assert_eq!(image.get_pixel(0, 0), &BACKGROUND);
        let lit = image.pixels().filter(|p| **p == FOREGROUND).count();
        assert!(lit > 100);
    }

    #[test]
    fn unknown_characters_still_render() {
        let image = render(320, 240, "ü#", "");
        assert!(image.pixels().any(|p| *p == FOREGROUND));
    }
}
