use image::{Rgb, RgbImage};

const BACKGROUND: Rgb<u8> = Rgb([0xf0, 0xf0, 0xf0]);
const INK: Rgb<u8> = Rgb([0x66, 0x66, 0x66]);

const GLYPH_W: u32 = 5;
const GLYPH_H: u32 = 7;
const SCALE: u32 = 3;
const SPACING: u32 = SCALE;

/// 5x7 bitmaps for the letters of `MediaKind::label`, one byte per row with
/// the leftmost pixel in bit 4. Other characters render blank, so a new
/// label needs its letters added here.
fn glyph(c: char) -> [u8; 7] {
    match c {
        'A' => [0x0e, 0x11, 0x11, 0x1f, 0x11, 0x11, 0x11],
        'C' => [0x0e, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0e],
        'D' => [0x1e, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1e],
        'E' => [0x1f, 0x10, 0x10, 0x1e, 0x10, 0x10, 0x1f],
        'F' => [0x1f, 0x10, 0x10, 0x1e, 0x10, 0x10, 0x10],
        'I' => [0x0e, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0e],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1f],
        'M' => [0x11, 0x1b, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x19, 0x15, 0x13, 0x11, 0x11, 0x11],
        'O' => [0x0e, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0e],
        'T' => [0x1f, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0e],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0a, 0x04],
        _ => [0x00; 7],
    }
}

/// Square tile with `label` drawn in upper case, centered.
pub(super) fn render_tile(label: &str, size: u32) -> RgbImage {
    let mut tile = RgbImage::from_pixel(size, size, BACKGROUND);

    let text: Vec<char> = label.to_uppercase().chars().collect();
    let count = text.len() as u32;
    if count == 0 {
        return tile;
    }
    let text_w = count * GLYPH_W * SCALE + (count - 1) * SPACING;
    let text_h = GLYPH_H * SCALE;
    let origin_x = size.saturating_sub(text_w) / 2;
    let origin_y = size.saturating_sub(text_h) / 2;

    for (i, c) in text.into_iter().enumerate() {
        let left = origin_x + i as u32 * (GLYPH_W * SCALE + SPACING);
        for (row, bits) in glyph(c).iter().enumerate() {
            for col in 0..GLYPH_W {
                if bits & (1 << (GLYPH_W - 1 - col)) == 0 {
                    continue;
                }
                for dy in 0..SCALE {
                    for dx in 0..SCALE {
                        let x = left + col * SCALE + dx;
                        let y = origin_y + row as u32 * SCALE + dy;
                        if x < size && y < size {
                            tile.put_pixel(x, y, INK);
                        }
                    }
                }
            }
        }
    }

    tile
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_is_centered_on_flat_background() {
        let tile = render_tile("Document", 200);
        assert_eq!(tile.dimensions(), (200, 200));
        assert_eq!(*tile.get_pixel(0, 0), BACKGROUND);
        assert_eq!(*tile.get_pixel(199, 199), BACKGROUND);

        let inked: Vec<(u32, u32)> = tile
            .enumerate_pixels()
            .filter(|(_, _, p)| **p == INK)
            .map(|(x, y, _)| (x, y))
            .collect();
        assert!(!inked.is_empty());
        let min_x = inked.iter().map(|p| p.0).min().unwrap();
        let max_x = inked.iter().map(|p| p.0).max().unwrap();
        let min_y = inked.iter().map(|p| p.1).min().unwrap();
        let max_y = inked.iter().map(|p| p.1).max().unwrap();
        assert!((min_x as i64 - (199 - max_x) as i64).abs() <= 1);
        assert!((min_y as i64 - (199 - max_y) as i64).abs() <= 1);
    }

    #[test]
    fn every_media_kind_label_has_glyphs() {
        use crate::file_types::MediaKind;
        for kind in [
            MediaKind::Image,
            MediaKind::Video,
            MediaKind::Audio,
            MediaKind::Document,
            MediaKind::Other,
        ] {
            for c in kind.label().to_uppercase().chars() {
                assert_ne!(glyph(c), [0x00; 7], "no glyph for {:?} in {}", c, kind.label());
            }
        }
    }

    #[test]
    fn labels_differ() {
        assert_ne!(render_tile("Video", 200), render_tile("Audio", 200));
    }
}
