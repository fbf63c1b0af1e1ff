use ab_glyph::{FontRef, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use std::sync::OnceLock;

pub const GREEN: Rgb<u8> = Rgb([0, 255, 0]);

const BOX_THICKNESS: u32 = 2;
const TEXT_SCALE: f32 = 16.0;
/// Gap between the caption's bottom edge and the box's top edge
const CAPTION_OFFSET: i32 = 10;

static FONT_DATA: &[u8] = include_bytes!("../../assets/DejaVuSansMono.ttf");

fn caption_font() -> Option<&'static FontRef<'static>> {
    static FONT: OnceLock<Option<FontRef<'static>>> = OnceLock::new();
    FONT.get_or_init(|| match FontRef::try_from_slice(FONT_DATA) {
        Ok(font) => Some(font),
        Err(e) => {
            tracing::warn!("Caption font unavailable, boxes are drawn without labels: {}", e);
            None
        }
    })
    .as_ref()
}

/// Outline `thickness` pixels wide, drawn inwards from the outer rectangle
fn draw_box(image: &mut RgbImage, x: i32, y: i32, width: u32, height: u32, thickness: u32, color: Rgb<u8>) {
    for t in 0..thickness {
        let (w, h) = (width.saturating_sub(2 * t), height.saturating_sub(2 * t));
        if w == 0 || h == 0 {
            break;
        }
        draw_hollow_rect_mut(image, Rect::at(x + t as i32, y + t as i32).of_size(w, h), color);
    }
}

/// Box outline plus a caption above it, or just inside it when there is no room above
pub fn draw_labeled_box(image: &mut RgbImage, x: u32, y: u32, width: u32, height: u32, caption: &str, color: Rgb<u8>) {
    draw_box(image, x as i32, y as i32, width, height, BOX_THICKNESS, color);

    let Some(font) = caption_font() else {
        return;
    };
    let scale = PxScale::from(TEXT_SCALE);
    let (_, text_height) = text_size(scale, font, caption);

    let above = y as i32 - CAPTION_OFFSET - text_height as i32;
    let caption_y = if above >= 0 {
        above
    } else {
        (y + BOX_THICKNESS + 1) as i32
    };
    draw_text_mut(image, color, x as i32, caption_y, scale, font, caption);
}
