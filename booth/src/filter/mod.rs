mod effects;
mod tone;

use booth_common::state::FilterKind;
use image::RgbImage;

/// Apply `filter` to `frame`, returning a new image. Bordered filters grow
/// the frame; all others keep its size.
pub fn apply(frame: &RgbImage, filter: FilterKind) -> RgbImage {
    if let Some(border) = filter.border() {
        return effects::bordered(frame, border);
    }
    match filter {
        FilterKind::None => frame.clone(),
        FilterKind::Glitch => effects::glitch(frame),
        FilterKind::Neon => effects::neon(frame),
        FilterKind::Dreamy => effects::dreamy(frame),
        FilterKind::Retro => tone::retro(frame),
        FilterKind::Noir => tone::noir(frame),
        FilterKind::Cartoon => effects::cartoon(frame),
        FilterKind::Vintage => tone::vintage(frame),
        FilterKind::Bw => tone::bw(frame),
        // bordered kinds returned above
        FilterKind::Polaroid => frame.clone(),
    }
}
