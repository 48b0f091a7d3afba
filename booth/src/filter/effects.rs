use booth_common::state::Border;
use image::{imageops, GrayImage, Rgb, RgbImage};

use super::tone::{luminance, map_pixels, to_byte, to_unit};

/// Deterministic pseudo-random value in 0..1 for an integer seed.
#[inline]
fn hash(seed: f32) -> f32 {
    ((seed * 127.1 + 311.7).sin() * 43758.5453).fract().abs()
}

fn sample(src: &RgbImage, x: i64, y: i64) -> Rgb<u8> {
    let x = x.clamp(0, src.width() as i64 - 1) as u32;
    let y = y.clamp(0, src.height() as i64 - 1) as u32;
    *src.get_pixel(x, y)
}

fn gray(src: &RgbImage) -> GrayImage {
    let mut out = GrayImage::new(src.width(), src.height());
    for (x, y, p) in src.enumerate_pixels() {
        let (r, g, b) = to_unit(p);
        out.put_pixel(x, y, image::Luma([to_byte(luminance(r, g, b))]));
    }
    out
}

/// Sobel gradient magnitude per pixel, normalized so a hard black/white
/// step is about 1.0.
fn sobel(gray: &GrayImage) -> Vec<f32> {
    let (w, h) = (gray.width() as i64, gray.height() as i64);
    let at = |x: i64, y: i64| -> f32 {
        let x = x.clamp(0, w - 1) as u32;
        let y = y.clamp(0, h - 1) as u32;
        gray.get_pixel(x, y)[0] as f32 / 255.0
    };

    let mut out = Vec::with_capacity((w * h) as usize);
    for y in 0..h {
        for x in 0..w {
            let tl = at(x - 1, y - 1);
            let tm = at(x, y - 1);
            let tr = at(x + 1, y - 1);
            let ml = at(x - 1, y);
            let mr = at(x + 1, y);
            let bl = at(x - 1, y + 1);
            let bm = at(x, y + 1);
            let br = at(x + 1, y + 1);

            let gx = -tl - 2.0 * ml - bl + tr + 2.0 * mr + br;
            let gy = -tl - 2.0 * tm - tr + bl + 2.0 * bm + br;
            out.push((gx * gx + gy * gy).sqrt() / 4.0);
        }
    }
    out
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> (f32, f32, f32) {
    let h = h.rem_euclid(1.0) * 6.0;
    let i = h.floor();
    let f = h - i;
    let p = v * (1.0 - s);
    let q = v * (1.0 - s * f);
    let t = v * (1.0 - s * (1.0 - f));
    match i as u32 {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    }
}

/// Red and blue pulled apart horizontally, then a few bands of rows shifted
/// sideways. Band choice is a fixed function of the band index.
pub fn glitch(src: &RgbImage) -> RgbImage {
    let (w, h) = src.dimensions();
    let split = ((w as f32 * 0.01).round() as i64).max(1);
    let band_height = (h / 12).max(1);
    let max_shift = (w as f32 * 0.05).max(1.0);

    let mut out = RgbImage::new(w, h);
    for y in 0..h {
        let band = (y / band_height) as f32;
        let shift = if hash(band) > 0.7 {
            ((hash(band + 17.0) * 2.0 - 1.0) * max_shift) as i64
        } else {
            0
        };
        for x in 0..w {
            let sx = x as i64 + shift;
            let r = sample(src, sx + split, y as i64)[0];
            let g = sample(src, sx, y as i64)[1];
            let b = sample(src, sx - split, y as i64)[2];
            out.put_pixel(x, y, Rgb([r, g, b]));
        }
    }
    out
}

/// Bright edges coloured by a hue that cycles across the frame, over a dark
/// saturated copy of the image.
pub fn neon(src: &RgbImage) -> RgbImage {
    let (w, h) = src.dimensions();
    let edges = sobel(&gray(src));
    let span = (w + h).max(1) as f32;

    map_pixels(src, |x, y, r, g, b| {
        let lum = luminance(r, g, b);
        let (br, bg, bb) = (
            (lum + (r - lum) * 1.6) * 0.25,
            (lum + (g - lum) * 1.6) * 0.25,
            (lum + (b - lum) * 1.6) * 0.25,
        );
        let edge = (edges[(y * w + x) as usize] * 3.0).min(1.0);
        let (nr, ng, nb) = hsv_to_rgb((x + y) as f32 / span * 2.0, 1.0, 1.0);
        (br + nr * edge, bg + ng * edge, bb + nb * edge)
    })
}

/// Gaussian glow screen-blended over the frame, lifted blacks, warm tint.
pub fn dreamy(src: &RgbImage) -> RgbImage {
    let sigma = (src.width().max(src.height()) as f32 * 0.01).max(2.0);
    let glow = imageops::blur(src, sigma);

    map_pixels(src, |x, y, r, g, b| {
        let (gr, gg, gb) = to_unit(glow.get_pixel(x, y));
        let screen = |a: f32, b: f32| 1.0 - (1.0 - a) * (1.0 - b);
        let (r, g, b) = (screen(r, gr), screen(g, gg), screen(b, gb));
        let (r, g, b) = (r * 0.9 + 0.08, g * 0.9 + 0.08, b * 0.9 + 0.08);
        (r * 1.05, g, b * 0.93)
    })
}

/// Smoothed colour quantized to a few levels, with dark outlines where the
/// smoothed image has strong edges.
pub fn cartoon(src: &RgbImage) -> RgbImage {
    let smooth = imageops::blur(src, 1.5);
    let edges = sobel(&gray(&smooth));
    let w = src.width();
    let levels = 6.0;

    map_pixels(&smooth, |x, y, r, g, b| {
        if edges[(y * w + x) as usize] > 0.2 {
            return (0.0, 0.0, 0.0);
        }
        let q = |v: f32| ((v * levels).floor() / levels + 0.5 / levels).min(1.0);
        (q(r), q(g), q(b))
    })
}

/// Frame the image in a solid border. Every edge is at least one pixel.
pub fn bordered(src: &RgbImage, border: Border) -> RgbImage {
    let (w, h) = src.dimensions();
    let side = ((w as f32 * border.side) as u32).max(1);
    let bottom = ((h as f32 * border.bottom) as u32).max(1);

    let mut canvas = RgbImage::from_pixel(w + 2 * side, h + side + bottom, Rgb(border.color));
    imageops::replace(&mut canvas, src, side as i64, side as i64);
    canvas
}
