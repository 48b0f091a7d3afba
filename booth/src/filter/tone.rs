use image::RgbImage;
use rand::Rng;

#[inline]
pub(crate) fn luminance(r: f32, g: f32, b: f32) -> f32 {
    0.299 * r + 0.587 * g + 0.114 * b
}

#[inline]
pub(crate) fn to_unit(p: &image::Rgb<u8>) -> (f32, f32, f32) {
    (
        p[0] as f32 / 255.0,
        p[1] as f32 / 255.0,
        p[2] as f32 / 255.0,
    )
}

#[inline]
pub(crate) fn to_byte(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Map every pixel through `f(x, y, r, g, b)`.
pub(crate) fn map_pixels<F>(src: &RgbImage, mut f: F) -> RgbImage
where
    F: FnMut(u32, u32, f32, f32, f32) -> (f32, f32, f32),
{
    let mut out = RgbImage::new(src.width(), src.height());
    for (x, y, p) in src.enumerate_pixels() {
        let (r, g, b) = to_unit(p);
        let (r, g, b) = f(x, y, r, g, b);
        out.put_pixel(x, y, image::Rgb([to_byte(r), to_byte(g), to_byte(b)]));
    }
    out
}

#[inline]
pub(crate) fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// Darkening factor that falls off from the centre towards the corners.
#[inline]
pub(crate) fn vignette(x: u32, y: u32, width: u32, height: u32, inner: f32, outer: f32) -> f32 {
    let dx = x as f32 / width.max(1) as f32 - 0.5;
    let dy = y as f32 / height.max(1) as f32 - 0.5;
    let dist = (dx * dx + dy * dy).sqrt();
    1.0 - smoothstep(inner, outer, dist)
}

/// Zero-mean gaussian sample (Box-Muller).
pub(crate) fn gaussian<R: Rng>(rng: &mut R, sigma: f32) -> f32 {
    let u1: f32 = rng.gen_range(f32::EPSILON..1.0);
    let u2: f32 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (std::f32::consts::TAU * u2).cos() * sigma
}

pub fn bw(src: &RgbImage) -> RgbImage {
    map_pixels(src, |_, _, r, g, b| {
        let gray = luminance(r, g, b);
        (gray, gray, gray)
    })
}

pub fn noir(src: &RgbImage) -> RgbImage {
    let (w, h) = src.dimensions();
    map_pixels(src, |x, y, r, g, b| {
        let contrast = 2.0;
        let adjusted = ((luminance(r, g, b) - 0.5) * contrast + 0.5).clamp(0.0, 1.0);
        let v = adjusted * (0.35 + 0.65 * vignette(x, y, w, h, 0.35, 0.85));
        (v, v, v)
    })
}

/// Sepia matrix followed by per-channel film grain.
pub fn vintage(src: &RgbImage) -> RgbImage {
    let mut rng = rand::thread_rng();
    map_pixels(src, |_, _, r, g, b| {
        let sr = 0.393 * r + 0.769 * g + 0.189 * b;
        let sg = 0.349 * r + 0.686 * g + 0.168 * b;
        let sb = 0.272 * r + 0.534 * g + 0.131 * b;
        (
            sr.min(1.0) + gaussian(&mut rng, 15.0 / 255.0),
            sg.min(1.0) + gaussian(&mut rng, 15.0 / 255.0),
            sb.min(1.0) + gaussian(&mut rng, 15.0 / 255.0),
        )
    })
}

/// Faded warm tone curve, vignette and monochrome grain.
pub fn retro(src: &RgbImage) -> RgbImage {
    let (w, h) = src.dimensions();
    let mut rng = rand::thread_rng();
    map_pixels(src, |x, y, r, g, b| {
        // lift and flatten
        let (r, g, b) = (r * 0.85 + 0.1, g * 0.85 + 0.1, b * 0.85 + 0.1);
        let lum = luminance(r, g, b);
        let (r, g, b) = (
            lum + (r - lum) * 0.7,
            lum + (g - lum) * 0.7,
            lum + (b - lum) * 0.7,
        );
        let (r, g, b) = (r * 1.1, g * 1.0, b * 0.8);
        let v = vignette(x, y, w, h, 0.3, 0.9);
        let grain = gaussian(&mut rng, 10.0 / 255.0);
        (r * v + grain, g * v + grain, b * v + grain)
    })
}
