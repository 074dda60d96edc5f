//! Perceptual comparison of avatar images.
//!
//! Remote CDNs re-encode and re-host the same picture, so URL equality is
//! useless and byte equality nearly so. Two images count as the same when
//! at most 1% of their pixels differ beyond a small per-channel tolerance.

const PIXEL_DIFF_LIMIT: f64 = 0.01;
const CHANNEL_TOLERANCE: i16 = 8;

/// True when the two encoded images should be treated as different
/// pictures. Decode failures count as changed so a bad cache never pins a
/// stale avatar.
pub fn avatar_changed(old: &[u8], new: &[u8]) -> bool {
    let old = match image::load_from_memory(old) {
        Ok(img) => img.to_rgba8(),
        Err(e) => {
            log::warn!("Could not decode stored avatar: {}", e);
            return true;
        }
    };
    let new = match image::load_from_memory(new) {
        Ok(img) => img.to_rgba8(),
        Err(e) => {
            log::warn!("Could not decode fetched avatar: {}", e);
            return true;
        }
    };

    if old.dimensions() != new.dimensions() {
        return true;
    }

    let total = (old.width() as u64 * old.height() as u64).max(1);
    let mut differing = 0u64;
    for (a, b) in old.pixels().zip(new.pixels()) {
        let mismatch = a
            .0
            .iter()
            .zip(b.0.iter())
            .any(|(&x, &y)| (x as i16 - y as i16).abs() > CHANNEL_TOLERANCE);
        if mismatch {
            differing += 1;
        }
    }

    (differing as f64 / total as f64) > PIXEL_DIFF_LIMIT
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgba};
    use std::io::Cursor;

    fn encode(img: &ImageBuffer<Rgba<u8>, Vec<u8>>) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn solid(w: u32, h: u32, px: [u8; 4]) -> ImageBuffer<Rgba<u8>, Vec<u8>> {
        ImageBuffer::from_pixel(w, h, Rgba(px))
    }

    #[test]
    fn identical_images_unchanged() {
        let img = encode(&solid(20, 20, [120, 40, 200, 255]));
        assert!(!avatar_changed(&img, &img));
    }

    #[test]
    fn tiny_pixel_noise_is_unchanged() {
        let base = solid(20, 20, [120, 40, 200, 255]);
        let mut noisy = base.clone();
        // 3 of 400 pixels differ, under the 1% limit.
        for x in 0..3 {
            noisy.put_pixel(x, 0, Rgba([0, 0, 0, 255]));
        }
        assert!(!avatar_changed(&encode(&base), &encode(&noisy)));
    }

    #[test]
    fn large_region_change_is_changed() {
        let base = solid(20, 20, [120, 40, 200, 255]);
        let mut edited = base.clone();
        for x in 0..10 {
            for y in 0..10 {
                edited.put_pixel(x, y, Rgba([0, 255, 0, 255]));
            }
        }
        assert!(avatar_changed(&encode(&base), &encode(&edited)));
    }

    #[test]
    fn dimension_change_is_changed() {
        let a = encode(&solid(20, 20, [1, 2, 3, 255]));
        let b = encode(&solid(10, 10, [1, 2, 3, 255]));
        assert!(avatar_changed(&a, &b));
    }

    #[test]
    fn undecodable_bytes_are_changed() {
        let ok = encode(&solid(4, 4, [1, 2, 3, 255]));
        assert!(avatar_changed(b"not an image", &ok));
        assert!(avatar_changed(&ok, b"not an image"));
    }
}
