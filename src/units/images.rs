//! Image recompression, wrapped in the content-addressed cache so unchanged
//! images are never recompressed twice. GIFs and formats the decoder does
//! not recognize copy through unchanged.

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ExtendedColorType, ImageEncoder, ImageFormat};

use crate::cache::ImageCache;
use crate::error::TransformError;
use crate::pipeline::{Artifact, Transform};

pub const JPEG_QUALITY: u8 = 85;

pub struct RecompressImage {
    cache: ImageCache,
    jpeg_quality: u8,
}

impl RecompressImage {
    pub fn new(cache: ImageCache) -> Self {
        Self {
            cache,
            jpeg_quality: JPEG_QUALITY,
        }
    }
}

impl Transform for RecompressImage {
    fn name(&self) -> &'static str {
        "imagemin"
    }

    fn apply(&self, artifact: Artifact) -> Result<Artifact, TransformError> {
        let ext = artifact
            .rel
            .extension()
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        if ext == "svg" {
            let data = self.cache.memoize(&artifact.data, "svg-strip", minify_svg)?;
            return Ok(artifact.with_data(data));
        }

        let data = match image::guess_format(&artifact.data) {
            Ok(ImageFormat::Jpeg) => {
                let quality = self.jpeg_quality;
                let params = format!("jpeg-q{quality}");
                self.cache
                    .memoize(&artifact.data, &params, |data| reencode_jpeg(data, quality))?
            }
            Ok(ImageFormat::Png) => self
                .cache
                .memoize(&artifact.data, "png-best-adaptive", reencode_png)?,
            // GIFs and anything unrecognized copy through unchanged
            _ => return Ok(artifact),
        };

        Ok(artifact.with_data(data))
    }
}

fn reencode_jpeg(data: &[u8], quality: u8) -> Result<Vec<u8>, TransformError> {
    let img = image::load_from_memory(data)?;
    let (w, h) = (img.width(), img.height());

    let mut out = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut out, quality);
    encoder.encode(&img.to_rgb8(), w, h, ExtendedColorType::Rgb8)?;

    Ok(out)
}

fn reencode_png(data: &[u8]) -> Result<Vec<u8>, TransformError> {
    let img = image::load_from_memory(data)?;
    let (w, h) = (img.width(), img.height());

    let mut out = Vec::new();
    let encoder = PngEncoder::new_with_quality(&mut out, CompressionType::Best, FilterType::Adaptive);
    encoder.write_image(&img.to_rgba8(), w, h, ExtendedColorType::Rgba8)?;

    Ok(out)
}

/// Drops XML comments and whitespace-only text between tags. Attributes,
/// including `viewBox`, are never rewritten.
fn minify_svg(data: &[u8]) -> Result<Vec<u8>, TransformError> {
    let text = std::str::from_utf8(data)?;
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(open) = rest.find("<!--") {
        out.push_str(&rest[..open]);
        match rest[open..].find("-->") {
            Some(close) => rest = &rest[open + close + 3..],
            None => {
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);

    let mut collapsed = String::with_capacity(out.len());
    let mut rest = out.as_str();

    while let Some(gt) = rest.find('>') {
        collapsed.push_str(&rest[..=gt]);
        rest = &rest[gt + 1..];

        if let Some(lt) = rest.find('<') {
            let between = &rest[..lt];
            if !between.trim().is_empty() {
                collapsed.push_str(between);
            }
            rest = &rest[lt..];
        }
    }
    collapsed.push_str(rest);

    Ok(collapsed.trim().to_string().into_bytes())
}

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;

    use super::*;

    fn cache() -> (tempfile::TempDir, ImageCache) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().join("img")).unwrap();
        (dir, ImageCache::new(root))
    }

    fn png_bytes() -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(4, 4, image::Rgba([120, 30, 200, 255]));
        let mut out = Vec::new();
        PngEncoder::new(&mut out)
            .write_image(&img, 4, 4, ExtendedColorType::Rgba8)
            .unwrap();
        out
    }

    fn artifact(rel: &str, data: Vec<u8>) -> Artifact {
        Artifact::new(format!("src/img/{rel}").into(), rel.into(), data)
    }

    #[test]
    fn png_is_reencoded_deterministically() {
        let (_dir, cache) = cache();
        let transform = RecompressImage::new(cache);

        let a = transform.apply(artifact("a.png", png_bytes())).unwrap();
        let b = transform.apply(artifact("a.png", png_bytes())).unwrap();

        assert_eq!(a.data, b.data);
        assert!(image::guess_format(&a.data).is_ok_and(|f| f == ImageFormat::Png));
    }

    #[test]
    fn jpeg_reencode_produces_a_jpeg() {
        let out = reencode_jpeg(&{
            let img = image::RgbImage::from_pixel(4, 4, image::Rgb([10, 20, 30]));
            let mut buf = Vec::new();
            let mut enc = JpegEncoder::new_with_quality(&mut buf, 100);
            enc.encode(&img, 4, 4, ExtendedColorType::Rgb8).unwrap();
            buf
        }, JPEG_QUALITY)
        .unwrap();

        assert!(image::guess_format(&out).is_ok_and(|f| f == ImageFormat::Jpeg));
    }

    #[test]
    fn svg_loses_comments_and_inter_tag_whitespace_only() {
        let svg = "<svg viewBox=\"0 0 10 10\">\n  <!-- a comment -->\n  <text>hello world</text>\n</svg>\n";
        let out = minify_svg(svg.as_bytes()).unwrap();
        let out = String::from_utf8(out).unwrap();

        assert_eq!(
            out,
            "<svg viewBox=\"0 0 10 10\"><text>hello world</text></svg>"
        );
    }

    #[test]
    fn corrupt_image_data_is_a_transform_error() {
        let (_dir, cache) = cache();
        let transform = RecompressImage::new(cache);

        // a PNG signature followed by garbage
        let mut data = vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];
        data.extend_from_slice(b"not a real png");

        let err = transform.apply(artifact("bad.png", data)).unwrap_err();
        assert!(matches!(err, TransformError::Image(_)));
    }

    #[test]
    fn unrecognized_formats_copy_through() {
        let (_dir, cache) = cache();
        let transform = RecompressImage::new(cache);

        let out = transform
            .apply(artifact("notes.txt", b"plain text".to_vec()))
            .unwrap();
        assert_eq!(out.data, b"plain text");
    }
}
