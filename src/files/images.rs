//! Image probing and derivative generation for the upload pipeline.
//!
//! The probe runs on the head bytes only and never decodes pixel data; the
//! derivative path decodes the written upload exactly once and produces all
//! three JPEG renditions from that single decode.

use std::io::Cursor;
use std::sync::OnceLock;

use image::codecs::gif::GifDecoder;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::metadata::Orientation;
use image::{AnimationDecoder, DynamicImage, ImageDecoder, ImageReader, RgbImage};
use regex::Regex;

use crate::error::{AppError, AppResult};
use crate::model::FileInfo;

/// Uploads above this pixel count are rejected before any decode.
const MAX_IMAGE_PIXELS: u64 = 6048 * 4032;
const THUMBNAIL_WIDTH: u32 = 120;
const THUMBNAIL_HEIGHT: u32 = 100;
const PREVIEW_WIDTH: u32 = 1920;
const MINI_PREVIEW_SIZE: u32 = 16;
const JPEG_QUALITY: u8 = 90;

static SVG_TAG: OnceLock<Regex> = OnceLock::new();
static SVG_WIDTH: OnceLock<Regex> = OnceLock::new();
static SVG_HEIGHT: OnceLock<Regex> = OnceLock::new();
static SVG_VIEWBOX: OnceLock<Regex> = OnceLock::new();

/// Fill `info`'s dimensions from the head bytes without a full decode.
///
/// SVG gets a text probe and never a preview. A raster probe that cannot
/// parse the head leaves the info untouched; an image over the resolution
/// cap is the one probe outcome that fails the upload.
pub(super) fn probe_image(info: &mut FileInfo, head: &[u8]) -> AppResult<()> {
    if info.is_svg() {
        if let Some((width, height)) = svg_dimensions(head) {
            info.width = width;
            info.height = height;
        }
        info.has_preview_image = false;
        return Ok(());
    }

    let Ok(reader) = ImageReader::new(Cursor::new(head)).with_guessed_format() else {
        return Ok(());
    };
    let Ok((mut width, mut height)) = reader.into_dimensions() else {
        return Ok(());
    };
    if u64::from(width) * u64::from(height) > MAX_IMAGE_PIXELS {
        return Err(AppError::invalid_input(
            "app.file.upload_file.large_image.app_error",
            "image resolution is too high",
        )
        .with_detail(format!("{width}x{height}")));
    }
    // A rotating EXIF orientation reports the pre-rotation dimensions.
    if orientation_swaps_axes(head) {
        std::mem::swap(&mut width, &mut height);
    }
    info.width = width;
    info.height = height;
    info.has_preview_image = true;
    Ok(())
}

fn orientation_swaps_axes(head: &[u8]) -> bool {
    let Ok(reader) = ImageReader::new(Cursor::new(head)).with_guessed_format() else {
        return false;
    };
    let Ok(mut decoder) = reader.into_decoder() else {
        return false;
    };
    matches!(
        decoder.orientation(),
        Ok(Orientation::Rotate90
            | Orientation::Rotate270
            | Orientation::Rotate90FlipH
            | Orientation::Rotate270FlipH)
    )
}

/// Structural check for payloads that must be SVG, like bot icons.
pub(crate) fn looks_like_svg(data: &[u8]) -> bool {
    let text = String::from_utf8_lossy(data);
    SVG_TAG
        .get_or_init(|| Regex::new(r"(?s)<svg\b[^>]*>").unwrap())
        .is_match(&text)
}

/// Pull width/height out of the opening `<svg>` tag, falling back to the
/// viewBox when the attributes are absent or non-numeric.
fn svg_dimensions(head: &[u8]) -> Option<(u32, u32)> {
    let text = String::from_utf8_lossy(head);
    let tag_re = SVG_TAG.get_or_init(|| Regex::new(r"(?s)<svg\b[^>]*>").unwrap());
    let tag = tag_re.find(&text)?.as_str();

    let width_re = SVG_WIDTH.get_or_init(|| {
        Regex::new(r#"\bwidth\s*=\s*["']([0-9]+(?:\.[0-9]+)?)(?:px)?["']"#).unwrap()
    });
    let height_re = SVG_HEIGHT.get_or_init(|| {
        Regex::new(r#"\bheight\s*=\s*["']([0-9]+(?:\.[0-9]+)?)(?:px)?["']"#).unwrap()
    });
    let attr = |re: &Regex| -> Option<f64> { re.captures(tag)?.get(1)?.as_str().parse().ok() };
    if let (Some(width), Some(height)) = (attr(width_re), attr(height_re))
        && width >= 1.0
        && height >= 1.0
    {
        return Some((width as u32, height as u32));
    }

    let viewbox_re = SVG_VIEWBOX.get_or_init(|| {
        Regex::new(
            r#"\bviewBox\s*=\s*["']\s*[-0-9.]+[\s,]+[-0-9.]+[\s,]+([0-9.]+)[\s,]+([0-9.]+)\s*["']"#,
        )
        .unwrap()
    });
    let caps = viewbox_re.captures(tag)?;
    let width: f64 = caps.get(1)?.as_str().parse().ok()?;
    let height: f64 = caps.get(2)?.as_str().parse().ok()?;
    (width >= 1.0 && height >= 1.0).then_some((width as u32, height as u32))
}

/// Decode the written upload for derivative generation.
///
/// Animated GIFs decode once, to their first frame, so the three renditions
/// never re-run the frame decoder. Other formats are rotated upright per
/// their EXIF orientation.
pub(super) fn decode_upload(data: &[u8], mime_type: &str) -> AppResult<DynamicImage> {
    let decode_err = |err: image::ImageError| {
        AppError::invalid_input(
            "app.file.upload_file.decode.app_error",
            "unable to decode image",
        )
        .with_detail(err.to_string())
    };

    if mime_type == "image/gif" {
        let decoder = GifDecoder::new(Cursor::new(data)).map_err(decode_err)?;
        let first = decoder
            .into_frames()
            .next()
            .ok_or_else(|| {
                AppError::invalid_input(
                    "app.file.upload_file.decode.app_error",
                    "gif has no frames",
                )
            })?
            .map_err(decode_err)?;
        return Ok(DynamicImage::ImageRgba8(first.into_buffer()));
    }

    let reader = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|err| {
            AppError::invalid_input(
                "app.file.upload_file.decode.app_error",
                "unable to decode image",
            )
            .with_detail(err.to_string())
        })?;
    let mut decoder = reader.into_decoder().map_err(decode_err)?;
    let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
    let mut image = DynamicImage::from_decoder(decoder).map_err(decode_err)?;
    image.apply_orientation(orientation);
    Ok(image)
}

/// The three JPEG q=90 renditions of one decoded upload.
pub(super) struct Derivatives {
    pub thumbnail: Vec<u8>,
    pub preview: Vec<u8>,
    pub mini_preview: Vec<u8>,
}

pub(super) fn generate_derivatives(
    image: &DynamicImage,
    fill_transparency: bool,
) -> AppResult<Derivatives> {
    let base: DynamicImage = if fill_transparency {
        DynamicImage::ImageRgb8(flatten_onto_white(image))
    } else {
        image.clone()
    };

    let thumbnail = encode_jpeg(&base.thumbnail(THUMBNAIL_WIDTH, THUMBNAIL_HEIGHT))?;
    let preview = if base.width() > PREVIEW_WIDTH {
        encode_jpeg(&base.resize(PREVIEW_WIDTH, u32::MAX, FilterType::Lanczos3))?
    } else {
        encode_jpeg(&base)?
    };
    let mini_preview = encode_jpeg(&base.thumbnail(MINI_PREVIEW_SIZE, MINI_PREVIEW_SIZE))?;
    Ok(Derivatives {
        thumbnail,
        preview,
        mini_preview,
    })
}

/// Blend transparent pixels onto a white background; JPEG has no alpha.
fn flatten_onto_white(image: &DynamicImage) -> RgbImage {
    let rgba = image.to_rgba8();
    let mut out = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let [r, g, b, a] = pixel.0;
        let alpha = u32::from(a);
        let blend = |c: u8| ((u32::from(c) * alpha + 255 * (255 - alpha)) / 255) as u8;
        out.put_pixel(x, y, image::Rgb([blend(r), blend(g), blend(b)]));
    }
    out
}

fn encode_jpeg(image: &DynamicImage) -> AppResult<Vec<u8>> {
    let rgb = image.to_rgb8();
    let mut buf = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY);
    encoder.encode_image(&rgb).map_err(|err| {
        AppError::internal(
            "app.file.upload_file.encode.app_error",
            "unable to encode image derivative",
        )
        .with_detail(err.to_string())
    })?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::gif::GifEncoder;
    use image::{Frame, ImageBuffer, ImageFormat, Luma, Rgba};

    fn png_bytes(width: u32, height: u32, pixel: Rgba<u8>) -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(ImageBuffer::from_pixel(width, height, pixel));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    fn info_for(filename: &str) -> FileInfo {
        let mut info = FileInfo::new("u1");
        info.set_names(filename);
        info
    }

    #[test]
    fn probe_reads_raster_dimensions() {
        let mut info = info_for("pic.png");
        probe_image(&mut info, &png_bytes(64, 48, Rgba([10, 20, 30, 255]))).unwrap();
        assert_eq!((info.width, info.height), (64, 48));
        assert!(info.has_preview_image);
    }

    #[test]
    fn unparseable_head_leaves_info_untouched() {
        let mut info = info_for("pic.png");
        probe_image(&mut info, b"definitely not a png").unwrap();
        assert_eq!((info.width, info.height), (0, 0));
        assert!(!info.has_preview_image);
    }

    #[test]
    fn oversized_image_is_rejected_at_probe() {
        // Header-only check, so a flat one-channel image keeps this cheap.
        let img = DynamicImage::ImageLuma8(ImageBuffer::from_pixel(6100, 4100, Luma([0u8])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();

        let mut info = info_for("huge.png");
        let err = probe_image(&mut info, &buf).unwrap_err();
        assert_eq!(err.id(), "app.file.upload_file.large_image.app_error");
    }

    #[test]
    fn svg_detection() {
        assert!(looks_like_svg(br#"<?xml version="1.0"?><svg xmlns="x"></svg>"#));
        assert!(!looks_like_svg(b"\x89PNG\r\n"));
    }

    #[test]
    fn svg_attributes_and_viewbox_fallback() {
        let mut info = info_for("logo.svg");
        probe_image(
            &mut info,
            br#"<?xml version="1.0"?><svg width="300" height="150" xmlns="x"></svg>"#,
        )
        .unwrap();
        assert_eq!((info.width, info.height), (300, 150));
        assert!(!info.has_preview_image);

        let mut info = info_for("logo.svg");
        probe_image(
            &mut info,
            br#"<svg width="100%" height="100%" viewBox="0 0 24 16"></svg>"#,
        )
        .unwrap();
        assert_eq!((info.width, info.height), (24, 16));

        let mut info = info_for("logo.svg");
        probe_image(&mut info, b"<svg></svg>").unwrap();
        assert_eq!((info.width, info.height), (0, 0));
    }

    #[test]
    fn derivatives_fit_their_bounds() {
        let source = decode_upload(&png_bytes(600, 400, Rgba([200, 10, 10, 255])), "image/png")
            .unwrap();
        let derived = generate_derivatives(&source, true).unwrap();

        let thumb = image::load_from_memory(&derived.thumbnail).unwrap();
        assert_eq!((thumb.width(), thumb.height()), (120, 80));
        let preview = image::load_from_memory(&derived.preview).unwrap();
        assert_eq!((preview.width(), preview.height()), (600, 400));
        let mini = image::load_from_memory(&derived.mini_preview).unwrap();
        assert!(mini.width() <= 16 && mini.height() <= 16);
    }

    #[test]
    fn wide_images_shrink_to_the_preview_width() {
        let source = decode_upload(&png_bytes(3840, 1080, Rgba([0, 0, 0, 255])), "image/png")
            .unwrap();
        let derived = generate_derivatives(&source, false).unwrap();
        let preview = image::load_from_memory(&derived.preview).unwrap();
        assert_eq!(preview.width(), 1920);
        assert_eq!(preview.height(), 540);
    }

    #[test]
    fn transparency_flattens_to_white() {
        let flat = flatten_onto_white(&DynamicImage::ImageRgba8(ImageBuffer::from_pixel(
            2,
            1,
            Rgba([0, 0, 0, 0]),
        )));
        assert_eq!(flat.get_pixel(0, 0).0, [255, 255, 255]);

        let opaque = flatten_onto_white(&DynamicImage::ImageRgba8(ImageBuffer::from_pixel(
            1,
            1,
            Rgba([255, 0, 0, 255]),
        )));
        assert_eq!(opaque.get_pixel(0, 0).0, [255, 0, 0]);
    }

    #[test]
    fn gif_decodes_to_its_first_frame() {
        let frame_buf: ImageBuffer<Rgba<u8>, Vec<u8>> =
            ImageBuffer::from_pixel(20, 10, Rgba([0, 255, 0, 255]));
        let mut buf = Vec::new();
        {
            let mut encoder = GifEncoder::new(&mut buf);
            encoder.encode_frame(Frame::new(frame_buf)).unwrap();
        }

        let decoded = decode_upload(&buf, "image/gif").unwrap();
        assert_eq!((decoded.width(), decoded.height()), (20, 10));
    }
}
