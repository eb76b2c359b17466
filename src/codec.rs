//! Image codec and the collaborator interfaces around the core.
//!
//! The engine itself only works on decoded RGBA buffers. Everything that
//! touches files, vector documents or the clipboard goes through the traits
//! defined here; [`PngCodec`] is the built-in codec.

use crate::image::{BYTES_PER_PIXEL, Image};
use anyhow::anyhow;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// String key/value metadata reported by a codec, e.g. Exif tags.
pub type Metadata = HashMap<String, String>;

pub struct Decoded {
    pub image: Image,
    pub metadata: Metadata,
    /// Bits per pixel of the file before promotion to RGBA8.
    pub bits_per_pixel: u32,
}

pub trait ImageCodec {
    fn decode(&self, path: &Path) -> anyhow::Result<Decoded>;
    fn encode(&self, path: &Path, image: &Image) -> anyhow::Result<()>;

    /// Multi-page containers (e.g. TIFF). `None` when the format holds a
    /// single page.
    fn decode_multipage(&self, path: &Path) -> anyhow::Result<Option<MultiPageImage>> {
        let _ = path;
        Ok(None)
    }
}

/// PNG codec. Decodes every PNG color type to RGBA8 (16-bit channels are
/// narrowed to 8), encodes RGBA8.
#[derive(Default)]
pub struct PngCodec;

impl ImageCodec for PngCodec {
    fn decode(&self, path: &Path) -> anyhow::Result<Decoded> {
        let mut decoder = png::Decoder::new(BufReader::new(File::open(path)?));
        decoder.set_transformations(png::Transformations::normalize_to_color8());
        let mut reader = decoder.read_info()?;
        let buf_size = reader
            .output_buffer_size()
            .ok_or_else(|| anyhow!("cannot read output buffer size"))?;
        let mut buf = vec![0_u8; buf_size];
        let frame = reader.next_frame(&mut buf)?;

        let info = reader.info();
        let bits_per_pixel = info.color_type.samples() as u32 * info.bit_depth as u32;

        let (w, h) = (frame.width, frame.height);
        let mut image = Image::new(w, h);
        let line = frame.line_size;
        for y in 0..h {
            let src = &buf[y as usize * line..];
            let dst = image.row_mut(y);
            match frame.color_type {
                png::ColorType::Grayscale => {
                    for x in 0..w as usize {
                        let g = src[x];
                        dst[x * BYTES_PER_PIXEL..x * BYTES_PER_PIXEL + 4]
                            .copy_from_slice(&[g, g, g, 0xff]);
                    }
                }
                png::ColorType::GrayscaleAlpha => {
                    for x in 0..w as usize {
                        let g = src[x * 2];
                        let a = src[x * 2 + 1];
                        dst[x * BYTES_PER_PIXEL..x * BYTES_PER_PIXEL + 4]
                            .copy_from_slice(&[g, g, g, a]);
                    }
                }
                png::ColorType::Rgb => {
                    for x in 0..w as usize {
                        let p = &src[x * 3..];
                        dst[x * BYTES_PER_PIXEL..x * BYTES_PER_PIXEL + 4]
                            .copy_from_slice(&[p[2], p[1], p[0], 0xff]);
                    }
                }
                png::ColorType::Rgba => {
                    for x in 0..w as usize {
                        let p = &src[x * 4..];
                        dst[x * BYTES_PER_PIXEL..x * BYTES_PER_PIXEL + 4]
                            .copy_from_slice(&[p[2], p[1], p[0], p[3]]);
                    }
                }
                png::ColorType::Indexed => {
                    // normalize_to_color8 expands palettes
                    return Err(anyhow!("unexpanded indexed PNG"));
                }
            }
        }

        Ok(Decoded {
            image,
            metadata: Metadata::new(),
            bits_per_pixel,
        })
    }

    fn encode(&self, path: &Path, image: &Image) -> anyhow::Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        let mut encoder = png::Encoder::new(writer, image.width(), image.height());
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder.write_header()?;

        let mut rgba = Vec::with_capacity(image.data().len());
        for px in image.data().chunks_exact(BYTES_PER_PIXEL) {
            rgba.extend_from_slice(&[px[2], px[1], px[0], px[3]]);
        }
        writer.write_image_data(&rgba)?;
        Ok(())
    }
}

/// In-memory multi-page image, the model behind multi-page containers and
/// freshly created page sets.
#[derive(Clone, Default)]
pub struct MultiPageImage {
    pages: Vec<Image>,
}

impl MultiPageImage {
    pub fn new(pages: Vec<Image>) -> Self {
        Self { pages }
    }

    pub fn is_valid(&self) -> bool {
        !self.pages.is_empty()
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn page(&self, index: usize) -> Option<&Image> {
        self.pages.get(index)
    }

    pub fn replace_page(&mut self, index: usize, image: Image) {
        if index < self.pages.len() {
            self.pages[index] = image;
        }
    }

    pub fn insert_page(&mut self, index: usize, image: Image) {
        let index = index.min(self.pages.len());
        self.pages.insert(index, image);
    }

    pub fn close(&mut self) {
        self.pages.clear();
    }
}

/// Flip/rotation normalization derived from an Exif orientation tag.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct OrientationTransform {
    pub hflip: bool,
    pub vflip: bool,
    pub angle: i32,
}

const ORIENTATION_KEY: &str = "EXIF_MAIN/Orientation";

static EXIF_ORIENTATIONS: Lazy<HashMap<&'static str, OrientationTransform>> = Lazy::new(|| {
    let t = |hflip, vflip, angle| OrientationTransform {
        hflip,
        vflip,
        angle,
    };
    HashMap::from([
        ("top, right side", t(true, false, 0)),
        ("bottom, right side", t(false, false, 180)),
        ("bottom, left side", t(false, true, 0)),
        ("left side, top", t(false, true, 90)),
        ("right side, top", t(false, false, 270)),
        ("right side, bottom", t(false, true, 270)),
        ("left side, bottom", t(false, false, 90)),
    ])
});

/// Transform needed to bring a decoded image upright, per its metadata.
pub fn orientation_transform(metadata: &Metadata) -> OrientationTransform {
    metadata
        .get(ORIENTATION_KEY)
        .and_then(|v| EXIF_ORIENTATIONS.get(v.as_str()))
        .copied()
        .unwrap_or_default()
}

/// Loader for vector formats (SVG, PDF, EMF, WMF). The core ships no
/// concrete renderer; hosts inject one.
pub trait VectorRenderer {
    fn load(&self, path: &Path) -> anyhow::Result<Box<dyn VectorDocument>>;
}

/// A loaded vector document that can rasterize its pages.
pub trait VectorDocument {
    fn page_count(&self) -> usize;
    fn render(&self, page: usize, zoom: f32) -> anyhow::Result<Image>;
}

pub fn is_vector_image(path: &Path) -> bool {
    matches!(
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref(),
        Some("svg" | "pdf" | "emf" | "wmf")
    )
}

pub trait Clipboard {
    fn copy(&mut self, image: &Image) -> anyhow::Result<()>;
    fn paste(&mut self) -> Option<Image>;
}

/// Process-local clipboard holding at most one image.
#[derive(Default)]
pub struct MemoryClipboard {
    content: Option<Image>,
}

impl Clipboard for MemoryClipboard {
    fn copy(&mut self, image: &Image) -> anyhow::Result<()> {
        self.content = Some(image.clone());
        Ok(())
    }

    fn paste(&mut self) -> Option<Image> {
        self.content.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::rgba;

    #[test]
    fn png_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("img.png");

        let mut img = Image::new(3, 2);
        img.set_pixel(0, 0, rgba(10, 20, 30, 255)).unwrap();
        img.set_pixel(2, 1, rgba(200, 100, 50, 128)).unwrap();

        let codec = PngCodec;
        codec.encode(&path, &img).unwrap();
        let decoded = codec.decode(&path).unwrap();
        assert_eq!(decoded.image, img);
        assert_eq!(decoded.bits_per_pixel, 32);
        assert!(codec.decode_multipage(&path).unwrap().is_none());
    }

    #[test]
    fn decode_missing_file_fails() {
        let codec = PngCodec;
        assert!(codec.decode(Path::new("/nonexistent/image.png")).is_err());
    }

    #[test]
    fn orientation_strings_map_to_transforms() {
        let mut meta = Metadata::new();
        assert_eq!(orientation_transform(&meta), OrientationTransform::default());

        meta.insert(ORIENTATION_KEY.into(), "top, right side".into());
        let o = orientation_transform(&meta);
        assert!(o.hflip && !o.vflip && o.angle == 0);

        meta.insert(ORIENTATION_KEY.into(), "right side, top".into());
        assert_eq!(orientation_transform(&meta).angle, 270);

        meta.insert(ORIENTATION_KEY.into(), "left side, top".into());
        let o = orientation_transform(&meta);
        assert!(o.vflip && o.angle == 90);

        meta.insert(ORIENTATION_KEY.into(), "garbage".into());
        assert_eq!(orientation_transform(&meta), OrientationTransform::default());
    }

    #[test]
    fn vector_extension_detection() {
        assert!(is_vector_image(Path::new("a/drawing.SVG")));
        assert!(is_vector_image(Path::new("doc.pdf")));
        assert!(!is_vector_image(Path::new("photo.png")));
        assert!(!is_vector_image(Path::new("noext")));
    }

    #[test]
    fn multipage_paging() {
        let mut mp = MultiPageImage::new(vec![Image::new(2, 2), Image::new(2, 2)]);
        assert!(mp.is_valid());
        assert_eq!(mp.page_count(), 2);
        let mut page = Image::new(2, 2);
        page.fill(rgba(1, 2, 3, 4));
        mp.replace_page(1, page.clone());
        assert_eq!(mp.page(1), Some(&page));
        mp.insert_page(0, Image::new(1, 1));
        assert_eq!(mp.page_count(), 3);
        mp.close();
        assert!(!mp.is_valid());
    }

    #[test]
    fn memory_clipboard_round_trip() {
        let mut cb = MemoryClipboard::default();
        assert!(cb.paste().is_none());
        let mut img = Image::new(1, 1);
        img.fill(rgba(9, 9, 9, 9));
        cb.copy(&img).unwrap();
        assert_eq!(cb.paste(), Some(img));
    }
}
