//! Two- and three-pane image difference buffer.
//!
//! The buffer owns up to three panes, each with its decoded original, the
//! working RGBA copy, a preprocessed copy (ghost rows spliced in when
//! insertion/deletion detection is active) and a composed output image.
//! `compare_images` runs the pipeline: preprocess, block compare per pane
//! pair, flood-fill labeling, three-way classification, then `refresh_images`
//! recomposes the outputs (overlay, wipe, highlight).

use crate::codec::{
    ImageCodec, MultiPageImage, PngCodec, VectorDocument, VectorRenderer, is_vector_image,
    orientation_transform,
};
use crate::image::{Color, Image, color_distance2, pixel_distance2, rgb, value_b, value_g, value_r};
use crate::line_diff::{LineDiffInfo, make_3way_line_diff, make_line_diff, prime_line_diffs};
use crate::scanline::{Algorithm, rows_equal};
use crate::{Error, OpType, Result};
use log::debug;
use serde::Serialize;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

pub const DEFAULT_BLINK_INTERVAL_MS: u64 = 800;
pub const DEFAULT_OVERLAY_ANIM_INTERVAL_MS: u64 = 1000;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum InsertionDeletionMode {
    #[default]
    None,
    Vertical,
    Horizontal,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum OverlayMode {
    #[default]
    None,
    Xor,
    AlphaBlend,
    AlphaBlendAnim,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum WipeMode {
    #[default]
    None,
    Vertical,
    Horizontal,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

/// Rectangle in block coordinates, left/top inclusive, right/bottom
/// exclusive.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
pub struct DiffInfo {
    pub op: OpType,
    pub rect: Rect,
}

/// Grid of block labels: 0 equal, -1 differing but unlabeled, k >= 1 member
/// of region k - 1.
#[derive(Clone, Default)]
pub struct BlockGrid {
    width: usize,
    height: usize,
    data: Vec<i32>,
}

impl BlockGrid {
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn resize(&mut self, width: usize, height: usize) {
        self.width = width;
        self.height = height;
        self.data.clear();
        self.data.resize(width * height, 0);
    }

    #[inline(always)]
    pub fn get(&self, x: usize, y: usize) -> i32 {
        self.data[y * self.width + x]
    }

    #[inline(always)]
    pub fn set(&mut self, x: usize, y: usize, value: i32) {
        self.data[y * self.width + x] = value;
    }
}

/// Wall clock used by blink and overlay animation. Injectable so tests stay
/// deterministic.
pub trait Clock {
    fn now_millis(&self) -> u64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// Fire-and-forget notifications to the host.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Event {
    Open,
    New,
    Refresh,
    ScrollToDiff(i32),
}

pub struct ImgDiffBuffer {
    pub(crate) nimages: usize,
    pub(crate) filenames: [PathBuf; 3],
    pub(crate) img_orig_multipage: [MultiPageImage; 3],
    pub(crate) offset: [Point; 3],
    pub(crate) img_orig: [Image; 3],
    pub(crate) img_orig32: [Image; 3],
    pub(crate) img_preprocessed: [Image; 3],
    pub(crate) img_diff: [Image; 3],
    img_diff_map: Image,
    pub(crate) bpp: [u32; 3],
    pub(crate) current_page: [usize; 3],
    show_differences: bool,
    blink_differences: bool,
    vector_image_zoom_ratio: f32,
    insertion_deletion_mode: InsertionDeletionMode,
    overlay_mode: OverlayMode,
    overlay_alpha: f64,
    wipe_mode: WipeMode,
    wipe_position: i32,
    pub(crate) diff_block_size: u32,
    sel_diff_color: Color,
    sel_diff_deleted_color: Color,
    diff_color: Color,
    diff_deleted_color: Color,
    diff_color_alpha: f64,
    color_distance_threshold: f64,
    angle: [i32; 3],
    hflip: [bool; 3],
    vflip: [bool; 3],
    current_diff_index: i32,
    pub(crate) diff_count: i32,
    pub(crate) diff: BlockGrid,
    diff01: BlockGrid,
    diff21: BlockGrid,
    diff02: BlockGrid,
    pub(crate) diff_infos: Vec<DiffInfo>,
    pub(crate) line_diff_infos: Vec<LineDiffInfo>,
    pub(crate) temporarily_transformed: bool,
    diff_algorithm: Algorithm,
    blink_interval_ms: u64,
    overlay_anim_interval_ms: u64,
    pub(crate) codec: Box<dyn ImageCodec>,
    renderer: Option<Box<dyn VectorRenderer>>,
    pub(crate) vector_docs: [Option<Box<dyn VectorDocument>>; 3],
    clock: Box<dyn Clock>,
    listener: Option<Box<dyn Fn(Event)>>,
}

impl Default for ImgDiffBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl ImgDiffBuffer {
    pub fn new() -> Self {
        Self::with_codec(Box::new(PngCodec))
    }

    pub fn with_codec(codec: Box<dyn ImageCodec>) -> Self {
        Self {
            nimages: 0,
            filenames: Default::default(),
            img_orig_multipage: Default::default(),
            offset: Default::default(),
            img_orig: Default::default(),
            img_orig32: Default::default(),
            img_preprocessed: Default::default(),
            img_diff: Default::default(),
            img_diff_map: Image::default(),
            bpp: [0; 3],
            current_page: [0; 3],
            show_differences: true,
            blink_differences: false,
            vector_image_zoom_ratio: 1.0,
            insertion_deletion_mode: InsertionDeletionMode::None,
            overlay_mode: OverlayMode::None,
            overlay_alpha: 0.3,
            wipe_mode: WipeMode::None,
            wipe_position: 0,
            diff_block_size: 8,
            sel_diff_color: rgb(0xff, 0x40, 0x40),
            sel_diff_deleted_color: rgb(0xf0, 0xc0, 0xc0),
            diff_color: rgb(0xff, 0xff, 0x40),
            diff_deleted_color: rgb(0xc0, 0xc0, 0xc0),
            diff_color_alpha: 0.7,
            color_distance_threshold: 0.0,
            angle: [0; 3],
            hflip: [false; 3],
            vflip: [false; 3],
            current_diff_index: -1,
            diff_count: 0,
            diff: BlockGrid::default(),
            diff01: BlockGrid::default(),
            diff21: BlockGrid::default(),
            diff02: BlockGrid::default(),
            diff_infos: Vec::new(),
            line_diff_infos: Vec::new(),
            temporarily_transformed: false,
            diff_algorithm: Algorithm::Myers,
            blink_interval_ms: DEFAULT_BLINK_INTERVAL_MS,
            overlay_anim_interval_ms: DEFAULT_OVERLAY_ANIM_INTERVAL_MS,
            codec,
            renderer: None,
            vector_docs: [None, None, None],
            clock: Box::new(SystemClock),
            listener: None,
        }
    }

    pub fn set_vector_renderer(&mut self, renderer: Box<dyn VectorRenderer>) {
        self.renderer = Some(renderer);
    }

    pub fn set_clock(&mut self, clock: Box<dyn Clock>) {
        self.clock = clock;
    }

    pub fn set_event_listener(&mut self, listener: Box<dyn Fn(Event)>) {
        self.listener = Some(listener);
    }

    pub(crate) fn emit(&self, event: Event) {
        if let Some(listener) = &self.listener {
            listener(event);
        }
    }

    // -- opening and closing ------------------------------------------------

    /// Open two or three image files through the codec/renderer
    /// collaborators.
    pub fn open_images<P: AsRef<Path>>(&mut self, paths: &[P]) -> Result<()> {
        if paths.len() < 2 || paths.len() > 3 {
            return Err(Error::BadPaneIndex(paths.len()));
        }
        self.close_images();
        self.nimages = paths.len();
        for (i, path) in paths.iter().enumerate() {
            self.filenames[i] = path.as_ref().to_path_buf();
        }
        self.load_images()?;
        self.emit(Event::Open);
        Ok(())
    }

    /// Open panes directly from decoded RGBA buffers. This is the engine's
    /// native entry point; files are a convenience on top of it.
    pub fn open_decoded(&mut self, images: Vec<Image>) -> Result<()> {
        if images.len() < 2 || images.len() > 3 {
            return Err(Error::BadPaneIndex(images.len()));
        }
        self.close_images();
        self.nimages = images.len();
        for (i, img) in images.into_iter().enumerate() {
            self.img_orig[i] = img.clone();
            self.img_orig32[i] = img;
            self.bpp[i] = 32;
        }
        self.emit(Event::Open);
        Ok(())
    }

    pub fn close_images(&mut self) {
        for i in 0..self.nimages {
            self.vector_docs[i] = None;
            self.img_orig_multipage[i].close();
            self.img_orig[i].clear();
            self.img_orig32[i].clear();
            self.img_preprocessed[i].clear();
            self.img_diff[i].clear();
            self.offset[i] = Point::default();
            self.angle[i] = 0;
            self.hflip[i] = false;
            self.vflip[i] = false;
            self.current_page[i] = 0;
            self.filenames[i] = PathBuf::new();
        }
        self.line_diff_infos.clear();
        self.diff_infos.clear();
        self.diff_count = 0;
        self.current_diff_index = -1;
        self.nimages = 0;
    }

    fn load_images(&mut self) -> Result<()> {
        for i in 0..self.nimages {
            let path = self.filenames[i].clone();
            let wrap = |e: anyhow::Error| Error::Load {
                path: path.clone(),
                source: e,
            };
            self.current_page[i] = 0;
            self.vector_docs[i] = None;
            self.hflip[i] = false;
            self.vflip[i] = false;
            self.angle[i] = 0;

            let multi = self.codec.decode_multipage(&path).map_err(wrap)?;
            match multi {
                Some(multi) if multi.page_count() > 1 => {
                    self.img_orig[i] = multi.page(0).cloned().unwrap_or_default();
                    self.img_orig32[i] = self.img_orig[i].clone();
                    self.bpp[i] = 32;
                    self.img_orig_multipage[i] = multi;
                }
                _ if is_vector_image(&path) => {
                    let renderer = self
                        .renderer
                        .as_ref()
                        .ok_or_else(|| wrap(anyhow::anyhow!("no vector renderer available")))?;
                    let doc = renderer.load(&path).map_err(wrap)?;
                    self.img_orig[i] = doc
                        .render(0, self.vector_image_zoom_ratio)
                        .map_err(wrap)?;
                    self.img_orig32[i] = self.img_orig[i].clone();
                    self.bpp[i] = 32;
                    self.vector_docs[i] = Some(doc);
                }
                _ => {
                    let decoded = self.codec.decode(&path).map_err(wrap)?;
                    self.img_orig[i] = decoded.image;
                    self.img_orig32[i] = self.img_orig[i].clone();
                    self.bpp[i] = decoded.bits_per_pixel;
                    let o = orientation_transform(&decoded.metadata);
                    self.hflip[i] = o.hflip;
                    self.vflip[i] = o.vflip;
                    self.angle[i] = o.angle;
                }
            }
        }
        Ok(())
    }

    // -- pane metadata ------------------------------------------------------

    pub fn pane_count(&self) -> usize {
        self.nimages
    }

    pub fn file_name(&self, pane: usize) -> Option<&Path> {
        (pane < self.nimages).then(|| self.filenames[pane].as_path())
    }

    /// Width of the pane as displayed, i.e. swapped when the pane is rotated
    /// a quarter turn.
    pub fn image_width(&self, pane: usize) -> Option<u32> {
        (pane < self.nimages).then(|| {
            if self.angle[pane] == 0 || self.angle[pane] == 180 {
                self.img_orig32[pane].width()
            } else {
                self.img_orig32[pane].height()
            }
        })
    }

    pub fn image_height(&self, pane: usize) -> Option<u32> {
        (pane < self.nimages).then(|| {
            if self.angle[pane] == 0 || self.angle[pane] == 180 {
                self.img_orig32[pane].height()
            } else {
                self.img_orig32[pane].width()
            }
        })
    }

    pub fn image_bpp(&self, pane: usize) -> Option<u32> {
        (pane < self.nimages).then(|| self.bpp[pane])
    }

    pub fn preprocessed_image_width(&self, pane: usize) -> Option<u32> {
        (pane < self.nimages).then(|| self.img_preprocessed[pane].width())
    }

    pub fn preprocessed_image_height(&self, pane: usize) -> Option<u32> {
        (pane < self.nimages).then(|| self.img_preprocessed[pane].height())
    }

    pub fn diff_image_width(&self) -> u32 {
        self.img_diff[0].width()
    }

    pub fn diff_image_height(&self) -> u32 {
        self.img_diff[0].height()
    }

    pub fn get_image(&self, pane: usize) -> Option<&Image> {
        (pane < self.nimages).then(|| &self.img_diff[pane])
    }

    pub fn get_preprocessed_image(&self, pane: usize) -> Option<&Image> {
        (pane < self.nimages).then(|| &self.img_preprocessed[pane])
    }

    pub fn get_original_image(&self, pane: usize) -> Option<&Image> {
        (pane < self.nimages).then(|| &self.img_orig[pane])
    }

    // -- pages --------------------------------------------------------------

    pub fn page_count(&self, pane: usize) -> usize {
        if pane >= self.nimages {
            return 0;
        }
        if self.img_orig_multipage[pane].is_valid() {
            self.img_orig_multipage[pane].page_count()
        } else if let Some(doc) = &self.vector_docs[pane] {
            doc.page_count()
        } else {
            1
        }
    }

    pub fn max_page_count(&self) -> usize {
        (0..self.nimages).map(|i| self.page_count(i)).max().unwrap_or(0)
    }

    pub fn current_page(&self, pane: usize) -> Option<usize> {
        (pane < self.nimages).then(|| self.current_page[pane])
    }

    pub fn current_max_page(&self) -> usize {
        (0..self.nimages)
            .map(|i| self.current_page[i])
            .max()
            .unwrap_or(0)
    }

    /// Show another page of a multi-page pane. Out-of-range pages are a
    /// silent no-op.
    pub fn set_current_page(&mut self, pane: usize, page: usize) {
        if pane >= self.nimages || page >= self.page_count(pane) {
            return;
        }
        if self.current_page[pane] != page && self.pane_has_pages(pane) {
            self.current_page[pane] = page;
            self.change_page(pane, page);
            self.compare_images();
        }
    }

    pub fn set_current_page_all(&mut self, page: usize) {
        let mut recompare = false;
        for pane in 0..self.nimages {
            if page < self.page_count(pane)
                && self.current_page[pane] != page
                && self.pane_has_pages(pane)
            {
                self.current_page[pane] = page;
                self.change_page(pane, page);
                recompare = true;
            }
        }
        if recompare {
            self.compare_images();
        }
    }

    fn pane_has_pages(&self, pane: usize) -> bool {
        self.img_orig_multipage[pane].is_valid() || self.vector_docs[pane].is_some()
    }

    fn change_page(&mut self, pane: usize, page: usize) {
        if self.img_orig_multipage[pane].is_valid() {
            self.img_orig[pane] = self.img_orig_multipage[pane]
                .page(page)
                .cloned()
                .unwrap_or_default();
        } else if let Some(doc) = &self.vector_docs[pane] {
            match doc.render(page, self.vector_image_zoom_ratio) {
                Ok(img) => self.img_orig[pane] = img,
                Err(e) => {
                    log::warn!("render of page {page} failed: {e}");
                    return;
                }
            }
        } else {
            return;
        }
        self.img_orig32[pane] = self.img_orig[pane].clone();
        if self.current_diff_index >= 0 {
            self.current_diff_index = 0;
        }
    }

    // -- settings -----------------------------------------------------------

    pub fn diff_color(&self) -> Color {
        self.diff_color
    }

    pub fn set_diff_color(&mut self, color: Color) {
        if self.diff_color != color {
            self.diff_color = color;
            self.refresh_images();
        }
    }

    pub fn diff_deleted_color(&self) -> Color {
        self.diff_deleted_color
    }

    pub fn set_diff_deleted_color(&mut self, color: Color) {
        if self.diff_deleted_color != color {
            self.diff_deleted_color = color;
            self.refresh_images();
        }
    }

    pub fn sel_diff_color(&self) -> Color {
        self.sel_diff_color
    }

    pub fn set_sel_diff_color(&mut self, color: Color) {
        if self.sel_diff_color != color {
            self.sel_diff_color = color;
            self.refresh_images();
        }
    }

    pub fn sel_diff_deleted_color(&self) -> Color {
        self.sel_diff_deleted_color
    }

    pub fn set_sel_diff_deleted_color(&mut self, color: Color) {
        if self.sel_diff_deleted_color != color {
            self.sel_diff_deleted_color = color;
            self.refresh_images();
        }
    }

    pub fn diff_color_alpha(&self) -> f64 {
        self.diff_color_alpha
    }

    pub fn set_diff_color_alpha(&mut self, alpha: f64) {
        if self.diff_color_alpha != alpha {
            self.diff_color_alpha = alpha;
            self.refresh_images();
        }
    }

    pub fn color_distance_threshold(&self) -> f64 {
        self.color_distance_threshold
    }

    pub fn set_color_distance_threshold(&mut self, threshold: f64) {
        if self.color_distance_threshold != threshold {
            self.color_distance_threshold = threshold.max(0.0);
            self.compare_images();
        }
    }

    pub fn diff_block_size(&self) -> u32 {
        self.diff_block_size
    }

    pub fn set_diff_block_size(&mut self, block_size: u32) {
        let block_size = block_size.max(1);
        if self.diff_block_size != block_size {
            self.diff_block_size = block_size;
            self.compare_images();
        }
    }

    pub fn insertion_deletion_mode(&self) -> InsertionDeletionMode {
        self.insertion_deletion_mode
    }

    pub fn set_insertion_deletion_mode(&mut self, mode: InsertionDeletionMode) {
        if self.insertion_deletion_mode != mode {
            self.insertion_deletion_mode = mode;
            self.compare_images();
        }
    }

    pub fn overlay_mode(&self) -> OverlayMode {
        self.overlay_mode
    }

    pub fn set_overlay_mode(&mut self, mode: OverlayMode) {
        if self.overlay_mode != mode {
            self.overlay_mode = mode;
            self.refresh_images();
        }
    }

    pub fn overlay_alpha(&self) -> f64 {
        self.overlay_alpha
    }

    pub fn set_overlay_alpha(&mut self, alpha: f64) {
        if self.overlay_alpha != alpha {
            self.overlay_alpha = alpha;
            self.refresh_images();
        }
    }

    pub fn wipe_mode(&self) -> WipeMode {
        self.wipe_mode
    }

    pub fn set_wipe_mode(&mut self, mode: WipeMode) {
        if self.wipe_mode != mode {
            self.wipe_mode = mode;
            self.refresh_images();
        }
    }

    pub fn wipe_position(&self) -> i32 {
        self.wipe_position
    }

    pub fn set_wipe_position(&mut self, position: i32) {
        if self.wipe_position != position {
            self.wipe_position = position;
            self.refresh_images();
        }
    }

    pub fn set_wipe_mode_position(&mut self, mode: WipeMode, position: i32) {
        if self.wipe_mode != mode || self.wipe_position != position {
            self.wipe_mode = mode;
            self.wipe_position = position;
            self.refresh_images();
        }
    }

    pub fn show_differences(&self) -> bool {
        self.show_differences
    }

    pub fn set_show_differences(&mut self, visible: bool) {
        if self.show_differences != visible {
            self.show_differences = visible;
            self.compare_images();
        }
    }

    pub fn blink_differences(&self) -> bool {
        self.blink_differences
    }

    pub fn set_blink_differences(&mut self, blink: bool) {
        if self.blink_differences != blink {
            self.blink_differences = blink;
            self.refresh_images();
        }
    }

    pub fn blink_interval(&self) -> u64 {
        self.blink_interval_ms
    }

    pub fn set_blink_interval(&mut self, millis: u64) {
        self.blink_interval_ms = millis.max(1);
    }

    pub fn overlay_anim_interval(&self) -> u64 {
        self.overlay_anim_interval_ms
    }

    pub fn set_overlay_anim_interval(&mut self, millis: u64) {
        self.overlay_anim_interval_ms = millis.max(1);
    }

    pub fn vector_image_zoom_ratio(&self) -> f32 {
        self.vector_image_zoom_ratio
    }

    pub fn set_vector_image_zoom_ratio(&mut self, zoom: f32) {
        if self.vector_image_zoom_ratio != zoom {
            self.vector_image_zoom_ratio = zoom;
            for pane in 0..self.nimages {
                if self.vector_docs[pane].is_some() {
                    self.change_page(pane, self.current_page[pane]);
                }
            }
            self.compare_images();
        }
    }

    pub fn rotation(&self, pane: usize) -> i32 {
        if pane >= self.nimages {
            return 0;
        }
        self.angle[pane]
    }

    /// Set a pane rotation. Only multiples of 90 degrees are supported.
    pub fn set_rotation(&mut self, pane: usize, degrees: i32) -> Result<()> {
        if pane >= self.nimages {
            return Ok(());
        }
        let degrees = degrees.rem_euclid(360);
        if degrees % 90 != 0 {
            return Err(Error::Unsupported("non-orthogonal rotation"));
        }
        if self.angle[pane] != degrees {
            self.angle[pane] = degrees;
            self.compare_images();
        }
        Ok(())
    }

    pub fn horizontal_flip(&self, pane: usize) -> bool {
        pane < self.nimages && self.hflip[pane]
    }

    pub fn set_horizontal_flip(&mut self, pane: usize, flip: bool) {
        if pane < self.nimages && self.hflip[pane] != flip {
            self.hflip[pane] = flip;
            self.compare_images();
        }
    }

    pub fn vertical_flip(&self, pane: usize) -> bool {
        pane < self.nimages && self.vflip[pane]
    }

    pub fn set_vertical_flip(&mut self, pane: usize, flip: bool) {
        if pane < self.nimages && self.vflip[pane] != flip {
            self.vflip[pane] = flip;
            self.compare_images();
        }
    }

    pub fn diff_algorithm(&self) -> Algorithm {
        self.diff_algorithm
    }

    pub fn set_diff_algorithm(&mut self, algorithm: Algorithm) {
        if self.diff_algorithm != algorithm {
            self.diff_algorithm = algorithm;
            self.compare_images();
        }
    }

    // -- offsets ------------------------------------------------------------

    pub fn image_offset(&self, pane: usize) -> Point {
        if pane >= self.nimages {
            return Point::default();
        }
        self.offset[pane]
    }

    /// Nudge a pane by `(dx, dy)` for manual alignment. Offsets are then
    /// re-normalized so the smallest offset per axis is zero.
    pub fn add_image_offset(&mut self, pane: usize, dx: i32, dy: i32) {
        if pane >= self.nimages {
            return;
        }
        let mut offset = self.offset;
        offset[pane].x += dx;
        offset[pane].y += dy;
        let minx = (0..self.nimages).map(|i| offset[i].x).min().unwrap_or(0);
        let miny = (0..self.nimages).map(|i| offset[i].y).min().unwrap_or(0);
        for i in 0..self.nimages {
            self.offset[i].x = offset[i].x - minx;
            self.offset[i].y = offset[i].y - miny;
        }
        self.compare_images();
    }

    // -- diff queries and navigation ----------------------------------------

    pub fn diff_count(&self) -> i32 {
        self.diff_count
    }

    pub fn conflict_count(&self) -> i32 {
        self.diff_infos
            .iter()
            .filter(|d| d.op == OpType::Diff)
            .count() as i32
    }

    pub fn diff_info(&self, diff_index: i32) -> Option<&DiffInfo> {
        if diff_index < 0 || diff_index >= self.diff_count {
            return None;
        }
        self.diff_infos.get(diff_index as usize)
    }

    pub fn line_diffs(&self) -> &[LineDiffInfo] {
        &self.line_diff_infos
    }

    pub fn current_diff_index(&self) -> i32 {
        self.current_diff_index
    }

    pub fn diff_index_from_point(&self, x: i32, y: i32) -> i32 {
        if x >= 0
            && y >= 0
            && x < self.img_diff[0].width() as i32
            && y < self.img_diff[0].height() as i32
        {
            let bs = self.diff_block_size as usize;
            return self.diff.get(x as usize / bs, y as usize / bs) - 1;
        }
        -1
    }

    pub fn select_diff(&mut self, diff_index: i32) -> bool {
        if diff_index == self.current_diff_index || diff_index < -1 || diff_index >= self.diff_count
        {
            return false;
        }
        self.current_diff_index = diff_index;
        self.refresh_images();
        self.emit(Event::ScrollToDiff(diff_index));
        true
    }

    pub fn first_diff(&mut self) -> bool {
        let target = if self.diff_count == 0 { -1 } else { 0 };
        self.move_to(target)
    }

    pub fn last_diff(&mut self) -> bool {
        self.move_to(self.diff_count - 1)
    }

    pub fn next_diff(&mut self) -> bool {
        let target = (self.current_diff_index + 1).min(self.diff_count - 1);
        self.move_to(target)
    }

    pub fn prev_diff(&mut self) -> bool {
        let target = if self.diff_count == 0 {
            -1
        } else {
            (self.current_diff_index - 1).max(0)
        };
        self.move_to(target)
    }

    /// First region classified as a conflict.
    pub fn first_conflict(&mut self) -> bool {
        let target = self
            .diff_infos
            .iter()
            .position(|d| d.op == OpType::Diff)
            .map(|i| i as i32);
        match target {
            Some(i) => self.move_to(i),
            None => false,
        }
    }

    /// Last region classified as a conflict.
    pub fn last_conflict(&mut self) -> bool {
        let target = self
            .diff_infos
            .iter()
            .rposition(|d| d.op == OpType::Diff)
            .map(|i| i as i32);
        match target {
            Some(i) => self.move_to(i),
            None => false,
        }
    }

    pub fn next_conflict(&mut self) -> bool {
        match self.next_conflict_index() {
            -1 => false,
            i => self.move_to(i),
        }
    }

    pub fn prev_conflict(&mut self) -> bool {
        match self.prev_conflict_index() {
            -1 => false,
            i => self.move_to(i),
        }
    }

    pub fn next_diff_index(&self) -> i32 {
        if self.diff_count == 0 || self.current_diff_index >= self.diff_count - 1 {
            return -1;
        }
        self.current_diff_index + 1
    }

    pub fn prev_diff_index(&self) -> i32 {
        if self.diff_count == 0 || self.current_diff_index <= 0 {
            return -1;
        }
        self.current_diff_index - 1
    }

    pub fn next_conflict_index(&self) -> i32 {
        for i in (self.current_diff_index + 1).max(0)..self.diff_infos.len() as i32 {
            if self.diff_infos[i as usize].op == OpType::Diff {
                return i;
            }
        }
        -1
    }

    pub fn prev_conflict_index(&self) -> i32 {
        let mut i = self.current_diff_index - 1;
        while i >= 0 {
            if self.diff_infos[i as usize].op == OpType::Diff {
                return i;
            }
            i -= 1;
        }
        -1
    }

    fn move_to(&mut self, diff_index: i32) -> bool {
        if self.current_diff_index == diff_index {
            return false;
        }
        self.current_diff_index = diff_index;
        self.refresh_images();
        true
    }

    // -- pixel queries -------------------------------------------------------

    pub fn pixel_color(&self, pane: usize, x: i32, y: i32) -> Result<Color> {
        if pane >= self.nimages {
            return Err(Error::BadPaneIndex(pane));
        }
        let px = x - self.offset[pane].x;
        let py = y - self.offset[pane].y;
        if px < 0 || py < 0 {
            return Err(Error::OutOfBounds { pane, x, y });
        }
        self.img_preprocessed[pane]
            .pixel(px as u32, py as u32)
            .ok_or(Error::OutOfBounds { pane, x, y })
    }

    pub fn color_distance(&self, pane1: usize, pane2: usize, x: i32, y: i32) -> Result<f64> {
        let c1 = self.pixel_color(pane1, x, y)?;
        let c2 = self.pixel_color(pane2, x, y)?;
        Ok((color_distance2(c1, c2) as f64).sqrt())
    }

    /// Extract a sub-image of the untransformed original, in inclusive
    /// real coordinates.
    pub fn copy_sub_image(&mut self, pane: usize, x1: i32, y1: i32, x2: i32, y2: i32) -> Result<Image> {
        if pane >= self.nimages {
            return Err(Error::BadPaneIndex(pane));
        }
        let guard = self.transformed();
        Ok(guard.img_orig32[pane].copy_sub_image(x1, y1, x2, y2))
    }

    // -- coordinate translation ----------------------------------------------

    /// Translate a point in display (preprocessed + offset) space into real
    /// image coordinates of the pane. Returns `(rx, ry, inside)`; when
    /// `clamp` is set, out-of-image results are clamped into range.
    pub fn convert_to_real_pos(
        &self,
        pane: usize,
        x: i32,
        y: i32,
        clamp: bool,
    ) -> (i32, i32, bool) {
        let x = x - self.offset[pane].x;
        let y = y - self.offset[pane].y;
        let pw = self.img_preprocessed[pane].width() as i32;
        let ph = self.img_preprocessed[pane].height() as i32;

        let mut inside = true;

        if self.insertion_deletion_mode == InsertionDeletionMode::None
            || self.line_diff_infos.is_empty()
        {
            let rx = Self::clamp_axis(x, pw, clamp, &mut inside);
            let ry = Self::clamp_axis(y, ph, clamp, &mut inside);
            return (rx, ry, inside);
        }

        if self.insertion_deletion_mode == InsertionDeletionMode::Vertical {
            let rx = Self::clamp_axis(x, pw, clamp, &mut inside);
            for ld in &self.line_diff_infos {
                if y <= ld.dend[pane] {
                    let ry = if y < 0 {
                        inside = false;
                        if clamp { 0 } else { y }
                    } else {
                        y - ld.dbegin + ld.begin[pane]
                    };
                    return (rx, ry, inside);
                } else if ld.dend[pane] < y && y <= ld.dendmax {
                    // ghost extension of this pane
                    return (rx, ld.end[pane], false);
                }
            }
            let last = self.line_diff_infos.last().unwrap();
            let mut ry = y - last.dendmax + last.end[pane];
            let height = self.image_height(pane).unwrap_or(0) as i32;
            if ry >= height {
                if clamp {
                    ry = height - 1;
                }
                inside = false;
            }
            (rx, ry, inside)
        } else {
            let ry = Self::clamp_axis(y, ph, clamp, &mut inside);
            for ld in &self.line_diff_infos {
                if x <= ld.dend[pane] {
                    let rx = if x < 0 {
                        inside = false;
                        if clamp { 0 } else { x }
                    } else {
                        x - ld.dbegin + ld.begin[pane]
                    };
                    return (rx, ry, inside);
                } else if ld.dend[pane] < x && x <= ld.dendmax {
                    return (ld.end[pane], ry, false);
                }
            }
            let last = self.line_diff_infos.last().unwrap();
            let mut rx = x - last.dendmax + last.end[pane];
            let width = self.image_width(pane).unwrap_or(0) as i32;
            if rx >= width {
                if clamp {
                    rx = width - 1;
                }
                inside = false;
            }
            (rx, ry, inside)
        }
    }

    /// Inverse of [`Self::convert_to_real_pos`] for points inside the
    /// image: real image coordinates to display space.
    pub fn convert_to_display_pos(&self, pane: usize, rx: i32, ry: i32) -> (i32, i32) {
        let ox = self.offset[pane].x;
        let oy = self.offset[pane].y;
        if self.insertion_deletion_mode == InsertionDeletionMode::None
            || self.line_diff_infos.is_empty()
        {
            return (rx + ox, ry + oy);
        }
        if self.insertion_deletion_mode == InsertionDeletionMode::Vertical {
            for ld in &self.line_diff_infos {
                if ry <= ld.end[pane] {
                    return (rx + ox, ry - ld.begin[pane] + ld.dbegin + oy);
                }
            }
            let last = self.line_diff_infos.last().unwrap();
            (rx + ox, ry - (last.end[pane] + 1) + last.dendmax + 1 + oy)
        } else {
            for ld in &self.line_diff_infos {
                if rx <= ld.end[pane] {
                    return (rx - ld.begin[pane] + ld.dbegin + ox, ry + oy);
                }
            }
            let last = self.line_diff_infos.last().unwrap();
            (rx - (last.end[pane] + 1) + last.dendmax + 1 + ox, ry + oy)
        }
    }

    fn clamp_axis(v: i32, extent: i32, clamp: bool, inside: &mut bool) -> i32 {
        if v < 0 {
            *inside = false;
            if clamp { 0 } else { v }
        } else if v >= extent {
            *inside = false;
            if clamp { extent - 1 } else { v }
        } else {
            v
        }
    }

    // -- compare pipeline ----------------------------------------------------

    pub fn compare_images(&mut self) {
        if self.nimages <= 1 {
            return;
        }
        self.preprocess_images();
        self.initialize_diff();
        if self.nimages == 2 {
            let mut grid = std::mem::take(&mut self.diff);
            self.compare_panes(0, 1, &mut grid);
            self.diff = grid;
            self.diff_count = self.label_regions();
        } else {
            let mut grid = std::mem::take(&mut self.diff01);
            self.compare_panes(0, 1, &mut grid);
            self.diff01 = grid;
            let mut grid = std::mem::take(&mut self.diff21);
            self.compare_panes(2, 1, &mut grid);
            self.diff21 = grid;
            let mut grid = std::mem::take(&mut self.diff02);
            self.compare_panes(0, 2, &mut grid);
            self.diff02 = grid;
            self.make_3way_diff();
            self.diff_count = self.label_regions();
            self.classify_regions_3way();
        }
        if self.current_diff_index >= self.diff_count {
            self.current_diff_index = self.diff_count - 1;
        }
        debug!(
            "compared {} panes: {} differing regions",
            self.nimages, self.diff_count
        );
        self.refresh_images();
    }

    pub(crate) fn transformed(&mut self) -> TransformGuard<'_> {
        self.transform_images(false);
        TransformGuard { buffer: self }
    }

    pub(crate) fn transform_images(&mut self, reverse: bool) {
        self.temporarily_transformed = !reverse;
        for pane in 0..self.nimages {
            if !reverse {
                if self.hflip[pane] {
                    self.img_orig32[pane].flip_horizontal();
                }
                if self.vflip[pane] {
                    self.img_orig32[pane].flip_vertical();
                }
                if self.angle[pane] != 0 {
                    self.img_orig32[pane].rotate(self.angle[pane]).unwrap();
                }
            } else {
                if self.angle[pane] != 0 {
                    self.img_orig32[pane].rotate(-self.angle[pane]).unwrap();
                }
                if self.hflip[pane] {
                    self.img_orig32[pane].flip_horizontal();
                }
                if self.vflip[pane] {
                    self.img_orig32[pane].flip_vertical();
                }
            }
        }
    }

    fn preprocess_images(&mut self) {
        let mut guard = self.transformed();
        match guard.insertion_deletion_mode {
            InsertionDeletionMode::None => {
                guard.line_diff_infos.clear();
                for i in 0..guard.nimages {
                    guard.img_preprocessed[i] = guard.img_orig32[i].clone();
                }
            }
            InsertionDeletionMode::Vertical => {
                let imgs = [
                    guard.img_orig32[0].clone(),
                    guard.img_orig32[1].clone(),
                    guard.img_orig32[2].clone(),
                ];
                let infos = guard.compute_line_diffs(&imgs);
                guard.line_diff_infos = infos;
                let npanes = guard.nimages;
                let height0 = imgs[0].height() as i32;
                prime_line_diffs(&mut guard.line_diff_infos, npanes, height0);
                let buf = &mut *guard;
                copy_with_ghost_rows(
                    &buf.line_diff_infos,
                    buf.nimages,
                    &imgs,
                    &mut buf.img_preprocessed,
                );
            }
            InsertionDeletionMode::Horizontal => {
                let mut imgs = [
                    guard.img_orig32[0].clone(),
                    guard.img_orig32[1].clone(),
                    guard.img_orig32[2].clone(),
                ];
                for pane in 0..guard.nimages {
                    imgs[pane].rotate(-90).unwrap();
                }
                let infos = guard.compute_line_diffs(&imgs);
                guard.line_diff_infos = infos;
                let npanes = guard.nimages;
                let height0 = imgs[0].height() as i32;
                prime_line_diffs(&mut guard.line_diff_infos, npanes, height0);
                {
                    let buf = &mut *guard;
                    copy_with_ghost_rows(
                        &buf.line_diff_infos,
                        buf.nimages,
                        &imgs,
                        &mut buf.img_preprocessed,
                    );
                }
                for pane in 0..guard.nimages {
                    guard.img_preprocessed[pane].rotate(90).unwrap();
                }
            }
        }
    }

    fn compute_line_diffs(&self, imgs: &[Image; 3]) -> Vec<LineDiffInfo> {
        let t = self.color_distance_threshold;
        let algo = self.diff_algorithm;
        if self.nimages == 2 {
            make_line_diff(&imgs[0], &imgs[1], t, algo)
        } else {
            let d10 = make_line_diff(&imgs[1], &imgs[0], t, algo);
            let d12 = make_line_diff(&imgs[1], &imgs[2], t, algo);
            make_3way_line_diff(&d10, &d12, |wd3| {
                let len0 = wd3.end[0] + 1 - wd3.begin[0];
                let len2 = wd3.end[2] + 1 - wd3.begin[2];
                if len0 != len2 {
                    return false;
                }
                (0..len0).all(|i| {
                    let y0 = wd3.begin[0] + i;
                    let y2 = wd3.begin[2] + i;
                    y0 >= 0
                        && y2 >= 0
                        && (y0 as u32) < imgs[0].height()
                        && (y2 as u32) < imgs[2].height()
                        && rows_equal(imgs[0].row(y0 as u32), imgs[2].row(y2 as u32), t)
                })
            })
        }
    }

    fn max_width_height(&self) -> (u32, u32) {
        let mut wmax = 0_i32;
        let mut hmax = 0_i32;
        for i in 0..self.nimages {
            wmax = wmax.max(self.img_preprocessed[i].width() as i32 + self.offset[i].x);
            hmax = hmax.max(self.img_preprocessed[i].height() as i32 + self.offset[i].y);
        }
        (wmax.max(0) as u32, hmax.max(0) as u32)
    }

    fn initialize_diff(&mut self) {
        let (wmax, hmax) = self.max_width_height();
        let bs = self.diff_block_size;
        let nbx = wmax.div_ceil(bs) as usize;
        let nby = hmax.div_ceil(bs) as usize;
        self.diff.resize(nbx, nby);
        if self.nimages == 3 {
            self.diff01.resize(nbx, nby);
            self.diff21.resize(nbx, nby);
            self.diff02.resize(nbx, nby);
        }
        self.diff_infos.clear();
    }

    /// Block-compare one pane pair into a grid. A cell is marked differing
    /// when any pixel in it fails the threshold test or is covered by only
    /// one of the two panes.
    fn compare_panes(&self, pane1: usize, pane2: usize, grid: &mut BlockGrid) {
        let img1 = &self.img_preprocessed[pane1];
        let img2 = &self.img_preprocessed[pane2];
        let (o1x, o1y) = (self.offset[pane1].x, self.offset[pane1].y);
        let (o2x, o2y) = (self.offset[pane2].x, self.offset[pane2].y);
        let (w1, h1) = (img1.width() as i32, img1.height() as i32);
        let (w2, h2) = (img2.width() as i32, img2.height() as i32);
        let bs = self.diff_block_size as i32;
        let threshold = self.color_distance_threshold;
        let t2 = threshold * threshold;

        let wmax = (o1x + w1).max(o2x + w2);
        let hmax = (o1y + h1).max(o2y + h2);

        for y in 0..hmax {
            let in1y = y >= o1y && y < o1y + h1 && w1 > 0;
            let in2y = y >= o2y && y < o2y + h2 && w2 > 0;
            let row1 = in1y.then(|| img1.row((y - o1y) as u32));
            let row2 = in2y.then(|| img2.row((y - o2y) as u32));
            if let (Some(r1), Some(r2)) = (row1, row2) {
                // aligned equal-width rows compare in one shot
                if o1x == o2x && w1 == w2 && threshold == 0.0 && r1 == r2 {
                    continue;
                }
            }
            let by = (y / bs) as usize;
            for x in 0..wmax {
                let covered1 = row1.is_some() && x >= o1x && x < o1x + w1;
                let covered2 = row2.is_some() && x >= o2x && x < o2x + w2;
                let differs = match (covered1, covered2) {
                    (true, true) => {
                        let p1 = &row1.unwrap()[(x - o1x) as usize * 4..][..4];
                        let p2 = &row2.unwrap()[(x - o2x) as usize * 4..][..4];
                        if threshold > 0.0 {
                            pixel_distance2(p1, p2) as f64 > t2
                        } else {
                            p1 != p2
                        }
                    }
                    (false, false) => false,
                    _ => true,
                };
                if differs {
                    grid.set((x / bs) as usize, by, -1);
                }
            }
        }
    }

    fn make_3way_diff(&mut self) {
        self.diff = self.diff01.clone();
        for by in 0..self.diff.height() {
            for bx in 0..self.diff.width() {
                if self.diff21.get(bx, by) != 0 {
                    self.diff.set(bx, by, -1);
                }
            }
        }
    }

    /// Number the differing regions in row-major order of their first cell
    /// and record each region's bounding box. In a three-pane comparison the
    /// fill does not cross cells with a different pairwise-disagreement
    /// signature, so regions stay uniformly classifiable.
    fn label_regions(&mut self) -> i32 {
        let three_way = self.nimages == 3;
        let mut grid = std::mem::take(&mut self.diff);
        let mut count: i32 = 0;
        for by in 0..grid.height() {
            for bx in 0..grid.width() {
                let idx = grid.get(bx, by);
                if idx == -1 {
                    self.diff_infos.push(DiffInfo {
                        op: OpType::Diff,
                        rect: Rect {
                            left: bx as i32,
                            top: by as i32,
                            right: bx as i32 + 1,
                            bottom: by as i32 + 1,
                        },
                    });
                    count += 1;
                    if three_way {
                        let d01 = &self.diff01;
                        let d21 = &self.diff21;
                        let d02 = &self.diff02;
                        let sig = |x: usize, y: usize| {
                            (
                                d01.get(x, y) != 0,
                                d21.get(x, y) != 0,
                                d02.get(x, y) != 0,
                            )
                        };
                        let seed = sig(bx, by);
                        flood_fill(&mut grid, bx, by, count, &|x, y| sig(x, y) == seed);
                    } else {
                        flood_fill(&mut grid, bx, by, count, &|_, _| true);
                    }
                } else if idx != 0 {
                    let rect = &mut self.diff_infos[(idx - 1) as usize].rect;
                    if (bx as i32) < rect.left {
                        rect.left = bx as i32;
                    } else if (bx as i32 + 1) > rect.right {
                        rect.right = bx as i32 + 1;
                    }
                    if (by as i32) < rect.top {
                        rect.top = by as i32;
                    } else if (by as i32 + 1) > rect.bottom {
                        rect.bottom = by as i32 + 1;
                    }
                }
            }
        }
        self.diff = grid;
        count
    }

    fn classify_regions_3way(&mut self) {
        #[derive(Clone, Default)]
        struct Stat {
            d1: i32,
            d2: i32,
            d3: i32,
            etc: i32,
        }
        let mut counter = vec![Stat::default(); self.diff_infos.len()];
        for by in 0..self.diff.height() {
            for bx in 0..self.diff.width() {
                let idx = self.diff.get(bx, by);
                if idx == 0 {
                    continue;
                }
                let stat = &mut counter[(idx - 1) as usize];
                if self.diff21.get(bx, by) == 0 {
                    stat.d1 += 1;
                } else if self.diff02.get(bx, by) == 0 {
                    stat.d2 += 1;
                } else if self.diff01.get(bx, by) == 0 {
                    stat.d3 += 1;
                } else {
                    stat.etc += 1;
                }
            }
        }
        for (info, stat) in self.diff_infos.iter_mut().zip(&counter) {
            info.op = if stat.d1 != 0 && stat.d2 == 0 && stat.d3 == 0 && stat.etc == 0 {
                OpType::FirstOnly
            } else if stat.d1 == 0 && stat.d2 != 0 && stat.d3 == 0 && stat.etc == 0 {
                OpType::SecondOnly
            } else if stat.d1 == 0 && stat.d2 == 0 && stat.d3 != 0 && stat.etc == 0 {
                OpType::ThirdOnly
            } else {
                OpType::Diff
            };
        }
    }

    // -- composition ---------------------------------------------------------

    pub fn refresh_images(&mut self) {
        if self.nimages <= 1 {
            return;
        }
        let (wmax, hmax) = self.max_width_height();
        for i in 0..self.nimages {
            self.img_diff[i].set_size(wmax, hmax);
            self.copy_preprocessed_to_output(i);
        }

        match self.overlay_mode {
            OverlayMode::None => {}
            _ => {
                let pairs: &[(usize, usize)] = if self.nimages == 2 {
                    &[(1, 0), (0, 1)]
                } else {
                    &[(1, 0), (0, 1), (2, 1), (1, 2)]
                };
                for &(src, dst) in pairs {
                    match self.overlay_mode {
                        OverlayMode::Xor => self.xor_overlay(src, dst),
                        OverlayMode::AlphaBlend | OverlayMode::AlphaBlendAnim => {
                            self.alpha_blend_overlay(src, dst)
                        }
                        OverlayMode::None => {}
                    }
                }
            }
        }

        if self.wipe_mode != WipeMode::None {
            self.wipe_effect();
        }

        if self.show_differences {
            let mut show = true;
            if self.blink_differences {
                let now = self.clock.now_millis();
                if now % self.blink_interval_ms < self.blink_interval_ms / 2 {
                    show = false;
                }
            }
            if show {
                for i in 0..self.nimages {
                    self.mark_diff(i);
                }
            }
        }
        self.emit(Event::Refresh);
    }

    fn copy_preprocessed_to_output(&mut self, pane: usize) {
        let src = &self.img_preprocessed[pane];
        let (ox, oy) = (
            self.offset[pane].x as usize,
            self.offset[pane].y as usize,
        );
        let dst = &mut self.img_diff[pane];
        let bytes = src.width() as usize * 4;
        for y in 0..src.height() {
            let srow = src.row(y);
            let drow = dst.row_mut(y + oy as u32);
            drow[ox * 4..ox * 4 + bytes].copy_from_slice(srow);
        }
    }

    fn xor_overlay(&mut self, src: usize, dst: usize) {
        let src_img = &self.img_preprocessed[src];
        let (ox, oy) = (self.offset[src].x as usize, self.offset[src].y as usize);
        let dst_img = &mut self.img_diff[dst];
        for y in 0..src_img.height() {
            let srow = src_img.row(y);
            let drow = dst_img.row_mut(y + oy as u32);
            for x in 0..src_img.width() as usize {
                for c in 0..3 {
                    drow[(x + ox) * 4 + c] ^= srow[x * 4 + c];
                }
            }
        }
    }

    fn alpha_blend_overlay(&mut self, src: usize, dst: usize) {
        let mut alpha = self.overlay_alpha;
        if self.overlay_mode == OverlayMode::AlphaBlendAnim {
            // ramp up over the first fifth of the period, hold, ramp down,
            // then rest
            let period = self.overlay_anim_interval_ms as f64;
            let t = (self.clock.now_millis() % self.overlay_anim_interval_ms) as f64;
            let ramp = period * 0.2;
            alpha = if t < ramp {
                t / ramp
            } else if t < period * 0.5 {
                1.0
            } else if t < period * 0.7 {
                (ramp - (t - period * 0.5)) / ramp
            } else {
                0.0
            };
        }
        let src_img = &self.img_preprocessed[src];
        let (ox, oy) = (self.offset[src].x as usize, self.offset[src].y as usize);
        let dst_img = &mut self.img_diff[dst];
        for y in 0..src_img.height() {
            let srow = src_img.row(y);
            let drow = dst_img.row_mut(y + oy as u32);
            for x in 0..src_img.width() as usize {
                for c in 0..4 {
                    let d = drow[(x + ox) * 4 + c] as f64;
                    let s = srow[x * 4 + c] as f64;
                    drow[(x + ox) * 4 + c] = (d * (1.0 - alpha) + s * alpha) as u8;
                }
            }
        }
    }

    fn wipe_effect(&mut self) {
        let w = self.img_diff[0].width();
        let h = self.img_diff[0].height();
        match self.wipe_mode {
            WipeMode::Vertical => {
                let start = self.wipe_position.clamp(0, h as i32) as u32;
                for y in start..h {
                    for pane in 0..self.nimages - 1 {
                        let (a, b) = self.img_diff.split_at_mut(pane + 1);
                        a[pane].row_mut(y).swap_with_slice(b[0].row_mut(y));
                    }
                }
            }
            WipeMode::Horizontal => {
                let start = self.wipe_position.clamp(0, w as i32) as usize;
                for y in 0..h {
                    for pane in 0..self.nimages - 1 {
                        let (a, b) = self.img_diff.split_at_mut(pane + 1);
                        a[pane].row_mut(y)[start * 4..]
                            .swap_with_slice(&mut b[0].row_mut(y)[start * 4..]);
                    }
                }
            }
            WipeMode::None => {}
        }
    }

    /// Tint the cells of every region relevant to this pane. Transparent
    /// pixels (ghost rows among them) are painted solid with the regular or
    /// deleted diff color instead of being blended.
    fn mark_diff(&mut self, pane: usize) {
        let mut out = std::mem::take(&mut self.img_diff[pane]);
        let (w, h) = (out.width() as usize, out.height() as usize);
        let bs = self.diff_block_size as usize;
        let alpha = self.diff_color_alpha;

        for by in 0..self.diff.height() {
            for bx in 0..self.diff.width() {
                let idx = self.diff.get(bx, by);
                if idx == 0 {
                    continue;
                }
                let op = self.diff_infos[(idx - 1) as usize].op;
                let paint = match pane {
                    0 => op != OpType::ThirdOnly,
                    1 => true,
                    2 => op != OpType::FirstOnly,
                    _ => false,
                };
                if !paint {
                    continue;
                }
                let selected = idx - 1 == self.current_diff_index;
                let color = if selected {
                    self.sel_diff_color
                } else {
                    self.diff_color
                };
                let color_deleted = if selected {
                    self.sel_diff_deleted_color
                } else {
                    self.diff_deleted_color
                };

                let bsy = bs.min(h.saturating_sub(by * bs));
                let bsx = bs.min(w.saturating_sub(bx * bs));
                for i in 0..bsy {
                    let y = by * bs + i;
                    for j in 0..bsx {
                        let x = bx * bs + j;
                        let row = out.row_mut(y as u32);
                        if row[x * 4 + 3] != 0 {
                            row[x * 4] =
                                (row[x * 4] as f64 * (1.0 - alpha) + value_b(color) as f64 * alpha)
                                    as u8;
                            row[x * 4 + 1] = (row[x * 4 + 1] as f64 * (1.0 - alpha)
                                + value_g(color) as f64 * alpha)
                                as u8;
                            row[x * 4 + 2] = (row[x * 4 + 2] as f64 * (1.0 - alpha)
                                + value_r(color) as f64 * alpha)
                                as u8;
                        } else {
                            let dcolor =
                                self.diff_color_at(pane, x as i32, y as i32, color, color_deleted);
                            let row = out.row_mut(y as u32);
                            row[x * 4] = value_b(dcolor);
                            row[x * 4 + 1] = value_g(dcolor);
                            row[x * 4 + 2] = value_r(dcolor);
                            row[x * 4 + 3] = (255.0 * alpha) as u8;
                        }
                    }
                }
            }
        }
        self.img_diff[pane] = out;
    }

    fn diff_color_at(&self, pane: usize, x: i32, y: i32, color: Color, deleted: Color) -> Color {
        let x = x - self.offset[pane].x;
        let y = y - self.offset[pane].y;
        let pw = self.img_preprocessed[pane].width() as i32;
        let ph = self.img_preprocessed[pane].height() as i32;
        if self.insertion_deletion_mode == InsertionDeletionMode::None
            || self.line_diff_infos.is_empty()
            || x < 0
            || x >= pw
            || y < 0
            || y >= ph
        {
            return color;
        }
        let v = if self.insertion_deletion_mode == InsertionDeletionMode::Vertical {
            y
        } else {
            x
        };
        for ld in &self.line_diff_infos {
            if ld.dbegin <= v && v <= ld.dendmax {
                return deleted;
            }
        }
        color
    }

    /// Rasterize the block label grid into a `w` by `h` overview map,
    /// coloring differing blocks with the regular or selected diff color.
    pub fn diff_map_image(&mut self, w: u32, h: u32) -> &Image {
        self.img_diff_map.set_size(w, h);
        if self.nimages == 0 || self.img_diff[0].is_empty() || w == 0 || h == 0 {
            return &self.img_diff_map;
        }
        let block_w = self.diff_block_size as f64 * w as f64 / self.img_diff[0].width() as f64;
        let block_h = self.diff_block_size as f64 * h as f64 / self.img_diff[0].height() as f64;
        let mut map = std::mem::take(&mut self.img_diff_map);
        for by in 0..self.diff.height() {
            for bx in 0..self.diff.width() {
                let idx = self.diff.get(bx, by);
                if idx == 0 {
                    continue;
                }
                let color = if idx - 1 == self.current_diff_index {
                    self.sel_diff_color
                } else {
                    self.diff_color
                };
                let y0 = (by as f64 * block_h) as u32;
                if y0 >= h {
                    continue;
                }
                let bsy = ((block_h + 1.0) as u32).min(h - y0);
                let x0 = (bx as f64 * block_w) as u32;
                if x0 >= w {
                    continue;
                }
                let bsx = ((block_w + 1.0) as u32).min(w - x0);
                for i in 0..bsy {
                    let row = map.row_mut(y0 + i);
                    for j in 0..bsx {
                        let x = (x0 + j) as usize;
                        row[x * 4] = value_b(color);
                        row[x * 4 + 1] = value_g(color);
                        row[x * 4 + 2] = value_r(color);
                        row[x * 4 + 3] = 0xff;
                    }
                }
            }
        }
        self.img_diff_map = map;
        &self.img_diff_map
    }

    pub fn save_diff_image_as(&self, pane: usize, path: &Path) -> Result<()> {
        if pane >= self.nimages {
            return Err(Error::BadPaneIndex(pane));
        }
        self.codec
            .encode(path, &self.img_diff[pane])
            .map_err(|e| Error::Save {
                path: path.to_path_buf(),
                source: e,
            })
    }

    /// Saving through the codec only works for panes that are not backed by
    /// a vector document.
    pub fn is_save_supported(&self, pane: usize) -> bool {
        pane < self.nimages && self.vector_docs[pane].is_none()
    }
}

/// Applies the pane transforms on construction and is guaranteed to apply
/// the inverse transforms when dropped, error or panic included.
pub(crate) struct TransformGuard<'a> {
    buffer: &'a mut ImgDiffBuffer,
}

impl Deref for TransformGuard<'_> {
    type Target = ImgDiffBuffer;

    fn deref(&self) -> &ImgDiffBuffer {
        self.buffer
    }
}

impl DerefMut for TransformGuard<'_> {
    fn deref_mut(&mut self) -> &mut ImgDiffBuffer {
        self.buffer
    }
}

impl Drop for TransformGuard<'_> {
    fn drop(&mut self) {
        self.buffer.transform_images(true);
    }
}

fn flood_fill(
    grid: &mut BlockGrid,
    x: usize,
    y: usize,
    value: i32,
    same_group: &dyn Fn(usize, usize) -> bool,
) {
    let (w, h) = (grid.width(), grid.height());
    let mut stack = vec![(x, y)];
    while let Some((x, y)) = stack.pop() {
        if grid.get(x, y) != -1 || !same_group(x, y) {
            continue;
        }
        grid.set(x, y, value);
        let x0 = x.saturating_sub(1);
        let y0 = y.saturating_sub(1);
        for ny in y0..=(y + 1).min(h - 1) {
            for nx in x0..=(x + 1).min(w - 1) {
                if (nx, ny) != (x, y) {
                    stack.push((nx, ny));
                }
            }
        }
    }
}

/// Build the preprocessed panes: equal spans are copied verbatim, every
/// mismatch run occupies `dendmax - dbegin + 1` aligned rows, and rows the
/// pane does not have stay fully transparent (ghost rows).
fn copy_with_ghost_rows(
    line_diffs: &[LineDiffInfo],
    npanes: usize,
    src: &[Image; 3],
    dst: &mut [Image; 3],
) {
    let nlines = if line_diffs.is_empty() {
        src[0].height() as i32
    } else {
        let last = line_diffs.last().unwrap();
        last.dendmax + 1 + src[0].height() as i32 - (last.end[0] + 1)
    };

    for pane in 0..npanes {
        dst[pane].set_size(src[pane].width(), nlines.max(0) as u32);
    }

    let mut ydst = 0_i32;
    for (i, ld) in line_diffs.iter().enumerate() {
        for pane in 0..npanes {
            let mut y = ydst;
            let ysrc0 = if i > 0 {
                line_diffs[i - 1].end[pane] + 1
            } else {
                0
            };
            for ysrc in ysrc0..ld.begin[pane] {
                copy_row(&src[pane], ysrc, &mut dst[pane], y);
                y += 1;
            }
        }
        for pane in 0..npanes {
            let mut y = ld.dbegin;
            for ysrc in ld.begin[pane]..=ld.end[pane] {
                copy_row(&src[pane], ysrc, &mut dst[pane], y);
                y += 1;
            }
        }
        ydst = ld.dendmax + 1;
    }

    for pane in 0..npanes {
        let mut y = ydst;
        let ysrc0 = line_diffs.last().map_or(0, |l| l.end[pane] + 1);
        for ysrc in ysrc0..src[pane].height() as i32 {
            copy_row(&src[pane], ysrc, &mut dst[pane], y);
            y += 1;
        }
    }
}

fn copy_row(src: &Image, ysrc: i32, dst: &mut Image, ydst: i32) {
    if ysrc < 0 || ysrc >= src.height() as i32 || ydst < 0 || ydst >= dst.height() as i32 {
        return;
    }
    let bytes = src.width().min(dst.width()) as usize * 4;
    let srow = src.row(ysrc as u32);
    dst.row_mut(ydst as u32)[..bytes].copy_from_slice(&srow[..bytes]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::rgba;

    pub(crate) fn solid(w: u32, h: u32, color: Color) -> Image {
        let mut img = Image::new(w, h);
        img.fill(color);
        img
    }

    pub(crate) struct TestClock(pub u64);

    impl Clock for TestClock {
        fn now_millis(&self) -> u64 {
            self.0
        }
    }

    const WHITE: Color = rgb(0xff, 0xff, 0xff);
    const BLACK: Color = rgb(0x00, 0x00, 0x00);
    const RED: Color = rgb(0xff, 0x00, 0x00);
    const GREEN: Color = rgb(0x00, 0xff, 0x00);
    const BLUE: Color = rgb(0x00, 0x00, 0xff);

    #[test]
    fn identical_images_have_no_diffs() {
        let mut buf = ImgDiffBuffer::new();
        buf.open_decoded(vec![solid(16, 16, WHITE), solid(16, 16, WHITE)])
            .unwrap();
        buf.compare_images();
        assert_eq!(buf.diff_count(), 0);
        for y in 0..16 {
            for x in 0..16 {
                assert_eq!(buf.diff_index_from_point(x, y), -1);
            }
        }
        assert_eq!(buf.get_image(0).unwrap(), &solid(16, 16, WHITE));
        assert_eq!(buf.get_image(1).unwrap(), &solid(16, 16, WHITE));
    }

    #[test]
    fn single_pixel_change_is_one_region() {
        let mut right = solid(16, 16, WHITE);
        right.set_pixel(3, 5, BLACK).unwrap();
        let mut buf = ImgDiffBuffer::new();
        buf.open_decoded(vec![solid(16, 16, WHITE), right]).unwrap();
        buf.compare_images();

        assert_eq!(buf.diff_count(), 1);
        let info = buf.diff_info(0).unwrap();
        assert_eq!(
            info.rect,
            Rect {
                left: 0,
                top: 0,
                right: 1,
                bottom: 1
            }
        );
        assert_eq!(buf.diff_index_from_point(3, 5), 0);
        assert_eq!(buf.diff_index_from_point(12, 12), -1);

        // grid cells match pixel equality block by block
        for by in 0..2 {
            for bx in 0..2 {
                let expected = if (bx, by) == (0, 0) { 1 } else { 0 };
                assert_eq!(buf.diff.get(bx, by), expected);
            }
        }
    }

    #[test]
    fn threshold_masks_small_noise() {
        let left = solid(16, 16, rgb(0x80, 0x80, 0x80));
        let right = solid(16, 16, rgb(0x81, 0x81, 0x81));
        let mut buf = ImgDiffBuffer::new();
        buf.open_decoded(vec![left, right]).unwrap();
        buf.set_color_distance_threshold(2.0);
        buf.compare_images();
        assert_eq!(buf.diff_count(), 0);

        buf.set_color_distance_threshold(0.0);
        assert_eq!(buf.diff_count(), 1);
        assert_eq!(
            buf.diff_info(0).unwrap().rect,
            Rect {
                left: 0,
                top: 0,
                right: 2,
                bottom: 2
            }
        );
    }

    fn three_way_panes() -> (Image, Image, Image) {
        // 8x24: one block column, three block rows
        let mut pane0 = solid(8, 24, WHITE);
        let pane1 = solid(8, 24, WHITE);
        let mut pane2 = solid(8, 24, WHITE);
        for y in 0..8 {
            for x in 0..8 {
                pane0.set_pixel(x, y, RED).unwrap();
                pane2.set_pixel(x, y + 8, BLUE).unwrap();
                pane0.set_pixel(x, y + 16, GREEN).unwrap();
                pane2.set_pixel(x, y + 16, GREEN).unwrap();
            }
        }
        (pane0, pane1, pane2)
    }

    #[test]
    fn three_way_regions_are_classified() {
        let (pane0, pane1, pane2) = three_way_panes();
        let mut buf = ImgDiffBuffer::new();
        buf.open_decoded(vec![pane0, pane1, pane2]).unwrap();
        buf.compare_images();

        assert_eq!(buf.diff_count(), 3);
        let ops: Vec<OpType> = (0..3).map(|i| buf.diff_info(i).unwrap().op).collect();
        assert_eq!(
            ops,
            vec![OpType::FirstOnly, OpType::ThirdOnly, OpType::SecondOnly]
        );
        assert_eq!(buf.conflict_count(), 0);
    }

    #[test]
    fn conflicting_region_is_a_conflict() {
        let mut pane0 = solid(8, 8, WHITE);
        let pane1 = solid(8, 8, WHITE);
        let mut pane2 = solid(8, 8, WHITE);
        pane0.set_pixel(0, 0, RED).unwrap();
        pane2.set_pixel(0, 0, BLUE).unwrap();
        let mut buf = ImgDiffBuffer::new();
        buf.open_decoded(vec![pane0, pane1, pane2]).unwrap();
        buf.compare_images();
        assert_eq!(buf.diff_count(), 1);
        assert_eq!(buf.diff_info(0).unwrap().op, OpType::Diff);
        assert_eq!(buf.conflict_count(), 1);
    }

    fn striped_panes() -> (Image, Image) {
        // pane 0: A A B B C C, pane 1: A A X X B B C C
        let mut pane0 = Image::new(16, 6);
        let mut pane1 = Image::new(16, 8);
        let stripes0 = [WHITE, WHITE, RED, RED, BLUE, BLUE];
        let stripes1 = [WHITE, WHITE, GREEN, GREEN, RED, RED, BLUE, BLUE];
        for (y, c) in stripes0.iter().enumerate() {
            for x in 0..16 {
                pane0.set_pixel(x, y as u32, *c).unwrap();
            }
        }
        for (y, c) in stripes1.iter().enumerate() {
            for x in 0..16 {
                pane1.set_pixel(x, y as u32, *c).unwrap();
            }
        }
        (pane0, pane1)
    }

    #[test]
    fn vertical_insertion_is_detected() {
        let (pane0, pane1) = striped_panes();
        let mut buf = ImgDiffBuffer::new();
        buf.open_decoded(vec![pane0, pane1]).unwrap();
        buf.set_insertion_deletion_mode(InsertionDeletionMode::Vertical);

        assert_eq!(buf.line_diffs().len(), 1);
        let ld = &buf.line_diffs()[0];
        assert_eq!((ld.begin[0], ld.end[0]), (2, 1));
        assert_eq!((ld.begin[1], ld.end[1]), (2, 3));
        assert_eq!(ld.dbegin, 2);
        assert_eq!(ld.dendmax, 3);
        assert_eq!(ld.dendmax - ld.dbegin, 1);

        // both panes align to 8 rows, pane 0 rows 2-3 are ghosts
        assert_eq!(buf.preprocessed_image_height(0), Some(8));
        assert_eq!(buf.preprocessed_image_height(1), Some(8));
        let pre0 = buf.get_preprocessed_image(0).unwrap();
        for x in 0..16 {
            assert_eq!(pre0.pixel(x, 2), Some(rgba(0, 0, 0, 0)));
            assert_eq!(pre0.pixel(x, 3), Some(rgba(0, 0, 0, 0)));
        }
        // rows after the ghosts carry the original content
        assert_eq!(pre0.pixel(0, 4), Some(RED));

        // the inserted band is one diff region
        assert_eq!(buf.diff_count(), 1);
    }

    #[test]
    fn coordinate_translation_round_trips() {
        let (pane0, pane1) = striped_panes();
        let mut buf = ImgDiffBuffer::new();
        buf.open_decoded(vec![pane0, pane1]).unwrap();
        buf.set_insertion_deletion_mode(InsertionDeletionMode::Vertical);

        // ghost rows of pane 0 resolve to the run end, outside the image
        let (rx, ry, inside) = buf.convert_to_real_pos(0, 0, 2, true);
        assert_eq!((rx, ry, inside), (0, 1, false));
        // past the ghost rows the mapping resumes
        let (_, ry, inside) = buf.convert_to_real_pos(0, 0, 4, true);
        assert_eq!((ry, inside), (2, true));
        // pane 1 maps straight through
        let (_, ry, inside) = buf.convert_to_real_pos(1, 0, 2, true);
        assert_eq!((ry, inside), (2, true));

        for pane in 0..2 {
            let h = buf.image_height(pane).unwrap() as i32;
            for ry in 0..h {
                let (dx, dy) = buf.convert_to_display_pos(pane, 5, ry);
                let (rx2, ry2, inside) = buf.convert_to_real_pos(pane, dx, dy, false);
                assert!(inside, "pane {pane} row {ry}");
                assert_eq!((rx2, ry2), (5, ry));
            }
        }
    }

    #[test]
    fn navigation_walks_regions() {
        let mut right = solid(32, 8, WHITE);
        right.set_pixel(0, 0, BLACK).unwrap();
        right.set_pixel(31, 0, BLACK).unwrap();
        let mut buf = ImgDiffBuffer::new();
        buf.open_decoded(vec![solid(32, 8, WHITE), right]).unwrap();
        buf.compare_images();
        assert_eq!(buf.diff_count(), 2);
        assert_eq!(buf.current_diff_index(), -1);

        assert!(buf.first_diff());
        assert_eq!(buf.current_diff_index(), 0);
        assert!(buf.next_diff());
        assert_eq!(buf.current_diff_index(), 1);
        assert!(!buf.next_diff());
        assert!(buf.prev_diff());
        assert_eq!(buf.current_diff_index(), 0);
        assert!(buf.last_diff());
        assert_eq!(buf.current_diff_index(), 1);
        assert!(buf.select_diff(-1));
        assert_eq!(buf.current_diff_index(), -1);
        assert!(!buf.select_diff(5));
    }

    #[test]
    fn exif_orientation_is_applied_on_open() {
        use crate::codec::{Decoded, Metadata};
        use std::collections::HashMap;

        struct MockCodec {
            images: HashMap<PathBuf, (Image, Metadata)>,
        }

        impl ImageCodec for MockCodec {
            fn decode(&self, path: &Path) -> anyhow::Result<Decoded> {
                let (image, metadata) = self
                    .images
                    .get(path)
                    .cloned()
                    .ok_or_else(|| anyhow::anyhow!("no such file"))?;
                Ok(Decoded {
                    image,
                    metadata,
                    bits_per_pixel: 32,
                })
            }

            fn encode(&self, _path: &Path, _image: &Image) -> anyhow::Result<()> {
                Ok(())
            }
        }

        let mut upright = solid(4, 2, WHITE);
        upright.set_pixel(0, 0, BLACK).unwrap();
        let mut rotated = upright.clone();
        rotated.rotate(180).unwrap();

        let mut meta = Metadata::new();
        meta.insert("EXIF_MAIN/Orientation".into(), "bottom, right side".into());
        let images = HashMap::from([
            (PathBuf::from("a.png"), (rotated.clone(), meta)),
            (PathBuf::from("b.png"), (upright.clone(), Metadata::new())),
        ]);

        let mut buf = ImgDiffBuffer::with_codec(Box::new(MockCodec { images }));
        buf.open_images(&["a.png", "b.png"]).unwrap();
        assert_eq!(buf.rotation(0), 180);
        buf.compare_images();
        // pane 0 is normalized by its Exif rotation before comparing
        assert_eq!(buf.diff_count(), 0);
        // the stored original ends up untransformed
        assert_eq!(buf.img_orig32[0], rotated);

        assert!(matches!(
            buf.open_images(&["a.png", "missing.png"]),
            Err(Error::Load { .. })
        ));
    }

    #[test]
    fn blink_hides_highlight_on_one_half_period() {
        let mut right = solid(8, 8, WHITE);
        right.set_pixel(0, 0, BLACK).unwrap();
        let mut buf = ImgDiffBuffer::new();
        buf.open_decoded(vec![solid(8, 8, WHITE), right]).unwrap();
        buf.set_blink_differences(true);

        buf.set_clock(Box::new(TestClock(DEFAULT_BLINK_INTERVAL_MS / 2)));
        buf.compare_images();
        let highlighted = buf.get_image(0).unwrap().clone();
        assert_ne!(highlighted, solid(8, 8, WHITE));

        buf.set_clock(Box::new(TestClock(0)));
        buf.refresh_images();
        assert_eq!(buf.get_image(0).unwrap(), &solid(8, 8, WHITE));
    }

    #[test]
    fn xor_overlay_cancels_identical_panes() {
        let mut buf = ImgDiffBuffer::new();
        buf.open_decoded(vec![solid(4, 4, WHITE), solid(4, 4, WHITE)])
            .unwrap();
        buf.compare_images();
        buf.set_overlay_mode(OverlayMode::Xor);
        // white xor white leaves black, alpha untouched
        assert_eq!(buf.get_image(0).unwrap().pixel(0, 0), Some(BLACK));
    }

    #[test]
    fn wipe_swaps_panes_past_the_wipe_line() {
        let mut buf = ImgDiffBuffer::new();
        buf.open_decoded(vec![solid(4, 4, RED), solid(4, 4, BLUE)])
            .unwrap();
        buf.set_show_differences(false);
        buf.compare_images();
        buf.set_wipe_mode_position(WipeMode::Vertical, 2);
        let out0 = buf.get_image(0).unwrap();
        assert_eq!(out0.pixel(0, 0), Some(RED));
        assert_eq!(out0.pixel(0, 3), Some(BLUE));

        buf.set_wipe_mode_position(WipeMode::Horizontal, 2);
        let out0 = buf.get_image(0).unwrap();
        assert_eq!(out0.pixel(0, 0), Some(RED));
        assert_eq!(out0.pixel(3, 0), Some(BLUE));
    }

    #[test]
    fn diff_map_marks_differing_blocks() {
        let mut right = solid(16, 16, WHITE);
        right.set_pixel(3, 5, BLACK).unwrap();
        let mut buf = ImgDiffBuffer::new();
        buf.open_decoded(vec![solid(16, 16, WHITE), right]).unwrap();
        buf.compare_images();
        let map = buf.diff_map_image(16, 16).clone();
        // top-left block colored, bottom-right untouched
        assert_ne!(map.pixel(0, 0), Some(rgba(0, 0, 0, 0)));
        assert_eq!(map.pixel(15, 15), Some(rgba(0, 0, 0, 0)));
    }

    #[test]
    fn offsets_shift_comparison() {
        let mut buf = ImgDiffBuffer::new();
        buf.open_decoded(vec![solid(8, 8, WHITE), solid(8, 8, WHITE)])
            .unwrap();
        buf.compare_images();
        assert_eq!(buf.diff_count(), 0);
        buf.add_image_offset(1, 8, 0);
        // panes no longer overlap anywhere, everything differs
        assert!(buf.diff_count() > 0);
        assert_eq!(buf.image_offset(1), Point { x: 8, y: 0 });
        assert_eq!(buf.diff_image_width(), 16);
    }

    #[test]
    fn pixel_queries_check_bounds() {
        let mut buf = ImgDiffBuffer::new();
        buf.open_decoded(vec![solid(4, 4, WHITE), solid(4, 4, BLACK)])
            .unwrap();
        buf.compare_images();
        assert_eq!(buf.pixel_color(0, 1, 1).unwrap(), WHITE);
        assert!(matches!(
            buf.pixel_color(0, 9, 0),
            Err(Error::OutOfBounds { .. })
        ));
        assert!(matches!(buf.pixel_color(5, 0, 0), Err(Error::BadPaneIndex(5))));
        let d = buf.color_distance(0, 1, 0, 0).unwrap();
        // three channels 255 apart
        assert!((d - (3.0_f64 * 255.0 * 255.0).sqrt()).abs() < 1e-9);
    }
}
