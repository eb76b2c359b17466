//! Editable merge buffer on top of the diff buffer.
//!
//! Every mutation snapshots the whole target pane before and after the edit
//! and pushes an undo record; redo history is discarded on a fresh edit.
//! Per-pane modification counters against a save point drive `is_modified`.

use crate::codec::{Clipboard, MultiPageImage};
use crate::diff_buffer::{Event, ImgDiffBuffer, InsertionDeletionMode};
use crate::image::Image;
use crate::{Error, OpType, Result};
use log::debug;
use std::ops::{Deref, DerefMut};
use std::path::Path;

struct UndoRecord {
    pane: usize,
    old_image: Image,
    new_image: Image,
    modcount: [i32; 3],
}

struct UndoRecords {
    records: Vec<UndoRecord>,
    /// Index of the last applied record, -1 when fully undone.
    current: isize,
    modcount: [i32; 3],
    modcount_on_save: [i32; 3],
}

impl UndoRecords {
    fn new() -> Self {
        Self {
            records: Vec::new(),
            current: -1,
            modcount: [0; 3],
            modcount_on_save: [0; 3],
        }
    }

    fn push(&mut self, pane: usize, old_image: Image, new_image: Image) {
        self.current += 1;
        while (self.current as usize) < self.records.len() {
            let dropped = self.records.pop().unwrap();
            self.modcount[dropped.pane] -= 1;
        }
        self.modcount[pane] += 1;
        self.records.push(UndoRecord {
            pane,
            old_image,
            new_image,
            modcount: self.modcount,
        });
    }

    fn undo_index(&mut self) -> Option<usize> {
        if self.current < 0 {
            return None;
        }
        let index = self.current as usize;
        self.current -= 1;
        Some(index)
    }

    fn redo_index(&mut self) -> Option<usize> {
        if self.current >= self.records.len() as isize - 1 {
            return None;
        }
        self.current += 1;
        Some(self.current as usize)
    }

    fn undoable(&self) -> bool {
        self.current >= 0
    }

    fn redoable(&self) -> bool {
        self.current < self.records.len() as isize - 1
    }

    fn is_modified(&self, pane: usize) -> bool {
        if self.current < 0 {
            self.modcount_on_save[pane] != 0
        } else {
            self.modcount_on_save[pane] != self.records[self.current as usize].modcount[pane]
        }
    }

    fn save(&mut self, pane: usize) {
        self.modcount_on_save[pane] = if self.current < 0 {
            0
        } else {
            self.records[self.current as usize].modcount[pane]
        };
    }

    fn save_point(&self, pane: usize) -> i32 {
        self.modcount_on_save[pane]
    }

    fn set_save_point(&mut self, pane: usize, pos: i32) {
        self.modcount_on_save[pane] = pos;
    }

    fn clear(&mut self) {
        *self = Self::new();
    }
}

pub struct ImgMergeBuffer {
    base: ImgDiffBuffer,
    readonly: [bool; 3],
    undo_records: UndoRecords,
}

impl Deref for ImgMergeBuffer {
    type Target = ImgDiffBuffer;

    fn deref(&self) -> &ImgDiffBuffer {
        &self.base
    }
}

impl DerefMut for ImgMergeBuffer {
    fn deref_mut(&mut self) -> &mut ImgDiffBuffer {
        &mut self.base
    }
}

impl Default for ImgMergeBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl ImgMergeBuffer {
    pub fn new() -> Self {
        Self {
            base: ImgDiffBuffer::new(),
            readonly: [false; 3],
            undo_records: UndoRecords::new(),
        }
    }

    pub fn from_diff_buffer(base: ImgDiffBuffer) -> Self {
        Self {
            base,
            readonly: [false; 3],
            undo_records: UndoRecords::new(),
        }
    }

    /// Create blank panes, multi-page when `pages > 1`.
    pub fn new_images(
        &mut self,
        nimages: usize,
        pages: usize,
        width: u32,
        height: u32,
    ) -> Result<()> {
        if !(2..=3).contains(&nimages) {
            return Err(Error::BadPaneIndex(nimages));
        }
        self.close_images();
        self.base.nimages = nimages;
        for i in 0..nimages {
            if pages > 1 {
                let page_images = vec![Image::new(width, height); pages];
                self.base.img_orig_multipage[i] = MultiPageImage::new(page_images);
                self.base.img_orig[i] = self.base.img_orig_multipage[i]
                    .page(0)
                    .cloned()
                    .unwrap_or_default();
            } else {
                self.base.img_orig[i] = Image::new(width, height);
            }
            self.base.img_orig32[i] = self.base.img_orig[i].clone();
            self.base.bpp[i] = 32;
        }
        self.base.emit(Event::New);
        Ok(())
    }

    pub fn close_images(&mut self) {
        self.undo_records.clear();
        self.base.close_images();
    }

    pub fn read_only(&self, pane: usize) -> bool {
        pane >= self.base.nimages || self.readonly[pane]
    }

    pub fn set_read_only(&mut self, pane: usize, readonly: bool) {
        if pane < self.base.nimages {
            self.readonly[pane] = readonly;
        }
    }

    // -- merge operations ----------------------------------------------------

    /// Copy the pixels of one diff region from `src_pane` onto `dst_pane`.
    pub fn copy_diff(&mut self, diff_index: i32, src_pane: usize, dst_pane: usize) -> Result<()> {
        self.check_panes(src_pane, dst_pane)?;
        if diff_index < 0 || diff_index >= self.base.diff_count || src_pane == dst_pane {
            return Ok(());
        }
        let old = self.base.img_orig32[dst_pane].clone();
        {
            let mut t = self.base.transformed();
            t.copy_diff_internal(diff_index, src_pane, dst_pane);
        }
        self.finish_edit(dst_pane, old);
        Ok(())
    }

    pub fn copy_diff_all(&mut self, src_pane: usize, dst_pane: usize) -> Result<()> {
        self.check_panes(src_pane, dst_pane)?;
        if src_pane == dst_pane {
            return Ok(());
        }
        let old = self.base.img_orig32[dst_pane].clone();
        {
            let mut t = self.base.transformed();
            for diff_index in 0..t.diff_count {
                t.copy_diff_internal(diff_index, src_pane, dst_pane);
            }
        }
        self.finish_edit(dst_pane, old);
        Ok(())
    }

    /// Automatic three-way merge into `dst_pane`: every region whose source
    /// pane is implied by its classification is copied, conflicts are
    /// skipped. Returns the number of merged regions.
    pub fn copy_diff_3way(&mut self, dst_pane: usize) -> Result<usize> {
        if dst_pane >= self.base.nimages {
            return Err(Error::BadPaneIndex(dst_pane));
        }
        if self.readonly[dst_pane] {
            return Err(Error::ReadOnly(dst_pane));
        }
        let old = self.base.img_orig32[dst_pane].clone();
        let mut merged = 0;
        {
            let mut t = self.base.transformed();
            for diff_index in 0..t.diff_count {
                let op = t.diff_infos[diff_index as usize].op;
                let src_pane = match op {
                    OpType::FirstOnly => (dst_pane == 1).then_some(0),
                    OpType::SecondOnly => (dst_pane != 1).then_some(1),
                    OpType::ThirdOnly => (dst_pane == 1).then_some(2),
                    _ => None,
                };
                if let Some(src_pane) = src_pane {
                    t.copy_diff_internal(diff_index, src_pane, dst_pane);
                    merged += 1;
                }
            }
        }
        self.finish_edit(dst_pane, old);
        debug!("three-way merge into pane {dst_pane}: {merged} regions");
        Ok(merged)
    }

    /// Clear the rectangle (right/bottom exclusive) to transparent black.
    pub fn delete_rectangle(
        &mut self,
        pane: usize,
        left: i32,
        top: i32,
        right: i32,
        bottom: i32,
    ) -> Result<()> {
        self.check_pane_writable(pane)?;
        let old = self.base.img_orig32[pane].clone();
        {
            let mut t = self.base.transformed();
            let w = t.img_orig32[pane].width() as i32;
            let h = t.img_orig32[pane].height() as i32;
            let left = left.clamp(0, w);
            let right = right.clamp(left, w);
            let top = top.clamp(0, h);
            let bottom = bottom.clamp(top, h);
            for y in top..bottom {
                let row = t.img_orig32[pane].row_mut(y as u32);
                row[left as usize * 4..right as usize * 4].fill(0);
            }
        }
        self.finish_edit(pane, old);
        Ok(())
    }

    /// Write `image` into the pane at `(x, y)`, clipped to the pane bounds.
    pub fn paste_image(&mut self, pane: usize, x: i32, y: i32, image: &Image) -> Result<()> {
        self.check_pane_writable(pane)?;
        let old = self.base.img_orig32[pane].clone();
        {
            let mut t = self.base.transformed();
            t.paste_image_internal(pane, x, y, image);
        }
        self.finish_edit(pane, old);
        Ok(())
    }

    /// Reallocate the pane, keeping the old pixels in the upper-left corner.
    pub fn resize(&mut self, pane: usize, width: u32, height: u32) -> Result<bool> {
        self.check_pane_writable(pane)?;
        if width == self.base.img_orig32[pane].width()
            && height == self.base.img_orig32[pane].height()
        {
            return Ok(false);
        }
        let old = self.base.img_orig32[pane].clone();
        {
            let mut t = self.base.transformed();
            t.img_orig32[pane].set_size(width, height);
            t.paste_image_internal(pane, 0, 0, &old);
        }
        self.finish_edit(pane, old);
        Ok(true)
    }

    fn check_panes(&self, src_pane: usize, dst_pane: usize) -> Result<()> {
        if src_pane >= self.base.nimages {
            return Err(Error::BadPaneIndex(src_pane));
        }
        if dst_pane >= self.base.nimages {
            return Err(Error::BadPaneIndex(dst_pane));
        }
        if self.readonly[dst_pane] {
            return Err(Error::ReadOnly(dst_pane));
        }
        Ok(())
    }

    fn check_pane_writable(&self, pane: usize) -> Result<()> {
        if pane >= self.base.nimages {
            return Err(Error::BadPaneIndex(pane));
        }
        if self.readonly[pane] {
            return Err(Error::ReadOnly(pane));
        }
        Ok(())
    }

    fn finish_edit(&mut self, pane: usize, old: Image) {
        let new = self.base.img_orig32[pane].clone();
        self.undo_records.push(pane, old, new);
        self.base.compare_images();
    }

    // -- undo/redo -----------------------------------------------------------

    pub fn is_modified(&self, pane: usize) -> bool {
        self.undo_records.is_modified(pane)
    }

    pub fn undoable(&self) -> bool {
        self.undo_records.undoable()
    }

    pub fn redoable(&self) -> bool {
        self.undo_records.redoable()
    }

    pub fn undo(&mut self) -> bool {
        let Some(index) = self.undo_records.undo_index() else {
            return false;
        };
        let record = &self.undo_records.records[index];
        let (pane, image) = (record.pane, record.old_image.clone());
        self.base.img_orig32[pane] = image;
        self.base.compare_images();
        true
    }

    pub fn redo(&mut self) -> bool {
        let Some(index) = self.undo_records.redo_index() else {
            return false;
        };
        let record = &self.undo_records.records[index];
        let (pane, image) = (record.pane, record.new_image.clone());
        self.base.img_orig32[pane] = image;
        self.base.compare_images();
        true
    }

    pub fn save_point(&self, pane: usize) -> i32 {
        self.undo_records.save_point(pane)
    }

    pub fn set_save_point(&mut self, pane: usize, pos: i32) {
        self.undo_records.set_save_point(pane, pos);
    }

    // -- persistence ---------------------------------------------------------

    /// Persist the pane to its current file name. Unmodified panes are a
    /// no-op.
    pub fn save_image(&mut self, pane: usize) -> Result<()> {
        self.check_pane_writable(pane)?;
        if !self.undo_records.is_modified(pane) {
            return Ok(());
        }
        let path = self.base.filenames[pane].clone();
        self.save_image_as(pane, &path)
    }

    pub fn save_images(&mut self) -> Result<()> {
        for pane in 0..self.base.nimages {
            self.save_image(pane)?;
        }
        Ok(())
    }

    pub fn save_image_as(&mut self, pane: usize, path: &Path) -> Result<()> {
        if pane >= self.base.nimages {
            return Err(Error::BadPaneIndex(pane));
        }
        self.base.img_orig[pane] = self.base.img_orig32[pane].clone();
        if self.base.img_orig_multipage[pane].is_valid() {
            let page = self.base.current_page[pane];
            let image = self.base.img_orig[pane].clone();
            self.base.img_orig_multipage[pane].replace_page(page, image);
        }
        self.base
            .codec
            .encode(path, &self.base.img_orig[pane])
            .map_err(|e| Error::Save {
                path: path.to_path_buf(),
                source: e,
            })?;
        self.undo_records.save(pane);
        self.base.filenames[pane] = path.to_path_buf();
        Ok(())
    }

    // -- clipboard -----------------------------------------------------------

    /// Copy the inclusive rectangle to the clipboard.
    pub fn copy_rect_to_clipboard(
        &mut self,
        pane: usize,
        left: i32,
        top: i32,
        right: i32,
        bottom: i32,
        clipboard: &mut dyn Clipboard,
    ) -> Result<()> {
        let image = self.base.copy_sub_image(pane, left, top, right, bottom)?;
        clipboard.copy(&image).map_err(|e| Error::Save {
            path: self.base.filenames[pane].clone(),
            source: e,
        })
    }

    /// Copy the inclusive rectangle to the clipboard, then clear it.
    pub fn cut_rect_to_clipboard(
        &mut self,
        pane: usize,
        left: i32,
        top: i32,
        right: i32,
        bottom: i32,
        clipboard: &mut dyn Clipboard,
    ) -> Result<()> {
        self.check_pane_writable(pane)?;
        self.copy_rect_to_clipboard(pane, left, top, right, bottom, clipboard)?;
        self.delete_rectangle(pane, left, top, right + 1, bottom + 1)
    }

    pub fn paste_from_clipboard(
        &mut self,
        pane: usize,
        x: i32,
        y: i32,
        clipboard: &mut dyn Clipboard,
    ) -> Result<bool> {
        match clipboard.paste() {
            Some(image) => {
                self.paste_image(pane, x, y, &image)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

// The merge internals operate on the diff-buffer state while the pane
// transforms are applied.
impl ImgDiffBuffer {
    fn insert_rows(&mut self, pane: usize, y: i32, rows: i32) {
        debug_assert!(self.temporarily_transformed);
        let tmp = self.img_orig32[pane].clone();
        self.img_orig32[pane].set_size(tmp.width(), (tmp.height() as i32 + rows) as u32);
        for i in 0..y.min(tmp.height() as i32) {
            let row = tmp.row(i as u32).to_vec();
            self.img_orig32[pane].row_mut(i as u32).copy_from_slice(&row);
        }
        for i in y.max(0)..tmp.height() as i32 {
            let row = tmp.row(i as u32).to_vec();
            self.img_orig32[pane]
                .row_mut((i + rows) as u32)
                .copy_from_slice(&row);
        }
    }

    fn delete_rows(&mut self, pane: usize, y: i32, rows: i32) {
        debug_assert!(self.temporarily_transformed);
        let tmp = self.img_orig32[pane].clone();
        self.img_orig32[pane].set_size(tmp.width(), (tmp.height() as i32 - rows).max(0) as u32);
        for i in 0..y.min(tmp.height() as i32) {
            let row = tmp.row(i as u32).to_vec();
            self.img_orig32[pane].row_mut(i as u32).copy_from_slice(&row);
        }
        for i in (y + rows).max(0)..tmp.height() as i32 {
            let row = tmp.row(i as u32).to_vec();
            self.img_orig32[pane]
                .row_mut((i - rows) as u32)
                .copy_from_slice(&row);
        }
    }

    fn insert_columns(&mut self, pane: usize, x: i32, columns: i32) {
        debug_assert!(self.temporarily_transformed);
        let tmp = self.img_orig32[pane].clone();
        let x = x.clamp(0, tmp.width() as i32) as usize;
        let cols = columns as usize;
        self.img_orig32[pane].set_size((tmp.width() as i32 + columns) as u32, tmp.height());
        for i in 0..tmp.height() {
            let src = tmp.row(i);
            let dst = self.img_orig32[pane].row_mut(i);
            dst[..x * 4].copy_from_slice(&src[..x * 4]);
            dst[(x + cols) * 4..].copy_from_slice(&src[x * 4..]);
        }
    }

    fn delete_columns(&mut self, pane: usize, x: i32, columns: i32) {
        debug_assert!(self.temporarily_transformed);
        let tmp = self.img_orig32[pane].clone();
        let x = x.clamp(0, tmp.width() as i32) as usize;
        let cols = (columns as usize).min(tmp.width() as usize - x);
        self.img_orig32[pane].set_size((tmp.width() as usize - cols) as u32, tmp.height());
        for i in 0..tmp.height() {
            let src = tmp.row(i);
            let dst = self.img_orig32[pane].row_mut(i);
            dst[..x * 4].copy_from_slice(&src[..x * 4]);
            dst[x * 4..].copy_from_slice(&src[(x + cols) * 4..]);
        }
    }

    fn paste_image_internal(&mut self, pane: usize, x: i32, y: i32, image: &Image) {
        debug_assert!(self.temporarily_transformed);
        if pane >= self.nimages {
            return;
        }
        self.img_orig32[pane].paste_sub_image(image, x, y);
    }

    fn copy_diff_internal(&mut self, diff_index: i32, src_pane: usize, dst_pane: usize) {
        debug_assert!(self.temporarily_transformed);
        if src_pane >= self.nimages || dst_pane >= self.nimages {
            return;
        }
        if diff_index < 0 || diff_index >= self.diff_count {
            return;
        }
        let rect = self.diff_infos[diff_index as usize].rect;
        let bs = self.diff_block_size as i32;

        let (sox, soy) = (self.offset[src_pane].x, self.offset[src_pane].y);
        let (spw, sph) = (
            self.img_preprocessed[src_pane].width() as i32,
            self.img_preprocessed[src_pane].height() as i32,
        );
        let xmin = (rect.left * bs).max(sox);
        let ymin = (rect.top * bs).max(soy);
        let xmax = (rect.right * bs - 1).min(spw + sox - 1);
        let ymax = (rect.bottom * bs - 1).min(sph + soy - 1);

        // grow the destination when the source region pokes outside it,
        // shifting the offsets so every origin stays non-negative
        let (dox, doy) = (self.offset[dst_pane].x, self.offset[dst_pane].y);
        let (dpw, dph) = (
            self.img_preprocessed[dst_pane].width() as i32,
            self.img_preprocessed[dst_pane].height() as i32,
        );
        let (mut dsx, mut dsy) = (0, 0);
        let (mut ox, mut oy) = (0, 0);
        if xmin < dox {
            ox = dox - xmin;
            dsx += ox;
        }
        if ymin < doy {
            oy = doy - ymin;
            dsy += oy;
        }
        if xmax >= dpw + dox {
            dsx += xmax - (dpw + dox - 1);
        }
        if ymax >= dph + doy {
            dsy += ymax - (dph + doy - 1);
        }
        if dsx > 0 || dsy > 0 {
            let tmp = self.img_orig32[dst_pane].clone();
            self.img_orig32[dst_pane].set_size(
                (tmp.width() as i32 + dsx) as u32,
                (tmp.height() as i32 + dsy) as u32,
            );
            self.img_orig32[dst_pane].paste_sub_image(&tmp, ox, oy);
            self.offset[dst_pane].x -= ox;
            self.offset[dst_pane].y -= oy;
        }

        // copy the region's cells pixel by pixel through the display-to-real
        // mapping of both panes
        let mut y = rect.top * bs;
        while y < rect.bottom * bs {
            let mut x = rect.left * bs;
            while x < rect.right * bs {
                if self.diff.get((x / bs) as usize, (y / bs) as usize) == diff_index + 1 {
                    for i in 0..bs {
                        for j in 0..bs {
                            let (rsx, rsy, src_inside) =
                                self.convert_to_real_pos(src_pane, x + j, y + i, true);
                            if !src_inside {
                                continue;
                            }
                            let (rdx, rdy, dst_inside) =
                                self.convert_to_real_pos(dst_pane, x + j, y + i, true);
                            if !dst_inside {
                                continue;
                            }
                            let src_img = &self.img_orig32[src_pane];
                            if rsx < 0
                                || rsy < 0
                                || rsx >= src_img.width() as i32
                                || rsy >= src_img.height() as i32
                            {
                                continue;
                            }
                            let px: [u8; 4] = src_img.row(rsy as u32)[rsx as usize * 4..][..4]
                                .try_into()
                                .unwrap();
                            let dst_img = &mut self.img_orig32[dst_pane];
                            if rdx < 0
                                || rdy < 0
                                || rdx >= dst_img.width() as i32
                                || rdy >= dst_img.height() as i32
                            {
                                continue;
                            }
                            dst_img.row_mut(rdy as u32)[rdx as usize * 4..][..4]
                                .copy_from_slice(&px);
                        }
                    }
                }
                x += bs;
            }
            y += bs;
        }

        if (0..self.nimages).any(|i| self.offset[i].x != 0 || self.offset[i].y != 0) {
            return;
        }

        // align the destination's row/column count with the source along
        // the line diff, so inserted or deleted bands carry over whole
        match self.insertion_deletion_mode() {
            InsertionDeletionMode::Vertical => {
                let line_diffs = self.line_diff_infos.clone();
                for it in line_diffs.iter().rev() {
                    if rect.top * bs <= it.dbegin && it.dend[src_pane] < rect.bottom * bs {
                        let dh = it.dend[src_pane] - it.dend[dst_pane];
                        if dh > 0 {
                            self.insert_rows(dst_pane, it.end[dst_pane] + 1, dh);
                            for i in 0..=(it.end[src_pane] - it.begin[src_pane]) {
                                let sy = it.begin[src_pane] + i;
                                let dy = it.begin[dst_pane] + i;
                                if sy < 0
                                    || dy < 0
                                    || sy >= self.img_orig32[src_pane].height() as i32
                                    || dy >= self.img_orig32[dst_pane].height() as i32
                                {
                                    continue;
                                }
                                let row = self.img_orig32[src_pane].row(sy as u32).to_vec();
                                let dst_row = self.img_orig32[dst_pane].row_mut(dy as u32);
                                let n = row.len().min(dst_row.len());
                                dst_row[..n].copy_from_slice(&row[..n]);
                            }
                        } else if dh < 0 {
                            self.delete_rows(dst_pane, it.end[dst_pane] + 1 + dh, -dh);
                        }
                    }
                }
            }
            InsertionDeletionMode::Horizontal => {
                let line_diffs = self.line_diff_infos.clone();
                for it in line_diffs.iter().rev() {
                    if rect.left * bs <= it.dbegin && it.dend[src_pane] < rect.right * bs {
                        let dw = it.dend[src_pane] - it.dend[dst_pane];
                        if dw > 0 {
                            self.insert_columns(dst_pane, it.end[dst_pane] + 1, dw);
                            let cols = (it.end[src_pane] + 1 - it.begin[src_pane]) as usize;
                            let sx = it.begin[src_pane];
                            let dx = it.begin[dst_pane];
                            if sx < 0
                                || dx < 0
                                || sx as usize + cols > self.img_orig32[src_pane].width() as usize
                                || dx as usize + cols > self.img_orig32[dst_pane].width() as usize
                            {
                                continue;
                            }
                            let h = self.img_orig32[src_pane]
                                .height()
                                .min(self.img_orig32[dst_pane].height());
                            for y in 0..h {
                                let src_row = self.img_orig32[src_pane].row(y);
                                let span =
                                    src_row[sx as usize * 4..(sx as usize + cols) * 4].to_vec();
                                let dst_row = self.img_orig32[dst_pane].row_mut(y);
                                dst_row[dx as usize * 4..(dx as usize + cols) * 4]
                                    .copy_from_slice(&span);
                            }
                        } else if dw < 0 {
                            self.delete_columns(dst_pane, it.end[dst_pane] + 1 + dw, -dw);
                        }
                    }
                }
            }
            InsertionDeletionMode::None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::MemoryClipboard;
    use crate::image::{Color, rgb, rgba};

    const WHITE: Color = rgb(0xff, 0xff, 0xff);
    const BLACK: Color = rgb(0x00, 0x00, 0x00);
    const RED: Color = rgb(0xff, 0x00, 0x00);
    const GREEN: Color = rgb(0x00, 0xff, 0x00);
    const BLUE: Color = rgb(0x00, 0x00, 0xff);

    fn solid(w: u32, h: u32, color: Color) -> Image {
        let mut img = Image::new(w, h);
        img.fill(color);
        img
    }

    fn two_pane_buffer() -> ImgMergeBuffer {
        let mut right = solid(16, 16, WHITE);
        right.set_pixel(3, 5, BLACK).unwrap();
        let mut buf = ImgMergeBuffer::new();
        buf.open_decoded(vec![solid(16, 16, WHITE), right]).unwrap();
        buf.compare_images();
        buf
    }

    #[test]
    fn copy_diff_then_undo_then_redo() {
        let mut buf = two_pane_buffer();
        let initial = buf.img_orig32[1].clone();
        assert_eq!(buf.diff_count(), 1);
        assert!(!buf.is_modified(1));

        buf.copy_diff(0, 0, 1).unwrap();
        let merged = buf.img_orig32[1].clone();
        assert_eq!(merged, solid(16, 16, WHITE));
        assert_eq!(buf.diff_count(), 0);
        assert!(buf.is_modified(1));
        assert!(buf.undoable());
        assert!(!buf.redoable());

        assert!(buf.undo());
        assert_eq!(buf.img_orig32[1], initial);
        assert_eq!(buf.diff_count(), 1);
        assert!(!buf.is_modified(1));
        assert!(buf.redoable());

        assert!(buf.redo());
        assert_eq!(buf.img_orig32[1], merged);
        assert!(buf.is_modified(1));
        assert!(buf.undo());
        assert!(!buf.undo());
    }

    #[test]
    fn new_edit_discards_redo_history() {
        let mut buf = two_pane_buffer();
        buf.copy_diff(0, 0, 1).unwrap();
        assert!(buf.undo());
        assert!(buf.redoable());
        buf.delete_rectangle(1, 0, 0, 2, 2).unwrap();
        assert!(!buf.redoable());
    }

    #[test]
    fn delete_rectangle_clears_to_transparent() {
        let mut buf = two_pane_buffer();
        buf.delete_rectangle(0, 1, 1, 3, 3).unwrap();
        let img = buf.img_orig32[0].clone();
        assert_eq!(img.pixel(1, 1), Some(rgba(0, 0, 0, 0)));
        assert_eq!(img.pixel(2, 2), Some(rgba(0, 0, 0, 0)));
        assert_eq!(img.pixel(3, 3), Some(WHITE));
        assert_eq!(img.pixel(0, 0), Some(WHITE));
        assert!(buf.undo());
        assert_eq!(buf.img_orig32[0], solid(16, 16, WHITE));
    }

    #[test]
    fn read_only_pane_rejects_mutations() {
        let mut buf = two_pane_buffer();
        buf.set_read_only(1, true);
        assert!(buf.read_only(1));
        assert!(matches!(buf.copy_diff(0, 0, 1), Err(Error::ReadOnly(1))));
        assert!(matches!(
            buf.delete_rectangle(1, 0, 0, 1, 1),
            Err(Error::ReadOnly(1))
        ));
        assert!(matches!(
            buf.paste_image(1, 0, 0, &solid(2, 2, RED)),
            Err(Error::ReadOnly(1))
        ));
        assert!(matches!(buf.resize(1, 4, 4), Err(Error::ReadOnly(1))));
        assert!(matches!(buf.copy_diff_3way(1), Err(Error::ReadOnly(1))));
        assert!(matches!(buf.save_image(1), Err(Error::ReadOnly(1))));
        // the other pane still accepts edits
        buf.delete_rectangle(0, 0, 0, 1, 1).unwrap();
    }

    #[test]
    fn bad_pane_indices_are_rejected() {
        let mut buf = two_pane_buffer();
        assert!(matches!(buf.copy_diff(0, 7, 1), Err(Error::BadPaneIndex(7))));
        assert!(matches!(buf.resize(9, 4, 4), Err(Error::BadPaneIndex(9))));
    }

    #[test]
    fn resize_keeps_upper_left_content() {
        let mut buf = two_pane_buffer();
        assert!(buf.resize(0, 20, 20).unwrap());
        let img = buf.img_orig32[0].clone();
        assert_eq!((img.width(), img.height()), (20, 20));
        assert_eq!(img.pixel(15, 15), Some(WHITE));
        assert_eq!(img.pixel(19, 19), Some(rgba(0, 0, 0, 0)));

        assert!(buf.resize(0, 8, 8).unwrap());
        assert_eq!(buf.img_orig32[0].width(), 8);
        // same size is a no-op
        assert!(!buf.resize(0, 8, 8).unwrap());
    }

    #[test]
    fn paste_image_is_clipped() {
        let mut buf = two_pane_buffer();
        buf.paste_image(0, 14, 14, &solid(4, 4, RED)).unwrap();
        let img = buf.img_orig32[0].clone();
        assert_eq!(img.pixel(14, 14), Some(RED));
        assert_eq!(img.pixel(15, 15), Some(RED));
        assert_eq!(img.pixel(13, 13), Some(WHITE));
    }

    #[test]
    fn three_way_auto_merge_skips_conflicts() {
        // 8x24, one block column: row band 0 changed in pane 0, band 1 in
        // pane 2, band 2 conflicting
        let mut pane0 = solid(8, 24, WHITE);
        let pane1 = solid(8, 24, WHITE);
        let mut pane2 = solid(8, 24, WHITE);
        for y in 0..8 {
            for x in 0..8 {
                pane0.set_pixel(x, y, RED).unwrap();
                pane2.set_pixel(x, y + 8, BLUE).unwrap();
                pane0.set_pixel(x, y + 16, GREEN).unwrap();
                pane2.set_pixel(x, y + 16, BLACK).unwrap();
            }
        }
        let mut buf = ImgMergeBuffer::new();
        buf.open_decoded(vec![pane0, pane1, pane2]).unwrap();
        buf.compare_images();
        assert_eq!(buf.diff_count(), 3);
        assert_eq!(buf.conflict_count(), 1);

        let merged = buf.copy_diff_3way(1).unwrap();
        assert_eq!(merged, 2);
        let img = buf.img_orig32[1].clone();
        assert_eq!(img.pixel(0, 0), Some(RED));
        assert_eq!(img.pixel(0, 8), Some(BLUE));
        // the conflict band stays untouched
        assert_eq!(img.pixel(0, 16), Some(WHITE));
    }

    #[test]
    fn copy_diff_aligns_inserted_rows() {
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
        let mut buf = ImgMergeBuffer::new();
        buf.open_decoded(vec![pane0, pane1.clone()]).unwrap();
        buf.set_insertion_deletion_mode(InsertionDeletionMode::Vertical);
        assert_eq!(buf.diff_count(), 1);

        // copying from the taller pane inserts the missing rows
        buf.copy_diff(0, 1, 0).unwrap();
        assert_eq!(buf.img_orig32[0], pane1);
        assert_eq!(buf.diff_count(), 0);

        // and undo restores the shorter pane
        assert!(buf.undo());
        assert_eq!(buf.img_orig32[0].height(), 6);
        assert_eq!(buf.diff_count(), 1);
    }

    #[test]
    fn save_image_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pane.png");
        let mut buf = two_pane_buffer();
        buf.copy_diff(0, 0, 1).unwrap();
        assert!(buf.is_modified(1));
        buf.save_image_as(1, &path).unwrap();
        assert!(!buf.is_modified(1));
        assert!(path.exists());

        // saving to an unwritable location reports the failure
        assert!(matches!(
            buf.save_image_as(0, Path::new("/nonexistent/dir/x.png")),
            Err(Error::Save { .. })
        ));
    }

    #[test]
    fn save_image_skips_unmodified_panes() {
        let mut buf = two_pane_buffer();
        // never written anywhere, but unmodified panes return Ok without
        // touching the codec
        buf.save_image(0).unwrap();
        buf.save_images().unwrap();
    }

    #[test]
    fn clipboard_cut_copy_paste() {
        let mut clipboard = MemoryClipboard::default();
        let mut buf = two_pane_buffer();
        buf.paste_image(0, 0, 0, &solid(2, 2, RED)).unwrap();

        buf.copy_rect_to_clipboard(0, 0, 0, 1, 1, &mut clipboard)
            .unwrap();
        buf.paste_from_clipboard(1, 4, 4, &mut clipboard).unwrap();
        assert_eq!(buf.img_orig32[1].pixel(4, 4), Some(RED));
        assert_eq!(buf.img_orig32[1].pixel(5, 5), Some(RED));

        buf.cut_rect_to_clipboard(0, 0, 0, 1, 1, &mut clipboard)
            .unwrap();
        assert_eq!(buf.img_orig32[0].pixel(0, 0), Some(rgba(0, 0, 0, 0)));

        let mut empty = MemoryClipboard::default();
        assert!(!buf.paste_from_clipboard(0, 0, 0, &mut empty).unwrap());
    }

    #[test]
    fn new_images_creates_blank_panes() {
        let mut buf = ImgMergeBuffer::new();
        buf.new_images(2, 1, 8, 8).unwrap();
        buf.compare_images();
        assert_eq!(buf.pane_count(), 2);
        assert_eq!(buf.diff_count(), 0);

        buf.new_images(2, 3, 4, 4).unwrap();
        assert_eq!(buf.page_count(0), 3);
        assert_eq!(buf.max_page_count(), 3);

        assert!(matches!(buf.new_images(5, 1, 8, 8), Err(Error::BadPaneIndex(5))));
    }

    #[test]
    fn close_images_drops_undo_history() {
        let mut buf = two_pane_buffer();
        buf.copy_diff(0, 0, 1).unwrap();
        assert!(buf.undoable());
        buf.close_images();
        assert!(!buf.undoable());
        assert_eq!(buf.pane_count(), 0);
    }
}
