//! Record-level diff engine.
//!
//! A port of the LibXDiff algorithm family (the same lineage git uses),
//! specialized for equal-stride records such as image scanlines. Records are
//! opaque; the engine only needs a stable hash and a content-equality test.
//! Content-equal records are interned into classes up front, so the core
//! algorithms compare plain class ids.
//!
//! The output is an edit script over both sequences: `Equal`, `Insert`,
//! `Delete`, `Replace` (`=`, `+`, `-`, `!`).

use crate::image::{Image, pixel_distance2};
use std::collections::HashMap;
use std::ops::{Index, IndexMut, Range};

/// Abstract record sequence. `hash_at` must be consistent with
/// `records_match`: matching records hash identically.
pub trait DiffData {
    fn len(&self) -> usize;
    fn hash_at(&self, index: usize) -> u64;
    fn records_match(&self, index: usize, other: &Self, other_index: usize) -> bool;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum Algorithm {
    /// Myers O(ND) with heuristic pruning.
    #[default]
    Myers,
    /// Myers with pruning disabled.
    Minimal,
    Patience,
    Histogram,
    /// Pair records index for index; any mismatch is a `Replace`.
    None,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EditOp {
    Equal,
    Insert,
    Delete,
    Replace,
}

const MAX_COST_MIN: isize = 256;
const HEUR_MIN_COST: isize = 256;
const SNAKE_CNT: isize = 20;
const K_HEUR: isize = 4;
const KPDIS_RUN: usize = 4;
const MAX_EQLIMIT: usize = 1024;
const SIMSCAN_WINDOW: usize = 100;
const MAX_CHAIN_LEN: usize = 64;

/// Compute the edit script between two record sequences.
pub fn diff_records<D: DiffData>(data1: &D, data2: &D, algorithm: Algorithm) -> Vec<EditOp> {
    let n1 = data1.len();
    let n2 = data2.len();
    let cl = classify(data1, data2);
    let mut rchg1 = vec![false; n1];
    let mut rchg2 = vec![false; n2];
    match algorithm {
        Algorithm::Myers | Algorithm::Minimal => {
            myers_full(&cl, &mut rchg1, &mut rchg2, algorithm == Algorithm::Minimal);
        }
        Algorithm::Patience => {
            patience(
                &cl.classes1,
                &cl.classes2,
                &mut rchg1,
                &mut rchg2,
                0..n1,
                0..n2,
            );
        }
        Algorithm::Histogram => {
            histogram(
                &cl.classes1,
                &cl.classes2,
                &mut rchg1,
                &mut rchg2,
                0..n1,
                0..n2,
            );
        }
        Algorithm::None => none_diff(&cl.classes1, &cl.classes2, &mut rchg1, &mut rchg2),
    }
    build_script(&rchg1, &rchg2)
}

// ---------------------------------------------------------------------------
// record classification

struct Classified {
    classes1: Vec<u64>,
    classes2: Vec<u64>,
    count1: Vec<usize>,
    count2: Vec<usize>,
}

/// Intern every record into a class id such that two records share a class
/// iff they match. Hash collisions are resolved with `records_match`.
fn classify<D: DiffData>(data1: &D, data2: &D) -> Classified {
    let mut table: HashMap<u64, Vec<usize>> = HashMap::new();
    // class id -> representative record (side2?, index)
    let mut reps: Vec<(bool, usize)> = Vec::new();
    let mut count1: Vec<usize> = Vec::new();
    let mut count2: Vec<usize> = Vec::new();

    let mut intern = |second: bool, i: usize, count1: &mut Vec<usize>, count2: &mut Vec<usize>| {
        let h = if second {
            data2.hash_at(i)
        } else {
            data1.hash_at(i)
        };
        let ids = table.entry(h).or_default();
        for &cid in ids.iter() {
            let (rep_second, rep_idx) = reps[cid];
            let matched = match (second, rep_second) {
                (false, false) => data1.records_match(i, data1, rep_idx),
                (false, true) => data1.records_match(i, data2, rep_idx),
                (true, false) => data2.records_match(i, data1, rep_idx),
                (true, true) => data2.records_match(i, data2, rep_idx),
            };
            if matched {
                if second {
                    count2[cid] += 1;
                } else {
                    count1[cid] += 1;
                }
                return cid as u64;
            }
        }
        let cid = reps.len();
        reps.push((second, i));
        count1.push(usize::from(!second));
        count2.push(usize::from(second));
        ids.push(cid);
        cid as u64
    };

    let classes1 = (0..data1.len())
        .map(|i| intern(false, i, &mut count1, &mut count2))
        .collect();
    let classes2 = (0..data2.len())
        .map(|i| intern(true, i, &mut count1, &mut count2))
        .collect();
    Classified {
        classes1,
        classes2,
        count1,
        count2,
    }
}

// ---------------------------------------------------------------------------
// Myers

/// K-line vector indexed by diagonal number.
struct KVec {
    v: Vec<isize>,
    offset: isize,
}

impl KVec {
    fn new(size: usize, offset: isize) -> Self {
        Self {
            v: vec![0; size],
            offset,
        }
    }
}

impl Index<isize> for KVec {
    type Output = isize;

    fn index(&self, d: isize) -> &isize {
        &self.v[(d + self.offset) as usize]
    }
}

impl IndexMut<isize> for KVec {
    fn index_mut(&mut self, d: isize) -> &mut isize {
        &mut self.v[(d + self.offset) as usize]
    }
}

fn bogosqrt(mut n: usize) -> usize {
    let mut i = 1;
    while n > 0 {
        i <<= 1;
        n >>= 2;
    }
    i
}

struct Split {
    i1: isize,
    i2: isize,
    min_lo: bool,
    min_hi: bool,
}

/// Bidirectional Myers box split. Scans the forward diagonal from
/// `(off1, off2)` and the backward diagonal from `(lim1, lim2)` until they
/// cross, falling back to a suboptimal split when the edit cost grows past
/// the heuristic triggers (unless a minimal diff was requested).
#[allow(clippy::too_many_arguments)]
fn split(
    ha1: &[u64],
    off1: isize,
    lim1: isize,
    ha2: &[u64],
    off2: isize,
    lim2: isize,
    kvdf: &mut KVec,
    kvdb: &mut KVec,
    need_min: bool,
    mxcost: isize,
) -> Split {
    let dmin = off1 - lim2;
    let dmax = lim1 - off2;
    let fmid = off1 - off2;
    let bmid = lim1 - lim2;
    let odd = (fmid - bmid) & 1 != 0;
    let (mut fmin, mut fmax) = (fmid, fmid);
    let (mut bmin, mut bmax) = (bmid, bmid);
    let mut spl = Split {
        i1: 0,
        i2: 0,
        min_lo: false,
        min_hi: false,
    };

    kvdf[fmid] = off1;
    kvdb[bmid] = lim1;

    let mut ec: isize = 1;
    loop {
        let mut got_snake = false;

        if fmin > dmin {
            fmin -= 1;
            kvdf[fmin - 1] = -1;
        } else {
            fmin += 1;
        }
        if fmax < dmax {
            fmax += 1;
            kvdf[fmax + 1] = -1;
        } else {
            fmax -= 1;
        }

        let mut d = fmax;
        while d >= fmin {
            let mut i1 = if kvdf[d - 1] >= kvdf[d + 1] {
                kvdf[d - 1] + 1
            } else {
                kvdf[d + 1]
            };
            let prev1 = i1;
            let mut i2 = i1 - d;
            while i1 < lim1 && i2 < lim2 && ha1[i1 as usize] == ha2[i2 as usize] {
                i1 += 1;
                i2 += 1;
            }
            if i1 - prev1 > SNAKE_CNT {
                got_snake = true;
            }
            kvdf[d] = i1;
            if odd && bmin <= d && d <= bmax && kvdb[d] <= i1 {
                spl.i1 = i1;
                spl.i2 = i2;
                spl.min_lo = true;
                spl.min_hi = true;
                return spl;
            }
            d -= 2;
        }

        if bmin > dmin {
            bmin -= 1;
            kvdb[bmin - 1] = isize::MAX;
        } else {
            bmin += 1;
        }
        if bmax < dmax {
            bmax += 1;
            kvdb[bmax + 1] = isize::MAX;
        } else {
            bmax -= 1;
        }

        let mut d = bmax;
        while d >= bmin {
            let mut i1 = if kvdb[d - 1] < kvdb[d + 1] {
                kvdb[d - 1]
            } else {
                kvdb[d + 1] - 1
            };
            let prev1 = i1;
            let mut i2 = i1 - d;
            while i1 > off1 && i2 > off2 && ha1[(i1 - 1) as usize] == ha2[(i2 - 1) as usize] {
                i1 -= 1;
                i2 -= 1;
            }
            if prev1 - i1 > SNAKE_CNT {
                got_snake = true;
            }
            kvdb[d] = i1;
            if !odd && fmin <= d && d <= fmax && i1 <= kvdf[d] {
                spl.i1 = i1;
                spl.i2 = i2;
                spl.min_lo = true;
                spl.min_hi = true;
                return spl;
            }
            d -= 2;
        }

        if need_min {
            ec += 1;
            continue;
        }

        // Past the heuristic trigger, and with at least one good snake seen,
        // sample the diagonals for an interesting enough furthest path and
        // accept a suboptimal split.
        if got_snake && ec > HEUR_MIN_COST {
            let mut best = 0;
            let mut d = fmax;
            while d >= fmin {
                let dd = (d - fmid).abs();
                let i1 = kvdf[d];
                let i2 = i1 - d;
                let v = (i1 - off1) + (i2 - off2) - dd;
                if v > K_HEUR * ec
                    && v > best
                    && off1 + SNAKE_CNT <= i1
                    && i1 < lim1
                    && off2 + SNAKE_CNT <= i2
                    && i2 < lim2
                {
                    let mut k: isize = 1;
                    while ha1[(i1 - k) as usize] == ha2[(i2 - k) as usize] {
                        if k == SNAKE_CNT {
                            best = v;
                            spl.i1 = i1;
                            spl.i2 = i2;
                            break;
                        }
                        k += 1;
                    }
                }
                d -= 2;
            }
            if best > 0 {
                spl.min_lo = true;
                spl.min_hi = false;
                return spl;
            }

            let mut best = 0;
            let mut d = bmax;
            while d >= bmin {
                let dd = (d - bmid).abs();
                let i1 = kvdb[d];
                let i2 = i1 - d;
                let v = (lim1 - i1) + (lim2 - i2) - dd;
                if v > K_HEUR * ec
                    && v > best
                    && off1 < i1
                    && i1 <= lim1 - SNAKE_CNT
                    && off2 < i2
                    && i2 <= lim2 - SNAKE_CNT
                {
                    let mut k: isize = 0;
                    while ha1[(i1 + k) as usize] == ha2[(i2 + k) as usize] {
                        if k == SNAKE_CNT - 1 {
                            best = v;
                            spl.i1 = i1;
                            spl.i2 = i2;
                            break;
                        }
                        k += 1;
                    }
                }
                d -= 2;
            }
            if best > 0 {
                spl.min_lo = false;
                spl.min_hi = true;
                return spl;
            }
        }

        // Cost ceiling reached. Pick the furthest reaching path on either
        // side, measured by i1 + i2.
        if ec >= mxcost {
            let (mut fbest, mut fbest1) = (-1_isize, -1_isize);
            let mut d = fmax;
            while d >= fmin {
                let mut i1 = kvdf[d].min(lim1);
                let mut i2 = i1 - d;
                if lim2 < i2 {
                    i1 = lim2 + d;
                    i2 = lim2;
                }
                if fbest < i1 + i2 {
                    fbest = i1 + i2;
                    fbest1 = i1;
                }
                d -= 2;
            }

            let (mut bbest, mut bbest1) = (isize::MAX, isize::MAX);
            let mut d = bmax;
            while d >= bmin {
                let mut i1 = kvdb[d].max(off1);
                let mut i2 = i1 - d;
                if i2 < off2 {
                    i1 = off2 + d;
                    i2 = off2;
                }
                if i1 + i2 < bbest {
                    bbest = i1 + i2;
                    bbest1 = i1;
                }
                d -= 2;
            }

            if (lim1 + lim2) - bbest < fbest - (off1 + off2) {
                spl.i1 = fbest1;
                spl.i2 = fbest - fbest1;
                spl.min_lo = true;
                spl.min_hi = false;
            } else {
                spl.i1 = bbest1;
                spl.i2 = bbest - bbest1;
                spl.min_lo = false;
                spl.min_hi = true;
            }
            return spl;
        }

        ec += 1;
    }
}

/// Divide et impera over the compacted sequences. The actual marking happens
/// when one side of a box is exhausted.
#[allow(clippy::too_many_arguments)]
fn recs_cmp(
    ha1: &[u64],
    rindex1: &[usize],
    rchg1: &mut [bool],
    mut off1: isize,
    mut lim1: isize,
    ha2: &[u64],
    rindex2: &[usize],
    rchg2: &mut [bool],
    mut off2: isize,
    mut lim2: isize,
    kvdf: &mut KVec,
    kvdb: &mut KVec,
    need_min: bool,
    mxcost: isize,
) {
    while off1 < lim1 && off2 < lim2 && ha1[off1 as usize] == ha2[off2 as usize] {
        off1 += 1;
        off2 += 1;
    }
    while off1 < lim1 && off2 < lim2 && ha1[(lim1 - 1) as usize] == ha2[(lim2 - 1) as usize] {
        lim1 -= 1;
        lim2 -= 1;
    }

    if off1 == lim1 {
        for i in off2..lim2 {
            rchg2[rindex2[i as usize]] = true;
        }
    } else if off2 == lim2 {
        for i in off1..lim1 {
            rchg1[rindex1[i as usize]] = true;
        }
    } else {
        let spl = split(ha1, off1, lim1, ha2, off2, lim2, kvdf, kvdb, need_min, mxcost);
        recs_cmp(
            ha1, rindex1, rchg1, off1, spl.i1, ha2, rindex2, rchg2, off2, spl.i2, kvdf, kvdb,
            spl.min_lo, mxcost,
        );
        recs_cmp(
            ha1, rindex1, rchg1, spl.i1, lim1, ha2, rindex2, rchg2, spl.i2, lim2, kvdf, kvdb,
            spl.min_hi, mxcost,
        );
    }
}

fn trim_ends(classes1: &[u64], classes2: &[u64]) -> (usize, isize, isize) {
    let lim = classes1.len().min(classes2.len());
    let mut i = 0;
    while i < lim && classes1[i] == classes2[i] {
        i += 1;
    }
    let mut j = 0;
    while j < lim - i && classes1[classes1.len() - 1 - j] == classes2[classes2.len() - 1 - j] {
        j += 1;
    }
    (
        i,
        classes1.len() as isize - j as isize - 1,
        classes2.len() as isize - j as isize - 1,
    )
}

/// Decide whether a multi-match record sitting in a run of discardable
/// records should be discarded as well.
fn clean_mmatch(dis: &[u8], i: usize, mut s: usize, mut e: usize) -> bool {
    if i - s > SIMSCAN_WINDOW {
        s = i - SIMSCAN_WINDOW;
    }
    if e - i > SIMSCAN_WINDOW {
        e = i + SIMSCAN_WINDOW;
    }

    let mut rdis0 = 0_usize;
    let mut rpdis0 = 1_usize;
    let mut r = 1;
    while i >= r && i - r >= s {
        match dis[i - r] {
            0 => rdis0 += 1,
            2 => rpdis0 += 1,
            _ => break,
        }
        r += 1;
    }
    // discard multi-match records only when they sit amid no-match runs
    if rdis0 == 0 {
        return false;
    }
    let mut rdis1 = 0_usize;
    let mut rpdis1 = 1_usize;
    let mut r = 1;
    while i + r <= e {
        match dis[i + r] {
            0 => rdis1 += 1,
            2 => rpdis1 += 1,
            _ => break,
        }
        r += 1;
    }
    if rdis1 == 0 {
        return false;
    }
    let rdis = rdis0 + rdis1;
    let rpdis = rpdis0 + rpdis1;
    rpdis * KPDIS_RUN < rpdis + rdis
}

/// Drop records with no match on the other side (marking them changed right
/// away) and compact the rest for the split scan.
fn cleanup_side(
    classes: &[u64],
    other_counts: &[usize],
    dstart: usize,
    dend: isize,
    rchg: &mut [bool],
) -> (Vec<u64>, Vec<usize>) {
    let n = classes.len();
    let mut ha = Vec::new();
    let mut rindex = Vec::new();
    if dend < dstart as isize {
        return (ha, rindex);
    }
    let dend = dend as usize;

    let mlim = bogosqrt(n).min(MAX_EQLIMIT);
    let mut dis = vec![0_u8; n];
    for i in dstart..=dend {
        let nm = other_counts[classes[i] as usize];
        dis[i] = if nm == 0 {
            0
        } else if nm >= mlim {
            2
        } else {
            1
        };
    }

    for i in dstart..=dend {
        if dis[i] == 1 || (dis[i] == 2 && !clean_mmatch(&dis, i, dstart, dend)) {
            rindex.push(i);
            ha.push(classes[i]);
        } else {
            rchg[i] = true;
        }
    }
    (ha, rindex)
}

fn myers_full(cl: &Classified, rchg1: &mut [bool], rchg2: &mut [bool], need_min: bool) {
    let (dstart, dend1, dend2) = trim_ends(&cl.classes1, &cl.classes2);
    let (ha1, rindex1) = cleanup_side(&cl.classes1, &cl.count2, dstart, dend1, rchg1);
    let (ha2, rindex2) = cleanup_side(&cl.classes2, &cl.count1, dstart, dend2, rchg2);

    let ndiags = ha1.len() + ha2.len() + 3;
    let mut kvdf = KVec::new(ndiags, ha2.len() as isize + 1);
    let mut kvdb = KVec::new(ndiags, ha2.len() as isize + 1);
    let mxcost = bogosqrt(ndiags).max(MAX_COST_MIN as usize) as isize;

    recs_cmp(
        &ha1,
        &rindex1,
        rchg1,
        0,
        ha1.len() as isize,
        &ha2,
        &rindex2,
        rchg2,
        0,
        ha2.len() as isize,
        &mut kvdf,
        &mut kvdb,
        need_min,
        mxcost,
    );
}

/// Myers over a sub-range without the preparation heuristics. Used as the
/// fallback of the patience and histogram algorithms.
fn myers_range(
    classes1: &[u64],
    classes2: &[u64],
    rchg1: &mut [bool],
    rchg2: &mut [bool],
    r1: Range<usize>,
    r2: Range<usize>,
) {
    let ha1: Vec<u64> = classes1[r1.clone()].to_vec();
    let rindex1: Vec<usize> = r1.collect();
    let ha2: Vec<u64> = classes2[r2.clone()].to_vec();
    let rindex2: Vec<usize> = r2.collect();

    let ndiags = ha1.len() + ha2.len() + 3;
    let mut kvdf = KVec::new(ndiags, ha2.len() as isize + 1);
    let mut kvdb = KVec::new(ndiags, ha2.len() as isize + 1);
    let mxcost = bogosqrt(ndiags).max(MAX_COST_MIN as usize) as isize;

    recs_cmp(
        &ha1,
        &rindex1,
        rchg1,
        0,
        ha1.len() as isize,
        &ha2,
        &rindex2,
        rchg2,
        0,
        ha2.len() as isize,
        &mut kvdf,
        &mut kvdb,
        false,
        mxcost,
    );
}

// ---------------------------------------------------------------------------
// patience

/// Recursively anchor the diff on records unique in both ranges, falling
/// back to Myers when a gap has no unique matches left.
fn patience(
    classes1: &[u64],
    classes2: &[u64],
    rchg1: &mut [bool],
    rchg2: &mut [bool],
    r1: Range<usize>,
    r2: Range<usize>,
) {
    if r1.is_empty() {
        for j in r2 {
            rchg2[j] = true;
        }
        return;
    }
    if r2.is_empty() {
        for i in r1 {
            rchg1[i] = true;
        }
        return;
    }

    #[derive(Default)]
    struct Entry {
        c1: usize,
        l1: usize,
        c2: usize,
        l2: usize,
    }
    let mut map: HashMap<u64, Entry> = HashMap::new();
    let mut order: Vec<u64> = Vec::new();
    for i in r1.clone() {
        let e = map.entry(classes1[i]).or_insert_with(|| {
            order.push(classes1[i]);
            Entry::default()
        });
        e.c1 += 1;
        if e.c1 == 1 {
            e.l1 = i;
        }
    }
    let mut has_matches = false;
    for j in r2.clone() {
        if let Some(e) = map.get_mut(&classes2[j]) {
            has_matches = true;
            e.c2 += 1;
            if e.c2 == 1 {
                e.l2 = j;
            }
        }
    }

    if !has_matches {
        for i in r1 {
            rchg1[i] = true;
        }
        for j in r2 {
            rchg2[j] = true;
        }
        return;
    }

    let uniques: Vec<(usize, usize)> = order
        .iter()
        .filter_map(|c| {
            let e = &map[c];
            (e.c1 == 1 && e.c2 == 1).then_some((e.l1, e.l2))
        })
        .collect();

    let anchors = longest_increasing(&uniques);
    if anchors.is_empty() {
        myers_range(classes1, classes2, rchg1, rchg2, r1, r2);
        return;
    }
    walk_common(classes1, classes2, rchg1, rchg2, &anchors, r1, r2);
}

/// Longest sequence of unique pairs increasing in both coordinates. The
/// input is ordered by the first coordinate already.
fn longest_increasing(entries: &[(usize, usize)]) -> Vec<(usize, usize)> {
    let mut seq: Vec<usize> = Vec::new();
    let mut prev: Vec<Option<usize>> = vec![None; entries.len()];
    for (idx, e) in entries.iter().enumerate() {
        let pos = seq.partition_point(|&s| entries[s].1 < e.1);
        prev[idx] = if pos > 0 { Some(seq[pos - 1]) } else { None };
        if pos == seq.len() {
            seq.push(idx);
        } else {
            seq[pos] = idx;
        }
    }
    let mut chain = Vec::new();
    let mut cur = seq.last().copied();
    while let Some(i) = cur {
        chain.push(entries[i]);
        cur = prev[i];
    }
    chain.reverse();
    chain
}

fn walk_common(
    classes1: &[u64],
    classes2: &[u64],
    rchg1: &mut [bool],
    rchg2: &mut [bool],
    anchors: &[(usize, usize)],
    r1: Range<usize>,
    r2: Range<usize>,
) {
    let (mut line1, mut line2) = (r1.start, r2.start);
    let (end1, end2) = (r1.end, r2.end);
    let mut ai = 0;
    loop {
        let (mut next1, mut next2) = if ai < anchors.len() {
            anchors[ai]
        } else {
            (end1, end2)
        };
        if ai < anchors.len() {
            // grow the anchored run backwards
            while next1 > line1 && next2 > line2 && classes1[next1 - 1] == classes2[next2 - 1] {
                next1 -= 1;
                next2 -= 1;
            }
        }
        while line1 < next1 && line2 < next2 && classes1[line1] == classes2[line2] {
            line1 += 1;
            line2 += 1;
        }
        if next1 > line1 || next2 > line2 {
            patience(classes1, classes2, rchg1, rchg2, line1..next1, line2..next2);
        }
        if ai >= anchors.len() {
            return;
        }
        let (mut a1, mut a2) = anchors[ai];
        while ai + 1 < anchors.len() && anchors[ai + 1] == (a1 + 1, a2 + 1) {
            ai += 1;
            a1 += 1;
            a2 += 1;
        }
        line1 = a1 + 1;
        line2 = a2 + 1;
        ai += 1;
    }
}

// ---------------------------------------------------------------------------
// histogram

struct Chain {
    positions: Vec<usize>,
    cnt: usize,
}

struct Region {
    begin1: usize,
    begin2: usize,
    end1: usize,
    end2: usize,
}

enum Lcs {
    NoCommon,
    Fallback,
    Region(Region),
}

fn histogram(
    classes1: &[u64],
    classes2: &[u64],
    rchg1: &mut [bool],
    rchg2: &mut [bool],
    mut r1: Range<usize>,
    mut r2: Range<usize>,
) {
    loop {
        if r1.is_empty() && r2.is_empty() {
            return;
        }
        if r1.is_empty() {
            for j in r2 {
                rchg2[j] = true;
            }
            return;
        }
        if r2.is_empty() {
            for i in r1 {
                rchg1[i] = true;
            }
            return;
        }
        match find_lcs(classes1, classes2, r1.clone(), r2.clone()) {
            Lcs::Fallback => {
                myers_range(classes1, classes2, rchg1, rchg2, r1, r2);
                return;
            }
            Lcs::NoCommon => {
                for i in r1 {
                    rchg1[i] = true;
                }
                for j in r2 {
                    rchg2[j] = true;
                }
                return;
            }
            Lcs::Region(lcs) => {
                histogram(
                    classes1,
                    classes2,
                    rchg1,
                    rchg2,
                    r1.start..lcs.begin1,
                    r2.start..lcs.begin2,
                );
                r1 = lcs.end1 + 1..r1.end;
                r2 = lcs.end2 + 1..r2.end;
            }
        }
    }
}

/// Pick the maximal common region anchored on the record with the fewest
/// occurrences in the first range.
fn find_lcs(classes1: &[u64], classes2: &[u64], r1: Range<usize>, r2: Range<usize>) -> Lcs {
    let mut chains: HashMap<u64, Chain> = HashMap::new();
    for i in r1.clone() {
        let c = chains.entry(classes1[i]).or_insert_with(|| Chain {
            positions: Vec::new(),
            cnt: 0,
        });
        c.positions.push(i);
        c.cnt += 1;
    }

    let mut lcs: Option<Region> = None;
    let mut cnt_limit = MAX_CHAIN_LEN + 1;
    let mut has_common = false;
    let cnt_of = |pos: usize| chains[&classes1[pos]].cnt;

    let mut b = r2.start;
    while b < r2.end {
        let mut b_next = b + 1;
        if let Some(chain) = chains.get(&classes2[b]) {
            has_common = true;
            if chain.cnt <= cnt_limit {
                let mut k = 0;
                while k < chain.positions.len() {
                    let mut as_ = chain.positions[k];
                    let mut bs = b;
                    let mut ae = as_;
                    let mut be = bs;
                    let mut rc = chain.cnt;
                    while as_ > r1.start && bs > r2.start && classes1[as_ - 1] == classes2[bs - 1] {
                        as_ -= 1;
                        bs -= 1;
                        if rc > 1 {
                            rc = rc.min(cnt_of(as_));
                        }
                    }
                    while ae + 1 < r1.end && be + 1 < r2.end && classes1[ae + 1] == classes2[be + 1]
                    {
                        ae += 1;
                        be += 1;
                        if rc > 1 {
                            rc = rc.min(cnt_of(ae));
                        }
                    }
                    if b_next <= be {
                        b_next = be + 1;
                    }
                    let update = match &lcs {
                        None => true,
                        Some(r) => r.end1 - r.begin1 < ae - as_ || rc < cnt_limit,
                    };
                    if update {
                        lcs = Some(Region {
                            begin1: as_,
                            begin2: bs,
                            end1: ae,
                            end2: be,
                        });
                        cnt_limit = rc;
                    }
                    while k < chain.positions.len() && chain.positions[k] <= ae {
                        k += 1;
                    }
                }
            }
        }
        b = b_next;
    }

    if has_common && cnt_limit > MAX_CHAIN_LEN {
        Lcs::Fallback
    } else {
        match lcs {
            None => Lcs::NoCommon,
            Some(r) => Lcs::Region(r),
        }
    }
}

// ---------------------------------------------------------------------------
// trivial pairing

fn none_diff(classes1: &[u64], classes2: &[u64], rchg1: &mut [bool], rchg2: &mut [bool]) {
    let n = classes1.len().min(classes2.len());
    for i in 0..n {
        let matched = classes1[i] == classes2[i];
        rchg1[i] = !matched;
        rchg2[i] = !matched;
    }
    for flag in rchg1.iter_mut().skip(n) {
        *flag = true;
    }
    for flag in rchg2.iter_mut().skip(n) {
        *flag = true;
    }
}

// ---------------------------------------------------------------------------
// script assembly

fn build_script(rchg1: &[bool], rchg2: &[bool]) -> Vec<EditOp> {
    let n1 = rchg1.len();
    let n2 = rchg2.len();
    let mut script = Vec::with_capacity(n1.max(n2));
    let (mut i1, mut i2) = (0, 0);
    while i1 < n1 || i2 < n2 {
        if i1 < n1 && rchg1[i1] && i2 < n2 && rchg2[i2] {
            script.push(EditOp::Replace);
            i1 += 1;
            i2 += 1;
        } else if i2 < n2 && rchg2[i2] && (i1 >= n1 || !rchg1[i1]) {
            script.push(EditOp::Insert);
            i2 += 1;
        } else if i1 < n1 && rchg1[i1] {
            script.push(EditOp::Delete);
            i1 += 1;
        } else {
            script.push(EditOp::Equal);
            i1 += 1;
            i2 += 1;
        }
    }
    script
}

// ---------------------------------------------------------------------------
// scanline records

/// One record per scanline of an image, with threshold-aware equality.
pub struct RowsData<'a> {
    img: &'a Image,
    threshold: f64,
}

impl<'a> RowsData<'a> {
    pub fn new(img: &'a Image, threshold: f64) -> Self {
        Self { img, threshold }
    }
}

impl DiffData for RowsData<'_> {
    fn len(&self) -> usize {
        self.img.height() as usize
    }

    fn hash_at(&self, index: usize) -> u64 {
        hash_scanline(self.img.row(index as u32), self.threshold)
    }

    fn records_match(&self, index: usize, other: &Self, other_index: usize) -> bool {
        rows_equal(
            self.img.row(index as u32),
            other.img.row(other_index as u32),
            self.threshold,
        )
    }
}

/// Scanline equality under the color distance threshold. Rows of unequal
/// width never match.
pub fn rows_equal(row1: &[u8], row2: &[u8], threshold: f64) -> bool {
    if row1.len() != row2.len() {
        return false;
    }
    if threshold > 0.0 {
        let t2 = threshold * threshold;
        row1.chunks_exact(4)
            .zip(row2.chunks_exact(4))
            .all(|(p1, p2)| pixel_distance2(p1, p2) as f64 <= t2)
    } else {
        row1 == row2
    }
}

/// djb2 over the row bytes. With a positive threshold every byte is first
/// quantized into buckets sized to the per-channel tolerance, keeping the
/// hash consistent with the threshold equality.
fn hash_scanline(row: &[u8], threshold: f64) -> u64 {
    let mut ha: u64 = 5381;
    if threshold > 0.0 {
        let mut w = ((threshold * threshold / 3.0).sqrt() as u64) * 2;
        if w == 0 {
            w = 1;
        }
        for &b in row {
            ha = ha.wrapping_add(ha << 5);
            ha ^= (b as u64 / w) * w;
        }
    } else {
        for &b in row {
            ha = ha.wrapping_add(ha << 5);
            ha ^= b as u64;
        }
    }
    ha
}

#[cfg(test)]
mod tests {
    use super::*;
    use EditOp::*;

    struct Seq(Vec<u64>);

    impl DiffData for Seq {
        fn len(&self) -> usize {
            self.0.len()
        }

        fn hash_at(&self, index: usize) -> u64 {
            self.0[index]
        }

        fn records_match(&self, index: usize, other: &Self, other_index: usize) -> bool {
            self.0[index] == other.0[other_index]
        }
    }

    const ALL: [Algorithm; 5] = [
        Algorithm::Myers,
        Algorithm::Minimal,
        Algorithm::Patience,
        Algorithm::Histogram,
        Algorithm::None,
    ];

    fn check_laws(a: &[u64], b: &[u64], script: &[EditOp]) {
        // length bounds
        assert!(script.len() >= a.len().max(b.len()));
        assert!(script.len() <= a.len() + b.len());
        // record counts
        let count = |ops: &[EditOp]| script.iter().filter(|op| ops.contains(*op)).count();
        assert_eq!(count(&[Equal, Replace, Delete]), a.len());
        assert_eq!(count(&[Equal, Replace, Insert]), b.len());
        // round-trip: applying the script to `a` yields `b`
        let mut out = Vec::new();
        let (mut i, mut j) = (0, 0);
        for op in script {
            match op {
                Equal => {
                    assert_eq!(a[i], b[j]);
                    out.push(a[i]);
                    i += 1;
                    j += 1;
                }
                Replace => {
                    out.push(b[j]);
                    i += 1;
                    j += 1;
                }
                Insert => {
                    out.push(b[j]);
                    j += 1;
                }
                Delete => {
                    i += 1;
                }
            }
        }
        assert_eq!(out, b);
    }

    #[test]
    fn self_diff_is_all_equal() {
        let a = Seq(vec![1, 2, 3, 2, 1]);
        for algo in ALL {
            let script = diff_records(&a, &a, algo);
            assert_eq!(script, vec![Equal; 5], "{algo:?}");
        }
    }

    #[test]
    fn pure_insertion_is_located() {
        let a = Seq(vec![1, 1, 2, 2, 3, 3]);
        let b = Seq(vec![1, 1, 9, 9, 2, 2, 3, 3]);
        for algo in [
            Algorithm::Myers,
            Algorithm::Minimal,
            Algorithm::Patience,
            Algorithm::Histogram,
        ] {
            let script = diff_records(&a, &b, algo);
            assert_eq!(
                script,
                vec![Equal, Equal, Insert, Insert, Equal, Equal, Equal, Equal],
                "{algo:?}"
            );
            check_laws(&a.0, &b.0, &script);
        }
    }

    #[test]
    fn replacement_pairs_up() {
        let a = Seq(vec![1, 2, 3]);
        let b = Seq(vec![1, 5, 3]);
        for algo in ALL {
            let script = diff_records(&a, &b, algo);
            assert_eq!(script, vec![Equal, Replace, Equal], "{algo:?}");
        }
    }

    #[test]
    fn one_side_empty() {
        let a = Seq(vec![]);
        let b = Seq(vec![7, 8]);
        for algo in ALL {
            assert_eq!(diff_records(&a, &b, algo), vec![Insert, Insert], "{algo:?}");
            assert_eq!(diff_records(&b, &a, algo), vec![Delete, Delete], "{algo:?}");
        }
    }

    #[test]
    fn none_pairs_index_for_index() {
        let a = Seq(vec![1, 2]);
        let b = Seq(vec![2, 2, 2]);
        let script = diff_records(&a, &b, Algorithm::None);
        assert_eq!(script, vec![Replace, Equal, Insert]);
    }

    #[test]
    fn laws_hold_on_mixed_edits() {
        let a: Vec<u64> = vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10];
        let b: Vec<u64> = vec![1, 2, 99, 4, 5, 8, 9, 100, 101, 10, 11];
        for algo in ALL {
            let script = diff_records(&Seq(a.clone()), &Seq(b.clone()), algo);
            check_laws(&a, &b, &script);
        }
    }

    #[test]
    fn repeated_records_stay_lawful() {
        // many duplicates push the patience uniqueness and histogram
        // occurrence machinery through their fallback paths
        let a: Vec<u64> = (0..200).map(|i| i % 3).collect();
        let b: Vec<u64> = (0..180).map(|i| (i + 1) % 3).collect();
        for algo in ALL {
            let script = diff_records(&Seq(a.clone()), &Seq(b.clone()), algo);
            check_laws(&a, &b, &script);
        }
    }

    #[test]
    fn row_hash_quantizes_under_threshold() {
        let mut img1 = Image::new(4, 1);
        let mut img2 = Image::new(4, 1);
        img1.fill(crate::image::rgb(0x80, 0x80, 0x80));
        img2.fill(crate::image::rgb(0x81, 0x81, 0x81));

        let d1 = RowsData::new(&img1, 2.0);
        let d2 = RowsData::new(&img2, 2.0);
        assert_eq!(d1.hash_at(0), d2.hash_at(0));
        assert!(d1.records_match(0, &d2, 0));

        let d1 = RowsData::new(&img1, 0.0);
        let d2 = RowsData::new(&img2, 0.0);
        assert_ne!(d1.hash_at(0), d2.hash_at(0));
        assert!(!d1.records_match(0, &d2, 0));
    }

    #[test]
    fn threshold_widens_the_equal_set() {
        // row 0 differs slightly, row 1 differs strongly
        let mut img1 = Image::new(2, 2);
        let mut img2 = Image::new(2, 2);
        for x in 0..2 {
            img1.set_pixel(x, 0, crate::image::rgb(0x80, 0x80, 0x80)).unwrap();
            img2.set_pixel(x, 0, crate::image::rgb(0x81, 0x81, 0x81)).unwrap();
            img1.set_pixel(x, 1, crate::image::rgb(0xff, 0x00, 0x00)).unwrap();
            img2.set_pixel(x, 1, crate::image::rgb(0x00, 0x00, 0xff)).unwrap();
        }
        let strict = diff_records(
            &RowsData::new(&img1, 0.0),
            &RowsData::new(&img2, 0.0),
            Algorithm::Myers,
        );
        let lenient = diff_records(
            &RowsData::new(&img1, 2.0),
            &RowsData::new(&img2, 2.0),
            Algorithm::Myers,
        );
        assert_eq!(strict, vec![Replace, Replace]);
        assert_eq!(lenient, vec![Equal, Replace]);
        // every position equal under the strict threshold stays equal
        for (s, l) in strict.iter().zip(&lenient) {
            if *s == Equal {
                assert_eq!(*l, Equal);
            }
        }
    }

    #[test]
    fn rows_of_unequal_width_never_match() {
        let img1 = Image::new(4, 1);
        let img2 = Image::new(5, 1);
        assert!(!rows_equal(img1.row(0), img2.row(0), 0.0));
        assert!(!rows_equal(img1.row(0), img2.row(0), 100.0));
    }
}
