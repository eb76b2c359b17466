//! Scanline-level mismatch runs and the three-way merge over them.
//!
//! A line diff describes, per pane, the runs of scanlines that do not match
//! the opposite pane. After priming, each run also knows where it lives in
//! the aligned display space: `dbegin..=dend[pane]` holds the pane's own
//! rows, `dend[pane]+1..=dendmax` is padded with ghost rows so that all
//! panes stay the same height.

use crate::OpType;
use crate::image::Image;
use crate::scanline::{Algorithm, EditOp, RowsData, diff_records};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LineDiffInfo {
    /// First mismatched row per pane, in real image coordinates.
    pub begin: [i32; 3],
    /// Last mismatched row per pane; `begin - 1` for an empty side.
    pub end: [i32; 3],
    /// First row of the run in aligned display space.
    pub dbegin: i32,
    /// Last own row per pane in aligned display space.
    pub dend: [i32; 3],
    /// `max(dend)`, the last aligned row of the run.
    pub dendmax: i32,
    pub op: OpType,
}

impl LineDiffInfo {
    pub fn new(s1: i32, e1: i32, s2: i32, e2: i32) -> Self {
        Self {
            begin: [s1, s2, 0],
            end: [e1, e2, 0],
            dbegin: 0,
            dend: [-1; 3],
            dendmax: -1,
            op: OpType::Diff,
        }
    }
}

impl Default for LineDiffInfo {
    fn default() -> Self {
        Self::new(0, 0, 0, 0)
    }
}

/// Diff two images scanline-wise and collapse the edit script into
/// mismatch runs.
pub fn make_line_diff(
    img1: &Image,
    img2: &Image,
    threshold: f64,
    algorithm: Algorithm,
) -> Vec<LineDiffInfo> {
    let data1 = RowsData::new(img1, threshold);
    let data2 = RowsData::new(img2, threshold);
    let edscript = diff_records(&data1, &data2, algorithm);
    runs_from_edscript(&edscript)
}

/// Convert an edit script into runs, combining touching runs into one.
pub fn runs_from_edscript(edscript: &[EditOp]) -> Vec<LineDiffInfo> {
    let mut tmp: Vec<LineDiffInfo> = Vec::new();
    let (mut i, mut j) = (0_i32, 0_i32);
    for op in edscript {
        match op {
            EditOp::Delete => {
                tmp.push(LineDiffInfo::new(i, i, j, j - 1));
                i += 1;
            }
            EditOp::Insert => {
                tmp.push(LineDiffInfo::new(i, i - 1, j, j));
                j += 1;
            }
            EditOp::Replace => {
                tmp.push(LineDiffInfo::new(i, i, j, j));
                i += 1;
                j += 1;
            }
            EditOp::Equal => {
                i += 1;
                j += 1;
            }
        }
    }

    let mut runs: Vec<LineDiffInfo> = Vec::new();
    for k in 0..tmp.len() {
        if k + 1 < tmp.len()
            && tmp[k].end[0] + 1 == tmp[k + 1].begin[0]
            && tmp[k].end[1] + 1 == tmp[k + 1].begin[1]
        {
            // contiguous with the next run, fold into it
            let (b0, b1) = (tmp[k].begin[0], tmp[k].begin[1]);
            tmp[k + 1].begin[0] = b0;
            tmp[k + 1].begin[1] = b1;
            continue;
        }
        debug_assert!(tmp[k].begin[0] >= 0 || tmp[k].begin[1] >= 0);
        runs.push(tmp[k].clone());
    }
    runs
}

/// Merge two pairwise line diffs, both taken against the center pane, into
/// one three-way diff. Index 0 of each input is the center side.
///
/// This parallels the classic diff3 algorithm: overlapping blocks are
/// gathered into a group, the group's bounds are translated onto all three
/// panes, and the group is classified by which input contributed to it.
/// `cmpfunc` decides whether the outer panes agree over a candidate region.
pub fn make_3way_line_diff<F>(
    diff10: &[LineDiffInfo],
    diff12: &[LineDiffInfo],
    cmpfunc: F,
) -> Vec<LineDiffInfo>
where
    F: Fn(&LineDiffInfo) -> bool,
{
    let mut diff3: Vec<LineDiffInfo> = Vec::new();

    let diff10count = diff10.len();
    let diff12count = diff12.len();
    let mut diff10i = 0_usize;
    let mut diff12i = 0_usize;

    let mut dr10first = LineDiffInfo::default();
    let mut dr10last = LineDiffInfo::default();
    let mut dr12first = LineDiffInfo::default();
    let mut dr12last = LineDiffInfo::default();

    let mut linelast0 = 0_i32;
    let mut linelast1 = 0_i32;
    let mut linelast2 = 0_i32;

    while diff10i < diff10count || diff12i < diff12count {
        let first_is_diff12;
        if diff10i >= diff10count {
            dr12first = diff12[diff12i].clone();
            dr12last = dr12first.clone();
            first_is_diff12 = true;
        } else if diff12i >= diff12count {
            dr10first = diff10[diff10i].clone();
            dr10last = dr10first.clone();
            first_is_diff12 = false;
        } else {
            dr10first = diff10[diff10i].clone();
            dr12first = diff12[diff12i].clone();
            dr10last = dr10first.clone();
            dr12last = dr12first.clone();
            first_is_diff12 = dr12first.begin[0] <= dr10first.begin[0];
        }
        let mut last_is_diff12 = first_is_diff12;

        // grow the group while the next block on either side still overlaps
        // the group's center-side span
        let mut diff10itmp = diff10i;
        let mut diff12itmp = diff12i;
        loop {
            if diff10itmp >= diff10count || diff12itmp >= diff12count {
                break;
            }
            let dr10 = diff10[diff10itmp].clone();
            let dr12 = diff12[diff12itmp].clone();

            if dr10.end[0] == dr12.end[0] {
                diff10itmp += 1;
                last_is_diff12 = true;
                dr10last = dr10;
                dr12last = dr12;
                break;
            }

            if last_is_diff12 {
                if dr12.begin[0].max(dr12.end[0]) < dr10.begin[0] {
                    break;
                }
            } else if dr10.begin[0].max(dr10.end[0]) < dr12.begin[0] {
                break;
            }

            if dr12.end[0] > dr10.end[0] {
                diff10itmp += 1;
                last_is_diff12 = true;
            } else {
                diff12itmp += 1;
                last_is_diff12 = false;
            }

            dr10last = dr10;
            dr12last = dr12;
        }

        if last_is_diff12 {
            diff12itmp += 1;
        } else {
            diff10itmp += 1;
        }

        let mut dr3 = LineDiffInfo::default();
        if first_is_diff12 {
            dr3.begin[1] = dr12first.begin[0];
            dr3.begin[2] = dr12first.begin[1];
            dr3.begin[0] = if diff10itmp == diff10i {
                // left side untouched in this group, extrapolate from the
                // last emitted region
                dr3.begin[1] - linelast1 + linelast0
            } else {
                dr3.begin[1] - dr10first.begin[0] + dr10first.begin[1]
            };
        } else {
            dr3.begin[0] = dr10first.begin[1];
            dr3.begin[1] = dr10first.begin[0];
            dr3.begin[2] = if diff12itmp == diff12i {
                dr3.begin[1] - linelast1 + linelast2
            } else {
                dr3.begin[1] - dr12first.begin[0] + dr12first.begin[1]
            };
        }

        if last_is_diff12 {
            dr3.end[1] = dr12last.end[0];
            dr3.end[2] = dr12last.end[1];
            dr3.end[0] = if diff10itmp == diff10i {
                dr3.end[1] - linelast1 + linelast0
            } else {
                dr3.end[1] - dr10last.end[0] + dr10last.end[1]
            };
        } else {
            dr3.end[0] = dr10last.end[1];
            dr3.end[1] = dr10last.end[0];
            dr3.end[2] = if diff12itmp == diff12i {
                dr3.end[1] - linelast1 + linelast2
            } else {
                dr3.end[1] - dr12last.end[0] + dr12last.end[1]
            };
        }

        linelast0 = dr3.end[0] + 1;
        linelast1 = dr3.end[1] + 1;
        linelast2 = dr3.end[2] + 1;

        dr3.op = if diff10i == diff10itmp {
            OpType::ThirdOnly
        } else if diff12i == diff12itmp {
            OpType::FirstOnly
        } else if cmpfunc(&dr3) {
            OpType::SecondOnly
        } else {
            OpType::Diff
        };

        diff3.push(dr3);
        diff10i = diff10itmp;
        diff12i = diff12itmp;
    }

    // clip every region so it never overlaps its successor on any pane
    for i in 0..diff3.len() {
        if i + 1 < diff3.len() {
            for j in 0..3 {
                let next_begin = diff3[i + 1].begin[j];
                if diff3[i].end[j] >= next_begin {
                    diff3[i].end[j] = next_begin - 1;
                }
            }
        }
    }

    diff3
}

/// Fill in the aligned display-space fields. `height0` is the height of the
/// first pane; the return value is the common aligned height of all panes.
pub fn prime_line_diffs(infos: &mut [LineDiffInfo], npanes: usize, height0: i32) -> i32 {
    let mut dlines = 0_i32;
    for i in 0..infos.len() {
        let prev_end = if i > 0 { infos[i - 1].end[0] + 1 } else { 0 };
        dlines += infos[i].begin[0] - prev_end;

        let info = &mut infos[i];
        info.dbegin = dlines;
        info.dendmax = 0;
        for pane in 0..npanes {
            info.dend[pane] = info.dbegin + info.end[pane] - info.begin[pane];
            info.dendmax = info.dendmax.max(info.dend[pane]);
        }
        dlines = info.dendmax + 1;
    }
    dlines += height0 - infos.last().map_or(0, |l| l.end[0] + 1);
    dlines
}

#[cfg(test)]
mod tests {
    use super::*;
    use EditOp::*;

    #[test]
    fn insertion_run_is_collapsed() {
        // two rows inserted on the right side at position 2
        let script = [Equal, Equal, Insert, Insert, Equal, Equal, Equal, Equal];
        let runs = runs_from_edscript(&script);
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].begin[0], 2);
        assert_eq!(runs[0].end[0], 1);
        assert_eq!(runs[0].begin[1], 2);
        assert_eq!(runs[0].end[1], 3);
    }

    #[test]
    fn touching_delete_insert_becomes_one_run() {
        let script = [Equal, Delete, Insert, Equal];
        let runs = runs_from_edscript(&script);
        assert_eq!(runs.len(), 1);
        assert_eq!((runs[0].begin[0], runs[0].end[0]), (1, 1));
        assert_eq!((runs[0].begin[1], runs[0].end[1]), (1, 1));
    }

    #[test]
    fn separate_runs_stay_separate() {
        let script = [Replace, Equal, Replace];
        let runs = runs_from_edscript(&script);
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].begin[0], 0);
        assert_eq!(runs[1].begin[0], 2);
    }

    #[test]
    fn priming_accounts_for_ghost_rows() {
        // two rows inserted on pane 1 at row 2, pane 0 six rows tall
        let mut infos = vec![LineDiffInfo::new(2, 1, 2, 3)];
        let total = prime_line_diffs(&mut infos, 2, 6);
        assert_eq!(infos[0].dbegin, 2);
        assert_eq!(infos[0].dend[0], 1);
        assert_eq!(infos[0].dend[1], 3);
        assert_eq!(infos[0].dendmax, 3);
        assert_eq!(total, 8);
    }

    #[test]
    fn three_way_classification() {
        // left-side edit only
        let d10 = vec![LineDiffInfo::new(0, 0, 0, 0)];
        let merged = make_3way_line_diff(&d10, &[], |_| false);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].op, OpType::FirstOnly);
        assert_eq!(merged[0].begin, [0, 0, 0]);

        // right-side edit only
        let d12 = vec![LineDiffInfo::new(3, 4, 3, 4)];
        let merged = make_3way_line_diff(&[], &d12, |_| false);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].op, OpType::ThirdOnly);
        assert_eq!(merged[0].begin, [3, 3, 3]);
        assert_eq!(merged[0].end, [4, 4, 4]);

        // both sides changed over the same center span
        let d10 = vec![LineDiffInfo::new(1, 2, 1, 2)];
        let d12 = vec![LineDiffInfo::new(1, 2, 1, 2)];
        let merged = make_3way_line_diff(&d10, &d12, |_| true);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].op, OpType::SecondOnly);

        let merged = make_3way_line_diff(&d10, &d12, |_| false);
        assert_eq!(merged[0].op, OpType::Diff);
    }

    #[test]
    fn three_way_disjoint_groups() {
        let d10 = vec![LineDiffInfo::new(0, 0, 0, 0)];
        let d12 = vec![LineDiffInfo::new(5, 6, 5, 6)];
        let merged = make_3way_line_diff(&d10, &d12, |_| false);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].op, OpType::FirstOnly);
        assert_eq!(merged[1].op, OpType::ThirdOnly);
        // regions must not overlap and must increase
        for pane in 0..3 {
            assert!(merged[0].end[pane] < merged[1].begin[pane]);
        }
    }
}
