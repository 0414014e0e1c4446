// The polishing orchestrator: ingestion with target/query reconciliation,
// chunked overlap streaming and filtering, window construction, parallel
// consensus, and sequential stitching of the per-window results.

use std::collections::HashMap;
use std::io;
use std::time::Instant;

use crate::io::{create_overlap_source, create_sequence_source, OverlapSource, SequenceSource};
use crate::overlap::Overlap;
use crate::poa::{Alignment, AlignmentEngine, AlignmentType, Graph};
use crate::polish_opt::{PolishOpt, PolisherKind};
use crate::sequence::Sequence;
use crate::window::{Window, WindowType};
use crate::work_pool::WorkPool;

// Streaming granularity for query and overlap ingestion.
const CHUNK_SIZE: u64 = 1024 * 1024 * 1024; // ~1 GiB

// Layers spanning less than this fraction of a window are noise.
const MIN_LAYER_FRACTION: f64 = 0.02;

pub struct Polisher {
    sparser: Box<dyn SequenceSource>,
    oparser: Box<dyn OverlapSource>,
    tparser: Box<dyn SequenceSource>,
    opt: PolishOpt,
    pool: WorkPool,
    sequences: Vec<Sequence>,
    num_targets: usize,
    window_type: WindowType,
    windows: Vec<Window>,
    targets_coverage: Vec<u32>,
}

impl Polisher {
    pub fn new(
        sequences_path: &str,
        overlaps_path: &str,
        target_path: &str,
        opt: PolishOpt,
    ) -> io::Result<Self> {
        opt.validate()?;
        let sparser = create_sequence_source(sequences_path)?;
        let oparser = create_overlap_source(overlaps_path)?;
        let tparser = create_sequence_source(target_path)?;
        let pool = WorkPool::new(opt.num_threads)?;
        Ok(Polisher {
            sparser,
            oparser,
            tparser,
            opt,
            pool,
            sequences: Vec::new(),
            num_targets: 0,
            window_type: WindowType::Tgs,
            windows: Vec::new(),
            targets_coverage: Vec::new(),
        })
    }

    /// Loads targets, queries and overlaps, and distributes the overlap
    /// alignments into per-target windows.
    pub fn initialize(&mut self) -> io::Result<()> {
        if !self.windows.is_empty() {
            log::warn!("polisher is already initialized");
            return Ok(());
        }

        let total_start = Instant::now();
        let mut phase = Instant::now();

        self.tparser.reset()?;
        loop {
            if !self.tparser.parse(&mut self.sequences, u64::MAX)? {
                break;
            }
        }
        self.num_targets = self.sequences.len();
        if self.num_targets == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "empty target sequences set",
            ));
        }

        let mut name_to_id: HashMap<String, u64> = HashMap::new();
        let mut id_to_id: HashMap<u64, u64> = HashMap::new();
        for i in 0..self.num_targets {
            name_to_id.insert(format!("{}t", self.sequences[i].name()), i as u64);
            id_to_id.insert((i as u64) << 1 | 1, i as u64);
        }

        // Per-sequence strand/name need flags; targets keep their names and
        // forward data for the output and the window backbones.
        let mut keep_name = vec![true; self.num_targets];
        let mut keep_data = vec![true; self.num_targets];
        let mut keep_reverse = vec![false; self.num_targets];

        log::info!(
            "loaded {} target sequences in {:.2} sec",
            self.num_targets,
            phase.elapsed().as_secs_f64()
        );
        phase = Instant::now();

        let (num_queries, total_query_length) = self.load_queries(
            &mut name_to_id,
            &mut id_to_id,
            &mut keep_name,
            &mut keep_data,
            &mut keep_reverse,
        )?;
        if num_queries == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "empty sequences set",
            ));
        }
        self.window_type = if total_query_length / num_queries <= 1000 {
            WindowType::Ngs
        } else {
            WindowType::Tgs
        };

        log::info!(
            "loaded {} sequences ({} bp) in {:.2} sec",
            num_queries,
            total_query_length,
            phase.elapsed().as_secs_f64()
        );
        phase = Instant::now();

        let mut overlaps =
            self.load_overlaps(&name_to_id, &id_to_id, &mut keep_data, &mut keep_reverse)?;
        drop(name_to_id);
        drop(id_to_id);
        if overlaps.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "empty overlap set",
            ));
        }

        log::info!(
            "loaded {} overlaps in {:.2} sec",
            overlaps.len(),
            phase.elapsed().as_secs_f64()
        );
        phase = Instant::now();

        self.pool.for_each_indexed(&mut self.sequences, |i, seq| {
            seq.release_unused(keep_name[i], keep_data[i], keep_reverse[i]);
        });

        let window_length = self.opt.window_length;
        let overlap_fraction = self.opt.overlap_percentage;
        let sequences = &self.sequences;
        self.pool.for_each(&mut overlaps, |overlap| {
            overlap.find_breaking_points(sequences, window_length, overlap_fraction);
        });

        log::info!(
            "aligned overlaps in {:.2} sec",
            phase.elapsed().as_secs_f64()
        );
        phase = Instant::now();

        self.allocate_windows();
        self.distribute_layers(overlaps);

        log::info!(
            "transformed data into {} windows in {:.2} sec",
            self.windows.len(),
            phase.elapsed().as_secs_f64()
        );
        log::info!(
            "initialized in {:.2} sec",
            total_start.elapsed().as_secs_f64()
        );
        Ok(())
    }

    fn load_queries(
        &mut self,
        name_to_id: &mut HashMap<String, u64>,
        id_to_id: &mut HashMap<u64, u64>,
        keep_name: &mut Vec<bool>,
        keep_data: &mut Vec<bool>,
        keep_reverse: &mut Vec<bool>,
    ) -> io::Result<(u64, u64)> {
        self.sparser.reset()?;
        let mut ordinal = 0u64;
        let mut total_length = 0u64;
        let mut chunk: Vec<Sequence> = Vec::new();
        loop {
            let more = self.sparser.parse(&mut chunk, CHUNK_SIZE)?;
            for record in chunk.drain(..) {
                total_length += record.len() as u64;
                if let Some(&t_id) = name_to_id.get(&format!("{}t", record.name())) {
                    // The query is one of the targets; keep a single copy
                    // and alias both roles onto it.
                    let target = &self.sequences[t_id as usize];
                    if record.len() != target.len()
                        || record.quality().len() != target.quality().len()
                    {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!("duplicate sequence {} with unequal data", record.name()),
                        ));
                    }
                    name_to_id.insert(format!("{}q", record.name()), t_id);
                    id_to_id.insert(ordinal << 1, t_id);
                } else {
                    let id = self.sequences.len() as u64;
                    name_to_id.insert(format!("{}q", record.name()), id);
                    id_to_id.insert(ordinal << 1, id);
                    self.sequences.push(record);
                    keep_name.push(false);
                    keep_data.push(false);
                    keep_reverse.push(false);
                }
                ordinal += 1;
            }
            if !more {
                break;
            }
        }
        Ok((ordinal, total_length))
    }

    fn load_overlaps(
        &mut self,
        name_to_id: &HashMap<String, u64>,
        id_to_id: &HashMap<u64, u64>,
        keep_data: &mut [bool],
        keep_reverse: &mut [bool],
    ) -> io::Result<Vec<Overlap>> {
        self.oparser.reset()?;
        let mut retained: Vec<Overlap> = Vec::new();
        let mut group: Vec<Overlap> = Vec::new();
        let mut chunk: Vec<Overlap> = Vec::new();
        loop {
            let more = self.oparser.parse(&mut chunk, CHUNK_SIZE)?;
            for mut overlap in chunk.drain(..) {
                overlap.transmute(name_to_id, id_to_id)?;
                if !overlap.is_valid(&self.sequences) {
                    continue;
                }
                if let Some(last) = group.last() {
                    if last.q_id() != overlap.q_id() {
                        filter_overlap_group(
                            self.opt.kind,
                            self.opt.error_threshold,
                            &mut group,
                            &mut retained,
                            keep_data,
                            keep_reverse,
                        );
                    }
                }
                group.push(overlap);
            }
            if !more {
                break;
            }
        }
        filter_overlap_group(
            self.opt.kind,
            self.opt.error_threshold,
            &mut group,
            &mut retained,
            keep_data,
            keep_reverse,
        );
        Ok(retained)
    }

    fn allocate_windows(&mut self) {
        let w = self.opt.window_length;
        let offset = (w as f64 * self.opt.overlap_percentage) as u32;
        let overlap_mode = self.opt.overlap_percentage > 0.0;

        let mut total = 0usize;
        for i in 0..self.num_targets {
            let len = self.sequences[i].len() as u32;
            let mut rank = 0u32;
            let mut j = 0u32;
            while j < len {
                let mut start = j;
                let mut expansion = offset;
                if j > 0 {
                    start -= offset;
                    expansion += offset;
                }
                let length = (start + w + expansion).min(len) - start;
                self.windows.push(Window::new(
                    i as u64,
                    rank,
                    self.window_type,
                    overlap_mode,
                    start,
                    length,
                ));
                j += w;
                rank += 1;
            }
            total += rank as usize;
        }
        debug_assert_eq!(total, self.windows.len());
        self.targets_coverage = vec![0; self.num_targets];
    }

    fn first_window_index(&self) -> Vec<u64> {
        let mut first = vec![0u64; self.num_targets + 1];
        for i in 0..self.num_targets {
            let len = self.sequences[i].len() as u64;
            let w = self.opt.window_length as u64;
            first[i + 1] = first[i] + len.div_ceil(w);
        }
        first
    }

    fn distribute_layers(&mut self, mut overlaps: Vec<Overlap>) {
        let w = self.opt.window_length;
        let w64 = w as u64;
        let offset = (w as f64 * self.opt.overlap_percentage) as u32;
        let min_layer = MIN_LAYER_FRACTION * w as f64;
        let first_window = self.first_window_index();

        for overlap in overlaps.drain(..) {
            let t_id = overlap.t_id() as usize;
            self.targets_coverage[t_id] += 1;

            let sequence = &self.sequences[overlap.q_id() as usize];
            let breaking_points = overlap.breaking_points();
            let t_first = first_window[t_id];
            let t_last = first_window[t_id + 1];
            let mut prev_window_id = u64::MAX;

            let mut j = 0;
            while j + 1 < breaking_points.len() {
                let (begin_t, begin_q) = breaking_points[j];
                let (end_t, end_q) = breaking_points[j + 1];
                if ((end_q - begin_q) as f64) < min_layer {
                    j += 2;
                    continue;
                }

                if !sequence.quality().is_empty() || !sequence.reverse_quality().is_empty() {
                    let quality = if overlap.strand() {
                        sequence.reverse_quality()
                    } else {
                        sequence.quality()
                    };
                    if !quality.is_empty() {
                        let sum: u64 = quality[begin_q as usize..end_q as usize]
                            .iter()
                            .map(|&q| (q as u64).saturating_sub(33))
                            .sum();
                        let average = sum as f64 / (end_q - begin_q) as f64;
                        if average < self.opt.quality_threshold {
                            // a rejected layer still claims its window slot
                            prev_window_id = shifted_window_id(
                                breaking_points,
                                j,
                                t_first,
                                w64,
                                offset,
                                prev_window_id,
                            );
                            j += 2;
                            continue;
                        }
                    }
                }

                let window_id = shifted_window_id(
                    breaking_points,
                    j,
                    t_first,
                    w64,
                    offset,
                    prev_window_id,
                );
                prev_window_id = window_id;
                if window_id < t_first || window_id >= t_last {
                    log::warn!("skipping layer shifted outside target {}", t_id);
                    j += 2;
                    continue;
                }

                let rank = (window_id - t_first) as u32;
                let mut window_start = rank * w;
                if window_start > 0 {
                    window_start -= offset;
                }

                let begin = begin_t.checked_sub(window_start);
                let end = end_t.checked_sub(window_start + 1);
                match (begin, end) {
                    (Some(begin), Some(end)) => {
                        self.windows[window_id as usize].add_layer(
                            overlap.q_id(),
                            begin_q,
                            end_q - begin_q,
                            overlap.strand(),
                            begin,
                            end,
                        );
                    }
                    _ => {
                        log::warn!(
                            "skipping layer outside window {} of target {}",
                            rank,
                            overlap.t_id()
                        );
                    }
                }
                j += 2;
            }
        }
    }

    /// Polishes every window on the worker pool and stitches the results in
    /// window order, emitting one record per target in input order.
    pub fn polish(&mut self, dst: &mut Vec<Sequence>, drop_unpolished: bool) {
        let start = Instant::now();
        let trim = if self.opt.overlap_percentage == 0.0 {
            self.opt.trim
        } else {
            false
        };

        let match_score = self.opt.match_score;
        let mismatch_score = self.opt.mismatch_score;
        let gap_score = self.opt.gap_score;
        let window_length = self.opt.window_length as usize;
        let sequences = &self.sequences;

        let polished: Vec<bool> = self.pool.map_with(
            &mut self.windows,
            || {
                let mut engine = AlignmentEngine::new(match_score, mismatch_score, gap_score);
                engine.prealloc(window_length);
                engine
            },
            |engine, window| window.generate_consensus(sequences, engine, trim),
        );

        log::info!(
            "generated consensus for {} windows in {:.2} sec",
            self.windows.len(),
            start.elapsed().as_secs_f64()
        );

        if self.opt.overlap_percentage == 0.0 {
            self.stitch_plain(&polished, dst, drop_unpolished);
        } else {
            self.stitch_overlapping(&polished, dst, drop_unpolished);
        }

        self.windows = Vec::new();
        self.sequences = Vec::new();

        log::info!(
            "polished {} sequences in {:.2} sec",
            dst.len(),
            start.elapsed().as_secs_f64()
        );
    }

    fn emit_record(
        &self,
        dst: &mut Vec<Sequence>,
        drop_unpolished: bool,
        window_index: usize,
        num_polished: u32,
        polished_data: &[u8],
    ) {
        let window = &self.windows[window_index];
        let ratio = num_polished as f64 / (window.rank() + 1) as f64;
        if drop_unpolished && ratio == 0.0 {
            return;
        }
        let t_id = window.id() as usize;
        let mut name = self.sequences[t_id].name().to_string();
        if self.opt.kind == PolisherKind::Fragment {
            name.push('r');
        }
        name.push_str(&format!(
            " LN:i:{} RC:i:{} XC:f:{:.6}",
            polished_data.len(),
            self.targets_coverage[t_id],
            ratio
        ));
        dst.push(Sequence::new(&name, polished_data, b""));
    }

    fn stitch_plain(&mut self, polished: &[bool], dst: &mut Vec<Sequence>, drop_unpolished: bool) {
        let mut polished_data: Vec<u8> = Vec::new();
        let mut num_polished = 0u32;
        for i in 0..self.windows.len() {
            num_polished += polished[i] as u32;
            polished_data.extend_from_slice(self.windows[i].consensus());

            let target_done =
                i + 1 == self.windows.len() || self.windows[i + 1].rank() == 0;
            if target_done {
                self.emit_record(dst, drop_unpolished, i, num_polished, &polished_data);
                num_polished = 0;
                polished_data.clear();
            }
            self.windows[i].release();
        }
    }

    fn stitch_overlapping(
        &mut self,
        polished: &[bool],
        dst: &mut Vec<Sequence>,
        drop_unpolished: bool,
    ) {
        let total_overlap = 2.0 * self.opt.overlap_percentage;
        let mut engine = AlignmentEngine::new(3, -5, -6);
        engine.prealloc((self.opt.window_length as f64 * (1.0 + total_overlap)) as usize);
        let mut graph = Graph::new();

        let mut polished_data: Vec<u8> = Vec::new();
        let mut num_polished = 0u32;
        for i in 0..self.windows.len() {
            num_polished += polished[i] as u32;
            let last_window =
                i + 1 == self.windows.len() || self.windows[i + 1].rank() == 0;

            if self.windows[i].rank() == 0 {
                let consensus = self.windows[i].consensus();
                let keep = consensus.len() - (total_overlap * consensus.len() as f64) as usize;
                polished_data.extend_from_slice(&consensus[..keep]);
            } else {
                let stitched = stitch_pair(
                    &self.windows[i - 1],
                    &self.windows[i],
                    last_window,
                    total_overlap,
                    &mut engine,
                    &mut graph,
                );
                polished_data.extend_from_slice(&stitched);
                self.windows[i - 1].release();
            }

            if last_window {
                let consensus = self.windows[i].consensus();
                let tail = consensus.len() - (consensus.len() as f64 * total_overlap) as usize;
                polished_data.extend_from_slice(&consensus[tail..]);

                self.emit_record(dst, drop_unpolished, i, num_polished, &polished_data);
                num_polished = 0;
                polished_data.clear();
                self.windows[i].release();
            }
        }
    }
}

fn filter_overlap_group(
    kind: PolisherKind,
    error_threshold: f64,
    group: &mut Vec<Overlap>,
    dst: &mut Vec<Overlap>,
    keep_data: &mut [bool],
    keep_reverse: &mut [bool],
) {
    let mark = |overlap: &Overlap, keep_data: &mut [bool], keep_reverse: &mut [bool]| {
        if overlap.strand() {
            keep_reverse[overlap.q_id() as usize] = true;
        } else {
            keep_data[overlap.q_id() as usize] = true;
        }
    };
    match kind {
        PolisherKind::Contig => {
            // only the longest overlap of the query survives
            let mut best: Option<Overlap> = None;
            for overlap in group.drain(..) {
                if overlap.error() > error_threshold {
                    continue;
                }
                best = match best {
                    None => Some(overlap),
                    Some(current) => {
                        if overlap.length() >= current.length() {
                            Some(overlap)
                        } else {
                            Some(current)
                        }
                    }
                };
            }
            if let Some(overlap) = best {
                mark(&overlap, keep_data, keep_reverse);
                dst.push(overlap);
            }
        }
        PolisherKind::Fragment => {
            for overlap in group.drain(..) {
                if overlap.error() > error_threshold {
                    continue;
                }
                mark(&overlap, keep_data, keep_reverse);
                dst.push(overlap);
            }
        }
    }
}

/// The window-shift rules for layer placement: a pair spanning more than one
/// window shifts right, a pair landing in the previous layer's window shifts
/// right, and a pair that starts inside the left margin while the next pair
/// starts at the same target position shifts left. Together they keep one
/// layer per overlap per window.
fn shifted_window_id(
    breaking_points: &[(u32, u32)],
    j: usize,
    t_first: u64,
    window_length: u64,
    offset: u32,
    prev_window_id: u64,
) -> u64 {
    let begin_t = breaking_points[j].0 as u64;
    let end_t = breaking_points[j + 1].0 as u64;
    let bpw1 = begin_t / window_length;
    let bpw2 = end_t / window_length;
    let mut window_id = t_first + bpw1;
    if bpw2 - bpw1 > 1 {
        window_id += 1;
    } else if window_id == prev_window_id {
        window_id += 1;
    } else if begin_t < bpw1 * window_length + offset as u64
        && j + 2 < breaking_points.len()
        && breaking_points[j].0 == breaking_points[j + 2].0
    {
        window_id = window_id.saturating_sub(1);
    }
    window_id
}

/// Realigns the shared margin of two adjacent window consensuses and merges
/// the two-row MSA column by column. Disagreeing substitution columns are
/// arbitrated by the windows' per-column counts, with gaps winning ties.
fn stitch_pair(
    left: &Window,
    right: &Window,
    last_window: bool,
    total_overlap: f64,
    engine: &mut AlignmentEngine,
    graph: &mut Graph,
) -> Vec<u8> {
    let consensus_l = left.consensus();
    let summary_l = left.summary();
    let coder_l = left.coder();
    let len_l = (consensus_l.len() as f64 * total_overlap) as usize;
    let start_l = consensus_l.len() - len_l;

    let consensus_r = right.consensus();
    let summary_r = right.summary();
    let coder_r = right.coder();
    let mut len_r = (consensus_r.len() as f64 * total_overlap) as usize;
    if last_window {
        len_r = consensus_r.len();
    }

    let middle_end = if consensus_r.len() >= 2 * len_r {
        consensus_r.len() - len_r
    } else {
        consensus_r.len()
    };

    if len_l == 0 || len_r == 0 {
        let mut result = consensus_l[start_l..].to_vec();
        result.extend_from_slice(&consensus_r[..len_r]);
        result.extend_from_slice(&consensus_r[len_r..middle_end]);
        return result;
    }

    graph.clear();
    graph.add_alignment(&Alignment::new(), &consensus_l[start_l..], &vec![1; len_l]);
    let alignment = engine.align(&consensus_r[..len_r], graph, AlignmentType::Overlap);
    graph.add_alignment(&alignment, &consensus_r[..len_r], &vec![1; len_r]);
    let msa = graph.multiple_sequence_alignment();
    let row_l = &msa[0];
    let row_r = &msa[1];
    let len_msa = row_l.len();

    let gap_line_l = if summary_l.is_empty() || consensus_l.is_empty() {
        0
    } else {
        summary_l.len() / consensus_l.len() - 1
    };
    let gap_line_r = if summary_r.is_empty() || consensus_r.is_empty() {
        0
    } else {
        summary_r.len() / consensus_r.len() - 1
    };

    let mut merged: Vec<u8> = Vec::new();
    let mut right_tail: Vec<u8> = Vec::new();
    let mut first_match: Option<usize> = None;
    let mut last_match: Option<usize> = None;
    let mut l_pos = start_l;
    let mut r_pos = 0usize;

    for j in 0..len_msa {
        if row_l[j] == row_r[j] {
            first_match = Some(j);
            break;
        }
        if row_l[j] != b'-' {
            merged.push(row_l[j]);
            l_pos += 1;
        }
        if row_r[j] != b'-' {
            r_pos += 1;
        }
    }
    for j in (1..len_msa).rev() {
        if row_l[j] == row_r[j] {
            last_match = Some(j);
            break;
        }
        if row_r[j] != b'-' {
            right_tail.push(row_r[j]);
        }
    }

    match (first_match, last_match) {
        (Some(first), Some(last)) => {
            for j in first..=last {
                if row_l[j] == row_r[j] {
                    merged.push(row_l[j]);
                    l_pos += 1;
                    r_pos += 1;
                } else if row_l[j] == b'-' {
                    r_pos += 1;
                } else if row_r[j] == b'-' {
                    l_pos += 1;
                } else {
                    let mut gaps = 0u32;
                    let mut l_count = 0u32;
                    let mut r_count = 0u32;
                    if !summary_l.is_empty() && l_pos < consensus_l.len() {
                        gaps += summary_l[gap_line_l * consensus_l.len() + l_pos];
                        let row = coder_l[row_l[j] as usize];
                        if row >= 0 {
                            l_count = summary_l[row as usize * consensus_l.len() + l_pos];
                        }
                    }
                    if !summary_r.is_empty() && r_pos < consensus_r.len() {
                        gaps += summary_r[gap_line_r * consensus_r.len() + r_pos];
                        let row = coder_r[row_r[j] as usize];
                        if row >= 0 {
                            r_count = summary_r[row as usize * consensus_r.len() + r_pos];
                        }
                    }
                    if gaps.max(l_count).max(r_count) == gaps {
                        continue;
                    }
                    merged.push(if l_count > r_count { row_l[j] } else { row_r[j] });
                }
            }
            right_tail.reverse();
        }
        _ => {
            // the margins failed to align; keep both sides verbatim
            merged = consensus_l[start_l..].to_vec();
            right_tail = consensus_r[..len_r].to_vec();
        }
    }

    let mut result = merged;
    result.extend_from_slice(&right_tail);
    result.extend_from_slice(&consensus_r[len_r..middle_end]);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overlap_with_span(q_id_name: &str, q_span: u32, t_len: u32) -> Overlap {
        Overlap::from_paf(
            q_id_name,
            q_span,
            0,
            q_span,
            false,
            "t",
            t_len,
            0,
            t_len.min(q_span),
            String::new(),
        )
    }

    #[test]
    fn contig_filtering_keeps_only_the_longest_overlap() {
        let mut name_to_id = HashMap::new();
        name_to_id.insert("tt".to_string(), 0u64);
        name_to_id.insert("qq".to_string(), 1u64);
        let id_to_id = HashMap::new();

        let mut group = Vec::new();
        for span in [40u32, 80, 60] {
            let mut overlap = overlap_with_span("q", span, 100);
            overlap.transmute(&name_to_id, &id_to_id).unwrap();
            group.push(overlap);
        }
        let mut dst = Vec::new();
        let mut keep_data = vec![false; 2];
        let mut keep_reverse = vec![false; 2];
        filter_overlap_group(
            PolisherKind::Contig,
            1.0,
            &mut group,
            &mut dst,
            &mut keep_data,
            &mut keep_reverse,
        );
        assert_eq!(dst.len(), 1);
        assert_eq!(dst[0].length(), 80);
        assert!(keep_data[1]);
        assert!(!keep_reverse[1]);
    }

    #[test]
    fn fragment_filtering_keeps_every_overlap_below_the_error_threshold() {
        let mut name_to_id = HashMap::new();
        name_to_id.insert("tt".to_string(), 0u64);
        name_to_id.insert("qq".to_string(), 1u64);
        let id_to_id = HashMap::new();

        let mut clean = overlap_with_span("q", 100, 100);
        clean.transmute(&name_to_id, &id_to_id).unwrap();
        // 30 query bases against a 100-base target interval: error 0.7
        let mut noisy = Overlap::from_paf("q", 100, 0, 30, false, "t", 100, 0, 100, String::new());
        noisy.transmute(&name_to_id, &id_to_id).unwrap();
        let mut group = vec![clean, noisy];

        let mut dst = Vec::new();
        let mut keep_data = vec![false; 2];
        let mut keep_reverse = vec![false; 2];
        filter_overlap_group(
            PolisherKind::Fragment,
            0.5,
            &mut group,
            &mut dst,
            &mut keep_data,
            &mut keep_reverse,
        );
        assert_eq!(dst.len(), 1);
        assert_eq!(dst[0].length(), 100);
    }

    #[test]
    fn window_shifts_preserve_one_layer_per_window() {
        // two pairs of one overlap landing in the same nominal window; the
        // second shifts right
        let points = vec![(0u32, 0u32), (400, 400), (400, 400), (520, 520)];
        let w1 = shifted_window_id(&points, 0, 0, 500, 0, u64::MAX);
        assert_eq!(w1, 0);
        let w2 = shifted_window_id(&points, 2, 0, 500, 0, w1);
        assert_eq!(w2, 1);
    }

    #[test]
    fn multi_window_pairs_shift_right() {
        // margin segments start one window early; the span rule restores the
        // owning window
        let points = vec![(450u32, 0u32), (1050, 600)];
        let window_id = shifted_window_id(&points, 0, 0, 500, 50, u64::MAX);
        assert_eq!(window_id, 1);
    }

    #[test]
    fn left_margin_pairs_sharing_a_start_shift_left() {
        // both segments start at the same position inside window 1's left
        // margin zone; the first pair belongs to window 0
        let points = vec![(510u32, 0u32), (560, 50), (510, 0), (1050, 540)];
        let w1 = shifted_window_id(&points, 0, 0, 500, 50, u64::MAX);
        assert_eq!(w1, 0);
        let w2 = shifted_window_id(&points, 2, 0, 500, 50, w1);
        assert_eq!(w2, 1);
    }

    #[test]
    fn stitch_pair_emits_the_common_stretch_once() {
        let mut left = Window::new(0, 0, WindowType::Tgs, true, 0, 10);
        let mut right = Window::new(0, 1, WindowType::Tgs, true, 0, 10);
        // margins: left ends with XYZAB-like stretch, right starts with the
        // ZAB continuation
        left.set_consensus_for_tests(b"GGGGGGGGGGGGGGGGCCAAT".to_vec());
        right.set_consensus_for_tests(b"CCAATTTTTTTTTTTTTTTTT".to_vec());
        let mut engine = AlignmentEngine::new(3, -5, -6);
        let mut graph = Graph::new();
        // total overlap 0.2 of 21 bases -> margins of 4: left contributes
        // "CAAT", the right prefix "CCAA"; the shared "CAA" is emitted once
        // and the middle of the right consensus follows
        let stitched = stitch_pair(&left, &right, false, 0.2, &mut engine, &mut graph);
        let mut expected = b"CAA".to_vec();
        expected.extend_from_slice(&[b'T'; 13]);
        assert_eq!(stitched, expected);
    }
}
