// Pairwise overlap between a query read and a target backbone, normalised
// from whichever flavour (MHAP/PAF/SAM) the input carried. After ingestion an
// overlap resolves its textual names or foreign ids to store ids, and then
// turns its alignment into per-window breaking points.

use std::collections::HashMap;
use std::io;

use bio::alignment::pairwise::{Aligner, Scoring};
use bio::alignment::AlignmentOperation;

use crate::sequence::Sequence;

// Scores for the manufactured alignment of approximate overlaps. These only
// shape the breaking-point path, not the consensus itself.
const INTERVAL_MATCH: i32 = 2;
const INTERVAL_MISMATCH: i32 = -4;
const INTERVAL_GAP_OPEN: i32 = -4;
const INTERVAL_GAP_EXTEND: i32 = -2;

pub struct Overlap {
    q_name: String,
    q_id: u64,
    q_begin: u32,
    q_end: u32,
    q_length: u32,
    t_name: String,
    t_id: u64,
    t_begin: u32,
    t_end: u32,
    t_length: u32,
    strand: bool,
    cigar: String,
    transmuted: bool,
    breaking_points: Vec<(u32, u32)>,
}

impl Overlap {
    /// MHAP record; ids are the 1-based ordinals of the input files.
    #[allow(clippy::too_many_arguments)]
    pub fn from_mhap(
        a_id: u64,
        b_id: u64,
        a_rv: u32,
        a_begin: u32,
        a_end: u32,
        a_length: u32,
        b_rv: u32,
        b_begin: u32,
        b_end: u32,
        b_length: u32,
    ) -> Self {
        Overlap {
            q_name: String::new(),
            q_id: a_id.saturating_sub(1),
            q_begin: a_begin,
            q_end: a_end,
            q_length: a_length,
            t_name: String::new(),
            t_id: b_id.saturating_sub(1),
            t_begin: b_begin,
            t_end: b_end,
            t_length: b_length,
            strand: a_rv != b_rv,
            cigar: String::new(),
            transmuted: false,
            breaking_points: Vec::new(),
        }
    }

    /// PAF record; `cigar` comes from the optional `cg:Z:` tag.
    #[allow(clippy::too_many_arguments)]
    pub fn from_paf(
        q_name: &str,
        q_length: u32,
        q_begin: u32,
        q_end: u32,
        reverse: bool,
        t_name: &str,
        t_length: u32,
        t_begin: u32,
        t_end: u32,
        cigar: String,
    ) -> Self {
        Overlap {
            q_name: q_name.to_string(),
            q_id: 0,
            q_begin,
            q_end,
            q_length,
            t_name: t_name.to_string(),
            t_id: 0,
            t_begin,
            t_end,
            t_length,
            strand: reverse,
            cigar,
            transmuted: false,
            breaking_points: Vec::new(),
        }
    }

    /// Mapped SAM record. Clips position the query interval and are dropped
    /// from the stored alignment; a reverse-strand record keeps its
    /// coordinates in forward-read space.
    pub fn from_sam(q_name: &str, flag: u32, t_name: &str, t_begin: u32, cigar: &str) -> Self {
        let mut leading_clip = 0u32;
        let mut trailing_clip = 0u32;
        let mut q_consumed = 0u32;
        let mut t_consumed = 0u32;
        let mut core = String::with_capacity(cigar.len());
        let mut num = 0u32;
        for ch in cigar.bytes() {
            if ch.is_ascii_digit() {
                num = num * 10 + (ch - b'0') as u32;
                continue;
            }
            match ch {
                b'S' | b'H' => {
                    if q_consumed == 0 && t_consumed == 0 {
                        leading_clip += num;
                    } else {
                        trailing_clip += num;
                    }
                }
                b'M' | b'=' | b'X' => {
                    q_consumed += num;
                    t_consumed += num;
                    core.push_str(&format!("{}{}", num, ch as char));
                }
                b'I' => {
                    q_consumed += num;
                    core.push_str(&format!("{}I", num));
                }
                b'D' | b'N' => {
                    t_consumed += num;
                    core.push_str(&format!("{}{}", num, ch as char));
                }
                _ => {}
            }
            num = 0;
        }

        let strand = flag & 0x10 != 0;
        let q_length = leading_clip + q_consumed + trailing_clip;
        let q_begin = if strand { trailing_clip } else { leading_clip };
        Overlap {
            q_name: q_name.to_string(),
            q_id: 0,
            q_begin,
            q_end: q_begin + q_consumed,
            q_length,
            t_name: t_name.to_string(),
            t_id: 0,
            t_begin,
            t_end: t_begin + t_consumed,
            t_length: t_begin + t_consumed,
            strand,
            cigar: core,
            transmuted: false,
            breaking_points: Vec::new(),
        }
    }

    pub fn q_id(&self) -> u64 {
        self.q_id
    }

    pub fn t_id(&self) -> u64 {
        self.t_id
    }

    /// True when the query aligns to the reverse strand of the target.
    pub fn strand(&self) -> bool {
        self.strand
    }

    pub fn breaking_points(&self) -> &[(u32, u32)] {
        &self.breaking_points
    }

    /// Approximate alignment error derived from the span ratio.
    pub fn error(&self) -> f64 {
        let q_span = (self.q_end - self.q_begin) as f64;
        let t_span = (self.t_end - self.t_begin) as f64;
        1.0 - q_span.min(t_span) / q_span.max(t_span)
    }

    pub fn length(&self) -> u32 {
        (self.q_end - self.q_begin).max(self.t_end - self.t_begin)
    }

    /// Resolves the parser-provided names/ids to store ids. Keys in
    /// `name_to_id` are `name + role` (`q`/`t`); keys in `id_to_id` are
    /// `ordinal << 1 | role_bit` with role bit 1 for targets.
    pub fn transmute(
        &mut self,
        name_to_id: &HashMap<String, u64>,
        id_to_id: &HashMap<u64, u64>,
    ) -> io::Result<()> {
        if self.transmuted {
            return Ok(());
        }
        self.q_id = if self.q_name.is_empty() {
            *id_to_id.get(&(self.q_id << 1)).ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("missing sequence with id {} in overlaps", self.q_id),
                )
            })?
        } else {
            *name_to_id.get(&format!("{}q", self.q_name)).ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("missing sequence with name {} in overlaps", self.q_name),
                )
            })?
        };
        self.t_id = if self.t_name.is_empty() {
            *id_to_id.get(&(self.t_id << 1 | 1)).ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("missing target with id {} in overlaps", self.t_id),
                )
            })?
        } else {
            *name_to_id.get(&format!("{}t", self.t_name)).ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("missing target with name {} in overlaps", self.t_name),
                )
            })?
        };
        self.transmuted = true;
        Ok(())
    }

    /// Bounds and self-overlap check against the store; only meaningful
    /// after `transmute`.
    pub fn is_valid(&self, sequences: &[Sequence]) -> bool {
        if !self.transmuted {
            return false;
        }
        let q_len = sequences[self.q_id as usize].len() as u32;
        let t_len = sequences[self.t_id as usize].len() as u32;
        self.q_id != self.t_id
            && self.q_begin < self.q_end
            && self.q_end <= q_len
            && self.q_length == q_len
            && self.t_begin < self.t_end
            && self.t_end <= t_len
    }

    /// Turns the alignment into `(target, query)` coordinate pairs, two per
    /// window segment the overlap touches. Query positions are in
    /// reverse-complement space for reverse-strand overlaps. The alignment
    /// buffer is released afterwards.
    pub fn find_breaking_points(
        &mut self,
        sequences: &[Sequence],
        window_length: u32,
        overlap_fraction: f64,
    ) {
        if !self.breaking_points.is_empty() {
            return;
        }
        if self.cigar.is_empty() {
            let q_seq = &sequences[self.q_id as usize];
            let t_seq = &sequences[self.t_id as usize];
            let q = if self.strand {
                let len = self.q_length as usize;
                &q_seq.reverse_complement()[len - self.q_end as usize..len - self.q_begin as usize]
            } else {
                &q_seq.data()[self.q_begin as usize..self.q_end as usize]
            };
            let t = &t_seq.data()[self.t_begin as usize..self.t_end as usize];
            self.cigar = align_intervals(q, t);
        }

        let w = window_length as u64;
        let margin = (window_length as f64 * overlap_fraction) as u64;
        let t_len = sequences[self.t_id as usize].len() as u64;
        let t_begin = self.t_begin as u64;
        let t_end = self.t_end as u64;

        // Target intervals of every window this overlap touches. With a
        // margin the intervals of adjacent windows overlap, so one boundary
        // crossing produces two contained segments.
        let mut segments: Vec<(u64, u64)> = Vec::new();
        let mut k_lo = t_begin / w;
        if margin > 0 && k_lo > 0 && t_begin < k_lo * w + margin {
            k_lo -= 1;
        }
        let last_rank = (t_len - 1) / w;
        let mut k_hi = (t_end - 1) / w;
        if margin > 0 && k_hi < last_rank && t_end > (k_hi + 1) * w - margin {
            k_hi += 1;
        }
        for k in k_lo..=k_hi {
            let lo = t_begin.max(if k > 0 { k * w - margin } else { 0 });
            let hi = t_end.min((k + 1) * w + margin);
            if lo < hi {
                segments.push((lo, hi));
            }
        }

        let mut first: Vec<Option<(u32, u32)>> = vec![None; segments.len()];
        let mut last: Vec<(u32, u32)> = vec![(0, 0); segments.len()];
        let mut seg_lo = 0usize;

        let mut t_pos = self.t_begin;
        let mut q_pos = if self.strand {
            self.q_length - self.q_end
        } else {
            self.q_begin
        };

        let cigar = std::mem::take(&mut self.cigar);
        let mut num = 0u32;
        for ch in cigar.bytes() {
            if ch.is_ascii_digit() {
                num = num * 10 + (ch - b'0') as u32;
                continue;
            }
            match ch {
                b'M' | b'=' | b'X' => {
                    for _ in 0..num {
                        let t = t_pos as u64;
                        while seg_lo < segments.len() && t >= segments[seg_lo].1 {
                            seg_lo += 1;
                        }
                        for s in seg_lo..segments.len() {
                            if t < segments[s].0 {
                                break;
                            }
                            if first[s].is_none() {
                                first[s] = Some((t_pos, q_pos));
                            }
                            last[s] = (t_pos + 1, q_pos + 1);
                        }
                        t_pos += 1;
                        q_pos += 1;
                    }
                }
                b'I' | b'S' => q_pos += num,
                b'D' | b'N' => t_pos += num,
                _ => {}
            }
            num = 0;
        }

        for (s, begin) in first.iter().enumerate() {
            if let Some(begin) = begin {
                self.breaking_points.push(*begin);
                self.breaking_points.push(last[s]);
            }
        }
    }
}

/// Global alignment of two intervals, rendered as a CIGAR string. Used for
/// overlap flavours that carry no alignment of their own.
fn align_intervals(q: &[u8], t: &[u8]) -> String {
    let scoring = Scoring::from_scores(
        INTERVAL_GAP_OPEN,
        INTERVAL_GAP_EXTEND,
        INTERVAL_MATCH,
        INTERVAL_MISMATCH,
    );
    let mut aligner = Aligner::with_scoring(scoring);
    let alignment = aligner.global(q, t);

    let mut cigar = String::new();
    let mut run_op = 0u8;
    let mut run_len = 0u32;
    for op in &alignment.operations {
        let ch = match op {
            AlignmentOperation::Match | AlignmentOperation::Subst => b'M',
            AlignmentOperation::Ins => b'I',
            AlignmentOperation::Del => b'D',
            _ => continue,
        };
        if ch == run_op {
            run_len += 1;
        } else {
            if run_len > 0 {
                cigar.push_str(&format!("{}{}", run_len, run_op as char));
            }
            run_op = ch;
            run_len = 1;
        }
    }
    if run_len > 0 {
        cigar.push_str(&format!("{}{}", run_len, run_op as char));
    }
    cigar
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(records: &[(&str, &[u8])]) -> Vec<Sequence> {
        records
            .iter()
            .map(|(name, data)| Sequence::new(name, data, b""))
            .collect()
    }

    fn tables(
        sequences: &[Sequence],
        num_targets: usize,
    ) -> (HashMap<String, u64>, HashMap<u64, u64>) {
        let mut name_to_id = HashMap::new();
        let mut id_to_id = HashMap::new();
        for (i, seq) in sequences.iter().enumerate() {
            if i < num_targets {
                name_to_id.insert(format!("{}t", seq.name()), i as u64);
                id_to_id.insert((i as u64) << 1 | 1, i as u64);
            } else {
                let ordinal = (i - num_targets) as u64;
                name_to_id.insert(format!("{}q", seq.name()), i as u64);
                id_to_id.insert(ordinal << 1, i as u64);
            }
        }
        (name_to_id, id_to_id)
    }

    #[test]
    fn sam_clips_position_the_query_interval() {
        let overlap = Overlap::from_sam("q", 0, "t", 10, "2S3M1I2M3S");
        assert_eq!(overlap.q_begin, 2);
        assert_eq!(overlap.q_end, 8);
        assert_eq!(overlap.q_length, 11);
        assert_eq!(overlap.t_begin, 10);
        assert_eq!(overlap.t_end, 15);
        assert!(!overlap.strand);
        assert_eq!(overlap.cigar, "3M1I2M");
    }

    #[test]
    fn sam_reverse_strand_maps_clips_to_forward_space() {
        let overlap = Overlap::from_sam("q", 16, "t", 0, "2S5M3S");
        assert!(overlap.strand);
        assert_eq!(overlap.q_begin, 3);
        assert_eq!(overlap.q_end, 8);
        assert_eq!(overlap.q_length, 10);
    }

    #[test]
    fn error_is_zero_for_identity_spans() {
        let overlap = Overlap::from_paf("q", 10, 0, 10, false, "t", 10, 0, 10, String::new());
        assert_eq!(overlap.error(), 0.0);
        assert_eq!(overlap.length(), 10);
        let skewed = Overlap::from_paf("q", 20, 0, 10, false, "t", 20, 0, 20, String::new());
        assert!((skewed.error() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn transmute_resolves_names_and_rejects_unknowns() {
        let sequences = store(&[("t", b"ACGTACGTAC"), ("q", b"ACGTACGTAC")]);
        let (name_to_id, id_to_id) = tables(&sequences, 1);

        let mut overlap =
            Overlap::from_paf("q", 10, 0, 10, false, "t", 10, 0, 10, String::new());
        overlap.transmute(&name_to_id, &id_to_id).unwrap();
        assert_eq!(overlap.q_id(), 1);
        assert_eq!(overlap.t_id(), 0);
        assert!(overlap.is_valid(&sequences));

        let mut unknown =
            Overlap::from_paf("nope", 10, 0, 10, false, "t", 10, 0, 10, String::new());
        assert!(unknown.transmute(&name_to_id, &id_to_id).is_err());
    }

    #[test]
    fn mhap_ordinals_resolve_through_the_id_table() {
        let sequences = store(&[("t", b"ACGTACGTAC"), ("q", b"ACGTACGTAC")]);
        let (name_to_id, id_to_id) = tables(&sequences, 1);
        let mut overlap = Overlap::from_mhap(1, 1, 0, 0, 10, 10, 0, 0, 10, 10);
        overlap.transmute(&name_to_id, &id_to_id).unwrap();
        assert_eq!(overlap.q_id(), 1);
        assert_eq!(overlap.t_id(), 0);
    }

    #[test]
    fn self_overlaps_are_invalid() {
        let sequences = store(&[("t", b"ACGTACGTAC")]);
        let mut name_to_id = HashMap::new();
        name_to_id.insert("tt".to_string(), 0u64);
        name_to_id.insert("tq".to_string(), 0u64);
        let id_to_id = HashMap::new();
        let mut overlap = Overlap::from_paf("t", 10, 0, 10, false, "t", 10, 0, 10, String::new());
        overlap.transmute(&name_to_id, &id_to_id).unwrap();
        assert!(!overlap.is_valid(&sequences));
    }

    #[test]
    fn breaking_points_split_at_window_boundaries() {
        let sequences = store(&[("t", b"ACGTACGTAC"), ("q", b"ACGTACGTAC")]);
        let (name_to_id, id_to_id) = tables(&sequences, 1);
        let mut overlap =
            Overlap::from_paf("q", 10, 0, 10, false, "t", 10, 0, 10, "10M".to_string());
        overlap.transmute(&name_to_id, &id_to_id).unwrap();
        overlap.find_breaking_points(&sequences, 5, 0.0);
        assert_eq!(
            overlap.breaking_points(),
            &[(0, 0), (5, 5), (5, 5), (10, 10)]
        );
    }

    #[test]
    fn deletions_advance_only_the_target_cursor() {
        let sequences = store(&[("t", b"ACGTACGT"), ("q", b"ACGCGT")]);
        let (name_to_id, id_to_id) = tables(&sequences, 1);
        let mut overlap =
            Overlap::from_paf("q", 6, 0, 6, false, "t", 8, 0, 8, "3M2D3M".to_string());
        overlap.transmute(&name_to_id, &id_to_id).unwrap();
        overlap.find_breaking_points(&sequences, 4, 0.0);
        assert_eq!(
            overlap.breaking_points(),
            &[(0, 0), (3, 3), (5, 3), (8, 6)]
        );
    }

    #[test]
    fn margins_emit_two_pairs_per_crossing() {
        let bases = [b'A'; 20];
        let sequences = store(&[("t", &bases[..]), ("q", &bases[..])]);
        let (name_to_id, id_to_id) = tables(&sequences, 1);
        let mut overlap =
            Overlap::from_paf("q", 20, 0, 20, false, "t", 20, 0, 20, "20M".to_string());
        overlap.transmute(&name_to_id, &id_to_id).unwrap();
        overlap.find_breaking_points(&sequences, 10, 0.2);
        assert_eq!(
            overlap.breaking_points(),
            &[(0, 0), (12, 12), (8, 8), (20, 20)]
        );
    }

    #[test]
    fn missing_alignment_is_manufactured_by_pairwise_alignment() {
        let sequences = store(&[("t", b"ACGTACGTAC"), ("q", b"ACGTACGTAC")]);
        let (name_to_id, id_to_id) = tables(&sequences, 1);
        let mut overlap =
            Overlap::from_paf("q", 10, 0, 10, false, "t", 10, 0, 10, String::new());
        overlap.transmute(&name_to_id, &id_to_id).unwrap();
        overlap.find_breaking_points(&sequences, 5, 0.0);
        assert_eq!(
            overlap.breaking_points(),
            &[(0, 0), (5, 5), (5, 5), (10, 10)]
        );
    }

    #[test]
    fn align_intervals_renders_compact_cigars() {
        assert_eq!(align_intervals(b"ACGT", b"ACGT"), "4M");

        let cigar = align_intervals(b"ACGGT", b"ACGT");
        let mut q_consumed = 0u32;
        let mut t_consumed = 0u32;
        let mut num = 0u32;
        for ch in cigar.bytes() {
            if ch.is_ascii_digit() {
                num = num * 10 + (ch - b'0') as u32;
                continue;
            }
            match ch {
                b'M' => {
                    q_consumed += num;
                    t_consumed += num;
                }
                b'I' => q_consumed += num,
                b'D' => t_consumed += num,
                _ => panic!("unexpected op {}", ch as char),
            }
            num = 0;
        }
        assert_eq!(q_consumed, 5);
        assert_eq!(t_consumed, 4);
    }
}
