// A window is one fixed-length slice of a target backbone together with the
// read layers that overlap it. Windows hold id+range descriptors into the
// shared sequence store rather than borrowed slices, so they stay `Send` and
// outlive nothing.

use crate::poa::{Alignment, AlignmentEngine, AlignmentType, Graph};
use crate::sequence::Sequence;

/// Read generation the inputs look like; informational, set from the mean
/// query length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowType {
    /// Short accurate reads.
    Ngs,
    /// Long noisy reads.
    Tgs,
}

/// A query-derived subsequence assigned to this window. `offset`/`length`
/// index the strand-appropriate base buffer of sequence `q_id`;
/// `begin`/`end` are window-local backbone coordinates (inclusive end).
struct Layer {
    q_id: u64,
    offset: u32,
    length: u32,
    reverse: bool,
    begin: u32,
    end: u32,
}

pub struct Window {
    id: u64,
    rank: u32,
    #[allow(dead_code)]
    window_type: WindowType,
    overlap_mode: bool,
    backbone_offset: u32,
    backbone_len: u32,
    layers: Vec<Layer>,
    consensus: Vec<u8>,
    summary: Vec<u32>,
    coder: Vec<i32>,
}

fn quality_weights(quality: &[u8]) -> Vec<u32> {
    quality
        .iter()
        .map(|&q| (q.saturating_sub(33)).min(93) as u32)
        .collect()
}

impl Window {
    pub fn new(
        id: u64,
        rank: u32,
        window_type: WindowType,
        overlap_mode: bool,
        backbone_offset: u32,
        backbone_len: u32,
    ) -> Self {
        Window {
            id,
            rank,
            window_type,
            overlap_mode,
            backbone_offset,
            backbone_len,
            layers: Vec::new(),
            consensus: Vec::new(),
            summary: Vec::new(),
            coder: Vec::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn rank(&self) -> u32 {
        self.rank
    }

    pub fn consensus(&self) -> &[u8] {
        &self.consensus
    }

    /// Per-column symbol counts, present in overlap-stitch mode after
    /// consensus generation.
    pub fn summary(&self) -> &[u32] {
        &self.summary
    }

    pub fn coder(&self) -> &[i32] {
        &self.coder
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Drops the consensus buffers once the stitcher is done with them.
    pub fn release(&mut self) {
        self.consensus = Vec::new();
        self.summary = Vec::new();
        self.coder = Vec::new();
    }

    #[cfg(test)]
    pub(crate) fn set_consensus_for_tests(&mut self, consensus: Vec<u8>) {
        self.consensus = consensus;
    }

    pub fn add_layer(
        &mut self,
        q_id: u64,
        offset: u32,
        length: u32,
        reverse: bool,
        begin: u32,
        end: u32,
    ) {
        if length == 0 || begin > end || end >= self.backbone_len {
            log::warn!(
                "ignoring malformed layer for window {}:{} (begin {}, end {}, backbone length {})",
                self.id,
                self.rank,
                begin,
                end,
                self.backbone_len
            );
            return;
        }
        self.layers.push(Layer {
            q_id,
            offset,
            length,
            reverse,
            begin,
            end,
        });
    }

    /// Builds the window consensus. Returns `true` when at least one layer
    /// took part; otherwise the consensus is the untouched backbone slice.
    pub fn generate_consensus(
        &mut self,
        sequences: &[Sequence],
        engine: &mut AlignmentEngine,
        trim: bool,
    ) -> bool {
        let target = &sequences[self.id as usize];
        let offset = self.backbone_offset as usize;
        let len = self.backbone_len as usize;
        let backbone = &target.data()[offset..offset + len];

        if self.layers.is_empty() {
            self.consensus = backbone.to_vec();
            return false;
        }

        let mut graph = Graph::new();
        // An unpolished backbone carries no quality evidence of its own;
        // weight 0 lets the layers out-vote it everywhere they align.
        let backbone_weights = if target.quality().is_empty() {
            vec![0u32; len]
        } else {
            quality_weights(&target.quality()[offset..offset + len])
        };
        graph.add_alignment(&Alignment::new(), backbone, &backbone_weights);

        let mut order: Vec<usize> = (0..self.layers.len()).collect();
        order.sort_by_key(|&i| self.layers[i].begin);

        let margin = len / 100;
        for &i in &order {
            let layer = &self.layers[i];
            let seq = &sequences[layer.q_id as usize];
            let (data, quality) = if layer.reverse {
                (seq.reverse_complement(), seq.reverse_quality())
            } else {
                (seq.data(), seq.quality())
            };
            let lo = layer.offset as usize;
            let hi = lo + layer.length as usize;
            let bases = &data[lo..hi];
            let weights = if quality.is_empty() {
                vec![1u32; bases.len()]
            } else {
                quality_weights(&quality[lo..hi])
            };

            let near_full =
                layer.begin as usize <= margin && layer.end as usize + 1 + margin >= len;
            let kind = if near_full {
                AlignmentType::Global
            } else {
                AlignmentType::Fit
            };
            let alignment = engine.align(bases, &graph, kind);
            graph.add_alignment(&alignment, bases, &weights);
        }

        let consensus = graph.consensus();
        if self.overlap_mode {
            let (summary, coder) = graph.column_summary(&consensus.path);
            self.summary = summary;
            self.coder = coder;
        }

        let mut bases = consensus.bases;
        if trim {
            let min_coverage = (self.layers.len() / 2) as u32;
            let coverage = &consensus.coverage;
            let mut begin = 0usize;
            while begin < coverage.len() && coverage[begin] < min_coverage {
                begin += 1;
            }
            let mut end = coverage.len();
            while end > 0 && coverage[end - 1] < min_coverage {
                end -= 1;
            }
            if begin >= end {
                log::warn!(
                    "contig {} might be chimeric in window {}",
                    self.id,
                    self.rank
                );
            } else {
                bases = bases[begin..end].to_vec();
            }
        }

        self.consensus = bases;
        self.layers = Vec::new();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> AlignmentEngine {
        AlignmentEngine::new(3, -5, -4)
    }

    fn store(records: &[(&str, &[u8], &[u8])]) -> Vec<Sequence> {
        records
            .iter()
            .map(|(name, data, quality)| Sequence::new(name, data, quality))
            .collect()
    }

    #[test]
    fn window_without_layers_returns_the_backbone() {
        let sequences = store(&[("ctg", b"ACGTACGTAC", b"")]);
        let mut window = Window::new(0, 0, WindowType::Tgs, false, 0, 10);
        let polished = window.generate_consensus(&sequences, &mut engine(), false);
        assert!(!polished);
        assert_eq!(window.consensus(), b"ACGTACGTAC");
    }

    #[test]
    fn identity_layer_preserves_the_backbone() {
        let sequences = store(&[("ctg", b"ACGTACGTAC", b""), ("read", b"ACGTACGTAC", b"")]);
        let mut window = Window::new(0, 0, WindowType::Tgs, false, 0, 10);
        window.add_layer(1, 0, 10, false, 0, 9);
        let polished = window.generate_consensus(&sequences, &mut engine(), false);
        assert!(polished);
        assert_eq!(window.consensus(), b"ACGTACGTAC");
    }

    #[test]
    fn two_layers_out_vote_the_backbone() {
        let sequences = store(&[
            ("ctg", b"AAAAAAAAAA", b""),
            ("r1", b"AAACAAAAAA", b""),
            ("r2", b"AAACAAAAAA", b""),
        ]);
        let mut window = Window::new(0, 0, WindowType::Tgs, false, 0, 10);
        window.add_layer(1, 0, 10, false, 0, 9);
        window.add_layer(2, 0, 10, false, 0, 9);
        assert!(window.generate_consensus(&sequences, &mut engine(), false));
        assert_eq!(window.consensus().len(), 10);
        assert_eq!(window.consensus()[3], b'C');
    }

    #[test]
    fn reverse_strand_layer_is_resolved_through_the_store() {
        let mut sequences = store(&[("ctg", b"ACGTACGTAC", b""), ("read", b"GTACGTACGT", b"")]);
        // the read is the reverse complement of the backbone
        sequences[1].create_reverse_complement();
        assert_eq!(sequences[1].reverse_complement(), b"ACGTACGTAC");
        let mut window = Window::new(0, 0, WindowType::Tgs, false, 0, 10);
        window.add_layer(1, 0, 10, true, 0, 9);
        assert!(window.generate_consensus(&sequences, &mut engine(), false));
        assert_eq!(window.consensus(), b"ACGTACGTAC");
    }

    #[test]
    fn malformed_layers_are_ignored() {
        let sequences = store(&[("ctg", b"ACGTACGTAC", b"")]);
        let mut window = Window::new(0, 0, WindowType::Tgs, false, 0, 10);
        window.add_layer(0, 0, 10, false, 4, 2);
        window.add_layer(0, 0, 10, false, 0, 10);
        window.add_layer(0, 0, 0, false, 0, 9);
        assert_eq!(window.num_layers(), 0);
    }

    #[test]
    fn trim_removes_low_coverage_flanks() {
        let sequences = store(&[
            ("ctg", b"TTAAAATT", b""),
            ("r1", b"AAAA", b""),
            ("r2", b"AAAA", b""),
            ("r3", b"AAAA", b""),
            ("r4", b"AAAA", b""),
        ]);
        let mut window = Window::new(0, 0, WindowType::Tgs, false, 0, 8);
        for q_id in 1..=4 {
            window.add_layer(q_id, 0, 4, false, 2, 5);
        }
        assert!(window.generate_consensus(&sequences, &mut engine(), true));
        assert_eq!(window.consensus(), b"AAAA");
    }

    #[test]
    fn summary_tables_appear_in_overlap_mode() {
        let sequences = store(&[("ctg", b"ACGTACGTAC", b""), ("read", b"ACGTACGTAC", b"")]);
        let mut window = Window::new(0, 0, WindowType::Tgs, true, 0, 10);
        window.add_layer(1, 0, 10, false, 0, 9);
        assert!(window.generate_consensus(&sequences, &mut engine(), false));
        let len = window.consensus().len();
        assert_eq!(window.summary().len(), 5 * len);
        let coder = window.coder();
        let a_row = coder[b'A' as usize] as usize;
        // both the backbone and the layer vote A in the first column
        assert_eq!(window.summary()[a_row * len], 2);
    }

    #[test]
    fn quality_weights_clamp_to_the_phred_range() {
        assert_eq!(quality_weights(b"!"), vec![0]);
        assert_eq!(quality_weights(b"I"), vec![40]);
        assert_eq!(quality_weights(&[b' ']), vec![0]);
        assert_eq!(quality_weights(&[255]), vec![93]);
    }
}
