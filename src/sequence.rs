// Sequence records shared by the whole pipeline.
//
// A sequence owns its forward bases and (optional) Phred+33 qualities.
// Reverse-strand buffers are materialised only once overlaps tell us which
// strands are actually referenced; everything unreferenced is released so the
// peak footprint stays close to the input size.

/// Complement of an ASCII base. Case is preserved for ACGT/U; anything the
/// complement table does not know becomes `N`.
#[inline]
pub fn complement(base: u8) -> u8 {
    match base {
        b'A' => b'T',
        b'a' => b't',
        b'C' => b'G',
        b'c' => b'g',
        b'G' => b'C',
        b'g' => b'c',
        b'T' | b'U' => b'A',
        b't' | b'u' => b'a',
        _ => b'N',
    }
}

pub struct Sequence {
    name: String,
    data: Vec<u8>,
    quality: Vec<u8>,
    reverse_complement: Vec<u8>,
    reverse_quality: Vec<u8>,
}

impl Sequence {
    pub fn new(name: &str, data: &[u8], quality: &[u8]) -> Self {
        Sequence {
            name: name.to_string(),
            data: data.to_vec(),
            quality: quality.to_vec(),
            reverse_complement: Vec::new(),
            reverse_quality: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Phred+33 qualities; empty when the input carried none.
    pub fn quality(&self) -> &[u8] {
        &self.quality
    }

    /// Reverse complement; empty until materialised.
    pub fn reverse_complement(&self) -> &[u8] {
        &self.reverse_complement
    }

    /// Qualities of the reverse complement; empty when absent.
    pub fn reverse_quality(&self) -> &[u8] {
        &self.reverse_quality
    }

    /// Builds the reverse complement and the reversed quality string.
    pub fn create_reverse_complement(&mut self) {
        if !self.reverse_complement.is_empty() {
            return;
        }
        self.reverse_complement = self.data.iter().rev().map(|&b| complement(b)).collect();
        self.reverse_quality = self.quality.iter().rev().copied().collect();
    }

    /// Keeps only the buffers the overlap set actually references. The
    /// reverse variants are built before the forward buffers may be dropped,
    /// as they are derived from them.
    pub fn release_unused(&mut self, keep_name: bool, keep_data: bool, keep_reverse: bool) {
        if keep_reverse {
            self.create_reverse_complement();
        }
        if !keep_name {
            self.name = String::new();
        }
        if !keep_data {
            self.data = Vec::new();
            self.quality = Vec::new();
        }
    }
}
