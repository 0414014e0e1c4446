// Chunked FASTA/FASTQ sequence sources.
//
// Sources wrap the bio readers over a gzip-transparent byte stream and hand
// records out in byte-budgeted chunks, so whole-file ingestion and ~1 GiB
// streaming share one interface. `MultiGzDecoder` also handles BGZF files,
// which are concatenated gzip members.

use std::fs::File;
use std::io::{self, BufReader, Read};

use bio::io::{fasta, fastq};
use flate2::read::MultiGzDecoder;

use crate::sequence::Sequence;

pub trait SequenceSource {
    /// Rewinds to the first record.
    fn reset(&mut self) -> io::Result<()>;
    /// Appends records to `dst` until roughly `byte_budget` sequence bytes
    /// have been read. Returns `true` while more input remains.
    fn parse(&mut self, dst: &mut Vec<Sequence>, byte_budget: u64) -> io::Result<bool>;
}

fn open(path: &str) -> io::Result<Box<dyn Read>> {
    let file = File::open(path)?;
    if path.ends_with(".gz") {
        Ok(Box::new(MultiGzDecoder::new(file)))
    } else {
        Ok(Box::new(file))
    }
}

struct FastaSource {
    path: String,
    records: fasta::Records<BufReader<Box<dyn Read>>>,
}

impl SequenceSource for FastaSource {
    fn reset(&mut self) -> io::Result<()> {
        self.records = fasta::Reader::new(open(&self.path)?).records();
        Ok(())
    }

    fn parse(&mut self, dst: &mut Vec<Sequence>, byte_budget: u64) -> io::Result<bool> {
        let mut bytes = 0u64;
        while bytes < byte_budget {
            match self.records.next() {
                Some(Ok(record)) => {
                    bytes += record.seq().len() as u64;
                    dst.push(Sequence::new(record.id(), record.seq(), b""));
                }
                Some(Err(e)) => {
                    return Err(io::Error::new(io::ErrorKind::InvalidData, e));
                }
                None => return Ok(false),
            }
        }
        Ok(true)
    }
}

struct FastqSource {
    path: String,
    records: fastq::Records<BufReader<Box<dyn Read>>>,
}

impl SequenceSource for FastqSource {
    fn reset(&mut self) -> io::Result<()> {
        self.records = fastq::Reader::new(open(&self.path)?).records();
        Ok(())
    }

    fn parse(&mut self, dst: &mut Vec<Sequence>, byte_budget: u64) -> io::Result<bool> {
        let mut bytes = 0u64;
        while bytes < byte_budget {
            match self.records.next() {
                Some(Ok(record)) => {
                    if record.seq().len() != record.qual().len() {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!(
                                "sequence {} has mismatched quality length",
                                record.id()
                            ),
                        ));
                    }
                    bytes += (record.seq().len() + record.qual().len()) as u64;
                    dst.push(Sequence::new(record.id(), record.seq(), record.qual()));
                }
                Some(Err(e)) => {
                    return Err(io::Error::new(io::ErrorKind::InvalidData, e));
                }
                None => return Ok(false),
            }
        }
        Ok(true)
    }
}

fn has_suffix(path: &str, suffixes: &[&str]) -> bool {
    suffixes.iter().any(|s| path.ends_with(s))
}

/// Picks a source by filename suffix (`.gz` is transparent).
pub fn create_sequence_source(path: &str) -> io::Result<Box<dyn SequenceSource>> {
    let stripped = path.strip_suffix(".gz").unwrap_or(path);
    if has_suffix(stripped, &[".fasta", ".fa", ".fna"]) {
        Ok(Box::new(FastaSource {
            path: path.to_string(),
            records: fasta::Reader::new(open(path)?).records(),
        }))
    } else if has_suffix(stripped, &[".fastq", ".fq"]) {
        Ok(Box::new(FastqSource {
            path: path.to_string(),
            records: fastq::Reader::new(open(path)?).records(),
        }))
    } else {
        Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "file {} has unsupported format extension (valid extensions: \
                 .fasta, .fa, .fna, .fastq, .fq, and their .gz variants)",
                path
            ),
        ))
    }
}
