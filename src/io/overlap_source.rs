// Line-oriented overlap sources for the MHAP, PAF and SAM flavours.
//
// All three formats share one reader shape: decode gzip by suffix, walk the
// file line by line within a byte budget, and turn each record line into a
// normalised `Overlap`. SAM headers and unmapped records are skipped.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};

use flate2::read::MultiGzDecoder;

use crate::overlap::Overlap;

pub trait OverlapSource {
    /// Rewinds to the first record.
    fn reset(&mut self) -> io::Result<()>;
    /// Appends records to `dst` until roughly `byte_budget` bytes of input
    /// have been consumed. Returns `true` while more input remains.
    fn parse(&mut self, dst: &mut Vec<Overlap>, byte_budget: u64) -> io::Result<bool>;
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Flavor {
    Mhap,
    Paf,
    Sam,
}

struct TextOverlapSource {
    path: String,
    flavor: Flavor,
    reader: BufReader<Box<dyn Read>>,
}

fn open(path: &str) -> io::Result<BufReader<Box<dyn Read>>> {
    let file = File::open(path)?;
    let reader: Box<dyn Read> = if path.ends_with(".gz") {
        Box::new(MultiGzDecoder::new(file))
    } else {
        Box::new(file)
    };
    Ok(BufReader::new(reader))
}

fn malformed(flavor: &str, line: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("malformed {} record: {}", flavor, line.trim_end()),
    )
}

fn field_u32(fields: &[&str], index: usize, flavor: &str, line: &str) -> io::Result<u32> {
    fields
        .get(index)
        .and_then(|f| f.parse::<u32>().ok())
        .ok_or_else(|| malformed(flavor, line))
}

fn field_u64(fields: &[&str], index: usize, flavor: &str, line: &str) -> io::Result<u64> {
    fields
        .get(index)
        .and_then(|f| f.parse::<u64>().ok())
        .ok_or_else(|| malformed(flavor, line))
}

fn parse_mhap(line: &str) -> io::Result<Overlap> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 12 {
        return Err(malformed("MHAP", line));
    }
    Ok(Overlap::from_mhap(
        field_u64(&fields, 0, "MHAP", line)?,
        field_u64(&fields, 1, "MHAP", line)?,
        field_u32(&fields, 4, "MHAP", line)?,
        field_u32(&fields, 5, "MHAP", line)?,
        field_u32(&fields, 6, "MHAP", line)?,
        field_u32(&fields, 7, "MHAP", line)?,
        field_u32(&fields, 8, "MHAP", line)?,
        field_u32(&fields, 9, "MHAP", line)?,
        field_u32(&fields, 10, "MHAP", line)?,
        field_u32(&fields, 11, "MHAP", line)?,
    ))
}

fn parse_paf(line: &str) -> io::Result<Overlap> {
    let fields: Vec<&str> = line.trim_end().split('\t').collect();
    if fields.len() < 12 {
        return Err(malformed("PAF", line));
    }
    let reverse = match fields[4] {
        "+" => false,
        "-" => true,
        _ => return Err(malformed("PAF", line)),
    };
    let cigar = fields[12..]
        .iter()
        .find_map(|f| f.strip_prefix("cg:Z:"))
        .unwrap_or("")
        .to_string();
    Ok(Overlap::from_paf(
        fields[0],
        field_u32(&fields, 1, "PAF", line)?,
        field_u32(&fields, 2, "PAF", line)?,
        field_u32(&fields, 3, "PAF", line)?,
        reverse,
        fields[5],
        field_u32(&fields, 6, "PAF", line)?,
        field_u32(&fields, 7, "PAF", line)?,
        field_u32(&fields, 8, "PAF", line)?,
        cigar,
    ))
}

/// Returns `None` for records that are not usable overlaps (unmapped or
/// missing an alignment).
fn parse_sam(line: &str) -> io::Result<Option<Overlap>> {
    let fields: Vec<&str> = line.trim_end().split('\t').collect();
    if fields.len() < 11 {
        return Err(malformed("SAM", line));
    }
    let flag = field_u32(&fields, 1, "SAM", line)?;
    if flag & 0x4 != 0 || fields[2] == "*" || fields[5] == "*" {
        return Ok(None);
    }
    let pos = field_u32(&fields, 3, "SAM", line)?;
    if pos == 0 {
        return Ok(None);
    }
    Ok(Some(Overlap::from_sam(
        fields[0],
        flag,
        fields[2],
        pos - 1,
        fields[5],
    )))
}

impl OverlapSource for TextOverlapSource {
    fn reset(&mut self) -> io::Result<()> {
        self.reader = open(&self.path)?;
        Ok(())
    }

    fn parse(&mut self, dst: &mut Vec<Overlap>, byte_budget: u64) -> io::Result<bool> {
        let mut bytes = 0u64;
        let mut line = String::new();
        while bytes < byte_budget {
            line.clear();
            let read = self.reader.read_line(&mut line)?;
            if read == 0 {
                return Ok(false);
            }
            bytes += read as u64;
            if line.trim().is_empty() {
                continue;
            }
            match self.flavor {
                Flavor::Mhap => dst.push(parse_mhap(&line)?),
                Flavor::Paf => dst.push(parse_paf(&line)?),
                Flavor::Sam => {
                    if line.starts_with('@') {
                        continue;
                    }
                    if let Some(overlap) = parse_sam(&line)? {
                        dst.push(overlap);
                    }
                }
            }
        }
        Ok(true)
    }
}

/// Picks a source by filename suffix (`.gz` is transparent).
pub fn create_overlap_source(path: &str) -> io::Result<Box<dyn OverlapSource>> {
    let stripped = path.strip_suffix(".gz").unwrap_or(path);
    let flavor = if stripped.ends_with(".mhap") {
        Flavor::Mhap
    } else if stripped.ends_with(".paf") {
        Flavor::Paf
    } else if stripped.ends_with(".sam") {
        Flavor::Sam
    } else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "file {} has unsupported format extension (valid extensions: \
                 .mhap, .paf, .sam, and their .gz variants)",
                path
            ),
        ));
    };
    Ok(Box::new(TextOverlapSource {
        path: path.to_string(),
        flavor,
        reader: open(path)?,
    }))
}
