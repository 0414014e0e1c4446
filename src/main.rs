use clap::Parser;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use ferrous_polish::polish_opt::{PolishOpt, PolisherKind};
use ferrous_polish::polisher::Polisher;
use ferrous_polish::sequence::Sequence;

#[derive(Parser)]
#[command(name = "ferrous-polish")]
#[command(about = "Consensus polishing of long noisy reads using windowed partial-order alignment", long_about = None)]
#[command(version)]
struct Cli {
    /// Input FASTA/FASTQ file with query sequences (may be gzipped)
    #[arg(value_name = "SEQUENCES")]
    sequences: PathBuf,

    /// Input MHAP/PAF/SAM file with overlaps between queries and targets
    #[arg(value_name = "OVERLAPS")]
    overlaps: PathBuf,

    /// Input FASTA/FASTQ file with target sequences to polish
    #[arg(value_name = "TARGET")]
    target: PathBuf,

    /// Keep targets none of whose windows received a layer
    #[arg(short = 'u', long)]
    include_unpolished: bool,

    /// Correct read fragments instead of polishing contigs
    #[arg(short = 'f', long)]
    fragment_correction: bool,

    /// Length of the windows the targets are split into
    #[arg(short = 'w', long, value_name = "INT", default_value = "500")]
    window_length: u32,

    /// Fraction of the window length by which adjacent windows overlap;
    /// a nonzero value turns on overlap stitching
    #[arg(long, value_name = "FLOAT", default_value = "0.0")]
    overlap_percentage: f64,

    /// Mean base quality below which a layer is not used
    #[arg(short = 'q', long, value_name = "FLOAT", default_value = "10.0")]
    quality_threshold: f64,

    /// Approximate alignment error above which an overlap is dropped
    #[arg(short = 'e', long, value_name = "FLOAT", default_value = "0.3")]
    error_threshold: f64,

    /// Keep low-coverage consensus flanks
    #[arg(long)]
    no_trimming: bool,

    /// Score for matching bases
    #[arg(short = 'm', long = "match", value_name = "INT", default_value = "3")]
    match_score: i8,

    /// Score for mismatching bases
    #[arg(
        short = 'x',
        long,
        value_name = "INT",
        default_value = "-5",
        allow_hyphen_values = true
    )]
    mismatch: i8,

    /// Gap penalty, must be negative
    #[arg(
        short = 'g',
        long,
        value_name = "INT",
        default_value = "-4",
        allow_hyphen_values = true
    )]
    gap: i8,

    /// Number of threads (default: all available cores)
    #[arg(short = 't', long, value_name = "INT")]
    threads: Option<usize>,

    /// Output FASTA file (default: stdout)
    #[arg(short = 'o', long, value_name = "FILE")]
    output: Option<PathBuf>,
}

fn write_fasta(records: &[Sequence], output: Option<&Path>) -> io::Result<()> {
    let mut writer: Box<dyn Write> = match output {
        Some(path) => Box::new(io::BufWriter::new(File::create(path)?)),
        None => Box::new(io::BufWriter::new(io::stdout())),
    };
    for record in records {
        writer.write_all(b">")?;
        writer.write_all(record.name().as_bytes())?;
        writer.write_all(b"\n")?;
        writer.write_all(record.data())?;
        writer.write_all(b"\n")?;
    }
    writer.flush()
}

fn main() {
    let cli = Cli::parse();

    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_timestamp(None)
        .format_target(false)
        .init();

    let num_threads = cli.threads.unwrap_or_else(num_cpus::get).max(1);
    let opt = PolishOpt {
        kind: if cli.fragment_correction {
            PolisherKind::Fragment
        } else {
            PolisherKind::Contig
        },
        window_length: cli.window_length,
        overlap_percentage: cli.overlap_percentage,
        quality_threshold: cli.quality_threshold,
        error_threshold: cli.error_threshold,
        match_score: cli.match_score,
        mismatch_score: cli.mismatch,
        gap_score: cli.gap,
        trim: !cli.no_trimming,
        num_threads,
    };

    log::info!("using {} threads", num_threads);

    let mut polisher = match Polisher::new(
        &cli.sequences.to_string_lossy(),
        &cli.overlaps.to_string_lossy(),
        &cli.target.to_string_lossy(),
        opt,
    ) {
        Ok(polisher) => polisher,
        Err(e) => {
            log::error!("{}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = polisher.initialize() {
        log::error!("{}", e);
        std::process::exit(1);
    }

    let mut polished = Vec::new();
    polisher.polish(&mut polished, !cli.include_unpolished);

    if let Err(e) = write_fasta(&polished, cli.output.as_deref()) {
        log::error!("error writing output: {}", e);
        std::process::exit(1);
    }
}
