use clap::Parser;
use imgdiff::diff_buffer::InsertionDeletionMode;
use imgdiff::scanline::Algorithm;
use imgdiff::{ImgDiffBuffer, set_up_logger};
use log::info;
use serde::Serialize;
use std::path::PathBuf;
use std::process::exit;

#[derive(Copy, Clone, clap::ValueEnum)]
enum AlgorithmArg {
    Myers,
    Minimal,
    Patience,
    Histogram,
    None,
}

#[derive(Copy, Clone, clap::ValueEnum)]
enum InsertionDeletionArg {
    None,
    Vertical,
    Horizontal,
}

#[derive(clap::Parser)]
struct Args {
    /// First image.
    image1: PathBuf,

    /// Second image.
    image2: PathBuf,

    /// Optional third image for a three-way comparison.
    image3: Option<PathBuf>,

    /// Where to write the composed diff image.
    #[arg(short, long, default_value = "diff.png")]
    output: PathBuf,

    /// Comparison granularity in pixels.
    #[arg(long, default_value_t = 8)]
    block_size: u32,

    /// Color distance under which two pixels count as equal.
    #[arg(long, default_value_t = 0.0)]
    threshold: f64,

    /// Scanline diff algorithm for insertion/deletion detection.
    #[arg(long, value_enum, default_value_t = AlgorithmArg::Myers)]
    algorithm: AlgorithmArg,

    /// Detect inserted or deleted scanline bands before comparing.
    #[arg(long, value_enum, default_value_t = InsertionDeletionArg::None)]
    insertion_deletion: InsertionDeletionArg,

    /// Print the diff report as JSON instead of plain text.
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct Report<'a> {
    diff_count: i32,
    conflict_count: i32,
    regions: Vec<&'a imgdiff::diff_buffer::DiffInfo>,
}

fn main() -> anyhow::Result<()> {
    set_up_logger();
    let args = Args::parse();

    let mut buffer = ImgDiffBuffer::new();
    buffer.set_diff_block_size(args.block_size);
    buffer.set_color_distance_threshold(args.threshold);
    buffer.set_diff_algorithm(match args.algorithm {
        AlgorithmArg::Myers => Algorithm::Myers,
        AlgorithmArg::Minimal => Algorithm::Minimal,
        AlgorithmArg::Patience => Algorithm::Patience,
        AlgorithmArg::Histogram => Algorithm::Histogram,
        AlgorithmArg::None => Algorithm::None,
    });
    buffer.set_insertion_deletion_mode(match args.insertion_deletion {
        InsertionDeletionArg::None => InsertionDeletionMode::None,
        InsertionDeletionArg::Vertical => InsertionDeletionMode::Vertical,
        InsertionDeletionArg::Horizontal => InsertionDeletionMode::Horizontal,
    });

    let mut paths = vec![args.image1, args.image2];
    paths.extend(args.image3);
    buffer.open_images(&paths)?;
    buffer.compare_images();

    let diff_count = buffer.diff_count();
    buffer.save_diff_image_as(1, &args.output)?;
    info!(
        "{} differing regions, diff image written to {}",
        diff_count,
        args.output.display()
    );

    if args.json {
        let report = Report {
            diff_count,
            conflict_count: buffer.conflict_count(),
            regions: (0..diff_count).filter_map(|i| buffer.diff_info(i)).collect(),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for i in 0..diff_count {
            if let Some(info) = buffer.diff_info(i) {
                let r = info.rect;
                println!(
                    "#{i}: {:?} blocks ({}, {})-({}, {})",
                    info.op, r.left, r.top, r.right, r.bottom
                );
            }
        }
    }

    if diff_count > 0 {
        exit(1);
    }
    Ok(())
}
