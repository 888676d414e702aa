use clap::{Parser, Subcommand};
use splatconv_lib::{convert, format_bytes, model_info, read, Format, ReadOptions};
use std::fs;
use std::path::Path;
use std::process;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(
    name = "splatconv",
    version,
    about = "Converts Gaussian splat files between ply, compressed.ply, splat, ksplat, spz and sog"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert a splat file; formats are taken from the file extensions.
    Convert {
        #[arg(short = 'i', long = "input", value_name = "INPUT")]
        input: String,

        #[arg(short = 'o', long = "output", value_name = "OUTPUT")]
        output: String,

        #[arg(
            long = "strict",
            help = "Treat validation warnings as errors and scan for non-finite values."
        )]
        strict: bool,
    },
    /// Print a summary of a splat file.
    Info {
        #[arg(short = 'i', long = "input", value_name = "INPUT")]
        input: String,
    },
}

fn format_for(path: &str) -> Format {
    match Format::from_path(path) {
        Some(format) => format,
        None => {
            eprintln!("Unsupported file extension: {}", path);
            process::exit(1);
        }
    }
}

fn read_input(path: &str) -> Vec<u8> {
    match fs::read(Path::new(path)) {
        Ok(data) => data,
        Err(e) => {
            eprintln!("Error reading input file '{}': {}", path, e);
            process::exit(1);
        }
    }
}

fn run_convert(input: &str, output: &str, strict: bool) {
    let from = format_for(input);
    let to = format_for(output);
    let data = read_input(input);

    println!("Input File: {}", input);
    println!("Output File: {}", output);

    let start_time = Instant::now();
    let outcome = match convert(&data, from.extension(), to.extension(), strict) {
        Ok(outcome) => outcome,
        Err(e) => {
            eprintln!("Conversion failed: {}", e);
            process::exit(1);
        }
    };
    let duration = start_time.elapsed();

    if let Some(warning) = &outcome.warning {
        eprintln!("Warning: {}", warning);
    }

    if let Err(e) = fs::write(output, &outcome.bytes) {
        eprintln!("Error writing output file '{}': {}", output, e);
        process::exit(1);
    }

    println!("Conversion Time: {} ms", duration.as_millis());
    println!(
        "Successfully wrote {} ({}).",
        output,
        format_bytes(outcome.bytes.len())
    );
}

fn run_info(input: &str) {
    let format = format_for(input);
    let data = read_input(input);

    let outcome = match read(&data, format.extension(), &ReadOptions::default()) {
        Ok(outcome) => outcome,
        Err(e) => {
            eprintln!("Read failed: {}", e);
            process::exit(1);
        }
    };
    if let Some(warning) = &outcome.warning {
        eprintln!("Warning: {}", warning);
    }

    let info = model_info(&outcome.cloud, data.len());

    println!("Basic Info:");
    println!("  Points:          {}", info.num_points);
    println!("  File Size:       {}", format_bytes(info.file_size));
    if !info.source_format.is_empty() {
        println!("  Source Format:   {}", info.source_format);
    }
    println!("  SH Degree:       {}", info.sh_degree);
    if info.antialiased {
        println!("  Antialiased:     yes");
    }
    println!("  Handedness:      {}", info.handedness.as_str());
    println!("  Up Axis:         {}", info.up_axis.as_str());
    println!("  Unit:            {}", info.unit.as_str());
    println!("  Color Space:     {}", info.color_space.as_str());

    if info.num_points > 0 {
        println!("Bounding Box:");
        println!("  X:  [{}, {}]", info.bounds.min_x, info.bounds.max_x);
        println!("  Y:  [{}, {}]", info.bounds.min_y, info.bounds.max_y);
        println!("  Z:  [{}, {}]", info.bounds.min_z, info.bounds.max_z);
    }

    if info.scale_stats.count > 0 {
        println!("Scales (log):");
        println!("  Min:  {}", info.scale_stats.min);
        println!("  Max:  {}", info.scale_stats.max);
        println!("  Avg:  {}", info.scale_stats.avg);
    }
    if info.alpha_stats.count > 0 {
        println!("Alphas (logit):");
        println!("  Min:  {}", info.alpha_stats.min);
        println!("  Max:  {}", info.alpha_stats.max);
        println!("  Avg:  {}", info.alpha_stats.avg);
    }

    println!("Data Sizes:");
    println!("  Positions:       {}", format_bytes(info.positions_size));
    println!("  Scales:          {}", format_bytes(info.scales_size));
    println!("  Rotations:       {}", format_bytes(info.rotations_size));
    println!("  Alphas:          {}", format_bytes(info.alphas_size));
    println!("  Colors:          {}", format_bytes(info.colors_size));
    println!("  SH:              {}", format_bytes(info.sh_size));
    for (name, size) in &info.extra_attrs {
        println!("  Extra {:<10} {}", name, format_bytes(*size));
    }
    println!("  Total:           {}", format_bytes(info.total_size));
}

fn main() {
    let cli = Cli::parse();
    match cli.command {
        Command::Convert {
            input,
            output,
            strict,
        } => run_convert(&input, &output, strict),
        Command::Info { input } => run_info(&input),
    }
}
