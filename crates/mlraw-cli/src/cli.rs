use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mlraw")]
#[command(about = "Inspect, index and export raw camera clips")]
#[command(version)]
pub struct Cli {
    /// Path to a JSON clip options file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Decoded frames kept in memory
    #[arg(long, global = true)]
    pub cache_capacity: Option<usize>,

    /// Do not read or write `.mrx` sidecars
    #[arg(long, global = true)]
    pub no_sidecar: bool,

    /// Do not extract audio into a `.wav` side-file
    #[arg(long, global = true)]
    pub no_audio: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show clip geometry, levels and timing
    Info {
        /// Clip file or frame directory
        path: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Index every clip under a directory so later opens are instant
    Index {
        /// Directory to scan
        dir: PathBuf,

        /// Seconds to wait for each clip
        #[arg(long, default_value_t = 300)]
        timeout_secs: u64,
    },

    /// Write one frame to a file
    Dump {
        /// Clip file or frame directory
        path: PathBuf,

        /// Frame index
        #[arg(short, long, default_value_t = 0)]
        frame: usize,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,

        /// Output format
        #[arg(long, value_enum, default_value_t = DumpFormat::Raw)]
        format: DumpFormat,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum DumpFormat {
    /// Native-endian 16-bit samples, no header
    Raw,
    /// 16-bit grayscale PNG of the Bayer mosaic
    Png,
    /// 1/8 scale RGB preview PNG
    Thumb,
}
