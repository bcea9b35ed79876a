//! mlraw - command line tools for raw camera clips
//!
//! `info` prints a clip summary, `index` pre-builds frame indexes for a
//! whole tree, `dump` writes one frame out.

mod cli;

use anyhow::{bail, Context, Result};
use clap::Parser;
use cli::{Cli, Commands, DumpFormat};
use image::{ImageBuffer, Luma, RgbImage};
use mlraw_media::{ClipInfo, ClipOptions, RawClip};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, EnvFilter};
use walkdir::WalkDir;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "mlraw=debug,mlraw_media=debug,mlraw_core=debug"
    } else {
        "mlraw=info,mlraw_media=warn,mlraw_core=warn"
    };
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let options = load_options(&cli)?;
    match cli.command {
        Commands::Info { path, json } => cmd_info(&path, options, json),
        Commands::Index { dir, timeout_secs } => {
            cmd_index(&dir, options, Duration::from_secs(timeout_secs))
        }
        Commands::Dump {
            path,
            frame,
            output,
            format,
        } => cmd_dump(&path, options, frame, &output, format),
    }
}

/// Options from `--config` (or defaults) with flag overrides applied.
fn load_options(cli: &Cli) -> Result<ClipOptions> {
    let mut options = match &cli.config {
        Some(path) => ClipOptions::from_json_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => ClipOptions::default(),
    };
    if let Some(capacity) = cli.cache_capacity {
        options.cache_capacity = capacity;
    }
    if cli.no_sidecar {
        options.sidecar = false;
    }
    if cli.no_audio {
        options.extract_audio = false;
    }
    options.validate()?;
    Ok(options)
}

fn cmd_info(path: &Path, options: ClipOptions, json: bool) -> Result<()> {
    let clip = RawClip::open_with(path, options)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let info = clip.info();
    let side = if clip.frames() > 0 {
        clip.frame(0)?.side_data().cloned()
    } else {
        None
    };

    if json {
        let mut value = serde_json::to_value(&info)?;
        if let (Some(side), Some(map)) = (side, value.as_object_mut()) {
            map.insert("first_frame".into(), serde_json::to_value(side)?);
        }
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        print_info(&info);
        if let Some(side) = side {
            if let Some(rtc) = &side.rtc {
                println!("Recorded:   {}", rtc.datetime_string());
            }
            if let Some(exposure) = &side.exposure {
                println!("ISO:        {}", exposure.iso);
            }
            if let Some(lens) = &side.lens {
                println!("Lens:       {}", lens.name);
            }
            if let Some(wb) = &side.white_balance {
                println!("WB:         {} K", wb.kelvin);
            }
        }
    }
    clip.close();
    Ok(())
}

fn print_info(info: &ClipInfo) {
    println!("Path:       {}", info.path);
    println!("Container:  {}", info.kind);
    println!("Size:       {}x{}", info.width, info.height);
    println!(
        "Frames:     {} ({:.2}s at {})",
        info.frame_count,
        info.duration_seconds(),
        info.fps
    );
    if info.audio_frame_count > 0 {
        println!("Audio:      {} blocks", info.audio_frame_count);
    }
    println!("Bits:       {}", info.bits_per_sample);
    println!("Levels:     {}..{}", info.black_level, info.white_level);
    println!(
        "Crop:       {}x{} at {},{}",
        info.crop.width, info.crop.height, info.crop.x, info.crop.y
    );
    println!("Indexed:    {:.0}%", info.indexing_status * 100.0);
    if let Some(sidecar) = &info.sidecar {
        println!("Sidecar:    {}", sidecar);
    }
}

/// First file of every clip series under `dir`.
///
/// Continuation chunks (`.M00`, `.R00`, ...) are opened through their first
/// file and are skipped here.
fn series_heads(dir: &Path) -> Vec<PathBuf> {
    let mut heads: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            p.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.eq_ignore_ascii_case("mlv") || ext.eq_ignore_ascii_case("raw"))
                .unwrap_or(false)
        })
        .collect();
    heads.sort();
    heads
}

fn cmd_index(dir: &Path, options: ClipOptions, timeout: Duration) -> Result<()> {
    if !dir.is_dir() {
        bail!("Not a directory: {}", dir.display());
    }
    if !options.sidecar {
        warn!("Sidecars disabled, index results will not be kept");
    }

    let heads = series_heads(dir);
    info!(dir = %dir.display(), clips = heads.len(), "Indexing clips");

    let mut indexed = 0usize;
    let mut failed = 0usize;
    for path in &heads {
        let started = Instant::now();
        let clip = match RawClip::open_with(path, options.clone()) {
            Ok(clip) => clip,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping clip");
                failed += 1;
                continue;
            }
        };
        if clip.wait_indexed(timeout) {
            indexed += 1;
            println!(
                "{}  {} frames  {:.1}s",
                path.display(),
                clip.frames(),
                started.elapsed().as_secs_f32()
            );
        } else {
            failed += 1;
            warn!(
                path = %path.display(),
                status = clip.indexing_status(),
                "Indexing timed out"
            );
        }
        clip.close();
    }

    info!(indexed, failed, "Indexing finished");
    if failed > 0 {
        bail!("{} of {} clips could not be indexed", failed, heads.len());
    }
    Ok(())
}

fn cmd_dump(
    path: &Path,
    options: ClipOptions,
    index: usize,
    output: &Path,
    format: DumpFormat,
) -> Result<()> {
    let clip = RawClip::open_with(path, options)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let frame = clip.frame(index)?;
    if frame.is_black() {
        warn!(frame = index, "Frame could not be read, writing black");
    }

    match format {
        DumpFormat::Raw => {
            let bytes = frame
                .raw_bytes()
                .context("Frame has no raw samples (demosaiced source)")?;
            std::fs::write(output, bytes)
                .with_context(|| format!("Failed to write {}", output.display()))?;
        }
        DumpFormat::Png => {
            let samples = frame
                .convert()
                .context("Frame has no raw samples (demosaiced source)")?;
            let image: ImageBuffer<Luma<u16>, Vec<u16>> =
                ImageBuffer::from_raw(frame.width(), frame.height(), samples.to_vec())
                    .context("Sample count does not match frame size")?;
            image
                .save(output)
                .with_context(|| format!("Failed to write {}", output.display()))?;
        }
        DumpFormat::Thumb => {
            let thumb = frame.thumb().context("Frame too small for a preview")?;
            let image = RgbImage::from_raw(thumb.width, thumb.height, thumb.rgb)
                .context("Preview size mismatch")?;
            image
                .save(output)
                .with_context(|| format!("Failed to write {}", output.display()))?;
        }
    }

    debug!(frame = index, output = %output.display(), ?format, "Frame written");
    println!("Wrote frame {} to {}", index, output.display());
    clip.close();
    Ok(())
}
