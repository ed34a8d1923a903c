//! Build script for sticker-transcoder
//!
//! Linking itself is handled by ffmpeg-sys-next. This script only checks
//! that the FFmpeg development libraries can be found, prints install hints
//! when they cannot, and copies FFmpeg DLLs next to the binary on Windows.

use std::env;
use std::path::{Path, PathBuf};

/// Libraries the pipeline touches: demux, decode, encode, mux and swscale.
const FFMPEG_LIBRARIES: [&str; 4] = ["libavcodec", "libavformat", "libavutil", "libswscale"];

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=FFMPEG_DIR");

    let target_os = env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();

    match locate_ffmpeg(&target_os) {
        Some(location) => {
            if target_os == "windows" {
                if let Err(e) = copy_ffmpeg_dlls(&location) {
                    println!("cargo:warning=Could not copy FFmpeg DLLs: {}", e);
                }
            }
        }
        None => print_install_hints(&target_os),
    }
}

/// Find an FFmpeg installation, preferring pkg-config, then `FFMPEG_DIR`,
/// then well-known per-platform prefixes.
fn locate_ffmpeg(target_os: &str) -> Option<PathBuf> {
    let via_pkg_config = FFMPEG_LIBRARIES
        .iter()
        .all(|lib| pkg_config::Config::new().cargo_metadata(false).probe(lib).is_ok());
    if via_pkg_config {
        return Some(PathBuf::new());
    }

    if let Ok(dir) = env::var("FFMPEG_DIR") {
        let path = PathBuf::from(dir);
        if path.join("include").exists() && path.join("lib").exists() {
            return Some(path);
        }
        println!(
            "cargo:warning=FFMPEG_DIR={} does not contain include/ and lib/",
            path.display()
        );
    }

    default_prefixes(target_os)
        .into_iter()
        .find(|prefix| prefix.join("include").join("libavcodec").exists())
}

fn default_prefixes(target_os: &str) -> Vec<PathBuf> {
    match target_os {
        "windows" => vec![
            PathBuf::from("C:\\ffmpeg"),
            PathBuf::from("C:\\Program Files\\ffmpeg"),
        ],
        "macos" => vec![PathBuf::from("/opt/homebrew"), PathBuf::from("/usr/local")],
        "linux" => vec![PathBuf::from("/usr"), PathBuf::from("/usr/local")],
        _ => vec![],
    }
}

fn print_install_hints(target_os: &str) {
    println!("cargo:warning=FFmpeg development libraries were not found");
    match target_os {
        "windows" => {
            println!("cargo:warning=  Download a shared build and set FFMPEG_DIR to its root");
        }
        "macos" => {
            println!("cargo:warning=  Run: brew install ffmpeg");
        }
        "linux" => {
            println!("cargo:warning=  Ubuntu/Debian: sudo apt install libavcodec-dev libavformat-dev libavutil-dev libswscale-dev");
            println!("cargo:warning=  Fedora: sudo dnf install ffmpeg-devel");
        }
        _ => {}
    }
    println!("cargo:warning=  H.264 output needs libx264; WebP output needs libwebp");
}

/// Copy FFmpeg DLLs into the target directory so the binary runs in place.
fn copy_ffmpeg_dlls(ffmpeg_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let bin_path = ffmpeg_path.join("bin");
    if !bin_path.exists() {
        return Ok(());
    }

    let out_dir = PathBuf::from(env::var("OUT_DIR")?);
    let target_dir = out_dir
        .ancestors()
        .nth(3)
        .ok_or("unexpected OUT_DIR layout")?;

    for pattern in ["avcodec-*.dll", "avformat-*.dll", "avutil-*.dll", "swscale-*.dll", "swresample-*.dll"] {
        let glob_pattern = bin_path.join(pattern).to_string_lossy().to_string();
        for dll_path in glob::glob(&glob_pattern)?.flatten() {
            if let Some(name) = dll_path.file_name() {
                let dest = target_dir.join(name);
                if !dest.exists() {
                    std::fs::copy(&dll_path, &dest)?;
                }
            }
        }
    }

    Ok(())
}
