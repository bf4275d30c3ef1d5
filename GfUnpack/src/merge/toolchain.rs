//! External image toolchain
//!
//! Pixel compositing is delegated to ImageMagick (`magick`), with optional
//! palette quantization through `pngquant`.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use crate::error::{Error, Result};

const MAGICK_HINT: &str = "install ImageMagick 7 and make sure `magick` is on PATH \
     (macOS: brew install imagemagick, Debian/Ubuntu: apt install imagemagick, \
     Windows: https://imagemagick.org/script/download.php)";

/// Operations the merge pipeline needs from an image tool.
///
/// Implementations must be callable from several worker threads at once.
pub trait ImageToolchain: Send + Sync {
    /// `true` if every pixel of `image` is fully opaque
    fn probe_opacity(&self, image: &Path) -> Result<bool>;

    /// Scale `src` to exactly `width` x `height`, writing `dest`
    fn resize_to_match(&self, src: &Path, width: u32, height: u32, dest: &Path) -> Result<()>;

    /// Write `base` with `mask` as its alpha channel to `dest`.
    ///
    /// A mask with its own alpha channel contributes that channel; an opaque
    /// mask contributes its luminance.
    fn copy_alpha(&self, base: &Path, mask: &Path, dest: &Path) -> Result<()>;

    /// Quantize `image` in place
    fn quantize(&self, image: &Path) -> Result<()>;

    /// Whether [`quantize`](Self::quantize) is available
    fn can_quantize(&self) -> bool {
        true
    }
}

/// [`ImageToolchain`] backed by the `magick` and `pngquant` executables
#[derive(Debug, Clone)]
pub struct MagickToolchain {
    magick: PathBuf,
    pngquant: Option<PathBuf>,
}

impl MagickToolchain {
    /// Find the tools on PATH, failing before any work is done.
    ///
    /// A missing `pngquant` only disables quantization.
    ///
    /// # Errors
    /// Returns [`Error::ToolchainMissing`] if `magick` cannot be run.
    pub fn locate(want_pngquant: bool) -> Result<Self> {
        let magick = PathBuf::from("magick");
        if !responds(&magick, "-version") {
            return Err(Error::ToolchainMissing {
                tool: "magick".to_string(),
                hint: MAGICK_HINT.to_string(),
            });
        }

        let pngquant = if want_pngquant {
            let path = PathBuf::from("pngquant");
            if responds(&path, "--version") {
                Some(path)
            } else {
                tracing::warn!("pngquant not found, outputs will not be quantized");
                None
            }
        } else {
            None
        };

        Ok(Self { magick, pngquant })
    }

    /// Use explicit executable paths without probing them
    #[must_use]
    pub fn with_paths(magick: impl Into<PathBuf>, pngquant: Option<PathBuf>) -> Self {
        Self {
            magick: magick.into(),
            pngquant,
        }
    }

    fn run<I, S>(&self, program: &Path, args: I) -> Result<Output>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let tool = program.to_string_lossy().to_string();
        let output = Command::new(program).args(args).output().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::ToolchainMissing {
                    tool: tool.clone(),
                    hint: MAGICK_HINT.to_string(),
                }
            } else {
                Error::Io(e)
            }
        })?;

        if !output.status.success() {
            return Err(Error::ExternalToolFailure {
                tool,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output)
    }
}

fn responds(program: &Path, arg: &str) -> bool {
    Command::new(program)
        .arg(arg)
        .output()
        .is_ok_and(|output| output.status.success())
}

impl ImageToolchain for MagickToolchain {
    fn probe_opacity(&self, image: &Path) -> Result<bool> {
        let output = self.run(
            &self.magick,
            [OsStr::new("identify"), OsStr::new("-format"), OsStr::new("%[opaque]"), image.as_os_str()],
        )?;
        let answer = String::from_utf8_lossy(&output.stdout);
        Ok(answer.trim().eq_ignore_ascii_case("true"))
    }

    fn resize_to_match(&self, src: &Path, width: u32, height: u32, dest: &Path) -> Result<()> {
        let geometry = format!("{width}x{height}!");
        self.run(
            &self.magick,
            [src.as_os_str(), OsStr::new("-resize"), OsStr::new(&geometry), dest.as_os_str()],
        )?;
        Ok(())
    }

    fn copy_alpha(&self, base: &Path, mask: &Path, dest: &Path) -> Result<()> {
        self.run(
            &self.magick,
            [
                base.as_os_str(),
                mask.as_os_str(),
                OsStr::new("-compose"),
                OsStr::new("copy-opacity"),
                OsStr::new("-composite"),
                dest.as_os_str(),
            ],
        )?;
        Ok(())
    }

    fn quantize(&self, image: &Path) -> Result<()> {
        let Some(pngquant) = &self.pngquant else {
            return Ok(());
        };
        self.run(
            pngquant,
            [
                OsStr::new("--force"),
                OsStr::new("--strip"),
                OsStr::new("--ext"),
                OsStr::new(".fs8.png"),
                image.as_os_str(),
            ],
        )?;

        // pngquant writes `name.fs8.png` next to `name.png`
        let quantized = image.with_extension("fs8.png");
        std::fs::rename(&quantized, image)?;
        Ok(())
    }

    fn can_quantize(&self) -> bool {
        self.pngquant.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_executable_is_toolchain_missing() {
        let toolchain = MagickToolchain::with_paths("/nonexistent/gfunpack-magick", None);
        let err = toolchain.probe_opacity(Path::new("x.png")).unwrap_err();
        assert!(matches!(err, Error::ToolchainMissing { .. }));
        assert!(!toolchain.can_quantize());
    }

    #[test]
    fn test_quantize_without_pngquant_is_noop() {
        let toolchain = MagickToolchain::with_paths("magick", None);
        toolchain.quantize(Path::new("does-not-matter.png")).unwrap();
    }
}
