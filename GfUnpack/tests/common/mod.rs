//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use gfunpack::bundle::{BundleWriter, ImageKind};
use gfunpack::config::ExtractConfig;
use gfunpack::merge::ImageToolchain;
use gfunpack::{Error, Result};
use image::imageops::FilterType;
use image::{GrayImage, Rgba, RgbaImage};

/// In-process toolchain that counts calls and tracks overlap
#[derive(Default)]
pub struct RecordingToolchain {
    merges: AtomicUsize,
    resizes: AtomicUsize,
    probes: AtomicUsize,
    current: AtomicUsize,
    peak: AtomicUsize,
    delay: Duration,
}

impl RecordingToolchain {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every `copy_alpha` take at least `delay`
    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Self::default()
        })
    }

    /// `copy_alpha` plus `resize_to_match` calls
    pub fn merge_calls(&self) -> usize {
        self.merges.load(Ordering::SeqCst) + self.resizes.load(Ordering::SeqCst)
    }

    pub fn copy_alpha_calls(&self) -> usize {
        self.merges.load(Ordering::SeqCst)
    }

    pub fn resize_calls(&self) -> usize {
        self.resizes.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.merges.store(0, Ordering::SeqCst);
        self.resizes.store(0, Ordering::SeqCst);
        self.probes.store(0, Ordering::SeqCst);
        self.peak.store(0, Ordering::SeqCst);
    }
}

fn open_rgba(path: &Path) -> Result<RgbaImage> {
    image::open(path)
        .map(|img| img.to_rgba8())
        .map_err(|e| Error::ImageEncode {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

fn save(image: &RgbaImage, path: &Path) -> Result<()> {
    image.save(path).map_err(|e| Error::ImageEncode {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

impl ImageToolchain for RecordingToolchain {
    fn probe_opacity(&self, image: &Path) -> Result<bool> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        Ok(open_rgba(image)?.pixels().all(|p| p.0[3] == u8::MAX))
    }

    fn resize_to_match(&self, src: &Path, width: u32, height: u32, dest: &Path) -> Result<()> {
        self.resizes.fetch_add(1, Ordering::SeqCst);
        let resized = image::imageops::resize(&open_rgba(src)?, width, height, FilterType::Nearest);
        save(&resized, dest)
    }

    fn copy_alpha(&self, base: &Path, mask: &Path, dest: &Path) -> Result<()> {
        self.merges.fetch_add(1, Ordering::SeqCst);
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(self.delay);

        let result = (|| {
            let mut base = open_rgba(base)?;
            let mask_img = open_rgba(mask)?;
            if base.dimensions() != mask_img.dimensions() {
                return Err(Error::ImageEncode {
                    path: mask.to_path_buf(),
                    message: "mask size differs from base".to_string(),
                });
            }
            let has_alpha = mask_img.pixels().any(|p| p.0[3] < u8::MAX);
            let luma: GrayImage = image::DynamicImage::ImageRgba8(mask_img.clone()).to_luma8();
            for (x, y, pixel) in base.enumerate_pixels_mut() {
                pixel.0[3] = if has_alpha {
                    mask_img.get_pixel(x, y).0[3]
                } else {
                    luma.get_pixel(x, y).0[0]
                };
            }
            save(&base, dest)
        })();

        self.current.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn quantize(&self, _image: &Path) -> Result<()> {
        Ok(())
    }
}

/// Opaque solid color image
pub fn solid(width: u32, height: u32, value: u8) -> RgbaImage {
    RgbaImage::from_pixel(width, height, Rgba([value, value / 2, 200, 255]))
}

/// Opaque grayscale mask: left half black, right half white
pub fn split_mask(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, _| {
        let v = if x < width / 2 { 0 } else { 255 };
        Rgba([v, v, v, 255])
    })
}

/// Write a bundle of Texture2D objects
pub fn write_bundle(dir: &Path, name: &str, objects: &[(i64, &str, &RgbaImage)]) {
    let mut writer = BundleWriter::new();
    for (path_id, object, image) in objects {
        writer.add_image(ImageKind::Texture2D, *path_id, *object, "", image);
    }
    writer.write_file(dir.join(format!("{name}.ab"))).unwrap();
}

/// Bundle dir, output dir and config for one test workspace
pub struct Workspace {
    pub root: tempfile::TempDir,
    pub bundles: PathBuf,
    pub output: PathBuf,
}

impl Workspace {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let bundles = root.path().join("bundles");
        let output = root.path().join("images");
        std::fs::create_dir_all(&bundles).unwrap();
        Self { root, bundles, output }
    }

    pub fn config(&self, workers: usize) -> ExtractConfig {
        ExtractConfig {
            workers,
            index_path: Some(self.root.path().join("image.db")),
            ..ExtractConfig::default()
        }
    }

    pub fn output_image(&self, relative: &str) -> RgbaImage {
        image::open(self.output.join(relative)).unwrap().to_rgba8()
    }
}

pub fn has_transparency(image: &RgbaImage) -> bool {
    image.pixels().any(|p| p.0[3] < u8::MAX)
}
