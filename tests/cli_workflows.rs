//! Runs the `pixkit` binary against files in a temporary directory

#![cfg(feature = "cli")]

use image::{DynamicImage, GrayImage, ImageFormat, Luma, Rgb, RgbImage};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

fn pixkit(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_pixkit"))
        .args(args)
        .output()
        .expect("Failed to execute pixkit")
}

fn path_arg(path: &Path) -> &str {
    path.to_str().expect("temp paths are UTF-8")
}

fn write_photo(path: &Path, width: u32, height: u32) {
    // RGB so the same helper can write JPEG
    let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([255, 136, 0])));
    image
        .save_with_format(path, ImageFormat::from_path(path).unwrap_or(ImageFormat::Png))
        .expect("Failed to write test image");
}

#[test]
fn test_remove_bg_writes_suffixed_png() {
    let dir = TempDir::new().unwrap();
    let photo = dir.path().join("portrait.png");
    let mask = dir.path().join("mask.png");
    write_photo(&photo, 20, 10);
    DynamicImage::ImageLuma8(GrayImage::from_pixel(5, 5, Luma([255])))
        .save(&mask)
        .unwrap();

    let output = pixkit(&[
        "remove-bg",
        "--mask",
        path_arg(&mask),
        "--threshold",
        "0.5",
        path_arg(&photo),
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let result = image::open(dir.path().join("portrait-no-bg.png")).unwrap();
    assert_eq!((result.width(), result.height()), (20, 10));
}

#[test]
fn test_remove_bg_without_threshold_is_a_usage_error() {
    let output = pixkit(&["remove-bg", "--mask", "mask.png", "photo.png"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("--threshold"));
}

#[test]
fn test_batch_resize_into_output_directory() {
    let dir = TempDir::new().unwrap();
    let inputs = dir.path().join("in");
    let out = dir.path().join("out");
    std::fs::create_dir(&inputs).unwrap();
    for name in ["b.png", "a.png", "c.jpg"] {
        write_photo(&inputs.join(name), 40, 20);
    }

    let output = pixkit(&[
        "resize",
        "--width",
        "10",
        "--keep-aspect",
        "--pattern",
        "*.png",
        "-o",
        path_arg(&out),
        path_arg(&inputs),
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let mut written: Vec<PathBuf> = std::fs::read_dir(&out)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    written.sort();
    assert_eq!(
        written,
        vec![out.join("a-resized-10x5.png"), out.join("b-resized-10x5.png")]
    );
}

#[test]
fn test_batch_continues_after_a_bad_file() {
    let dir = TempDir::new().unwrap();
    write_photo(&dir.path().join("good.png"), 4, 4);
    std::fs::write(dir.path().join("broken.png"), b"not really a png").unwrap();

    let output = pixkit(&["compress", path_arg(dir.path())]);
    assert!(!output.status.success());
    assert!(dir.path().join("good-compressed.png").exists());
    assert!(String::from_utf8_lossy(&output.stderr).contains("different image"));
}

#[test]
fn test_pick_color_prints_all_notations() {
    let dir = TempDir::new().unwrap();
    let photo = dir.path().join("orange.png");
    write_photo(&photo, 3, 3);

    let output = pixkit(&[
        "pick-color",
        "--x",
        "1",
        "--y",
        "1",
        "--swatch",
        path_arg(dir.path()),
        path_arg(&photo),
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("#FF8800"));
    assert!(stdout.contains("rgb(255, 136, 0)"));
    assert!(stdout.contains("hsl(32, 100%, 50%)"));
    assert!(dir.path().join("FF8800-sample.png").exists());
}

#[test]
fn test_convert_to_jpeg_with_explicit_output() {
    let dir = TempDir::new().unwrap();
    let photo = dir.path().join("logo.png");
    let target = dir.path().join("logo-final.jpg");
    write_photo(&photo, 8, 8);

    let output = pixkit(&[
        "convert",
        "--format",
        "jpeg",
        "--quality",
        "75",
        "-o",
        path_arg(&target),
        path_arg(&photo),
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let bytes = std::fs::read(&target).unwrap();
    assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Jpeg);
}

#[test]
fn test_convert_to_jpeg_names_output_converted() {
    let dir = TempDir::new().unwrap();
    let photo = dir.path().join("logo.png");
    write_photo(&photo, 4, 4);

    let output = pixkit(&["convert", "--format", "jpeg", path_arg(&photo)]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    assert!(dir.path().join("logo-converted.jpg").exists());
    assert!(!dir.path().join("logo-flattened.jpg").exists());
}

#[test]
fn test_pick_color_refuses_directory_with_several_images() {
    let dir = TempDir::new().unwrap();
    write_photo(&dir.path().join("a.png"), 2, 2);
    write_photo(&dir.path().join("b.png"), 2, 2);

    let output = pixkit(&["pick-color", "--x", "0", "--y", "0", path_arg(dir.path())]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("exactly one image"));
}

#[test]
fn test_images_to_pdf_into_output_directory() {
    let dir = TempDir::new().unwrap();
    let scans = dir.path().join("scans");
    let out = dir.path().join("out");
    std::fs::create_dir(&scans).unwrap();
    std::fs::create_dir(&out).unwrap();
    for (name, (w, h)) in [("p1.png", (40, 60)), ("p2.jpg", (1200, 900)), ("p3.png", (10, 10))] {
        write_photo(&scans.join(name), w, h);
    }

    let output = pixkit(&["images-to-pdf", "-o", path_arg(&out), path_arg(&scans)]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let pdf = lopdf::Document::load(out.join("images.pdf")).unwrap();
    assert_eq!(pdf.get_pages().len(), 3);
}

#[test]
fn test_images_to_pdf_to_stdout() {
    let dir = TempDir::new().unwrap();
    let photo = dir.path().join("only.png");
    write_photo(&photo, 3, 3);

    let output = pixkit(&["images-to-pdf", "-o", "-", path_arg(&photo)]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let pdf = lopdf::Document::load_mem(&output.stdout).unwrap();
    assert_eq!(pdf.get_pages().len(), 1);
}
