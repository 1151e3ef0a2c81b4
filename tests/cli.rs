//! Exit status of the command line

use std::process::Command;

fn banknote_cnn() -> Command {
    Command::new(env!("CARGO_BIN_EXE_banknote-cnn"))
}

#[test]
fn test_stats_on_missing_directory_fails() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("no_photos_here");

    let output = banknote_cnn().arg("stats").arg("--img-dir").arg(&missing).output().unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Path not found"));
}

#[test]
fn test_stats_on_class_directories_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    for class in ["100", "1000"] {
        let class_dir = dir.path().join(class);
        std::fs::create_dir(&class_dir).unwrap();
        image::RgbImage::from_pixel(4, 4, image::Rgb([1, 2, 3]))
            .save(class_dir.join("a.png"))
            .unwrap();
    }

    let output = banknote_cnn().arg("stats").arg("--img-dir").arg(dir.path()).output().unwrap();
    assert!(output.status.success());
}

#[test]
fn test_summary_accepts_odd_image_size() {
    let output = banknote_cnn()
        .args(["summary", "--img-size", "100", "--num-classes", "5"])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("10816"));
}
