use std::fs;
use std::path::Path;
use std::process::Command;

use st_mnist::datasets;
use st_mnist::idx::{encode_images, encode_labels};
use tempfile::tempdir;

#[derive(serde::Deserialize)]
struct DiskTensor {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

fn write_split(dir: &Path, images: &str, labels: &str, digits: &[u8]) {
    let pixels: Vec<f32> = digits
        .iter()
        .flat_map(|&d| {
            let v = d as f32 / 10.0;
            [v, 1.0 - v, v, 0.0]
        })
        .collect();
    fs::write(dir.join(images), encode_images(digits.len(), 2, 2, &pixels)).unwrap();
    fs::write(dir.join(labels), encode_labels(digits)).unwrap();
}

fn run_cli(config_root: &Path, args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_st-vae-cli"))
        .arg("--config-root")
        .arg(config_root)
        .args(args)
        .env_remove("VAE_TRACE_CHROME")
        .output()
        .unwrap()
}

const MODEL: &[&str] = &[
    "--latent-size",
    "2",
    "--batch-size",
    "2",
    "--encoder",
    "4",
    "--decoder",
    "4",
    "--seed",
    "5",
];

#[test]
fn train_generate_and_reconstruct_share_a_checkpoint() {
    let dir = tempdir().unwrap();
    let data = dir.path().join("mnist");
    let base = dir.path().join("run");
    let config_root = dir.path().join("config");
    fs::create_dir_all(&data).unwrap();
    fs::create_dir_all(&config_root).unwrap();
    write_split(
        &data,
        datasets::TRAIN_IMAGES,
        datasets::TRAIN_LABELS,
        &[0, 1, 2, 1, 0, 2, 2, 0, 1, 2],
    );
    write_split(&data, datasets::TEST_IMAGES, datasets::TEST_LABELS, &[2, 0, 2]);
    let data = data.to_str().unwrap();
    let base = base.to_str().unwrap();

    let mut train = vec![
        "train",
        "--data-dir",
        data,
        "--digit",
        "2",
        "--validation-size",
        "2",
        "--epochs",
        "2",
        "--base-dir",
        base,
    ];
    train.extend_from_slice(MODEL);
    let out = run_cli(&config_root, &train);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let models: Vec<_> = fs::read_dir(Path::new(base).join("models"))
        .unwrap()
        .map(|entry| entry.unwrap().file_name().into_string().unwrap())
        .collect();
    assert_eq!(models, vec!["vae0_elu_enc4_dec4_learningrate0.001_latentsize2.ckpt"]);

    let generated = dir.path().join("generated.json");
    let mut generate = vec![
        "generate",
        "--input-size",
        "4",
        "--base-dir",
        base,
        "--output",
        generated.to_str().unwrap(),
    ];
    generate.extend_from_slice(MODEL);
    let out = run_cli(&config_root, &generate);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let images: DiskTensor =
        serde_json::from_str(&fs::read_to_string(&generated).unwrap()).unwrap();
    assert_eq!((images.rows, images.cols), (2, 4));
    assert!(images.data.iter().all(|&p| p > 0.0 && p < 1.0));

    let report_path = dir.path().join("report.json");
    let mut reconstruct = vec![
        "reconstruct",
        "--data-dir",
        data,
        "--digit",
        "2",
        "--validation-size",
        "2",
        "--base-dir",
        base,
        "--output",
        report_path.to_str().unwrap(),
    ];
    reconstruct.extend_from_slice(MODEL);
    let out = run_cli(&config_root, &reconstruct);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let report: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&report_path).unwrap()).unwrap();
    assert_eq!(
        report["model"],
        "vae0_elu_enc4_dec4_learningrate0.001_latentsize2"
    );
    assert_eq!(report["cost"].as_array().unwrap().len(), 2);
    assert!(report["cost_mean"].as_f64().unwrap().is_finite());
}

#[test]
fn generate_without_checkpoint_fails() {
    let dir = tempdir().unwrap();
    let mut args = vec![
        "generate",
        "--input-size",
        "4",
        "--base-dir",
        dir.path().to_str().unwrap(),
        "--output",
        "unused.json",
    ];
    args.extend_from_slice(MODEL);
    let out = run_cli(dir.path(), &args);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("no checkpoint"));
}

#[test]
fn config_sections_feed_the_model() {
    let dir = tempdir().unwrap();
    fs::write(
        dir.path().join("base.toml"),
        "[vae]\nactivation = \"swish\"\n",
    )
    .unwrap();
    let out = run_cli(
        dir.path(),
        &[
            "generate",
            "--base-dir",
            dir.path().to_str().unwrap(),
            "--output",
            "unused.json",
        ],
    );
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("swish"));
}
