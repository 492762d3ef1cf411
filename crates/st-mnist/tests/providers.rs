use st_mnist::idx::{encode_images, encode_labels};
use st_mnist::{
    datasets, read_data_sets, DatasetProvider, MnistNumber, MnistOptions, RotationCache,
};
use tempfile::tempdir;

fn write_split(dir: &std::path::Path, images: &str, labels: &str, digits: &[u8]) {
    let pixels: Vec<f32> = digits
        .iter()
        .flat_map(|&d| {
            let v = d as f32 / 10.0;
            [v, 0.0, 0.0, v]
        })
        .collect();
    std::fs::write(dir.join(images), encode_images(digits.len(), 2, 2, &pixels)).unwrap();
    std::fs::write(dir.join(labels), encode_labels(digits)).unwrap();
}

#[test]
fn per_digit_provider_serves_only_that_digit() {
    let dir = tempdir().unwrap();
    write_split(
        dir.path(),
        datasets::TRAIN_IMAGES,
        datasets::TRAIN_LABELS,
        &[0, 1, 2, 1, 0, 2, 2, 0, 1, 2],
    );
    write_split(
        dir.path(),
        datasets::TEST_IMAGES,
        datasets::TEST_LABELS,
        &[2, 0, 1],
    );

    let mnist = read_data_sets(dir.path(), 2, Some(11)).unwrap();
    let mut twos = MnistNumber::new(2, &mnist, MnistOptions::default()).unwrap();
    assert_eq!(twos.num_examples(), 4);

    let (images, labels) = DatasetProvider::next_batch(&mut twos, 6).unwrap();
    assert_eq!(images.shape(), (6, 4));
    assert!(labels.iter().all(|&l| l == 2));
    for row in images.data().chunks(4) {
        assert!((row[0] - 51.0 / 255.0).abs() < 1e-6);
    }

    let cache = RotationCache::new(dir.path().join("rotations"));
    twos.rotate(90, &cache).unwrap();
    assert!(cache.path(2, 90).exists());
    assert_eq!(twos.num_examples(), 4);
}

#[test]
fn blacklist_filtering_preserves_order() {
    let dir = tempdir().unwrap();
    write_split(
        dir.path(),
        datasets::TRAIN_IMAGES,
        datasets::TRAIN_LABELS,
        &[0, 1, 2, 1, 0],
    );
    write_split(dir.path(), datasets::TEST_IMAGES, datasets::TEST_LABELS, &[0]);
    let mnist = read_data_sets(dir.path(), 0, None).unwrap();
    let filtered = mnist.train.filter_labels(&[1]);
    assert_eq!(filtered.labels(), vec![0, 2, 0]);
    assert!(filtered.shares_buffer_with(&mnist.train));
}
