use std::time::Duration;

use image::{GrayImage, Luma, Rgb, RgbImage};
use tiled_segmenter::segmenter::color_ops::{intensity_reference, to_gray_rgb};
use tiled_segmenter::segmenter::io::ImageSaver;
use tiled_segmenter::segmenter::oracle::OracleError;
use tiled_segmenter::segmenter::postprocess::max_size_from_fraction;
use tiled_segmenter::{
    CancelToken, FilterBounds, RawMaskProposal, RunConfig, ThresholdOracle, centroids,
    extract_tiles, partition, postprocess, rasterize, run_segmentation, segment_tiled, spawn_run,
    stitch,
};

/// One 200x250 rectangle at (50, 25) in every image it is given
fn rectangle_oracle(image: &RgbImage) -> Result<Vec<RawMaskProposal>, OracleError> {
    let (width, height) = image.dimensions();
    let mut segmentation = GrayImage::new(width, height);
    for y in 25..275 {
        for x in 50..250 {
            segmentation.put_pixel(x, y, Luma([255]));
        }
    }
    Ok(vec![RawMaskProposal {
        segmentation,
        area: 50_000,
        bbox: [50, 25, 200, 250],
        predicted_iou: 0.98,
        point_coords: vec![[150.0, 150.0]],
        stability_score: 0.95,
        crop_box: [0, 0, width, height],
    }])
}

fn gray_image() -> RgbImage {
    RgbImage::from_pixel(800, 600, Rgb([200, 200, 200]))
}

const EXPECTED_CENTROIDS: [(u32, u32); 4] = [(149, 149), (549, 149), (149, 449), (549, 449)];

#[test]
fn four_tiles_stitch_filter_and_locate() {
    let image = gray_image();
    let (grid, _) = partition(600, 800, 4, false).unwrap();
    let tiles = extract_tiles(&to_gray_rgb(&image), &grid).unwrap();
    assert!(tiles.iter().all(|tile| tile.dimensions() == (400, 300)));

    let mut oracle = rectangle_oracle;
    let mut progress = Vec::new();
    let per_tile = segment_tiled(&mut oracle, tiles, false)
        .run_to_end(|step| progress.push(step.percent))
        .unwrap();
    assert_eq!(progress, vec![22.5, 45.0, 67.5, 90.0]);

    let records = stitch(per_tile, 600, 800).unwrap();
    assert_eq!(records.len(), 4);
    assert!(records.iter().all(|r| r.segmentation.dimensions() == (800, 600)));

    let labels = rasterize(&records).unwrap().unwrap();
    assert_eq!(labels.get_pixel(149, 149)[0], 1);
    assert_eq!(labels.get_pixel(549, 449)[0], 4);
    assert_eq!(labels.get_pixel(0, 0)[0], 0);

    let bounds = FilterBounds {
        min_size: 100,
        max_size: max_size_from_fraction(0.25, 600, 800),
        min_intensity: 10,
    };
    let reference = intensity_reference(&image);
    let (filtered, kept) = postprocess(&records, &reference, bounds).unwrap();
    assert_eq!(kept.len(), 4);
    for (id, (x, y)) in EXPECTED_CENTROIDS.iter().enumerate() {
        assert_eq!(filtered.get_pixel(*x, *y)[0], id as u32 + 1);
    }

    let (points_image, points) = centroids(&kept).unwrap();
    assert_eq!(points, EXPECTED_CENTROIDS);
    for (x, y) in points {
        assert_eq!(points_image.get_pixel(x, y)[0], 255);
    }
}

#[test]
fn postprocessing_run_reports_progress_and_count_error() {
    let image = gray_image();
    let config = RunConfig {
        cell_count: 4,
        postprocess: true,
        max_size_fraction: 0.25,
        expected_count: Some(5),
        ..RunConfig::default()
    };
    let state = tiled_segmenter::segmenter::runner::SharedRunState::new();
    let mut oracle = rectangle_oracle;
    let report = run_segmentation(&image, &mut oracle, &config, &state, &CancelToken::new());

    assert!(report.succeeded(), "{:?}", report.failure);
    assert!(report.warnings.is_empty());
    assert_eq!(state.progress(), 100.0);
    assert_eq!(report.object_count, Some(4));
    let error = report.count_error.unwrap();
    assert_eq!(error.absolute, 1);
    assert_eq!(error.relative_percent, 20.0);
    assert_eq!(report.final_points(), EXPECTED_CENTROIDS);
    let raw = report.raw.as_ref().unwrap();
    assert_eq!(raw.records.len(), 4);
    assert!(raw.labels.is_some());
    let processed = report.processed.as_ref().unwrap();
    assert!(processed.labels.is_some());
    assert!(processed.filtered_labels.is_some());
}

#[test]
fn default_size_bound_rejects_large_masks() {
    let image = gray_image();
    let config = RunConfig {
        cell_count: 4,
        postprocess: true,
        ..RunConfig::default()
    };
    let state = tiled_segmenter::segmenter::runner::SharedRunState::new();
    let mut oracle = rectangle_oracle;
    let report = run_segmentation(&image, &mut oracle, &config, &state, &CancelToken::new());

    // 0.0015 of 800x600 is 720 pixels, far below each 50000 pixel mask
    assert_eq!(report.object_count, Some(0));
    let processed = report.processed.as_ref().unwrap();
    assert!(processed.records.is_empty());
    assert!(processed.labels.is_none());
    assert!(processed.filtered_labels.is_some());
    let message = report.failure.unwrap().to_string();
    assert!(message.starts_with("centroid extraction failed"), "{message}");
}

#[test]
fn failing_oracle_keeps_partial_outputs() {
    let image = gray_image();
    let mut calls = 0;
    let mut oracle = |tile: &RgbImage| -> Result<Vec<RawMaskProposal>, OracleError> {
        calls += 1;
        if calls == 2 {
            return Err("device lost".into());
        }
        rectangle_oracle(tile)
    };
    let config = RunConfig {
        cell_count: 4,
        show_sectors: true,
        ..RunConfig::default()
    };
    let state = tiled_segmenter::segmenter::runner::SharedRunState::new();
    let report = run_segmentation(&image, &mut oracle, &config, &state, &CancelToken::new());

    assert!(report.sectors.is_some());
    assert!(report.raw.is_none());
    let message = report.failure.unwrap().to_string();
    assert!(message.contains("tile 2/4"), "{message}");
    assert!(message.contains("device lost"), "{message}");
    assert_eq!(state.progress(), 22.5);
}

#[test]
fn worker_thread_finishes_and_poller_drains_images() {
    let mut image = RgbImage::new(200, 200);
    for (x, y) in [(40, 40), (140, 40), (40, 140), (140, 140)] {
        for dy in 0..30 {
            for dx in 0..30 {
                image.put_pixel(x + dx, y + dy, Rgb([230, 230, 230]));
            }
        }
    }
    let config = RunConfig {
        cell_count: 4,
        postprocess: true,
        max_size_fraction: 0.1,
        ..RunConfig::default()
    };
    let handle = spawn_run(image, ThresholdOracle::new(128, 0), config).unwrap();
    let mut last_progress = 0.0;
    let mut images = 0;
    let report = handle.wait(Duration::from_millis(1), |update| {
        assert!(update.progress >= last_progress);
        last_progress = update.progress;
        if update.image.is_some() {
            images += 1;
        }
    });

    assert!(report.succeeded(), "{:?}", report.failure);
    assert_eq!(last_progress, 100.0);
    assert!(images >= 1);
    assert_eq!(report.object_count, Some(4));
    let mut points = report.final_points().to_vec();
    points.sort();
    assert_eq!(points, vec![(54, 54), (54, 154), (154, 54), (154, 154)]);
}

#[test]
fn exports_land_next_to_the_input() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("tank.png");
    let image = gray_image();
    image.save(&input).unwrap();

    let loaded = tiled_segmenter::segmenter::io::open_image(&input).unwrap();
    assert_eq!(loaded.dimensions(), (800, 600));

    let state = tiled_segmenter::segmenter::runner::SharedRunState::new();
    let mut oracle = rectangle_oracle;
    let config = RunConfig {
        cell_count: 4,
        ..RunConfig::default()
    };
    let report = run_segmentation(&loaded, &mut oracle, &config, &state, &CancelToken::new());
    let raw = report.raw.unwrap();

    let saver = ImageSaver::for_input(&input);
    let labels_path = saver
        .save_label_image_as(raw.labels.as_ref().unwrap(), "labels")
        .unwrap();
    assert_eq!(labels_path, dir.path().join("tank-labels.png"));
    let points_path = saver.save_points_csv(&raw.points, "points").unwrap();
    let csv = std::fs::read_to_string(points_path).unwrap();
    assert_eq!(csv.lines().count(), 5);
    assert_eq!(csv.lines().nth(1), Some("149,149"));
}
