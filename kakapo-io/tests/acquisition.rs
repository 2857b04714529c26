//! End-to-end runs over a synthetic acquisition directory.

use approx::assert_relative_eq;
use kakapo_core::{Calibration, FilenameSchema, SaveOptions, StoreFormat};
use kakapo_io::{
    read_volume, write_volume_tiff, DatasetIndex, Orchestrator, OutOfCoreConfig, RegionManifest,
    RegionOutcome, MANIFEST_NAME,
};
use ndarray::{Array3, Axis, Zip};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use zarrs::array::Array;
use zarrs::filesystem::FilesystemStore;

const SHAPE: (usize, usize, usize) = (3, 8, 12);

fn side_volume(region: usize, channel: usize, side: usize, t: usize) -> Array3<u16> {
    Array3::from_shape_fn(SHAPE, |(z, y, x)| {
        let wave = (x * (side + 1) + y * (2 - side) + z * 5) % 23;
        u16::try_from(region * 1_000 + channel * 100 + t * 10 + wave).unwrap()
    })
}

fn file_name(region: usize, channel: usize, side: usize, t: usize) -> String {
    format!("S0_t{t:04}_V0_R{region}_X00_Y00_C0{channel}_I{side}_K0_P0.tif")
}

/// Two regions, two channels, dual illumination. Region R1 side I1 misses its
/// last timepoint. Settings sidecars give R0 a 30 s interval.
fn acquisition() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let timepoints = [3, 4];
    for (region, &count) in timepoints.iter().enumerate() {
        for channel in 0..2 {
            for side in 0..2 {
                let count = if region == 1 && side == 1 { count - 1 } else { count };
                for t in 0..count {
                    write_volume_tiff(
                        &dir.path().join(file_name(region, channel, side, t)),
                        side_volume(region, channel, side, t).view(),
                        &Calibration::default(),
                    )
                    .unwrap();
                }
            }
        }
    }
    for (t, stamp) in [(0, "20240301_101500"), (2, "20240301_101600")] {
        fs::write(
            dir.path().join(format!("S0_t{t:04}_R0_C00_I0_Settings.txt")),
            format!("Date time stamp = {stamp}\n"),
        )
        .unwrap();
    }
    fs::write(
        dir.path().join("AcquisitionMetadata.txt"),
        "Objective\nName = 20x\n",
    )
    .unwrap();
    dir
}

fn orchestrator(dir: &Path, options: SaveOptions) -> Orchestrator {
    let index = DatasetIndex::open(dir, FilenameSchema::default()).unwrap();
    Orchestrator::new(
        index,
        options,
        OutOfCoreConfig::default().with_memory_budget_bytes(1 << 22),
    )
    .unwrap()
}

fn snapshot(dir: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    let mut files = BTreeMap::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in fs::read_dir(&current).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                pending.push(path);
            } else {
                files.insert(path.clone(), fs::read(&path).unwrap());
            }
        }
    }
    files
}

fn fused(region: usize, channel: usize, t: usize) -> Array3<u16> {
    Zip::from(&side_volume(region, channel, 0, t))
        .and(&side_volume(region, channel, 1, t))
        .map_collect(|&a, &b| a.max(b))
}

#[test]
fn test_full_run_writes_volumes_projections_and_manifest() {
    let dir = acquisition();
    let report = orchestrator(dir.path(), SaveOptions::default().with_stride(4))
        .run()
        .unwrap();
    assert_eq!(report.completed(), 2);
    assert!(report.is_success());

    let r0 = dir.path().join("R0_processed");
    let manifest = RegionManifest::load(&r0).unwrap().unwrap();
    assert_eq!(manifest.magnification, 20);
    assert_eq!(manifest.frame_interval_s, Some(30.0));
    assert_eq!(manifest.channels.len(), 2);
    assert_eq!(manifest.channels[0].volume_shape, Some([3, 3, 2, 3]));

    let store = Arc::new(FilesystemStore::new(r0.join("R0_C00_volume.zarr")).unwrap());
    let array = Array::open(store, "/").unwrap();
    assert_eq!(array.shape(), &[3, 3, 2, 3]);
    let chunk = array.retrieve_chunk_elements::<u16>(&[2, 0, 0, 0]).unwrap();
    let expected = kakapo_algorithms::decimate_zyx(fused(0, 0, 2).view(), 1, 4);
    assert_eq!(chunk.as_slice(), expected.as_slice().unwrap());
    let pixel = array.attributes()["pixel_size_um"].as_f64().unwrap();
    assert_relative_eq!(pixel, 1.28, epsilon = 1e-12);

    let projection = read_volume(r0.join("R0_C01_t0001_Max.tiff")).unwrap();
    let expected = kakapo_algorithms::max_projection(fused(0, 1, 1).view());
    assert_eq!(projection.index_axis(Axis(0), 0), expected);

    let r1 = RegionManifest::load(&dir.path().join("R1_processed"))
        .unwrap()
        .unwrap();
    assert_eq!(r1.frame_interval_s, None);
    assert_eq!(r1.channels[0].timepoints, 3);
    assert_eq!(r1.channels[0].dropped_timepoints, 1);
}

#[test]
fn test_second_run_skips_without_touching_output() {
    let dir = acquisition();
    orchestrator(dir.path(), SaveOptions::default()).run().unwrap();
    let before = snapshot(dir.path());

    let report = orchestrator(dir.path(), SaveOptions::default())
        .run()
        .unwrap();
    assert_eq!(report.skipped(), 2);
    assert_eq!(snapshot(dir.path()), before);
}

#[test]
fn test_interrupted_region_is_regenerated() {
    let dir = acquisition();
    let stale = dir.path().join("R0_processed");
    fs::create_dir_all(&stale).unwrap();
    fs::write(stale.join("R0_C00_t0000_Max.tiff"), b"partial").unwrap();

    let report = orchestrator(dir.path(), SaveOptions::default())
        .with_regions(["R0"])
        .run()
        .unwrap();
    assert!(matches!(
        report.regions[0].outcome,
        RegionOutcome::Completed(_)
    ));
    assert!(stale.join(MANIFEST_NAME).is_file());
    assert!(read_volume(stale.join("R0_C00_t0000_Max.tiff")).is_ok());
    assert!(!dir.path().join("R1_processed").exists());
}

#[test]
fn test_overwrite_recreates_region() {
    let dir = acquisition();
    orchestrator(dir.path(), SaveOptions::default())
        .with_regions(["R0"])
        .run()
        .unwrap();
    let marker = dir.path().join("R0_processed").join("leftover.txt");
    fs::write(&marker, b"old").unwrap();

    let options = SaveOptions::default()
        .with_overwrite(true)
        .with_projection(false)
        .with_format(StoreFormat::Zarr);
    let report = orchestrator(dir.path(), options)
        .with_regions(["R0"])
        .run()
        .unwrap();
    assert_eq!(report.completed(), 1);
    assert!(!marker.exists());
    assert!(!dir
        .path()
        .join("R0_processed")
        .join("R0_C00_t0000_Max.tiff")
        .exists());
    assert!(dir
        .path()
        .join("R0_processed")
        .join("R0_C00_volume.zarr")
        .is_dir());
}
