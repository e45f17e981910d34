//! End-to-end remap jobs over filesystem stores.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use remap_engine::{
    remap_dataset, EngineConfig, FunctionRegistry, RemapError, RemapJob, RemapMode, Transform,
    UnitOutcome,
};
use test_utils::{
    assert_bits_eq, create_temperature_cube, create_test_cube, open_test_array, read_test_array,
    read_test_elements, write_test_array, write_test_array_typed,
};
use zarrs::array::{DataType, FillValue};

fn rename(name: &str) -> Transform {
    Transform::Rename(name.to_string())
}

fn function(id: &str, params: &[&str]) -> Transform {
    Transform::Function {
        function: id.to_string(),
        params: params.iter().map(|p| p.to_string()).collect(),
    }
}

fn job(source: &Path, destination: PathBuf, variables: Vec<(&str, Transform)>) -> RemapJob {
    RemapJob {
        source: source.to_path_buf(),
        destination,
        chunks_per_rank: BTreeMap::new(),
        variables: variables
            .into_iter()
            .map(|(name, t)| (name.to_string(), t))
            .collect(),
        zoom: None,
    }
}

fn config(scratch: &Path, threshold: u64) -> EngineConfig {
    EngineConfig {
        workers: 3,
        staging_threshold_elements: threshold,
        staging_last_axis_factor: 2,
        scratch_dir: scratch.to_path_buf(),
        ..EngineConfig::default()
    }
}

/// Every file below `root`, keyed by relative path.
fn store_files(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    fn walk(root: &Path, dir: &Path, files: &mut BTreeMap<PathBuf, Vec<u8>>) {
        for entry in std::fs::read_dir(dir).expect("Failed to list store") {
            let path = entry.expect("Failed to read entry").path();
            if path.is_dir() {
                walk(root, &path, files);
            } else {
                let rel = path.strip_prefix(root).expect("outside root").to_path_buf();
                files.insert(rel, std::fs::read(&path).expect("Failed to read file"));
            }
        }
    }
    let mut files = BTreeMap::new();
    walk(root, root, &mut files);
    files
}

/// Source store with two float inputs chunked along time only.
fn time_chunked_source() -> tempfile::TempDir {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let shape = [8, 256];
    write_test_array(
        dir.path(),
        "tisr",
        &shape,
        &[8, 16],
        &create_temperature_cube(&shape),
        &["time", "cell"],
    )
    .expect("Failed to write tisr");
    write_test_array(
        dir.path(),
        "tsr",
        &shape,
        &[8, 16],
        &create_test_cube(&shape),
        &["time", "cell"],
    )
    .expect("Failed to write tsr");
    dir
}

#[test]
fn test_staged_output_matches_direct() {
    let source = time_chunked_source();
    let work = tempfile::tempdir().expect("Failed to create temp dir");
    let scratch = work.path().join("scratch");

    let variables = || {
        vec![
            ("rsut", function("difference", &["tisr", "tsr"])),
            ("tsr", rename("tsr")),
        ]
    };
    let mut direct_job = job(source.path(), work.path().join("direct"), variables());
    direct_job.chunks_per_rank.insert(2, vec![2, 64]);
    let mut staged_job = job(source.path(), work.path().join("staged"), variables());
    staged_job.chunks_per_rank.insert(2, vec![2, 64]);

    let registry = FunctionRegistry::with_builtins();
    let direct = remap_dataset(&direct_job, &config(&scratch, u64::MAX), &registry)
        .expect("Direct job failed");
    let staged = remap_dataset(&staged_job, &config(&scratch, 1), &registry)
        .expect("Staged job failed");

    assert!(direct.is_success());
    assert!(staged.is_success());
    assert!(direct
        .outcomes()
        .iter()
        .all(|o| matches!(o, UnitOutcome::Done { mode: RemapMode::Direct, .. })));
    assert!(staged
        .outcomes()
        .iter()
        .all(|o| matches!(o, UnitOutcome::Done { mode: RemapMode::Staged, .. })));

    for name in ["rsut", "tsr"] {
        let a = read_test_array(&direct_job.destination, name).unwrap();
        let b = read_test_array(&staged_job.destination, name).unwrap();
        assert_bits_eq!(&a, &b);
    }
    assert_eq!(
        store_files(&direct_job.destination),
        store_files(&staged_job.destination)
    );

    // Every scratch store was removed again.
    let leftovers = std::fs::read_dir(&scratch)
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(leftovers, 0);
}

#[test]
fn test_remapped_values() {
    let source = time_chunked_source();
    let work = tempfile::tempdir().expect("Failed to create temp dir");
    let mut job = job(
        source.path(),
        work.path().join("out"),
        vec![("rsut", function("difference", &["tisr", "tsr"]))],
    );
    job.chunks_per_rank.insert(2, vec![4, 32]);
    job.zoom = Some(2);

    let report = remap_dataset(
        &job,
        &config(&work.path().join("scratch"), 1 << 20),
        &FunctionRegistry::with_builtins(),
    )
    .unwrap();
    // Units step by [8, 32]: one along time, eight along cells.
    assert_eq!(report.summary("rsut").map(|s| s.done), Some(8));

    let shape = [8, 256];
    let expected: Vec<f32> = create_temperature_cube(&shape)
        .iter()
        .zip(create_test_cube(&shape))
        .map(|(a, b)| a - b)
        .collect();
    assert_bits_eq!(&read_test_array(&job.destination, "rsut").unwrap(), &expected);
    assert!(job.destination.join("crs").join("zarr.json").is_file());
}

#[test]
fn test_rerun_is_idempotent() {
    let source = time_chunked_source();
    let work = tempfile::tempdir().expect("Failed to create temp dir");
    let mut job = job(
        source.path(),
        work.path().join("out"),
        vec![("rsut", function("difference", &["tisr", "tsr"]))],
    );
    job.chunks_per_rank.insert(2, vec![2, 64]);
    let config = config(&work.path().join("scratch"), 1);
    let registry = FunctionRegistry::with_builtins();

    remap_dataset(&job, &config, &registry).unwrap();
    let first = store_files(&job.destination);
    remap_dataset(&job, &config, &registry).unwrap();
    let second = store_files(&job.destination);

    assert!(!first.is_empty());
    assert_eq!(first, second);
}

#[test]
fn test_integer_rename_keeps_type() {
    let source = tempfile::tempdir().expect("Failed to create temp dir");
    let mask: Vec<i32> = (0..24).map(|i| i % 3).collect();
    write_test_array_typed(
        source.path(),
        "lsm",
        &[24],
        &[5],
        DataType::Int32,
        FillValue::from(-1i32),
        &mask,
        &["cell"],
    )
    .unwrap();
    let work = tempfile::tempdir().expect("Failed to create temp dir");
    let mut job = job(source.path(), work.path().join("out"), vec![("sftlf", rename("lsm"))]);
    job.chunks_per_rank.insert(1, vec![8]);

    let report = remap_dataset(
        &job,
        &config(&work.path().join("scratch"), 1),
        &FunctionRegistry::new(),
    )
    .unwrap();
    assert!(report.is_success());
    assert_eq!(read_test_elements::<i32>(&job.destination, "sftlf").unwrap(), mask);
}

#[test]
fn test_unit_failure_is_isolated() {
    let source = tempfile::tempdir().expect("Failed to create temp dir");
    let shape = [10, 8];
    write_test_array(
        source.path(),
        "tas",
        &shape,
        &[1, 8],
        &create_test_cube(&shape),
        &["time", "cell"],
    )
    .unwrap();

    let mut registry = FunctionRegistry::with_builtins();
    registry.register("fragile", |inputs, out| {
        // Time step 5 starts at flat index 40.
        if inputs[0][0] == 40.0 {
            return Err(RemapError::read_failed("corrupt chunk"));
        }
        out.copy_from_slice(inputs[0]);
        Ok(())
    });

    let work = tempfile::tempdir().expect("Failed to create temp dir");
    let job = job(
        source.path(),
        work.path().join("out"),
        vec![("bad", function("fragile", &["tas"])), ("good", rename("tas"))],
    );
    let report = remap_dataset(&job, &config(&work.path().join("scratch"), 1 << 20), &registry)
        .expect("Failures must not abort the job");

    assert!(!report.is_success());
    let bad = report.summary("bad").unwrap();
    assert_eq!((bad.done, bad.failed), (9, 1));
    assert_eq!(report.summary("good").unwrap().failed, 0);

    let failures: Vec<&UnitOutcome> = report.failures().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].output_name(), "bad");
    assert_eq!(failures[0].region(), &[5..6, 0..8]);
    match failures[0] {
        UnitOutcome::Failed { reason, .. } => assert!(reason.contains("corrupt chunk")),
        other => panic!("unexpected outcome {other:?}"),
    }

    let written = read_test_array(&job.destination, "bad").unwrap();
    for (i, value) in written.iter().enumerate() {
        if (40..48).contains(&i) {
            assert!(value.is_nan(), "failed region must stay unwritten");
        } else {
            assert_eq!(*value, i as f32);
        }
    }
}

#[test]
fn test_panicking_transform_is_contained() {
    let source = tempfile::tempdir().expect("Failed to create temp dir");
    write_test_array(
        source.path(),
        "pr",
        &[4, 4],
        &[1, 4],
        &create_test_cube(&[4, 4]),
        &["time", "cell"],
    )
    .unwrap();

    let mut registry = FunctionRegistry::new();
    registry.register("explode", |inputs, out| {
        if inputs[0][0] == 0.0 {
            panic!("division by zero in first block");
        }
        out.copy_from_slice(inputs[0]);
        Ok(())
    });

    let work = tempfile::tempdir().expect("Failed to create temp dir");
    let job = job(
        source.path(),
        work.path().join("out"),
        vec![("pr", function("explode", &["pr"]))],
    );
    let report = remap_dataset(&job, &config(&work.path().join("scratch"), 1), &registry).unwrap();

    let summary = report.summary("pr").unwrap();
    assert_eq!((summary.done, summary.failed), (3, 1));
}

#[test]
fn test_rank_four_is_rejected_before_writing() {
    let source = tempfile::tempdir().expect("Failed to create temp dir");
    let shape = [2, 2, 2, 8];
    write_test_array(
        source.path(),
        "ta",
        &shape,
        &[1, 1, 2, 8],
        &create_test_cube(&shape),
        &["time", "member", "level", "cell"],
    )
    .unwrap();
    write_test_array(
        source.path(),
        "tas",
        &[2, 8],
        &[1, 8],
        &create_test_cube(&[2, 8]),
        &["time", "cell"],
    )
    .unwrap();

    let work = tempfile::tempdir().expect("Failed to create temp dir");
    let destination = work.path().join("out");
    let job = job(
        source.path(),
        destination.clone(),
        vec![("ta", rename("ta")), ("tas", rename("tas"))],
    );
    let err = remap_dataset(
        &job,
        &config(&work.path().join("scratch"), 1 << 20),
        &FunctionRegistry::new(),
    )
    .unwrap_err();

    assert!(matches!(err, RemapError::UnsupportedRank { rank: 4 }));
    assert!(err.is_configuration());
    assert!(!destination.exists(), "nothing may be written");
}

#[test]
fn test_unknown_variable_fails_before_dispatch() {
    let source = time_chunked_source();
    let work = tempfile::tempdir().expect("Failed to create temp dir");
    let destination = work.path().join("out");
    let job = job(
        source.path(),
        destination.clone(),
        vec![
            ("tsr", rename("tsr")),
            ("rlut", function("difference", &["tisr", "ttr"])),
        ],
    );
    let err = remap_dataset(
        &job,
        &config(&work.path().join("scratch"), 1 << 20),
        &FunctionRegistry::with_builtins(),
    )
    .unwrap_err();

    assert!(matches!(
        err,
        RemapError::UnknownVariable { ref output, ref variable } if output == "rlut" && variable == "ttr"
    ));
    assert!(!destination.exists());
}

#[test]
fn test_staged_rank_three_across_input_grids() {
    // Two inputs with different chunkings: one split by level, one by time.
    let source = tempfile::tempdir().expect("Failed to create temp dir");
    let shape = [8, 3, 192];
    write_test_array(
        source.path(),
        "ta",
        &shape,
        &[4, 1, 32],
        &create_temperature_cube(&shape),
        &["time", "level", "cell"],
    )
    .unwrap();
    write_test_array(
        source.path(),
        "hus",
        &shape,
        &[1, 3, 96],
        &create_test_cube(&shape),
        &["time", "level", "cell"],
    )
    .unwrap();

    let work = tempfile::tempdir().expect("Failed to create temp dir");
    let scratch = work.path().join("scratch");
    let variables = || {
        vec![
            ("tv", function("sum", &["ta", "hus"])),
            ("ta", rename("ta")),
        ]
    };
    let mut direct_job = job(source.path(), work.path().join("direct"), variables());
    direct_job.chunks_per_rank.insert(3, vec![2, 3, 24]);
    let mut staged_job = job(source.path(), work.path().join("staged"), variables());
    staged_job.chunks_per_rank.insert(3, vec![2, 3, 24]);

    let registry = FunctionRegistry::with_builtins();
    let direct = remap_dataset(&direct_job, &config(&scratch, u64::MAX), &registry)
        .expect("Direct job failed");
    let staged = remap_dataset(&staged_job, &config(&scratch, 1), &registry)
        .expect("Staged job failed");

    assert!(direct.is_success());
    assert!(staged.is_success());
    // Units step by [4, 3, 96], giving 2 x 1 x 2 units per variable.
    assert_eq!(staged.summary("tv").map(|s| s.done), Some(4));
    assert!(staged
        .outcomes()
        .iter()
        .all(|o| matches!(o, UnitOutcome::Done { mode: RemapMode::Staged, .. })));

    for name in ["tv", "ta"] {
        let a = read_test_array(&direct_job.destination, name).unwrap();
        let b = read_test_array(&staged_job.destination, name).unwrap();
        assert_bits_eq!(&a, &b);
    }
    assert_eq!(
        store_files(&direct_job.destination),
        store_files(&staged_job.destination)
    );

    let expected: Vec<f32> = create_temperature_cube(&shape)
        .iter()
        .zip(create_test_cube(&shape))
        .map(|(a, b)| a + b)
        .collect();
    assert_bits_eq!(&read_test_array(&staged_job.destination, "tv").unwrap(), &expected);
}

#[test]
fn test_half_precision_source_is_widened() {
    let source = tempfile::tempdir().expect("Failed to create temp dir");
    let values: Vec<half::f16> = (0..8).map(|i| half::f16::from_f32(i as f32 * 0.5)).collect();
    write_test_array_typed(
        source.path(),
        "sp",
        &[8],
        &[4],
        DataType::Float16,
        FillValue::from(half::f16::NAN),
        &values,
        &["cell"],
    )
    .unwrap();

    let work = tempfile::tempdir().expect("Failed to create temp dir");
    let job = job(source.path(), work.path().join("out"), vec![("sp", rename("sp"))]);
    let report = remap_dataset(
        &job,
        &config(&work.path().join("scratch"), 1 << 20),
        &FunctionRegistry::new(),
    )
    .unwrap();

    assert!(report.is_success(), "failures: {:?}", report.failures().collect::<Vec<_>>());
    let output = open_test_array(&job.destination, "sp").unwrap();
    assert_eq!(*output.data_type(), DataType::Float32);
    let expected: Vec<f32> = (0..8).map(|i| i as f32 * 0.5).collect();
    assert_eq!(read_test_array(&job.destination, "sp").unwrap(), expected);
}

#[test]
fn test_remap_into_source_store_is_rejected() {
    let source = time_chunked_source();
    let before = read_test_array(source.path(), "tsr").unwrap();

    // Same store, spelled differently.
    let destination = source.path().join(".");
    let job = job(source.path(), destination, vec![("tsr", rename("tsr"))]);
    let err = remap_dataset(
        &job,
        &config(&source.path().join("scratch"), 1),
        &FunctionRegistry::new(),
    )
    .unwrap_err();

    assert!(err.is_configuration());
    assert!(err.to_string().contains("same store"));
    assert_bits_eq!(&read_test_array(source.path(), "tsr").unwrap(), &before);
}
