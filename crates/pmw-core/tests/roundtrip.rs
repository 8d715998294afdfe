//! Round-trip/idempotence checks: identity handler, bundle-hash reuse,
//! and verbatim stdout/stderr capture (to the extent captured by the
//! reference backend).

use pmw_backend_thread::ThreadBackend;
use pmw_core::bundle::{BundleGenerator, FunctionBundle};
use pmw_core::{HandlerTable, Master, TaskOutput, TaskSelector, TaskSpec};

fn identity(args: &[Vec<u8>]) -> anyhow::Result<Vec<u8>> {
    Ok(args[0].clone())
}

fn print_to_both_streams(_args: &[Vec<u8>]) -> anyhow::Result<Vec<u8>> {
    println!("stdout test");
    eprintln!("stderr test");
    Ok(Vec::new())
}

#[test]
fn identity_handler_returns_its_input_unchanged() {
    HandlerTable::register("roundtrip_identity", identity);
    let dir = tempfile::tempdir().unwrap();
    let backend = ThreadBackend::new(1);
    let master = Master::with_options(
        backend,
        pmw_core::MasterOptions {
            task_dir: dir.path().to_path_buf(),
            ..Default::default()
        },
    );

    let payload = b"round trip me".to_vec();
    let task = master
        .submit_task(TaskSpec::handler("roundtrip_identity", vec![payload.clone()]))
        .unwrap();

    let (_, output) = master.get_result(TaskSelector::One(task), true).unwrap().unwrap();
    let TaskOutput::Single { result, .. } = output else {
        panic!("expected a single result");
    };
    assert_eq!(result, payload);
}

#[test]
fn repeat_prepare_of_an_identical_bundle_reuses_the_cached_descriptor() {
    let dir = tempfile::tempdir().unwrap();
    let generator = BundleGenerator::new();
    let bundle = FunctionBundle::new("roundtrip_identity");

    let first = generator.prepare(&bundle, dir.path(), "fixed_start", false).unwrap();
    let second = generator.prepare(&bundle, dir.path(), "fixed_start", false).unwrap();

    assert_eq!(first.descriptor_path, second.descriptor_path);
}

#[test]
fn worker_stdout_and_stderr_are_captured_verbatim() {
    HandlerTable::register("roundtrip_print_both_streams", print_to_both_streams);
    let dir = tempfile::tempdir().unwrap();
    let backend = ThreadBackend::new(1);
    let master = Master::with_options(
        backend,
        pmw_core::MasterOptions {
            task_dir: dir.path().to_path_buf(),
            ..Default::default()
        },
    );

    let task = master
        .submit_task(TaskSpec::handler("roundtrip_print_both_streams", vec![]))
        .unwrap();

    let (_, output) = master.get_result(TaskSelector::One(task), true).unwrap().unwrap();
    let TaskOutput::Single { stdout, stderr, .. } = output else {
        panic!("expected a single result");
    };
    assert_eq!(stdout.trim_end(), "stdout test");
    assert_eq!(stderr.trim_end(), "stderr test");
}

#[test]
fn distinct_bundles_produce_distinct_descriptors() {
    let dir = tempfile::tempdir().unwrap();
    let generator = BundleGenerator::new();
    let a = generator
        .prepare(&FunctionBundle::new("roundtrip_identity"), dir.path(), "t0", false)
        .unwrap();
    let b = generator
        .prepare(&FunctionBundle::new("roundtrip_other_handler"), dir.path(), "t0", false)
        .unwrap();
    assert_ne!(a.descriptor_path, b.descriptor_path);
}
