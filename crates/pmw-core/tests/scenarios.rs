//! End-to-end scenarios exercising the facade, the scheduler's queueing
//! behavior under worker scarcity, map-reduce over both owned and
//! file-backed input, progress reporting, and shutdown cleanup.

use std::path::PathBuf;

use pmw_backend_thread::ThreadBackend;
use pmw_core::mapreduce::{MapReduceInput, submit_mapreduce};
use pmw_core::{FunctionBundle, HandlerTable, Master, MasterEvent, MasterOptions, TaskOutput, TaskSelector, TaskSpec};

fn increment(args: &[Vec<u8>]) -> anyhow::Result<Vec<u8>> {
    let n: i64 = bincode::deserialize(&args[0])?;
    Ok(bincode::serialize(&(n + 1))?)
}

fn sum_bytes(args: &[Vec<u8>]) -> anyhow::Result<Vec<u8>> {
    let sum: u64 = args[0].iter().map(|b| *b as u64).sum();
    Ok(bincode::serialize(&sum)?)
}

fn sum_file_chunks(args: &[Vec<u8>]) -> anyhow::Result<Vec<u8>> {
    let chunks: Vec<pmw_core::mapreduce::FileChunk> = bincode::deserialize(&args[0])?;
    let mut total = 0u64;
    for chunk in chunks {
        let bytes = std::fs::read(&chunk.path)?;
        let slice = &bytes[chunk.start as usize..chunk.end as usize];
        total += slice.iter().map(|b| *b as u64).sum::<u64>();
    }
    Ok(bincode::serialize(&total)?)
}

fn sum_reduce(args: &[Vec<u8>]) -> anyhow::Result<Vec<u8>> {
    let n: u64 = bincode::deserialize(&args[0])?;
    Ok(bincode::serialize(&n)?)
}

/// A reduce handler that may receive more than one grouped map result per
/// call, each still a whole bincode-encoded `u64` rather than a byte
/// fragment of one.
fn sum_reduce_many(args: &[Vec<u8>]) -> anyhow::Result<Vec<u8>> {
    let mut total = 0u64;
    for arg in args {
        total += bincode::deserialize::<u64>(arg)?;
    }
    Ok(bincode::serialize(&total)?)
}

fn master_with(task_dir: &std::path::Path, num_workers: usize) -> Master {
    Master::with_options(
        ThreadBackend::new(num_workers),
        MasterOptions {
            task_dir: task_dir.to_path_buf(),
            ..Default::default()
        },
    )
}

#[test]
fn scenario_basic_submit_and_result() {
    HandlerTable::register("scenario_increment", increment);
    let dir = tempfile::tempdir().unwrap();
    let master = master_with(dir.path(), 1);

    let input = bincode::serialize(&41i64).unwrap();
    let task = master.submit_task(TaskSpec::handler("scenario_increment", vec![input])).unwrap();
    let (_, output) = master.get_result(TaskSelector::One(task), true).unwrap().unwrap();
    let TaskOutput::Single { result, .. } = output else { panic!("expected single result") };
    assert_eq!(bincode::deserialize::<i64>(&result).unwrap(), 42);

    master.shutdown();
}

#[test]
fn scenario_more_tasks_than_workers_all_complete() {
    HandlerTable::register("scenario_increment_queue", increment);
    let dir = tempfile::tempdir().unwrap();
    let master = master_with(dir.path(), 2);

    let mut tasks = Vec::new();
    for n in 0..20i64 {
        let input = bincode::serialize(&n).unwrap();
        tasks.push(master.submit_task(TaskSpec::handler("scenario_increment_queue", vec![input])).unwrap());
    }

    let mut results = Vec::new();
    for _ in 0..tasks.len() {
        let (_, output) = master.get_result(TaskSelector::Many(tasks.clone()), true).unwrap().unwrap();
        let TaskOutput::Single { result, .. } = output else { panic!("expected single result") };
        results.push(bincode::deserialize::<i64>(&result).unwrap());
    }
    results.sort();
    assert_eq!(results, (1..=20i64).collect::<Vec<_>>());

    master.shutdown();
}

#[test]
fn scenario_mapreduce_over_owned_input_sums_byte_values() {
    HandlerTable::register("scenario_sum_bytes", sum_bytes);
    HandlerTable::register("scenario_sum_reduce", sum_reduce);
    let dir = tempfile::tempdir().unwrap();
    let master = master_with(dir.path(), 4);

    let data: Vec<u8> = (0u8..=250).step_by(5).collect();
    let expected: u64 = data.iter().map(|b| *b as u64).sum();

    let composite = submit_mapreduce(
        &master,
        FunctionBundle::new("scenario_sum_bytes"),
        FunctionBundle::new("scenario_sum_reduce"),
        4,
        MapReduceInput::Owned(vec![data]),
        None,
    )
    .unwrap();

    composite.await_done();
    let (_, output) = master.get_result(TaskSelector::One(composite), true).unwrap().unwrap();
    let TaskOutput::Many(parts) = output else { panic!("expected a composite result") };
    let total: u64 = parts
        .into_iter()
        .map(|p| bincode::deserialize::<u64>(&p).unwrap())
        .sum();
    assert_eq!(total, expected);

    master.shutdown();
}

#[test]
fn scenario_mapreduce_over_file_input_partitions_by_byte_range() {
    HandlerTable::register("scenario_sum_file_chunks", sum_file_chunks);
    HandlerTable::register("scenario_sum_reduce_file", sum_reduce);
    let dir = tempfile::tempdir().unwrap();
    let master = master_with(dir.path(), 3);

    let file_path: PathBuf = dir.path().join("input.bin");
    let contents: Vec<u8> = (0u8..=200).collect();
    std::fs::write(&file_path, &contents).unwrap();
    let expected: u64 = contents.iter().map(|b| *b as u64).sum();

    let composite = submit_mapreduce(
        &master,
        FunctionBundle::new("scenario_sum_file_chunks"),
        FunctionBundle::new("scenario_sum_reduce_file"),
        3,
        MapReduceInput::Files(vec![file_path]),
        None,
    )
    .unwrap();

    composite.await_done();
    let (_, output) = master.get_result(TaskSelector::One(composite), true).unwrap().unwrap();
    let TaskOutput::Many(parts) = output else { panic!("expected a composite result") };
    let total: u64 = parts
        .into_iter()
        .map(|p| bincode::deserialize::<u64>(&p).unwrap())
        .sum();
    assert_eq!(total, expected);

    master.shutdown();
}

#[test]
fn scenario_mapreduce_with_explicit_reduce_count_regroups_whole_results() {
    HandlerTable::register("scenario_sum_bytes_grouped", sum_bytes);
    HandlerTable::register("scenario_sum_reduce_many", sum_reduce_many);
    let dir = tempfile::tempdir().unwrap();
    let master = master_with(dir.path(), 4);

    // Four single-byte chunks so each map task emits exactly one bincode-
    // encoded `u64`; with `num_reduce = Some(2)` the four map results must
    // regroup two whole results per reduce task, not two arbitrary halves
    // of their concatenated bytes.
    let chunks: Vec<Vec<u8>> = vec![vec![10], vec![20], vec![30], vec![40]];
    let expected: u64 = chunks.iter().flatten().map(|b| *b as u64).sum();

    let composite = submit_mapreduce(
        &master,
        FunctionBundle::new("scenario_sum_bytes_grouped"),
        FunctionBundle::new("scenario_sum_reduce_many"),
        4,
        MapReduceInput::Owned(chunks),
        Some(2),
    )
    .unwrap();

    composite.await_done();
    let (_, output) = master.get_result(TaskSelector::One(composite), true).unwrap().unwrap();
    let TaskOutput::Many(parts) = output else { panic!("expected a composite result") };
    assert_eq!(parts.len(), 2);
    let total: u64 = parts
        .into_iter()
        .map(|p| bincode::deserialize::<u64>(&p).unwrap())
        .sum();
    assert_eq!(total, expected);

    master.shutdown();
}

#[test]
fn scenario_progress_transitions_from_zero_to_one() {
    HandlerTable::register("scenario_progress_increment", increment);
    let dir = tempfile::tempdir().unwrap();
    let master = master_with(dir.path(), 1);

    let input = bincode::serialize(&1i64).unwrap();
    let task = master.submit_task(TaskSpec::handler("scenario_progress_increment", vec![input])).unwrap();

    let progress_before = master.get_progress(TaskSelector::One(task.clone())).unwrap();
    assert_eq!(progress_before, vec![0.0]);

    task.await_done();
    let progress_after = master.get_progress(TaskSelector::One(task)).unwrap();
    assert_eq!(progress_after, vec![1.0]);

    master.shutdown();
}

#[test]
fn scenario_shutdown_removes_generated_task_files() {
    HandlerTable::register("scenario_shutdown_increment", increment);
    let dir = tempfile::tempdir().unwrap();
    let master = master_with(dir.path(), 1);

    let input = bincode::serialize(&1i64).unwrap();
    let task = master.submit_task(TaskSpec::handler("scenario_shutdown_increment", vec![input])).unwrap();
    task.await_done();

    let input_path = task.input_path().to_path_buf();
    let output_path = task.output_path().to_path_buf();
    assert!(input_path.exists());
    assert!(output_path.exists());

    master.shutdown();

    assert!(!input_path.exists());
    assert!(!output_path.exists());
}

#[test]
fn scenario_subscriber_observes_task_finished_event() {
    HandlerTable::register("scenario_event_increment", increment);
    let dir = tempfile::tempdir().unwrap();
    let master = master_with(dir.path(), 1);

    let events = master.subscribe();
    let input = bincode::serialize(&1i64).unwrap();
    let task = master.submit_task(TaskSpec::handler("scenario_event_increment", vec![input])).unwrap();
    task.await_done();

    let event = events.recv().unwrap();
    match event {
        MasterEvent::TaskFinished { name, errored } => {
            assert_eq!(name, task.name());
            assert!(!errored);
        }
        other => panic!("expected TaskFinished, got {other:?}"),
    }

    master.shutdown();
}
