//! Boundary behaviors: calling the facade before any submission, asking
//! about a task from a different master, a non-existent program path, and
//! a handler that fails mid-execution.

use pmw_backend_thread::ThreadBackend;
use pmw_core::master::Executable;
use pmw_core::{HandlerTable, Master, PmwError, TaskSelector, TaskSpec};

fn divide_by_zero(_args: &[Vec<u8>]) -> anyhow::Result<Vec<u8>> {
    let numerator = 10i64;
    let denominator = 0i64;
    if denominator == 0 {
        anyhow::bail!("division by zero");
    }
    Ok(bincode::serialize(&(numerator / denominator))?)
}

fn make_master() -> (Master, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let backend = ThreadBackend::new(1);
    let master = Master::with_options(
        backend,
        pmw_core::MasterOptions {
            task_dir: dir.path().to_path_buf(),
            ..Default::default()
        },
    );
    (master, dir)
}

#[test]
fn get_result_before_any_submission_is_no_submissions() {
    let (master, _dir) = make_master();
    let err = master.get_result(TaskSelector::Any, false).unwrap_err();
    assert!(matches!(err, PmwError::NoSubmissions));
}

#[test]
fn get_result_for_a_task_from_another_master_is_unknown_task() {
    HandlerTable::register("boundary_noop", |args: &[Vec<u8>]| Ok(args[0].clone()));
    let (master_a, _dir_a) = make_master();
    let (master_b, _dir_b) = make_master();

    let task_a = master_a
        .submit_task(TaskSpec::handler("boundary_noop", vec![vec![1]]))
        .unwrap();
    master_b
        .submit_task(TaskSpec::handler("boundary_noop", vec![vec![2]]))
        .unwrap();

    let err = master_b.get_result(TaskSelector::One(task_a), false).unwrap_err();
    assert!(matches!(err, PmwError::UnknownTask(_)));
}

#[test]
fn non_existent_program_path_surfaces_as_task_execution_error() {
    let (master, _dir) = make_master();
    let task = master
        .submit_task(TaskSpec {
            executable: Executable::ExternalProgram("/no/such/program/anywhere".into()),
            input: vec![],
            input_from_file: false,
        })
        .unwrap();

    let err = master.get_result(TaskSelector::One(task), true).unwrap_err();
    assert!(matches!(err, PmwError::TaskExecution { .. }));
}

#[test]
fn a_handler_that_errors_surfaces_as_task_execution_error() {
    HandlerTable::register("boundary_divide_by_zero", divide_by_zero);
    let (master, _dir) = make_master();

    let task = master
        .submit_task(TaskSpec::handler("boundary_divide_by_zero", vec![vec![]]))
        .unwrap();

    let err = master.get_result(TaskSelector::One(task), true).unwrap_err();
    match err {
        PmwError::TaskExecution { stderr, .. } => assert!(stderr.contains("division")),
        other => panic!("expected TaskExecution, got {other:?}"),
    }
}

#[test]
fn submitting_an_unregistered_handler_fails_the_task_not_the_submission() {
    let (master, _dir) = make_master();
    let task = master
        .submit_task(TaskSpec::handler("boundary_never_registered", vec![vec![]]))
        .unwrap();

    let err = master.get_result(TaskSelector::One(task), true).unwrap_err();
    assert!(matches!(err, PmwError::Backend(_)));
}

#[test]
fn shutdown_is_idempotent_and_safe_before_any_submission() {
    let (master, _dir) = make_master();
    master.shutdown();
    master.shutdown();
}

#[test]
fn dynamic_executable_of_the_wrong_kind_is_bad_executable_kind() {
    let err = TaskSpec::from_dynamic(&42i32, vec![], false).unwrap_err();
    assert!(matches!(err, PmwError::BadExecutableKind));
}

#[test]
fn dynamic_executable_accepts_a_handler_ref_or_a_path() {
    HandlerTable::register("boundary_dynamic_noop", |args: &[Vec<u8>]| Ok(args[0].clone()));

    let handler_spec = TaskSpec::from_dynamic(&pmw_core::HandlerRef("boundary_dynamic_noop"), vec![vec![1]], false).unwrap();
    assert!(matches!(handler_spec.executable, Executable::Handler(_)));

    let path_spec = TaskSpec::from_dynamic(&"/no/such/program", vec![], false).unwrap();
    assert!(matches!(path_spec.executable, Executable::ExternalProgram(_)));
}
