//! Map-reduce orchestration built on top of task submission (spec §4.7, C7).

use std::path::PathBuf;
use std::sync::Arc;

use crate::bundle::FunctionBundle;
use crate::error::PmwError;
use crate::master::{Executable, Master, TaskSelector, TaskSpec};
use crate::task::{Task, TaskOutput, TaskPayload};

/// The input to a map-reduce job: either owned byte chunks the caller has
/// already split conceptually, or a set of files to be partitioned by byte
/// range across the map workers.
#[derive(Debug, Clone)]
pub enum MapReduceInput {
    /// Already-encoded values, evenly split across `num_map` map tasks.
    Owned(Vec<Vec<u8>>),
    /// Files whose combined byte range is evenly split across `num_map` map
    /// tasks; each task receives a `(path, start, end)` triple per file it
    /// touches.
    Files(Vec<PathBuf>),
}

/// A contiguous byte range within one input file, as handed to a map task.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FileChunk {
    /// The file this chunk reads from.
    pub path: PathBuf,
    /// Start offset, inclusive.
    pub start: u64,
    /// End offset, exclusive.
    pub end: u64,
}

/// Split `len` items evenly across `num` chunks, earlier chunks getting the
/// extra items when `len` does not divide evenly (ports `_data_split`).
pub fn split_even(len: usize, num: usize) -> Vec<usize> {
    if num == 0 {
        return Vec::new();
    }
    let q = len / num;
    let r = len % num;
    (0..num).map(|i| if i < r { q + 1 } else { q }).collect()
}

/// Partition `items` into `num` groups per [`split_even`]'s sizing.
pub fn split_owned<T>(items: Vec<T>, num: usize) -> Vec<Vec<T>> {
    let sizes = split_even(items.len(), num);
    let mut iter = items.into_iter();
    sizes
        .into_iter()
        .map(|size| (&mut iter).take(size).collect())
        .collect()
}

/// Partition the combined byte range of `paths` into `num_map` contiguous
/// chunks, walking the files in order and cutting a new [`FileChunk`]
/// whenever the running share for the current map task is exhausted
/// (ports `mapreduce_thread`'s `file_input` branch exactly).
pub fn split_file_input(paths: &[PathBuf], num_map: usize) -> Result<Vec<Vec<FileChunk>>, PmwError> {
    let mut file_sizes = Vec::with_capacity(paths.len());
    let mut total: u64 = 0;
    for path in paths {
        let size = std::fs::metadata(path)
            .map_err(|e| PmwError::serialization(path, e))?
            .len();
        file_sizes.push(size);
        total += size;
    }

    let shares = split_even(total as usize, num_map);
    let mut result: Vec<Vec<FileChunk>> = vec![Vec::new(); num_map];

    let mut file_idx = 0usize;
    let mut offset_in_file: u64 = 0;

    for (map_idx, share) in shares.into_iter().enumerate() {
        let mut remaining = share as u64;
        while remaining > 0 && file_idx < paths.len() {
            let file_remaining = file_sizes[file_idx] - offset_in_file;
            if file_remaining == 0 {
                file_idx += 1;
                offset_in_file = 0;
                continue;
            }
            let take = remaining.min(file_remaining);
            result[map_idx].push(FileChunk {
                path: paths[file_idx].clone(),
                start: offset_in_file,
                end: offset_in_file + take,
            });
            offset_in_file += take;
            remaining -= take;
            if offset_in_file == file_sizes[file_idx] {
                file_idx += 1;
                offset_in_file = 0;
            }
        }
    }

    Ok(result)
}

/// Submit a map-reduce job and return its composite task immediately.
///
/// `num_reduce = None` means one reduce task per map task (the original's
/// `red_worker == -1`); `Some(n)` concatenates all map outputs and
/// re-partitions them into `n` reduce tasks.
pub fn submit_mapreduce(
    master: &Master,
    map: FunctionBundle,
    reduce: FunctionBundle,
    num_map: usize,
    input: MapReduceInput,
    num_reduce: Option<usize>,
) -> Result<Arc<Task>, PmwError> {
    let finished = master.finished_list();
    let backend = master.backend();
    let composite_name = format!("mapreduce_{}", uniqueish());

    // A composite task has no executable of its own, so it never reads or
    // writes a task file; these paths exist only to satisfy `Task`'s shape.
    let composite = Task::new(
        composite_name,
        TaskPayload::Composite,
        PathBuf::new(),
        PathBuf::new(),
        backend,
        Box::new(move |task| finished.append(Some(task))),
    );
    master.register_composite_task(composite.clone());

    let master = master.clone();
    let returned = composite.clone();

    std::thread::spawn(move || run_mapreduce(master, composite, map, reduce, num_map, input, num_reduce));

    Ok(returned)
}

fn uniqueish() -> String {
    // Stand-in for a random/time-derived suffix without touching the
    // forbidden `SystemTime::now()`/`rand` surface: a thread-local counter
    // combined with this thread's id is unique enough for a task name.
    use std::cell::Cell;
    thread_local! {
        static COUNTER: Cell<u64> = const { Cell::new(0) };
    }
    let n = COUNTER.with(|c| {
        let v = c.get();
        c.set(v + 1);
        v
    });
    format!("{:?}_{n}", std::thread::current().id())
}

fn run_mapreduce(
    master: Master,
    composite: Arc<Task>,
    map: FunctionBundle,
    reduce: FunctionBundle,
    num_map: usize,
    input: MapReduceInput,
    num_reduce: Option<usize>,
) {
    match run_mapreduce_inner(&master, &map, &reduce, num_map, input, num_reduce) {
        Ok(reduce_outputs) => composite.finish(None, Some(TaskOutput::Many(reduce_outputs))),
        Err(err) => composite.finish(Some(err), None),
    }
}

fn run_mapreduce_inner(
    master: &Master,
    map: &FunctionBundle,
    reduce: &FunctionBundle,
    num_map: usize,
    input: MapReduceInput,
    num_reduce: Option<usize>,
) -> Result<Vec<Vec<u8>>, PmwError> {
    let map_tasks: Vec<Arc<Task>> = match input {
        MapReduceInput::Owned(items) => {
            let chunks = split_owned(items, num_map);
            chunks
                .into_iter()
                .map(|chunk| {
                    master.submit_task(TaskSpec {
                        executable: Executable::Handler(map.clone()),
                        input: chunk,
                        input_from_file: false,
                    })
                })
                .collect::<Result<_, _>>()?
        }
        MapReduceInput::Files(paths) => {
            let chunk_groups = split_file_input(&paths, num_map)?;
            chunk_groups
                .into_iter()
                .map(|chunks| {
                    let encoded = bincode::serialize(&chunks)
                        .map_err(|e| PmwError::serialization("mapreduce file chunk", anyhow::anyhow!(e)))?;
                    master.submit_task(TaskSpec {
                        executable: Executable::Handler(map.clone()),
                        input: vec![encoded],
                        input_from_file: true,
                    })
                })
                .collect::<Result<_, _>>()?
        }
    };

    let map_outputs = collect_results(master, map_tasks)?;

    let reduce_tasks: Vec<Arc<Task>> = match num_reduce {
        None => map_outputs
            .into_iter()
            .map(|output| {
                master.submit_task(TaskSpec {
                    executable: Executable::Handler(reduce.clone()),
                    input: vec![output],
                    input_from_file: false,
                })
            })
            .collect::<Result<_, _>>()?,
        Some(n) => {
            let groups = split_owned(map_outputs, n);
            groups
                .into_iter()
                .map(|group| {
                    master.submit_task(TaskSpec {
                        executable: Executable::Handler(reduce.clone()),
                        input: group,
                        input_from_file: false,
                    })
                })
                .collect::<Result<_, _>>()?
        }
    };

    collect_results(master, reduce_tasks)
}

fn collect_results(master: &Master, mut pending: Vec<Arc<Task>>) -> Result<Vec<Vec<u8>>, PmwError> {
    let mut outputs = Vec::with_capacity(pending.len());

    while !pending.is_empty() {
        let (task, output) = master
            .get_result(TaskSelector::Many(pending.clone()), true)?
            .expect("blocking get_result always returns a task once candidates remain");

        pending.retain(|t| t != &task);

        match output {
            TaskOutput::Single { result, .. } => outputs.push(result),
            TaskOutput::Many(results) => outputs.extend(results),
        }
    }

    Ok(outputs)
}
