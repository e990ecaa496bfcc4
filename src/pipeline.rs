// src/pipeline.rs
//
// The pipeline and the batch driver. Stage 1 runs the ordered operation
// list over every image independently - the per-image runs share no
// mutable state, so they go wide on the shared rayon pool. Stage 2, after
// the implicit join, runs each post-operation over the surviving set in
// input order. A failure on one image never aborts its siblings; a
// post-operation failure never aborts other post-operations.

use crate::error::BatchError;
use crate::image::BatchImage;
use crate::ops::Operation;
use crate::postops::PostOperation;
use parking_lot::Mutex;
use rayon::prelude::*;
use rayon::ThreadPool;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Minimum number of rayon threads when parallelism detection fails.
const MIN_POOL_THREADS: usize = 1;

static GLOBAL_THREAD_POOL: OnceLock<ThreadPool> = OnceLock::new();

/// Shared thread pool for the per-image stage. Initialized lazily on
/// first use; sized from available_parallelism so cgroup/CPU quotas are
/// respected.
pub fn get_pool() -> &'static ThreadPool {
    GLOBAL_THREAD_POOL.get_or_init(|| {
        let num_threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(MIN_POOL_THREADS);
        rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "falling back to a single-thread pool");
                rayon::ThreadPoolBuilder::new()
                    .num_threads(MIN_POOL_THREADS)
                    .build()
                    .expect("failed to create fallback thread pool")
            })
    })
}

/// Claim-before-write registry for output paths. Extract, combine and
/// contact may run concurrently and may be configured onto the same
/// SubFolder/BaseName; the first claim wins and later claims of the same
/// path are collisions. Parent directories are created under the lock.
#[derive(Debug, Default)]
pub struct OutputRegistry {
    claimed: Mutex<HashSet<PathBuf>>,
}

impl OutputRegistry {
    pub fn claim(&self, path: &Path) -> Result<(), BatchError> {
        let mut claimed = self.claimed.lock();
        if !claimed.insert(path.to_path_buf()) {
            return Err(BatchError::output_collision(path.to_path_buf()));
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| BatchError::file_write_failed(parent.to_path_buf(), e))?;
        }
        Ok(())
    }

    /// Paths claimed so far, in no particular order.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.claimed.lock().iter().cloned().collect()
    }
}

/// Shared state the operations see while applying: the output root for
/// post-operations and the output registry.
#[derive(Debug)]
pub struct BatchContext {
    out_root: PathBuf,
    outputs: OutputRegistry,
}

impl BatchContext {
    pub fn new(out_root: impl Into<PathBuf>) -> Self {
        Self {
            out_root: out_root.into(),
            outputs: OutputRegistry::default(),
        }
    }

    pub fn out_root(&self) -> &Path {
        &self.out_root
    }

    pub fn claim_output(&self, path: &Path) -> Result<(), BatchError> {
        self.outputs.claim(path)
    }

    pub fn claimed_outputs(&self) -> Vec<PathBuf> {
        self.outputs.paths()
    }
}

/// An ordered sequence of validated operations. Operations share no
/// state; each sees the previous operation's output.
#[derive(Clone, Debug, Default)]
pub struct Pipeline {
    ops: Vec<Operation>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and append one operation. A parse failure is surfaced and
    /// nothing is appended - an invalid operation can never run.
    pub fn push(&mut self, name: &str, args: &str) -> Result<(), BatchError> {
        let op = Operation::parse(name, args)?;
        self.ops.push(op);
        Ok(())
    }

    pub fn push_op(&mut self, op: Operation) {
        self.ops.push(op);
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Run every operation over one image in order, stopping at the
    /// first failure. The image keeps the state the last successful
    /// operation left it in.
    pub fn apply(&self, image: &mut BatchImage, ctx: &BatchContext) -> Result<(), BatchError> {
        for op in &self.ops {
            if let Err(err) = op.apply(image, ctx) {
                tracing::warn!(
                    op = op.name(),
                    image = %image.name,
                    error = %err,
                    "operation failed"
                );
                return Err(err);
            }
        }
        Ok(())
    }
}

/// One per-image failure: which image, which state it was in.
#[derive(Debug)]
pub struct ImageFailure {
    pub index: usize,
    pub name: String,
    pub error: BatchError,
}

/// Outcome of a whole batch run.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub image_failures: Vec<ImageFailure>,
    pub post_failures: Vec<(&'static str, BatchError)>,
    pub outputs: Vec<PathBuf>,
}

impl BatchReport {
    pub fn all_ok(&self) -> bool {
        self.image_failures.is_empty() && self.post_failures.is_empty()
    }
}

/// The batch driver: a pipeline plus the post-operations to run over the
/// processed set.
#[derive(Debug, Default)]
pub struct Batch {
    pub pipeline: Pipeline,
    pub post_ops: Vec<PostOperation>,
}

impl Batch {
    pub fn new(pipeline: Pipeline, post_ops: Vec<PostOperation>) -> Self {
        Self { pipeline, post_ops }
    }

    /// Run the per-image stage in parallel, join, then run each
    /// post-operation over the images whose pipelines succeeded.
    pub fn run(&self, images: &mut [BatchImage], ctx: &BatchContext) -> BatchReport {
        let mut report = BatchReport::default();

        let results: Vec<Option<ImageFailure>> = get_pool().install(|| {
            images
                .par_iter_mut()
                .enumerate()
                .map(|(index, image)| {
                    match self.pipeline.apply(image, ctx) {
                        Ok(()) => None,
                        Err(error) => Some(ImageFailure {
                            index,
                            name: image.name.clone(),
                            error,
                        }),
                    }
                })
                .collect()
        });

        let failed: HashSet<usize> = results
            .iter()
            .flatten()
            .map(|failure| failure.index)
            .collect();
        report.image_failures = results.into_iter().flatten().collect();

        // Join point: post-operations read across the whole set, so none
        // may start before every per-image pipeline has finished.
        let survivors: Vec<&BatchImage> = images
            .iter()
            .enumerate()
            .filter(|(i, _)| !failed.contains(i))
            .map(|(_, img)| img)
            .collect();

        for post in &self.post_ops {
            match post.apply(&survivors, ctx) {
                Ok(path) => report.outputs.push(path),
                Err(error) => {
                    tracing::warn!(post = post.name(), error = %error, "post-operation failed");
                    report.post_failures.push((post.name(), error));
                }
            }
        }

        report
    }
}
