//! batch-image - batch image conversion pipeline CLI
//!
//! Applies an ordered list of per-image operations to every input, then
//! runs post-operations over the whole processed set.

use anyhow::{bail, Context, Result};
use batch_image::{Batch, BatchContext, BatchImage, Operation, Pipeline, PostOperation};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "batch-image")]
#[command(version, about = "Batch image operation pipeline")]
#[command(long_about = "
Applies an ordered list of operations to every input image, then runs
post-operations over the whole processed set.

Operations: pixel resize canvas aspect deborder crop flip rotate levels
contrast brightness quantize channel swizzle extract
Post-operations: combine contact

Examples:
  batch-image --op resize:1920,1080,lanczos a.png b.png
  batch-image --op deborder --op aspect:16:9,crop *.png
  batch-image --op rotate:33,fill,bilinear,box,#00000000 in.png
  batch-image --post contact:0,0,trans shots/*.png
  batch-image --post combine:0-9:100+10-19:33 frames/*.png
")]
struct Cli {
    /// Input image files
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Per-image operation, NAME:ARGS, in application order (repeatable)
    #[arg(long = "op", value_name = "NAME:ARGS")]
    ops: Vec<String>,

    /// Whole-set post-operation, NAME:ARGS (repeatable)
    #[arg(long = "post", value_name = "NAME:ARGS")]
    post_ops: Vec<String>,

    /// Output root for processed images and post-operation artifacts
    #[arg(long, default_value = "out")]
    out: PathBuf,

    /// Skip writing per-image outputs (post-operations still write)
    #[arg(long)]
    no_save: bool,
}

/// Split "name:args" (args optional).
fn split_spec(spec: &str) -> (&str, &str) {
    match spec.split_once(':') {
        Some((name, args)) => (name, args),
        None => (spec, ""),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    // Fail-fast: every operation must validate before any image is touched.
    let mut pipeline = Pipeline::new();
    for spec in &cli.ops {
        let (name, args) = split_spec(spec);
        let op = Operation::parse(name, args)
            .with_context(|| format!("invalid operation '{spec}'"))?;
        pipeline.push_op(op);
    }
    let mut post_ops = Vec::new();
    for spec in &cli.post_ops {
        let (name, args) = split_spec(spec);
        let post = PostOperation::parse(name, args)
            .with_context(|| format!("invalid post-operation '{spec}'"))?;
        post_ops.push(post);
    }

    let mut images = Vec::new();
    for path in &cli.inputs {
        match BatchImage::load(path) {
            Ok(img) => images.push(img),
            Err(e) => eprintln!("skipping {}: {e}", path.display()),
        }
    }
    if images.is_empty() {
        bail!("no inputs could be loaded");
    }

    let ctx = BatchContext::new(&cli.out);
    let batch = Batch::new(pipeline, post_ops);
    let report = batch.run(&mut images, &ctx);

    for failure in &report.image_failures {
        eprintln!("image '{}' failed: {}", failure.name, failure.error);
    }
    for (post, error) in &report.post_failures {
        eprintln!("post-operation '{post}' failed: {error}");
    }

    if !cli.no_save {
        let failed: std::collections::HashSet<usize> =
            report.image_failures.iter().map(|f| f.index).collect();
        std::fs::create_dir_all(&cli.out)
            .with_context(|| format!("creating {}", cli.out.display()))?;
        for (index, img) in images.iter().enumerate() {
            if failed.contains(&index) {
                continue;
            }
            let path = cli.out.join(format!("{}.png", img.name));
            ctx.claim_output(&path)
                .and_then(|_| batch_image::image::write_png(&img.frames[0].pixels, &path))
                .map_err(|e| anyhow::anyhow!("writing {}: {e}", path.display()))?;
        }
    }

    for path in &report.outputs {
        println!("{}", path.display());
    }

    if !report.all_ok() {
        std::process::exit(1);
    }
    Ok(())
}
