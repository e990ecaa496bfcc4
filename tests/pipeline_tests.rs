// tests/pipeline_tests.rs
//
// Integration tests for the public pipeline API: operation semantics,
// post-operations, failure isolation and output handling.

use batch_image::{
    Batch, BatchContext, BatchImage, Frame, Operation, Pipeline, PostOperation,
};
use image::{Rgba, RgbaImage};
use std::path::Path;

fn gradient(w: u32, h: u32) -> RgbaImage {
    RgbaImage::from_fn(w, h, |x, y| {
        Rgba([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8, 255])
    })
}

fn test_image(name: &str, w: u32, h: u32) -> BatchImage {
    BatchImage::from_pixels(name, gradient(w, h))
}

fn test_image_in(name: &str, w: u32, h: u32, dir: &Path) -> BatchImage {
    BatchImage::new(name, dir, vec![Frame::new(gradient(w, h))])
}

fn apply(op: &Operation, image: &mut BatchImage) -> Result<(), batch_image::BatchError> {
    let ctx = BatchContext::new(".");
    op.apply(image, &ctx)
}

#[test]
fn flip_twice_is_identity() {
    for mode in ["h", "v"] {
        let op = Operation::parse("flip", mode).unwrap();
        let mut img = test_image("flip", 13, 7);
        let before = img.frames[0].pixels.clone();
        apply(&op, &mut img).unwrap();
        assert_ne!(img.frames[0].pixels, before, "flip {mode} must change pixels");
        apply(&op, &mut img).unwrap();
        assert_eq!(img.frames[0].pixels, before, "double flip {mode} must be identity");
    }
}

#[test]
fn rotate_zero_is_identity() {
    let op = Operation::parse("rotate", "0").unwrap();
    let mut img = test_image("rot0", 9, 5);
    let before = img.frames[0].pixels.clone();
    apply(&op, &mut img).unwrap();
    assert_eq!(img.frames[0].pixels, before);
}

#[test]
fn rotate_180_twice_is_identity() {
    let op = Operation::parse("rotate", "180").unwrap();
    let mut img = test_image("rot180", 10, 6);
    let before = img.frames[0].pixels.clone();
    apply(&op, &mut img).unwrap();
    apply(&op, &mut img).unwrap();
    assert_eq!(img.frames[0].pixels, before);
}

#[test]
fn rotate_quarter_turns_are_lossless() {
    let mut img = test_image("rot90", 8, 4);
    let before = img.frames[0].pixels.clone();
    let acw = Operation::parse("rotate", "acw").unwrap();
    let cw = Operation::parse("rotate", "cw").unwrap();
    apply(&acw, &mut img).unwrap();
    assert_eq!((img.width(), img.height()), (4, 8));
    apply(&cw, &mut img).unwrap();
    assert_eq!(img.frames[0].pixels, before);
}

#[test]
fn rotate_fill_mode_keeps_canvas_size() {
    let op = Operation::parse("rotate", "33,fill,none").unwrap();
    let mut img = test_image("rotfill", 32, 20);
    apply(&op, &mut img).unwrap();
    assert_eq!((img.width(), img.height()), (32, 20));
}

#[test]
fn rotate_resize_mode_grows_canvas() {
    let op = Operation::parse("rotate", "45,resize,none").unwrap();
    let mut img = test_image("rotresize", 20, 20);
    apply(&op, &mut img).unwrap();
    assert!(img.width() > 20 && img.height() > 20);
}

#[test]
fn rotate_crop_mode_trims_inside_content() {
    let op = Operation::parse("rotate", "45,crop,none").unwrap();
    let mut img = test_image("rotcrop", 100, 100);
    apply(&op, &mut img).unwrap();
    // Inscribed square of a 45-degree rotated 100x100 square.
    assert!(img.width() >= 69 && img.width() <= 71, "got {}", img.width());
    assert_eq!(img.width(), img.height());
}

#[test]
fn resize_hits_requested_dimensions() {
    for (w, h) in [(4, 4), (64, 48), (33, 97)] {
        let op = Operation::parse("resize", &format!("{w},{h},lanczos")).unwrap();
        let mut img = test_image("rs", 20, 30);
        apply(&op, &mut img).unwrap();
        assert_eq!((img.width(), img.height()), (w, h));
    }
}

#[test]
fn crop_absolute_full_frame_is_identity() {
    let op = Operation::parse("crop", "abs,0,0,24,16").unwrap();
    let mut img = test_image("crop-id", 24, 16);
    let before = img.frames[0].pixels.clone();
    apply(&op, &mut img).unwrap();
    assert_eq!(img.frames[0].pixels, before);
}

#[test]
fn crop_relative_uses_max_corner() {
    let abs = Operation::parse("crop", "abs,2,3,5,4").unwrap();
    let rel = Operation::parse("crop", "rel,2,3,7,7").unwrap();
    let mut a = test_image("a", 24, 16);
    let mut b = test_image("b", 24, 16);
    apply(&abs, &mut a).unwrap();
    apply(&rel, &mut b).unwrap();
    assert_eq!(a.frames[0].pixels, b.frames[0].pixels);
    assert_eq!((a.width(), a.height()), (5, 4));
}

#[test]
fn crop_outside_source_is_filled() {
    let op = Operation::parse("crop", "abs,20,20,8,8,#ff0000ff").unwrap();
    let mut img = test_image("crop-fill", 24, 24);
    apply(&op, &mut img).unwrap();
    // Viewport columns past x=24 hold the fill colour.
    assert_eq!(*img.frames[0].pixels.get_pixel(7, 0), Rgba([255, 0, 0, 255]));
    // Columns still inside the source hold source pixels.
    assert_eq!(
        *img.frames[0].pixels.get_pixel(0, 0),
        Rgba([20, 20, 40, 255])
    );
}

#[test]
fn crop_degenerate_viewport_fails_and_preserves_image() {
    let op = Operation::parse("crop", "rel,10,10,4,4").unwrap(); // max < origin
    let mut img = test_image("crop-bad", 24, 16);
    let before = img.frames[0].pixels.clone();
    assert!(apply(&op, &mut img).is_err());
    assert_eq!(img.frames[0].pixels, before);
}

#[test]
fn canvas_grow_centres_content() {
    let op = Operation::parse("canvas", "12,12,mm,#00ff00ff").unwrap();
    let mut img = test_image("canvas", 8, 8);
    let before = img.frames[0].pixels.clone();
    apply(&op, &mut img).unwrap();
    assert_eq!((img.width(), img.height()), (12, 12));
    assert_eq!(*img.frames[0].pixels.get_pixel(0, 0), Rgba([0, 255, 0, 255]));
    assert_eq!(*img.frames[0].pixels.get_pixel(2, 2), *before.get_pixel(0, 0));
}

#[test]
fn canvas_explicit_anchor_overrides_enum() {
    let op = Operation::parse("canvas", "12,12,mm,black,0,0").unwrap();
    let mut img = test_image("canvas-xy", 8, 8);
    let before = img.frames[0].pixels.clone();
    apply(&op, &mut img).unwrap();
    assert_eq!(*img.frames[0].pixels.get_pixel(0, 0), *before.get_pixel(0, 0));
}

#[test]
fn aspect_crop_and_letterbox() {
    // 100x100 to 2:1 by cropping: height shrinks to 50.
    let op = Operation::parse("aspect", "2:1,crop").unwrap();
    let mut img = test_image("aspect-crop", 100, 100);
    apply(&op, &mut img).unwrap();
    assert_eq!((img.width(), img.height()), (100, 50));

    // 100x100 to 2:1 by letterboxing: width grows to 200.
    let op = Operation::parse("aspect", "2:1,letterbox,mm,#0000ffff").unwrap();
    let mut img = test_image("aspect-letter", 100, 100);
    apply(&op, &mut img).unwrap();
    assert_eq!((img.width(), img.height()), (200, 100));
    assert_eq!(*img.frames[0].pixels.get_pixel(0, 0), Rgba([0, 0, 255, 255]));
}

#[test]
fn aspect_matching_ratio_is_untouched() {
    let op = Operation::parse("aspect", "16:9,crop").unwrap();
    let mut img = test_image("aspect-id", 160, 90);
    let before = img.frames[0].pixels.clone();
    apply(&op, &mut img).unwrap();
    assert_eq!(img.frames[0].pixels, before);
}

fn bordered_image(name: &str) -> BatchImage {
    // 12x10 with a uniform 2-pixel black border and a non-uniform interior.
    let px = RgbaImage::from_fn(12, 10, |x, y| {
        if x < 2 || x >= 10 || y < 2 || y >= 8 {
            Rgba([0, 0, 0, 255])
        } else {
            Rgba([10 + x as u8, 10 + y as u8, 200, 255])
        }
    });
    BatchImage::from_pixels(name, px)
}

#[test]
fn deborder_strips_exactly_the_border() {
    let op = Operation::parse("deborder", "").unwrap();
    let mut img = bordered_image("db");
    apply(&op, &mut img).unwrap();
    assert_eq!((img.width(), img.height()), (8, 6));
    // Top-left interior pixel survived at the new origin.
    assert_eq!(*img.frames[0].pixels.get_pixel(0, 0), Rgba([12, 12, 200, 255]));
}

#[test]
fn deborder_with_explicit_colour() {
    let op = Operation::parse("deborder", "black,rgb").unwrap();
    let mut img = bordered_image("db-col");
    apply(&op, &mut img).unwrap();
    assert_eq!((img.width(), img.height()), (8, 6));
}

#[test]
fn deborder_uniform_image_fails_without_mutation() {
    let op = Operation::parse("deborder", "").unwrap();
    let mut img = BatchImage::from_pixels(
        "uniform",
        RgbaImage::from_pixel(8, 8, Rgba([5, 5, 5, 255])),
    );
    let before = img.frames[0].pixels.clone();
    assert!(apply(&op, &mut img).is_err());
    assert_eq!(img.frames[0].pixels, before);
}

#[test]
fn quantize_check_exact_is_lossless_under_budget() {
    let op = Operation::parse("quantize", "fixed,256").unwrap();
    // 4 distinct colours.
    let px = RgbaImage::from_fn(8, 8, |x, y| {
        Rgba([((x / 4) * 255) as u8, ((y / 4) * 255) as u8, 0, 255])
    });
    let mut img = BatchImage::from_pixels("q", px);
    let before = img.frames[0].pixels.clone();
    apply(&op, &mut img).unwrap();
    assert_eq!(img.frames[0].pixels, before);
}

#[test]
fn quantize_neu_respects_colour_budget() {
    let op = Operation::parse("quantize", "neu,16,false").unwrap();
    let mut img = test_image("qn", 32, 32);
    apply(&op, &mut img).unwrap();
    let mut seen = std::collections::HashSet::new();
    for p in img.frames[0].pixels.pixels() {
        seen.insert([p.0[0], p.0[1], p.0[2]]);
    }
    assert!(seen.len() <= 16, "got {} colours", seen.len());
}

#[test]
fn swizzle_identity_is_noop() {
    let op = Operation::parse("swizzle", "r,g,b,a").unwrap();
    let mut img = test_image("sw", 6, 6);
    let before = img.frames[0].pixels.clone();
    apply(&op, &mut img).unwrap();
    assert_eq!(img.frames[0].pixels, before);
}

#[test]
fn swizzle_reads_the_original_pixel_for_every_output() {
    // Swap R and B: must not feed the already-written R into B.
    let op = Operation::parse("swizzle", "b,g,r,1").unwrap();
    let mut img = BatchImage::from_pixels(
        "swap",
        RgbaImage::from_pixel(2, 2, Rgba([10, 20, 30, 40])),
    );
    apply(&op, &mut img).unwrap();
    assert_eq!(*img.frames[0].pixels.get_pixel(0, 0), Rgba([30, 20, 10, 255]));
}

#[test]
fn channel_set_and_spread() {
    let set = Operation::parse("channel", "set,ga,#11223344").unwrap();
    let mut img = BatchImage::from_pixels(
        "chan",
        RgbaImage::from_pixel(2, 2, Rgba([1, 2, 3, 4])),
    );
    apply(&set, &mut img).unwrap();
    assert_eq!(*img.frames[0].pixels.get_pixel(0, 0), Rgba([1, 0x22, 3, 0x44]));

    let spread = Operation::parse("channel", "spread,a").unwrap();
    apply(&spread, &mut img).unwrap();
    assert_eq!(*img.frames[0].pixels.get_pixel(0, 0), Rgba([0x44, 0x44, 0x44, 0x44]));
}

#[test]
fn channel_blend_composites_against_colour() {
    let blend = Operation::parse("channel", "blend,rgba,white").unwrap();
    let mut img = BatchImage::from_pixels(
        "blend",
        RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 0])),
    );
    // Fully transparent black over white gives white; alpha becomes the
    // blend colour's alpha.
    apply(&blend, &mut img).unwrap();
    assert_eq!(*img.frames[0].pixels.get_pixel(0, 0), Rgba([255, 255, 255, 255]));
}

#[test]
fn levels_identity_parameters_leave_pixels_alone() {
    let op = Operation::parse("levels", "0,-1,1").unwrap();
    let mut img = test_image("lv", 9, 9);
    let before = img.frames[0].pixels.clone();
    apply(&op, &mut img).unwrap();
    assert_eq!(img.frames[0].pixels, before);
}

#[test]
fn levels_single_frame_selection() {
    let mut img = BatchImage::new(
        "anim",
        ".",
        vec![
            Frame::new(RgbaImage::from_pixel(2, 2, Rgba([100, 100, 100, 255]))),
            Frame::new(RgbaImage::from_pixel(2, 2, Rgba([100, 100, 100, 255]))),
        ],
    );
    // Invert only frame 1.
    let op = Operation::parse("levels", "0,-1,1,1,0,1").unwrap();
    apply(&op, &mut img).unwrap();
    assert_eq!(*img.frames[0].pixels.get_pixel(0, 0), Rgba([100, 100, 100, 255]));
    assert_eq!(*img.frames[1].pixels.get_pixel(0, 0), Rgba([155, 155, 155, 255]));
}

#[test]
fn brightness_full_drives_channels_to_white() {
    let op = Operation::parse("brightness", "1").unwrap();
    let mut img = test_image("br", 4, 4);
    apply(&op, &mut img).unwrap();
    let px = img.frames[0].pixels.get_pixel(1, 2);
    assert_eq!((px.0[0], px.0[1], px.0[2]), (255, 255, 255));
    assert_eq!(px.0[3], 255); // alpha untouched by rgb selector
}

#[test]
fn pixel_out_of_bounds_is_a_runtime_failure() {
    let op = Operation::parse("pixel", "100,100,white").unwrap();
    let mut img = test_image("px", 8, 8);
    assert!(apply(&op, &mut img).is_err());
}

#[test]
fn extract_writes_selected_frames_and_skips_out_of_range() {
    let tmp = tempfile::tempdir().unwrap();
    let ctx = BatchContext::new(tmp.path());
    let mut img = BatchImage::new(
        "anim",
        tmp.path(),
        vec![
            Frame::new(gradient(4, 4)),
            Frame::new(gradient(4, 4)),
            Frame::new(gradient(4, 4)),
        ],
    );
    // Frames 1, 2 and the out-of-range 9.
    let op = Operation::parse("extract", "1-2+9,Frames,clip").unwrap();
    op.apply(&mut img, &ctx).unwrap();

    let dir = tmp.path().join("Frames");
    assert!(dir.join("clip_001.png").is_file());
    assert!(dir.join("clip_002.png").is_file());
    assert!(!dir.join("clip_009.png").exists());
    assert!(!dir.join("clip_000.png").exists());
}

#[test]
fn extract_with_huge_upper_bound_writes_only_real_frames() {
    let tmp = tempfile::tempdir().unwrap();
    let ctx = BatchContext::new(tmp.path());
    let mut img = BatchImage::new(
        "anim",
        tmp.path(),
        vec![Frame::new(gradient(4, 4)), Frame::new(gradient(4, 4))],
    );
    let op = Operation::parse("extract", "0-4000000000,Frames,big").unwrap();
    op.apply(&mut img, &ctx).unwrap();

    let dir = tmp.path().join("Frames");
    assert!(dir.join("big_000.png").is_file());
    assert!(dir.join("big_001.png").is_file());
    assert!(!dir.join("big_002.png").exists());
}

#[test]
fn extract_collision_on_same_output_path() {
    let tmp = tempfile::tempdir().unwrap();
    let ctx = BatchContext::new(tmp.path());
    let mut img = test_image_in("one", 4, 4, tmp.path());
    let op = Operation::parse("extract", "0,Frames,same").unwrap();
    op.apply(&mut img, &ctx).unwrap();
    // Second run targets the identical path and must collide.
    let err = op.apply(&mut img, &ctx).unwrap_err();
    assert!(matches!(err, batch_image::BatchError::OutputCollision { .. }));
}

#[test]
fn combine_writes_animated_gif_with_all_frames() {
    let tmp = tempfile::tempdir().unwrap();
    let ctx = BatchContext::new(tmp.path());
    let images = [
        BatchImage::new(
            "a",
            tmp.path(),
            vec![Frame::new(gradient(8, 8)), Frame::new(gradient(8, 8))],
        ),
        BatchImage::new("b", tmp.path(), vec![Frame::new(gradient(8, 8))]),
    ];
    let refs: Vec<&BatchImage> = images.iter().collect();
    let post = PostOperation::parse("combine", "0-1:100,Out,anim").unwrap();
    let path = post.apply(&refs, &ctx).unwrap();
    assert_eq!(path, tmp.path().join("Out").join("anim.gif"));

    use image::AnimationDecoder;
    let decoder =
        image::codecs::gif::GifDecoder::new(std::io::BufReader::new(std::fs::File::open(&path).unwrap()))
            .unwrap();
    let frames = decoder.into_frames().collect_frames().unwrap();
    assert_eq!(frames.len(), 3);
}

#[test]
fn contact_five_images_make_a_3x2_grid_with_fill() {
    let tmp = tempfile::tempdir().unwrap();
    let ctx = BatchContext::new(tmp.path());
    let images: Vec<BatchImage> = (0..5)
        .map(|i| test_image_in(&format!("img{i}"), 10, 10, tmp.path()))
        .collect();
    let refs: Vec<&BatchImage> = images.iter().collect();
    let post = PostOperation::parse("contact", "0,0,#ff00ffff,Sheets,sheet").unwrap();
    let path = post.apply(&refs, &ctx).unwrap();

    let sheet = image::open(&path).unwrap().into_rgba8();
    assert_eq!(sheet.dimensions(), (30, 20));
    // The sixth cell (bottom-right) is pure fill.
    assert_eq!(*sheet.get_pixel(25, 15), Rgba([255, 0, 255, 255]));
    // The first cell holds image content.
    assert_eq!(*sheet.get_pixel(0, 0), Rgba([0, 0, 0, 255]));
}

#[test]
fn post_operation_on_empty_set_reports_no_images() {
    let tmp = tempfile::tempdir().unwrap();
    let ctx = BatchContext::new(tmp.path());
    let post = PostOperation::parse("contact", "").unwrap();
    let err = post.apply(&[], &ctx).unwrap_err();
    assert!(matches!(err, batch_image::BatchError::NoImages { .. }));
}

#[test]
fn full_batch_pipeline_and_post_operations() {
    let tmp = tempfile::tempdir().unwrap();
    let ctx = BatchContext::new(tmp.path());
    let mut pipeline = Pipeline::new();
    pipeline.push("resize", "16,16,bilinear").unwrap();
    pipeline.push("flip", "v").unwrap();
    let post = PostOperation::parse("contact", "").unwrap();

    let mut images: Vec<BatchImage> = (0..4)
        .map(|i| test_image_in(&format!("in{i}"), 31 + i, 17, tmp.path()))
        .collect();
    let batch = Batch::new(pipeline, vec![post]);
    let report = batch.run(&mut images, &ctx);

    assert!(report.all_ok(), "{report:?}");
    for img in &images {
        assert_eq!((img.width(), img.height()), (16, 16));
    }
    // 4 images -> 2x2 sheet of 16x16 cells.
    let sheet = image::open(&report.outputs[0]).unwrap();
    assert_eq!((sheet.width(), sheet.height()), (32, 32));
}
