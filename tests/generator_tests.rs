mod common;

use std::sync::atomic::Ordering;

use blob_pipeline::error::ErrorKind;
use blob_pipeline::thumbnails::generator::{self, can_decode, fit_within};
use blob_pipeline::thumbnails::{
    DerivedArtifactJob, JobProcessor, OutputFormat, ThumbnailRenderer, ThumbnailSize,
};
use common::CountingStore;
use image::GenericImageView;

#[test]
fn test_resize_fits_box_and_keeps_aspect_ratio() {
    let source = common::jpeg(2000, 1000);
    let size = ThumbnailSize::new(150, 150);

    let rendered =
        generator::render(&source, &size, OutputFormat::Jpeg { quality: 85 }).unwrap();
    assert_eq!((rendered.width, rendered.height), (150, 75));
    assert_eq!(rendered.content_type, "image/jpeg");

    let decoded = image::load_from_memory(&rendered.data).unwrap();
    assert_eq!(decoded.dimensions(), (150, 75));
}

#[test]
fn test_resize_bounds_hold_for_odd_shapes() {
    for (w, h) in [(640, 480), (480, 640), (1001, 333), (333, 1001), (150, 150)] {
        let source = common::png(w, h);
        let rendered = generator::render(&source, &ThumbnailSize::new(150, 150), OutputFormat::Png)
            .unwrap();

        assert!(rendered.width <= 150 && rendered.height <= 150, "{w}x{h}");
        // Aspect ratio within one pixel of rounding
        let expected_h = f64::from(rendered.width) * f64::from(h) / f64::from(w);
        assert!((expected_h - f64::from(rendered.height)).abs() <= 1.0, "{w}x{h}");
    }
}

#[test]
fn test_png_output_is_lossless_png() {
    let rendered = generator::render(
        &common::png(400, 200),
        &ThumbnailSize::new(300, 300),
        OutputFormat::Png,
    )
    .unwrap();

    assert_eq!(rendered.content_type, "image/png");
    assert_eq!(
        image::guess_format(&rendered.data).unwrap(),
        image::ImageFormat::Png
    );
    assert_eq!((rendered.width, rendered.height), (300, 150));
}

#[test]
fn test_output_format_follows_artifact_key() {
    assert_eq!(OutputFormat::for_key("a/b_1x1.png", 85), OutputFormat::Png);
    assert_eq!(
        OutputFormat::for_key("a/b_1x1.jpg", 0),
        OutputFormat::Jpeg { quality: 1 }
    );
}

#[test]
fn test_undecodable_input_is_invalid() {
    let err = generator::render(
        b"definitely not an image",
        &ThumbnailSize::new(10, 10),
        OutputFormat::Png,
    )
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidInput);
}

#[test]
fn test_decodable_content_types() {
    assert!(can_decode("image/jpeg"));
    assert!(can_decode("image/png; charset=binary"));
    assert!(!can_decode("image/svg+xml"));
    assert!(!can_decode("application/pdf"));
    assert_eq!(fit_within((10, 10), (150, 150)), (10, 10));
}

#[test]
fn test_resizing_a_rendered_thumbnail_keeps_bounds_and_ratio() {
    let jpeg = OutputFormat::Jpeg { quality: 85 };
    let first = generator::render(&common::jpeg(2000, 1000), &ThumbnailSize::new(300, 300), jpeg)
        .unwrap();
    assert_eq!((first.width, first.height), (300, 150));

    let second = generator::render(&first.data, &ThumbnailSize::new(150, 150), jpeg).unwrap();
    assert!(second.width <= 150 && second.height <= 150);
    assert_eq!((second.width, second.height), (150, 75));

    let decoded = image::load_from_memory(&second.data).unwrap();
    assert_eq!(decoded.dimensions(), (150, 75));
}

#[test]
fn test_zero_sized_box_does_not_panic() {
    assert_eq!(fit_within((100, 50), (0, 10)), (1, 1));
    assert_eq!(fit_within((100, 50), (0, 0)), (1, 1));

    let rendered = generator::render(
        &common::png(40, 20),
        &ThumbnailSize::new(0, 20),
        OutputFormat::Png,
    )
    .unwrap();
    assert_eq!((rendered.width, rendered.height), (1, 1));
}

#[tokio::test]
async fn test_renderer_rejects_undecodable_sources_before_fetching() {
    let store = CountingStore::new();
    let renderer = ThumbnailRenderer::new(store.clone(), 85);

    let job = DerivedArtifactJob::new("users/1/docs/1_a.pdf", "files", vec![ThumbnailSize::new(150, 150)])
        .with_content_type("application/pdf");
    let err = renderer.process(&job).await.unwrap_err();

    assert_eq!(err.kind, ErrorKind::InvalidInput);
    assert_eq!(store.gets(), 0);
    assert_eq!(store.puts.load(Ordering::SeqCst), 0);
}
