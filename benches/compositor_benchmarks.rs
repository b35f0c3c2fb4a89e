use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use pixkit::{
    composite, composite_into, resample_mask, tools::BackgroundRemoval, AlphaMode, MaskBuffer,
    MaskFn, Pipeline, PipelineConfig, RasterImage, Threshold,
};

/// Typical segmentation model resolution
const MODEL_SIZE: u32 = 320;

const TARGET_SIZES: [(u32, u32); 3] = [(640, 480), (1920, 1080), (3840, 2160)];

fn gradient_mask(size: u32) -> MaskBuffer {
    let values = (0..size * size)
        .map(|i| (i % size) as f32 / (size - 1) as f32)
        .collect();
    MaskBuffer::new(size, size, values).expect("valid mask dimensions")
}

fn photo(width: u32, height: u32) -> RasterImage {
    RasterImage::from_rgba_image(RgbaImage::from_fn(width, height, |x, y| {
        Rgba([(x % 256) as u8, (y % 256) as u8, 128, 255])
    }))
}

fn benchmark_resample_mask(c: &mut Criterion) {
    let mut group = c.benchmark_group("resample_mask");
    let mask = gradient_mask(MODEL_SIZE);

    for (width, height) in TARGET_SIZES {
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{width}x{height}")),
            &(width, height),
            |b, &(w, h)| b.iter(|| resample_mask(black_box(&mask), w, h).unwrap()),
        );
    }

    group.finish();
}

fn benchmark_composite(c: &mut Criterion) {
    let mut group = c.benchmark_group("composite");
    let (width, height) = (1920, 1080);
    let image = photo(width, height);
    let mask = resample_mask(&gradient_mask(MODEL_SIZE), width, height).unwrap();
    let threshold = Threshold::new(0.5).unwrap();

    for mode in [AlphaMode::Binary, AlphaMode::Soft] {
        group.bench_function(BenchmarkId::new("allocating", mode), |b| {
            b.iter(|| composite(black_box(&image), black_box(&mask), threshold, mode).unwrap());
        });
    }

    // Reused output buffer, as a live preview would do
    let mut output = RasterImage::from_pixel(width, height, [0; 4]);
    group.bench_function("into_buffer", |b| {
        b.iter(|| {
            composite_into(
                black_box(&image),
                black_box(&mask),
                threshold,
                AlphaMode::Soft,
                &mut output,
            )
            .unwrap()
        });
    });

    group.finish();
}

fn benchmark_pipeline_end_to_end(c: &mut Criterion) {
    let mut bytes = Vec::new();
    DynamicImage::ImageRgba8(photo(1024, 768).into_rgba_image().unwrap())
        .write_to(&mut std::io::Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();

    let mut pipeline = Pipeline::new(PipelineConfig::default()).unwrap();
    let source = MaskFn(|_: &RasterImage| -> pixkit::Result<MaskBuffer> {
        Ok(gradient_mask(MODEL_SIZE))
    });
    let mut tool = BackgroundRemoval::new(source, Threshold::new(0.5).unwrap(), AlphaMode::Binary);

    c.bench_function("pipeline_remove_bg_png_1024x768", |b| {
        b.iter(|| pipeline.run(black_box(&bytes), &mut tool).unwrap());
    });
}

criterion_group!(
    compositor_benches,
    benchmark_resample_mask,
    benchmark_composite,
    benchmark_pipeline_end_to_end
);
criterion_main!(compositor_benches);
