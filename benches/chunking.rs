use audio_relay::audio::{convert, ChunkAccumulator};
use audio_relay::protocol::AudioFormat;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

/// Interleaved float samples of a quiet ramp
fn float_capture(frames: usize, channels: u16) -> Vec<u8> {
    (0..frames * channels as usize)
        .flat_map(|i| ((i % 200) as f32 / 400.0 - 0.25).to_le_bytes())
        .collect()
}

fn bench_accumulate(c: &mut Criterion) {
    let format = AudioFormat::new(48_000, 2, 32);
    let mut group = c.benchmark_group("accumulate_one_second");

    // Typical device periods: 3ms, 10ms, 21.3ms (1024 frames)
    for frames in [144usize, 480, 1024] {
        let buffer = float_capture(frames, format.channels);
        let pushes = 48_000 / frames;
        group.throughput(Throughput::Bytes((buffer.len() * pushes) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(frames), &buffer, |b, buffer| {
            b.iter(|| {
                let mut accumulator = ChunkAccumulator::new();
                let mut emitted = 0;
                for _ in 0..pushes {
                    emitted += accumulator.push(black_box(buffer), format).len();
                }
                emitted
            })
        });
    }
    group.finish();
}

fn bench_convert(c: &mut Criterion) {
    let src = AudioFormat::new(48_000, 2, 32);
    let chunk = float_capture(960, src.channels);
    let mut group = c.benchmark_group("convert_20ms");
    group.throughput(Throughput::Bytes(chunk.len() as u64));

    for (name, dst) in [
        ("f32_stereo_to_i16_stereo", src.with_bits(16)),
        ("f32_stereo_to_i16_mono", src.with_bits(16).with_channels(1)),
        ("f32_stereo_to_f32_mono", src.with_channels(1)),
    ] {
        group.bench_function(name, |b| {
            b.iter(|| convert(black_box(&chunk), src, dst))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_accumulate, bench_convert);
criterion_main!(benches);
