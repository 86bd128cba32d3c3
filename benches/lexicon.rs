//! Benchmarks for bilingual keyword matching

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use threat_rs::{Config, SpeechThreatDetector, Transcript};

fn bench_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("lexicon");
    let detector = SpeechThreatDetector::from_config(&Config::default());

    let clean = "we are going to the market after lunch and then back home";
    let english = "I'll hurt you, I swear I will beat you if you come near the gun";
    let sinhala = "මම උඹව මරනවා, බල්ලා";
    let long: String = std::iter::repeat(clean).take(20).collect::<Vec<_>>().join(" ");

    group.bench_function("no_match", |b| {
        b.iter(|| black_box(detector.scan_text(0, black_box(clean))))
    });
    group.bench_function("english_threat", |b| {
        b.iter(|| black_box(detector.scan_text(0, black_box(english))))
    });
    group.bench_function("sinhala_mixed", |b| {
        b.iter(|| black_box(detector.scan_text(0, black_box(sinhala))))
    });
    group.bench_function("long_transcript", |b| {
        b.iter(|| black_box(detector.scan_text(0, black_box(&long))))
    });

    let transcript = Transcript::new(english).with_confidence(0.9);
    group.bench_function("evaluate", |b| {
        b.iter(|| black_box(detector.evaluate(0, Some(&transcript))))
    });

    group.finish();
}

criterion_group!(benches, bench_scan);
criterion_main!(benches);
