//! Benchmarks for playlist decoding and link deobfuscation.
//!
//! Measures the PlayerJS scanner on its own, the full scan + group stage,
//! HLS variant extraction, direct-link matching and the link cipher.
//!
//! Run with: `cargo bench --bench playlist_bench`

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use url::Url;

use cinefetch::obfuscation::{decode_obfuscated_link, encode_for_test, CipherKeys};
use cinefetch::playlist::{group_playlist, parse_m3u8_text, parse_playlist_string};
use cinefetch::{DirectLinkProvider, Provider};

// ---------------------------------------------------------------------------
// Datasets
// ---------------------------------------------------------------------------

const SHORT_PLAYLIST: &str =
    "[360p]http://a/x.mp4 or http://a/y.mp4, [720p]http://a/z.mp4";

const MASTER: &str = "#EXTM3U\n\
    #EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=640x360\n\
    360/index.m3u8\n\
    #EXT-X-STREAM-INF:BANDWIDTH=1400000,RESOLUTION=842x480\n\
    480/index.m3u8\n\
    #EXT-X-STREAM-INF:BANDWIDTH=2800000,RESOLUTION=1280x720\n\
    720/index.m3u8\n\
    #EXT-X-STREAM-INF:BANDWIDTH=5000000,RESOLUTION=1920x1080\n\
    1080/index.m3u8\n";

const INPUTS: &[&str] = &[
    "https://cdn.example/movie.mp4",
    "https://cdn.example/hls/master.m3u8?token=abc",
    "[720p]https://cdn.example/a.mp4,[1080p]https://cdn.example/b.mp4",
    "https://site.example/film/123-some-title",
    "https://site.example/serial/456?season=2",
];

/// A realistic long playlist: 4 qualities × 3 dubs × 2 mirrors.
fn long_playlist() -> String {
    let mut entries = Vec::new();
    for (quality, path) in [("360p", "360"), ("480p", "480"), ("720p", "720"), ("1080p Ultra", "1080")] {
        for dub in ["Original", "Dub", "Subs"] {
            entries.push(format!(
                "[{quality}]{{{dub}}}https://cdn1.example/{dub}/{path}.mp4 or https://cdn2.example/{dub}/{path}.m3u8"
            ));
        }
    }
    entries.join(",")
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

fn bench_scanner(c: &mut Criterion) {
    let mut group = c.benchmark_group("playerjs_scan");
    let long = long_playlist();

    group.bench_function("short", |b| {
        b.iter(|| black_box(parse_playlist_string(black_box(SHORT_PLAYLIST)).count()));
    });

    group.bench_function("long", |b| {
        b.iter(|| black_box(parse_playlist_string(black_box(&long)).count()));
    });

    group.finish();
}

fn bench_grouping(c: &mut Criterion) {
    let mut group = c.benchmark_group("playerjs_group");
    let long = long_playlist();
    let base = Url::parse("https://site.example/player/").unwrap();

    group.bench_function("short", |b| {
        b.iter(|| black_box(group_playlist(parse_playlist_string(black_box(SHORT_PLAYLIST)), None)));
    });

    group.bench_function("long_with_base", |b| {
        b.iter(|| black_box(group_playlist(parse_playlist_string(black_box(&long)), Some(&base))));
    });

    group.finish();
}

fn bench_m3u8(c: &mut Criterion) {
    let main_link = Url::parse("https://cdn.example/hls/master.m3u8").unwrap();

    c.bench_function("m3u8_variants", |b| {
        b.iter(|| black_box(parse_m3u8_text(black_box(MASTER), &main_link, None)));
    });
}

fn bench_direct_match(c: &mut Criterion) {
    let provider = DirectLinkProvider;

    c.bench_function("direct_provider_match", |b| {
        b.iter(|| {
            for input in INPUTS {
                black_box(provider.matches(black_box(input)));
            }
        });
    });
}

fn bench_cipher(c: &mut Criterion) {
    let keys = CipherKeys::new("Ab1+", "xY9/", "QwE", "zT0").unwrap();
    let payload = encode_for_test(&long_playlist(), &keys).unwrap();

    c.bench_function("cipher_decode_long", |b| {
        b.iter(|| black_box(decode_obfuscated_link(black_box(&payload), Some(&keys), None)));
    });
}

criterion_group!(
    benches,
    bench_scanner,
    bench_grouping,
    bench_m3u8,
    bench_direct_match,
    bench_cipher
);
criterion_main!(benches);
