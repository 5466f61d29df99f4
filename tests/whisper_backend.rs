#![cfg(feature = "whisper")]

use std::path::PathBuf;
use voxhold::{
    Config, ConfigFingerprint, RecognizerManager, RetentionPolicy, WavClip, WhisperBackend,
};

/// Model named by `VOXHOLD_MODEL`, falling back to the config file's model.
fn find_model() -> Option<PathBuf> {
    let config = Config::default_path()
        .and_then(|path| Config::load_or_default(&path).ok())
        .unwrap_or_default()
        .with_env_overrides();
    let path = config.recognizer.model_files.get("model").cloned();
    match path {
        Some(path) if path.exists() => Some(path),
        _ => {
            eprintln!("\n╔══════════════════════════════════════════════════════════════╗");
            eprintln!("║  NO WHISPER MODEL FOUND: SKIPPING BACKEND TESTS             ║");
            eprintln!("║                                                              ║");
            eprintln!("║  Point VOXHOLD_MODEL at a ggml model, e.g.:                  ║");
            eprintln!("║    VOXHOLD_MODEL=~/models/ggml-tiny.en.bin cargo test \\     ║");
            eprintln!("║      --features whisper                                      ║");
            eprintln!("╚══════════════════════════════════════════════════════════════╝\n");
            None
        }
    }
}

fn language_for_model(path: &std::path::Path) -> &'static str {
    if path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|s| s.contains(".en"))
    {
        "en"
    } else {
        "auto"
    }
}

fn fingerprint_for(path: PathBuf) -> ConfigFingerprint {
    let language = language_for_model(&path);
    ConfigFingerprint::new("whisper")
        .with_model_file("model", path)
        .with_threads(4)
        .with_flag("language", language)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_whisper_stream_lifecycle() {
    let Some(model_path) = find_model() else {
        return;
    };

    let manager = RecognizerManager::builder(WhisperBackend::new())
        .name("whisper-it")
        .build();
    assert!(
        manager
            .prepare(fingerprint_for(model_path), RetentionPolicy::immediate())
            .await,
        "whisper model failed to load"
    );

    // One second of silence: decoding must succeed even if nothing is heard
    let stream = manager.create_stream().await.expect("Failed to create stream");
    manager.accept_waveform(&stream, &vec![0.0; 16000], 16000);
    assert!(manager.is_ready(&stream));
    manager.decode(&stream);
    assert!(!manager.is_ready(&stream));
    eprintln!("[silence] {:?}", manager.result_text(&stream));

    manager.release_stream(stream).await;
    assert!(!manager.is_prepared());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_whisper_transcribes_fixture() {
    let Some(model_path) = find_model() else {
        return;
    };
    let Ok(fixture) = std::env::var("VOXHOLD_TEST_WAV") else {
        eprintln!("VOXHOLD_TEST_WAV not set, skipping fixture transcription");
        return;
    };

    let clip = WavClip::open(std::path::Path::new(&fixture), 16000).expect("Failed to read fixture");
    let manager = RecognizerManager::new(WhisperBackend::new());
    assert!(
        manager
            .prepare(fingerprint_for(model_path), RetentionPolicy::keep_forever())
            .await
    );

    let stream = manager.create_stream().await.expect("Failed to create stream");
    for chunk in clip.chunks(500) {
        manager.accept_waveform(&stream, chunk, clip.sample_rate());
        if manager.is_ready(&stream) {
            manager.decode(&stream);
        }
    }
    manager.decode(&stream);

    let text = manager
        .result_text(&stream)
        .expect("Expected a transcription for the fixture");
    eprintln!("[fixture] Transcription: \"{}\"", text);
    assert!(!text.trim().is_empty());

    manager.release_stream(stream).await;
    manager.shutdown().await;
}

#[tokio::test]
async fn test_missing_model_fails_prepare() {
    let manager = RecognizerManager::new(WhisperBackend::new());
    let fingerprint = fingerprint_for(PathBuf::from("/nonexistent/ggml-base.bin"));
    assert!(manager.try_prepare(fingerprint, RetentionPolicy::default()).await.is_err());
    assert!(!manager.is_prepared());
}
