//! Engine model configuration and environment-driven app settings.

use std::path::{Path, PathBuf};

use crate::error::{ZbError, ZbResult};

/// Configuration for the transducer-style recogniser (the primary Japanese
/// model): encoder/decoder/joiner graphs plus a token table.
#[derive(Debug, Clone)]
pub struct TransducerConfig {
    pub model_dir: PathBuf,
    pub encoder_path: PathBuf,
    pub decoder_path: PathBuf,
    pub joiner_path: PathBuf,
    pub tokens_path: PathBuf,
    pub num_threads: usize,
    pub sample_rate: u32,
    /// Configuring a VAD model switches the orchestrator to the
    /// overlap-silence strategy.
    pub vad_model_path: Option<PathBuf>,
}

impl TransducerConfig {
    /// Discover model files in a directory, preferring int8-quantized
    /// graphs.
    pub fn from_model_dir(model_dir: &Path) -> ZbResult<Self> {
        let encoder_path = find_model_file(
            model_dir,
            &[
                "encoder-epoch-99-avg-1.int8.onnx",
                "encoder.int8.onnx",
                "encoder-epoch-99-avg-1.onnx",
                "encoder.onnx",
            ],
        )
        .ok_or_else(|| missing("encoder", model_dir))?;

        let decoder_path = find_model_file(
            model_dir,
            &["decoder-epoch-99-avg-1.onnx", "decoder.onnx"],
        )
        .ok_or_else(|| missing("decoder", model_dir))?;

        let joiner_path = find_model_file(
            model_dir,
            &[
                "joiner-epoch-99-avg-1.int8.onnx",
                "joiner.int8.onnx",
                "joiner-epoch-99-avg-1.onnx",
                "joiner.onnx",
            ],
        )
        .ok_or_else(|| missing("joiner", model_dir))?;

        let tokens_path = find_model_file(model_dir, &["tokens.txt"])
            .ok_or_else(|| missing("tokens.txt", model_dir))?;

        Ok(Self {
            model_dir: model_dir.to_path_buf(),
            encoder_path,
            decoder_path,
            joiner_path,
            tokens_path,
            num_threads: 2,
            sample_rate: 16_000,
            vad_model_path: None,
        })
    }

    /// Check that every discovered model file still exists.
    pub fn validate(&self) -> ZbResult<()> {
        for (name, path) in [
            ("encoder", &self.encoder_path),
            ("decoder", &self.decoder_path),
            ("joiner", &self.joiner_path),
            ("tokens", &self.tokens_path),
        ] {
            if !path.exists() {
                return Err(ZbError::RecognizerInit(format!(
                    "{name} file not found: {}",
                    path.display()
                )));
            }
        }
        Ok(())
    }
}

/// Configuration for the SenseVoice CTC model.
#[derive(Debug, Clone)]
pub struct SenseVoiceConfig {
    pub model_dir: PathBuf,
    /// zh, en, ja, ko, yue, or auto.
    pub language: String,
    pub use_int8: bool,
    pub num_threads: usize,
    pub sample_rate: u32,
}

impl SenseVoiceConfig {
    #[must_use]
    pub fn new(model_dir: &Path) -> Self {
        Self {
            model_dir: model_dir.to_path_buf(),
            language: "ja".to_owned(),
            use_int8: true,
            num_threads: 4,
            sample_rate: 16_000,
        }
    }

    pub fn validate(&self) -> ZbResult<()> {
        let model_file = if self.use_int8 {
            "model.int8.onnx"
        } else {
            "model.onnx"
        };
        let model_path = self.model_dir.join(model_file);
        if !model_path.exists() {
            return Err(ZbError::RecognizerInit(format!(
                "model file not found: {}",
                model_path.display()
            )));
        }
        let tokens_path = self.model_dir.join("tokens.txt");
        if !tokens_path.exists() {
            return Err(ZbError::RecognizerInit(format!(
                "tokens file not found: {}",
                tokens_path.display()
            )));
        }
        Ok(())
    }
}

/// Configuration for the Whisper encoder-decoder model.
#[derive(Debug, Clone)]
pub struct WhisperConfig {
    pub model_dir: PathBuf,
    /// Language hint, or empty for auto-detect.
    pub language: String,
    pub num_threads: usize,
    pub sample_rate: u32,
}

impl WhisperConfig {
    #[must_use]
    pub fn new(model_dir: &Path) -> Self {
        Self {
            model_dir: model_dir.to_path_buf(),
            language: "ja".to_owned(),
            num_threads: 4,
            sample_rate: 16_000,
        }
    }

    pub fn validate(&self) -> ZbResult<()> {
        let encoder = find_model_file(
            &self.model_dir,
            &[
                "encoder.int8.onnx",
                "encoder.onnx",
                "large-v3-encoder.int8.onnx",
                "large-v3-encoder.onnx",
                "turbo-encoder.int8.onnx",
                "turbo-encoder.onnx",
            ],
        );
        if encoder.is_none() {
            return Err(missing("encoder", &self.model_dir));
        }
        let decoder = find_model_file(
            &self.model_dir,
            &[
                "decoder.int8.onnx",
                "decoder.onnx",
                "large-v3-decoder.int8.onnx",
                "large-v3-decoder.onnx",
                "turbo-decoder.int8.onnx",
                "turbo-decoder.onnx",
            ],
        );
        if decoder.is_none() {
            return Err(missing("decoder", &self.model_dir));
        }
        if find_model_file(&self.model_dir, &["tokens.txt", "large-v3-tokens.txt"]).is_none() {
            return Err(missing("tokens", &self.model_dir));
        }
        Ok(())
    }
}

fn missing(what: &str, dir: &Path) -> ZbError {
    ZbError::RecognizerInit(format!("{what} model not found in {}", dir.display()))
}

fn find_model_file(dir: &Path, candidates: &[&str]) -> Option<PathBuf> {
    candidates
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.exists())
}

/// Application settings read from the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// SQLite file; `DATABASE_PATH`, default `~/.zbor/zbor.db`.
    pub database_path: PathBuf,
    /// Root for source files; `ZBOR_DATA_DIR`, default `data`.
    pub data_dir: PathBuf,
    /// Worker pool size; `ZBOR_WORKERS`, default 1.
    pub workers: usize,
}

impl AppConfig {
    #[must_use]
    pub fn from_env() -> Self {
        let database_path = std::env::var("DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(".zbor")
                    .join("zbor.db")
            });
        let data_dir = std::env::var("ZBOR_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("data"));
        let workers = std::env::var("ZBOR_WORKERS")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|&n| n > 0)
            .unwrap_or(1);
        Self {
            database_path,
            data_dir,
            workers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn transducer_discovery_prefers_int8() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "encoder-epoch-99-avg-1.int8.onnx",
            "encoder-epoch-99-avg-1.onnx",
            "decoder-epoch-99-avg-1.onnx",
            "joiner-epoch-99-avg-1.int8.onnx",
            "tokens.txt",
        ] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }

        let config = TransducerConfig::from_model_dir(dir.path()).unwrap();
        assert!(config
            .encoder_path
            .to_string_lossy()
            .ends_with("encoder-epoch-99-avg-1.int8.onnx"));
        config.validate().unwrap();
    }

    #[test]
    fn transducer_discovery_reports_missing_parts() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("encoder.onnx"), b"x").unwrap();

        match TransducerConfig::from_model_dir(dir.path()) {
            Err(ZbError::RecognizerInit(msg)) => assert!(msg.contains("decoder")),
            other => panic!("expected RecognizerInit, got {other:?}"),
        }
    }

    #[test]
    fn sensevoice_validation_checks_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = SenseVoiceConfig::new(dir.path());
        assert!(config.validate().is_err());

        fs::write(dir.path().join("model.int8.onnx"), b"x").unwrap();
        fs::write(dir.path().join("tokens.txt"), b"x").unwrap();
        config.validate().unwrap();
    }

    #[test]
    fn app_config_reads_env_overrides() {
        std::env::set_var("DATABASE_PATH", "/tmp/custom/zbor.db");
        std::env::set_var("ZBOR_WORKERS", "3");
        let config = AppConfig::from_env();
        assert_eq!(config.database_path, PathBuf::from("/tmp/custom/zbor.db"));
        assert_eq!(config.workers, 3);

        std::env::remove_var("DATABASE_PATH");
        std::env::remove_var("ZBOR_WORKERS");
        let config = AppConfig::from_env();
        assert!(config.database_path.ends_with(".zbor/zbor.db"));
        assert_eq!(config.workers, 1);
        assert_eq!(config.data_dir, PathBuf::from("data"));
    }

    #[test]
    fn whisper_validation_accepts_variant_names() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("large-v3-encoder.int8.onnx"), b"x").unwrap();
        fs::write(dir.path().join("large-v3-decoder.int8.onnx"), b"x").unwrap();
        fs::write(dir.path().join("large-v3-tokens.txt"), b"x").unwrap();
        WhisperConfig::new(dir.path()).validate().unwrap();
    }
}
