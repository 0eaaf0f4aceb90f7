//! Media pipe: ffmpeg-backed PCM streaming and conversion.
//!
//! The external converter is the only subprocess surface the core touches.
//! All audio reaches the recognisers as little-endian signed 16-bit PCM at
//! 16 kHz mono, streamed from the converter's stdout. Dropping a stream
//! kills the child so an abandoned read can never leak the process.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::mpsc;
use std::time::Duration;

use crate::error::{ZbError, ZbResult};
use crate::worker::CancellationToken;

pub const SAMPLE_RATE: u32 = 16_000;

/// Audio containers the converter accepts at ingestion.
pub const SUPPORTED_FORMATS: [&str; 8] = [
    ".mp3", ".m4a", ".aac", ".ogg", ".flac", ".wav", ".webm", ".opus",
];

#[must_use]
pub fn is_supported_format(filename: &str) -> bool {
    let lower = filename.to_ascii_lowercase();
    SUPPORTED_FORMATS.iter().any(|ext| lower.ends_with(ext))
}

/// A request for a PCM stream over a file, optionally windowed and
/// tempo-stretched.
#[derive(Debug, Clone)]
pub struct PcmRequest {
    pub path: PathBuf,
    pub sample_rate: u32,
    /// Seek offset in seconds (applied before the input for fast seek).
    pub start_sec: Option<f64>,
    /// Window length in seconds.
    pub duration_sec: Option<f64>,
    /// Tempo factor; values below 1.0 slow the audio, so the output stream
    /// is longer than the window and emergent timestamps are in stretched
    /// time.
    pub tempo: f64,
}

impl PcmRequest {
    #[must_use]
    pub fn whole_file(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            sample_rate: SAMPLE_RATE,
            start_sec: None,
            duration_sec: None,
            tempo: 1.0,
        }
    }

    #[must_use]
    pub fn window(path: &Path, start_sec: f64, duration_sec: f64) -> Self {
        Self {
            path: path.to_path_buf(),
            sample_rate: SAMPLE_RATE,
            start_sec: Some(start_sec),
            duration_sec: Some(duration_sec),
            tempo: 1.0,
        }
    }

    #[must_use]
    pub fn with_tempo(mut self, tempo: f64) -> Self {
        self.tempo = tempo;
        self
    }

    fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        // -ss / -t before -i: input-side seek, so the tempo filter is not
        // truncated by the output duration.
        if let Some(start) = self.start_sec {
            args.push("-ss".to_owned());
            args.push(format!("{start:.3}"));
        }
        if let Some(duration) = self.duration_sec {
            args.push("-t".to_owned());
            args.push(format!("{duration:.3}"));
        }
        args.push("-i".to_owned());
        args.push(self.path.display().to_string());
        if (self.tempo - 1.0).abs() > f64::EPSILON {
            args.push("-af".to_owned());
            args.push(format!("atempo={:.2}", self.tempo));
        }
        args.extend(
            [
                "-f",
                "s16le",
                "-acodec",
                "pcm_s16le",
                "-ar",
                &self.sample_rate.to_string(),
                "-ac",
                "1",
                "-loglevel",
                "error",
                "pipe:1",
            ]
            .map(str::to_owned),
        );
        args
    }
}

/// An owned ffmpeg child with a consumed stdout pipe.
#[derive(Debug)]
pub struct PcmStream {
    child: Child,
    stdout: ChildStdout,
    stderr_rx: mpsc::Receiver<Vec<u8>>,
    command: String,
    finished: bool,
}

impl PcmStream {
    pub fn open(request: &PcmRequest) -> ZbResult<Self> {
        if !request.path.exists() {
            return Err(ZbError::SourceUnreadable(request.path.clone()));
        }
        if which::which("ffmpeg").is_err() {
            return Err(ZbError::ConverterMissing {
                command: "ffmpeg".to_owned(),
            });
        }

        let args = request.to_args();
        let command = format!("ffmpeg {}", args.join(" "));
        tracing::debug!(%command, "spawning converter");

        let mut child = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdout = child.stdout.take().expect("stdout piped");
        let mut stderr = child.stderr.take().expect("stderr piped");

        let (stderr_tx, stderr_rx) = mpsc::channel();
        std::thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf);
            let _ = stderr_tx.send(buf);
        });

        Ok(Self {
            child,
            stdout,
            stderr_rx,
            command,
            finished: false,
        })
    }

    /// Read up to `max_samples` samples, blocking until the chunk is full or
    /// the stream ends. Returns an empty vector at EOF (after verifying the
    /// converter exited cleanly).
    pub fn read_samples(
        &mut self,
        max_samples: usize,
        token: Option<&CancellationToken>,
    ) -> ZbResult<Vec<f32>> {
        if self.finished {
            return Ok(Vec::new());
        }
        if let Some(tok) = token {
            tok.checkpoint()?;
        }

        let mut buf = vec![0_u8; max_samples * 2];
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.stdout.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
            if let Some(tok) = token {
                tok.checkpoint()?;
            }
        }

        if filled == 0 {
            self.finish()?;
            return Ok(Vec::new());
        }

        Ok(samples_from_le_bytes(&buf[..filled]))
    }

    /// Drain the whole stream. Bounded callers only: blocks are limited by
    /// `max_block_duration`, so memory stays bounded.
    pub fn read_to_end(&mut self, token: Option<&CancellationToken>) -> ZbResult<Vec<f32>> {
        let mut all = Vec::new();
        loop {
            let chunk = self.read_samples(16_384, token)?;
            if chunk.is_empty() {
                return Ok(all);
            }
            all.extend_from_slice(&chunk);
        }
    }

    fn finish(&mut self) -> ZbResult<()> {
        self.finished = true;
        let status = self.child.wait()?;
        if !status.success() {
            let stderr = self
                .stderr_rx
                .recv_timeout(Duration::from_millis(200))
                .unwrap_or_default();
            return Err(ZbError::from_converter_failure(
                self.command.clone(),
                status.code().unwrap_or(-1),
                String::from_utf8_lossy(&stderr).into_owned(),
            ));
        }
        Ok(())
    }
}

impl Drop for PcmStream {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Convert little-endian signed 16-bit PCM bytes to normalized f32 samples.
/// A trailing odd byte is ignored.
#[must_use]
pub fn samples_from_le_bytes(data: &[u8]) -> Vec<f32> {
    data.chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0)
        .collect()
}

/// Probe the source duration in seconds via ffprobe.
pub fn probe_duration(path: &Path) -> ZbResult<f64> {
    if which::which("ffprobe").is_err() {
        return Err(ZbError::ConverterMissing {
            command: "ffprobe".to_owned(),
        });
    }

    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(path)
        .output()?;

    if !output.status.success() {
        return Err(ZbError::ProbeFailed {
            path: path.to_path_buf(),
            reason: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let seconds: f64 = stdout.trim().parse().map_err(|_| ZbError::ProbeFailed {
        path: path.to_path_buf(),
        reason: format!("unparseable duration `{}`", stdout.trim()),
    })?;
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(ZbError::ProbeFailed {
            path: path.to_path_buf(),
            reason: format!("invalid duration {seconds}"),
        });
    }
    Ok(seconds)
}

/// Materialise a 16 kHz mono WAV file from any supported container.
pub fn convert_to_wav(input: &Path, output: &Path) -> ZbResult<()> {
    if which::which("ffmpeg").is_err() {
        return Err(ZbError::ConverterMissing {
            command: "ffmpeg".to_owned(),
        });
    }
    if !input.exists() {
        return Err(ZbError::SourceUnreadable(input.to_path_buf()));
    }
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let args = [
        "-i".to_owned(),
        input.display().to_string(),
        "-ar".to_owned(),
        SAMPLE_RATE.to_string(),
        "-ac".to_owned(),
        "1".to_owned(),
        "-f".to_owned(),
        "wav".to_owned(),
        "-y".to_owned(),
        output.display().to_string(),
    ];
    let rendered = format!("ffmpeg {}", args.join(" "));
    let result = Command::new("ffmpeg").args(&args).output()?;
    if !result.status.success() {
        return Err(ZbError::from_converter_failure(
            rendered,
            result.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&result.stderr).into_owned(),
        ));
    }
    Ok(())
}

/// Convert to a WAV file in the system temp directory; the caller cleans up.
pub fn convert_to_wav_temp(input: &Path) -> ZbResult<PathBuf> {
    let base = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "audio".to_owned());
    let output = std::env::temp_dir().join(format!("{base}_converted.wav"));
    convert_to_wav(input, &output)?;
    Ok(output)
}

/// False only for WAV files already at 16 kHz mono. Probe failures lean
/// toward converting.
#[must_use]
pub fn needs_conversion(path: &Path) -> bool {
    let is_wav = path
        .extension()
        .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case("wav"))
        .unwrap_or(false);
    if !is_wav {
        return true;
    }
    if which::which("ffprobe").is_err() {
        return true;
    }

    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-select_streams",
            "a:0",
            "-show_entries",
            "stream=sample_rate,channels",
            "-of",
            "csv=p=0",
        ])
        .arg(path)
        .output();

    match output {
        Ok(output) if output.status.success() => {
            let text = String::from_utf8_lossy(&output.stdout);
            let parts: Vec<&str> = text.trim().split(',').collect();
            !(parts.len() == 2 && parts[0] == "16000" && parts[1] == "1")
        }
        _ => true,
    }
}
