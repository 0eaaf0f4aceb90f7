//! Ingestion orchestrator.
//!
//! Accepts uploads, persists sources, enqueues transcription jobs, drives
//! the block transcriber as background work, and merges partial
//! re-transcriptions back into persisted artifacts.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::align::{self, AlignOp};
use crate::engine::{
    merge_strategy_for_model, EngineRegistry, MergeStrategy, MODEL_REAZONSPEECH,
    MODEL_SENSEVOICE, MODEL_WHISPER_ALIGN,
};
use crate::error::{ZbError, ZbResult};
use crate::media;
use crate::partial::{self, PartialOptions};
use crate::result::{rebuild_text, tokens_to_segments, Token, TranscriptionResult};
use crate::silence::SilenceConfig;
use crate::storage::{
    ArtifactRecord, Database, JobRecord, SourceRecord, SourceStatus, ARTIFACT_TYPE_TRANSCRIPTION,
    JOB_PRIORITY_IMMEDIATE, JOB_TYPE_TRANSCRIBE, JOB_TYPE_TRANSCRIBE_REAZONSPEECH,
    JOB_TYPE_TRANSCRIBE_SENSEVOICE,
};
use crate::transcribe::{self, ProgressFn};
use crate::worker::{CancellationToken, JobHandler, Worker};

/// An uploaded audio file.
pub struct AudioFile {
    pub filename: String,
    pub content: Vec<u8>,
    /// Speaker label; defaults to the file's basename.
    pub speaker: Option<String>,
}

/// Options for audio ingestion.
pub struct IngestOptions {
    pub title: String,
    pub files: Vec<AudioFile>,
    pub priority: i64,
}

#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub source_id: String,
    pub job_id: String,
}

/// The metadata record stored on every audio source.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SourceMetadata {
    pub files: Vec<String>,
    pub speakers: Vec<String>,
    pub title: String,
}

/// Orchestrator settings.
#[derive(Debug, Clone)]
pub struct IngesterSettings {
    /// Root of the on-disk layout (`<data_dir>/sources/audio/<id>/`).
    pub data_dir: PathBuf,
    /// Tempo factor; anything other than 1.0 selects the whole-file
    /// tempo/chunk strategy.
    pub tempo: f64,
    pub chunk_sec: usize,
    /// Configuring a VAD model selects the overlap-silence strategy.
    pub vad_model_path: Option<PathBuf>,
    pub sample_rate: u32,
}

impl IngesterSettings {
    #[must_use]
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            tempo: 1.0,
            chunk_sec: 20,
            vad_model_path: None,
            sample_rate: media::SAMPLE_RATE,
        }
    }
}

/// A partial re-transcription request over a segment range of an existing
/// transcript.
#[derive(Debug, Clone)]
pub struct PartialRetranscribeRequest {
    pub source_id: String,
    /// Start segment index (0-based).
    pub segment_start: usize,
    /// End segment index (inclusive).
    pub segment_end: usize,
    /// Audio tempo, clamped to [0.5, 1.0].
    pub tempo: f64,
    /// Model tag; decides both the engine and the merge primitive.
    pub model: String,
    /// When set, return the merged result without persisting it.
    pub preview: bool,
}

/// Outcome of a partial re-transcription.
#[derive(Debug, Clone)]
pub struct RetranscribeOutcome {
    pub result: TranscriptionResult,
    /// Character diff for alignment-based merges, for UI highlighting.
    pub diff: Option<Vec<AlignOp>>,
    pub time_range: (f64, f64),
    pub new_tokens: usize,
    pub persisted: bool,
}

pub struct AudioIngester {
    db: Arc<Database>,
    engines: Arc<EngineRegistry>,
    settings: IngesterSettings,
}

impl AudioIngester {
    #[must_use]
    pub fn new(db: Arc<Database>, engines: Arc<EngineRegistry>, settings: IngesterSettings) -> Self {
        Self {
            db,
            engines,
            settings,
        }
    }

    /// Persist uploaded files verbatim, create the source row, and enqueue a
    /// transcription job.
    pub fn ingest(&self, opts: IngestOptions) -> ZbResult<IngestOutcome> {
        if opts.files.is_empty() {
            return Err(ZbError::InvalidInput("no audio files provided".to_owned()));
        }
        for file in &opts.files {
            if !media::is_supported_format(&file.filename) {
                return Err(ZbError::InvalidInput(format!(
                    "unsupported audio format: {}",
                    file.filename
                )));
            }
        }

        let source = SourceRecord::new("audio", None, None);
        let source_dir = self
            .settings
            .data_dir
            .join("sources")
            .join("audio")
            .join(&source.id);
        std::fs::create_dir_all(&source_dir)?;

        let mut metadata = SourceMetadata {
            title: opts.title,
            ..Default::default()
        };
        for file in &opts.files {
            let dest = source_dir.join(&file.filename);
            std::fs::write(&dest, &file.content)?;
            metadata.files.push(dest.display().to_string());

            let speaker = file.speaker.clone().unwrap_or_else(|| {
                PathBuf::from(&file.filename)
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| file.filename.clone())
            });
            metadata.speakers.push(speaker);
        }

        let source = SourceRecord {
            file_path: Some(source_dir.display().to_string()),
            metadata: Some(serde_json::to_string(&metadata)?),
            ..source
        };
        self.db.create_source(&source)?;

        let job = JobRecord::new(JOB_TYPE_TRANSCRIBE, Some(source.id.clone()), opts.priority);
        self.db.create_job(&job)?;

        tracing::info!(source_id = %source.id, job_id = %job.id, "audio ingested");
        Ok(IngestOutcome {
            source_id: source.id,
            job_id: job.id,
        })
    }

    /// Reset a source to pending and enqueue a model-tagged transcription
    /// job. Used for full re-transcription.
    pub fn create_transcription_job(
        &self,
        source_id: &str,
        priority: i64,
        model: &str,
    ) -> ZbResult<String> {
        let source = self
            .db
            .get_source(source_id)?
            .ok_or_else(|| ZbError::InvalidInput(format!("source not found: {source_id}")))?;

        self.db
            .update_source_status(&source.id, SourceStatus::Pending)?;

        let job_type = match model {
            MODEL_SENSEVOICE => JOB_TYPE_TRANSCRIBE_SENSEVOICE,
            MODEL_REAZONSPEECH => JOB_TYPE_TRANSCRIBE_REAZONSPEECH,
            _ => JOB_TYPE_TRANSCRIBE,
        };
        let job = JobRecord::new(job_type, Some(source.id.clone()), priority);
        self.db.create_job(&job)?;
        Ok(job.id)
    }

    /// Drop existing transcription artifacts and re-transcribe from scratch
    /// at immediate priority.
    pub fn retranscribe_full(&self, source_id: &str, model: &str) -> ZbResult<String> {
        self.db.delete_artifacts_by_source(source_id)?;
        self.create_transcription_job(source_id, JOB_PRIORITY_IMMEDIATE, model)
    }

    /// Process a transcription job: pick a strategy, transcribe every file,
    /// merge, and persist the artifact. Any error flips the source to
    /// failed before surfacing to the worker.
    pub fn process_transcription(
        &self,
        job: &JobRecord,
        token: &CancellationToken,
        progress: Option<ProgressFn<'_>>,
    ) -> ZbResult<()> {
        let source_id = job
            .source_id
            .as_deref()
            .ok_or_else(|| ZbError::InvalidInput("job has no source id".to_owned()))?;

        let outcome = self.process_transcription_inner(source_id, job, token, progress);
        if let Err(error) = &outcome {
            if !error.is_cancelled() {
                let _ = self.db.update_source_status(source_id, SourceStatus::Failed);
            }
        }
        outcome
    }

    fn process_transcription_inner(
        &self,
        source_id: &str,
        job: &JobRecord,
        token: &CancellationToken,
        progress: Option<ProgressFn<'_>>,
    ) -> ZbResult<()> {
        let report = |percent: i64, step: &str| {
            if let Some(callback) = progress {
                callback(percent, step);
            }
        };
        report(5, "preparing");

        let source = self
            .db
            .get_source(source_id)?
            .ok_or_else(|| ZbError::InvalidInput(format!("source not found: {source_id}")))?;
        self.db
            .update_source_status(&source.id, SourceStatus::Processing)?;

        let metadata: SourceMetadata = source
            .metadata
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?
            .unwrap_or_default();
        if metadata.files.is_empty() {
            return Err(ZbError::InvalidInput(
                "no audio files in source metadata".to_owned(),
            ));
        }

        report(10, "initializing");
        let model = match job.kind.as_str() {
            JOB_TYPE_TRANSCRIBE_SENSEVOICE => MODEL_SENSEVOICE,
            _ => MODEL_REAZONSPEECH,
        };

        let file_count = metadata.files.len();
        let mut results = Vec::with_capacity(file_count);

        for (idx, file_path) in metadata.files.iter().enumerate() {
            token.checkpoint()?;
            let path = PathBuf::from(file_path);

            // Each file gets an equal share of the 30-90% progress range.
            let file_start = 30 + (60 * idx / file_count) as i64;
            let file_end = 30 + (60 * (idx + 1) / file_count) as i64;
            let file_progress = |percent: i64, step: &str| {
                let scaled = file_start + (percent - 10).max(0) * (file_end - file_start) / 80;
                report(scaled, step);
            };

            let mut result = self.transcribe_file(&path, model, token, &file_progress)?;

            if let Some(speaker) = metadata.speakers.get(idx) {
                result.speaker = Some(speaker.clone());
            }
            results.push(result);
        }

        report(90, "saving");
        let final_result = if results.len() == 1 {
            results.into_iter().next().unwrap_or_default()
        } else {
            merge_results(results)
        };

        let artifact = ArtifactRecord::new(
            &source.id,
            ARTIFACT_TYPE_TRANSCRIPTION,
            serde_json::to_string(&final_result)?,
            "json",
        );
        self.db.create_artifact(&artifact)?;

        self.db
            .update_source_status(&source.id, SourceStatus::Completed)?;
        report(100, "");
        Ok(())
    }

    /// Strategy selection, in strict priority order.
    fn transcribe_file(
        &self,
        path: &std::path::Path,
        model: &str,
        token: &CancellationToken,
        progress: ProgressFn<'_>,
    ) -> ZbResult<TranscriptionResult> {
        let mut recognizer = self
            .engines
            .create_recognizer(model, self.settings.sample_rate)?;

        if model == MODEL_SENSEVOICE {
            // SenseVoice reads the whole file in fixed chunks.
            return transcribe::transcribe_with_tempo(
                path,
                1.0,
                self.settings.chunk_sec,
                &mut recognizer,
                Some(progress),
                Some(token),
            );
        }

        if (self.settings.tempo - 1.0).abs() > f64::EPSILON {
            return transcribe::transcribe_with_tempo(
                path,
                self.settings.tempo,
                self.settings.chunk_sec,
                &mut recognizer,
                Some(progress),
                Some(token),
            );
        }

        if self.settings.vad_model_path.is_some() {
            // Overlap-silence: RMS detection tuned for quiet speech plus a
            // 2s context overlap keeps continuous speech intact.
            let config = SilenceConfig::production();
            return transcribe::transcribe_with_overlap(
                path,
                &config,
                1.0,
                2.0,
                &mut recognizer,
                Some(progress),
                Some(token),
            );
        }

        // Fallback: materialise a 16kHz mono WAV and read it whole.
        progress(30, "converting");
        let wav_path = if media::needs_conversion(path) {
            let converted = media::convert_to_wav_temp(path)?;
            Some(converted)
        } else {
            None
        };

        progress(40, "transcribing");
        let result =
            recognizer.transcribe_wav_file(wav_path.as_deref().unwrap_or(path));
        if let Some(converted) = wav_path {
            let _ = std::fs::remove_file(converted);
        }
        result
    }

    /// Re-run a recogniser over a segment range and merge the output back,
    /// using the merge primitive appropriate to the engine.
    pub fn partial_retranscribe(
        &self,
        request: &PartialRetranscribeRequest,
        token: Option<&CancellationToken>,
    ) -> ZbResult<RetranscribeOutcome> {
        let tempo = if request.tempo <= 0.0 || request.tempo > 1.0 {
            0.95
        } else {
            request.tempo.max(0.5)
        };

        let source = self
            .db
            .get_source(&request.source_id)?
            .ok_or_else(|| {
                ZbError::InvalidInput(format!("source not found: {}", request.source_id))
            })?;
        let metadata: SourceMetadata = source
            .metadata
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?
            .unwrap_or_default();
        let audio_path = metadata
            .files
            .first()
            .ok_or_else(|| ZbError::InvalidInput("no audio files".to_owned()))?;

        let (artifact_id, transcript) = self.load_transcript(&request.source_id)?;

        if transcript.segments.is_empty() {
            return Err(ZbError::InvalidInput("no segments in transcript".to_owned()));
        }
        if request.segment_start >= transcript.segments.len() {
            return Err(ZbError::InvalidInput("invalid segment_start".to_owned()));
        }
        if request.segment_end < request.segment_start
            || request.segment_end >= transcript.segments.len()
        {
            return Err(ZbError::InvalidInput("invalid segment_end".to_owned()));
        }

        let start_time = transcript.segments[request.segment_start].start_time;
        let end_time = transcript.segments[request.segment_end].end_time;
        let opts = PartialOptions {
            start_time,
            end_time,
            tempo,
            chunk_sec: 20,
        };

        let strategy = merge_strategy_for_model(&request.model);
        let engine_tag = if request.model == MODEL_WHISPER_ALIGN {
            // Alignment reuses the whisper engine; only the merge differs.
            crate::engine::MODEL_WHISPER
        } else {
            request.model.as_str()
        };
        let mut recognizer = self
            .engines
            .create_recognizer(engine_tag, self.settings.sample_rate)?;

        let audio_path = std::path::Path::new(audio_path);
        let (merged_tokens, merged_segments, diff, new_tokens) = match strategy {
            MergeStrategy::Timestamp => {
                let partial_result =
                    partial::transcribe_partial(audio_path, opts, &mut recognizer, token)?;
                let tokens = partial::merge_tokens(
                    &transcript.tokens,
                    &partial_result.tokens,
                    start_time,
                    end_time,
                );
                let segments = partial::merge_segments(
                    &transcript.segments,
                    request.segment_start,
                    request.segment_end,
                    &partial_result.tokens,
                );
                (tokens, segments, None, partial_result.tokens.len())
            }
            MergeStrategy::DurationRatio => {
                let partial_result =
                    partial::transcribe_partial_uniform(audio_path, opts, &mut recognizer, token)?;
                let tokens = partial::merge_tokens_by_segment_ratio(
                    &transcript.tokens,
                    &partial_result.tokens,
                    &transcript.segments,
                    request.segment_start,
                    request.segment_end,
                    start_time,
                    end_time,
                );
                let segments = partial::merge_segments_by_ratio(
                    &transcript.segments,
                    request.segment_start,
                    request.segment_end,
                    &partial_result.tokens,
                );
                (tokens, segments, None, partial_result.tokens.len())
            }
            MergeStrategy::LcsAlign => {
                let partial_result =
                    partial::transcribe_partial_uniform(audio_path, opts, &mut recognizer, token)?;
                let (aligned, new_segments, ops) = align::align_tokens_for_segments(
                    &transcript.tokens,
                    &partial_result.text,
                    &transcript.segments,
                    request.segment_start,
                    request.segment_end,
                    token,
                )?;
                if aligned.is_empty() {
                    // Nothing aligned; leave the transcript untouched.
                    return Ok(RetranscribeOutcome {
                        result: transcript,
                        diff: Some(ops),
                        time_range: (start_time, end_time),
                        new_tokens: 0,
                        persisted: false,
                    });
                }
                let aligned_len = aligned.len();
                let tokens =
                    partial::merge_tokens(&transcript.tokens, &aligned, start_time, end_time);
                let mut segments =
                    transcript.segments[..request.segment_start].to_vec();
                segments.extend(new_segments);
                if request.segment_end + 1 < transcript.segments.len() {
                    segments.extend_from_slice(&transcript.segments[request.segment_end + 1..]);
                }
                (tokens, segments, Some(ops), aligned_len)
            }
        };

        let updated = TranscriptionResult {
            text: rebuild_text(&merged_tokens),
            tokens: merged_tokens,
            segments: merged_segments,
            total_duration: transcript.total_duration,
            duration: transcript.duration,
            speaker: transcript.speaker.clone(),
        };

        let persisted = if request.preview {
            false
        } else {
            self.db
                .update_artifact_content(&artifact_id, &serde_json::to_string(&updated)?)?;
            true
        };

        Ok(RetranscribeOutcome {
            result: updated,
            diff,
            time_range: (start_time, end_time),
            new_tokens,
            persisted,
        })
    }

    /// Load the latest transcription artifact of a source.
    pub fn load_transcript(&self, source_id: &str) -> ZbResult<(String, TranscriptionResult)> {
        let artifacts = self.db.artifacts_by_source(source_id)?;
        for artifact in artifacts {
            if artifact.kind == ARTIFACT_TYPE_TRANSCRIPTION {
                if let Some(content) = &artifact.content {
                    if let Ok(result) = serde_json::from_str::<TranscriptionResult>(content) {
                        return Ok((artifact.id, result));
                    }
                }
            }
        }
        Err(ZbError::InvalidInput(format!(
            "transcript not found for source {source_id}"
        )))
    }
}

/// Merge per-file results by time order, injecting a speaker label into the
/// text whenever the speaker changes.
#[must_use]
pub fn merge_results(results: Vec<TranscriptionResult>) -> TranscriptionResult {
    struct Tagged {
        token: Token,
        speaker: String,
    }

    let mut processing_total = 0.0;
    let mut all: Vec<Tagged> = Vec::new();
    for result in results {
        processing_total += result.duration;
        let speaker = result.speaker.clone().unwrap_or_default();
        for token in result.tokens {
            all.push(Tagged {
                token,
                speaker: speaker.clone(),
            });
        }
    }
    all.sort_by(|a, b| a.token.start_time.total_cmp(&b.token.start_time));

    let mut text = String::new();
    let mut last_speaker = String::new();
    let mut tokens = Vec::with_capacity(all.len());

    for tagged in all {
        if tagged.speaker != last_speaker && !tagged.speaker.is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(&format!("[{}] ", tagged.speaker));
            last_speaker = tagged.speaker;
        }
        text.push_str(&tagged.token.text);
        tokens.push(tagged.token);
    }

    let total_duration = tokens.last().map(Token::end_time).unwrap_or(0.0);
    let segments = tokens_to_segments(&tokens);
    TranscriptionResult {
        text,
        tokens,
        segments,
        total_duration,
        duration: processing_total,
        speaker: None,
    }
}

/// Register the transcription job handlers on a worker. The handler reports
/// progress into the job row as the strategies advance.
pub fn register_transcription_handlers(worker: &Worker, ingester: Arc<AudioIngester>) {
    for job_type in [
        JOB_TYPE_TRANSCRIBE,
        JOB_TYPE_TRANSCRIBE_REAZONSPEECH,
        JOB_TYPE_TRANSCRIBE_SENSEVOICE,
    ] {
        let ingester = Arc::clone(&ingester);
        let handler: JobHandler = Arc::new(move |token, job| {
            let db = Arc::clone(&ingester.db);
            let job_id = job.id.clone();
            let progress = move |percent: i64, step: &str| {
                let step = if step.is_empty() { None } else { Some(step) };
                let _ = db.update_job_progress(&job_id, percent, step);
            };
            ingester.process_transcription(job, token, Some(&progress))
        });
        worker.register_handler(job_type, handler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::Segment;

    fn ingester(dir: &std::path::Path) -> AudioIngester {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let engines = Arc::new(EngineRegistry::new());
        AudioIngester::new(db, engines, IngesterSettings::new(dir.to_path_buf()))
    }

    fn upload(name: &str) -> AudioFile {
        AudioFile {
            filename: name.to_owned(),
            content: vec![1, 2, 3],
            speaker: None,
        }
    }

    #[test]
    fn ingest_rejects_unsupported_extensions() {
        let dir = tempfile::tempdir().unwrap();
        let ingester = ingester(dir.path());
        let err = ingester
            .ingest(IngestOptions {
                title: String::new(),
                files: vec![upload("notes.txt")],
                priority: 5,
            })
            .unwrap_err();
        assert!(matches!(err, ZbError::InvalidInput(_)));
        assert!(err.to_string().contains("notes.txt"));
    }

    #[test]
    fn ingest_rejects_empty_uploads() {
        let dir = tempfile::tempdir().unwrap();
        let err = ingester(dir.path())
            .ingest(IngestOptions {
                title: String::new(),
                files: Vec::new(),
                priority: 5,
            })
            .unwrap_err();
        assert!(matches!(err, ZbError::InvalidInput(_)));
    }

    #[test]
    fn ingest_persists_files_and_enqueues_a_job() {
        let dir = tempfile::tempdir().unwrap();
        let ingester = ingester(dir.path());

        let outcome = ingester
            .ingest(IngestOptions {
                title: "standup".to_owned(),
                files: vec![upload("alice.wav"), upload("bob.mp3")],
                priority: 2,
            })
            .unwrap();

        let source = ingester.db.get_source(&outcome.source_id).unwrap().unwrap();
        assert_eq!(source.status, SourceStatus::Pending);

        let metadata: SourceMetadata =
            serde_json::from_str(source.metadata.as_deref().unwrap()).unwrap();
        assert_eq!(metadata.title, "standup");
        assert_eq!(metadata.speakers, vec!["alice", "bob"]);
        for file in &metadata.files {
            assert!(std::path::Path::new(file).exists());
            assert_eq!(std::fs::read(file).unwrap(), vec![1, 2, 3]);
        }

        let job = ingester.db.get_job(&outcome.job_id).unwrap().unwrap();
        assert_eq!(job.kind, JOB_TYPE_TRANSCRIBE);
        assert_eq!(job.priority, 2);
        assert_eq!(job.source_id.as_deref(), Some(outcome.source_id.as_str()));
    }

    #[test]
    fn retranscription_job_resets_source_and_tags_model() {
        let dir = tempfile::tempdir().unwrap();
        let ingester = ingester(dir.path());
        let outcome = ingester
            .ingest(IngestOptions {
                title: String::new(),
                files: vec![upload("a.wav")],
                priority: 5,
            })
            .unwrap();

        ingester
            .db
            .update_source_status(&outcome.source_id, SourceStatus::Completed)
            .unwrap();

        let job_id = ingester
            .create_transcription_job(&outcome.source_id, 0, MODEL_SENSEVOICE)
            .unwrap();
        let job = ingester.db.get_job(&job_id).unwrap().unwrap();
        assert_eq!(job.kind, JOB_TYPE_TRANSCRIBE_SENSEVOICE);

        let source = ingester.db.get_source(&outcome.source_id).unwrap().unwrap();
        assert_eq!(source.status, SourceStatus::Pending);
    }

    #[test]
    fn create_transcription_job_requires_an_existing_source() {
        let dir = tempfile::tempdir().unwrap();
        let err = ingester(dir.path())
            .create_transcription_job("missing", 0, MODEL_REAZONSPEECH)
            .unwrap_err();
        assert!(err.to_string().contains("source not found"));
    }

    #[test]
    fn merge_results_injects_speaker_changes() {
        fn result(speaker: &str, tokens: Vec<Token>) -> TranscriptionResult {
            TranscriptionResult {
                speaker: Some(speaker.to_owned()),
                tokens,
                ..Default::default()
            }
        }
        fn token(text: &str, start: f32) -> Token {
            Token {
                text: text.to_owned(),
                start_time: start,
                duration: 0.2,
            }
        }

        let merged = merge_results(vec![
            result("alice", vec![token("A1", 0.0), token("A2", 2.0)]),
            result("bob", vec![token("B1", 1.0)]),
        ]);

        assert_eq!(merged.text, "[alice] A1\n[bob] B1\n[alice] A2");
        let texts: Vec<&str> = merged.tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["A1", "B1", "A2"]);
        assert!((merged.total_duration - 2.2).abs() < 1e-6);
    }

    #[test]
    fn load_transcript_finds_the_transcription_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let ingester = ingester(dir.path());
        let source = SourceRecord::new("audio", None, None);
        ingester.db.create_source(&source).unwrap();

        let transcript = TranscriptionResult {
            text: "hello".to_owned(),
            segments: vec![Segment {
                text: "hello".to_owned(),
                start_time: 0.0,
                end_time: 1.0,
            }],
            ..Default::default()
        };
        let artifact = ArtifactRecord::new(
            &source.id,
            ARTIFACT_TYPE_TRANSCRIPTION,
            serde_json::to_string(&transcript).unwrap(),
            "json",
        );
        ingester.db.create_artifact(&artifact).unwrap();

        let (artifact_id, loaded) = ingester.load_transcript(&source.id).unwrap();
        assert_eq!(artifact_id, artifact.id);
        assert_eq!(loaded.text, "hello");
    }

    #[test]
    fn partial_retranscribe_validates_segment_indices() {
        let dir = tempfile::tempdir().unwrap();
        let ingester = ingester(dir.path());
        let source = SourceRecord {
            metadata: Some(
                serde_json::to_string(&SourceMetadata {
                    files: vec!["/tmp/a.wav".to_owned()],
                    speakers: vec!["a".to_owned()],
                    title: String::new(),
                })
                .unwrap(),
            ),
            ..SourceRecord::new("audio", None, None)
        };
        ingester.db.create_source(&source).unwrap();

        let transcript = TranscriptionResult {
            segments: vec![Segment {
                text: "x".to_owned(),
                start_time: 0.0,
                end_time: 1.0,
            }],
            ..Default::default()
        };
        let artifact = ArtifactRecord::new(
            &source.id,
            ARTIFACT_TYPE_TRANSCRIPTION,
            serde_json::to_string(&transcript).unwrap(),
            "json",
        );
        ingester.db.create_artifact(&artifact).unwrap();

        let err = ingester
            .partial_retranscribe(
                &PartialRetranscribeRequest {
                    source_id: source.id.clone(),
                    segment_start: 0,
                    segment_end: 5,
                    tempo: 0.95,
                    model: MODEL_REAZONSPEECH.to_owned(),
                    preview: true,
                },
                None,
            )
            .unwrap_err();
        assert!(err.to_string().contains("segment_end"));
    }
}
