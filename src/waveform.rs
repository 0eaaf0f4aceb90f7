//! Waveform analysis over 16-bit WAV files.
//!
//! Parses the RIFF container directly, skipping non-standard chunks (LIST,
//! INFO, and anything else unknown) by their declared length. Used for UI
//! visualisation and boundary-adjustment heuristics, never on the
//! transcription path.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::{ZbError, ZbResult};

struct WavData {
    channels: u16,
    sample_rate: u32,
    /// Byte offset of the data chunk payload.
    data_offset: u64,
    data_len: u64,
}

fn parse_header(reader: &mut BufReader<File>, path: &Path) -> ZbResult<WavData> {
    let mut riff = [0_u8; 12];
    reader
        .read_exact(&mut riff)
        .map_err(|_| ZbError::SourceUnreadable(path.to_path_buf()))?;
    if &riff[0..4] != b"RIFF" || &riff[8..12] != b"WAVE" {
        return Err(ZbError::UnsupportedWavFormat(
            "missing RIFF/WAVE header".to_owned(),
        ));
    }

    let mut format: Option<(u16, u16, u32, u16)> = None;

    loop {
        let mut chunk_header = [0_u8; 8];
        if reader.read_exact(&mut chunk_header).is_err() {
            return Err(ZbError::UnsupportedWavFormat(
                "no data chunk found".to_owned(),
            ));
        }
        let chunk_id = [
            chunk_header[0],
            chunk_header[1],
            chunk_header[2],
            chunk_header[3],
        ];
        let chunk_len =
            u32::from_le_bytes([chunk_header[4], chunk_header[5], chunk_header[6], chunk_header[7]])
                as u64;

        match &chunk_id {
            b"fmt " => {
                let mut fmt = vec![0_u8; chunk_len as usize];
                reader.read_exact(&mut fmt)?;
                if fmt.len() < 16 {
                    return Err(ZbError::UnsupportedWavFormat("truncated fmt chunk".to_owned()));
                }
                let audio_format = u16::from_le_bytes([fmt[0], fmt[1]]);
                let channels = u16::from_le_bytes([fmt[2], fmt[3]]);
                let sample_rate = u32::from_le_bytes([fmt[4], fmt[5], fmt[6], fmt[7]]);
                let bits_per_sample = u16::from_le_bytes([fmt[14], fmt[15]]);
                format = Some((audio_format, channels, sample_rate, bits_per_sample));
                if chunk_len % 2 == 1 {
                    reader.seek(SeekFrom::Current(1))?;
                }
            }
            b"data" => {
                let (audio_format, channels, sample_rate, bits_per_sample) =
                    format.ok_or_else(|| {
                        ZbError::UnsupportedWavFormat("data chunk before fmt".to_owned())
                    })?;
                if audio_format != 1 {
                    return Err(ZbError::UnsupportedWavFormat(format!(
                        "only PCM is supported, got format {audio_format}"
                    )));
                }
                if bits_per_sample != 16 {
                    return Err(ZbError::UnsupportedWavFormat(format!(
                        "only 16-bit WAV files are supported, got {bits_per_sample}-bit"
                    )));
                }
                let data_offset = reader.stream_position()?;
                return Ok(WavData {
                    channels,
                    sample_rate,
                    data_offset,
                    data_len: chunk_len,
                });
            }
            // LIST, INFO, fact, and friends: skip by declared length
            // (padded to an even byte boundary).
            _ => {
                let skip = chunk_len + (chunk_len % 2);
                reader.seek(SeekFrom::Current(skip as i64))?;
            }
        }
    }
}

/// Peak amplitudes per bucket (normalized 0-1) at the requested density,
/// plus the file's total duration in seconds.
pub fn compute_waveform_peaks(path: &Path, samples_per_sec: f64) -> ZbResult<(Vec<f64>, f64)> {
    let file = File::open(path).map_err(|_| ZbError::SourceUnreadable(path.to_path_buf()))?;
    let mut reader = BufReader::new(file);
    let wav = parse_header(&mut reader, path)?;

    let bytes_per_frame = u64::from(wav.channels) * 2;
    let total_samples = (wav.data_len / bytes_per_frame) as usize;
    let duration = total_samples as f64 / f64::from(wav.sample_rate);

    let num_peaks = ((duration * samples_per_sec) as usize).max(1);
    let samples_per_peak = (total_samples / num_peaks).max(1);

    reader.seek(SeekFrom::Start(wav.data_offset))?;

    let mut peaks = vec![0.0_f64; num_peaks];
    let mut buffer = vec![0_u8; samples_per_peak * bytes_per_frame as usize];

    for peak in peaks.iter_mut() {
        let mut filled = 0;
        while filled < buffer.len() {
            let n = reader.read(&mut buffer[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            break;
        }

        // First channel only.
        let mut max_val = 0.0_f64;
        let frame = bytes_per_frame as usize;
        for offset in (0..filled.saturating_sub(1)).step_by(frame) {
            let sample = i16::from_le_bytes([buffer[offset], buffer[offset + 1]]);
            let abs = f64::from(sample).abs();
            if abs > max_val {
                max_val = abs;
            }
        }
        *peak = max_val / 32768.0;
    }

    Ok((peaks, duration))
}

/// Read all samples of a 16 kHz mono 16-bit WAV file as normalized f32.
pub fn read_wav_samples(path: &Path) -> ZbResult<Vec<f32>> {
    let file = File::open(path).map_err(|_| ZbError::SourceUnreadable(path.to_path_buf()))?;
    let mut reader = BufReader::new(file);
    let wav = parse_header(&mut reader, path)?;
    if wav.channels != 1 {
        return Err(ZbError::UnsupportedWavFormat(format!(
            "expected mono audio, got {} channels",
            wav.channels
        )));
    }

    reader.seek(SeekFrom::Start(wav.data_offset))?;
    let mut data = vec![0_u8; wav.data_len as usize];
    let mut filled = 0;
    while filled < data.len() {
        let n = reader.read(&mut data[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    data.truncate(filled);
    Ok(crate::media::samples_from_le_bytes(&data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    /// Build a minimal 16-bit PCM WAV with optional junk chunks before data.
    fn write_wav(
        path: &Path,
        sample_rate: u32,
        channels: u16,
        bits: u16,
        samples: &[i16],
        with_list_chunk: bool,
    ) {
        let mut body = Vec::new();
        // fmt chunk
        body.extend_from_slice(b"fmt ");
        body.extend_from_slice(&16_u32.to_le_bytes());
        body.extend_from_slice(&1_u16.to_le_bytes());
        body.extend_from_slice(&channels.to_le_bytes());
        body.extend_from_slice(&sample_rate.to_le_bytes());
        let byte_rate = sample_rate * u32::from(channels) * u32::from(bits) / 8;
        body.extend_from_slice(&byte_rate.to_le_bytes());
        body.extend_from_slice(&(channels * bits / 8).to_le_bytes());
        body.extend_from_slice(&bits.to_le_bytes());

        if with_list_chunk {
            body.extend_from_slice(b"LIST");
            let info = b"INFOISFT\x06\x00\x00\x00zbor\x00\x00";
            body.extend_from_slice(&(info.len() as u32).to_le_bytes());
            body.extend_from_slice(info);
        }

        body.extend_from_slice(b"data");
        body.extend_from_slice(&((samples.len() * 2) as u32).to_le_bytes());
        for s in samples {
            body.extend_from_slice(&s.to_le_bytes());
        }

        let mut file = File::create(path).unwrap();
        file.write_all(b"RIFF").unwrap();
        file.write_all(&((body.len() + 4) as u32).to_le_bytes()).unwrap();
        file.write_all(b"WAVE").unwrap();
        file.write_all(&body).unwrap();
    }

    #[test]
    fn peaks_reflect_bucket_maxima() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        // One second of audio: first half quiet, second half loud.
        let mut samples = vec![1000_i16; 8000];
        samples.extend(vec![16384_i16; 8000]);
        write_wav(&path, 16_000, 1, 16, &samples, false);

        let (peaks, duration) = compute_waveform_peaks(&path, 2.0).unwrap();
        assert_eq!(peaks.len(), 2);
        assert!((duration - 1.0).abs() < 1e-6);
        assert!((peaks[0] - 1000.0 / 32768.0).abs() < 1e-6);
        assert!((peaks[1] - 0.5).abs() < 1e-3);
    }

    #[test]
    fn list_chunk_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tagged.wav");
        write_wav(&path, 16_000, 1, 16, &[0, 100, -100, 0], true);

        let samples = read_wav_samples(&path).unwrap();
        assert_eq!(samples.len(), 4);
        assert!((samples[1] - 100.0 / 32768.0).abs() < 1e-6);
    }

    #[test]
    fn non_16_bit_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wide.wav");
        write_wav(&path, 16_000, 1, 32, &[0, 0], false);

        match compute_waveform_peaks(&path, 10.0) {
            Err(ZbError::UnsupportedWavFormat(msg)) => assert!(msg.contains("32-bit")),
            other => panic!("expected UnsupportedWavFormat, got {other:?}"),
        }
    }

    #[test]
    fn garbage_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.wav");
        std::fs::write(&path, b"RIFFxxxxJUNKdata").unwrap();
        assert!(compute_waveform_peaks(&path, 10.0).is_err());
    }

    #[test]
    fn missing_file_is_source_unreadable() {
        match read_wav_samples(Path::new("/no/such.wav")) {
            Err(ZbError::SourceUnreadable(_)) => {}
            other => panic!("expected SourceUnreadable, got {other:?}"),
        }
    }
}
