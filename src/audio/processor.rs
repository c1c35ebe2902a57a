//! # Audio Decoding and Conversion
//!
//! Turns transport payloads into mono `f32` samples at the stream sample rate.
//!
//! ## Key Functions:
//! - **decode_pcm_frame**: websocket binary frame (raw little-endian `f32`) to samples
//! - **decode_audio**: any uploaded audio file; WAV is read directly, everything
//!   else goes through symphonia format detection
//! - **downmix_to_mono** / **resample**: format conversion for uploads and the recognizer

use byteorder::{ByteOrder, LittleEndian};
use rubato::{FftFixedIn, Resampler};
use std::io::Cursor;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;

/// Input block size of the FFT resampler.
const RESAMPLER_CHUNK_SIZE: usize = 1024;

#[derive(Debug, Error)]
pub enum AudioDecodeError {
    #[error("binary frame length {0} is not a multiple of 4 bytes")]
    MisalignedFrame(usize),
    #[error("invalid WAV data: {0}")]
    InvalidWav(String),
    #[error("audio file contains no samples")]
    Empty,
    #[error("unsupported audio format: {0}")]
    Unsupported(String),
    #[error("could not decode audio: {0}")]
    Decode(String),
    #[error("resampling failed: {0}")]
    Resample(String),
}

/// Samples decoded from an upload, before conversion to the stream format.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl DecodedAudio {
    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.channels as f64 / self.sample_rate as f64
    }

    /// Mono samples at `target_rate`.
    pub fn into_mono(self, target_rate: u32) -> Result<Vec<f32>, AudioDecodeError> {
        let mono = downmix_to_mono(&self.samples, self.channels);
        resample(&mono, self.sample_rate, target_rate)
    }
}

/// Decode one websocket binary frame of little-endian `f32` PCM.
///
/// An empty payload decodes to an empty frame.
pub fn decode_pcm_frame(data: &[u8]) -> Result<Vec<f32>, AudioDecodeError> {
    if data.len() % 4 != 0 {
        return Err(AudioDecodeError::MisalignedFrame(data.len()));
    }
    let mut samples = vec![0f32; data.len() / 4];
    LittleEndian::read_f32_into(data, &mut samples);
    Ok(samples)
}

/// Decode a complete WAV file.
pub fn decode_wav(data: &[u8]) -> Result<DecodedAudio, AudioDecodeError> {
    let mut cursor = Cursor::new(data);
    let (header, bit_depth) =
        wav::read(&mut cursor).map_err(|e| AudioDecodeError::InvalidWav(e.to_string()))?;

    let samples: Vec<f32> = match bit_depth {
        wav::BitDepth::Eight(raw) => raw.iter().map(|&s| (s as f32 - 128.0) / 128.0).collect(),
        wav::BitDepth::Sixteen(raw) => raw.iter().map(|&s| s as f32 / 32768.0).collect(),
        wav::BitDepth::TwentyFour(raw) => raw.iter().map(|&s| s as f32 / 8_388_608.0).collect(),
        wav::BitDepth::ThirtyTwoFloat(raw) => raw,
        wav::BitDepth::Empty => return Err(AudioDecodeError::Empty),
    };

    if header.channel_count == 0 {
        return Err(AudioDecodeError::Unsupported("zero channels".to_string()));
    }
    if header.sampling_rate == 0 {
        return Err(AudioDecodeError::Unsupported("zero sample rate".to_string()));
    }
    if samples.is_empty() {
        return Err(AudioDecodeError::Empty);
    }

    Ok(DecodedAudio {
        samples,
        sample_rate: header.sampling_rate,
        channels: header.channel_count,
    })
}

/// Average interleaved channels into one.
pub fn downmix_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let channels = channels as usize;
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Decode an uploaded audio file of any supported container.
///
/// `extension` is the upload's file suffix, used as a format hint.
pub fn decode_audio(data: Vec<u8>, extension: Option<&str>) -> Result<DecodedAudio, AudioDecodeError> {
    if data.starts_with(b"RIFF") {
        match decode_wav(&data) {
            Ok(audio) => return Ok(audio),
            Err(e) => tracing::debug!(error = %e, "WAV reader declined upload, trying symphonia"),
        }
    }
    decode_with_symphonia(data, extension)
}

fn decode_with_symphonia(data: Vec<u8>, extension: Option<&str>) -> Result<DecodedAudio, AudioDecodeError> {
    let mut hint = Hint::new();
    if let Some(extension) = extension {
        hint.with_extension(extension);
    }

    let mss = MediaSourceStream::new(Box::new(Cursor::new(data)), Default::default());
    let detected = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| AudioDecodeError::Unsupported(e.to_string()))?;
    let mut format = detected.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| AudioDecodeError::Unsupported("no audio track".to_string()))?;
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
    let mut channels = track.codec_params.channels.map(|c| c.count() as u16).unwrap_or(0);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| AudioDecodeError::Unsupported(e.to_string()))?;

    let mut samples = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            // end of stream, or a chained stream we do not follow
            Err(SymphoniaError::IoError(_)) | Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(AudioDecodeError::Decode(e.to_string())),
        };
        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                sample_rate = spec.rate;
                channels = spec.channels.count() as u16;
                let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buffer.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buffer.samples());
            }
            Err(SymphoniaError::IoError(_)) | Err(SymphoniaError::DecodeError(_)) => continue,
            Err(e) => return Err(AudioDecodeError::Decode(e.to_string())),
        }
    }

    if samples.is_empty() {
        return Err(AudioDecodeError::Empty);
    }
    if channels == 0 || sample_rate == 0 {
        return Err(AudioDecodeError::Unsupported("missing channel layout or sample rate".to_string()));
    }

    Ok(DecodedAudio {
        samples,
        sample_rate,
        channels,
    })
}

/// Band-limited sample rate conversion with an FFT resampler.
///
/// The tail is zero padded and the filter delay trimmed, so the output holds
/// exactly `len * to_rate / from_rate` samples (rounded).
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>, AudioDecodeError> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let mut resampler =
        FftFixedIn::<f32>::new(from_rate as usize, to_rate as usize, RESAMPLER_CHUNK_SIZE, 1, 1)
            .map_err(|e| AudioDecodeError::Resample(e.to_string()))?;
    let delay = resampler.output_delay();
    let expected = (samples.len() as f64 * to_rate as f64 / from_rate as f64).round() as usize;

    let mut out = Vec::with_capacity(delay + expected + RESAMPLER_CHUNK_SIZE);
    let mut chunk = vec![0f32; RESAMPLER_CHUNK_SIZE];
    let mut offset = 0;
    while out.len() < delay + expected {
        chunk.fill(0.0);
        let take = (samples.len() - offset).min(RESAMPLER_CHUNK_SIZE);
        chunk[..take].copy_from_slice(&samples[offset..offset + take]);
        offset += take;

        let processed = resampler
            .process(&[&chunk[..]], None)
            .map_err(|e| AudioDecodeError::Resample(e.to_string()))?;
        if processed[0].is_empty() {
            return Err(AudioDecodeError::Resample("resampler produced no output".to_string()));
        }
        out.extend_from_slice(&processed[0]);
    }

    Ok(out[delay..delay + expected].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_bytes(header: wav::Header, data: wav::BitDepth) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        wav::write(header, &data, &mut out).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_decode_pcm_frame() {
        let mut bytes = Vec::new();
        for sample in [0.5f32, -0.25, 1.0] {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        assert_eq!(decode_pcm_frame(&bytes).unwrap(), vec![0.5, -0.25, 1.0]);
        assert!(decode_pcm_frame(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_misaligned_frame_is_rejected() {
        assert!(matches!(
            decode_pcm_frame(&[0, 0, 0, 0, 1]),
            Err(AudioDecodeError::MisalignedFrame(5))
        ));
    }

    #[test]
    fn test_decode_sixteen_bit_stereo_wav() {
        let header = wav::Header::new(wav::WAV_FORMAT_PCM, 2, 8000, 16);
        let bytes = wav_bytes(header, wav::BitDepth::Sixteen(vec![16384, -16384, 16384, 16384]));

        let audio = decode_wav(&bytes).unwrap();
        assert_eq!(audio.channels, 2);
        assert_eq!(audio.sample_rate, 8000);
        assert_eq!(audio.duration_seconds(), 2.0 / 8000.0);

        let mono = downmix_to_mono(&audio.samples, audio.channels);
        assert_eq!(mono, vec![0.0, 0.5]);
    }

    #[test]
    fn test_garbage_is_not_wav() {
        assert!(matches!(
            decode_wav(b"definitely not a riff file"),
            Err(AudioDecodeError::InvalidWav(_))
        ));
    }

    fn sine(freq: f32, rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / rate as f32).sin())
            .collect()
    }

    fn rms(samples: &[f32]) -> f32 {
        (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
    }

    #[test]
    fn test_resample_doubles_length() {
        let out = resample(&sine(440.0, 8000, 800), 8000, 16000).unwrap();
        assert_eq!(out.len(), 1600);
    }

    #[test]
    fn test_resample_same_rate_is_identity() {
        let samples = vec![0.1, 0.2, 0.3];
        assert_eq!(resample(&samples, 16000, 16000).unwrap(), samples);
        assert!(resample(&[], 44100, 16000).unwrap().is_empty());
    }

    #[test]
    fn test_downsampling_filters_above_nyquist() {
        // 12 kHz cannot be represented at 16 kHz and must not fold back to 4 kHz
        let out = resample(&sine(12000.0, 48000, 48000), 48000, 16000).unwrap();
        assert_eq!(out.len(), 16000);
        assert!(rms(&out[4000..12000]) < 0.1);

        let out = resample(&sine(1000.0, 48000, 48000), 48000, 16000).unwrap();
        let level = rms(&out[4000..12000]);
        assert!((level - std::f32::consts::FRAC_1_SQRT_2).abs() < 0.05, "rms {}", level);
    }

    #[test]
    fn test_decode_audio_reads_wav_and_rejects_garbage() {
        let header = wav::Header::new(wav::WAV_FORMAT_PCM, 1, 22050, 16);
        let bytes = wav_bytes(header, wav::BitDepth::Sixteen(vec![8192; 2205]));

        let audio = decode_audio(bytes.clone(), Some("wav")).unwrap();
        assert_eq!(audio.sample_rate, 22050);
        assert_eq!(audio.samples.len(), 2205);

        let generic = decode_with_symphonia(bytes, None).unwrap();
        assert_eq!(generic.sample_rate, 22050);
        assert_eq!(generic.channels, 1);
        assert_eq!(generic.samples.len(), 2205);
        assert!((generic.samples[100] - 0.25).abs() < 1e-3);

        assert!(decode_audio(b"definitely not audio".to_vec(), Some("mp3")).is_err());
        assert!(decode_audio(Vec::new(), None).is_err());
    }

    #[test]
    fn test_into_mono_resamples_to_target() {
        let audio = DecodedAudio {
            samples: vec![0.0; 2 * 44100],
            sample_rate: 44100,
            channels: 2,
        };
        assert_eq!(audio.into_mono(16000).unwrap().len(), 16000);
    }
}
