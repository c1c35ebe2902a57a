//! Slaney-normalised mel filter bank in the row-major layout candle's
//! `pcm_to_mel` expects (`n_mels` rows of `N_FFT / 2 + 1` bins).

use candle_transformers::models::whisper as m;

const F_SP: f64 = 200.0 / 3.0;
const MIN_LOG_HZ: f64 = 1000.0;
const MIN_LOG_MEL: f64 = 15.0;
// ln(6.4) / 27
const LOGSTEP: f64 = 0.068_751_777_420_949_12;

fn hz_to_mel(freq: f64) -> f64 {
    if freq < MIN_LOG_HZ {
        freq / F_SP
    } else {
        MIN_LOG_MEL + (freq / MIN_LOG_HZ).ln() / LOGSTEP
    }
}

fn mel_to_hz(mel: f64) -> f64 {
    if mel < MIN_LOG_MEL {
        mel * F_SP
    } else {
        MIN_LOG_HZ * ((mel - MIN_LOG_MEL) * LOGSTEP).exp()
    }
}

/// Filters for `n_mels` bands between 0 Hz and Nyquist at Whisper's sample rate.
pub fn whisper_mel_filters(n_mels: usize) -> Vec<f32> {
    let sample_rate = m::SAMPLE_RATE as f64;
    let n_fft = m::N_FFT;
    let n_freqs = n_fft / 2 + 1;

    let mel_min = hz_to_mel(0.0);
    let mel_max = hz_to_mel(sample_rate / 2.0);
    let edges: Vec<f64> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_min + (mel_max - mel_min) * i as f64 / (n_mels + 1) as f64))
        .collect();

    let mut filters = vec![0f32; n_mels * n_freqs];
    for band in 0..n_mels {
        let (lower, center, upper) = (edges[band], edges[band + 1], edges[band + 2]);
        let enorm = 2.0 / (upper - lower);
        for bin in 0..n_freqs {
            let freq = bin as f64 * sample_rate / n_fft as f64;
            let weight = if freq >= lower && freq <= center {
                (freq - lower) / (center - lower)
            } else if freq > center && freq <= upper {
                (upper - freq) / (upper - center)
            } else {
                0.0
            };
            filters[band * n_freqs + bin] = (enorm * weight) as f32;
        }
    }
    filters
}
