//! Signal processing used by the match job.
//!
//! Extraction and matching sit behind [`EnfExtractor`] and
//! [`SubsequenceMatcher`]; the implementations here are straightforward
//! baselines (spectral peak tracking and z-normalised nearest subsequence)
//! and can be replaced without touching the job.

use std::f64::consts::PI;
use std::io::Cursor;

use enf_core::{EnfError, EnfResult};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

/// Narrowest passband of the pre-decimation filter.
const MIN_PASSBAND_HZ: f64 = 2.0;

/// Mono PCM audio, samples scaled to `[-1, 1]`.
#[derive(Debug, Clone)]
pub struct Recording {
    pub sample_rate: u32,
    pub samples: Vec<f64>,
}

impl Recording {
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Decode a WAV file. Multi-channel files keep their first channel only.
pub fn decode_wav(bytes: &[u8]) -> EnfResult<Recording> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| EnfError::match_failure(format!("Could not read WAV file: {e}")))?;
    let spec = reader.spec();
    if spec.sample_rate == 0 {
        return Err(EnfError::match_failure("WAV file declares a sample rate of 0"));
    }
    let channels = usize::from(spec.channels.max(1));

    let samples: Result<Vec<f64>, hound::Error> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .step_by(channels)
            .map(|s| s.map(f64::from))
            .collect(),
        hound::SampleFormat::Int => {
            let scale = 2f64.powi(i32::from(spec.bits_per_sample) - 1);
            reader
                .samples::<i32>()
                .step_by(channels)
                .map(|s| s.map(|v| f64::from(v) / scale))
                .collect()
        }
    };
    let samples =
        samples.map_err(|e| EnfError::match_failure(format!("Could not decode WAV samples: {e}")))?;

    Ok(Recording {
        sample_rate: spec.sample_rate,
        samples,
    })
}

/// Frequency band the query trace is searched in, around a harmonic of the
/// nominal grid frequency.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtractionBand {
    pub low_cut: f64,
    pub high_cut: f64,
    pub harmonic: u32,
}

impl ExtractionBand {
    /// Widen the band by as much as the reference strays from nominal:
    /// `low = h·n − (n − min)`, `high = h·n + (max − n)`.
    pub fn from_reference(nominal: f64, harmonic: u32, reference: &[f64]) -> EnfResult<Self> {
        let (min, max) = reference
            .iter()
            .filter(|f| f.is_finite())
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), f| {
                (lo.min(*f), hi.max(*f))
            });
        if min > max {
            return Err(EnfError::match_failure("Reference series is empty"));
        }

        let centre = f64::from(harmonic) * nominal;
        Ok(Self {
            low_cut: centre - (nominal - min),
            high_cut: centre + (max - nominal),
            harmonic,
        })
    }
}

/// Turns a recording into a per-second frequency trace in grid units.
pub trait EnfExtractor: Send + Sync {
    fn extract(
        &self,
        recording: &Recording,
        band: &ExtractionBand,
        target_rate: u32,
    ) -> EnfResult<Vec<f64>>;
}

/// Locates `query` inside `reference`.
pub trait SubsequenceMatcher: Send + Sync {
    /// Start index in `reference` of the closest window.
    fn best_match(&self, query: &[f64], reference: &[f64]) -> EnfResult<usize>;
}

/// Band-pass around the harmonic, decimate to the target rate, then one
/// estimate per second: strongest spectral peak inside the band, refined by
/// parabolic interpolation and divided by the harmonic.
#[derive(Debug, Clone)]
pub struct SpectralPeakExtractor {
    /// Zero-padded FFT length; sets the bin spacing.
    pub fft_len: usize,
}

impl Default for SpectralPeakExtractor {
    fn default() -> Self {
        Self { fft_len: 8192 }
    }
}

impl EnfExtractor for SpectralPeakExtractor {
    fn extract(
        &self,
        recording: &Recording,
        band: &ExtractionBand,
        target_rate: u32,
    ) -> EnfResult<Vec<f64>> {
        let rate = f64::from(target_rate);
        if band.high_cut >= rate / 2.0 {
            return Err(EnfError::match_failure(format!(
                "A {target_rate} Hz analysis rate cannot resolve {:.2} Hz",
                band.high_cut
            )));
        }

        if f64::from(recording.sample_rate) <= 2.0 * band.high_cut {
            return Err(EnfError::match_failure(format!(
                "A {} Hz recording cannot carry {:.2} Hz",
                recording.sample_rate, band.high_cut
            )));
        }

        let filtered = bandpass(&recording.samples, recording.sample_rate, band);
        let signal = decimate(&filtered, recording.sample_rate, target_rate)?;
        let frame_len = target_rate as usize;
        let frames = signal.len() / frame_len;
        if frames == 0 {
            return Err(EnfError::match_failure(
                "Recording is shorter than one second",
            ));
        }

        let n = self.fft_len.max(frame_len.next_power_of_two());
        let fft = FftPlanner::<f64>::new().plan_fft_forward(n);
        let window = hann_window(frame_len);
        let half = n / 2;
        let lo_bin = ((band.low_cut * n as f64 / rate).floor() as usize).clamp(1, half - 1);
        let hi_bin = ((band.high_cut * n as f64 / rate).ceil() as usize).clamp(lo_bin, half - 1);

        let mut buffer = vec![Complex::new(0.0, 0.0); n];
        let mut trace = Vec::with_capacity(frames);
        for frame in signal.chunks_exact(frame_len) {
            let mean = frame.iter().sum::<f64>() / frame_len as f64;
            buffer.fill(Complex::new(0.0, 0.0));
            for ((slot, sample), w) in buffer.iter_mut().zip(frame).zip(&window) {
                slot.re = (sample - mean) * w;
            }
            fft.process(&mut buffer);

            let peak = (lo_bin..=hi_bin)
                .max_by(|a, b| buffer[*a].norm_sqr().total_cmp(&buffer[*b].norm_sqr()))
                .unwrap_or(lo_bin);
            let offset = parabolic_offset(
                buffer[peak - 1].norm(),
                buffer[peak].norm(),
                buffer[peak + 1].norm(),
            );
            let hz = (peak as f64 + offset) * rate / n as f64;
            trace.push(hz / f64::from(band.harmonic));
        }
        Ok(trace)
    }
}

/// Nearest neighbour under z-normalised Euclidean distance.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZNormalizedMatcher;

impl SubsequenceMatcher for ZNormalizedMatcher {
    fn best_match(&self, query: &[f64], reference: &[f64]) -> EnfResult<usize> {
        let m = query.len();
        if m == 0 {
            return Err(EnfError::match_failure("Query series is empty"));
        }
        if reference.len() < m {
            return Err(EnfError::match_failure(format!(
                "Reference series ({} samples) is shorter than the query ({m} samples)",
                reference.len()
            )));
        }

        let query = znormalize(query);
        let mut best: Option<(usize, f64)> = None;
        for (start, window) in reference.windows(m).enumerate() {
            let (mean, std) = mean_std(window);
            let distance: f64 = query
                .iter()
                .zip(window)
                .map(|(q, r)| {
                    let r = if std > f64::EPSILON { (r - mean) / std } else { 0.0 };
                    (q - r) * (q - r)
                })
                .sum();
            if distance.is_finite() && best.map_or(true, |(_, d)| distance < d) {
                best = Some((start, distance));
            }
        }

        best.map(|(start, _)| start)
            .ok_or_else(|| EnfError::match_failure("No comparable window in the reference series"))
    }
}

/// Second-order band-pass section (RBJ cookbook, 0 dB peak gain).
#[derive(Debug, Clone, Copy)]
struct Biquad {
    b0: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

impl Biquad {
    fn bandpass(centre: f64, bandwidth: f64, rate: f64) -> Self {
        let w0 = 2.0 * PI * centre / rate;
        let alpha = w0.sin() * bandwidth / (2.0 * centre);
        let a0 = 1.0 + alpha;
        Self {
            b0: alpha / a0,
            b2: -alpha / a0,
            a1: -2.0 * w0.cos() / a0,
            a2: (1.0 - alpha) / a0,
        }
    }

    /// Transposed direct form II; `b1` is zero for a band-pass.
    fn run(&self, samples: impl Iterator<Item = f64>) -> Vec<f64> {
        let (mut z1, mut z2) = (0.0, 0.0);
        samples
            .map(|x| {
                let y = self.b0 * x + z1;
                z1 = z2 - self.a1 * y;
                z2 = self.b2 * x - self.a2 * y;
                y
            })
            .collect()
    }
}

/// Zero-phase band-pass over `band`, run forwards then backwards so frames
/// stay aligned with the recording.
pub fn bandpass(samples: &[f64], rate: u32, band: &ExtractionBand) -> Vec<f64> {
    let centre = 0.5 * (band.low_cut + band.high_cut);
    let width = (band.high_cut - band.low_cut).max(MIN_PASSBAND_HZ);
    let section = Biquad::bandpass(centre, width, f64::from(rate));

    let forward = section.run(samples.iter().copied());
    let mut out = section.run(forward.into_iter().rev());
    out.reverse();
    out
}

fn resample_failure(err: impl std::fmt::Display) -> EnfError {
    EnfError::match_failure(format!("Could not resample recording: {err}"))
}

/// Band-limited sinc conversion to `to` Hz. The output is `len · to / from`
/// samples long and aligned with the input.
pub fn decimate(samples: &[f64], from: u32, to: u32) -> EnfResult<Vec<f64>> {
    if from == to || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    let mut resampler = SincFixedIn::<f64>::new(
        f64::from(to) / f64::from(from),
        1.0,
        params,
        samples.len(),
        1,
    )
    .map_err(resample_failure)?;

    let expected = (samples.len() as u64 * u64::from(to) / u64::from(from)) as usize;
    let delay = resampler.output_delay();
    let input = [samples];
    let mut out = resampler
        .process(&input[..], None)
        .map_err(resample_failure)?
        .swap_remove(0);

    // Flush the kernel's delay line with silence.
    for _ in 0..2 {
        if out.len() >= expected + delay {
            break;
        }
        let tail = resampler
            .process_partial(None::<&[&[f64]]>, None)
            .map_err(resample_failure)?;
        out.extend(tail.into_iter().flatten());
    }

    out.drain(..delay.min(out.len()));
    out.truncate(expected);
    Ok(out)
}

fn hann_window(length: usize) -> Vec<f64> {
    if length <= 1 {
        return vec![1.0; length.max(1)];
    }
    let denom = (length - 1) as f64;
    (0..length)
        .map(|n| 0.5 * (1.0 - (2.0 * PI * n as f64 / denom).cos()))
        .collect()
}

/// Vertex of the parabola through three neighbouring magnitudes, in bins.
fn parabolic_offset(left: f64, centre: f64, right: f64) -> f64 {
    let denom = left - 2.0 * centre + right;
    if denom.abs() < f64::EPSILON {
        return 0.0;
    }
    (0.5 * (left - right) / denom).clamp(-0.5, 0.5)
}

fn mean_std(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    (mean, var.sqrt())
}

fn znormalize(values: &[f64]) -> Vec<f64> {
    let (mean, std) = mean_std(values);
    values
        .iter()
        .map(|v| if std > f64::EPSILON { (v - mean) / std } else { 0.0 })
        .collect()
}
