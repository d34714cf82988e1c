use ndarray::{s, Array1};

/// One second-order section in transposed direct form II.
/// Coefficients are normalized so that a0 == 1.
#[derive(Clone, Copy, Debug, PartialEq)]
struct Biquad {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

impl Biquad {
    /// Bilinear-transformed analog low-pass pair with quality factor `q`.
    /// `k` is the prewarped cutoff, tan(pi * fc / fs).
    fn lowpass_pair(k: f64, q: f64) -> Self {
        let k2 = k * k;
        let norm = 1.0 / (1.0 + k / q + k2);
        let b0 = k2 * norm;
        Self {
            b0,
            b1: 2.0 * b0,
            b2: b0,
            a1: 2.0 * (k2 - 1.0) * norm,
            a2: (1.0 - k / q + k2) * norm,
        }
    }

    /// First-order section for the real pole of odd orders.
    fn lowpass_single(k: f64) -> Self {
        let b0 = k / (1.0 + k);
        Self { b0, b1: b0, b2: 0.0, a1: (k - 1.0) / (k + 1.0), a2: 0.0 }
    }

    fn dc_gain(&self) -> f64 {
        (self.b0 + self.b1 + self.b2) / (1.0 + self.a1 + self.a2)
    }

    /// Delay-line contents after an infinitely long constant input `level`.
    fn steady_state(&self, level: f64) -> (f64, f64) {
        let out = self.dc_gain() * level;
        let z2 = self.b2 * level - self.a2 * out;
        let z1 = self.b1 * level - self.a1 * out + z2;
        (z1, z2)
    }
}

/// Butterworth low-pass as a cascade of second-order sections.
///
/// `filtfilt` runs the cascade forward and backward, which cancels the phase
/// delay so step impulses stay where they happened. Both passes start from
/// the steady state of the edge value, so a constant signal comes out
/// unchanged instead of ringing.
#[derive(Clone, Debug)]
pub struct ButterworthLowPass {
    sections: Vec<Biquad>,
}

impl ButterworthLowPass {
    /// Returns `None` when the design is impossible: zero order, non-positive
    /// rates, or a cutoff at or above Nyquist.
    pub fn new(order: usize, cutoff_hz: f64, sample_rate_hz: f64) -> Option<Self> {
        if order == 0
            || !cutoff_hz.is_finite()
            || !sample_rate_hz.is_finite()
            || cutoff_hz <= 0.0
            || sample_rate_hz <= 0.0
            || cutoff_hz >= sample_rate_hz / 2.0
        {
            return None;
        }

        let k = (std::f64::consts::PI * cutoff_hz / sample_rate_hz).tan();
        let mut sections = Vec::with_capacity(order.div_ceil(2));
        for pair in 0..order / 2 {
            let angle = (2 * pair + 1) as f64 * std::f64::consts::PI / (2 * order) as f64;
            let q = 1.0 / (2.0 * angle.sin());
            sections.push(Biquad::lowpass_pair(k, q));
        }
        if order % 2 == 1 {
            sections.push(Biquad::lowpass_single(k));
        }
        Some(Self { sections })
    }

    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    /// Samples of odd extension added at each edge before `filtfilt`.
    fn pad_len(&self) -> usize {
        3 * (2 * self.sections.len() + 1)
    }

    /// Causal pass, initialised as if `x[0]` had been applied forever.
    pub fn filter(&self, x: &Array1<f64>) -> Array1<f64> {
        let mut y = x.clone();
        let Some(&first) = x.get(0) else {
            return y;
        };

        let mut level = first;
        for section in &self.sections {
            let (mut z1, mut z2) = section.steady_state(level);
            for sample in y.iter_mut() {
                let input = *sample;
                let out = section.b0 * input + z1;
                z1 = section.b1 * input - section.a1 * out + z2;
                z2 = section.b2 * input - section.a2 * out;
                *sample = out;
            }
            level *= section.dc_gain();
        }
        y
    }

    /// Zero-phase forward-backward filtering with odd edge extension.
    pub fn filtfilt(&self, x: &Array1<f64>) -> Array1<f64> {
        let n = x.len();
        if n < 2 {
            return x.clone();
        }
        let pad = self.pad_len().min(n - 1);
        let first = x[0];
        let last = x[n - 1];

        let mut extended = Vec::with_capacity(n + 2 * pad);
        extended.extend((1..=pad).rev().map(|i| 2.0 * first - x[i]));
        extended.extend(x.iter().copied());
        extended.extend((n - 1 - pad..n - 1).rev().map(|i| 2.0 * last - x[i]));

        let forward = self.filter(&Array1::from_vec(extended));
        let reversed: Array1<f64> = forward.iter().rev().copied().collect();
        let backward = self.filter(&reversed);
        let restored: Array1<f64> = backward.iter().rev().copied().collect();

        restored.slice(s![pad..pad + n]).to_owned()
    }
}

/// Zero-phase low-pass, or the input unchanged when the design is impossible
/// at this sample rate.
pub fn lowpass_zero_phase(x: &Array1<f64>, order: usize, cutoff_hz: f64, sample_rate_hz: f64) -> Array1<f64> {
    match ButterworthLowPass::new(order, cutoff_hz, sample_rate_hz) {
        Some(filter) => filter.filtfilt(x),
        None => {
            log::debug!(
                "Low-pass {:.1} Hz skipped at {:.1} Hz sample rate",
                cutoff_hz,
                sample_rate_hz
            );
            x.clone()
        }
    }
}

/// Slowly adapting estimate of the DC (gravity) component of |acc|.
#[derive(Clone, Debug)]
pub struct GravityTracker {
    alpha: f64,
    estimate: f64,
}

impl GravityTracker {
    pub fn new(alpha: f64, seed: f64) -> Self {
        Self { alpha, estimate: seed }
    }

    pub fn update(&mut self, magnitude: f64) -> f64 {
        self.estimate = self.alpha * self.estimate + (1.0 - self.alpha) * magnitude;
        self.estimate
    }

    pub fn estimate(&self) -> f64 {
        self.estimate
    }
}
