//! Sample-rate conversion kernels
//!
//! Rates are reduced by their GCD and all positions are counted in integer
//! units of `1 / to` of an input sample: one input sample spans `to` units,
//! one output period spans `from` units. Because the carried phase and window
//! budget are integers, feeding a stream in one call or in many arbitrary
//! pieces performs the exact same floating point operations, so the output
//! is identical bit for bit.
//!
//! - upsampling (`from < to`): linear interpolation between the previous and
//!   the next input sample
//! - downsampling (`from >= to`): weighted box average over one output
//!   window; a sample straddling two windows contributes to both

use crate::error::{Result, TranscodeError};

/// Which algorithm a kernel runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResampleMode {
    Bypass,
    Upsample,
    Downsample,
}

/// Snapshot of the state carried between chunks for one channel.
///
/// Weights and phases are expressed in input samples.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ResamplerState {
    /// Partially accumulated output sample (downsampling)
    pub last_output: f64,
    /// Remaining window budget of the partial output (downsampling)
    pub last_weight: f64,
    /// Whether `last_output` / `last_weight` hold a half-finished sample
    pub tail_exists: bool,
    /// Last consumed input sample (upsampling)
    pub last_input: f64,
    /// Position of the next output, measured from `last_input` (upsampling)
    pub phase: f64,
}

#[derive(Debug, Clone, Copy)]
struct ChannelState {
    last_output: f64,
    budget: u64,
    tail_exists: bool,
    last_input: f64,
    position: u64,
}

impl ChannelState {
    fn fresh(from: u64) -> Self {
        Self {
            last_output: 0.0,
            budget: from,
            tail_exists: false,
            last_input: 0.0,
            position: from,
        }
    }
}

/// Synchronous, stateful resampling engine for a fixed channel count.
#[derive(Debug, Clone)]
pub struct ResampleKernel {
    from: u64,
    to: u64,
    mode: ResampleMode,
    states: Vec<ChannelState>,
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

impl ResampleKernel {
    pub fn new(from_rate: u32, to_rate: u32, channels: usize) -> Result<Self> {
        if from_rate == 0 || to_rate == 0 || channels == 0 {
            return Err(TranscodeError::Configuration(format!(
                "invalid resampler settings: from={} to={} channels={}",
                from_rate, to_rate, channels
            )));
        }
        let divisor = gcd(from_rate as u64, to_rate as u64);
        let (from, to) = (from_rate as u64 / divisor, to_rate as u64 / divisor);
        let mode = if from == to {
            ResampleMode::Bypass
        } else if from < to {
            ResampleMode::Upsample
        } else {
            ResampleMode::Downsample
        };

        Ok(Self {
            from,
            to,
            mode,
            states: vec![ChannelState::fresh(from); channels],
        })
    }

    pub fn mode(&self) -> ResampleMode {
        self.mode
    }

    /// `from_rate / to_rate`
    pub fn ratio(&self) -> f64 {
        self.from as f64 / self.to as f64
    }

    pub fn channels(&self) -> usize {
        self.states.len()
    }

    /// Convert one chunk. Every channel is cut to the shortest input channel;
    /// channels past the configured count are ignored.
    pub fn process(&mut self, inputs: &[Vec<f64>]) -> Vec<Vec<f64>> {
        let len = inputs
            .iter()
            .take(self.states.len())
            .map(|c| c.len())
            .min()
            .unwrap_or(0);
        let (from, to, mode) = (self.from, self.to, self.mode);

        self.states
            .iter_mut()
            .zip(inputs)
            .map(|(state, input)| {
                let input = &input[..len];
                match mode {
                    ResampleMode::Bypass => input.to_vec(),
                    ResampleMode::Upsample => {
                        let mut out = Vec::with_capacity(len * to as usize / from as usize + 1);
                        interpolate(from, to, state, input, &mut out);
                        out
                    }
                    ResampleMode::Downsample => {
                        let mut out = Vec::with_capacity(len * to as usize / from as usize + 1);
                        decimate(from, to, state, input, &mut out);
                        out
                    }
                }
            })
            .collect()
    }

    /// Forget all carried state.
    pub fn reset(&mut self) {
        let from = self.from;
        for state in &mut self.states {
            *state = ChannelState::fresh(from);
        }
    }

    pub fn state(&self, channel: usize) -> Option<ResamplerState> {
        let to = self.to as f64;
        self.states.get(channel).map(|s| ResamplerState {
            last_output: s.last_output / to,
            last_weight: s.budget as f64 / to,
            tail_exists: s.tail_exists,
            last_input: s.last_input,
            phase: s.position as f64 / to,
        })
    }
}

fn interpolate(from: u64, to: u64, state: &mut ChannelState, input: &[f64], out: &mut Vec<f64>) {
    if input.is_empty() {
        return;
    }
    // input[i] sits at (i + 1) * to, the carried last input at 0
    let end = input.len() as u64 * to;
    let mut position = state.position;

    while position <= end {
        let index = (position / to) as usize;
        let rem = position % to;
        let left = if index == 0 {
            state.last_input
        } else {
            input[index - 1]
        };
        let value = if rem == 0 {
            left
        } else {
            let right = input[index];
            left + (right - left) * (rem as f64 / to as f64)
        };
        out.push(value);
        position += from;
    }

    state.position = position - end;
    state.last_input = input[input.len() - 1];
}

fn decimate(from: u64, to: u64, state: &mut ChannelState, input: &[f64], out: &mut Vec<f64>) {
    let (mut budget, mut acc) = if state.tail_exists {
        (state.budget, state.last_output)
    } else {
        (from, 0.0)
    };
    let window = from as f64;

    for &sample in input {
        let mut available = to;
        while available > 0 {
            let take = budget.min(available);
            acc += sample * take as f64;
            budget -= take;
            available -= take;
            if budget == 0 {
                out.push(acc / window);
                acc = 0.0;
                budget = from;
            }
        }
    }

    state.tail_exists = budget != from;
    state.budget = budget;
    state.last_output = acc;
}
