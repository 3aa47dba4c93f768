//! Generic output processing applied after the plugin has rendered a buffer.
//!
//! Order: forced-stereo mixdown, dry/wet against the latency-compensated
//! input, balance, volume. Each stage runs only when its hint is present and
//! its value differs from neutral.

use crate::PluginHints;

#[derive(Debug, Clone, Copy)]
pub(crate) struct PostProcess {
    pub hints: PluginHints,
    /// Two mono handles each produced one output channel from no input.
    pub custom_mono_out: bool,
    pub mono_input: bool,
    pub dry_wet: f32,
    pub volume: f32,
    pub balance_left: f32,
    pub balance_right: f32,
}

pub(crate) fn apply(
    params: &PostProcess,
    inputs: &[&[f32]],
    outputs: &mut [&mut [f32]],
    frames: usize,
    latency_buffers: &mut [Vec<f32>],
    scratch: &mut [f32],
) {
    if params.custom_mono_out {
        for out in outputs.iter_mut() {
            for sample in out[..frames].iter_mut() {
                *sample *= 0.5;
            }
        }
    }

    if params.hints.contains(PluginHints::CAN_DRYWET) && params.dry_wet != 1.0 && !inputs.is_empty() {
        dry_wet(params, inputs, outputs, frames, latency_buffers);
    }

    if params.hints.contains(PluginHints::CAN_BALANCE)
        && (params.balance_left != -1.0 || params.balance_right != 1.0)
    {
        balance(params, outputs, frames, scratch);
    }

    if params.hints.contains(PluginHints::CAN_VOLUME) && params.volume != 1.0 {
        for out in outputs.iter_mut() {
            for sample in out[..frames].iter_mut() {
                *sample *= params.volume;
            }
        }
    }

    update_latency_buffers(inputs, frames, latency_buffers);
}

fn dry_wet(
    params: &PostProcess,
    inputs: &[&[f32]],
    outputs: &mut [&mut [f32]],
    frames: usize,
    latency_buffers: &[Vec<f32>],
) {
    let wet = params.dry_wet;
    for (i, out) in outputs.iter_mut().enumerate() {
        let c = if params.mono_input { 0 } else { i };
        let Some(input) = inputs.get(c) else {
            continue;
        };
        let delayed = latency_buffers.get(c).map_or(&[][..], Vec::as_slice);
        let latency = delayed.len();

        for (k, sample) in out[..frames].iter_mut().enumerate() {
            let dry = if k < latency {
                delayed[k]
            } else {
                input[k - latency]
            };
            *sample = *sample * wet + dry * (1.0 - wet);
        }
    }
}

/// Left/right balance over channel pairs.
fn balance(params: &PostProcess, outputs: &mut [&mut [f32]], frames: usize, scratch: &mut [f32]) {
    let left_range = (params.balance_left + 1.0) / 2.0;
    let right_range = (params.balance_right + 1.0) / 2.0;
    let old_left = &mut scratch[..frames];

    for pair in outputs.chunks_exact_mut(2) {
        let (left, right) = pair.split_at_mut(1);
        let (left, right) = (&mut left[0][..frames], &mut right[0][..frames]);
        old_left.copy_from_slice(left);

        for k in 0..frames {
            left[k] = old_left[k] * (1.0 - left_range) + right[k] * (1.0 - right_range);
            right[k] = right[k] * right_range + old_left[k] * left_range;
        }
    }
}

/// Keep the last `latency` input frames of each channel for the next buffer.
fn update_latency_buffers(inputs: &[&[f32]], frames: usize, latency_buffers: &mut [Vec<f32>]) {
    for (buffer, input) in latency_buffers.iter_mut().zip(inputs) {
        let latency = buffer.len();
        if latency == 0 {
            continue;
        }
        if frames >= latency {
            buffer.copy_from_slice(&input[frames - latency..frames]);
        } else {
            buffer.copy_within(frames.., 0);
            buffer[latency - frames..].copy_from_slice(&input[..frames]);
        }
    }
}
