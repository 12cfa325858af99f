use std::sync::mpsc::Sender;

use anyhow::Result;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, FromSample, HostId, Sample, SampleFormat, Stream, StreamConfig};
use tracing::{error, info};

use crate::audio_engine::AudioEngine;

/// Upper bound on frames per callback the stereo scratch bus can hold.
const SCRATCH_FRAMES: usize = 8192;

/// Opens the configured output device, applies the requested sample rate and
/// buffer size on top of its default config and starts the stream around the
/// engine. Returns the live stream plus the active rate and buffer size.
pub fn init_and_run_output(
    host_id: HostId,
    output_device_name: Option<String>,
    requested_sample_rate: Option<u32>,
    requested_buffer_size: Option<u32>,
    engine: AudioEngine,
    error_tx: Sender<String>,
) -> Result<(Stream, u32, u32)> {
    let host = cpal::host_from_id(host_id)?;
    let output_device = if let Some(name) = &output_device_name {
        host.output_devices()?
            .find(|d| d.name().ok().as_ref() == Some(name))
            .ok_or_else(|| anyhow::anyhow!("Output device not found: {}", name))?
    } else {
        host.default_output_device()
            .ok_or_else(|| anyhow::anyhow!("No default output device"))?
    };
    info!(device = %output_device.name()?, "using output device");

    let default_output_config = output_device.default_output_config()?;
    let sample_format = default_output_config.sample_format();

    let mut final_output_config: StreamConfig = default_output_config.into();
    if let Some(sr) = requested_sample_rate {
        final_output_config.sample_rate = cpal::SampleRate(sr);
    }
    if let Some(bs) = requested_buffer_size {
        final_output_config.buffer_size = BufferSize::Fixed(bs);
    }

    let stream = match sample_format {
        SampleFormat::F32 => {
            build_output_stream::<f32>(&output_device, &final_output_config, engine, error_tx)?
        }
        SampleFormat::I16 => {
            build_output_stream::<i16>(&output_device, &final_output_config, engine, error_tx)?
        }
        SampleFormat::U16 => {
            build_output_stream::<u16>(&output_device, &final_output_config, engine, error_tx)?
        }
        format => return Err(anyhow::anyhow!("Unsupported sample format {}", format)),
    };
    stream.play()?;

    let active_sr = final_output_config.sample_rate.0;
    let active_bs = match final_output_config.buffer_size {
        BufferSize::Fixed(size) => size,
        BufferSize::Default => 512, // A reasonable assumption if default
    };

    Ok((stream, active_sr, active_bs))
}

fn build_output_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut engine: AudioEngine,
    error_tx: Sender<String>,
) -> Result<Stream>
where
    T: Sample + cpal::SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    let err_fn = move |err: cpal::StreamError| {
        error!(%err, "output stream error");
        let _ = error_tx.send(err.to_string());
    };
    // Preallocated; the callback only ever shrinks the view into it.
    let mut bus = vec![0.0f32; SCRATCH_FRAMES * 2];

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            let frames = (data.len() / channels).min(SCRATCH_FRAMES);
            let bus = &mut bus[..frames * 2];
            engine.process_block(bus);

            // The engine bus is interleaved stereo; spread it over whatever
            // channel count the device wants.
            for (i, out_frame) in data.chunks_mut(channels).enumerate() {
                let (left, right) = if i < frames {
                    (bus[i * 2], bus[i * 2 + 1])
                } else {
                    (0.0, 0.0)
                };
                if channels == 1 {
                    out_frame[0] = T::from_sample(0.5 * (left + right));
                } else {
                    out_frame[0] = T::from_sample(left);
                    out_frame[1] = T::from_sample(right);
                    for sample in out_frame.iter_mut().skip(2) {
                        *sample = T::from_sample(0.0f32);
                    }
                }
            }
        },
        err_fn,
        None,
    )?;
    Ok(stream)
}
