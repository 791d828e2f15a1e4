use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{error, info};

use super::VoiceBank;
use crate::error::SynthError;

/// Stream parameters of the default output device.
pub fn default_output_config() -> Result<cpal::StreamConfig, SynthError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| SynthError::Unavailable("no output device".into()))?;
    let config = device
        .default_output_config()
        .map_err(|e| SynthError::Unavailable(e.to_string()))?;
    Ok(config.into())
}

/// Play `bank` on the default output device. The stream stops when dropped.
pub fn start_stream(
    stream_config: &cpal::StreamConfig,
    mut bank: VoiceBank,
) -> Result<cpal::Stream, SynthError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| SynthError::Unavailable("no output device".into()))?;

    info!(
        channels = stream_config.channels,
        sample_rate = stream_config.sample_rate,
        max_voices = bank.config().max_voices,
        "audio output"
    );

    let stream = device
        .build_output_stream(
            stream_config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                bank.render(data);
            },
            |err| error!(error = %err, "audio stream error"),
            None,
        )
        .map_err(|e| SynthError::Unavailable(e.to_string()))?;

    stream
        .play()
        .map_err(|e| SynthError::Unavailable(e.to_string()))?;

    Ok(stream)
}
