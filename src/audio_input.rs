use crate::config::AudioConfig;
use crate::error::PipelineError;
use crate::types::{AudioChunk, AudioFormat};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Sample, SizedSample};
use regex_lite::Regex;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

/// マイクからの音声入力
///
/// このオブジェクトが生きている間だけストリームが動く。ドロップで
/// マイクは完全に解放される。取り込んだ音声はチャンネル数に関わらず
/// モノラルにミックスダウンして送出する。
pub struct AudioInput {
    stream: Option<cpal::Stream>,
}

impl AudioInput {
    /// マイクを取得してキャプチャを開始する
    ///
    /// # Errors
    ///
    /// 権限拒否は `PipelineError::PermissionDenied`、それ以外の
    /// デバイス・転送系の失敗は `PipelineError::Audio`。
    pub fn start(
        config: &AudioConfig,
        tx: mpsc::Sender<AudioChunk>,
    ) -> Result<Self, PipelineError> {
        let device = Self::find_device(config)?;
        log::info!("入力デバイス: {:?}", device.name());

        let default_config = device
            .default_input_config()
            .map_err(|e| classify_capture_error("入力設定の取得に失敗", e.to_string()))?;
        log::info!(
            "デバイス設定: {:?}, {}Hz, {}ch",
            default_config.sample_format(),
            default_config.sample_rate().0,
            default_config.channels()
        );

        let stream_config = cpal::StreamConfig {
            channels: config.channels,
            sample_rate: cpal::SampleRate(config.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let stream = match default_config.sample_format() {
            cpal::SampleFormat::F32 => Self::build_stream::<f32>(&device, &stream_config, tx)?,
            cpal::SampleFormat::I16 => Self::build_stream::<i16>(&device, &stream_config, tx)?,
            cpal::SampleFormat::U16 => Self::build_stream::<u16>(&device, &stream_config, tx)?,
            cpal::SampleFormat::I32 => Self::build_stream::<i32>(&device, &stream_config, tx)?,
            other => {
                return Err(PipelineError::Audio(format!(
                    "サポートされていないサンプルフォーマット: {:?}",
                    other
                )))
            }
        };

        stream
            .play()
            .map_err(|e| classify_capture_error("ストリームの再生開始に失敗", e.to_string()))?;
        log::info!("音声入力ストリームを開始しました");

        Ok(Self {
            stream: Some(stream),
        })
    }

    fn find_device(config: &AudioConfig) -> Result<cpal::Device, PipelineError> {
        let host = cpal::default_host();
        if config.device_id == "default" {
            host.default_input_device().ok_or_else(|| {
                PipelineError::Audio("デフォルト入力デバイスが見つかりません".to_string())
            })
        } else {
            Self::input_devices()?
                .into_iter()
                .find(|d| d.name().ok().as_deref() == Some(&config.device_id))
                .ok_or_else(|| {
                    PipelineError::Audio(format!(
                        "デバイスが見つかりません: {}",
                        config.device_id
                    ))
                })
        }
    }

    fn build_stream<T>(
        device: &cpal::Device,
        stream_config: &cpal::StreamConfig,
        tx: mpsc::Sender<AudioChunk>,
    ) -> Result<cpal::Stream, PipelineError>
    where
        T: SizedSample + Sample + Send + 'static,
        <T as Sample>::Float: Into<f32>,
    {
        let num_channels = stream_config.channels;
        let sample_rate = stream_config.sample_rate.0;

        let data_callback = move |data: &[T], _info: &cpal::InputCallbackInfo| {
            let samples = mix_to_mono(data, num_channels);
            if samples.is_empty() {
                return;
            }
            let timestamp_ns = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos();

            let chunk = AudioChunk {
                samples,
                format: AudioFormat {
                    sample_rate,
                    channels: 1,
                },
                timestamp_ns,
            };

            // コールバック内なのでブロッキング送信はしない
            match tx.try_send(chunk) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    log::warn!("音声バッファが満杯のためチャンクを破棄します");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    log::debug!("音声チャンクの受信側が閉じています");
                }
            }
        };

        let error_callback = move |err| {
            log::error!("ストリームエラー: {}", err);
        };

        device
            .build_input_stream(stream_config, data_callback, error_callback, None)
            .map_err(|e| classify_capture_error("入力ストリームの構築に失敗", e.to_string()))
    }

    /// ストリームを停止してマイクを解放する
    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            log::info!("音声入力ストリームを停止しました");
        }
    }

    /// 利用可能な入力デバイス名の一覧
    pub fn list_devices() -> Result<Vec<String>, PipelineError> {
        Ok(Self::input_devices()?
            .into_iter()
            .filter_map(|device| device.name().ok())
            .collect())
    }

    /// 仮想デバイス・ループバックを除外した入力デバイス一覧
    fn input_devices() -> Result<Vec<cpal::Device>, PipelineError> {
        let host = cpal::default_host();
        let excluded = Regex::new(
            "Background Music|Microsoft Teams Audio|ZoomAudioDevice|BlackHole|Loopback|VB-?Cable",
        )
        .unwrap();
        let devices = host
            .input_devices()
            .map_err(|e| classify_capture_error("デバイス一覧の取得に失敗", e.to_string()))?
            .filter(|device| match device.name() {
                Ok(name) => !excluded.is_match(&name),
                Err(_) => true,
            })
            .collect();
        Ok(devices)
    }
}

impl Drop for AudioInput {
    fn drop(&mut self) {
        self.stop();
    }
}

/// インターリーブされたサンプル列をモノラルのPCMに変換する
///
/// フレームごとに全チャンネルの平均を取り、[-1, 1] にクランプして
/// 16bit整数へ落とす。
fn mix_to_mono<T>(data: &[T], num_channels: u16) -> Vec<i16>
where
    T: Sample,
    <T as Sample>::Float: Into<f32>,
{
    let num_channels = num_channels.max(1) as usize;
    let frames = data.len() / num_channels;
    let mut samples = Vec::with_capacity(frames);
    for frame in 0..frames {
        let mut sum = 0.0f32;
        for ch in 0..num_channels {
            sum += data[frame * num_channels + ch].to_float_sample().into();
        }
        let mixed = (sum / num_channels as f32).clamp(-1.0, 1.0);
        samples.push((mixed * i16::MAX as f32) as i16);
    }
    samples
}

fn classify_capture_error(context: &str, message: String) -> PipelineError {
    if is_permission_message(&message) {
        PipelineError::PermissionDenied(message)
    } else {
        PipelineError::Audio(format!("{}: {}", context, message))
    }
}

/// エラーメッセージが権限拒否を指しているかどうか
fn is_permission_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    ["permission", "denied", "not permitted"]
        .iter()
        .any(|needle| lower.contains(needle))
}
