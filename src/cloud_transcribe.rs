use crate::config::CloudConfig;
use crate::error::PipelineError;
use crate::transcribe_backend::TranscribeBackend;
use crate::types::SegmentAudio;
use async_trait::async_trait;
use reqwest::multipart;
use serde::Deserialize;
use std::io::Cursor;

/// 文字起こしAPIのレスポンス
#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// クラウド文字起こしバックエンド
///
/// OpenAI互換の `/audio/transcriptions` エンドポイントにセグメントを
/// WAV (16bit PCM) のmultipartで送信する。コンテナ形式はセッションを
/// 通して常にWAVで統一される。
pub struct CloudTranscribeBackend {
    config: CloudConfig,
    language: Option<String>,
    client: reqwest::Client,
}

impl CloudTranscribeBackend {
    pub fn new(config: CloudConfig, language: Option<String>) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| PipelineError::Backend(format!("HTTPクライアント作成失敗: {}", e)))?;

        Ok(Self {
            config,
            language,
            client,
        })
    }

    /// PCMセグメントをWAVフォーマットに変換
    fn pcm_to_wav(audio: &SegmentAudio) -> Result<Vec<u8>, PipelineError> {
        let spec = hound::WavSpec {
            channels: audio.format.channels,
            sample_rate: audio.format.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec)
                .map_err(|e| PipelineError::Audio(format!("WAVライター作成失敗: {}", e)))?;

            for &sample in &audio.samples {
                writer
                    .write_sample(sample)
                    .map_err(|e| PipelineError::Audio(format!("WAV書き込み失敗: {}", e)))?;
            }

            writer
                .finalize()
                .map_err(|e| PipelineError::Audio(format!("WAV finalize失敗: {}", e)))?;
        }

        Ok(cursor.into_inner())
    }
}

#[async_trait]
impl TranscribeBackend for CloudTranscribeBackend {
    async fn transcribe(&self, audio: &SegmentAudio) -> Result<String, PipelineError> {
        let wav_data = Self::pcm_to_wav(audio)?;
        log::debug!(
            "文字起こしリクエスト: {}ms / WAV {} バイト",
            audio.duration_ms,
            wav_data.len()
        );

        let part = multipart::Part::bytes(wav_data)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| PipelineError::Backend(format!("multipart作成失敗: {}", e)))?;

        let mut form = multipart::Form::new()
            .part("file", part)
            .text("model", self.config.model.clone());

        if let Some(ref language) = self.language {
            form = form.text("language", language.clone());
        }

        let response = self
            .client
            .post(&self.config.endpoint)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|e| PipelineError::Backend(format!("文字起こしリクエスト失敗: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(PipelineError::Backend(format!(
                "文字起こしAPIエラー: {} - {}",
                status, error_text
            )));
        }

        let body: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::MalformedResponse(format!("応答のパース失敗: {}", e)))?;

        Ok(body.text)
    }

    fn name(&self) -> &str {
        "cloud"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AudioFormat;

    fn segment(samples: Vec<i16>) -> SegmentAudio {
        SegmentAudio {
            samples,
            format: AudioFormat {
                sample_rate: 16000,
                channels: 1,
            },
            started_at_ms: 0,
            duration_ms: 100,
        }
    }

    #[test]
    fn test_pcm_to_wav_is_parseable() {
        let samples: Vec<i16> = (0..1600).map(|i| (i % 100) as i16).collect();
        let wav = CloudTranscribeBackend::pcm_to_wav(&segment(samples.clone())).unwrap();

        // RIFF/WAVEヘッダ
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");

        // houndで読み戻して仕様とサンプルを確認
        let reader = hound::WavReader::new(Cursor::new(wav)).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, 16000);
        assert_eq!(spec.bits_per_sample, 16);

        let decoded: Vec<i16> = reader.into_samples().map(|s| s.unwrap()).collect();
        assert_eq!(decoded, samples);
    }

    #[test]
    fn test_backend_name() {
        let backend = CloudTranscribeBackend::new(
            CloudConfig {
                api_key: "test".to_string(),
                endpoint: "https://api.openai.com/v1/audio/transcriptions".to_string(),
                model: "whisper-1".to_string(),
                timeout_seconds: 30,
            },
            None,
        )
        .unwrap();
        assert_eq!(backend.name(), "cloud");
    }
}
