use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub vad: VadConfig,
    #[serde(default)]
    pub transcribe: TranscribeConfig,
    pub cloud: Option<CloudConfig>,
    #[serde(default)]
    pub translate: TranslateConfig,
    pub ocr: Option<OcrConfig>,
    #[serde(default)]
    pub overlay: OverlayConfig,
}

/// オーディオ入力設定
///
/// オーディオデバイスからの入力に関する設定。
///
/// # デフォルト値
///
/// - `device_id`: "default" (システムのデフォルトデバイス)
/// - `sample_rate`: 16000 Hz (16kHz - 音声認識の標準値)
/// - `channels`: 1 (モノラル。多チャンネルデバイスはミックスダウン)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AudioConfig {
    #[serde(default = "default_device_id")]
    pub device_id: String,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_audio_channels")]
    pub channels: u16,
}

/// VAD (Voice Activity Detection) 設定
///
/// 音声区間検出に関する設定。エネルギー値は 0〜255 のスカラー。
///
/// # デフォルト値
///
/// - `energy_threshold`: 30
/// - `tick_interval_ms`: 100 ms (判定周期)
/// - `min_voice_ms`: 250 ms (これ未満のセグメントは破棄)
/// - `max_voice_ms`: 30000 ms (強制分割の上限)
/// - `silence_ms`: 800 ms (セグメント終了と判定する無音時間)
/// - `analysis_window`: 1024 サンプル (2のべき乗)
/// - `smoothing`: 0.8 (指数平滑の係数)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VadConfig {
    #[serde(default = "default_energy_threshold")]
    pub energy_threshold: u8,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_min_voice_ms")]
    pub min_voice_ms: u64,
    #[serde(default = "default_max_voice_ms")]
    pub max_voice_ms: u64,
    #[serde(default = "default_silence_ms")]
    pub silence_ms: u64,
    #[serde(default = "default_analysis_window")]
    pub analysis_window: usize,
    #[serde(default = "default_smoothing")]
    pub smoothing: f32,
}

/// 文字起こしバックエンドの種類
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TranscribeBackendType {
    /// クラウドAPI (OpenAI互換 /audio/transcriptions)
    Cloud,
    /// 端末内モデル
    Local,
}

/// 文字起こし設定
///
/// # デフォルト値
///
/// - `backend`: "cloud"
/// - `language`: なし (自動判定)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TranscribeConfig {
    #[serde(default = "default_transcribe_backend")]
    pub backend: TranscribeBackendType,
    /// 言語コード（"ja", "en" など）。省略可能
    pub language: Option<String>,
}

/// クラウド文字起こしAPI設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CloudConfig {
    /// API Key
    pub api_key: String,
    /// エンドポイントURL
    #[serde(default = "default_cloud_endpoint")]
    pub endpoint: String,
    /// モデル名（通常 "whisper-1"）
    #[serde(default = "default_cloud_model")]
    pub model: String,
    /// リクエストタイムアウト（秒）
    #[serde(default = "default_cloud_timeout_seconds")]
    pub timeout_seconds: u64,
}

/// 翻訳設定
///
/// 蓄積テキストの翻訳と、ストリーミング応答（解説・画像翻訳）に
/// 使うOpenAI互換チャットAPIの設定。
///
/// # デフォルト値
///
/// - `endpoint`: OpenAIのチャット補完API
/// - `model`: "gpt-4o-mini"
/// - `target_lang`: "ja"
/// - `debounce_ms`: 1000 ms (翻訳リクエストの間引き)
/// - `show_thinking`: false (thinkingマークアップを表示しない)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TranslateConfig {
    #[serde(default = "default_translate_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_translate_model")]
    pub model: String,
    #[serde(default = "default_target_lang")]
    pub target_lang: String,
    /// 翻訳元の言語。省略時はバックエンドの自動判定に任せる
    pub source_lang: Option<String>,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_show_thinking")]
    pub show_thinking: bool,
    /// カスタムバックエンドの上書き設定
    pub custom: Option<CustomBackendConfig>,
}

/// カスタムバックエンド設定
///
/// 既定のエンドポイントの代わりに自前のOpenAI互換サーバーを
/// 使う場合の設定。`enabled = false` にすると無視される。
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CustomBackendConfig {
    #[serde(default = "default_custom_enabled")]
    pub enabled: bool,
    pub endpoint: String,
    #[serde(default)]
    pub api_key: String,
    pub model: String,
}

/// OCR用バックエンド設定
///
/// 省略時は翻訳側の設定がそのまま使われる。
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OcrConfig {
    pub endpoint: String,
    #[serde(default)]
    pub api_key: String,
    pub model: String,
}

/// オーバーレイ描画設定
///
/// # デフォルト値
///
/// - `min_font_size`: 12.0 px
/// - `max_font_size`: 48.0 px
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OverlayConfig {
    #[serde(default = "default_min_font_size")]
    pub min_font_size: f32,
    #[serde(default = "default_max_font_size")]
    pub max_font_size: f32,
}

// Default functions
fn default_device_id() -> String {
    "default".to_string()
}

fn default_sample_rate() -> u32 {
    16000 // 16kHz - 音声認識APIの標準値
}

fn default_audio_channels() -> u16 {
    1
}

fn default_energy_threshold() -> u8 {
    30
}

fn default_tick_interval_ms() -> u64 {
    100
}

fn default_min_voice_ms() -> u64 {
    250
}

fn default_max_voice_ms() -> u64 {
    30000
}

fn default_silence_ms() -> u64 {
    800
}

fn default_analysis_window() -> usize {
    1024
}

fn default_smoothing() -> f32 {
    0.8
}

fn default_transcribe_backend() -> TranscribeBackendType {
    TranscribeBackendType::Cloud
}

fn default_cloud_endpoint() -> String {
    "https://api.openai.com/v1/audio/transcriptions".to_string()
}

fn default_cloud_model() -> String {
    "whisper-1".to_string()
}

fn default_cloud_timeout_seconds() -> u64 {
    30
}

fn default_translate_endpoint() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}

fn default_translate_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_target_lang() -> String {
    "ja".to_string()
}

fn default_debounce_ms() -> u64 {
    1000
}

fn default_show_thinking() -> bool {
    false
}

fn default_custom_enabled() -> bool {
    true
}

fn default_min_font_size() -> f32 {
    12.0
}

fn default_max_font_size() -> f32 {
    48.0
}

impl Default for Config {
    fn default() -> Self {
        Self {
            audio: AudioConfig::default(),
            vad: VadConfig::default(),
            transcribe: TranscribeConfig::default(),
            cloud: None, // デフォルトではAPIキー未設定
            translate: TranslateConfig::default(),
            ocr: None,
            overlay: OverlayConfig::default(),
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device_id: default_device_id(),
            sample_rate: default_sample_rate(),
            channels: default_audio_channels(),
        }
    }
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            energy_threshold: default_energy_threshold(),
            tick_interval_ms: default_tick_interval_ms(),
            min_voice_ms: default_min_voice_ms(),
            max_voice_ms: default_max_voice_ms(),
            silence_ms: default_silence_ms(),
            analysis_window: default_analysis_window(),
            smoothing: default_smoothing(),
        }
    }
}

impl Default for TranscribeConfig {
    fn default() -> Self {
        Self {
            backend: default_transcribe_backend(),
            language: None,
        }
    }
}

impl Default for TranslateConfig {
    fn default() -> Self {
        Self {
            endpoint: default_translate_endpoint(),
            api_key: String::new(),
            model: default_translate_model(),
            target_lang: default_target_lang(),
            source_lang: None,
            debounce_ms: default_debounce_ms(),
            show_thinking: default_show_thinking(),
            custom: None,
        }
    }
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            min_font_size: default_min_font_size(),
            max_font_size: default_max_font_size(),
        }
    }
}

impl Config {
    /// 設定ファイルから読み込み
    ///
    /// TOML形式の設定ファイルをパースしてConfig構造体を生成する。
    ///
    /// # Arguments
    ///
    /// * `path` - 設定ファイルのパス
    ///
    /// # Errors
    ///
    /// ファイルの読み込みまたはパースに失敗した場合にエラーを返す。
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use rt_translate::config::Config;
    /// let config = Config::from_file("config.toml").unwrap();
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("設定ファイルの読み込みに失敗: {:?}", path.as_ref()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| "設定ファイルのパースに失敗")?;
        Ok(config)
    }

    /// デフォルト設定をファイルに書き出し
    ///
    /// デフォルト値を持つ設定ファイルを生成する。
    /// 既存のファイルは上書きされる。
    ///
    /// # Arguments
    ///
    /// * `path` - 出力先のパス
    ///
    /// # Errors
    ///
    /// ファイルの書き込みに失敗した場合にエラーを返す。
    pub fn write_default<P: AsRef<Path>>(path: P) -> Result<()> {
        let config = Config::default();
        let content =
            toml::to_string_pretty(&config).with_context(|| "設定のシリアライズに失敗")?;
        fs::write(path.as_ref(), content)
            .with_context(|| format!("設定ファイルの書き込みに失敗: {:?}", path.as_ref()))?;
        Ok(())
    }

    /// 設定ファイルがあれば読み込み、なければデフォルトを使用
    ///
    /// # Arguments
    ///
    /// * `path` - 設定ファイルのパス
    ///
    /// # Errors
    ///
    /// ファイルが存在するがパースに失敗した場合にエラーを返す。
    /// ファイルが存在しない場合はエラーにならず、デフォルト設定を返す。
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::from_file(path)
        } else {
            log::warn!(
                "設定ファイルが見つかりません。デフォルト設定を使用します: {:?}",
                path.as_ref()
            );
            Ok(Config::default())
        }
    }

    /// 設定値の整合性を検証
    ///
    /// セグメント境界判定や解析ウィンドウが前提とする制約を
    /// 起動時にまとめて確認する。
    ///
    /// # Errors
    ///
    /// 制約違反があった場合、最初に見つかった違反をエラーとして返す。
    pub fn validate(&self) -> Result<()> {
        if self.audio.sample_rate == 0 {
            bail!("audio.sample_rate は 0 より大きい値を指定してください");
        }
        if self.audio.channels == 0 {
            bail!("audio.channels は 1 以上を指定してください");
        }
        if self.vad.tick_interval_ms == 0 {
            bail!("vad.tick_interval_ms は 0 より大きい値を指定してください");
        }
        if self.vad.min_voice_ms >= self.vad.max_voice_ms {
            bail!(
                "vad.min_voice_ms ({}) は vad.max_voice_ms ({}) より小さい値を指定してください",
                self.vad.min_voice_ms,
                self.vad.max_voice_ms
            );
        }
        if self.vad.silence_ms == 0 {
            bail!("vad.silence_ms は 0 より大きい値を指定してください");
        }
        if self.vad.analysis_window == 0 || !self.vad.analysis_window.is_power_of_two() {
            bail!(
                "vad.analysis_window は 2 のべき乗を指定してください: {}",
                self.vad.analysis_window
            );
        }
        if !(0.0..1.0).contains(&self.vad.smoothing) {
            bail!(
                "vad.smoothing は 0.0 以上 1.0 未満を指定してください: {}",
                self.vad.smoothing
            );
        }
        if self.translate.debounce_ms == 0 {
            bail!("translate.debounce_ms は 0 より大きい値を指定してください");
        }
        if self.overlay.min_font_size <= 0.0
            || self.overlay.min_font_size > self.overlay.max_font_size
        {
            bail!(
                "overlay のフォントサイズ範囲が不正です: min={}, max={}",
                self.overlay.min_font_size,
                self.overlay.max_font_size
            );
        }
        Ok(())
    }
}

/// バックエンド設定の解決対象
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendPurpose {
    /// 翻訳・解説・ストリーミングチャット
    Translate,
    /// 画像内テキストの読み取り
    Ocr,
}

/// 解決済みのバックエンド接続情報
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBackend {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
}

/// 用途に応じたバックエンド接続情報を解決する
///
/// 設定の優先順位を一箇所に集約した純粋関数。分岐は以下の通り:
///
/// - `Translate`: `[translate.custom]` が有効ならそれを使い、
///   無効または未設定なら `[translate]` 本体の値を使う。
/// - `Ocr`: `[ocr]` があればそれを使い、なければ `Translate` と
///   同じ解決結果にフォールバックする。
pub fn resolve_backend_config(config: &Config, purpose: BackendPurpose) -> ResolvedBackend {
    match purpose {
        BackendPurpose::Ocr => {
            if let Some(ocr) = &config.ocr {
                return ResolvedBackend {
                    endpoint: ocr.endpoint.clone(),
                    api_key: ocr.api_key.clone(),
                    model: ocr.model.clone(),
                };
            }
            resolve_backend_config(config, BackendPurpose::Translate)
        }
        BackendPurpose::Translate => {
            if let Some(custom) = &config.translate.custom {
                if custom.enabled {
                    return ResolvedBackend {
                        endpoint: custom.endpoint.clone(),
                        api_key: custom.api_key.clone(),
                        model: custom.model.clone(),
                    };
                }
            }
            ResolvedBackend {
                endpoint: config.translate.endpoint.clone(),
                api_key: config.translate.api_key.clone(),
                model: config.translate.model.clone(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.audio.sample_rate, 16000);
        assert_eq!(config.audio.channels, 1);
        assert_eq!(config.vad.energy_threshold, 30);
        assert_eq!(config.vad.tick_interval_ms, 100);
        assert_eq!(config.vad.min_voice_ms, 250);
        assert_eq!(config.vad.max_voice_ms, 30000);
        assert_eq!(config.vad.silence_ms, 800);
        assert_eq!(config.vad.analysis_window, 1024);
        assert_eq!(config.transcribe.backend, TranscribeBackendType::Cloud);
        assert_eq!(config.translate.target_lang, "ja");
        assert_eq!(config.translate.debounce_ms, 1000);
        assert!(!config.translate.show_thinking);
        assert!(config.cloud.is_none());
        assert!(config.ocr.is_none());
    }

    #[test]
    fn test_default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn test_write_and_read_config() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path();

        // デフォルト設定を書き込み
        Config::write_default(path).unwrap();

        // 読み込み
        let config = Config::from_file(path).unwrap();
        assert_eq!(config.audio.sample_rate, 16000);
        assert_eq!(config.vad.energy_threshold, 30);
        assert_eq!(config.translate.target_lang, "ja");
    }

    #[test]
    fn test_custom_config() {
        let toml_content = r#"
[audio]
device_id = "test-device"
sample_rate = 48000
channels = 2

[vad]
energy_threshold = 50
tick_interval_ms = 50
min_voice_ms = 300
max_voice_ms = 10000
silence_ms = 600
analysis_window = 2048
smoothing = 0.5

[transcribe]
backend = "local"
language = "en"

[cloud]
api_key = "sk-test"
model = "whisper-1"

[translate]
endpoint = "http://localhost:8080/v1/chat/completions"
model = "local-model"
target_lang = "en"
debounce_ms = 500
show_thinking = true

[overlay]
min_font_size = 10.0
max_font_size = 36.0
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = Config::from_file(temp_file.path()).unwrap();

        assert_eq!(config.audio.device_id, "test-device");
        assert_eq!(config.audio.sample_rate, 48000);
        assert_eq!(config.audio.channels, 2);
        assert_eq!(config.vad.energy_threshold, 50);
        assert_eq!(config.vad.tick_interval_ms, 50);
        assert_eq!(config.vad.analysis_window, 2048);
        assert_eq!(config.transcribe.backend, TranscribeBackendType::Local);
        assert_eq!(config.transcribe.language.as_deref(), Some("en"));
        assert_eq!(config.cloud.as_ref().unwrap().api_key, "sk-test");
        assert_eq!(
            config.cloud.as_ref().unwrap().endpoint,
            "https://api.openai.com/v1/audio/transcriptions"
        );
        assert_eq!(config.translate.model, "local-model");
        assert_eq!(config.translate.debounce_ms, 500);
        assert!(config.translate.show_thinking);
        assert_eq!(config.overlay.min_font_size, 10.0);
        assert_eq!(config.overlay.max_font_size, 36.0);
    }

    #[test]
    fn test_load_or_default_nonexistent() {
        let config = Config::load_or_default("nonexistent_file.toml").unwrap();
        // デフォルト設定が返されることを確認
        assert_eq!(config.audio.sample_rate, 16000);
    }

    #[test]
    fn test_partial_config() {
        // 一部の設定のみ記述した場合、残りはデフォルト値が使われる
        let toml_content = r#"
[vad]
energy_threshold = 80

[translate]
target_lang = "en"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = Config::from_file(temp_file.path()).unwrap();

        // 指定した値
        assert_eq!(config.vad.energy_threshold, 80);
        assert_eq!(config.translate.target_lang, "en");

        // デフォルト値
        assert_eq!(config.audio.device_id, "default");
        assert_eq!(config.vad.tick_interval_ms, 100);
        assert_eq!(config.vad.silence_ms, 800);
        assert_eq!(config.translate.debounce_ms, 1000);
    }

    #[test]
    fn test_validate_rejects_bad_window() {
        let mut config = Config::default();
        config.vad.analysis_window = 1000;
        assert!(config.validate().is_err());

        config.vad.analysis_window = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_smoothing() {
        let mut config = Config::default();
        config.vad.smoothing = 1.0;
        assert!(config.validate().is_err());

        config.vad.smoothing = -0.1;
        assert!(config.validate().is_err());

        config.vad.smoothing = 0.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_inverted_durations() {
        let mut config = Config::default();
        config.vad.min_voice_ms = 5000;
        config.vad.max_voice_ms = 1000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resolve_backend_translate_default() {
        let config = Config::default();
        let resolved = resolve_backend_config(&config, BackendPurpose::Translate);
        assert_eq!(resolved.endpoint, "https://api.openai.com/v1/chat/completions");
        assert_eq!(resolved.model, "gpt-4o-mini");
        assert_eq!(resolved.api_key, "");
    }

    #[test]
    fn test_resolve_backend_custom_override() {
        let mut config = Config::default();
        config.translate.custom = Some(CustomBackendConfig {
            enabled: true,
            endpoint: "http://localhost:11434/v1/chat/completions".to_string(),
            api_key: "ollama".to_string(),
            model: "qwen2.5:7b".to_string(),
        });

        let resolved = resolve_backend_config(&config, BackendPurpose::Translate);
        assert_eq!(resolved.endpoint, "http://localhost:11434/v1/chat/completions");
        assert_eq!(resolved.model, "qwen2.5:7b");
    }

    #[test]
    fn test_resolve_backend_custom_disabled() {
        let mut config = Config::default();
        config.translate.custom = Some(CustomBackendConfig {
            enabled: false,
            endpoint: "http://localhost:11434/v1/chat/completions".to_string(),
            api_key: String::new(),
            model: "qwen2.5:7b".to_string(),
        });

        // 無効化されたカスタム設定は使われない
        let resolved = resolve_backend_config(&config, BackendPurpose::Translate);
        assert_eq!(resolved.endpoint, "https://api.openai.com/v1/chat/completions");
    }

    #[test]
    fn test_resolve_backend_ocr_falls_back_to_translate() {
        let mut config = Config::default();
        config.translate.model = "translate-model".to_string();

        let resolved = resolve_backend_config(&config, BackendPurpose::Ocr);
        assert_eq!(resolved.model, "translate-model");

        config.ocr = Some(OcrConfig {
            endpoint: "http://ocr.example.com/v1/chat/completions".to_string(),
            api_key: "ocr-key".to_string(),
            model: "ocr-model".to_string(),
        });

        let resolved = resolve_backend_config(&config, BackendPurpose::Ocr);
        assert_eq!(resolved.endpoint, "http://ocr.example.com/v1/chat/completions");
        assert_eq!(resolved.model, "ocr-model");
    }
}
