//! rt-translate - リアルタイム音声翻訳パイプライン
//!
//! このクレートは、マイク入力から発話区間を検出して文字起こしし、
//! 蓄積されたテキスト全体を逐次翻訳するリアルタイム処理の中核を提供します。
//!
//! # 主な機能
//!
//! - **マイク入力のモノラル集約**: cpal 経由で任意の入力デバイスからチャンクを取得
//! - **エネルギーベース VAD**: 発話の開始と終了を自動検出してセグメントに切り出し
//! - **クラウド / 端末内の文字起こし**: OpenAI 互換 API とローカルモデルを同一トレイトで切り替え
//! - **デバウンス付き全文翻訳**: 連続する確定セグメントをまとめ、最新の結果だけを採用
//! - **ストリーミングタグフィルタ**: チャット応答から思考タグと制御トークンを除去
//! - **オーバーレイ配置**: 画面領域と除外矩形から字幕の表示位置を決定
//!
//! # アーキテクチャ
//!
//! ```text
//! [Microphone] → [AudioInput] → [RealtimeOrchestrator]
//!                                        ↓
//!                         [EnergyMonitor + VoiceSegmenter]
//!                                        ↓
//!                                [SegmentRecorder]
//!                                        ↓
//!                               [TranscribeBackend]
//!                                        ↓
//!                          ┌─────────────┴─────────────┐
//!                          │                           │
//!               [AccumulatedTranscript]         [PipelineEvent]
//!                          │
//!                          ↓
//!                 [TranslateBackend]
//!                          ↓
//!                   [Translation]
//! ```
//!
//! # 使用例
//!
//! ```no_run
//! use rt_translate::config::Config;
//!
//! // 設定ファイルを読み込み
//! let config = Config::load_or_default("config.toml").unwrap();
//!
//! // またはデフォルト設定を生成
//! Config::write_default("config.toml").unwrap();
//! ```

pub mod audio_input;
pub mod cloud_transcribe;
pub mod config;
pub mod energy_monitor;
pub mod error;
pub mod local_model;
pub mod orchestrator;
pub mod overlay_layout;
pub mod segment_recorder;
pub mod stream_filter;
pub mod transcribe_backend;
pub mod transcript;
pub mod translate;
pub mod types;
pub mod voice_segmenter;
