use serde::Serialize;
use std::time::SystemTime;

/// 16ビット整数型のオーディオサンプル
///
/// PCM形式の音声データを表現するための型エイリアス。
/// -32768 から 32767 の範囲の値を取る。
pub type SampleI16 = i16;

/// 1ティック分のエネルギー値
///
/// 解析ウィンドウ上の周波数エネルギーを 0〜255 のスカラーに
/// 正規化したもの。閾値判定（VAD）に使用する。
pub type EnergySample = u8;

/// オーディオフォーマット情報
///
/// 音声データのサンプリングレートとチャンネル数を保持する。
///
/// # Examples
///
/// ```
/// # use rt_translate::types::AudioFormat;
/// let format = AudioFormat {
///     sample_rate: 16000, // 16kHz
///     channels: 1,        // モノラル
/// };
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AudioFormat {
    /// サンプリングレート (Hz)
    ///
    /// 典型的な値: 8000, 16000, 44100, 48000
    pub sample_rate: u32,

    /// チャンネル数
    ///
    /// 1: モノラル, 2: ステレオ
    pub channels: u16,
}

/// オーディオチャンク
///
/// タイムスタンプ付きの音声データのまとまり。
/// オーディオ入力コールバックからパイプラインへ push される単位。
#[derive(Clone, Debug)]
pub struct AudioChunk {
    /// PCM音声サンプルの配列
    pub samples: Vec<SampleI16>,

    /// オーディオフォーマット情報
    pub format: AudioFormat,

    /// このチャンクの開始タイムスタンプ (ナノ秒)
    ///
    /// UNIX_EPOCHからの経過時間
    pub timestamp_ns: u128,
}

/// 確定した音声セグメント
///
/// VoiceSegmenterが区切った1発話分の音声データ。
/// 確定後は変更されず、所有権ごと文字起こしバックエンドに渡される。
#[derive(Clone, Debug)]
pub struct SegmentAudio {
    /// セグメント全体のPCMサンプル
    pub samples: Vec<SampleI16>,

    /// 録音時のフォーマット
    pub format: AudioFormat,

    /// セッション開始からのセグメント開始時刻 (ミリ秒)
    pub started_at_ms: u64,

    /// セグメントの長さ (ミリ秒)
    pub duration_ms: u64,
}

impl SegmentAudio {
    /// サンプル数から計算した実際の音声長 (ミリ秒)
    ///
    /// `duration_ms` はVADのティック刻みで数えた値なので、
    /// 実際に録音されたサンプル数とは僅かにずれることがある。
    pub fn recorded_ms(&self) -> u64 {
        if self.format.sample_rate == 0 {
            return 0;
        }
        (self.samples.len() as u64 * 1000) / self.format.sample_rate as u64
    }
}

/// 文字起こし結果の1片
///
/// バックエンドから返ったテキストをイベントとして通知する際の形式。
/// JSON形式でシリアライズしてCLIに出力される。
///
/// # JSON出力例
///
/// ```json
/// {
///   "timestamp": "2025-01-02T14:30:15+00:00",
///   "timestamp_seconds": 15.234,
///   "text": "こんにちは、元気ですか",
///   "is_final": true
/// }
/// ```
#[derive(Clone, Debug, Serialize)]
pub struct TranscriptPiece {
    /// ISO 8601形式のタイムスタンプ
    pub timestamp: String,

    /// セッション開始時刻からの経過秒数
    pub timestamp_seconds: f64,

    /// 文字起こしテキスト
    pub text: String,

    /// 確定結果かどうか
    ///
    /// このクレートのバックエンドはセグメント単位で確定結果のみを
    /// 返すため通常trueだが、部分仮説を返すバックエンドを繋いだ場合は
    /// falseが流れることを許容する。
    pub is_final: bool,
}

impl TranscriptPiece {
    /// 新しい文字起こし結果を作成
    ///
    /// # Arguments
    ///
    /// * `text` - 文字起こしテキスト
    /// * `is_final` - 確定結果かどうか
    /// * `session_start` - セッション開始時刻（経過秒数の基準）
    ///
    /// # Examples
    ///
    /// ```
    /// # use rt_translate::types::TranscriptPiece;
    /// # use std::time::SystemTime;
    /// let piece = TranscriptPiece::new("こんにちは".to_string(), true, SystemTime::now());
    /// assert_eq!(piece.text, "こんにちは");
    /// assert!(piece.is_final);
    /// ```
    pub fn new(text: String, is_final: bool, session_start: SystemTime) -> Self {
        let now = SystemTime::now();

        // セッション開始からの経過時間を計算
        let duration = now.duration_since(session_start).unwrap_or_default();
        let timestamp_seconds = duration.as_secs_f64();

        // ISO 8601形式のタイムスタンプを生成
        let timestamp = chrono::DateTime::from_timestamp(
            now.duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs() as i64,
            0,
        )
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default();

        Self {
            timestamp,
            timestamp_seconds,
            text,
            is_final,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_format_creation() {
        let format = AudioFormat {
            sample_rate: 16000,
            channels: 1,
        };
        assert_eq!(format.sample_rate, 16000);
        assert_eq!(format.channels, 1);
    }

    #[test]
    fn test_audio_chunk_creation() {
        let chunk = AudioChunk {
            samples: vec![0i16; 1600],
            format: AudioFormat {
                sample_rate: 16000,
                channels: 1,
            },
            timestamp_ns: 1_000_000_000,
        };
        assert_eq!(chunk.samples.len(), 1600);
        assert_eq!(chunk.format.sample_rate, 16000);
        assert_eq!(chunk.timestamp_ns, 1_000_000_000);
    }

    #[test]
    fn test_segment_audio_recorded_ms() {
        let segment = SegmentAudio {
            samples: vec![0i16; 8000], // 500ms分 @ 16kHz
            format: AudioFormat {
                sample_rate: 16000,
                channels: 1,
            },
            started_at_ms: 100,
            duration_ms: 500,
        };
        assert_eq!(segment.recorded_ms(), 500);
    }

    #[test]
    fn test_segment_audio_zero_sample_rate() {
        let segment = SegmentAudio {
            samples: vec![0i16; 100],
            format: AudioFormat {
                sample_rate: 0,
                channels: 1,
            },
            started_at_ms: 0,
            duration_ms: 0,
        };
        assert_eq!(segment.recorded_ms(), 0);
    }

    #[test]
    fn test_transcript_piece_creation() {
        let session_start = SystemTime::now();
        let piece = TranscriptPiece::new("テストメッセージ".to_string(), true, session_start);

        assert_eq!(piece.text, "テストメッセージ");
        assert!(piece.is_final);
        assert!(piece.timestamp_seconds >= 0.0);
        assert!(!piece.timestamp.is_empty());
    }

    #[test]
    fn test_transcript_piece_json_serialization() {
        let session_start = SystemTime::now();
        let piece = TranscriptPiece::new("こんにちは".to_string(), false, session_start);

        let json = serde_json::to_string(&piece).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed["text"], "こんにちは");
        assert_eq!(parsed["is_final"], false);
    }
}
