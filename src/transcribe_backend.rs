use crate::error::PipelineError;
use crate::types::SegmentAudio;
use async_trait::async_trait;

/// 文字起こしバックエンドの共通トレイト
///
/// セッション開始時に1つだけ選択され、以後そのセッションの全
/// セグメントが同じバックエンドで処理される。呼び出しは確定済み
/// セグメント単位で、複数の呼び出しが同時に走ることがある。
#[async_trait]
pub trait TranscribeBackend: Send + Sync {
    /// 1セグメント分の音声を文字起こしする
    ///
    /// # Errors
    ///
    /// 失敗はそのセグメントに閉じる。呼び出し側はエラーを通知した
    /// 上でセッションを継続する。
    async fn transcribe(&self, audio: &SegmentAudio) -> Result<String, PipelineError>;

    /// ログ表示用のバックエンド名
    fn name(&self) -> &str;
}
