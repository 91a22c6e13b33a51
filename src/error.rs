use thiserror::Error;

/// パイプライン全体で使う失敗分類
///
/// 呼び出し側は分類単位で処理を分岐する。個別のメッセージは
/// ログ表示用であり、分岐判定には使わないこと。
#[derive(Debug, Error)]
pub enum PipelineError {
    /// マイク等の入力デバイスへのアクセスが拒否された
    ///
    /// 設定や権限ダイアログでの許可が必要。リトライしても回復しない。
    #[error("入力デバイスへのアクセスが拒否されました: {0}")]
    PermissionDenied(String),

    /// バックエンド呼び出しの一時的な失敗
    ///
    /// ネットワークエラー、HTTPエラーステータス、タイムアウトなど。
    /// 次のセグメント／次の翻訳では成功しうる。
    #[error("バックエンド呼び出しに失敗しました: {0}")]
    Backend(String),

    /// 呼び出しがキャンセルされた
    ///
    /// 停止や新しいリクエストによる打ち切り。ユーザーへのエラー
    /// 通知は行わず、黙って破棄する。
    #[error("キャンセルされました")]
    Cancelled,

    /// バックエンド応答の形式が不正
    ///
    /// JSONとして解析できない、必須フィールドが無い、など。
    #[error("応答の形式が不正です: {0}")]
    MalformedResponse(String),

    /// オーディオ入出力の失敗
    #[error("オーディオ処理に失敗しました: {0}")]
    Audio(String),
}

impl PipelineError {
    /// キャンセルによる失敗かどうか
    ///
    /// キャンセルはエラーオブザーバーに流さないため、
    /// 通知前に必ずこの判定を挟む。
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Cancelled)
    }
}
