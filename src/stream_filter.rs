use crate::config::TranslateConfig;
use crate::error::PipelineError;
use async_stream::stream;
use futures_util::{Stream, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// 全チャンクから無条件に取り除く制御トークン
///
/// 視覚言語モデルが座標出力用に挿入するゼロ幅トークン。
/// マーカー走査の前に除去される。
const CONTROL_TOKENS: &[&str] = &[
    "<|box_start|>",
    "<|box_end|>",
    "<|quad_start|>",
    "<|quad_end|>",
    "<|ref_start|>",
    "<|ref_end|>",
];

/// フィルター済みストリームの1片
///
/// テキストと境界センチネルをタグ付きで区別する。利用側は
/// 文字列比較ではなくパターンマッチでセンチネルを扱う。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamPiece {
    /// 表示対象のテキスト
    Text(String),
    /// 思考区間の開始（非表示モードで開始マーカーの代わりに1回だけ）
    ThinkingStart,
    /// 思考区間の終了（非表示モードで終了マーカーの代わりに1回だけ）
    ThinkingEnd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilterState {
    /// マーカーの外側
    Outside,
    /// マーカーの内側
    Inside,
}

/// ストリーミング応答のタグフィルター
///
/// 細切れに届くテキストチャンクから `<think>`〜`</think>` の
/// マークアップ区間を検出し、表示フラグに応じて素通し・センチネル
/// 置換・完全非表示のいずれかを行う状態機械。
///
/// チャンク境界でマーカーが分断されても断片が出力に漏れないよう、
/// マーカーの書きかけの可能性がある末尾は次のチャンクまで保留する。
///
/// # アルゴリズム
///
/// 1. チャンクから制御トークンを除去してバッファに連結
/// 2. 現在の状態に応じたマーカーをバッファから探す
/// 3. 見つかったら手前のテキストを出力（内側かつ非表示なら破棄）、
///    マーカー自体はセンチネルまたは原文で出力して状態を反転
/// 4. 見つからなければ、マーカーの接頭辞になり得る末尾だけ残して
///    出力（内側かつ非表示なら破棄）
///
/// # Examples
///
/// ```
/// # use rt_translate::stream_filter::{StreamPiece, StreamTagFilter};
/// let mut filter = StreamTagFilter::new(false);
/// assert_eq!(
///     filter.push("回答<think>内部思考</think>です"),
///     vec![
///         StreamPiece::Text("回答".to_string()),
///         StreamPiece::ThinkingStart,
///         StreamPiece::ThinkingEnd,
///         StreamPiece::Text("です".to_string()),
///     ]
/// );
/// ```
#[derive(Debug)]
pub struct StreamTagFilter {
    state: FilterState,
    /// まだ出力を確定できないテキストの保留バッファ
    buffer: String,
    /// true ならマーカーと内側のテキストを原文のまま流す
    show_marked: bool,
    start_marker: String,
    end_marker: String,
}

impl StreamTagFilter {
    /// `<think>` / `</think>` マーカー用のフィルターを作成
    pub fn new(show_marked: bool) -> Self {
        Self::with_markers(show_marked, "<think>", "</think>")
    }

    /// 翻訳設定の `show_thinking` を表示フラグとして使うフィルターを作成
    pub fn from_config(config: &TranslateConfig) -> Self {
        Self::new(config.show_thinking)
    }

    /// 任意のマーカー対を使うフィルターを作成
    ///
    /// 空のマーカーは無効。指定された場合は警告を出してデフォルトの
    /// マーカー対にフォールバックする。
    pub fn with_markers(show_marked: bool, start_marker: &str, end_marker: &str) -> Self {
        if start_marker.is_empty() || end_marker.is_empty() {
            log::warn!("空のマーカーが指定されたためデフォルトのマーカー対を使用します");
            return Self::new(show_marked);
        }
        Self {
            state: FilterState::Outside,
            buffer: String::new(),
            show_marked,
            start_marker: start_marker.to_string(),
            end_marker: end_marker.to_string(),
        }
    }

    /// 1チャンク分のテキストを処理し、確定した出力を返す
    pub fn push(&mut self, chunk: &str) -> Vec<StreamPiece> {
        let cleaned = strip_control_tokens(chunk);
        self.buffer.push_str(&cleaned);

        let mut out = Vec::new();
        loop {
            let marker = match self.state {
                FilterState::Outside => self.start_marker.clone(),
                FilterState::Inside => self.end_marker.clone(),
            };

            match self.buffer.find(&marker) {
                Some(pos) => {
                    // 1. マーカー手前のテキストを確定する
                    if pos > 0 {
                        let pre = self.buffer[..pos].to_string();
                        if self.state == FilterState::Outside || self.show_marked {
                            out.push(StreamPiece::Text(pre));
                        }
                    }
                    self.buffer.drain(..pos + marker.len());

                    // 2. マーカー自体は原文またはセンチネルとして1回だけ出力
                    if self.show_marked {
                        out.push(StreamPiece::Text(marker));
                    } else {
                        out.push(match self.state {
                            FilterState::Outside => StreamPiece::ThinkingStart,
                            FilterState::Inside => StreamPiece::ThinkingEnd,
                        });
                    }

                    // 3. 状態を反転して残りを再走査
                    self.state = match self.state {
                        FilterState::Outside => {
                            log::debug!("マーカー区間に入りました");
                            FilterState::Inside
                        }
                        FilterState::Inside => {
                            log::debug!("マーカー区間を抜けました");
                            FilterState::Outside
                        }
                    };
                }
                None => {
                    // 4. マーカーの書きかけの可能性がある末尾だけ保留する
                    let keep = held_suffix_len(&self.buffer, &marker);
                    let emit_len = self.buffer.len() - keep;
                    if emit_len > 0 {
                        let emitted: String = self.buffer.drain(..emit_len).collect();
                        if self.state == FilterState::Outside || self.show_marked {
                            out.push(StreamPiece::Text(emitted));
                        }
                    }
                    break;
                }
            }
        }
        out
    }

    /// ストリーム終端の処理
    ///
    /// 保留バッファに残り得るのはマーカーの書きかけの可能性がある
    /// 断片だけなので、平文として流せると確定できる場合を除き破棄
    /// する。非表示モードで未終端のマーカー内にいた場合、中身は
    /// 出力されず、閉じセンチネルも合成しない。
    pub fn finish(&mut self) -> Vec<StreamPiece> {
        let rest = std::mem::take(&mut self.buffer);
        let state = self.state;
        self.state = FilterState::Outside;

        if rest.is_empty() {
            return Vec::new();
        }

        match state {
            FilterState::Outside if !self.start_marker.starts_with(rest.as_str()) => {
                vec![StreamPiece::Text(rest)]
            }
            FilterState::Outside => {
                log::debug!("終端で開始マーカーの断片を破棄: {:?}", rest);
                Vec::new()
            }
            FilterState::Inside => {
                log::debug!("終端で未終端マーカーの保留分を破棄: {:?}", rest);
                Vec::new()
            }
        }
    }
}

/// バッファ末尾のうち、マーカーの接頭辞になり得る最長の長さを返す
fn held_suffix_len(buffer: &str, marker: &str) -> usize {
    let max = marker.len().saturating_sub(1).min(buffer.len());
    for keep in (1..=max).rev() {
        let at = buffer.len() - keep;
        if !buffer.is_char_boundary(at) {
            continue;
        }
        if marker.as_bytes().starts_with(&buffer.as_bytes()[at..]) {
            return keep;
        }
    }
    0
}

/// 制御トークンをチャンクから除去
fn strip_control_tokens(chunk: &str) -> String {
    let mut cleaned = chunk.to_string();
    for token in CONTROL_TOKENS {
        if cleaned.contains(token) {
            cleaned = cleaned.replace(token, "");
        }
    }
    cleaned
}

/// テキストチャンクのストリームにフィルターを適用する
///
/// 説明・QA・画像翻訳のストリーミング応答すべてがこの1つの
/// アダプターを通る。チャンクは到着順に処理され、順序の入れ替えは
/// 起きない。
///
/// # キャンセル
///
/// `cancel` が立った時点で出力は即座に止まり、保留バッファは
/// 破棄される（`finish` は呼ばれない）。上流のエラーはそのまま
/// 転送され、ストリームを終了させる。
pub fn filter_stream<S>(
    input: S,
    mut filter: StreamTagFilter,
    cancel: Arc<AtomicBool>,
) -> impl Stream<Item = Result<StreamPiece, PipelineError>>
where
    S: Stream<Item = Result<String, PipelineError>>,
{
    stream! {
        tokio::pin!(input);
        while let Some(chunk) = input.next().await {
            if cancel.load(Ordering::SeqCst) {
                log::debug!("キャンセルによりフィルター出力を停止します");
                return;
            }
            match chunk {
                Ok(text) => {
                    for piece in filter.push(&text) {
                        yield Ok(piece);
                    }
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }
        if cancel.load(Ordering::SeqCst) {
            return;
        }
        for piece in filter.finish() {
            yield Ok(piece);
        }
    }
}
