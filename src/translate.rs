use crate::config::ResolvedBackend;
use crate::error::PipelineError;
use async_stream::stream;
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// チャット補完のストリーミングチャンク
#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// チャット補完の非ストリーミングレスポンス
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<String, PipelineError>> + Send>>;

/// 翻訳・解説バックエンドの抽象
///
/// `translate` は1回の翻訳呼び出し、`chat_stream` は解説や画像翻訳など
/// 逐次出力が欲しい用途で使う。どちらもキャンセルフラグを受け取り、
/// キャンセル後は呼び出し元へ結果を渡さない。
#[async_trait]
pub trait TranslateBackend: Send + Sync {
    /// テキストを `target_lang` へ翻訳する
    ///
    /// # Errors
    ///
    /// 呼び出し前または応答受信後にキャンセル済みなら
    /// `PipelineError::Cancelled`。
    async fn translate(
        &self,
        text: &str,
        source_lang: Option<&str>,
        target_lang: &str,
        cancel: Arc<AtomicBool>,
    ) -> Result<String, PipelineError>;

    /// プロンプトを送ってレスポンスを逐次受け取る
    ///
    /// キャンセルされた場合、ストリームはそれ以降の要素を出さずに
    /// 終了する(エラーにはならない)。
    fn chat_stream(&self, prompt: &str, cancel: Arc<AtomicBool>) -> ChunkStream;
}

/// OpenAI互換のチャット補完エンドポイントを叩く翻訳バックエンド
pub struct HttpTranslator {
    backend: ResolvedBackend,
    client: reqwest::Client,
}

impl HttpTranslator {
    pub fn new(backend: ResolvedBackend) -> Result<Self, PipelineError> {
        // ストリーミングは長時間続くので全体タイムアウトは掛けない
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| PipelineError::Backend(format!("HTTPクライアントの構築に失敗: {}", e)))?;
        Ok(Self { backend, client })
    }
}

/// 翻訳指示文を組み立てる
fn build_instruction(source_lang: Option<&str>, target_lang: &str) -> String {
    match source_lang {
        Some(source) => format!(
            "Translate the following text from {} into {}. \
             Output only the translation, without explanations.",
            source, target_lang
        ),
        None => format!(
            "Translate the following text into {}. \
             Output only the translation, without explanations.",
            target_lang
        ),
    }
}

/// バッファから完成した行を取り出す。末尾の未完の行は残す
fn split_complete_lines(buffer: &mut String) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(pos) = buffer.find('\n') {
        let line = buffer[..pos].trim_end_matches('\r').to_string();
        buffer.drain(..=pos);
        lines.push(line);
    }
    lines
}

/// SSEの1行を解釈した結果
#[derive(Debug, PartialEq)]
enum SsePayload {
    /// 本文の増分
    Delta(String),
    /// ストリーム終端
    Done,
    /// コメント行・空行・空のデルタなど、読み飛ばすもの
    Ignored,
}

fn parse_sse_line(line: &str) -> SsePayload {
    let Some(data) = line.strip_prefix("data: ") else {
        return SsePayload::Ignored;
    };
    if data.trim() == "[DONE]" {
        return SsePayload::Done;
    }
    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => {
            let content = chunk
                .choices
                .first()
                .and_then(|c| c.delta.content.as_deref())
                .unwrap_or("");
            if content.is_empty() {
                SsePayload::Ignored
            } else {
                SsePayload::Delta(content.to_string())
            }
        }
        Err(e) => {
            log::debug!("解釈できないSSE行を読み飛ばします: {}", e);
            SsePayload::Ignored
        }
    }
}

#[async_trait]
impl TranslateBackend for HttpTranslator {
    async fn translate(
        &self,
        text: &str,
        source_lang: Option<&str>,
        target_lang: &str,
        cancel: Arc<AtomicBool>,
    ) -> Result<String, PipelineError> {
        if cancel.load(Ordering::SeqCst) {
            return Err(PipelineError::Cancelled);
        }

        let instruction = build_instruction(source_lang, target_lang);
        let payload = serde_json::json!({
            "model": self.backend.model,
            "messages": [
                { "role": "user", "content": format!("{}\n\n{}", instruction, text) }
            ],
            "stream": false
        });

        log::debug!("翻訳リクエスト送信: {}文字 -> {}", text.chars().count(), target_lang);

        let response = self
            .client
            .post(&self.backend.endpoint)
            .bearer_auth(&self.backend.api_key)
            .timeout(Duration::from_secs(60))
            .json(&payload)
            .send()
            .await
            .map_err(|e| PipelineError::Backend(format!("翻訳APIへの接続に失敗: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::Backend(format!(
                "翻訳APIがエラーを返しました ({}): {}",
                status, body
            )));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::MalformedResponse(e.to_string()))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| {
                PipelineError::MalformedResponse("choices が空です".to_string())
            })?;

        // 応答待ちの間に新しいリクエストへ置き換えられていたら捨てる
        if cancel.load(Ordering::SeqCst) {
            return Err(PipelineError::Cancelled);
        }
        Ok(content.trim().to_string())
    }

    fn chat_stream(&self, prompt: &str, cancel: Arc<AtomicBool>) -> ChunkStream {
        let client = self.client.clone();
        let endpoint = self.backend.endpoint.clone();
        let api_key = self.backend.api_key.clone();
        let model = self.backend.model.clone();
        let prompt = prompt.to_string();

        Box::pin(stream! {
            if cancel.load(Ordering::SeqCst) {
                return;
            }

            let payload = serde_json::json!({
                "model": model,
                "messages": [
                    { "role": "user", "content": prompt }
                ],
                "stream": true
            });

            let response = match client
                .post(&endpoint)
                .bearer_auth(&api_key)
                .json(&payload)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    yield Err(PipelineError::Backend(format!(
                        "ストリーミングAPIへの接続に失敗: {}",
                        e
                    )));
                    return;
                }
            };

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                yield Err(PipelineError::Backend(format!(
                    "ストリーミングAPIがエラーを返しました ({}): {}",
                    status, body
                )));
                return;
            }

            let mut bytes = response.bytes_stream();
            let mut buffer = String::new();
            while let Some(chunk) = bytes.next().await {
                if cancel.load(Ordering::SeqCst) {
                    log::debug!("キャンセルによりストリーミングを打ち切ります");
                    return;
                }
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        yield Err(PipelineError::Backend(format!(
                            "ストリーミング受信に失敗: {}",
                            e
                        )));
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));
                for line in split_complete_lines(&mut buffer) {
                    match parse_sse_line(&line) {
                        SsePayload::Delta(text) => yield Ok(text),
                        SsePayload::Done => return,
                        SsePayload::Ignored => {}
                    }
                }
            }
        })
    }
}
