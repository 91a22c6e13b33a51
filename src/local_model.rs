use crate::error::PipelineError;
use crate::transcribe_backend::TranscribeBackend;
use crate::types::SegmentAudio;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// 端末内音声認識モデルの抽象
///
/// 実際のモデル実装（whisper.cpp系バインディングなど）は外部から
/// 注入される。`load` は重い処理になりうるため、呼び出しタイミングは
/// `LocalModelService` が管理する。
#[async_trait]
pub trait SpeechModel: Send + Sync {
    /// モデルをメモリに読み込む
    async fn load(&self) -> Result<(), PipelineError>;

    /// 読み込み済みモデルで1セグメントを文字起こしする
    async fn transcribe(&self, audio: &SegmentAudio) -> Result<String, PipelineError>;
}

/// 端末内モデルのライフサイクルを管理するサービス
///
/// グローバルなモデルキャッシュを持たず、このオブジェクトを共有
/// 参照で持ち回る。`initialize` は何度呼んでも読み込みは1回だけ
/// 行われ、同時に呼ばれた場合も直列化される。
///
/// # Examples
///
/// ```no_run
/// # use std::sync::Arc;
/// # use rt_translate::local_model::{LocalModelService, SpeechModel};
/// # async fn example(model: Arc<dyn SpeechModel>) -> anyhow::Result<()> {
/// let service = Arc::new(LocalModelService::new(model));
/// assert!(!service.is_ready());
/// service.initialize().await?;
/// assert!(service.is_ready());
/// # Ok(())
/// # }
/// ```
pub struct LocalModelService {
    model: Arc<dyn SpeechModel>,
    ready: AtomicBool,
    init_lock: Mutex<()>,
}

impl LocalModelService {
    pub fn new(model: Arc<dyn SpeechModel>) -> Self {
        Self {
            model,
            ready: AtomicBool::new(false),
            init_lock: Mutex::new(()),
        }
    }

    /// モデルを読み込む。既に読み込み済みなら何もしない
    pub async fn initialize(&self) -> Result<(), PipelineError> {
        if self.is_ready() {
            return Ok(());
        }

        let _guard = self.init_lock.lock().await;
        // ロック待ちの間に別の呼び出しが完了していることがある
        if self.is_ready() {
            return Ok(());
        }

        log::info!("端末内モデルを読み込んでいます...");
        self.model.load().await?;
        self.ready.store(true, Ordering::SeqCst);
        log::info!("端末内モデルの読み込みが完了しました");
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// 読み込み済みモデルで文字起こしする
    ///
    /// # Errors
    ///
    /// `initialize` 前に呼ばれた場合はエラー。
    pub async fn transcribe(&self, audio: &SegmentAudio) -> Result<String, PipelineError> {
        if !self.is_ready() {
            return Err(PipelineError::Backend(
                "端末内モデルが初期化されていません".to_string(),
            ));
        }
        self.model.transcribe(audio).await
    }
}

/// `LocalModelService` を文字起こしバックエンドとして使うアダプター
pub struct LocalTranscribeBackend {
    service: Arc<LocalModelService>,
}

impl LocalTranscribeBackend {
    pub fn new(service: Arc<LocalModelService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl TranscribeBackend for LocalTranscribeBackend {
    async fn transcribe(&self, audio: &SegmentAudio) -> Result<String, PipelineError> {
        self.service.transcribe(audio).await
    }

    fn name(&self) -> &str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AudioFormat;
    use std::sync::atomic::AtomicUsize;

    struct CountingModel {
        load_calls: AtomicUsize,
    }

    impl CountingModel {
        fn new() -> Self {
            Self {
                load_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SpeechModel for CountingModel {
        async fn load(&self) -> Result<(), PipelineError> {
            self.load_calls.fetch_add(1, Ordering::SeqCst);
            // 読み込みに時間がかかるモデルを模す
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            Ok(())
        }

        async fn transcribe(&self, _audio: &SegmentAudio) -> Result<String, PipelineError> {
            Ok("認識結果".to_string())
        }
    }

    fn segment() -> SegmentAudio {
        SegmentAudio {
            samples: vec![0i16; 160],
            format: AudioFormat {
                sample_rate: 16000,
                channels: 1,
            },
            started_at_ms: 0,
            duration_ms: 10,
        }
    }

    #[tokio::test]
    async fn test_initialize_loads_once() {
        let model = Arc::new(CountingModel::new());
        let service = LocalModelService::new(model.clone());

        assert!(!service.is_ready());
        service.initialize().await.unwrap();
        assert!(service.is_ready());

        // 2回目以降は読み込みをスキップ
        service.initialize().await.unwrap();
        service.initialize().await.unwrap();
        assert_eq!(model.load_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_initialize_is_serialized() {
        let model = Arc::new(CountingModel::new());
        let service = Arc::new(LocalModelService::new(model.clone()));

        let s1 = service.clone();
        let s2 = service.clone();
        let (r1, r2) = tokio::join!(
            tokio::spawn(async move { s1.initialize().await }),
            tokio::spawn(async move { s2.initialize().await }),
        );
        r1.unwrap().unwrap();
        r2.unwrap().unwrap();

        assert_eq!(model.load_calls.load(Ordering::SeqCst), 1);
        assert!(service.is_ready());
    }

    #[tokio::test]
    async fn test_transcribe_requires_initialize() {
        let service = LocalModelService::new(Arc::new(CountingModel::new()));

        let err = service.transcribe(&segment()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Backend(_)));

        service.initialize().await.unwrap();
        let text = service.transcribe(&segment()).await.unwrap();
        assert_eq!(text, "認識結果");
    }

    #[tokio::test]
    async fn test_backend_adapter() {
        let service = Arc::new(LocalModelService::new(Arc::new(CountingModel::new())));
        service.initialize().await.unwrap();

        let backend = LocalTranscribeBackend::new(service);
        assert_eq!(backend.name(), "local");
        assert_eq!(backend.transcribe(&segment()).await.unwrap(), "認識結果");
    }
}
