use crate::audio_input::AudioInput;
use crate::cloud_transcribe::CloudTranscribeBackend;
use crate::config::{resolve_backend_config, BackendPurpose, Config, TranscribeBackendType};
use crate::energy_monitor::EnergyMonitor;
use crate::error::PipelineError;
use crate::local_model::{LocalModelService, LocalTranscribeBackend};
use crate::segment_recorder::SegmentRecorder;
use crate::transcribe_backend::TranscribeBackend;
use crate::transcript::AccumulatedTranscript;
use crate::translate::{HttpTranslator, TranslateBackend};
use crate::types::{AudioChunk, AudioFormat, SegmentAudio, TranscriptPiece};
use crate::voice_segmenter::{SegmentAction, VoiceSegmenter};
use anyhow::{bail, Context, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// パイプラインからの通知
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// 発話セグメントの開始を検出した
    VoiceStart,
    /// 発話セグメントが確定した
    VoiceEnd { duration_ms: u64 },
    /// 1セグメント分の文字起こしが完了した
    Transcript { piece: TranscriptPiece },
    /// 蓄積テキストの翻訳が完了した
    Translation { text: String },
    /// 個別の呼び出しが失敗した。セッションは継続する
    Error { message: String },
}

fn emit_event(tx: &mpsc::Sender<PipelineEvent>, event: PipelineEvent) {
    match tx.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(_)) => {
            log::warn!("イベントチャンネルが満杯のため通知を破棄します");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            log::debug!("イベント受信側が閉じています");
        }
    }
}

/// セグメント境界アクションを実行するための共有ハンドル一式
///
/// パイプラインタスクと、そこから生える文字起こしタスクが使う。
struct SegmentDispatcher {
    backend: Arc<dyn TranscribeBackend>,
    transcript: Arc<Mutex<AccumulatedTranscript>>,
    event_tx: mpsc::Sender<PipelineEvent>,
    debounce_tx: Option<mpsc::Sender<()>>,
    session_start: SystemTime,
}

impl SegmentDispatcher {
    fn apply(&self, action: SegmentAction, recorder: &mut SegmentRecorder, format: AudioFormat) {
        match action {
            SegmentAction::Start => {
                recorder.begin();
                emit_event(&self.event_tx, PipelineEvent::VoiceStart);
            }
            SegmentAction::Finalize {
                started_at_ms,
                duration_ms,
                ..
            } => {
                if let Some(segment) = recorder.finalize(format, started_at_ms, duration_ms) {
                    emit_event(&self.event_tx, PipelineEvent::VoiceEnd { duration_ms });
                    self.spawn_transcription(segment);
                }
            }
            SegmentAction::Discard => recorder.discard(),
        }
    }

    /// 確定済みセグメントの文字起こしを独立タスクで実行する
    ///
    /// 録音は文字起こしの完了を待たない。結果は完了した順に
    /// 蓄積テキストへ追記される。
    fn spawn_transcription(&self, segment: SegmentAudio) {
        let backend = self.backend.clone();
        let transcript = self.transcript.clone();
        let event_tx = self.event_tx.clone();
        let debounce_tx = self.debounce_tx.clone();
        let session_start = self.session_start;

        tokio::spawn(async move {
            log::debug!(
                "セグメントを文字起こしへ送信 ({}ms, backend={})",
                segment.duration_ms,
                backend.name()
            );
            match backend.transcribe(&segment).await {
                Ok(text) => {
                    let text = text.trim().to_string();
                    if text.is_empty() {
                        log::debug!("文字起こし結果が空のためスキップします");
                        return;
                    }
                    transcript.lock().unwrap().append(&text);
                    let piece = TranscriptPiece::new(text, true, session_start);
                    emit_event(&event_tx, PipelineEvent::Transcript { piece });
                    if let Some(tx) = &debounce_tx {
                        // 満杯でもワーカーは必ず起きるので結果は無視してよい
                        let _ = tx.try_send(());
                    }
                }
                Err(e) if e.is_cancelled() => {}
                Err(e) => {
                    log::error!("文字起こしに失敗: {}", e);
                    emit_event(
                        &event_tx,
                        PipelineEvent::Error {
                            message: e.to_string(),
                        },
                    );
                }
            }
        });
    }
}

/// リアルタイム文字起こしパイプライン
///
/// EnergyMonitor・VoiceSegmenter・SegmentRecorder を束ね、確定した
/// セグメントを文字起こしバックエンドへ送り、結果を蓄積テキストに
/// まとめ、静穏期間の後に翻訳を発行する。
///
/// バックエンドはセッション開始時に1つだけ選択され、セッション中に
/// 切り替わることはない。マイクはこのインスタンスが専有し、`stop`
/// で完全に解放される。
pub struct RealtimeOrchestrator {
    config: Config,
    backend: Arc<dyn TranscribeBackend>,
    translator: Option<Arc<dyn TranslateBackend>>,
    transcript: Arc<Mutex<AccumulatedTranscript>>,
    running: Arc<AtomicBool>,
    /// 実行中のセッションに紐づくキャンセルフラグ。停止で立てる
    session_cancel: Arc<AtomicBool>,
    /// 翻訳リクエストの世代番号。最新世代の結果だけを採用する
    translation_generation: Arc<AtomicU64>,
    session_start: SystemTime,
    audio_input: Option<AudioInput>,
    pipeline_task: Option<JoinHandle<()>>,
    debounce_task: Option<JoinHandle<()>>,
    debounce_tx: Option<mpsc::Sender<()>>,
    event_tx: mpsc::Sender<PipelineEvent>,
    event_rx: Option<mpsc::Receiver<PipelineEvent>>,
}

impl RealtimeOrchestrator {
    /// 設定からバックエンドを選択してオーケストレーターを作る
    pub fn new(config: Config) -> Result<Self> {
        let backend: Arc<dyn TranscribeBackend> = match config.transcribe.backend {
            TranscribeBackendType::Cloud => {
                log::info!("クラウド文字起こしバックエンドを使用します");
                let cloud = config
                    .cloud
                    .clone()
                    .context("クラウドバックエンドには [cloud] セクションが必要です")?;
                Arc::new(
                    CloudTranscribeBackend::new(cloud, config.transcribe.language.clone())
                        .context("クラウドバックエンドの作成に失敗しました")?,
                )
            }
            TranscribeBackendType::Local => {
                bail!("端末内バックエンドには with_local_model でモデルサービスを渡してください")
            }
        };
        let translator = Self::build_translator(&config)?;
        Ok(Self::assemble(config, backend, translator))
    }

    /// 端末内モデルサービスを使うオーケストレーターを作る
    pub fn with_local_model(config: Config, service: Arc<LocalModelService>) -> Result<Self> {
        log::info!("端末内文字起こしバックエンドを使用します");
        let backend: Arc<dyn TranscribeBackend> = Arc::new(LocalTranscribeBackend::new(service));
        let translator = Self::build_translator(&config)?;
        Ok(Self::assemble(config, backend, translator))
    }

    /// 任意の文字起こしバックエンドを注入する。翻訳は無効
    pub fn with_backend(config: Config, backend: Arc<dyn TranscribeBackend>) -> Self {
        Self::assemble(config, backend, None)
    }

    /// 翻訳バックエンドを差し替える
    pub fn with_translator(mut self, translator: Arc<dyn TranslateBackend>) -> Self {
        self.translator = Some(translator);
        self
    }

    fn build_translator(config: &Config) -> Result<Option<Arc<dyn TranslateBackend>>> {
        let resolved = resolve_backend_config(config, BackendPurpose::Translate);
        if resolved.api_key.is_empty() {
            log::info!("翻訳APIキーが未設定のため翻訳は行いません");
            return Ok(None);
        }
        let translator =
            HttpTranslator::new(resolved).context("翻訳クライアントの作成に失敗しました")?;
        Ok(Some(Arc::new(translator)))
    }

    fn assemble(
        config: Config,
        backend: Arc<dyn TranscribeBackend>,
        translator: Option<Arc<dyn TranslateBackend>>,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            config,
            backend,
            translator,
            transcript: Arc::new(Mutex::new(AccumulatedTranscript::new())),
            running: Arc::new(AtomicBool::new(false)),
            session_cancel: Arc::new(AtomicBool::new(true)),
            translation_generation: Arc::new(AtomicU64::new(0)),
            session_start: SystemTime::now(),
            audio_input: None,
            pipeline_task: None,
            debounce_task: None,
            debounce_tx: None,
            event_tx,
            event_rx: Some(event_rx),
        }
    }

    /// イベント受信チャンネルを取り出す。2回目以降は `None`
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<PipelineEvent>> {
        self.event_rx.take()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// これまでに蓄積した文字起こしテキスト
    pub fn accumulated_text(&self) -> String {
        self.transcript.lock().unwrap().text().to_string()
    }

    /// マイクを取得してパイプラインを開始する
    ///
    /// # Errors
    ///
    /// マイクの権限が無い場合は `PipelineError::PermissionDenied`、
    /// それ以外のデバイス障害は `PipelineError::Audio`。
    pub fn start(&mut self) -> Result<(), PipelineError> {
        if self.is_running() {
            log::warn!("パイプラインは既に動作中です");
            return Ok(());
        }

        let (tx, rx) = mpsc::channel(256);
        let input = AudioInput::start(&self.config.audio, tx)?;
        self.audio_input = Some(input);
        self.begin_session(rx);
        Ok(())
    }

    /// 外部から供給される音声チャンクでパイプラインを開始する
    ///
    /// マイクを使わない駆動方法。テストや、別系統の音声ソースを
    /// 接続するときに使う。
    pub fn start_from_channel(&mut self, rx: mpsc::Receiver<AudioChunk>) {
        if self.is_running() {
            log::warn!("パイプラインは既に動作中です");
            return;
        }
        self.begin_session(rx);
    }

    fn begin_session(&mut self, rx: mpsc::Receiver<AudioChunk>) {
        log::info!("パイプラインを開始します");
        self.running.store(true, Ordering::SeqCst);
        self.session_cancel = Arc::new(AtomicBool::new(false));
        self.session_start = SystemTime::now();
        self.transcript.lock().unwrap().reset();

        if let Some(translator) = self.translator.clone() {
            let (debounce_tx, debounce_rx) = mpsc::channel(16);
            self.debounce_tx = Some(debounce_tx);
            self.debounce_task = Some(self.spawn_debounce_worker(translator, debounce_rx));
        }

        self.pipeline_task = Some(self.spawn_pipeline(rx));
    }

    fn spawn_pipeline(&self, mut rx: mpsc::Receiver<AudioChunk>) -> JoinHandle<()> {
        let vad_config = self.config.vad.clone();
        let sample_rate = self.config.audio.sample_rate;
        let running = self.running.clone();
        let dispatcher = SegmentDispatcher {
            backend: self.backend.clone(),
            transcript: self.transcript.clone(),
            event_tx: self.event_tx.clone(),
            debounce_tx: self.debounce_tx.clone(),
            session_start: self.session_start,
        };

        tokio::spawn(async move {
            let mut monitor = EnergyMonitor::new(&vad_config);
            let mut segmenter = VoiceSegmenter::new(&vad_config);
            let mut recorder = SegmentRecorder::new();
            let mut format = AudioFormat {
                sample_rate,
                channels: 1,
            };
            let mut interval =
                tokio::time::interval(Duration::from_millis(vad_config.tick_interval_ms));
            let session_epoch = Instant::now();

            loop {
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                tokio::select! {
                    chunk = rx.recv() => {
                        match chunk {
                            Some(chunk) => {
                                // 1. エネルギー窓と録音バッファに供給
                                format = chunk.format;
                                monitor.push(&chunk.samples);
                                if recorder.is_recording() {
                                    recorder.append(&chunk.samples);
                                }
                            }
                            None => {
                                // 2. 音声ソース消失は静かに終了する
                                log::debug!("音声チャンネルが閉じたためパイプラインを終了します");
                                break;
                            }
                        }
                    }
                    _ = interval.tick() => {
                        // 3. ティックごとに境界判定を回す
                        let energy = monitor.measure();
                        let now_ms = session_epoch.elapsed().as_millis() as u64;
                        for action in segmenter.process(energy, now_ms) {
                            dispatcher.apply(action, &mut recorder, format);
                        }
                    }
                }
            }

            // 4. 開いたままのセグメントは通常の確定経路で流す
            if let Some(action) = segmenter.flush() {
                dispatcher.apply(action, &mut recorder, format);
            }
            log::debug!("パイプラインタスク終了");
        })
    }

    /// 翻訳のデバウンスワーカーを起動する
    ///
    /// 文字起こし完了の通知を受けるたびに静穏タイマーをやり直し、
    /// `debounce_ms` の静穏が続いた時点の蓄積テキストを翻訳する。
    fn spawn_debounce_worker(
        &self,
        translator: Arc<dyn TranslateBackend>,
        mut rx: mpsc::Receiver<()>,
    ) -> JoinHandle<()> {
        let transcript = self.transcript.clone();
        let event_tx = self.event_tx.clone();
        let generation = self.translation_generation.clone();
        let cancel = self.session_cancel.clone();
        let debounce_ms = self.config.translate.debounce_ms;
        let target_lang = self.config.translate.target_lang.clone();
        let source_lang = self.config.translate.source_lang.clone();

        tokio::spawn(async move {
            while rx.recv().await.is_some() {
                loop {
                    tokio::select! {
                        notice = rx.recv() => {
                            match notice {
                                // 新しい確定が来たのでタイマーをやり直す
                                Some(()) => continue,
                                None => return,
                            }
                        }
                        _ = tokio::time::sleep(Duration::from_millis(debounce_ms)) => break,
                    }
                }

                let text = transcript.lock().unwrap().text().to_string();
                if text.is_empty() {
                    continue;
                }

                let my_generation = generation.fetch_add(1, Ordering::SeqCst) + 1;
                log::debug!("翻訳を発行 (gen={}, {}文字)", my_generation, text.chars().count());
                match translator
                    .translate(&text, source_lang.as_deref(), &target_lang, cancel.clone())
                    .await
                {
                    Ok(translated) => {
                        // 最新世代の結果だけを通知する
                        if generation.load(Ordering::SeqCst) == my_generation {
                            emit_event(&event_tx, PipelineEvent::Translation { text: translated });
                        } else {
                            log::debug!("古い翻訳結果を破棄します (gen={})", my_generation);
                        }
                    }
                    Err(e) if e.is_cancelled() => {}
                    Err(e) => {
                        log::error!("翻訳に失敗: {}", e);
                        emit_event(
                            &event_tx,
                            PipelineEvent::Error {
                                message: e.to_string(),
                            },
                        );
                    }
                }
            }
        })
    }

    /// パイプラインを停止してマイクを解放する
    ///
    /// 何度呼んでも安全。開いているセグメントは確定経路を通り、
    /// 保留中の翻訳デバウンスは取り消される。
    pub async fn stop(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            log::debug!("停止済みのパイプラインへの stop 呼び出し");
            return;
        }
        log::info!("パイプラインを停止します");
        self.session_cancel.store(true, Ordering::SeqCst);

        // マイクを解放して入力チャンネルを閉じる
        self.audio_input = None;

        if let Some(task) = self.pipeline_task.take() {
            if let Err(e) = task.await {
                log::warn!("パイプラインタスクの終了待ちに失敗: {}", e);
            }
        }

        // 保留中のデバウンスは発火させない
        self.debounce_tx = None;
        if let Some(task) = self.debounce_task.take() {
            task.abort();
        }
        self.translation_generation.fetch_add(1, Ordering::SeqCst);
    }
}
