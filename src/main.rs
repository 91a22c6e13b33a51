use anyhow::{Context, Result};
use env_logger::Env;
use futures_util::StreamExt;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;
use tokio_stream::wrappers::ReceiverStream;

use rt_translate::audio_input::AudioInput;
use rt_translate::config::Config;
use rt_translate::error::PipelineError;
use rt_translate::orchestrator::{PipelineEvent, RealtimeOrchestrator};

#[tokio::main]
async fn main() -> Result<()> {
    // ロガーを初期化
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    // コマンドライン引数をパース
    let args: Vec<String> = std::env::args().collect();

    // デバイス一覧表示モード
    if args.len() > 1 && args[1] == "--show-interfaces" {
        println!("利用可能な入力デバイス:");
        for (index, name) in AudioInput::list_devices()?.into_iter().enumerate() {
            println!("  [{}] {}", index, name);
        }
        return Ok(());
    }

    // 設定ファイル生成モード
    if args.len() > 1 && args[1] == "--generate-config" {
        let config_path = if args.len() > 2 {
            &args[2]
        } else {
            "config.toml"
        };
        Config::write_default(config_path)?;
        println!("設定ファイルを生成しました: {}", config_path);
        return Ok(());
    }

    // 設定ファイルのパス
    let config_path = if args.len() > 1 && !args[1].starts_with("--") {
        args[1].as_str()
    } else {
        "config.toml"
    };

    // 設定を読み込み
    let config = Config::load_or_default(config_path)
        .with_context(|| format!("設定の読み込みに失敗: {}", config_path))?;
    config.validate().context("設定の検証に失敗しました")?;

    log::info!("rt-translate を起動します");

    // Ctrl+C ハンドラを設定
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();
    ctrlc::set_handler(move || {
        log::info!("停止シグナルを受信しました...");
        running_clone.store(false, Ordering::SeqCst);
    })?;

    let mut orchestrator =
        RealtimeOrchestrator::new(config).context("パイプラインの構築に失敗しました")?;
    let events = orchestrator
        .take_events()
        .context("イベント受信チャンネルの取得に失敗しました")?;

    match orchestrator.start() {
        Ok(()) => {}
        Err(err @ PipelineError::PermissionDenied(_)) => {
            log::error!(
                "マイクへのアクセスが拒否されました。OS の設定でマイク権限を許可してから再実行してください"
            );
            return Err(err.into());
        }
        Err(err) => {
            return Err(anyhow::Error::from(err).context("パイプラインの開始に失敗しました"));
        }
    }

    log::info!("音声入力を待機しています (Ctrl+C で停止)");

    // メインループ: イベントを処理しつつ停止を待つ
    let mut events = ReceiverStream::new(events);
    loop {
        tokio::select! {
            event = events.next() => {
                match event {
                    Some(event) => handle_event(event),
                    None => break,
                }
            }
            _ = tokio::time::sleep(Duration::from_millis(100)) => {
                if !running.load(Ordering::SeqCst) {
                    break;
                }
            }
        }
    }

    // クリーンアップ
    log::info!("停止処理を開始します...");
    orchestrator.stop().await;

    // 停止時にフラッシュされた末尾セグメントの結果を回収する
    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_millis(1500), events.next()).await
    {
        handle_event(event);
    }

    log::info!("rt-translate を終了しました");

    Ok(())
}

/// 確定した文字起こしを JSON 行として標準出力へ流し、それ以外はログに出す。
fn handle_event(event: PipelineEvent) {
    match event {
        PipelineEvent::VoiceStart => {
            log::debug!("発話を検出しました");
        }
        PipelineEvent::VoiceEnd { duration_ms } => {
            log::debug!("発話が終了しました ({} ms)", duration_ms);
        }
        PipelineEvent::Transcript { piece } => {
            // JSON形式で出力
            if let Ok(json) = serde_json::to_string(&piece) {
                println!("{}", json);
            }
        }
        PipelineEvent::Translation { text } => {
            log::info!("翻訳: {}", text);
        }
        PipelineEvent::Error { message } => {
            log::error!("バックエンドエラー: {}", message);
        }
    }
}
