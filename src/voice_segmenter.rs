use crate::config::VadConfig;
use crate::types::EnergySample;

/// セグメント境界の判定結果
///
/// `VoiceSegmenter::process` が1ティック分の判定で生成する指示。
/// 呼び出し側（パイプライン）はこの指示に従って録音の開始・確定・
/// 破棄を行う。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentAction {
    /// 新しいセグメントの録音を開始する
    Start,
    /// アクティブなセグメントを確定する
    Finalize {
        /// セグメント開始時刻 (ms)
        started_at_ms: u64,
        /// セグメント終了時刻 (ms)
        ended_at_ms: u64,
        /// セグメントの長さ (ms)
        duration_ms: u64,
    },
    /// アクティブなセグメントを通知なしで破棄する
    Discard,
}

/// セグメンターの内部状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SegmenterState {
    /// 無音区間
    Silent,
    /// 発話区間
    Voicing {
        /// セグメント開始時刻 (ms)
        started_at_ms: u64,
        /// 最後に閾値以上のエネルギーを観測した時刻 (ms)
        last_active_ms: u64,
    },
}

/// 音声セグメンター
///
/// ティックごとのエネルギー値から発話セグメントの境界を検出する
/// 状態機械。時刻は外部から与えられるため実時間に依存せず、
/// テストでは任意のティック列を注入できる。
///
/// # 状態遷移
///
/// - `Silent → Voicing`: エネルギーが閾値以上になったティックで
///   `Start` を発行。
/// - `Voicing` 中のティック: エネルギーに関わらずまず強制分割を
///   判定し、開始から `max_voice_ms` 経過していればセグメントを
///   閉じる。エネルギーが閾値以上のときだけ同一ティックで次の
///   セグメントを開始する（録音は途切れない）。
/// - `Voicing` 中の有声ティック（最大長未満）: 最終活動時刻を
///   更新するだけ。
/// - `Voicing` 中の無音ティック（最大長未満）: 最終活動時刻から
///   `silence_ms` 経過した時点でセグメントを閉じる。
///
/// セグメントを閉じるときは、どの経路でも長さが `min_voice_ms`
/// 以上なら `Finalize`、未満なら `Discard`。セグメント長は
/// 「最後の有声ティック − 開始ティック + 1ティック」で数える。
/// 最初の有声ティックも1ティック分の音声を表すため。
///
/// # Examples
///
/// ```
/// # use rt_translate::voice_segmenter::{SegmentAction, VoiceSegmenter};
/// # use rt_translate::config::VadConfig;
/// let mut segmenter = VoiceSegmenter::new(&VadConfig::default());
///
/// // 閾値(30)以上のエネルギーでセグメント開始
/// let actions = segmenter.process(200, 0);
/// assert_eq!(actions, vec![SegmentAction::Start]);
/// ```
pub struct VoiceSegmenter {
    /// 発話判定の閾値 (0〜255)
    threshold: EnergySample,

    /// これ未満のセグメントは破棄する (ms)
    min_voice_ms: u64,

    /// 強制分割までの最大セグメント長 (ms)
    max_voice_ms: u64,

    /// セグメント終了と判定する無音の長さ (ms)
    silence_ms: u64,

    /// 判定周期 (ms)。セグメント長の計算に使用
    tick_interval_ms: u64,

    /// 現在の状態
    state: SegmenterState,
}

impl VoiceSegmenter {
    pub fn new(config: &VadConfig) -> Self {
        Self {
            threshold: config.energy_threshold,
            min_voice_ms: config.min_voice_ms,
            max_voice_ms: config.max_voice_ms,
            silence_ms: config.silence_ms,
            tick_interval_ms: config.tick_interval_ms,
            state: SegmenterState::Silent,
        }
    }

    /// 1ティック分のエネルギー値を処理して境界判定を行う
    ///
    /// # Arguments
    ///
    /// * `energy` - このティックのエネルギー値 (0〜255)
    /// * `now_ms` - 現在時刻 (セッション開始からのミリ秒)
    ///
    /// # Returns
    ///
    /// このティックで実行すべきアクション列。強制分割と同時に発話が
    /// 継続している場合のみ `Finalize` と `Start` の2要素になる。
    pub fn process(&mut self, energy: EnergySample, now_ms: u64) -> Vec<SegmentAction> {
        let is_voiced = energy >= self.threshold;

        match self.state {
            SegmenterState::Silent => {
                if is_voiced {
                    log::debug!("セグメント開始 (t={}ms, energy={})", now_ms, energy);
                    self.state = SegmenterState::Voicing {
                        started_at_ms: now_ms,
                        last_active_ms: now_ms,
                    };
                    vec![SegmentAction::Start]
                } else {
                    vec![]
                }
            }
            SegmenterState::Voicing {
                started_at_ms,
                last_active_ms,
            } => {
                // 1. 強制分割の判定をエネルギーに関わらず先に行う
                if now_ms - started_at_ms >= self.max_voice_ms {
                    log::debug!("最大長に達したため強制分割 (t={}ms)", now_ms);
                    let mut actions = vec![self.close(started_at_ms, last_active_ms)];
                    if is_voiced {
                        // 2. 発話が続いていれば同一ティックで次のセグメントを開始する
                        self.state = SegmenterState::Voicing {
                            started_at_ms: now_ms,
                            last_active_ms: now_ms,
                        };
                        actions.push(SegmentAction::Start);
                    } else {
                        self.state = SegmenterState::Silent;
                    }
                    actions
                } else if is_voiced {
                    // 3. 発話継続。最終活動時刻のみ更新
                    self.state = SegmenterState::Voicing {
                        started_at_ms,
                        last_active_ms: now_ms,
                    };
                    vec![]
                } else if now_ms - last_active_ms >= self.silence_ms {
                    // 4. 無音が規定時間続いたのでセグメントを閉じる
                    self.state = SegmenterState::Silent;
                    vec![self.close(started_at_ms, last_active_ms)]
                } else {
                    vec![]
                }
            }
        }
    }

    /// アクティブなセグメントを外部停止として閉じる
    ///
    /// 無音タイムアウトと同じ判定を通す。セグメントが無ければ
    /// `None` を返す。
    pub fn flush(&mut self) -> Option<SegmentAction> {
        match self.state {
            SegmenterState::Silent => None,
            SegmenterState::Voicing {
                started_at_ms,
                last_active_ms,
            } => {
                self.state = SegmenterState::Silent;
                Some(self.close(started_at_ms, last_active_ms))
            }
        }
    }

    /// 発話区間中かどうか
    pub fn is_voicing(&self) -> bool {
        matches!(self.state, SegmenterState::Voicing { .. })
    }

    fn close(&self, started_at_ms: u64, last_active_ms: u64) -> SegmentAction {
        // 最初の有声ティックも1ティック分として数える
        let duration_ms = last_active_ms - started_at_ms + self.tick_interval_ms;
        if duration_ms >= self.min_voice_ms {
            log::debug!("セグメント確定 (長さ{}ms)", duration_ms);
            SegmentAction::Finalize {
                started_at_ms,
                ended_at_ms: last_active_ms + self.tick_interval_ms,
                duration_ms,
            }
        } else {
            log::debug!("短すぎるセグメントを破棄 (長さ{}ms)", duration_ms);
            SegmentAction::Discard
        }
    }
}
