use crate::config::VadConfig;
use crate::types::{EnergySample, SampleI16};
use std::collections::VecDeque;

/// エネルギー変換の下限 (dB)。無音はこの値に張り付く
const MIN_DB: f32 = -100.0;

/// エネルギー変換の上限 (dB)。これ以上は 255 に飽和する
const MAX_DB: f32 = -30.0;

/// 音声エネルギーモニター
///
/// 直近 `analysis_window` サンプル（2のべき乗）のスライディング
/// ウィンドウを保持し、ティックごとに 0〜255 のエネルギー値を返す。
///
/// # アルゴリズム
///
/// 1. ウィンドウ内サンプルを正規化 (-1.0 ~ 1.0) して RMS を計算
/// 2. 指数平滑: `smoothed = smoothing * prev + (1 - smoothing) * rms`
/// 3. デシベルに変換: `20 * log10(rms)`
/// 4. [-100 dB, -30 dB] を [0, 255] に線形写像（範囲外はクランプ）
///
/// 平滑化は `measure()` の呼び出し（= ティック）ごとに1回適用される。
/// `push()` は何回呼んでもウィンドウを更新するだけで平滑状態には
/// 触れない。
///
/// # Examples
///
/// ```
/// # use rt_translate::energy_monitor::EnergyMonitor;
/// # use rt_translate::config::VadConfig;
/// let mut monitor = EnergyMonitor::new(&VadConfig::default());
/// assert_eq!(monitor.measure(), 0); // ウィンドウが空なら 0
///
/// let voice: Vec<i16> = (0..1024)
///     .map(|i| ((i as f32 * 0.1).sin() * 10000.0) as i16)
///     .collect();
/// monitor.push(&voice);
/// assert!(monitor.measure() > 0);
/// ```
pub struct EnergyMonitor {
    /// 解析対象のスライディングウィンドウ
    window: VecDeque<SampleI16>,

    /// ウィンドウの最大サンプル数 (2のべき乗)
    window_size: usize,

    /// 指数平滑の係数 (0.0 ~ <1.0)
    smoothing: f32,

    /// 平滑化されたRMS値
    smoothed_rms: f32,
}

impl EnergyMonitor {
    pub fn new(config: &VadConfig) -> Self {
        Self {
            window: VecDeque::with_capacity(config.analysis_window),
            window_size: config.analysis_window,
            smoothing: config.smoothing,
            smoothed_rms: 0.0,
        }
    }

    /// 新しいサンプルをウィンドウに追加
    ///
    /// ウィンドウが一杯の場合、古いサンプルから押し出される。
    pub fn push(&mut self, samples: &[SampleI16]) {
        for &s in samples {
            if self.window.len() == self.window_size {
                self.window.pop_front();
            }
            self.window.push_back(s);
        }
    }

    /// 現在のウィンドウからエネルギー値を1つ測定
    ///
    /// # Returns
    ///
    /// 0〜255 のエネルギー値。ウィンドウが空の場合は 0。
    pub fn measure(&mut self) -> EnergySample {
        if self.window.is_empty() {
            return 0;
        }

        let rms = calculate_rms(self.window.iter().copied());
        self.smoothed_rms = self.smoothing * self.smoothed_rms + (1.0 - self.smoothing) * rms;

        let db = rms_to_db(self.smoothed_rms);
        db_to_energy(db)
    }
}

/// RMS (Root Mean Square) を計算
///
/// サンプルは i16 の範囲から -1.0 ~ 1.0 に正規化される。
fn calculate_rms(samples: impl ExactSizeIterator<Item = SampleI16>) -> f32 {
    let len = samples.len();
    if len == 0 {
        return 0.0;
    }

    let sum_of_squares: f64 = samples
        .map(|s| {
            let normalized = s as f64 / i16::MAX as f64;
            normalized * normalized
        })
        .sum();

    let mean_square = sum_of_squares / len as f64;
    mean_square.sqrt() as f32
}

/// RMSをデシベル (dB) に変換
fn rms_to_db(rms: f32) -> f32 {
    if rms <= 0.0 {
        return MIN_DB; // 無音の場合の最小値
    }
    20.0 * rms.log10()
}

/// デシベル値を 0〜255 のエネルギー値に写像
fn db_to_energy(db: f32) -> EnergySample {
    let scaled = (db - MIN_DB) / (MAX_DB - MIN_DB) * 255.0;
    scaled.clamp(0.0, 255.0) as EnergySample
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> VadConfig {
        VadConfig {
            analysis_window: 1024,
            smoothing: 0.8,
            ..VadConfig::default()
        }
    }

    fn sine_samples(count: usize, amplitude: f32) -> Vec<i16> {
        (0..count)
            .map(|i| ((i as f32 * 0.1).sin() * amplitude) as i16)
            .collect()
    }

    #[test]
    fn test_empty_window_is_zero() {
        let mut monitor = EnergyMonitor::new(&test_config());
        assert_eq!(monitor.measure(), 0);
    }

    #[test]
    fn test_silence_energy_is_zero() {
        let mut monitor = EnergyMonitor::new(&test_config());

        // 無音サンプル（全て0）
        monitor.push(&vec![0i16; 1024]);
        assert_eq!(monitor.measure(), 0);
    }

    #[test]
    fn test_loud_signal_saturates() {
        let mut monitor = EnergyMonitor::new(&test_config());

        // 大きな振幅は -30dB を超えて 255 に張り付く
        monitor.push(&sine_samples(1024, 10000.0));
        assert_eq!(monitor.measure(), 255);
    }

    #[test]
    fn test_energy_decays_after_silence() {
        let mut monitor = EnergyMonitor::new(&test_config());

        monitor.push(&sine_samples(1024, 2000.0));
        let loud = monitor.measure();
        assert!(loud > 0);

        // 無音でウィンドウを押し流すと平滑値が減衰していく
        monitor.push(&vec![0i16; 1024]);
        let e1 = monitor.measure();
        let e2 = monitor.measure();
        let e3 = monitor.measure();
        assert!(e1 < loud);
        assert!(e2 < e1);
        assert!(e3 <= e2);
    }

    #[test]
    fn test_smoothing_rises_gradually() {
        let config = VadConfig {
            smoothing: 0.9,
            ..test_config()
        };
        let mut monitor = EnergyMonitor::new(&config);

        // 中程度の振幅では平滑化により段階的に上昇する
        monitor.push(&sine_samples(1024, 300.0));
        let e1 = monitor.measure();
        let e2 = monitor.measure();
        assert!(e1 > 0);
        assert!(e2 > e1);
    }

    #[test]
    fn test_window_evicts_old_samples() {
        let config = VadConfig {
            analysis_window: 256,
            smoothing: 0.0, // 平滑化なしでウィンドウ内容を直接観測
            ..test_config()
        };
        let mut monitor = EnergyMonitor::new(&config);

        monitor.push(&sine_samples(256, 10000.0));
        assert_eq!(monitor.measure(), 255);

        // ウィンドウ1周分の無音で古い音声は完全に押し出される
        monitor.push(&vec![0i16; 256]);
        assert_eq!(monitor.measure(), 0);
        assert_eq!(monitor.window.len(), 256);
    }

    #[test]
    fn test_rms_known_value() {
        // 全て同じ値なのでRMSは絶対値と等しいはず
        let samples = vec![1000i16; 1024];
        let rms = calculate_rms(samples.iter().copied());

        let expected = 1000.0 / i16::MAX as f32;
        assert!((rms - expected).abs() < 0.001);
    }

    #[test]
    fn test_rms_to_db() {
        // RMS = 0.1 の場合
        let db = rms_to_db(0.1);
        let expected = 20.0 * 0.1f32.log10();
        assert!((db - expected).abs() < 0.001);

        // RMS = 0.0 の場合（無音）
        assert_eq!(rms_to_db(0.0), -100.0);
    }

    #[test]
    fn test_db_to_energy_mapping() {
        assert_eq!(db_to_energy(-100.0), 0);
        assert_eq!(db_to_energy(-30.0), 255);
        assert_eq!(db_to_energy(0.0), 255); // 上限でクランプ
        assert_eq!(db_to_energy(-120.0), 0); // 下限でクランプ
        assert_eq!(db_to_energy(-65.0), 127); // 中間点
    }
}
