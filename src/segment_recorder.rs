use crate::types::{AudioFormat, SampleI16, SegmentAudio};

/// セグメント録音バッファ
///
/// アクティブなセグメント1つ分の生PCMを保持する。`begin` から
/// `finalize` または `discard` までが1セグメント。確定時には
/// バッファの所有権ごと `SegmentAudio` に移し、以後そのセグメントが
/// 変更されることはない。
pub struct SegmentRecorder {
    samples: Vec<SampleI16>,
    recording: bool,
}

impl SegmentRecorder {
    pub fn new() -> Self {
        Self {
            samples: Vec::new(),
            recording: false,
        }
    }

    /// 新しいセグメントの録音を開始
    ///
    /// 前のセグメントの未確定データが残っていた場合は捨てられる。
    pub fn begin(&mut self) {
        self.samples.clear();
        self.recording = true;
    }

    /// 録音中であればサンプルを追記
    ///
    /// 録音中でない場合は何もしない。
    pub fn append(&mut self, samples: &[SampleI16]) {
        if self.recording {
            self.samples.extend_from_slice(samples);
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// アクティブなセグメントを確定して取り出す
    ///
    /// # Arguments
    ///
    /// * `format` - 録音時のオーディオフォーマット
    /// * `started_at_ms` - セグメント開始時刻（境界判定側の値）
    /// * `duration_ms` - セグメント長（境界判定側の値）
    ///
    /// # Returns
    ///
    /// 録音済みPCMを持つ `SegmentAudio`。録音中でない、または
    /// サンプルが1つも無い場合は `None`。
    pub fn finalize(
        &mut self,
        format: AudioFormat,
        started_at_ms: u64,
        duration_ms: u64,
    ) -> Option<SegmentAudio> {
        if !self.recording {
            return None;
        }
        self.recording = false;

        let samples = std::mem::take(&mut self.samples);
        if samples.is_empty() {
            log::warn!("確定時にサンプルが空のためセグメントを破棄します");
            return None;
        }

        Some(SegmentAudio {
            samples,
            format,
            started_at_ms,
            duration_ms,
        })
    }

    /// アクティブなセグメントを破棄
    pub fn discard(&mut self) {
        self.recording = false;
        self.samples.clear();
    }
}

impl Default for SegmentRecorder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format() -> AudioFormat {
        AudioFormat {
            sample_rate: 16000,
            channels: 1,
        }
    }

    #[test]
    fn test_begin_append_finalize() {
        let mut recorder = SegmentRecorder::new();
        assert!(!recorder.is_recording());

        recorder.begin();
        assert!(recorder.is_recording());

        recorder.append(&[1, 2, 3]);
        recorder.append(&[4, 5]);

        let segment = recorder.finalize(format(), 100, 300).unwrap();
        assert_eq!(segment.samples, vec![1, 2, 3, 4, 5]);
        assert_eq!(segment.started_at_ms, 100);
        assert_eq!(segment.duration_ms, 300);
        assert!(!recorder.is_recording());
    }

    #[test]
    fn test_append_ignored_when_not_recording() {
        let mut recorder = SegmentRecorder::new();
        recorder.append(&[1, 2, 3]);

        recorder.begin();
        recorder.append(&[4, 5]);
        let segment = recorder.finalize(format(), 0, 100).unwrap();

        // 録音開始前のサンプルは含まれない
        assert_eq!(segment.samples, vec![4, 5]);
    }

    #[test]
    fn test_finalize_without_begin() {
        let mut recorder = SegmentRecorder::new();
        assert!(recorder.finalize(format(), 0, 100).is_none());
    }

    #[test]
    fn test_finalize_empty_segment() {
        let mut recorder = SegmentRecorder::new();
        recorder.begin();
        // サンプルが1つも来ないまま確定
        assert!(recorder.finalize(format(), 0, 100).is_none());
        assert!(!recorder.is_recording());
    }

    #[test]
    fn test_discard_clears_buffer() {
        let mut recorder = SegmentRecorder::new();
        recorder.begin();
        recorder.append(&[1, 2, 3]);
        recorder.discard();

        assert!(!recorder.is_recording());
        assert!(recorder.finalize(format(), 0, 100).is_none());
    }

    #[test]
    fn test_reusable_after_finalize() {
        let mut recorder = SegmentRecorder::new();

        recorder.begin();
        recorder.append(&[1, 2]);
        let first = recorder.finalize(format(), 0, 200).unwrap();

        // 確定直後に次のセグメントを開始できる (強制分割の経路)
        recorder.begin();
        recorder.append(&[3, 4]);
        let second = recorder.finalize(format(), 200, 200).unwrap();

        assert_eq!(first.samples, vec![1, 2]);
        assert_eq!(second.samples, vec![3, 4]);
    }
}
