/// 文字起こしテキストの蓄積バッファ
///
/// セグメント単位で確定したテキストを到着順に連結していく。
/// 連結時の区切り文字は追加されるテキストの言語で決まり、
/// CJK主体のテキストは区切りなし、それ以外は半角スペースで繋ぐ。
///
/// # Examples
///
/// ```
/// # use rt_translate::transcript::AccumulatedTranscript;
/// let mut transcript = AccumulatedTranscript::new();
/// transcript.append("Hello");
/// transcript.append("world");
/// assert_eq!(transcript.text(), "Hello world");
///
/// transcript.reset();
/// transcript.append("こんにちは");
/// transcript.append("元気ですか");
/// assert_eq!(transcript.text(), "こんにちは元気ですか");
/// ```
#[derive(Debug, Default)]
pub struct AccumulatedTranscript {
    text: String,
}

impl AccumulatedTranscript {
    pub fn new() -> Self {
        Self {
            text: String::new(),
        }
    }

    /// 確定テキストを1片追加
    ///
    /// 前後の空白は取り除かれる。空のテキストは無視される。
    pub fn append(&mut self, piece: &str) {
        let piece = piece.trim();
        if piece.is_empty() {
            return;
        }

        if !self.text.is_empty() && !is_cjk_dominant(piece) {
            self.text.push(' ');
        }
        self.text.push_str(piece);
    }

    /// 蓄積されたテキスト全体
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// 蓄積をクリア（セッション開始時に呼ばれる）
    pub fn reset(&mut self) {
        self.text.clear();
    }
}

/// テキストがCJK主体かどうかを判定
///
/// 空白を除いた文字のうち2割以上がCJK文字なら主体とみなす。
/// 日本語文に数字や英略語が混ざるケースを取りこぼさないための
/// 緩めの閾値。
pub fn is_cjk_dominant(text: &str) -> bool {
    let mut total = 0usize;
    let mut cjk = 0usize;

    for c in text.chars() {
        if c.is_whitespace() {
            continue;
        }
        total += 1;
        if is_cjk_char(c) {
            cjk += 1;
        }
    }

    total > 0 && cjk * 5 >= total
}

/// CJK文字（ひらがな・カタカナ・漢字・ハングル・全角形）の判定
fn is_cjk_char(c: char) -> bool {
    matches!(c,
        '\u{3000}'..='\u{303F}'   // CJK記号と句読点
        | '\u{3040}'..='\u{309F}' // ひらがな
        | '\u{30A0}'..='\u{30FF}' // カタカナ
        | '\u{4E00}'..='\u{9FFF}' // CJK統合漢字
        | '\u{AC00}'..='\u{D7AF}' // ハングル音節
        | '\u{FF00}'..='\u{FFEF}' // 全角英数・半角カナ
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_append_has_no_separator() {
        let mut transcript = AccumulatedTranscript::new();
        transcript.append("Hello");
        assert_eq!(transcript.text(), "Hello");
    }

    #[test]
    fn test_latin_pieces_joined_with_space() {
        let mut transcript = AccumulatedTranscript::new();
        transcript.append("Hello there");
        transcript.append("how are you");
        assert_eq!(transcript.text(), "Hello there how are you");
    }

    #[test]
    fn test_japanese_pieces_joined_without_space() {
        let mut transcript = AccumulatedTranscript::new();
        transcript.append("こんにちは");
        transcript.append("今日はいい天気ですね");
        assert_eq!(transcript.text(), "こんにちは今日はいい天気ですね");
    }

    #[test]
    fn test_korean_pieces_joined_without_space() {
        let mut transcript = AccumulatedTranscript::new();
        transcript.append("안녕하세요");
        transcript.append("반갑습니다");
        assert_eq!(transcript.text(), "안녕하세요반갑습니다");
    }

    #[test]
    fn test_separator_follows_incoming_piece() {
        let mut transcript = AccumulatedTranscript::new();
        transcript.append("The meeting starts at");
        transcript.append("10時です");
        // 追加される側がCJK主体なのでスペースは入らない
        assert_eq!(transcript.text(), "The meeting starts at10時です");

        transcript.append("OK then");
        assert_eq!(transcript.text(), "The meeting starts at10時です OK then");
    }

    #[test]
    fn test_mixed_japanese_with_ascii_words() {
        // 英略語や数字が混ざった日本語はCJK主体と判定される
        assert!(is_cjk_dominant("APIの使い方は3つあります"));
        assert!(is_cjk_dominant("こんにちは"));
        assert!(!is_cjk_dominant("Hello world"));
        assert!(!is_cjk_dominant("See page 世 for details and more"));
        assert!(!is_cjk_dominant(""));
        assert!(!is_cjk_dominant("   "));
    }

    #[test]
    fn test_whitespace_pieces_are_ignored() {
        let mut transcript = AccumulatedTranscript::new();
        transcript.append("Hello");
        transcript.append("   ");
        transcript.append("");
        assert_eq!(transcript.text(), "Hello");
    }

    #[test]
    fn test_pieces_are_trimmed() {
        let mut transcript = AccumulatedTranscript::new();
        transcript.append("  Hello  ");
        transcript.append("  world  ");
        assert_eq!(transcript.text(), "Hello world");
    }

    #[test]
    fn test_reset() {
        let mut transcript = AccumulatedTranscript::new();
        transcript.append("Hello");
        assert!(!transcript.is_empty());

        transcript.reset();
        assert!(transcript.is_empty());
        assert_eq!(transcript.text(), "");

        transcript.append("world");
        assert_eq!(transcript.text(), "world");
    }
}
