use crate::config::OverlayConfig;
use crate::error::PipelineError;
use serde::Deserialize;

/// 折り返しに使える矩形幅の割合
const WRAP_RATIO: f32 = 0.9;

/// 行の高さ係数（フォントサイズに対する倍率）
const LINE_HEIGHT: f32 = 1.2;

/// 衝突回避の対象となる回転角の上限 (度)
const NEAR_HORIZONTAL_DEG: f32 = 5.0;

/// フォント縮小1回あたりの倍率
const SHRINK_STEP: f32 = 0.9;

/// フォント縮小の試行回数
const SHRINK_ATTEMPTS: u32 = 5;

/// 衝突回避の総試行回数（縮小と移動を合わせて）
const TOTAL_ATTEMPTS: u32 = 20;

/// 移動試行の8方向（上、下、左、右、斜め4方向）
const DIRECTIONS: [(f32, f32); 8] = [
    (0.0, -1.0),
    (0.0, 1.0),
    (-1.0, 0.0),
    (1.0, 0.0),
    (-1.0, -1.0),
    (1.0, -1.0),
    (-1.0, 1.0),
    (1.0, 1.0),
];

/// OCRが検出した元テキストの矩形
///
/// 中心座標 + 幅・高さ + 回転角で表す。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceRect {
    pub cx: f32,
    pub cy: f32,
    pub width: f32,
    pub height: f32,
    pub angle_degrees: f32,
}

/// レイアウト対象の1項目（翻訳テキストと元矩形の組）
#[derive(Debug, Clone)]
pub struct OverlayItem {
    pub text: String,
    pub rect: SourceRect,
}

/// 配置が確定したオーバーレイ
///
/// 描画側は背景を塗り、`lines` を中央揃えで1行ずつ描き、
/// `angle_degrees` が非ゼロなら中心周りに回転させる。
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedOverlay {
    pub cx: f32,
    pub cy: f32,
    pub width: f32,
    pub height: f32,
    pub font_size: f32,
    pub lines: Vec<String>,
    pub angle_degrees: f32,
}

/// 軸平行の当たり判定用矩形
#[derive(Debug, Clone, Copy)]
struct Aabb {
    left: f32,
    top: f32,
    right: f32,
    bottom: f32,
}

impl Aabb {
    fn from_center(cx: f32, cy: f32, width: f32, height: f32) -> Self {
        Self {
            left: cx - width / 2.0,
            top: cy - height / 2.0,
            right: cx + width / 2.0,
            bottom: cy + height / 2.0,
        }
    }

    /// 2つの矩形が重なるか（辺が接しているだけなら重なりとしない）
    fn overlaps(&self, other: &Aabb) -> bool {
        !(self.right <= other.left
            || other.right <= self.left
            || self.bottom <= other.top
            || other.bottom <= self.top)
    }
}

/// 配置候補の作業用データ
#[derive(Debug, Clone)]
struct Candidate {
    cx: f32,
    cy: f32,
    width: f32,
    height: f32,
    font_size: f32,
    lines: Vec<String>,
}

impl Candidate {
    fn aabb(&self) -> Aabb {
        Aabb::from_center(self.cx, self.cy, self.width, self.height)
    }
}

/// オーバーレイレイアウトエンジン
///
/// 翻訳テキストを元テキストの矩形に重ねて描くための最終矩形・
/// フォントサイズ・折り返し行を計算する。近水平 (|角度| < 5度) の
/// 領域同士は重ならないように、フォント縮小 → 8方向への移動の
/// 順で回避を試みる。
///
/// 配置済みリストは1画像パス分のローカル状態。複数画像を並行処理
/// する場合は画像ごとに独立したエンジンを使うこと。
///
/// # 文字幅の見積もり
///
/// ASCII印字文字は半角 (0.5em)、それ以外は全角 (1.0em) として
/// 扱う。単語区切りを持たないCJKに合わせ、折り返しは文字単位。
pub struct OverlayLayoutEngine {
    min_font_size: f32,
    max_font_size: f32,
    /// このパスで配置済みの矩形（回転領域も含む）
    placed: Vec<Aabb>,
}

impl OverlayLayoutEngine {
    pub fn new(config: &OverlayConfig) -> Self {
        Self {
            min_font_size: config.min_font_size,
            max_font_size: config.max_font_size,
            placed: Vec::new(),
        }
    }

    /// 全項目のレイアウトを入力順に計算する
    ///
    /// 入力順がそのまま処理順になるため、同じ入力からは常に同じ
    /// 結果が得られる。矩形が不正な項目は警告を出して読み飛ばす。
    pub fn layout(&mut self, items: &[OverlayItem]) -> Vec<PlacedOverlay> {
        self.placed.clear();

        let mut results = Vec::with_capacity(items.len());
        for item in items {
            if !is_valid_region(item) {
                log::warn!("不正なオーバーレイ領域を読み飛ばします: {:?}", item.rect);
                continue;
            }
            results.push(self.place_item(item));
        }
        results
    }

    fn place_item(&mut self, item: &OverlayItem) -> PlacedOverlay {
        let rect = item.rect;

        // 1. 明示的な改行数から基準フォントサイズを決める
        let line_count = item.text.split('\n').count() as f32;
        let base_font = (rect.width.min(rect.height) * 0.5 / line_count)
            .clamp(self.min_font_size, self.max_font_size);

        // 2.-3. 折り返しと矩形拡張
        let base = self.fit(item, base_font);

        // 4. 近水平の領域だけ衝突回避を行う。回転領域はそのまま置く
        let fitted = if rect.angle_degrees.abs() < NEAR_HORIZONTAL_DEG {
            self.resolve_collision(item, base)
        } else {
            base
        };

        // 5. 最終矩形を配置済みリストに登録する
        self.placed.push(fitted.aabb());

        PlacedOverlay {
            cx: fitted.cx,
            cy: fitted.cy,
            width: fitted.width,
            height: fitted.height,
            font_size: fitted.font_size,
            lines: fitted.lines,
            angle_degrees: rect.angle_degrees,
        }
    }

    /// 指定フォントサイズで折り返し、必要なら矩形を拡張した候補を作る
    ///
    /// 拡張は常に元の矩形を基準に行う。縮小試行で小さいフォントを
    /// 渡した場合も、拡張済み矩形からさらに広がることはない。
    fn fit(&self, item: &OverlayItem, font_size: f32) -> Candidate {
        let rect = item.rect;
        let wrap_limit = rect.width * WRAP_RATIO;

        let mut lines = Vec::new();
        for explicit_line in item.text.split('\n') {
            lines.extend(wrap_line(explicit_line, wrap_limit, font_size));
        }

        let widest = lines
            .iter()
            .map(|line| measure_line(line, font_size))
            .fold(0.0f32, f32::max);
        let total_height = lines.len() as f32 * font_size * LINE_HEIGHT;

        // 内容が矩形の9割を超える場合だけ、収まる大きさまで広げる
        let needed_width = widest / WRAP_RATIO;
        let needed_height = total_height / WRAP_RATIO;

        Candidate {
            cx: rect.cx,
            cy: rect.cy,
            width: rect.width.max(needed_width),
            height: rect.height.max(needed_height),
            font_size,
            lines,
        }
    }

    /// 配置済み矩形との衝突を解消する
    ///
    /// 試行1〜5はフォント縮小（×0.9、下限 `min_font_size`）、
    /// 試行6〜20は8方向への移動（半径は `10 * (試行 - 4)`）。
    /// 全試行で解消できなければ元の位置・サイズのまま重なりを
    /// 受け入れる。
    fn resolve_collision(&self, item: &OverlayItem, base: Candidate) -> Candidate {
        if !self.overlaps_any(&base.aabb()) {
            return base;
        }

        let mut current = base.clone();
        for attempt in 1..=TOTAL_ATTEMPTS {
            if attempt <= SHRINK_ATTEMPTS {
                let next_font = (current.font_size * SHRINK_STEP).max(self.min_font_size);
                current = self.fit(item, next_font);
            } else {
                let dir = ((attempt - SHRINK_ATTEMPTS - 1) as usize) % DIRECTIONS.len();
                let (dx, dy) = DIRECTIONS[dir];
                let radius = 10.0 * (attempt - 4) as f32;
                current.cx = base.cx + dx * radius;
                current.cy = base.cy + dy * radius;
            }

            if !self.overlaps_any(&current.aabb()) {
                return current;
            }
        }

        log::debug!(
            "衝突回避を{}回試行しても解消できないため重なりを許容します (cx={}, cy={})",
            TOTAL_ATTEMPTS,
            base.cx,
            base.cy
        );
        base
    }

    fn overlaps_any(&self, aabb: &Aabb) -> bool {
        self.placed.iter().any(|placed| placed.overlaps(aabb))
    }
}

/// 1文字分の描画幅を見積もる
fn char_width(c: char, font_size: f32) -> f32 {
    if (' '..='\u{7e}').contains(&c) {
        font_size * 0.5
    } else {
        font_size
    }
}

fn measure_line(line: &str, font_size: f32) -> f32 {
    line.chars().map(|c| char_width(c, font_size)).sum()
}

/// 1行を文字単位の貪欲法で折り返す
///
/// 幅制限を超える場合でも、各行に最低1文字は入れる。
fn wrap_line(line: &str, limit: f32, font_size: f32) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut width = 0.0f32;

    for c in line.chars() {
        let cw = char_width(c, font_size);
        if !current.is_empty() && width + cw > limit {
            lines.push(std::mem::take(&mut current));
            width = 0.0;
        }
        current.push(c);
        width += cw;
    }
    lines.push(current);
    lines
}

fn is_valid_region(item: &OverlayItem) -> bool {
    let r = item.rect;
    r.cx.is_finite()
        && r.cy.is_finite()
        && r.width.is_finite()
        && r.height.is_finite()
        && r.angle_degrees.is_finite()
        && r.width > 0.0
        && r.height > 0.0
        && !item.text.trim().is_empty()
}

/// OCR応答の1領域
#[derive(Debug, Deserialize)]
struct RegionDto {
    text: String,
    cx: f32,
    cy: f32,
    width: f32,
    height: f32,
    #[serde(default)]
    angle_degrees: f32,
}

/// OCR応答のJSONをレイアウト入力に変換する
///
/// # Errors
///
/// 文書全体がJSONとして解析できない、または配列でない場合は
/// `MalformedResponse`。個々の要素の不備はその要素だけを警告付きで
/// 読み飛ばし、残りの領域は生かす。
pub fn parse_regions(json: &str) -> Result<Vec<OverlayItem>, PipelineError> {
    let value: serde_json::Value = serde_json::from_str(json)
        .map_err(|e| PipelineError::MalformedResponse(format!("OCR応答の解析に失敗: {}", e)))?;

    let array = value
        .as_array()
        .ok_or_else(|| PipelineError::MalformedResponse("OCR応答が配列ではありません".to_string()))?;

    let mut items = Vec::with_capacity(array.len());
    for element in array {
        match serde_json::from_value::<RegionDto>(element.clone()) {
            Ok(region) => items.push(OverlayItem {
                text: region.text,
                rect: SourceRect {
                    cx: region.cx,
                    cy: region.cy,
                    width: region.width,
                    height: region.height,
                    angle_degrees: region.angle_degrees,
                },
            }),
            Err(e) => {
                log::warn!("OCR応答の不正な領域を読み飛ばします: {}", e);
            }
        }
    }
    Ok(items)
}
