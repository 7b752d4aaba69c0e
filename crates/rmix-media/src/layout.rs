//! Hook text layout.
//!
//! Wraps hook text into at most [`MAX_LINES`] lines that fit the configured
//! share of the frame width and computes the drawtext anchor. Widths are
//! estimated from character counts; no font metrics are consulted.

use rmix_models::{TextAlign, TextPosition, TextSettings};

/// Average glyph width as a fraction of the font size.
pub const GLYPH_WIDTH_FACTOR: f64 = 0.55;

/// Maximum number of wrapped lines.
pub const MAX_LINES: usize = 4;

/// Line spacing as a fraction of the font size.
pub const LINE_SPACING_FACTOR: f64 = 0.2;

/// Vertical anchors as fractions of frame height.
pub const TOP_ANCHOR: f64 = 0.15;
pub const BOTTOM_ANCHOR: f64 = 0.75;

const ELLIPSIS: &str = "...";

/// Wrapped hook text and its anchor inside the frame.
#[derive(Debug, Clone, PartialEq)]
pub struct TextLayout {
    pub lines: Vec<String>,
    /// Left edge of the text block, in pixels
    pub x: i64,
    /// Top edge of the text block, in pixels
    pub y: i64,
    pub font_size: u32,
    pub line_spacing: u32,
    /// Per-line character budget
    pub chars_per_line: usize,
    /// Words were dropped to respect the line limit
    pub truncated: bool,
}

impl TextLayout {
    /// Newline-joined text as handed to the renderer.
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Estimated width of the widest line.
    pub fn text_width(&self) -> f64 {
        let widest = self.lines.iter().map(|l| l.chars().count()).max().unwrap_or(0);
        estimated_width(widest, self.font_size)
    }

    pub fn text_height(&self) -> f64 {
        block_height(self.lines.len(), self.font_size, self.line_spacing)
    }
}

/// Characters that fit on one line.
pub fn chars_per_line(frame_width: u32, max_width_percent: u8, font_size: u32) -> usize {
    let usable = usable_width(frame_width, max_width_percent);
    let glyph = font_size.max(1) as f64 * GLYPH_WIDTH_FACTOR;
    ((usable / glyph).floor() as usize).max(1)
}

pub fn usable_width(frame_width: u32, max_width_percent: u8) -> f64 {
    frame_width as f64 * max_width_percent as f64 / 100.0
}

pub fn estimated_width(chars: usize, font_size: u32) -> f64 {
    chars as f64 * font_size as f64 * GLYPH_WIDTH_FACTOR
}

fn block_height(lines: usize, font_size: u32, line_spacing: u32) -> f64 {
    if lines == 0 {
        return 0.0;
    }
    (lines as u32 * font_size + (lines as u32 - 1) * line_spacing) as f64
}

/// Drop control characters; whitespace controls become plain spaces.
pub fn sanitize(text: &str) -> String {
    text.chars()
        .filter_map(|c| {
            if c.is_whitespace() {
                Some(' ')
            } else if c.is_control() {
                None
            } else {
                Some(c)
            }
        })
        .collect()
}

/// Lay out `text` for a frame of `frame_width` x `frame_height`.
pub fn layout_text(
    text: &str,
    settings: &TextSettings,
    frame_width: u32,
    frame_height: u32,
) -> TextLayout {
    let font_size = settings.font_size.max(1);
    let line_spacing = (font_size as f64 * LINE_SPACING_FACTOR).round() as u32;
    let budget = chars_per_line(frame_width, settings.max_width_percent, font_size);

    let (lines, truncated) = wrap(&sanitize(text), budget);

    let mut layout = TextLayout {
        lines,
        x: 0,
        y: 0,
        font_size,
        line_spacing,
        chars_per_line: budget,
        truncated,
    };

    let width = frame_width as f64;
    let height = frame_height as f64;
    let margin = width * (100.0 - settings.max_width_percent as f64) / 200.0;
    let text_width = layout.text_width();

    layout.x = match settings.align {
        TextAlign::Left => margin,
        TextAlign::Right => width - text_width - margin,
        TextAlign::Center => (width - text_width) / 2.0,
    }
    .round() as i64;

    layout.y = match settings.position {
        TextPosition::Top => height * TOP_ANCHOR,
        TextPosition::Bottom => height * BOTTOM_ANCHOR,
        TextPosition::Center => (height - layout.text_height()) / 2.0,
    }
    .round() as i64;

    layout
}

/// Greedy word wrap into at most [`MAX_LINES`] lines of `budget` chars.
fn wrap(text: &str, budget: usize) -> (Vec<String>, bool) {
    let mut lines: Vec<String> = Vec::new();
    let mut current: Vec<char> = Vec::new();
    let mut truncated = false;

    'words: for word in text.split_whitespace() {
        let chars: Vec<char> = word.chars().collect();

        let needed = if current.is_empty() {
            chars.len()
        } else {
            current.len() + 1 + chars.len()
        };
        if needed <= budget {
            if !current.is_empty() {
                current.push(' ');
            }
            current.extend(&chars);
            continue;
        }

        if !current.is_empty() {
            if lines.len() + 1 >= MAX_LINES {
                truncated = true;
                break;
            }
            lines.push(current.drain(..).collect());
        }

        // Hard-split words longer than a whole line.
        let mut rest = chars.as_slice();
        while rest.len() > budget {
            if lines.len() + 1 >= MAX_LINES {
                current = rest[..budget].to_vec();
                truncated = true;
                break 'words;
            }
            lines.push(rest[..budget].iter().collect());
            rest = &rest[budget..];
        }
        current = rest.to_vec();
    }

    if !current.is_empty() {
        lines.push(current.into_iter().collect());
    }

    if truncated {
        if let Some(last) = lines.last_mut() {
            *last = ellipsize(last, budget);
        }
    }

    (lines, truncated)
}

fn ellipsize(line: &str, budget: usize) -> String {
    let marker = ELLIPSIS.len();
    if budget <= marker {
        return ELLIPSIS.chars().take(budget).collect();
    }
    let kept: String = line.chars().take(budget - marker).collect();
    format!("{}{}", kept.trim_end(), ELLIPSIS)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(max_width_percent: u8, font_size: u32) -> TextSettings {
        TextSettings {
            max_width_percent,
            font_size,
            ..TextSettings::default()
        }
    }

    #[test]
    fn test_chars_per_line() {
        assert_eq!(chars_per_line(1080, 60, 38), 31);
        assert_eq!(chars_per_line(1080, 100, 16), 122);
        assert_eq!(chars_per_line(10, 20, 80), 1);
    }

    #[test]
    fn test_reference_hook() {
        let layout = layout_text("Wait until you see this demo in action", &settings(60, 38), 1080, 1920);

        assert!((2..=3).contains(&layout.lines.len()));
        assert_eq!(layout.lines[0], "Wait until you see this demo in");
        assert_eq!(layout.lines[1], "action");
        assert!(!layout.truncated);
        assert!(layout.text_width() <= usable_width(1080, 60));
    }

    #[test]
    fn test_wrap_invariants_hold_across_settings() {
        let texts = [
            "",
            "short",
            "Wait until you see this demo in action",
            "This is a considerably longer hook that will not fit in the four lines we allow for any reasonable font size at all, honestly",
            "Supercalifragilisticexpialidocious-and-then-some-more-characters-without-any-breaks",
            "mixed   spacing\tand\nnewlines in\r\nthe text",
            "émojis 🎬 and ünïcödé wörds stay whole when they fit",
        ];

        for text in texts {
            for percent in [20u8, 45, 60, 80, 100] {
                for font_size in [16u32, 24, 38, 52, 80] {
                    let s = settings(percent, font_size);
                    let layout = layout_text(text, &s, 1080, 1920);
                    let budget = usable_width(1080, percent);

                    assert!(layout.lines.len() <= MAX_LINES, "{text:?} {percent} {font_size}");
                    for line in &layout.lines {
                        let width = estimated_width(line.chars().count(), font_size);
                        assert!(width <= budget, "{line:?} is {width}px wide, budget {budget}");
                        assert!(!line.is_empty());
                    }
                    assert_eq!(layout, layout_text(text, &s, 1080, 1920));
                }
            }
        }
    }

    #[test]
    fn test_truncation_adds_ellipsis() {
        let text = "one two three four five six seven eight nine ten eleven twelve";
        let layout = layout_text(text, &settings(20, 38), 1080, 1920);

        assert!(layout.truncated);
        assert_eq!(layout.lines.len(), MAX_LINES);
        let last = layout.lines.last().unwrap();
        assert!(last.ends_with("..."));
        assert!(last.chars().count() <= layout.chars_per_line);
    }

    #[test]
    fn test_long_word_is_hard_split() {
        let layout = layout_text("abcdefghijklmnopqrstuvwxyz", &settings(20, 38), 1080, 1920);
        // 216px usable / 20.9px per glyph = 10 chars
        assert_eq!(layout.chars_per_line, 10);
        assert_eq!(layout.lines, vec!["abcdefghij", "klmnopqrst", "uvwxyz"]);
        assert!(!layout.truncated);
    }

    #[test]
    fn test_control_characters_removed() {
        let layout = layout_text("100%\u{7}\u{1b} real\ttalk", &settings(60, 38), 1080, 1920);
        assert_eq!(layout.text(), "100% real talk");
    }

    #[test]
    fn test_empty_text() {
        let layout = layout_text(" \n\t ", &TextSettings::default(), 1080, 1920);
        assert!(layout.is_empty());
        assert_eq!(layout.text_height(), 0.0);
    }

    #[test]
    fn test_horizontal_anchor() {
        let mut s = settings(60, 38);
        let text = "Hook";
        let width = estimated_width(4, 38);

        s.align = TextAlign::Left;
        assert_eq!(layout_text(text, &s, 1080, 1920).x, 216);

        s.align = TextAlign::Right;
        assert_eq!(layout_text(text, &s, 1080, 1920).x, (1080.0 - width - 216.0).round() as i64);

        s.align = TextAlign::Center;
        assert_eq!(layout_text(text, &s, 1080, 1920).x, ((1080.0 - width) / 2.0).round() as i64);
    }

    #[test]
    fn test_vertical_anchor() {
        let mut s = settings(60, 40);
        let text = "Wait until you see this demo in action";

        s.position = TextPosition::Top;
        assert_eq!(layout_text(text, &s, 1080, 1920).y, 288);

        s.position = TextPosition::Bottom;
        assert_eq!(layout_text(text, &s, 1080, 1920).y, 1440);

        s.position = TextPosition::Center;
        let layout = layout_text(text, &s, 1080, 1920);
        // two lines of 40px with 8px spacing
        assert_eq!(layout.text_height(), 88.0);
        assert_eq!(layout.y, 916);
    }
}
