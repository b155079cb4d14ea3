//! Text width measurement.
//!
//! The paginator wraps lines with a [`TextMeasurer`] and the PDF renderer
//! draws them with the font the measurer describes, so both agree on where
//! a line ends. Widths are in PDF points and additive: the width of `ab` is
//! the width of `a` plus the width of `b`.

/// Measures rendered text width.
pub trait TextMeasurer: Send + Sync {
    /// Advance width of one character at `font_size` points.
    fn char_width(&self, c: char, font_size: f32) -> f32;

    /// Width of `text` at `font_size` points.
    fn width(&self, text: &str, font_size: f32) -> f32 {
        text.chars().map(|c| self.char_width(c, font_size)).sum()
    }
}

/// Advance widths of the standard Helvetica font (WinAnsi), in 1/1000 em,
/// for the printable ASCII range `' '..='~'`.
const HELVETICA_ASCII: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // ' '..'/'
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556, // '0'..'?'
    1015, 667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778, // '@'..'O'
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 278, 278, 278, 469, 556, // 'P'..'_'
    333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556, // '`'..'o'
    556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584, // 'p'..'~'
];

/// Width used for characters outside the table.
const HELVETICA_FALLBACK: u16 = 556;

/// Spaces a tab expands to.
pub const TAB_WIDTH: usize = 4;

/// Helvetica, the font the PDF renderer draws with.
#[derive(Debug, Clone, Copy, Default)]
pub struct HelveticaMetrics;

impl HelveticaMetrics {
    fn units(c: char) -> u16 {
        match c {
            '\t' => HELVETICA_ASCII[0] * TAB_WIDTH as u16,
            ' '..='~' => HELVETICA_ASCII[c as usize - ' ' as usize],
            c if c.is_control() => 0,
            _ => HELVETICA_FALLBACK,
        }
    }
}

impl TextMeasurer for HelveticaMetrics {
    fn char_width(&self, c: char, font_size: f32) -> f32 {
        f32::from(Self::units(c)) * font_size / 1000.0
    }
}

/// Fixed-pitch font: every character advances `em_fraction × font_size`.
#[derive(Debug, Clone, Copy)]
pub struct MonospaceMetrics {
    pub em_fraction: f32,
}

impl MonospaceMetrics {
    /// Courier's 600/1000 em advance.
    pub fn courier() -> Self {
        Self { em_fraction: 0.6 }
    }
}

impl Default for MonospaceMetrics {
    fn default() -> Self {
        Self::courier()
    }
}

impl TextMeasurer for MonospaceMetrics {
    fn char_width(&self, c: char, font_size: f32) -> f32 {
        let cells = match c {
            '\t' => TAB_WIDTH as f32,
            c if c.is_control() => 0.0,
            _ => 1.0,
        };
        cells * self.em_fraction * font_size
    }
}
