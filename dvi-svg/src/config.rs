/// Knobs for a conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderOptions {
    /// Page width in points, used for the outer `<svg>` until a `papersize` special says
    /// otherwise.
    pub paper_width: f64,
    pub paper_height: f64,
    /// Character whose metrics stand in for characters a font does not have.
    pub fallback_char: u32,
    /// Coalesce runs of `set_char` into a single text run before execution.
    pub merge_text: bool,
    /// Color in effect before any `color push`.
    pub color: String,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            // US letter
            paper_width: 614.295,
            paper_height: 794.97,
            fallback_char: 126,
            merge_text: true,
            color: "black".to_string(),
        }
    }
}
