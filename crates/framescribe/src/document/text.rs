use super::Paragraph;

/// Plain UTF-8 text: paragraphs separated by one blank line, trailing newline.
pub fn render_text(paragraphs: &[Paragraph]) -> String {
    if paragraphs.is_empty() {
        return String::new();
    }
    let mut out = paragraphs
        .iter()
        .map(|p| p.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    out.push('\n');
    out
}
