//! Paragraph assembly and document rendering.
//!
//! A subtitle that was captured as a primary frame plus variants (`12.png`,
//! `12.1.png`, `12-2.png`) is stitched back together into one paragraph.

pub mod docx;
pub mod text;

use std::collections::HashMap;

use crate::canonical;
use crate::db::frame_repo::FrameRow;

pub use docx::render_docx;
pub use text::render_text;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paragraph {
    pub base_key: String,
    pub text: String,
}

/// Groups frames by base key into paragraphs.
///
/// Groups are ordered naturally by key and frames inside a group keep index
/// order. Groups whose joined text is blank are left out.
pub fn assemble_paragraphs(frames: &[FrameRow]) -> Vec<Paragraph> {
    let mut groups: HashMap<&str, Vec<&FrameRow>> = HashMap::new();
    for frame in frames {
        groups.entry(frame.base_key.as_str()).or_default().push(frame);
    }

    let mut keys: Vec<&str> = groups.keys().copied().collect();
    canonical::sort_natural(&mut keys);

    keys.into_iter()
        .filter_map(|key| {
            let mut members = groups.remove(key)?;
            members.sort_by_key(|f| f.index);
            let text = members
                .iter()
                .map(|f| f.text.trim())
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join(" ");
            (!text.is_empty()).then(|| Paragraph {
                base_key: key.to_string(),
                text,
            })
        })
        .collect()
}
