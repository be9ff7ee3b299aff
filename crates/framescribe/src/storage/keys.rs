//! Object key layout for a job's workspace and deliverables.

const CROP_SUFFIX: &str = ".png";

pub fn job_prefix(job_id: &str) -> String {
    format!("jobs/{}/", job_id)
}

pub fn crops_prefix(job_id: &str) -> String {
    format!("jobs/{}/crops/", job_id)
}

pub fn frames_prefix(job_id: &str) -> String {
    format!("jobs/{}/frames/", job_id)
}

/// Crop of the subtitle band. The index is zero-padded so a lexical listing
/// is also submission order.
pub fn crop_key(job_id: &str, index: u32, base_name: &str) -> String {
    format!("{}{:06}-{}{}", crops_prefix(job_id), index, base_name, CROP_SUFFIX)
}

/// Recovers `(index, base_name)` from a key produced by [`crop_key`].
pub fn parse_crop_key(job_id: &str, key: &str) -> Option<(u32, String)> {
    let rest = key.strip_prefix(&crops_prefix(job_id))?;
    let rest = rest.strip_suffix(CROP_SUFFIX)?;
    let (index, base_name) = rest.split_once('-')?;
    if base_name.is_empty() || !index.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some((index.parse().ok()?, base_name.to_string()))
}

/// Normalized full frame destined for the filtered archive.
pub fn frame_key(job_id: &str, base_key: &str) -> String {
    format!("{}{}.png", frames_prefix(job_id), base_key)
}

pub fn thumbnail_key(job_id: &str) -> String {
    format!("jobs/{}/thumbnail.jpg", job_id)
}

pub fn manifest_key(job_id: &str) -> String {
    format!("jobs/{}/manifest.jsonl", job_id)
}

pub fn batch_output_key(job_id: &str) -> String {
    format!("jobs/{}/output.jsonl", job_id)
}

pub fn images_zip_key(job_id: &str) -> String {
    format!("jobs/{}/output/images.zip", job_id)
}

pub fn text_key(job_id: &str) -> String {
    format!("jobs/{}/output/subtitles.txt", job_id)
}

pub fn docx_key(job_id: &str) -> String {
    format!("jobs/{}/output/subtitles.docx", job_id)
}
