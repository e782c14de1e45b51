//! Filesystem-safe naming for downloaded media files.

/// Characters replaced with `_` in display titles.
const ILLEGAL: [char; 9] = ['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Maximum length of a sanitized title, in characters.
const MAX_LEN: usize = 200;

/// Sanitizes a media title for use inside a filename.
///
/// Replaces path-hostile characters with `_` and truncates so the result is
/// at most 200 characters, preserving a trailing extension if one exists.
pub fn sanitize_title(title: &str) -> String {
    let mut out: String = title
        .chars()
        .map(|c| if ILLEGAL.contains(&c) { '_' } else { c })
        .collect();

    if out.chars().count() > MAX_LEN {
        out = match out.rfind('.') {
            Some(dot) if dot > 0 => {
                let (stem, ext) = out.split_at(dot);
                let stem: String = stem.chars().take(MAX_LEN.saturating_sub(4)).collect();
                format!("{stem}{ext}")
            }
            _ => out.chars().take(MAX_LEN).collect(),
        };
    }

    out
}

/// Filename for a job: `{job_id}_{sanitized title}.mp4`.
pub fn media_filename(job_id: &str, title: &str) -> String {
    format!("{}_{}.mp4", job_id, sanitize_title(title))
}
