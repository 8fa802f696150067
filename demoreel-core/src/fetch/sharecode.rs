use regex::Regex;

const SHARE_CODE_PATTERN: &str = r"CSGO(-[A-Za-z0-9]{5}){5}";

/// Pulls the first well-formed match share code out of free text — a bare
/// code, a full steam:// link, or anything a submitter pasted around it.
pub fn extract_share_code(text: &str) -> Option<String> {
    let regex = Regex::new(SHARE_CODE_PATTERN).ok()?;
    regex.find(text).map(|m| m.as_str().to_string())
}

/// Direct replay download URLs skip share-code resolution entirely.
pub fn is_demo_url(text: &str) -> bool {
    let text = text.trim();
    (text.starts_with("http://") || text.starts_with("https://")) && text.ends_with(".dem.bz2")
}
