// 报告文本工具 - 为 PDF 等下游渲染提取摘要片段

const SUMMARY_MARKER: &str = "executive summary";
const EXCERPT_CHARS: usize = 800;
const SUMMARY_UNAVAILABLE: &str = "Summary unavailable.";

/// 提取报告的摘要片段
///
/// 优先取从第一个 "executive summary"（不区分大小写）开始到结尾的内容；
/// 找不到时取前 800 个字符，被截断时追加 `...`。
pub fn summary_excerpt(text: &str) -> String {
    let text = text.trim();
    if text.is_empty() {
        return SUMMARY_UNAVAILABLE.to_string();
    }

    if let Some(start) = find_ascii_case_insensitive(text, SUMMARY_MARKER) {
        return text[start..].trim().to_string();
    }

    let mut chars = text.char_indices();
    match chars.nth(EXCERPT_CHARS) {
        Some((cut, _)) => format!("{}...", text[..cut].trim_end()),
        None => text.to_string(),
    }
}

// needle 为 ASCII，匹配起点必然落在字符边界上
fn find_ascii_case_insensitive(haystack: &str, needle: &str) -> Option<usize> {
    let hay = haystack.as_bytes();
    let needle = needle.as_bytes();
    if needle.is_empty() || hay.len() < needle.len() {
        return None;
    }
    (0..=hay.len() - needle.len()).find(|&i| hay[i..i + needle.len()].eq_ignore_ascii_case(needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excerpt_starts_at_executive_summary() {
        let text = "Detailed report...\n\n=====\nEXECUTIVE SUMMARY\n=====\n\nA person cooks dinner.\n";
        assert_eq!(
            summary_excerpt(text),
            "EXECUTIVE SUMMARY\n=====\n\nA person cooks dinner."
        );
    }

    #[test]
    fn test_excerpt_is_case_insensitive() {
        let text = "vidéo intro, Executive Summary: short";
        assert_eq!(summary_excerpt(text), "Executive Summary: short");
    }

    #[test]
    fn test_excerpt_truncates_long_text() {
        let text = "é".repeat(1000);
        let excerpt = summary_excerpt(&text);
        assert!(excerpt.ends_with("..."));
        assert_eq!(excerpt.chars().count(), EXCERPT_CHARS + 3);

        let short = "short report";
        assert_eq!(summary_excerpt(short), short);
    }

    #[test]
    fn test_excerpt_empty() {
        assert_eq!(summary_excerpt("   \n"), SUMMARY_UNAVAILABLE);
    }
}
