//! 基于关键词的标签建议

/// (标签, 触发关键词)，按输出顺序排列
const TAG_RULES: &[(&str, &[&str])] = &[
    ("maintenance", &["maintenance", "downtime", "upgrade"]),
    ("policy", &["policy", "guideline", "rule"]),
    ("meeting", &["meeting", "sync", "discussion"]),
    ("deadline", &["deadline", "due", "submit"]),
    ("urgent", &["emergency", "urgent", "immediately"]),
    ("holiday", &["holiday", "vacation"]),
    ("system", &["system", "server", "deploy"]),
];

/// 根据标题、摘要和正文建议标签
///
/// 子串匹配，不区分大小写；无命中时返回空列表
pub fn suggest_tags(title: &str, summary: &str, body: &str) -> Vec<String> {
    let text = format!("{} {} {}", title, summary, body).to_lowercase();

    TAG_RULES
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|k| text.contains(k)))
        .map(|(tag, _)| (*tag).to_string())
        .collect()
}
