use regex::Regex;
use tracing::warn;

/// 忽略规则，按条目名（不含路径）匹配，不区分大小写
///
/// 支持 `*` 通配符（`*.tmp`、`~*`）和精确名称（`.git`）。
#[derive(Debug, Clone, Default)]
pub struct IgnoreFilter {
    rules: Vec<Rule>,
}

#[derive(Debug, Clone)]
enum Rule {
    Exact(String),
    Wildcard(Regex),
}

impl IgnoreFilter {
    pub fn new(patterns: &[String]) -> Self {
        let rules = patterns
            .iter()
            .map(|p| p.trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .filter_map(|pattern| {
                if !pattern.contains('*') && !pattern.contains('?') {
                    return Some(Rule::Exact(pattern));
                }
                let regex_pattern = regex::escape(&pattern)
                    .replace(r"\*", ".*")
                    .replace(r"\?", ".");
                match Regex::new(&format!("^{}$", regex_pattern)) {
                    Ok(re) => Some(Rule::Wildcard(re)),
                    Err(e) => {
                        warn!("忽略无效的过滤规则 {}: {}", pattern, e);
                        None
                    }
                }
            })
            .collect();
        Self { rules }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// 检查名称是否应该被排除
    pub fn is_ignored(&self, name: &str) -> bool {
        if self.rules.is_empty() {
            return false;
        }
        let name = name.to_lowercase();
        self.rules.iter().any(|rule| match rule {
            Rule::Exact(exact) => *exact == name,
            Rule::Wildcard(re) => re.is_match(&name),
        })
    }
}
