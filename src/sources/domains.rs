use crate::error::{Result, SelectorError};
use std::collections::BTreeSet;
use std::path::Path;

const DOMAINS_TXT: &str = include_str!("../../assets/domains.txt");

/// 解析域名列表: 忽略空行和 '#' 注释, 自动去重
pub fn parse_domains(content: &str, source: &str) -> Result<Vec<String>> {
    let domains: BTreeSet<String> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect();

    if domains.is_empty() {
        return Err(SelectorError::EmptyInput(source.to_string()));
    }
    Ok(domains.into_iter().collect())
}

pub fn load_domains(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)?;
    parse_domains(&content, &path.display().to_string())
}

pub fn builtin_domains() -> Result<Vec<String>> {
    parse_domains(DOMAINS_TXT, "built-in domain list")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_domains_dedupes() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("domains.txt");
        std::fs::write(&path, "# list\na.example\n\nb.example\na.example\n")?;

        let domains = load_domains(&path)?;
        assert_eq!(domains, vec!["a.example".to_string(), "b.example".to_string()]);
        Ok(())
    }

    #[test]
    fn test_empty_domain_list_is_fatal() {
        assert!(matches!(
            parse_domains("# nothing here\n", "test"),
            Err(SelectorError::EmptyInput(_))
        ));
    }

    #[test]
    fn test_builtin_list_is_usable() {
        assert!(!builtin_domains().unwrap().is_empty());
    }
}
