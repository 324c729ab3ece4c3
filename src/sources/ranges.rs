use crate::error::{Result, SelectorError};
use crate::traits::RangeOracle;
use crate::types::IpVersion;
use ipnet::IpNet;
use std::net::IpAddr;
use std::path::Path;

const CF_IPS_V4: &str = include_str!("../../assets/ips-v4.txt");
const CF_IPS_V6: &str = include_str!("../../assets/ips-v6.txt");

/// A set of CIDR ranges answering address membership.
#[derive(Debug, Clone, Default)]
pub struct CidrSet {
    nets: Vec<IpNet>,
}

impl CidrSet {
    /// Parses newline-separated CIDR text. Blank lines and `#` comments are
    /// skipped; any other unparsable line is an error.
    pub fn parse(text: &str, source: &str) -> Result<Self> {
        let mut nets = Vec::new();
        for line in text.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let net: IpNet = line.parse().map_err(|e: ipnet::AddrParseError| {
                SelectorError::InvalidCidr {
                    line: line.to_string(),
                    reason: e.to_string(),
                }
            })?;
            nets.push(net);
        }

        if nets.is_empty() {
            return Err(SelectorError::EmptyInput(source.to_string()));
        }
        Ok(Self { nets })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content, &path.display().to_string())
    }

    /// Built-in Cloudflare ranges for the requested address family.
    pub fn builtin(version: IpVersion) -> Result<Self> {
        match version {
            IpVersion::Ipv4 => Self::parse(CF_IPS_V4, "built-in ips-v4"),
            IpVersion::Ipv6 => Self::parse(CF_IPS_V6, "built-in ips-v6"),
            IpVersion::Both => {
                let mut set = Self::parse(CF_IPS_V4, "built-in ips-v4")?;
                set.nets.extend(Self::parse(CF_IPS_V6, "built-in ips-v6")?.nets);
                Ok(set)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.nets.len()
    }
}

impl RangeOracle for CidrSet {
    fn contains(&self, address: &IpAddr) -> bool {
        self.nets.iter().any(|net| net.contains(address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_contains() -> Result<()> {
        let set = CidrSet::parse("# comment\n104.16.0.0/13\n\n2606:4700::/32\n", "test")?;
        assert_eq!(set.len(), 2);
        assert!(set.contains(&"104.18.1.1".parse().unwrap()));
        assert!(set.contains(&"2606:4700::6810:1".parse().unwrap()));
        assert!(!set.contains(&"8.8.8.8".parse().unwrap()));
        Ok(())
    }

    #[test]
    fn test_bad_line_is_fatal() {
        let result = CidrSet::parse("104.16.0.0/13\nnot-a-cidr\n", "test");
        assert!(matches!(result, Err(SelectorError::InvalidCidr { line, .. }) if line == "not-a-cidr"));
    }

    #[test]
    fn test_empty_is_fatal() {
        assert!(matches!(
            CidrSet::parse("\n# only comments\n", "test"),
            Err(SelectorError::EmptyInput(_))
        ));
    }

    #[test]
    fn test_builtin_families() -> Result<()> {
        let v4 = CidrSet::builtin(IpVersion::Ipv4)?;
        let both = CidrSet::builtin(IpVersion::Both)?;
        assert!(v4.contains(&"172.67.1.1".parse().unwrap()));
        assert!(!v4.contains(&"2606:4700::1".parse().unwrap()));
        assert!(both.contains(&"2606:4700::1".parse().unwrap()));
        assert!(both.len() > v4.len());
        Ok(())
    }
}
