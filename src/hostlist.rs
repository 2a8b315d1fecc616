//! Hostlist expression expansion.
//!
//! The daemon and the operators address nodes with the usual compressed
//! syntax: `cnode[01-04]`, `cnode[1,3,5]`, comma lists, or single names.
//! Expansion yields an ordered list of unique node names; duplicates
//! collapse, first occurrence wins.

use anyhow::{bail, Result};

/// Expand a hostlist expression into an ordered, deduplicated node list.
///
/// # Examples
/// ```
/// # use cluctl::hostlist::expand;
/// assert_eq!(expand("cnode[01-03]").unwrap(), vec!["cnode01", "cnode02", "cnode03"]);
/// assert_eq!(expand("a,b,a").unwrap(), vec!["a", "b"]);
/// ```
pub fn expand(expression: &str) -> Result<Vec<String>> {
    let mut nodes = Vec::new();
    for item in split_top_level(expression)? {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        for name in expand_item(item)? {
            if !nodes.contains(&name) {
                nodes.push(name);
            }
        }
    }
    if nodes.is_empty() {
        bail!("hostlist expression '{}' expands to no nodes", expression);
    }
    Ok(nodes)
}

/// Split on commas outside brackets.
fn split_top_level(expression: &str) -> Result<Vec<&str>> {
    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, c) in expression.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| anyhow::anyhow!("unbalanced ']' in '{}'", expression))?;
            }
            ',' if depth == 0 => {
                items.push(&expression[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        bail!("unbalanced '[' in '{}'", expression);
    }
    items.push(&expression[start..]);
    Ok(items)
}

/// Expand one item: either a bare name or `prefix[ranges]suffix`.
fn expand_item(item: &str) -> Result<Vec<String>> {
    let Some(open) = item.find('[') else {
        return Ok(vec![item.to_string()]);
    };
    let close = item
        .rfind(']')
        .ok_or_else(|| anyhow::anyhow!("missing ']' in '{}'", item))?;
    if close < open {
        bail!("malformed brackets in '{}'", item);
    }

    let prefix = &item[..open];
    let ranges = &item[open + 1..close];
    let suffix = &item[close + 1..];

    let mut names = Vec::new();
    for part in ranges.split(',') {
        let part = part.trim();
        if part.is_empty() {
            bail!("empty range element in '{}'", item);
        }
        match part.split_once('-') {
            Some((lo, hi)) => {
                let width = if lo.starts_with('0') && lo.len() > 1 {
                    lo.len()
                } else {
                    0
                };
                let lo: u64 = lo
                    .parse()
                    .map_err(|_| anyhow::anyhow!("invalid range start '{}' in '{}'", lo, item))?;
                let hi: u64 = hi
                    .parse()
                    .map_err(|_| anyhow::anyhow!("invalid range end '{}' in '{}'", hi, item))?;
                if hi < lo {
                    bail!("reversed range {}-{} in '{}'", lo, hi, item);
                }
                for n in lo..=hi {
                    names.push(format!("{}{:0width$}{}", prefix, n, suffix, width = width));
                }
            }
            None => {
                // single element, keep its padding verbatim
                names.push(format!("{}{}{}", prefix, part, suffix));
            }
        }
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_name() {
        assert_eq!(expand("cnode01").unwrap(), vec!["cnode01"]);
    }

    #[test]
    fn test_comma_list() {
        assert_eq!(expand("a,b,c").unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_zero_padded_range() {
        assert_eq!(
            expand("cnode[01-03]").unwrap(),
            vec!["cnode01", "cnode02", "cnode03"]
        );
    }

    #[test]
    fn test_unpadded_range() {
        assert_eq!(
            expand("cnode[9-11]").unwrap(),
            vec!["cnode9", "cnode10", "cnode11"]
        );
    }

    #[test]
    fn test_range_with_suffix() {
        assert_eq!(
            expand("rack[1-2]-node").unwrap(),
            vec!["rack1-node", "rack2-node"]
        );
    }

    #[test]
    fn test_mixed_ranges_inside_brackets() {
        assert_eq!(
            expand("n[1,3-4]").unwrap(),
            vec!["n1", "n3", "n4"]
        );
    }

    #[test]
    fn test_duplicates_collapse_order_preserved() {
        assert_eq!(
            expand("cnode[01-03],cnode02,login1").unwrap(),
            vec!["cnode01", "cnode02", "cnode03", "login1"]
        );
    }

    #[test]
    fn test_commas_inside_brackets_not_split() {
        assert_eq!(
            expand("n[1,2],m").unwrap(),
            vec!["n1", "n2", "m"]
        );
    }

    #[test]
    fn test_reversed_range_errors() {
        assert!(expand("n[5-2]").is_err());
    }

    #[test]
    fn test_unbalanced_brackets_error() {
        assert!(expand("n[1-2").is_err());
        assert!(expand("n1-2]").is_err());
    }

    #[test]
    fn test_empty_expression_errors() {
        assert!(expand("").is_err());
        assert!(expand(",,").is_err());
    }
}
