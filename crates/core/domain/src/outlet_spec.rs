//! 插座表达式文法。
//!
//! 支持三种写法：标量 `3`、列表 `1,3,5`、闭区间 `2-6`。解析结果去重
//! 并升序排列；越界（0 或超过插座数）为错误。

use thiserror::Error;

/// 插座表达式解析错误。
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OutletSpecError {
    #[error("empty outlet spec")]
    Empty,
    #[error("invalid outlet spec segment: {0}")]
    InvalidSegment(String),
    #[error("outlet {0} out of range (1-{1})")]
    OutOfRange(u16, u16),
    #[error("invalid range {0}-{1}")]
    InvalidRange(u16, u16),
}

/// 解析插座表达式，`max_outlet` 为设备插座数上限。
pub fn parse_outlet_spec(spec: &str, max_outlet: u16) -> Result<Vec<u16>, OutletSpecError> {
    let spec = spec.trim();
    if spec.is_empty() {
        return Err(OutletSpecError::Empty);
    }

    let mut outlets = Vec::new();
    for segment in spec.split(',') {
        let segment = segment.trim();
        if segment.is_empty() {
            return Err(OutletSpecError::InvalidSegment(segment.to_string()));
        }
        if let Some((start, end)) = segment.split_once('-') {
            let start = parse_number(start)?;
            let end = parse_number(end)?;
            if start > end {
                return Err(OutletSpecError::InvalidRange(start, end));
            }
            for n in start..=end {
                push_checked(&mut outlets, n, max_outlet)?;
            }
        } else {
            let n = parse_number(segment)?;
            push_checked(&mut outlets, n, max_outlet)?;
        }
    }

    outlets.sort_unstable();
    outlets.dedup();
    Ok(outlets)
}

fn parse_number(s: &str) -> Result<u16, OutletSpecError> {
    s.trim()
        .parse::<u16>()
        .map_err(|_| OutletSpecError::InvalidSegment(s.to_string()))
}

fn push_checked(
    outlets: &mut Vec<u16>,
    n: u16,
    max_outlet: u16,
) -> Result<(), OutletSpecError> {
    if n == 0 || n > max_outlet {
        return Err(OutletSpecError::OutOfRange(n, max_outlet));
    }
    outlets.push(n);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_list_and_range() {
        assert_eq!(parse_outlet_spec("3", 10), Ok(vec![3]));
        assert_eq!(parse_outlet_spec("1,3,5", 10), Ok(vec![1, 3, 5]));
        assert_eq!(parse_outlet_spec("1-4", 10), Ok(vec![1, 2, 3, 4]));
        assert_eq!(parse_outlet_spec("5, 2-3", 10), Ok(vec![2, 3, 5]));
    }

    #[test]
    fn duplicates_collapse() {
        assert_eq!(parse_outlet_spec("2,2,1-3", 10), Ok(vec![1, 2, 3]));
    }

    #[test]
    fn bounds_are_enforced() {
        assert_eq!(
            parse_outlet_spec("0", 10),
            Err(OutletSpecError::OutOfRange(0, 10))
        );
        assert_eq!(
            parse_outlet_spec("11", 10),
            Err(OutletSpecError::OutOfRange(11, 10))
        );
        assert_eq!(
            parse_outlet_spec("4-2", 10),
            Err(OutletSpecError::InvalidRange(4, 2))
        );
        assert!(matches!(
            parse_outlet_spec("a", 10),
            Err(OutletSpecError::InvalidSegment(_))
        ));
        assert_eq!(parse_outlet_spec("  ", 10), Err(OutletSpecError::Empty));
    }
}
