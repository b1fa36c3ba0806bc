//! Chinese numeral parsing and formatting (0 - 9999)

const DIGITS: [char; 10] = ['零', '一', '二', '三', '四', '五', '六', '七', '八', '九'];

fn digit_value(c: char) -> Option<u32> {
    match c {
        '零' | '〇' => Some(0),
        '一' => Some(1),
        '二' | '两' => Some(2),
        '三' => Some(3),
        '四' => Some(4),
        '五' => Some(5),
        '六' => Some(6),
        '七' => Some(7),
        '八' => Some(8),
        '九' => Some(9),
        _ => None,
    }
}

fn unit_value(c: char) -> Option<u32> {
    match c {
        '十' => Some(10),
        '百' => Some(100),
        '千' => Some(1000),
        _ => None,
    }
}

/// Parse a Chinese numeral such as "三", "十二", "二十", "一百零五"
pub fn parse_chinese(text: &str) -> Option<u32> {
    if text.is_empty() {
        return None;
    }

    let mut total = 0u32;
    let mut pending: Option<u32> = None;

    for c in text.chars() {
        if let Some(d) = digit_value(c) {
            // Two digits in a row without a unit ("二三") are not a number
            if pending.is_some_and(|p| p != 0) && d != 0 {
                return None;
            }
            pending = Some(d);
        } else if let Some(unit) = unit_value(c) {
            // A bare leading unit means one ("十二" = 12)
            let d = pending.take().unwrap_or(1);
            total = total.checked_add(d.checked_mul(unit)?)?;
        } else {
            return None;
        }
    }

    total.checked_add(pending.unwrap_or(0))
}

/// Parse ASCII digits or a Chinese numeral
pub fn parse_count(text: &str) -> Option<u32> {
    if !text.is_empty() && text.chars().all(|c| c.is_ascii_digit()) {
        text.parse().ok()
    } else {
        parse_chinese(text)
    }
}

/// Format a number as a Chinese numeral ("3" -> "三", "12" -> "十二")
pub fn to_chinese(n: u32) -> String {
    if n < 10 {
        return DIGITS[n as usize].to_string();
    }
    if n >= 10_000 {
        return n.to_string();
    }

    let parts = [(n / 1000, '千'), (n / 100 % 10, '百'), (n / 10 % 10, '十')];
    let mut out = String::new();
    let mut zero_gap = false;

    for (d, unit) in parts {
        if d == 0 {
            zero_gap = !out.is_empty();
            continue;
        }
        if zero_gap {
            out.push('零');
            zero_gap = false;
        }
        // 10-19 read as "十X", not "一十X"
        if !(unit == '十' && d == 1 && out.is_empty()) {
            out.push(DIGITS[d as usize]);
        }
        out.push(unit);
    }

    let ones = n % 10;
    if ones != 0 {
        if zero_gap {
            out.push('零');
        }
        out.push(DIGITS[ones as usize]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chinese() {
        assert_eq!(parse_chinese("三"), Some(3));
        assert_eq!(parse_chinese("十"), Some(10));
        assert_eq!(parse_chinese("十二"), Some(12));
        assert_eq!(parse_chinese("二十"), Some(20));
        assert_eq!(parse_chinese("两"), Some(2));
        assert_eq!(parse_chinese("一百零五"), Some(105));
        assert_eq!(parse_chinese("二三"), None);
        assert_eq!(parse_chinese("天"), None);
        assert_eq!(parse_chinese(""), None);
    }

    #[test]
    fn test_parse_count() {
        assert_eq!(parse_count("7"), Some(7));
        assert_eq!(parse_count("七"), Some(7));
        assert_eq!(parse_count("7天"), None);
    }

    #[test]
    fn test_to_chinese() {
        assert_eq!(to_chinese(3), "三");
        assert_eq!(to_chinese(10), "十");
        assert_eq!(to_chinese(12), "十二");
        assert_eq!(to_chinese(20), "二十");
        assert_eq!(to_chinese(105), "一百零五");
        assert_eq!(to_chinese(110), "一百一十");
        assert_eq!(to_chinese(1001), "一千零一");
    }

    #[test]
    fn test_format_then_parse() {
        for n in [1, 9, 11, 47, 99, 100, 305, 2024] {
            assert_eq!(parse_chinese(&to_chinese(n)), Some(n), "n = {n}");
        }
    }
}
