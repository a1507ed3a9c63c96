//! Cell value formatting for the named formats pivot clients request and simple custom
//! patterns built from `#`, `0`, `,`, `.` and `%`.

/// Resolve a named format to its pattern; anything else is treated as a custom pattern.
fn named_pattern(format_string: &str) -> Option<&'static str> {
    match format_string.trim().to_ascii_lowercase().as_str() {
        "standard" => Some("#,##0.00"),
        "fixed" => Some("0.00"),
        "percent" => Some("0.00%"),
        "currency" => Some("$#,##0.00"),
        _ => None,
    }
}

fn is_general(format_string: &str) -> bool {
    let trimmed = format_string.trim();
    trimmed.is_empty() || trimmed.eq_ignore_ascii_case("general number")
}

/// Format a cell value; null formats as the empty string.
pub fn format_value(value: Option<f64>, format_string: &str) -> String {
    let Some(value) = value else {
        return String::new();
    };
    if !value.is_finite() || is_general(format_string) {
        return general(value);
    }

    let pattern = named_pattern(format_string).unwrap_or(format_string);
    let mut sections = pattern.split(';');
    let positive = sections.next().unwrap_or(pattern);
    match sections.next() {
        Some(negative) if value < 0.0 && !negative.is_empty() => {
            Pattern::parse(negative).render(-value, false)
        }
        _ => Pattern::parse(positive).render(value, true),
    }
}

fn general(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

#[derive(Debug, Default, PartialEq)]
struct Pattern {
    prefix: String,
    suffix: String,
    grouping: bool,
    min_integer_digits: usize,
    min_decimals: usize,
    max_decimals: usize,
    percent: bool,
}

impl Pattern {
    fn parse(pattern: &str) -> Self {
        let mut out = Pattern::default();
        let mut in_number = false;
        let mut seen_number = false;
        let mut in_fraction = false;
        for ch in pattern.chars() {
            match ch {
                '#' | '0' | ',' | '.' if !seen_number || in_number => {
                    in_number = true;
                    match ch {
                        '.' => in_fraction = true,
                        ',' if !in_fraction => out.grouping = true,
                        ',' => {}
                        '0' if in_fraction => {
                            out.min_decimals += 1;
                            out.max_decimals += 1;
                        }
                        '#' if in_fraction => out.max_decimals += 1,
                        '0' => out.min_integer_digits += 1,
                        _ => {}
                    }
                }
                other => {
                    if in_number {
                        in_number = false;
                        seen_number = true;
                    }
                    if other == '%' {
                        out.percent = true;
                    }
                    if seen_number {
                        out.suffix.push(other);
                    } else {
                        out.prefix.push(other);
                    }
                }
            }
        }
        out
    }

    fn render(&self, value: f64, signed: bool) -> String {
        let scaled = if self.percent { value * 100.0 } else { value };
        let negative = signed && scaled < 0.0;
        let text = format!("{:.*}", self.max_decimals, scaled.abs());
        let (integer, fraction) = match text.split_once('.') {
            Some((i, f)) => (i.to_string(), f.to_string()),
            None => (text, String::new()),
        };

        let mut fraction = fraction;
        while fraction.len() > self.min_decimals && fraction.ends_with('0') {
            fraction.pop();
        }

        let mut integer = integer.trim_start_matches('0').to_string();
        while integer.len() < self.min_integer_digits {
            integer.insert(0, '0');
        }
        if self.grouping {
            integer = group_thousands(&integer);
        }

        let mut out = String::new();
        if negative && (integer.chars().any(|c| c.is_ascii_digit() && c != '0')
            || fraction.chars().any(|c| c != '0'))
        {
            out.push('-');
        }
        out.push_str(&self.prefix);
        out.push_str(&integer);
        if !fraction.is_empty() {
            out.push('.');
            out.push_str(&fraction);
        }
        out.push_str(&self.suffix);
        out
    }
}

fn group_thousands(digits: &str) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (idx, ch) in digits.chars().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
