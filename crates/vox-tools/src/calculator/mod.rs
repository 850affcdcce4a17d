//! Calculator tool: common phrasings first, then a restricted evaluator,
//! then a usage hint.

mod eval;

pub use eval::{evaluate, EvalError};

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::{Regex, RegexSet};
use tracing::debug;

use vox_core::{Capability, Error, Tool};

use crate::datetime::extract_date;

const NUMBER: &str = r"(-?\d+(?:\.\d+)?)";

static ACTIVATION_PATTERNS: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([
        r"(?i)\b(calculate|calculation|compute|solve|sum|plus|minus|times|multiplied|multiply|divided|divide|percent|percentage|square root|sqrt|power|squared|cubed|factorial|average|math|arithmetic|equals)\b",
        r"[%√×÷^]",
        r"\d\s*[-+*/x]\s*\d",
    ])
    .expect("calculator activation patterns are valid")
});

static PERCENT_OF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i){NUMBER}\s*(?:%|percent)\s+of\s+{NUMBER}"))
        .expect("percent pattern is valid")
});

static POWER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i){NUMBER}\s*(?:to the power of|raised to|\^|\*\*)\s*{NUMBER}"
    ))
    .expect("power pattern is valid")
});

static SQUARE_ROOT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:square root of|sqrt\s*\(?|√)\s*(\d+(?:\.\d+)?)")
        .expect("square root pattern is valid")
});

static BINARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i){NUMBER}\s*([-+*/x×÷]|plus|minus|times|multiplied by|divided by)\s*{NUMBER}"
    ))
    .expect("binary arithmetic pattern is valid")
});

static NUMBER_PRESENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d").expect("digit pattern is valid"));

/// Render a result without a trailing `.0` for whole numbers.
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        let fixed = format!("{:.6}", value);
        fixed.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

fn parse_number(text: &str) -> Option<f64> {
    text.parse().ok()
}

/// True when the match is the whole arithmetic expression rather than a
/// piece of a longer one like `2 + 3 * 4`.
fn is_isolated(query: &str, start: usize, end: usize) -> bool {
    let before = query[..start].trim_end();
    let after = query[end..].trim_start();
    let continues_before = before
        .chars()
        .last()
        .is_some_and(|c| "+-*/(×÷".contains(c) || c.is_ascii_digit());
    let continues_after = after
        .chars()
        .next()
        .is_some_and(|c| "+-*/)×÷^".contains(c) || c.is_ascii_digit());
    !continues_before && !continues_after
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CalculatorTool;

impl CalculatorTool {
    pub fn new() -> Self {
        Self
    }

    fn percent_of(query: &str) -> Option<String> {
        let caps = PERCENT_OF.captures(query)?;
        let percent = parse_number(&caps[1])?;
        let base = parse_number(&caps[2])?;
        Some(format!(
            "{}% of {} = {}",
            format_number(percent),
            format_number(base),
            format_number(percent * base / 100.0)
        ))
    }

    fn power(query: &str) -> Option<String> {
        let caps = POWER.captures(query)?;
        let base = parse_number(&caps[1])?;
        let exponent = parse_number(&caps[2])?;
        let value = base.powf(exponent);
        if !value.is_finite() {
            return Some(format!(
                "{} to the power of {} is too large to represent.",
                format_number(base),
                format_number(exponent)
            ));
        }
        Some(format!(
            "{} to the power of {} = {}",
            format_number(base),
            format_number(exponent),
            format_number(value)
        ))
    }

    fn square_root(query: &str) -> Option<String> {
        let caps = SQUARE_ROOT.captures(query)?;
        let value = parse_number(&caps[1])?;
        Some(format!(
            "Square root of {} = {}",
            format_number(value),
            format_number(value.sqrt())
        ))
    }

    fn binary(query: &str) -> Option<String> {
        let caps = BINARY.captures(query)?;
        let whole = caps.get(0)?;
        if !is_isolated(query, whole.start(), whole.end()) {
            return None;
        }
        let lhs = parse_number(&caps[1])?;
        let rhs = parse_number(&caps[3])?;
        let (symbol, value) = match caps[2].to_lowercase().as_str() {
            "+" | "plus" => ("+", lhs + rhs),
            "-" | "minus" => ("-", lhs - rhs),
            "*" | "x" | "×" | "times" | "multiplied by" => ("*", lhs * rhs),
            "/" | "÷" | "divided by" => {
                if rhs == 0.0 {
                    return Some("Division by zero is undefined.".to_string());
                }
                ("/", lhs / rhs)
            }
            _ => return None,
        };
        Some(format!(
            "{} {} {} = {}",
            format_number(lhs),
            symbol,
            format_number(rhs),
            format_number(value)
        ))
    }

    /// Keep only characters the evaluator accepts.
    fn residual_expression(query: &str) -> Option<String> {
        let expression: String = query
            .chars()
            .map(|c| match c {
                '×' => '*',
                '÷' => '/',
                other => other,
            })
            .filter(|c| c.is_ascii_digit() || "+-*/(). ".contains(*c))
            .collect();
        let expression = expression.split_whitespace().collect::<Vec<_>>().join(" ");
        let expression = expression.trim_matches(|c| c == '.' || c == ' ').to_string();

        let has_operator = expression.chars().any(|c| "+-*/".contains(c));
        (NUMBER_PRESENT.is_match(&expression) && has_operator).then_some(expression)
    }

    fn evaluate_residual(query: &str) -> Option<String> {
        // Dashes and slashes in a date are not arithmetic.
        if extract_date(query).is_some() {
            return None;
        }
        let expression = Self::residual_expression(query)?;
        match evaluate(&expression) {
            Ok(value) => Some(format!("{} = {}", expression, format_number(value))),
            Err(err) => {
                debug!(expression = %expression, error = %err, "Expression rejected");
                None
            }
        }
    }

    fn hint(query: &str) -> String {
        let lower = query.to_lowercase();
        if lower.contains("factorial") {
            "Factorials are not evaluated directly. Multiply the terms instead, e.g. \"5 * 4 * 3 * 2 * 1\".".to_string()
        } else if lower.contains("average") || lower.contains("mean") {
            "To average numbers, add them and divide by the count, e.g. \"(4 + 8 + 15) / 3\".".to_string()
        } else if lower.contains("percent") || lower.contains('%') {
            "For percentages, ask like \"15 percent of 200\" or \"15% of 200\".".to_string()
        } else if lower.contains("square root") || lower.contains("sqrt") {
            "For square roots, ask like \"square root of 144\".".to_string()
        } else {
            "I couldn't find a calculation in that. Supported forms: \"12 * 7\", \"(3 + 4) / 2\", \"2 to the power of 8\", \"15% of 200\", \"square root of 81\".".to_string()
        }
    }

    /// Run the calculation pipeline on a query.
    pub fn calculate(&self, query: &str) -> String {
        Self::percent_of(query)
            .or_else(|| Self::power(query))
            .or_else(|| Self::square_root(query))
            .or_else(|| Self::binary(query))
            .or_else(|| Self::evaluate_residual(query))
            .unwrap_or_else(|| Self::hint(query))
    }
}

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Evaluate arithmetic, percentages, powers and square roots."
    }

    fn capability(&self) -> Capability {
        Capability::Calculation
    }

    fn should_activate(&self, query: &str) -> bool {
        ACTIVATION_PATTERNS.is_match(query)
    }

    async fn execute(&self, query: &str) -> Result<String, Error> {
        Ok(self.calculate(query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activation() {
        let calc = CalculatorTool::new();
        assert!(calc.should_activate("What is 12 * 7?"));
        assert!(calc.should_activate("calculate my tip"));
        assert!(calc.should_activate("20% of 80"));
        assert!(!calc.should_activate("Tell me about whales"));
    }

    #[tokio::test]
    async fn test_basic_arithmetic() {
        let calc = CalculatorTool::new();
        let output = calc.execute("What is 12 * 7?").await.unwrap();
        assert!(output.contains("84"), "{}", output);
        assert_eq!(calc.calculate("what's 10 divided by 4"), "10 / 4 = 2.5");
        assert_eq!(calc.calculate("3 x 5"), "3 * 5 = 15");
    }

    #[test]
    fn test_phrased_forms() {
        let calc = CalculatorTool::new();
        assert_eq!(calc.calculate("What is 15 percent of 200?"), "15% of 200 = 30");
        assert_eq!(calc.calculate("2 to the power of 10"), "2 to the power of 10 = 1024");
        assert_eq!(calc.calculate("what is 3^4"), "3 to the power of 4 = 81");
        assert_eq!(calc.calculate("square root of 144"), "Square root of 144 = 12");
    }

    #[test]
    fn test_longer_expression_uses_evaluator() {
        let calc = CalculatorTool::new();
        assert_eq!(calc.calculate("compute 2 + 3 * 4"), "2 + 3 * 4 = 14");
        assert_eq!(calc.calculate("what is (10 + 5) / 3?"), "(10 + 5) / 3 = 5");
    }

    #[test]
    fn test_division_by_zero() {
        let calc = CalculatorTool::new();
        assert_eq!(calc.calculate("7 / 0"), "Division by zero is undefined.");
    }

    #[test]
    fn test_hints() {
        let calc = CalculatorTool::new();
        assert!(calc.calculate("factorial of 5").contains("Factorials"));
        assert!(calc.calculate("average of my scores").contains("average"));
        assert!(calc.calculate("square root of a negative").contains("square root of 144"));
        assert!(calc.calculate("do some math").contains("Supported forms"));
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(84.0), "84");
        assert_eq!(format_number(2.5), "2.5");
        assert_eq!(format_number(1.0 / 3.0), "0.333333");
        assert_eq!(format_number(-4.0), "-4");
    }

    #[test]
    fn test_deep_nesting_falls_back_to_hint() {
        let calc = CalculatorTool::new();
        let query = format!("compute {}1+1{}", "(".repeat(10_000), ")".repeat(10_000));
        assert!(calc.calculate(&query).contains("Supported forms"));

        let signs = format!("compute {}5 * 2", "-".repeat(10_000));
        assert!(calc.calculate(&signs).contains("Supported forms"));
    }

    #[test]
    fn test_dates_are_not_evaluated() {
        let calc = CalculatorTool::new();
        let iso = calc.calculate("How many days until 2025-12-25?");
        assert!(!iso.contains('='), "{}", iso);
        let us = calc.calculate("What happened on 12/25/2024?");
        assert!(!us.contains('='), "{}", us);
        assert_eq!(calc.calculate("compute (2 + 3) * 4"), "(2 + 3) * 4 = 20");
    }
}
