//! Arithmetic tools and their help text.

use serde_json::{Number, Value};

use super::{number_arg, second_operand, string_arg, Args};
use crate::tools::{ToolContext, ToolError};

/// Largest `n` for which `n!` is finite as an `f64`.
const MAX_FACTORIAL: f64 = 170.0;

/// 2^53: beyond this an `f64` no longer holds every integer exactly.
const EXACT_INTEGER_LIMIT: f64 = 9_007_199_254_740_992.0;

/// Converts a number to an integer operand, truncating toward zero.
///
/// # Errors
///
/// Fails for values outside ±2^53, where the conversion would lose or
/// invent digits.
#[allow(clippy::cast_possible_truncation)]
pub(super) fn integer_operand(value: f64, name: &str) -> Result<i64, ToolError> {
    if !value.is_finite() || value.abs() > EXACT_INTEGER_LIMIT {
        return Err(ToolError::new(format!(
            "'{name}' must be an integer between -2^53 and 2^53, got {value}"
        )));
    }
    Ok(value.trunc() as i64)
}

/// Converts a numeric result to JSON, using an integer when it is exact.
#[allow(clippy::cast_possible_truncation)]
fn number_value(value: f64) -> Result<Value, ToolError> {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < EXACT_INTEGER_LIMIT {
        return Ok(Value::from(value as i64));
    }
    Number::from_f64(value)
        .map(Value::Number)
        .ok_or_else(|| ToolError::new("Result is not a finite number"))
}

pub(super) fn calculator(_: &ToolContext, args: &Args) -> Result<Value, ToolError> {
    let operation = string_arg(args, "operation")?;
    let a = number_arg(args, "a").ok_or_else(|| ToolError::new("'a' must be a number"))?;

    let result = match operation {
        "add" => a + second_operand(args, "Addition")?,
        "subtract" => a - second_operand(args, "Subtraction")?,
        "multiply" => a * second_operand(args, "Multiplication")?,
        "divide" => {
            let b = second_operand(args, "Division")?;
            if b == 0.0 {
                return Err(ToolError::new("Cannot divide by zero"));
            }
            a / b
        }
        "power" => a.powf(second_operand(args, "Power operation")?),
        "sqrt" => {
            if a < 0.0 {
                return Err(ToolError::new("Cannot take square root of negative number"));
            }
            a.sqrt()
        }
        "abs" => a.abs(),
        other => return Err(ToolError::new(format!("Unknown operation: {other}"))),
    };
    number_value(result)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub(super) fn advanced_calculator(_: &ToolContext, args: &Args) -> Result<Value, ToolError> {
    let operation = string_arg(args, "operation")?;
    let a = number_arg(args, "a").ok_or_else(|| ToolError::new("'a' must be a number"))?;
    let angle = || {
        if args.get("angle_unit").and_then(Value::as_str) == Some("degrees") {
            a.to_radians()
        } else {
            a
        }
    };

    let result = match operation {
        "sin" => angle().sin(),
        "cos" => angle().cos(),
        "tan" => angle().tan(),
        "log" => {
            if a <= 0.0 {
                return Err(ToolError::new("Logarithm requires positive number"));
            }
            a.log10()
        }
        "ln" => {
            if a <= 0.0 {
                return Err(ToolError::new("Natural logarithm requires positive number"));
            }
            a.ln()
        }
        "factorial" => {
            if a < 0.0 || a.fract() != 0.0 {
                return Err(ToolError::new("Factorial requires non-negative integer"));
            }
            if a > MAX_FACTORIAL {
                return Err(ToolError::new(format!(
                    "Factorial is only defined up to {MAX_FACTORIAL}"
                )));
            }
            (2..=a as u32).map(f64::from).product()
        }
        "gcd" => {
            let x = integer_operand(a, "a")?;
            let y = integer_operand(second_operand(args, "GCD")?, "b")?;
            return Ok(Value::from(gcd(x, y)));
        }
        "lcm" => {
            let x = integer_operand(a, "a")?;
            let y = integer_operand(second_operand(args, "LCM")?, "b")?;
            let divisor = gcd(x, y);
            if divisor == 0 {
                return Ok(Value::from(0));
            }
            let lcm = (x.unsigned_abs() / divisor)
                .checked_mul(y.unsigned_abs())
                .ok_or_else(|| ToolError::new("LCM overflows a 64-bit integer"))?;
            return Ok(Value::from(lcm));
        }
        other => return Err(ToolError::new(format!("Unknown operation: {other}"))),
    };
    number_value(result)
}

const fn gcd(a: i64, b: i64) -> u64 {
    let (mut x, mut y) = (a.unsigned_abs(), b.unsigned_abs());
    while y != 0 {
        let t = x % y;
        x = y;
        y = t;
    }
    x
}

const GENERAL_HELP: &str = "Calculator Tools Help:

Basic Operations (calculator tool):
- add: Add two numbers
- subtract: Subtract second number from first
- multiply: Multiply two numbers
- divide: Divide first number by second
- power: Raise first number to the power of second
- sqrt: Square root of a number
- abs: Absolute value of a number

Advanced Operations (advanced_calculator tool):
- sin, cos, tan: Trigonometric functions
- log: Base-10 logarithm
- ln: Natural logarithm
- factorial: Factorial of a number
- gcd: Greatest common divisor of two numbers
- lcm: Least common multiple of two numbers

Examples:
- calculator(operation='add', a=5, b=3) -> 8
- calculator(operation='sqrt', a=16) -> 4
- advanced_calculator(operation='sin', a=90, angle_unit='degrees') -> 1.0

Use calculator_help(operation='<operation_name>') for specific operation help.";

fn operation_help(operation: &str) -> Option<&'static str> {
    Some(match operation {
        "add" => "Addition: calculator(operation='add', a=5, b=3) -> 8",
        "subtract" => "Subtraction: calculator(operation='subtract', a=10, b=4) -> 6",
        "multiply" => "Multiplication: calculator(operation='multiply', a=6, b=7) -> 42",
        "divide" => "Division: calculator(operation='divide', a=15, b=3) -> 5",
        "power" => "Exponentiation: calculator(operation='power', a=2, b=3) -> 8",
        "sqrt" => "Square root: calculator(operation='sqrt', a=16) -> 4",
        "abs" => "Absolute value: calculator(operation='abs', a=-5) -> 5",
        "sin" => "Sine: advanced_calculator(operation='sin', a=1.5708) -> 1.0",
        "cos" => "Cosine: advanced_calculator(operation='cos', a=0) -> 1.0",
        "tan" => "Tangent: advanced_calculator(operation='tan', a=0.7854) -> 1.0",
        "log" => "Base-10 logarithm: advanced_calculator(operation='log', a=100) -> 2.0",
        "ln" => "Natural logarithm: advanced_calculator(operation='ln', a=2.718) -> 1.0",
        "factorial" => "Factorial: advanced_calculator(operation='factorial', a=5) -> 120",
        "gcd" => "Greatest common divisor: advanced_calculator(operation='gcd', a=48, b=18) -> 6",
        "lcm" => "Least common multiple: advanced_calculator(operation='lcm', a=12, b=18) -> 36",
        _ => return None,
    })
}

pub(super) fn calculator_help(_: &ToolContext, args: &Args) -> Result<Value, ToolError> {
    let text = match args.get("operation").and_then(Value::as_str) {
        Some(operation) => operation_help(operation).map_or_else(
            || format!("No help available for operation: {operation}"),
            str::to_string,
        ),
        None => GENERAL_HELP.to_string(),
    };
    Ok(Value::String(text))
}

#[cfg(test)]
mod tests {
    use super::super::tests::call;
    use crate::tools::InvokeError;
    use serde_json::json;

    #[test]
    fn calculator_adds_to_integer() {
        let result = call("calculator", json!({"operation": "add", "a": 15, "b": 27})).unwrap();
        assert_eq!(result, json!(42));
    }

    #[test]
    fn calculator_divide_by_zero_is_domain_error() {
        let err = call("calculator", json!({"operation": "divide", "a": 10, "b": 0})).unwrap_err();
        assert!(err.to_string().contains("Cannot divide by zero"));
    }

    #[test]
    fn calculator_fractional_result_stays_float() {
        let result = call("calculator", json!({"operation": "divide", "a": 1, "b": 4})).unwrap();
        assert_eq!(result, json!(0.25));
    }

    #[test]
    fn calculator_binary_op_needs_b() {
        let err = call("calculator", json!({"operation": "multiply", "a": 3})).unwrap_err();
        assert!(err.to_string().contains("requires two numbers"));
    }

    #[test]
    fn calculator_rejects_unknown_operation_before_handler() {
        let err = call("calculator", json!({"operation": "modulo", "a": 3, "b": 2})).unwrap_err();
        assert!(matches!(err, InvokeError::InvalidArguments { .. }));
    }

    #[test]
    fn calculator_large_results_stay_floats() {
        let a = 1_152_921_504_606_846_976.0_f64;
        let result = call("calculator", json!({"operation": "multiply", "a": a, "b": 2})).unwrap();
        assert!(result.is_f64());
        assert_eq!(result.as_f64(), Some(a * 2.0));
    }

    #[test]
    fn advanced_calculator_functions() {
        assert_eq!(
            call("advanced_calculator", json!({"operation": "factorial", "a": 5})).unwrap(),
            json!(120)
        );
        assert_eq!(
            call("advanced_calculator", json!({"operation": "gcd", "a": 12, "b": 18})).unwrap(),
            json!(6)
        );
        assert_eq!(
            call("advanced_calculator", json!({"operation": "lcm", "a": 4, "b": 6})).unwrap(),
            json!(12)
        );
        let sin = call(
            "advanced_calculator",
            json!({"operation": "sin", "a": 90, "angle_unit": "degrees"}),
        )
        .unwrap();
        assert!((sin.as_f64().unwrap() - 1.0).abs() < 1e-12);
        assert!(call("advanced_calculator", json!({"operation": "ln", "a": 0})).is_err());
        assert!(call("advanced_calculator", json!({"operation": "factorial", "a": 2.5})).is_err());
    }

    #[test]
    fn gcd_and_lcm_reject_operands_beyond_exact_range() {
        for (a, b) in [(1e19, 6.0), (6.0, -1e300), (9_007_199_254_740_994.0, 2.0)] {
            let err = call("advanced_calculator", json!({"operation": "gcd", "a": a, "b": b}))
                .unwrap_err();
            assert!(matches!(err, InvokeError::Execution { .. }), "{a}, {b}");
            assert!(err.to_string().contains("between -2^53 and 2^53"));
        }
        let err = call("advanced_calculator", json!({"operation": "lcm", "a": 1e19, "b": 3}))
            .unwrap_err();
        assert!(err.to_string().contains("between -2^53 and 2^53"));
    }

    #[test]
    fn gcd_and_lcm_at_the_exact_limit() {
        let limit = 9_007_199_254_740_992_i64;
        assert_eq!(
            call("advanced_calculator", json!({"operation": "gcd", "a": limit, "b": -4})).unwrap(),
            json!(4)
        );
        assert_eq!(
            call("advanced_calculator", json!({"operation": "lcm", "a": limit, "b": 3})).unwrap(),
            json!(27_021_597_764_222_976_u64)
        );
        assert_eq!(
            call("advanced_calculator", json!({"operation": "lcm", "a": 0, "b": 0})).unwrap(),
            json!(0)
        );
    }

    #[test]
    fn calculator_help_general_and_specific() {
        let general = call("calculator_help", json!({})).unwrap();
        assert!(general.as_str().unwrap().starts_with("Calculator Tools Help:"));

        let gcd = call("calculator_help", json!({"operation": "gcd"})).unwrap();
        assert!(gcd.as_str().unwrap().contains("a=48, b=18"));

        let unknown = call("calculator_help", json!({"operation": "modulo"})).unwrap();
        assert_eq!(unknown, json!("No help available for operation: modulo"));
    }
}
