//! Random values.

use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::{Number, Value};
use uuid::Uuid;

use super::math::integer_operand;
use super::{number_arg, optional_str, string_arg, Args};
use crate::tools::{ToolContext, ToolError};

const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
const ALPHANUMERIC: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const DIGITS: &[u8] = b"0123456789";
const PRINTABLE: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789!\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~";

fn charset(name: &str) -> Result<&'static [u8], ToolError> {
    match name {
        "alphanumeric" => Ok(ALPHANUMERIC),
        "letters" => Ok(LETTERS),
        "digits" => Ok(DIGITS),
        "ascii" => Ok(PRINTABLE),
        other => Err(ToolError::new(format!("Unknown charset: {other}"))),
    }
}

fn bounds<T: PartialOrd>(min: T, max: T) -> Result<(T, T), ToolError> {
    if min > max {
        return Err(ToolError::new("min_value cannot be greater than max_value"));
    }
    Ok((min, max))
}

pub(super) fn random_generator(_: &ToolContext, args: &Args) -> Result<Value, ToolError> {
    let mut rng = rand::thread_rng();

    match string_arg(args, "type")? {
        "integer" => {
            let min = number_arg(args, "min_value").map_or(Ok(0), |v| integer_operand(v, "min_value"))?;
            let max =
                number_arg(args, "max_value").map_or(Ok(100), |v| integer_operand(v, "max_value"))?;
            let (min, max) = bounds(min, max)?;
            Ok(Value::from(rng.gen_range(min..=max)))
        }
        "float" => {
            let (min, max) = bounds(
                number_arg(args, "min_value").unwrap_or(0.0),
                number_arg(args, "max_value").unwrap_or(1.0),
            )?;
            if !(max - min).is_finite() {
                return Err(ToolError::new("Range between min_value and max_value is too wide"));
            }
            Number::from_f64(rng.gen_range(min..=max))
                .map(Value::Number)
                .ok_or_else(|| ToolError::new("Generated value is not a finite number"))
        }
        "string" => {
            let length = args.get("length").and_then(Value::as_u64).unwrap_or(10);
            if !(1..=100).contains(&length) {
                return Err(ToolError::new("String length must be between 1 and 100"));
            }
            let chars = charset(optional_str(args, "charset").unwrap_or("alphanumeric"))?;
            let text: String = (0..length)
                .filter_map(|_| chars.choose(&mut rng))
                .map(|&b| char::from(b))
                .collect();
            Ok(Value::String(text))
        }
        "boolean" => Ok(Value::Bool(rng.gen_bool(0.5))),
        "uuid" => Ok(Value::String(Uuid::new_v4().to_string())),
        other => Err(ToolError::new(format!("Unknown random type: {other}"))),
    }
}
