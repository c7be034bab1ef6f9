use colored::Colorize;
use serde_json::Value;

use crate::cli::OutputFormat;

pub fn print_value(value: &Value, format: OutputFormat) {
    match format {
        OutputFormat::Json => match serde_json::to_string_pretty(value) {
            Ok(text) => println!("{text}"),
            Err(_) => println!("{value}"),
        },
        OutputFormat::Text => print_fields(value, ""),
    }
}

pub fn print_success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

fn print_fields(value: &Value, prefix: &str) {
    match value {
        Value::Object(map) => {
            for (key, field) in map {
                let name = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                match field {
                    Value::Object(_) => print_fields(field, &name),
                    other => println!("{}: {}", name.cyan(), scalar(other)),
                }
            }
        }
        other => println!("{}", scalar(other)),
    }
}

fn scalar(value: &Value) -> String {
    match value {
        Value::Null => "-".to_string(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(scalar).collect::<Vec<_>>().join(", "),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalar_rendering() {
        assert_eq!(scalar(&Value::Null), "-");
        assert_eq!(scalar(&json!("abc")), "abc");
        assert_eq!(scalar(&json!(["RS256", "ES256"])), "RS256, ES256");
        assert_eq!(scalar(&json!(true)), "true");
        assert_eq!(scalar(&json!(3600)), "3600");
    }
}
