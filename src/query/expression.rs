//! The `_Exp` raw-expression DSL: `{fn: [name, ...args]}` and `{literal: [name]}`.
//!
//! Bare literals and function names must match `[a-zA-Z0-9_]+`; anything else is rejected before
//! it can reach SQL. Function names outside the fixed set below are refused.

use crate::config::Dialect;
use crate::error::PlanError;
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

fn safe_literal() -> Result<&'static Regex, PlanError> {
    static RE: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-zA-Z0-9_]+$"))
        .as_ref()
        .map_err(|e| PlanError::malformed(e.to_string()))
}

fn checked(s: &str) -> Result<&str, PlanError> {
    if safe_literal()?.is_match(s) {
        Ok(s)
    } else {
        Err(PlanError::UnsafeLiteralExpression(s.to_string()))
    }
}

/// Lower an `_Exp` value to SQL text.
pub fn lower(value: &Value, dialect: Dialect) -> Result<String, PlanError> {
    let obj = match value {
        Value::Object(obj) if obj.len() == 1 => obj,
        _ => {
            return Err(PlanError::malformed(
                "_Exp expects an object with a single `fn` or `literal` key",
            ))
        }
    };
    if let Some(Value::Array(items)) = obj.get("literal") {
        return match items.as_slice() {
            [Value::String(name)] => Ok(checked(name)?.to_string()),
            [other] => Err(PlanError::UnsafeLiteralExpression(other.to_string())),
            _ => Err(PlanError::malformed("`literal` takes exactly one name")),
        };
    }
    if let Some(Value::Array(items)) = obj.get("fn") {
        let (name, args) = match items.split_first() {
            Some((Value::String(name), args)) => (checked(name)?, args),
            Some((other, _)) => return Err(PlanError::UnsafeLiteralExpression(other.to_string())),
            None => return Err(PlanError::malformed("`fn` needs a function name")),
        };
        let args = args
            .iter()
            .map(|a| lower_argument(a, dialect))
            .collect::<Result<Vec<_>, _>>()?;
        return lower_call(name, &args, dialect);
    }
    Err(PlanError::malformed(
        "_Exp expects an object with a single `fn` or `literal` key",
    ))
}

fn lower_argument(arg: &Value, dialect: Dialect) -> Result<String, PlanError> {
    match arg {
        Value::String(s) => Ok(checked(s)?.to_string()),
        Value::Number(n) => Ok(checked(&n.to_string())?.to_string()),
        Value::Object(_) => lower(arg, dialect),
        other => Err(PlanError::UnsafeLiteralExpression(other.to_string())),
    }
}

fn infix(op: &str, args: &[String]) -> Result<String, PlanError> {
    if args.len() < 2 {
        return Err(PlanError::malformed(format!(
            "infix `{}` needs at least two arguments",
            op.trim()
        )));
    }
    Ok(format!("({})", args.join(op)))
}

fn lower_call(name: &str, args: &[String], dialect: Dialect) -> Result<String, PlanError> {
    match (name, args) {
        ("subtract", _) => infix(" - ", args),
        ("add", _) => infix(" + ", args),
        ("equals", _) => infix(" = ", args),
        ("concat", _) if dialect == Dialect::Mssql => infix(" + ", args),
        ("concat", _) => Ok(format!("CONCAT({})", args.join(", "))),
        ("lower" | "upper" | "abs", [arg]) => Ok(format!("{}({})", name.to_uppercase(), arg)),
        ("coalesce", [_, ..]) => Ok(format!("COALESCE({})", args.join(", "))),
        ("lower" | "upper" | "abs" | "coalesce", _) => Err(PlanError::malformed(format!(
            "wrong number of arguments for `{}`",
            name
        ))),
        (other, _) => Err(PlanError::malformed(format!(
            "unknown expression function `{}`",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lowers_named_functions() {
        let e = json!({ "fn": ["equals", { "fn": ["subtract", "price", "cost"] }, { "literal": ["margin"] }] });
        assert_eq!(lower(&e, Dialect::Postgres).unwrap(), "((price - cost) = margin)");
        let c = json!({ "fn": ["concat", "first_name", "last_name"] });
        assert_eq!(lower(&c, Dialect::Postgres).unwrap(), "CONCAT(first_name, last_name)");
        assert_eq!(lower(&c, Dialect::Mssql).unwrap(), "(first_name + last_name)");
        let u = json!({ "fn": ["lower", "email"] });
        assert_eq!(lower(&u, Dialect::Postgres).unwrap(), "LOWER(email)");
        let c = json!({ "fn": ["coalesce", "nickname", "first_name"] });
        assert_eq!(lower(&c, Dialect::Postgres).unwrap(), "COALESCE(nickname, first_name)");
    }

    #[test]
    fn only_known_functions_can_be_called() {
        for name in ["pg_sleep", "pg_read_file", "version", "lo_import"] {
            let e = json!({ "fn": [name, "10"] });
            assert!(
                matches!(lower(&e, Dialect::Postgres), Err(PlanError::MalformedFilter(_))),
                "{} should be refused",
                name
            );
        }
        let nested = json!({ "fn": ["add", { "fn": ["pg_sleep", "1"] }, "x"] });
        assert!(matches!(
            lower(&nested, Dialect::Postgres),
            Err(PlanError::MalformedFilter(_))
        ));
        assert!(matches!(
            lower(&json!({ "fn": ["upper", "a", "b"] }), Dialect::Postgres),
            Err(PlanError::MalformedFilter(_))
        ));
    }

    #[test]
    fn rejects_unsafe_literals() {
        let e = json!({ "fn": ["add", "x; DROP TABLE", "y"] });
        assert!(matches!(
            lower(&e, Dialect::Postgres),
            Err(PlanError::UnsafeLiteralExpression(s)) if s == "x; DROP TABLE"
        ));
        let name = json!({ "fn": ["pg_sleep(1)--", "y"] });
        assert!(matches!(
            lower(&name, Dialect::Postgres),
            Err(PlanError::UnsafeLiteralExpression(_))
        ));
        let lit = json!({ "literal": ["a b"] });
        assert!(matches!(
            lower(&lit, Dialect::Postgres),
            Err(PlanError::UnsafeLiteralExpression(_))
        ));
        let float = json!({ "fn": ["add", "x", 1.5] });
        assert!(matches!(
            lower(&float, Dialect::Postgres),
            Err(PlanError::UnsafeLiteralExpression(_))
        ));
    }
}
