//! Builtin system functions and variables available in every [`Env`](crate::env::Env)
//! even when nothing has been registered locally: `_ADD`, `_SUB`, `_MUL`,
//! `_DIV`, `_ROUND`, `_CEIL`, `_FLOOR` and `_DATE`.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use chrono::Local;

use crate::any::Any;
use crate::env::MethodFunc;
use crate::error::EnvError;

fn registry() -> &'static BTreeMap<String, MethodFunc> {
    static REGISTRY: OnceLock<BTreeMap<String, MethodFunc>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut m: BTreeMap<String, MethodFunc> = BTreeMap::new();
        m.insert("_add".into(), Arc::new(sys_add));
        m.insert("_sub".into(), Arc::new(sys_sub));
        m.insert("_mul".into(), Arc::new(sys_mul));
        m.insert("_div".into(), Arc::new(sys_div));
        m.insert("_round".into(), Arc::new(sys_round));
        m.insert("_ceil".into(), Arc::new(sys_ceil));
        m.insert("_floor".into(), Arc::new(sys_floor));
        m.insert("_date".into(), Arc::new(sys_date));
        m
    })
}

/// Look up a builtin function by its already-lowercased name.
pub(crate) fn get_sysfunc(name: &str) -> Option<MethodFunc> {
    registry().get(name).cloned()
}

/// No builtin variables are registered — every lookup that falls through
/// a local miss ends up here and comes back empty.
pub(crate) fn get_sysvar(_name: &str) -> Option<Any> {
    None
}

fn sys_add(args: &[Any]) -> Result<Any, EnvError> {
    let total: f64 = args.iter().map(Any::float).sum();
    Ok(Any::Float(total))
}

fn sys_sub(args: &[Any]) -> Result<Any, EnvError> {
    let Some((first, rest)) = args.split_first() else {
        return Ok(Any::Int(0));
    };
    let total = rest.iter().fold(first.float(), |acc, a| acc - a.float());
    Ok(Any::Float(total))
}

fn sys_mul(args: &[Any]) -> Result<Any, EnvError> {
    let total: f64 = args.iter().map(Any::float).product();
    Ok(Any::Float(total))
}

fn sys_div(args: &[Any]) -> Result<Any, EnvError> {
    let Some((first, rest)) = args.split_first() else {
        return Ok(Any::Int(0));
    };
    let mut total = first.float();
    for a in rest {
        let divisor = a.float();
        if divisor == 0.0 {
            return Err(EnvError::DivByZero);
        }
        total /= divisor;
    }
    Ok(Any::Float(total))
}

fn sys_round(args: &[Any]) -> Result<Any, EnvError> {
    Ok(args.first().map_or(Any::Int(0), |a| Any::Int(a.float().round() as i64)))
}

fn sys_ceil(args: &[Any]) -> Result<Any, EnvError> {
    Ok(args.first().map_or(Any::Int(0), |a| Any::Int(a.float().ceil() as i64)))
}

fn sys_floor(args: &[Any]) -> Result<Any, EnvError> {
    Ok(args.first().map_or(Any::Int(0), |a| Any::Int(a.float().floor() as i64)))
}

/// Go reference-time layout tokens ordered longest-first so a greedy scan
/// never matches a short token (`"2"`) inside a longer one (`"2006"`).
const GO_LAYOUT_TOKENS: &[(&str, &str)] = &[
    (".000000000", "%9f"),
    (".000000", "%6f"),
    ("January", "%B"),
    ("Monday", "%A"),
    ("-07:00", "%:z"),
    ("Z07:00", "%:z"),
    (".000", "%3f"),
    ("2006", "%Y"),
    ("Jan", "%b"),
    ("Mon", "%a"),
    ("MST", "%Z"),
    ("-0700", "%z"),
    ("15", "%H"),
    ("01", "%m"),
    ("02", "%d"),
    ("03", "%I"),
    ("04", "%M"),
    ("05", "%S"),
    ("06", "%y"),
    ("_2", "%e"),
    ("PM", "%p"),
    ("pm", "%P"),
    ("1", "%-m"),
    ("2", "%-d"),
    ("3", "%-I"),
    ("4", "%-M"),
    ("5", "%-S"),
];

/// Translate a Go reference-time layout string (e.g. `"2006-01-02"`) into a
/// chrono strftime format string, the way `sysdate.go`'s `_Date` expects its
/// `format` argument to be read.
fn go_layout_to_strftime(layout: &str) -> String {
    let mut out = String::with_capacity(layout.len());
    let chars: Vec<char> = layout.chars().collect();
    let mut i = 0;
    'outer: while i < chars.len() {
        for (token, spec) in GO_LAYOUT_TOKENS {
            let token_chars: Vec<char> = token.chars().collect();
            if chars[i..].starts_with(token_chars.as_slice()) {
                out.push_str(spec);
                i += token_chars.len();
                continue 'outer;
            }
        }
        if chars[i] == '%' {
            out.push_str("%%");
        } else {
            out.push(chars[i]);
        }
        i += 1;
    }
    out
}

fn sys_date(args: &[Any]) -> Result<Any, EnvError> {
    let layout = args.first().map(Any::to_display_string).unwrap_or_else(|| "2006-01-02".into());
    let format = go_layout_to_strftime(&layout);
    Ok(Any::String(Local::now().format(&format).to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_sums_all_args() {
        let v = sys_add(&[Any::Int(1), Any::Int(2), Any::Float(0.5)]).unwrap();
        assert_eq!(v.float(), 3.5);
    }

    #[test]
    fn div_by_zero_is_an_error() {
        assert!(sys_div(&[Any::Int(4), Any::Int(0)]).is_err());
    }

    #[test]
    fn round_ceil_floor_produce_ints() {
        assert_eq!(sys_round(&[Any::Float(2.5)]).unwrap(), Any::Int(3));
        assert_eq!(sys_ceil(&[Any::Float(2.1)]).unwrap(), Any::Int(3));
        assert_eq!(sys_floor(&[Any::Float(2.9)]).unwrap(), Any::Int(2));
    }

    #[test]
    fn date_defaults_to_iso_format() {
        let v = sys_date(&[]).unwrap();
        let s = v.as_str().unwrap();
        assert_eq!(s.len(), "2026-07-31".len());
    }

    #[test]
    fn date_translates_go_reference_layout() {
        let today = Local::now().format("%Y-%m-%d").to_string();
        let v = sys_date(&[Any::from("2006-01-02")]).unwrap();
        assert_eq!(v.as_str().unwrap(), today);
    }

    #[test]
    fn go_layout_translator_handles_common_tokens() {
        assert_eq!(go_layout_to_strftime("2006-01-02"), "%Y-%m-%d");
        assert_eq!(go_layout_to_strftime("2006-01-02 15:04:05"), "%Y-%m-%d %H:%M:%S");
        assert_eq!(go_layout_to_strftime("Jan 2, 2006"), "%b %-d, %Y");
    }
}
