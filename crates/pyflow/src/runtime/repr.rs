//! `repr()`, `str()` and `format()`.

use std::{cell::RefCell, fmt::Write, str::FromStr};

use num_bigint::{BigInt, Sign};
use num_traits::ToPrimitive;

use super::{
    class,
    value::{Dict, Set, Value},
};
use crate::exception::{ExcType, RunResult};

thread_local! {
    /// Identities of containers whose repr is in progress, for `[...]`.
    static REPR_STACK: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

/// `repr(value)`. Errors from user `__repr__` methods fall back to the
/// default object form.
#[must_use]
pub fn py_repr(value: &Value) -> String {
    repr(value).unwrap_or_else(|_| default_repr(value))
}

/// `str(value)`, with the same fallback as [`py_repr`].
#[must_use]
pub fn py_str(value: &Value) -> String {
    to_str(value).unwrap_or_else(|_| default_repr(value))
}

fn default_repr(value: &Value) -> String {
    format!("<{} object at {:#x}>", value.type_name(), value.identity())
}

pub(crate) fn repr(value: &Value) -> RunResult<String> {
    let mut out = String::new();
    write_repr(value, &mut out)?;
    Ok(out)
}

pub(crate) fn to_str(value: &Value) -> RunResult<String> {
    match value {
        Value::Str(s) => Ok(s.to_string()),
        Value::Instance(_) => match class::call_dunder(value, "__str__", Vec::new())? {
            Some(result) => expect_str(result, "__str__"),
            None => repr(value),
        },
        Value::Exception(exc) => match class::call_dunder(value, "__str__", Vec::new())? {
            Some(result) => expect_str(result, "__str__"),
            None => Ok(exc.message()),
        },
        other => repr(other),
    }
}

fn expect_str(value: Value, method: &str) -> RunResult<String> {
    match value {
        Value::Str(s) => Ok(s.to_string()),
        other => Err(ExcType::type_error(format!(
            "{method} returned non-string (type {})",
            other.type_name()
        ))),
    }
}

/// Runs `write` unless the container is already being printed further up.
fn guarded(
    value: &Value,
    out: &mut String,
    placeholder: &str,
    write: impl FnOnce(&mut String) -> RunResult<()>,
) -> RunResult<()> {
    let id = value.identity();
    let reentered = REPR_STACK.with(|stack| {
        let mut stack = stack.borrow_mut();
        if stack.contains(&id) {
            true
        } else {
            stack.push(id);
            false
        }
    });
    if reentered {
        out.push_str(placeholder);
        return Ok(());
    }
    let result = write(out);
    REPR_STACK.with(|stack| stack.borrow_mut().retain(|entry| *entry != id));
    result
}

fn write_items<'a>(items: impl IntoIterator<Item = &'a Value>, out: &mut String) -> RunResult<()> {
    for (i, item) in items.into_iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write_repr(item, out)?;
    }
    Ok(())
}

fn write_dict(dict: &Dict, out: &mut String) -> RunResult<()> {
    out.push('{');
    for (i, (key, value)) in dict.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write_repr(key.value(), out)?;
        out.push_str(": ");
        write_repr(value, out)?;
    }
    out.push('}');
    Ok(())
}

fn write_set(set: &Set, out: &mut String) -> RunResult<()> {
    out.push('{');
    write_items(set.iter().map(super::value::HashKey::value), out)?;
    out.push('}');
    Ok(())
}

fn write_repr(value: &Value, out: &mut String) -> RunResult<()> {
    match value {
        Value::Null => out.push_str("<NULL>"),
        Value::None => out.push_str("None"),
        Value::Ellipsis => out.push_str("Ellipsis"),
        Value::NotImplemented => out.push_str("NotImplemented"),
        Value::Bool(true) => out.push_str("True"),
        Value::Bool(false) => out.push_str("False"),
        Value::Int(i) => {
            let _ = write!(out, "{i}");
        }
        Value::Long(b) => {
            let _ = write!(out, "{b}");
        }
        Value::Float(f) => out.push_str(&float_repr(*f)),
        Value::Str(s) => out.push_str(&str_repr(s)),
        Value::Bytes(b) => out.push_str(&bytes_repr(b)),
        Value::List(items) => guarded(value, out, "[...]", |out| {
            out.push('[');
            write_items(items.borrow().iter(), out)?;
            out.push(']');
            Ok(())
        })?,
        Value::Tuple(items) => {
            out.push('(');
            write_items(items.iter(), out)?;
            if items.len() == 1 {
                out.push(',');
            }
            out.push(')');
        }
        Value::Dict(dict) => guarded(value, out, "{...}", |out| write_dict(&dict.borrow(), out))?,
        Value::Set(set) => {
            if set.borrow().is_empty() {
                out.push_str("set()");
            } else {
                write_set(&set.borrow(), out)?;
            }
        }
        Value::FrozenSet(set) => {
            out.push_str("frozenset(");
            if !set.is_empty() {
                write_set(set, out)?;
            }
            out.push(')');
        }
        Value::Slice(slice) => {
            out.push_str("slice(");
            write_items([&slice.start, &slice.stop, &slice.step], out)?;
            out.push(')');
        }
        Value::Range(range) => {
            let _ = if range.step == 1 {
                write!(out, "range({}, {})", range.start, range.stop)
            } else {
                write!(out, "range({}, {}, {})", range.start, range.stop, range.step)
            };
        }
        Value::Function(function) | Value::StaticMethod(function) | Value::ClassMethod(function) => {
            let _ = write!(out, "<function {} at {:#x}>", function.qualname(), value.identity());
        }
        Value::BoundMethod(method) => {
            let _ = write!(out, "<bound method {} of ", method.function().qualname());
            write_repr(method.receiver(), out)?;
            out.push('>');
        }
        Value::Builtin(builtin) if builtin.is_type() => {
            let _ = write!(out, "<class '{}'>", builtin.name());
        }
        Value::Builtin(builtin) => {
            let _ = write!(out, "<built-in function {}>", builtin.name());
        }
        Value::BuiltinMethod(method) => {
            let _ = write!(
                out,
                "<built-in method {} of {} object at {:#x}>",
                method.name(),
                method.receiver().type_name(),
                method.receiver().identity()
            );
        }
        Value::ExcClass(kind) => {
            let _ = write!(out, "<class '{kind}'>");
        }
        Value::Class(class) => {
            let _ = write!(out, "<class '{}'>", class.name());
        }
        Value::Instance(_) => match class::call_dunder(value, "__repr__", Vec::new())? {
            Some(result) => out.push_str(&expect_str(result, "__repr__")?),
            None => out.push_str(&default_repr(value)),
        },
        Value::Exception(exc) => match class::call_dunder(value, "__repr__", Vec::new())? {
            Some(result) => out.push_str(&expect_str(result, "__repr__")?),
            None => {
                out.push_str(exc.type_name());
                out.push('(');
                write_items(exc.args().iter(), out)?;
                out.push(')');
            }
        },
        Value::Generator(generator) => {
            let _ = write!(out, "<generator object {} at {:#x}>", generator.qualname(), value.identity());
        }
        Value::Module(module) => {
            let _ = write!(out, "<module '{}'>", module.name());
        }
        Value::Iterator(_) | Value::Cell(_) => out.push_str(&default_repr(value)),
        Value::Code(code) => {
            let _ = write!(out, "<code object {} at {:#x}>", code.name, value.identity());
        }
    }
    Ok(())
}

/// Shortest round-tripping float repr, laid out the way CPython prints it:
/// positional for exponents in `-4..16`, scientific with a signed two-digit
/// exponent otherwise, and always with a decimal point.
#[must_use]
pub(crate) fn float_repr(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_owned();
    }
    if f.is_infinite() {
        return if f < 0.0 { "-inf" } else { "inf" }.to_owned();
    }
    let sign = if f.is_sign_negative() { "-" } else { "" };
    let mut buffer = ryu::Buffer::new();
    let (digits, point) = decimal_digits(buffer.format_finite(f.abs()));
    if digits == "0" {
        return format!("{sign}0.0");
    }
    let exponent = point - 1;
    let body = if (-4..16).contains(&exponent) {
        let len = digits.len() as i32;
        if point <= 0 {
            format!("0.{}{digits}", "0".repeat(point.unsigned_abs() as usize))
        } else if point >= len {
            format!("{digits}{}.0", "0".repeat((point - len) as usize))
        } else {
            let (int, frac) = digits.split_at(point as usize);
            format!("{int}.{frac}")
        }
    } else {
        let (first, rest) = digits.split_at(1);
        let mantissa = if rest.is_empty() { first.to_owned() } else { format!("{first}.{rest}") };
        let exp_sign = if exponent < 0 { '-' } else { '+' };
        format!("{mantissa}e{exp_sign}{:02}", exponent.unsigned_abs())
    };
    format!("{sign}{body}")
}

/// Splits ryu output into significant digits and the decimal point position
/// relative to the first digit.
fn decimal_digits(formatted: &str) -> (String, i32) {
    let (mantissa, exponent) = match formatted.split_once('e') {
        Some((mantissa, exp)) => (mantissa, exp.parse::<i32>().unwrap_or(0)),
        None => (formatted, 0),
    };
    let (int, frac) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    let mut digits: String = format!("{int}{frac}");
    let mut point = int.len() as i32 + exponent;
    while digits.len() > 1 && digits.starts_with('0') {
        digits.remove(0);
        point -= 1;
    }
    while digits.len() > 1 && digits.ends_with('0') {
        digits.pop();
    }
    (digits, point)
}

/// `repr` of a string: single quotes unless the text contains a single quote
/// and no double quote.
#[must_use]
pub(crate) fn str_repr(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                let _ = write!(out, "\\x{:02x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

fn bytes_repr(bytes: &[u8]) -> String {
    let quote = if bytes.contains(&b'\'') && !bytes.contains(&b'"') { '"' } else { '\'' };
    let mut out = String::from("b");
    out.push(quote);
    for &byte in bytes {
        match byte {
            b'\\' => out.push_str("\\\\"),
            b'\t' => out.push_str("\\t"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b if char::from(b) == quote => {
                out.push('\\');
                out.push(quote);
            }
            0x20..=0x7e => out.push(char::from(byte)),
            _ => {
                let _ = write!(out, "\\x{byte:02x}");
            }
        }
    }
    out.push(quote);
    out
}

/// A parsed format specification, `[[fill]align][sign][#][0][width][,|_][.precision][type]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct FormatSpec {
    fill: Option<char>,
    align: Option<char>,
    sign: Option<char>,
    alternate: bool,
    zero: bool,
    width: usize,
    grouping: Option<char>,
    precision: Option<usize>,
    kind: Option<char>,
}

impl FromStr for FormatSpec {
    type Err = String;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let chars: Vec<char> = text.chars().collect();
        let mut spec = Self::default();
        let mut i = 0;
        let is_align = |c: char| matches!(c, '<' | '>' | '^' | '=');
        if chars.len() >= 2 && is_align(chars[1]) {
            spec.fill = Some(chars[0]);
            spec.align = Some(chars[1]);
            i = 2;
        } else if chars.first().copied().is_some_and(is_align) {
            spec.align = Some(chars[0]);
            i = 1;
        }
        if let Some(&c) = chars.get(i)
            && matches!(c, '+' | '-' | ' ')
        {
            spec.sign = Some(c);
            i += 1;
        }
        if chars.get(i) == Some(&'#') {
            spec.alternate = true;
            i += 1;
        }
        if chars.get(i) == Some(&'0') {
            spec.zero = true;
            i += 1;
        }
        let number = |i: &mut usize| {
            let start = *i;
            while chars.get(*i).is_some_and(char::is_ascii_digit) {
                *i += 1;
            }
            chars[start..*i].iter().collect::<String>().parse::<usize>().ok()
        };
        spec.width = number(&mut i).unwrap_or(0);
        if let Some(&c) = chars.get(i)
            && matches!(c, ',' | '_')
        {
            spec.grouping = Some(c);
            i += 1;
        }
        if chars.get(i) == Some(&'.') {
            i += 1;
            spec.precision = Some(number(&mut i).ok_or_else(|| "Format specifier missing precision".to_owned())?);
        }
        if let Some(&c) = chars.get(i) {
            spec.kind = Some(c);
            i += 1;
        }
        if i != chars.len() {
            return Err("Invalid format specifier".to_owned());
        }
        Ok(spec)
    }
}

/// `format(value, spec)`, as used by f-strings.
pub(crate) fn format_value(value: &Value, spec: &str) -> RunResult<String> {
    if matches!(value, Value::Instance(_))
        && let Some(result) = class::call_dunder(value, "__format__", vec![Value::from(spec)])?
    {
        return expect_str(result, "__format__");
    }
    if spec.is_empty() {
        return to_str(value);
    }
    let parsed: FormatSpec = spec.parse().map_err(|message: String| ExcType::ValueError.error(message))?;
    let unknown = |code: char| {
        ExcType::ValueError.error(format!(
            "Unknown format code '{code}' for object of type '{}'",
            value.type_name()
        ))
    };
    match value {
        Value::Int(_) | Value::Long(_) | Value::Bool(_) => {
            let big = match value {
                Value::Long(b) => (**b).clone(),
                other => BigInt::from(other.as_int().unwrap_or_default()),
            };
            match parsed.kind {
                None | Some('d' | 'n') => Ok(parsed.pad_number(&big.magnitude().to_string(), big.sign() == Sign::Minus, true)),
                Some(code @ ('x' | 'X' | 'o' | 'b')) => {
                    let (radix, prefix) = match code {
                        'x' | 'X' => (16, "0x"),
                        'o' => (8, "0o"),
                        _ => (2, "0b"),
                    };
                    let mut digits = big.magnitude().to_str_radix(radix);
                    if code == 'X' {
                        digits = digits.to_uppercase();
                    }
                    let body = if parsed.alternate {
                        let prefix = if code == 'X' { prefix.to_uppercase() } else { prefix.to_owned() };
                        format!("{prefix}{digits}")
                    } else {
                        digits
                    };
                    Ok(parsed.pad_number(&body, big.sign() == Sign::Minus, false))
                }
                Some('c') => {
                    let c = big
                        .to_u32()
                        .and_then(char::from_u32)
                        .ok_or_else(|| ExcType::OverflowError.error("%c arg not in range(0x110000)"))?;
                    Ok(parsed.pad(&c.to_string(), '<'))
                }
                Some('e' | 'E' | 'f' | 'F' | 'g' | 'G' | '%') => {
                    let f = super::numeric::to_f64(value)?.unwrap_or_default();
                    parsed.format_float(f).ok_or_else(|| unknown(parsed.kind.unwrap_or('?')))
                }
                Some(code) => Err(unknown(code)),
            }
        }
        Value::Float(f) => parsed.format_float(*f).ok_or_else(|| unknown(parsed.kind.unwrap_or('?'))),
        Value::Str(s) => match parsed.kind {
            None | Some('s') => {
                let text: String = match parsed.precision {
                    Some(p) => s.chars().take(p).collect(),
                    None => s.to_string(),
                };
                Ok(parsed.pad(&text, '<'))
            }
            Some(code) => Err(unknown(code)),
        },
        other => {
            let text = to_str(other)?;
            if parsed.kind.is_some() {
                return Err(ExcType::type_error(format!(
                    "unsupported format string passed to {}.__format__",
                    other.type_name()
                )));
            }
            Ok(parsed.pad(&text, '<'))
        }
    }
}

/// `template % args`, printf-style string formatting.
pub(crate) fn percent_format(template: &str, args: &Value) -> RunResult<String> {
    let mapping = matches!(args, Value::Dict(_));
    let mut positional: Vec<Value> = match args {
        Value::Tuple(items) => items.to_vec(),
        Value::Dict(_) => Vec::new(),
        other => vec![other.clone()],
    };
    positional.reverse();
    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();
    while let Some((_, c)) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let mut key = None;
        if chars.peek().is_some_and(|&(_, c)| c == '(') {
            chars.next();
            let mut name = String::new();
            loop {
                match chars.next() {
                    Some((_, ')')) => break,
                    Some((_, c)) => name.push(c),
                    None => return Err(ExcType::ValueError.error("incomplete format key")),
                }
            }
            key = Some(name);
        }
        let mut flags = String::new();
        while let Some(&(_, c)) = chars.peek() {
            if !matches!(c, '-' | '+' | ' ' | '0' | '#') {
                break;
            }
            flags.push(c);
            chars.next();
        }
        let digits = |chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>| {
            let mut number = String::new();
            while let Some(&(_, c)) = chars.peek() {
                if !c.is_ascii_digit() {
                    break;
                }
                number.push(c);
                chars.next();
            }
            number
        };
        let width = digits(&mut chars);
        let precision = if chars.peek().is_some_and(|&(_, c)| c == '.') {
            chars.next();
            Some(digits(&mut chars))
        } else {
            None
        };
        let Some((code_at, code)) = chars.next() else {
            return Err(ExcType::ValueError.error("incomplete format"));
        };
        if code == '%' {
            out.push('%');
            continue;
        }
        let value = match (&key, args) {
            (Some(name), Value::Dict(dict)) => {
                let found = dict.borrow().get(&super::value::HashKey::str(name)).cloned();
                found.ok_or_else(|| ExcType::key_error(Value::from(name.as_str())))?
            }
            (Some(_), _) => return Err(ExcType::type_error("format requires a mapping")),
            (None, _) if mapping => args.clone(),
            (None, _) => positional
                .pop()
                .ok_or_else(|| ExcType::type_error("not enough arguments for format string"))?,
        };
        let left = flags.contains('-');
        let mut spec = String::new();
        if left {
            spec.push('<');
        } else if !matches!(code, 's' | 'r' | 'a' | 'c') {
            spec.push('>');
        }
        if flags.contains('+') {
            spec.push('+');
        } else if flags.contains(' ') {
            spec.push(' ');
        }
        if flags.contains('#') {
            spec.push('#');
        }
        if flags.contains('0') && !left && !matches!(code, 's' | 'r' | 'a' | 'c') {
            spec.clear();
            spec.push_str(if flags.contains('+') { "+" } else { "" });
            spec.push('0');
        }
        spec.push_str(&width);
        let formatted = match code {
            's' | 'r' | 'a' => {
                let mut text = if code == 's' { to_str(&value)? } else { repr(&value)? };
                if let Some(p) = precision.as_deref().and_then(|p| p.parse::<usize>().ok()) {
                    text = text.chars().take(p).collect();
                }
                if !left && !width.is_empty() {
                    spec.insert(0, '>');
                }
                format_value(&Value::from(text), &spec)?
            }
            'd' | 'i' | 'u' | 'x' | 'X' | 'o' | 'c' => {
                let number = match value {
                    Value::Float(f) if code != 'c' => Value::Int(f.trunc().to_i64().unwrap_or_default()),
                    Value::Int(_) | Value::Long(_) | Value::Bool(_) => value,
                    other => {
                        return Err(ExcType::type_error(format!(
                            "%{code} format: a real number is required, not {}",
                            other.type_name()
                        )));
                    }
                };
                let number = match number {
                    Value::Bool(b) => Value::Int(i64::from(b)),
                    other => other,
                };
                spec.push(if matches!(code, 'i' | 'u') { 'd' } else { code });
                format_value(&number, &spec)?
            }
            'f' | 'F' | 'e' | 'E' | 'g' | 'G' => {
                if !super::numeric::is_number(&value) {
                    return Err(ExcType::type_error(format!(
                        "must be real number, not {}",
                        value.type_name()
                    )));
                }
                spec.push('.');
                spec.push_str(precision.as_deref().filter(|p| !p.is_empty()).unwrap_or("6"));
                spec.push(code);
                let f = super::numeric::to_f64(&value)?.unwrap_or_default();
                format_value(&Value::Float(f), &spec)?
            }
            other => {
                return Err(ExcType::ValueError.error(format!(
                    "unsupported format character '{other}' ({:#x}) at index {code_at}",
                    u32::from(other)
                )));
            }
        };
        out.push_str(&formatted);
    }
    if !mapping && !positional.is_empty() {
        return Err(ExcType::type_error("not all arguments converted during string formatting"));
    }
    Ok(out)
}

impl FormatSpec {
    fn pad(&self, text: &str, default_align: char) -> String {
        let len = text.chars().count();
        if len >= self.width {
            return text.to_owned();
        }
        let fill = self.fill.unwrap_or(' ');
        let missing = self.width - len;
        let (left, right) = match self.align.unwrap_or(default_align) {
            '<' => (0, missing),
            '^' => (missing / 2, missing - missing / 2),
            _ => (missing, 0),
        };
        let mut out = String::with_capacity(self.width);
        out.extend(std::iter::repeat_n(fill, left));
        out.push_str(text);
        out.extend(std::iter::repeat_n(fill, right));
        out
    }

    fn sign_prefix(&self, negative: bool) -> &'static str {
        match (negative, self.sign) {
            (true, _) => "-",
            (false, Some('+')) => "+",
            (false, Some(' ')) => " ",
            _ => "",
        }
    }

    /// Pads a number's digits, applying sign, grouping and `=` alignment.
    fn pad_number(&self, digits: &str, negative: bool, group: bool) -> String {
        let body = match self.grouping {
            Some(separator) if group => group_digits(digits, separator),
            _ => digits.to_owned(),
        };
        let sign = self.sign_prefix(negative);
        let align = if self.zero && self.align.is_none() { '=' } else { self.align.unwrap_or('>') };
        if align == '=' {
            let fill = if self.zero && self.fill.is_none() { '0' } else { self.fill.unwrap_or(' ') };
            let len = sign.len() + body.chars().count();
            let padding: String = std::iter::repeat_n(fill, self.width.saturating_sub(len)).collect();
            return format!("{sign}{padding}{body}");
        }
        self.pad(&format!("{sign}{body}"), align)
    }

    fn format_float(&self, f: f64) -> Option<String> {
        let negative = f.is_sign_negative() && !(f == 0.0 && self.kind.is_none());
        let magnitude = f.abs();
        let precision = self.precision;
        let body = if !magnitude.is_finite() {
            let text = if magnitude.is_nan() { "nan" } else { "inf" };
            if matches!(self.kind, Some('E' | 'F' | 'G')) { text.to_uppercase() } else { text.to_owned() }
        } else {
            match self.kind {
                None if precision.is_none() => {
                    let repr = float_repr(magnitude);
                    return Some(self.pad_number(&repr, f.is_sign_negative(), false));
                }
                None | Some('g' | 'G') => {
                    let general = general_format(magnitude, precision.unwrap_or(6), self.alternate || self.kind.is_none());
                    if self.kind == Some('G') { general.to_uppercase() } else { general }
                }
                Some('f' | 'F') => fixed_grouped(magnitude, precision.unwrap_or(6), self.grouping),
                Some('e' | 'E') => {
                    let text = exponent_format(magnitude, precision.unwrap_or(6));
                    if self.kind == Some('E') { text.to_uppercase() } else { text }
                }
                Some('%') => format!("{}%", fixed_grouped(magnitude * 100.0, precision.unwrap_or(6), self.grouping)),
                Some(_) => return None,
            }
        };
        Some(self.pad_number(&body, negative, false))
    }
}

fn fixed_grouped(f: f64, precision: usize, grouping: Option<char>) -> String {
    let text = format!("{f:.precision$}");
    match grouping {
        Some(separator) => {
            let (int, frac) = text.split_once('.').map_or((text.as_str(), None), |(i, f)| (i, Some(f)));
            let int = group_digits(int, separator);
            match frac {
                Some(frac) => format!("{int}.{frac}"),
                None => int,
            }
        }
        None => text,
    }
}

/// `1.5e+03` style: Rust's `{:e}` with a signed, two-digit exponent.
fn exponent_format(f: f64, precision: usize) -> String {
    let text = format!("{f:.precision$e}");
    let (mantissa, exponent) = text.split_once('e').unwrap_or((&text, "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let sign = if exponent < 0 { '-' } else { '+' };
    format!("{mantissa}e{sign}{:02}", exponent.unsigned_abs())
}

/// The `g` presentation: scientific when the exponent is below -4 or at
/// least the precision, trailing zeros stripped unless `keep_point` asks
/// for the repr-like form.
fn general_format(f: f64, precision: usize, keep_point: bool) -> String {
    let precision = precision.max(1);
    if f == 0.0 {
        return if keep_point { "0.0".to_owned() } else { "0".to_owned() };
    }
    let scientific = exponent_format(f, precision - 1);
    let exponent: i64 = scientific
        .split_once('e')
        .and_then(|(_, exp)| exp.parse().ok())
        .unwrap_or(0);
    let strip = |text: String| {
        if text.contains('.') {
            let trimmed = text.trim_end_matches('0');
            let trimmed = trimmed.strip_suffix('.').unwrap_or(trimmed);
            if keep_point && !trimmed.contains('.') {
                format!("{trimmed}.0")
            } else {
                trimmed.to_owned()
            }
        } else {
            text
        }
    };
    if exponent < -4 || exponent >= precision as i64 {
        let (mantissa, exp) = scientific.split_once('e').unwrap_or((&scientific, "+00"));
        let mantissa = strip(mantissa.to_owned());
        let mantissa = if keep_point { mantissa.trim_end_matches(".0").to_owned() } else { mantissa };
        format!("{mantissa}e{exp}")
    } else {
        let decimals = usize::try_from(precision as i64 - 1 - exponent).unwrap_or(0);
        strip(format!("{f:.decimals$}"))
    }
}

fn group_digits(digits: &str, separator: char) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(separator);
        }
        out.push(c);
    }
    out
}
