//! Parser for FUSE-style command lines (`fuse_opt_parse` semantics).
//!
//! A format string holds space separated templates, paired positionally
//! with typed destination [`OptSlot`]s:
//!
//! * `-x`, `--long`, `key`: match the option exactly (booleans), or
//!   `option=value` for any other destination;
//! * any of the above followed by `=`: match `option=value`;
//! * `=` followed by a verb (`%d %o %x %X %s %v`): decode the value in
//!   that base, `%v` picking the base from the prefix like `strtol(.., 0)`.
//!
//! Templates are tried against every option argument and against each
//! comma separated `-o` suboption. Unmatched options are returned, with
//! unmatched suboptions folded back into a single leading `-o a,b`.
//!
//! An empty format returns the non-option arguments only, which is how
//! the mountpoint is found among the native options.

use crate::error::OptError;

/// A typed destination for one template.
#[derive(Debug)]
pub enum OptSlot<'a> {
    Bool(&'a mut bool),
    I8(&'a mut i8),
    I16(&'a mut i16),
    I32(&'a mut i32),
    I64(&'a mut i64),
    Isize(&'a mut isize),
    U8(&'a mut u8),
    U16(&'a mut u16),
    U32(&'a mut u32),
    U64(&'a mut u64),
    Usize(&'a mut usize),
    Str(&'a mut String),
}

impl OptSlot<'_> {
    fn is_bool(&self) -> bool {
        matches!(self, OptSlot::Bool(_))
    }

    /// Width in bits of an integer slot, `None` for bool and string.
    fn int_bits(&self) -> Option<u32> {
        Some(match self {
            OptSlot::I8(_) | OptSlot::U8(_) => 8,
            OptSlot::I16(_) | OptSlot::U16(_) => 16,
            OptSlot::I32(_) | OptSlot::U32(_) => 32,
            OptSlot::I64(_) | OptSlot::U64(_) => 64,
            OptSlot::Isize(_) | OptSlot::Usize(_) => usize::BITS,
            OptSlot::Bool(_) | OptSlot::Str(_) => return None,
        })
    }

    // Integer values were range checked against `int_bits`; `as` keeps the
    // low bits so "-8" into a u8 reads back as 0xf8, as with sscanf.
    fn commit(&mut self, value: Value) {
        match (self, value) {
            (OptSlot::Bool(d), Value::Bool(v)) => **d = v,
            (OptSlot::Str(d), Value::Str(v)) => **d = v,
            (OptSlot::I8(d), Value::Int(v)) => **d = v as i8,
            (OptSlot::I16(d), Value::Int(v)) => **d = v as i16,
            (OptSlot::I32(d), Value::Int(v)) => **d = v as i32,
            (OptSlot::I64(d), Value::Int(v)) => **d = v as i64,
            (OptSlot::Isize(d), Value::Int(v)) => **d = v as isize,
            (OptSlot::U8(d), Value::Int(v)) => **d = v as u8,
            (OptSlot::U16(d), Value::Int(v)) => **d = v as u16,
            (OptSlot::U32(d), Value::Int(v)) => **d = v as u32,
            (OptSlot::U64(d), Value::Int(v)) => **d = v as u64,
            (OptSlot::Usize(d), Value::Int(v)) => **d = v as usize,
            _ => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Bool(bool),
    Int(i128),
    Str(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verb {
    Dec,
    Oct,
    Hex,
    Auto,
    Str,
}

#[derive(Debug)]
struct Template<'f> {
    name: &'f str,
    /// The template spelled out `name=`; a value is mandatory.
    eq: bool,
    verb: Option<Verb>,
}

impl<'f> Template<'f> {
    fn parse(text: &'f str) -> Result<Self, OptError> {
        let bad = || OptError::BadTemplate(text.to_string());
        let (name, eq, verb) = match text.split_once('=') {
            None => (text, false, None),
            Some((name, spec)) => {
                let verb = match spec {
                    "" => None,
                    "%d" | "%i" | "%u" => Some(Verb::Dec),
                    "%o" => Some(Verb::Oct),
                    "%x" | "%X" => Some(Verb::Hex),
                    "%v" => Some(Verb::Auto),
                    "%s" => Some(Verb::Str),
                    _ => return Err(bad()),
                };
                (name, true, verb)
            }
        };
        if name.is_empty() || name.contains('%') {
            return Err(bad());
        }
        Ok(Template { name, eq, verb })
    }

    /// `Some(None)` for a value-less match, `Some(Some(v))` for `name=v`.
    fn matches<'a>(&self, candidate: &'a str, slot: &OptSlot<'_>) -> Option<Option<&'a str>> {
        let value = candidate
            .strip_prefix(self.name)
            .and_then(|rest| rest.strip_prefix('='));
        if value.is_some() {
            return Some(value);
        }
        if !self.eq && slot.is_bool() && candidate == self.name {
            return Some(None);
        }
        None
    }

    fn decode(&self, option: &str, value: Option<&str>, slot: &OptSlot<'_>) -> Result<Value, OptError> {
        if slot.is_bool() {
            return Ok(Value::Bool(match (value, self.verb) {
                (Some(v), Some(verb)) if verb != Verb::Str => parse_int(option, v, verb)? != 0,
                _ => true,
            }));
        }
        let value = value.ok_or_else(|| OptError::MissingValue(option.to_string()))?;
        let Some(bits) = slot.int_bits() else {
            return Ok(Value::Str(value.to_string()));
        };
        let verb = match self.verb {
            None | Some(Verb::Str) => Verb::Dec,
            Some(verb) => verb,
        };
        let n = parse_int(option, value, verb)?;
        // Accept anything representable as either the signed or the
        // unsigned type of this width.
        let low = -(1i128 << (bits - 1));
        let high = (1i128 << bits) - 1;
        if n < low || n > high {
            return Err(OptError::OutOfRange {
                option: option.to_string(),
                value: value.to_string(),
            });
        }
        Ok(Value::Int(n))
    }
}

fn parse_int(option: &str, value: &str, verb: Verb) -> Result<i128, OptError> {
    let bad = || OptError::BadNumber {
        option: option.to_string(),
        value: value.to_string(),
    };
    let (negative, digits) = match value.as_bytes().first() {
        Some(b'-') => (true, &value[1..]),
        Some(b'+') => (false, &value[1..]),
        _ => (false, value),
    };
    fn strip_hex(s: &str) -> Option<&str> {
        s.strip_prefix("0x").or_else(|| s.strip_prefix("0X"))
    }
    let (radix, digits) = match verb {
        Verb::Dec | Verb::Str => (10, digits),
        Verb::Oct => (8, digits),
        Verb::Hex => (16, strip_hex(digits).unwrap_or(digits)),
        Verb::Auto => match strip_hex(digits) {
            Some(hex) => (16, hex),
            None if digits.len() > 1 && digits.starts_with('0') => (8, &digits[1..]),
            None => (10, digits),
        },
    };
    if digits.is_empty() || digits.starts_with(['+', '-']) {
        return Err(bad());
    }
    let magnitude = i128::from_str_radix(digits, radix).map_err(|_| bad())?;
    Ok(if negative { -magnitude } else { magnitude })
}

/// Parses `args` against `format`, filling `slots` on success.
///
/// Returns the arguments no template consumed (or, for an empty format,
/// the non-option arguments). On error no slot is modified.
pub fn opt_parse<S: AsRef<str>>(
    args: &[S],
    format: &str,
    slots: &mut [OptSlot<'_>],
) -> Result<Vec<String>, OptError> {
    let templates = format
        .split_whitespace()
        .map(Template::parse)
        .collect::<Result<Vec<_>, _>>()?;
    if templates.len() != slots.len() {
        return Err(OptError::Arity {
            templates: templates.len(),
            slots: slots.len(),
        });
    }
    let nonopts_only = templates.is_empty();

    let mut pending: Vec<(usize, Value)> = Vec::new();
    let apply = |candidate: &str, pending: &mut Vec<(usize, Value)>| -> Result<bool, OptError> {
        let mut matched = false;
        for (i, template) in templates.iter().enumerate() {
            if let Some(value) = template.matches(candidate, &slots[i]) {
                pending.push((i, template.decode(candidate, value, &slots[i])?));
                matched = true;
            }
        }
        Ok(matched)
    };

    let mut outargs: Vec<String> = Vec::new();
    let mut subopts: Vec<&str> = Vec::new();
    let mut iter = args.iter().map(<S as AsRef<str>>::as_ref);
    while let Some(arg) = iter.next() {
        if arg == "--" {
            outargs.push(arg.to_string());
            outargs.extend(iter.by_ref().map(str::to_string));
            break;
        }
        if !arg.starts_with('-') {
            outargs.push(arg.to_string());
            continue;
        }
        if let Some(attached) = arg.strip_prefix("-o") {
            let list = if attached.is_empty() {
                iter.next().ok_or_else(|| OptError::MissingValue("-o".to_string()))?
            } else {
                attached
            };
            for sub in list.split(',').filter(|s| !s.is_empty()) {
                if !apply(sub, &mut pending)? {
                    subopts.push(sub);
                }
            }
            continue;
        }
        if !apply(arg, &mut pending)? && !nonopts_only {
            outargs.push(arg.to_string());
        }
    }

    if outargs.last().map(String::as_str) == Some("--") {
        outargs.pop();
    }
    if nonopts_only {
        if outargs.first().map(String::as_str) == Some("--") {
            outargs.remove(0);
        }
    } else if !subopts.is_empty() {
        outargs.splice(0..0, ["-o".to_string(), subopts.join(",")]);
    }

    for (i, value) in pending {
        slots[i].commit(value);
    }
    Ok(outargs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mixed_templates() {
        let (mut s, mut long, mut x, mut o, mut str_, mut v) =
            (false, String::new(), 0u32, 0u32, String::new(), String::new());
        let args = ["-s", "--long=LONG", "--X=abc", "--O=0777", "--S=string", "--V=value"];
        let rest = opt_parse(
            &args,
            "-s --long= --X=%x --O=%o --S=%s --V",
            &mut [
                OptSlot::Bool(&mut s),
                OptSlot::Str(&mut long),
                OptSlot::U32(&mut x),
                OptSlot::U32(&mut o),
                OptSlot::Str(&mut str_),
                OptSlot::Str(&mut v),
            ],
        )
        .unwrap();
        assert!(rest.is_empty());
        assert!(s);
        assert_eq!(long, "LONG");
        assert_eq!(x, 0xabc);
        assert_eq!(o, 0o777);
        assert_eq!(str_, "string");
        assert_eq!(v, "value");
    }

    #[test]
    fn test_nonopts_after_separator() {
        let args = ["-s", "--long=LONG", "-o", "ro,allow_other", "--", "arg1", "arg2"];
        assert_eq!(opt_parse(&args, "", &mut []).unwrap(), vec!["arg1", "arg2"]);
    }

    #[test]
    fn test_nonopts_finds_mountpoint() {
        let args = ["prog", "/mnt/x", "-f", "-o", "fsname=probe", "-d"];
        assert_eq!(opt_parse(&args[1..], "", &mut []).unwrap(), vec!["/mnt/x"]);
        let none: [&str; 2] = ["-f", "-d"];
        assert!(opt_parse(&none, "", &mut []).unwrap().is_empty());
    }

    #[test]
    fn test_suboptions_are_matched_and_recombined() {
        let mut n1 = String::new();
        let mut debug = false;
        let args = ["-x", "-o", "a,n1=v1,b", "pos", "-obig_writes"];
        let rest = opt_parse(
            &args,
            "n1=%s debug",
            &mut [OptSlot::Str(&mut n1), OptSlot::Bool(&mut debug)],
        )
        .unwrap();
        assert_eq!(n1, "v1");
        assert!(!debug);
        assert_eq!(rest, vec!["-o", "a,b,big_writes", "-x", "pos"]);
    }

    #[test]
    fn test_negative_values_wrap_into_unsigned() {
        let (mut b, mut w, mut i) = (0u8, 0u64, 0i8);
        opt_parse(
            &["--u8=-8", "--u64=-1", "--i8=200"],
            "--u8=%d --u64 --i8=%d",
            &mut [OptSlot::U8(&mut b), OptSlot::U64(&mut w), OptSlot::I8(&mut i)],
        )
        .unwrap();
        assert_eq!(b, 0xf8);
        assert_eq!(w, u64::MAX);
        assert_eq!(i, -56);
    }

    #[test]
    fn test_failure_writes_nothing() {
        let (mut flag, mut small) = (false, 0u8);
        let err = opt_parse(
            &["-f", "--n=300"],
            "-f --n=%d",
            &mut [OptSlot::Bool(&mut flag), OptSlot::U8(&mut small)],
        )
        .unwrap_err();
        assert!(matches!(err, OptError::OutOfRange { .. }));
        assert!(!flag);
        assert_eq!(small, 0);

        let err = opt_parse(&["--n=zz"], "--n=%d", &mut [OptSlot::U8(&mut small)]).unwrap_err();
        assert!(matches!(err, OptError::BadNumber { .. }));
    }

    #[test]
    fn test_bool_with_numeric_verb() {
        let (mut on, mut off) = (false, true);
        opt_parse(
            &["--on=3", "--off=0"],
            "--on=%d --off=%d",
            &mut [OptSlot::Bool(&mut on), OptSlot::Bool(&mut off)],
        )
        .unwrap();
        assert!(on);
        assert!(!off);
    }

    #[test]
    fn test_auto_base() {
        let (mut a, mut b, mut c) = (0i32, 0i32, 0i32);
        opt_parse(
            &["-a=0x10", "-b=010", "-c=-10"],
            "-a=%v -b=%v -c=%v",
            &mut [OptSlot::I32(&mut a), OptSlot::I32(&mut b), OptSlot::I32(&mut c)],
        )
        .unwrap();
        assert_eq!((a, b, c), (16, 8, -10));
    }

    #[test]
    fn test_value_required_for_non_bool() {
        let mut name = String::from("keep");
        // A bare `--name` does not match a string destination and is
        // passed through untouched.
        let rest = opt_parse(&["--name"], "--name", &mut [OptSlot::Str(&mut name)]).unwrap();
        assert_eq!(rest, vec!["--name"]);
        assert_eq!(name, "keep");

        let mut n = 0u32;
        let err = opt_parse(&["--n="], "--n=", &mut [OptSlot::U32(&mut n)]).unwrap_err();
        assert!(matches!(err, OptError::BadNumber { .. }));
    }

    #[test]
    fn test_arity_and_template_errors() {
        let mut b = false;
        assert_eq!(
            opt_parse(&["-a"], "-a -b", &mut [OptSlot::Bool(&mut b)]).unwrap_err(),
            OptError::Arity {
                templates: 2,
                slots: 1
            }
        );
        assert!(matches!(
            opt_parse(&["-a"], "-a=%q", &mut [OptSlot::Bool(&mut b)]).unwrap_err(),
            OptError::BadTemplate(_)
        ));
        assert_eq!(
            opt_parse(&["-o"], "", &mut []).unwrap_err(),
            OptError::MissingValue("-o".into())
        );
    }

    #[test]
    fn test_separator_kept_in_format_mode() {
        let mut d = false;
        let rest = opt_parse(&["-d", "--", "-d"], "-d", &mut [OptSlot::Bool(&mut d)]).unwrap();
        assert!(d);
        assert_eq!(rest, vec!["--", "-d"]);
    }
}
