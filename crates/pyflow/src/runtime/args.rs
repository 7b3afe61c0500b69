//! Arity checking for builtin functions and methods.

use super::{Kwargs, value::Value};
use crate::exception::{ExcType, RunResult};

/// Arguments of a native call, consumed by one of the `get_*` checks.
#[derive(Debug, Default)]
pub(crate) struct ArgValues {
    positional: Vec<Value>,
    kwargs: Kwargs,
}

impl ArgValues {
    pub fn new(positional: Vec<Value>, kwargs: Kwargs) -> Self {
        Self { positional, kwargs }
    }

    fn reject_kwargs(&self, name: &str) -> RunResult<()> {
        if self.kwargs.is_empty() {
            Ok(())
        } else {
            Err(ExcType::type_error_no_kwargs(name))
        }
    }

    pub fn check_zero_args(self, name: &str) -> RunResult<()> {
        self.reject_kwargs(name)?;
        match self.positional.len() {
            0 => Ok(()),
            count => Err(ExcType::type_error_no_args(name, count)),
        }
    }

    pub fn get_one_arg(self, name: &str) -> RunResult<Value> {
        self.reject_kwargs(name)?;
        let count = self.positional.len();
        let [a] = <[Value; 1]>::try_from(self.positional).map_err(|_| ExcType::type_error_arg_count(name, 1, count))?;
        Ok(a)
    }

    pub fn get_two_args(self, name: &str) -> RunResult<(Value, Value)> {
        self.reject_kwargs(name)?;
        let count = self.positional.len();
        let [a, b] = <[Value; 2]>::try_from(self.positional).map_err(|_| ExcType::type_error_arg_count(name, 2, count))?;
        Ok((a, b))
    }

    pub fn get_zero_one_arg(self, name: &str) -> RunResult<Option<Value>> {
        self.reject_kwargs(name)?;
        let count = self.positional.len();
        if count > 1 {
            return Err(ExcType::type_error_at_most(name, 1, count));
        }
        Ok(self.positional.into_iter().next())
    }

    pub fn get_one_two_args(self, name: &str) -> RunResult<(Value, Option<Value>)> {
        let (first, second, _) = self.get_range(name, 1, 2)?;
        match first {
            Some(first) => Ok((first, second)),
            None => Err(ExcType::type_error_at_least(name, 1, 0)),
        }
    }

    pub fn get_zero_one_two_args(self, name: &str) -> RunResult<(Option<Value>, Option<Value>)> {
        let (first, second, _) = self.get_range(name, 0, 2)?;
        Ok((first, second))
    }

    /// Between `min` and `max` (at most three) positional arguments.
    pub fn get_range(self, name: &str, min: usize, max: usize) -> RunResult<(Option<Value>, Option<Value>, Option<Value>)> {
        self.reject_kwargs(name)?;
        let count = self.positional.len();
        if count < min {
            return Err(ExcType::type_error_at_least(name, min, count));
        }
        if count > max {
            return Err(ExcType::type_error_at_most(name, max, count));
        }
        let mut values = self.positional.into_iter();
        Ok((values.next(), values.next(), values.next()))
    }

    /// Positional arguments plus the keyword-only arguments `names`, in
    /// that order. Unknown keywords are rejected.
    pub fn with_kwargs_only(self, name: &str, names: &[&str]) -> RunResult<(Vec<Value>, Vec<Option<Value>>)> {
        let mut found = vec![None; names.len()];
        for (key, value) in self.kwargs {
            let Some(slot) = names.iter().position(|n| *n == key) else {
                return Err(ExcType::type_error(format!(
                    "'{key}' is an invalid keyword argument for {name}()"
                )));
            };
            found[slot] = Some(value);
        }
        Ok((self.positional, found))
    }

    pub fn into_parts(self) -> (Vec<Value>, Kwargs) {
        (self.positional, self.kwargs)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn arity_errors_match_python() {
        let err = ArgValues::new(vec![], Vec::new()).get_one_arg("len").unwrap_err();
        assert_eq!(err.to_string(), "TypeError: len() takes exactly one argument (0 given)");
        let err = ArgValues::new(vec![Value::Int(1)], Vec::new()).check_zero_args("list.clear").unwrap_err();
        assert_eq!(err.to_string(), "TypeError: list.clear() takes no arguments (1 given)");
        let three = vec![Value::Int(1), Value::Int(2), Value::Int(3)];
        let err = ArgValues::new(three, Vec::new()).get_one_two_args("get").unwrap_err();
        assert_eq!(err.to_string(), "TypeError: get expected at most 2 arguments, got 3");
    }

    #[test]
    fn unknown_keywords_are_rejected() {
        let args = ArgValues::new(vec![], vec![("cmp".to_owned(), Value::None)]);
        let err = args.with_kwargs_only("sort", &["key", "reverse"]).unwrap_err();
        assert_eq!(err.to_string(), "TypeError: 'cmp' is an invalid keyword argument for sort()");
    }
}
