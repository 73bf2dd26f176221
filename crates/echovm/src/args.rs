use smallvec::SmallVec;

use crate::{
    exception_private::{ExcType, RunResult},
    value::Value,
};

/// Evaluated call arguments.
///
/// Most calls pass a handful of positional arguments, so those are kept
/// inline; keyword arguments are rare and live in a plain vector in call order.
#[derive(Debug, Clone, Default)]
pub(crate) struct ArgValues {
    pub positional: SmallVec<[Value; 4]>,
    pub kwargs: Vec<(String, Value)>,
}

impl ArgValues {
    pub fn new(positional: impl IntoIterator<Item = Value>) -> Self {
        Self {
            positional: positional.into_iter().collect(),
            kwargs: Vec::new(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn one(arg: Value) -> Self {
        Self::new([arg])
    }

    pub fn with_kwargs(mut self, kwargs: Vec<(String, Value)>) -> Self {
        self.kwargs = kwargs;
        self
    }

    /// Inserts a receiver in front of the positional arguments.
    pub fn prepend(&mut self, receiver: Value) {
        self.positional.insert(0, receiver);
    }

    pub fn count(&self) -> usize {
        self.positional.len() + self.kwargs.len()
    }

    /// Removes and returns a keyword argument.
    pub fn take_kwarg(&mut self, name: &str) -> Option<Value> {
        let index = self.kwargs.iter().position(|(k, _)| k == name)?;
        Some(self.kwargs.remove(index).1)
    }

    /// Fails if any keyword arguments remain.
    pub fn check_no_kwargs(&self, name: &str) -> RunResult<()> {
        match self.kwargs.first() {
            None => Ok(()),
            Some((key, _)) => Err(ExcType::type_error(format!(
                "{name}() got an unexpected keyword argument '{key}'"
            ))),
        }
    }

    /// Checks that zero arguments were passed.
    pub fn check_zero_args(self, name: &str) -> RunResult<()> {
        self.get_exact::<0>(name).map(|_| ())
    }

    /// Checks that exactly one positional argument was passed, returning it.
    pub fn get_one_arg(self, name: &str) -> RunResult<Value> {
        let [a] = self.get_exact::<1>(name)?;
        Ok(a)
    }

    pub fn get_two_args(self, name: &str) -> RunResult<(Value, Value)> {
        let [a, b] = self.get_exact::<2>(name)?;
        Ok((a, b))
    }

    /// Zero or one positional argument.
    pub fn get_zero_one_arg(self, name: &str) -> RunResult<Option<Value>> {
        self.check_no_kwargs(name)?;
        match self.positional.len() {
            0 => Ok(None),
            1 => Ok(self.positional.into_iter().next()),
            n => Err(ExcType::type_error(format!(
                "{name} expected at most 1 argument, got {n}"
            ))),
        }
    }

    /// One or two positional arguments.
    pub fn get_one_two_args(self, name: &str) -> RunResult<(Value, Option<Value>)> {
        self.check_no_kwargs(name)?;
        let n = self.positional.len();
        let mut iter = self.positional.into_iter();
        match (iter.next(), iter.next(), iter.next()) {
            (Some(a), b, None) => Ok((a, b)),
            _ if n == 0 => Err(ExcType::type_error(format!("{name} expected at least 1 argument, got 0"))),
            _ => Err(ExcType::type_error(format!("{name} expected at most 2 arguments, got {n}"))),
        }
    }

    fn get_exact<const N: usize>(self, name: &str) -> RunResult<[Value; N]> {
        self.check_no_kwargs(name)?;
        let n = self.positional.len();
        let positional: Vec<Value> = self.positional.into_vec();
        positional.try_into().map_err(|_| arg_count_error(name, N, n))
    }
}

fn arg_count_error(name: &str, expected: usize, given: usize) -> crate::exception_private::RunError {
    match expected {
        0 => ExcType::type_error(format!("{name}() takes no arguments ({given} given)")),
        1 => ExcType::type_error(format!("{name}() takes exactly one argument ({given} given)")),
        _ => ExcType::type_error(format!("{name} expected {expected} arguments, got {given}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_arity_reports_the_given_count() {
        let args = ArgValues::new([Value::Int(1), Value::Int(2)]);
        let err = args.get_one_arg("len").unwrap_err();
        assert!(err.is_simple_exception(ExcType::TypeError));
        let (a, b) = ArgValues::new([Value::Int(1), Value::None]).get_two_args("f").unwrap();
        assert_eq!(a.as_int(), Some(1));
        assert!(b.is_none());
    }

    #[test]
    fn keywords_are_rejected_where_unsupported() {
        let args = ArgValues::one(Value::Int(1)).with_kwargs(vec![("key".to_owned(), Value::None)]);
        assert!(args.get_one_arg("abs").is_err());
    }
}
