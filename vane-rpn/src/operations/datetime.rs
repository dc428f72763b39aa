//! Date-time and elapsed-time operations.
//!
//! All zoned views go through the context's [`DateTimeContext`], so the
//! `tz` word changes what every field access and calendar step sees.

use strum::IntoEnumIterator;
use vane_types::{Elapsed, Stamp, TimeField, Value, ValueClass};

use crate::error::ExecuteError;
use crate::filter::Filter;
use crate::registry::Registry;
use crate::task::{Flow, Task};

use super::{convert_failed, Op};

/// Internal opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Now,
    Today,
    Tomorrow,
    Yesterday,
    Noon,
    Midnight,
    AddElapsedToStamp,
    AddElapsed,
    DiffStamps,
    SubElapsedFromStamp,
    SubElapsed,
    Field(TimeField),
    Dow,
    Dim,
    Step(TimeField, i64),
    Floor(TimeField),
    Round(TimeField),
    MjdOfStamp,
    StampOfMjd,
    Split,
    Join,
    Tz,
    Raw,
    FromStr,
}

pub(crate) fn register(registry: &mut Registry) {
    let mut r = |name: &str, filter: Option<Filter>, code: Opcode| {
        registry.register(name, filter, Op::DateTime(code));
    };
    let stamp_top = || Some(Filter::unary(ValueClass::DateTime));
    let elapsed_pair = || Some(Filter::binary(ValueClass::Elapsed, ValueClass::Elapsed));

    r("now", None, Opcode::Now);
    r("today", None, Opcode::Today);
    r("tomorrow", None, Opcode::Tomorrow);
    r("yesterday", None, Opcode::Yesterday);
    r("noon", None, Opcode::Noon);
    r("midnight", None, Opcode::Midnight);

    // DateTime/Elapsed arithmetic, overloading the numeric `+`/`-`.
    r(
        "+",
        Some(
            Filter::binary(ValueClass::DateTime, ValueClass::Elapsed)
                .is(1, ValueClass::Elapsed)
                .is(0, ValueClass::DateTime)
                .and()
                .or(),
        ),
        Opcode::AddElapsedToStamp,
    );
    r("+", elapsed_pair(), Opcode::AddElapsed);
    r(
        "-",
        Some(Filter::binary(ValueClass::DateTime, ValueClass::DateTime)),
        Opcode::DiffStamps,
    );
    r(
        "-",
        Some(Filter::binary(ValueClass::DateTime, ValueClass::Elapsed)),
        Opcode::SubElapsedFromStamp,
    );
    r("-", elapsed_pair(), Opcode::SubElapsed);

    for field in TimeField::iter() {
        let name = field.to_string();
        r(&name, stamp_top(), Opcode::Field(field));
        r(&format!("++{name}"), stamp_top(), Opcode::Step(field, 1));
        r(&format!("--{name}"), stamp_top(), Opcode::Step(field, -1));
        r(&format!("_{name}"), stamp_top(), Opcode::Floor(field));
        r(&format!("~{name}"), stamp_top(), Opcode::Round(field));
    }
    r("dow", stamp_top(), Opcode::Dow);
    r("dim", stamp_top(), Opcode::Dim);

    r("mjd", stamp_top(), Opcode::MjdOfStamp);
    r("mjd", Some(Filter::unary(ValueClass::Long)), Opcode::StampOfMjd);
    r("split", stamp_top(), Opcode::Split);
    r(
        "join",
        Some(
            Filter::new()
                .is(5, ValueClass::Number)
                .is(4, ValueClass::Number)
                .and()
                .is(3, ValueClass::Number)
                .and()
                .is(2, ValueClass::Number)
                .and()
                .is(1, ValueClass::Number)
                .and()
                .is(0, ValueClass::Number)
                .and(),
        ),
        Opcode::Join,
    );
    r(
        "tz",
        Some(
            Filter::new()
                .is(0, ValueClass::Str)
                .is(0, ValueClass::Null)
                .or(),
        ),
        Opcode::Tz,
    );
    r(
        "raw",
        Some(
            Filter::new()
                .is(0, ValueClass::DateTime)
                .is(0, ValueClass::Elapsed)
                .or(),
        ),
        Opcode::Raw,
    );
    r(
        "datetime",
        Some(Filter::unary(ValueClass::Str)),
        Opcode::FromStr,
    );
}

pub(crate) fn execute(task: &mut Task<'_>, code: Opcode) -> Result<Flow, ExecuteError> {
    match code {
        Opcode::Now => {
            task.stack_mut().push(Stamp::now())?;
        }
        Opcode::Today | Opcode::Midnight => {
            let stamp = midnight(task)?;
            task.stack_mut().push(stamp)?;
        }
        Opcode::Tomorrow => {
            let stamp = midnight(task)?;
            let next = task
                .context()
                .datetime()
                .add(stamp, TimeField::Day, 1)
                .ok_or_else(|| date_error("tomorrow"))?;
            task.stack_mut().push(next)?;
        }
        Opcode::Yesterday => {
            let stamp = midnight(task)?;
            let previous = task
                .context()
                .datetime()
                .add(stamp, TimeField::Day, -1)
                .ok_or_else(|| date_error("yesterday"))?;
            task.stack_mut().push(previous)?;
        }
        Opcode::Noon => {
            let stamp = midnight(task)?;
            task.stack_mut()
                .push(stamp + Elapsed::from_seconds(12 * 3_600))?;
        }
        Opcode::AddElapsedToStamp => {
            let y = task.stack_mut().pop()?;
            let x = task.stack_mut().pop()?;
            let result = match (x, y) {
                (Value::DateTime(stamp), Value::Elapsed(span))
                | (Value::Elapsed(span), Value::DateTime(stamp)) => stamp + span,
                (x, _) => return Err(convert_failed("datetime", &x)),
            };
            task.stack_mut().push(result)?;
        }
        Opcode::AddElapsed => {
            let y = pop_elapsed(task)?;
            let x = pop_elapsed(task)?;
            task.stack_mut().push(x + y)?;
        }
        Opcode::DiffStamps => {
            let y = pop_stamp(task)?;
            let x = pop_stamp(task)?;
            task.stack_mut().push(x - y)?;
        }
        Opcode::SubElapsedFromStamp => {
            let y = pop_elapsed(task)?;
            let x = pop_stamp(task)?;
            task.stack_mut().push(x - y)?;
        }
        Opcode::SubElapsed => {
            let y = pop_elapsed(task)?;
            let x = pop_elapsed(task)?;
            task.stack_mut().push(x - y)?;
        }
        Opcode::Field(field) => {
            let stamp = pop_stamp(task)?;
            let value = task.context().datetime().field(stamp, field);
            task.stack_mut().push(value)?;
        }
        Opcode::Dow => {
            let stamp = pop_stamp(task)?;
            let value = task.context().datetime().day_of_week(stamp);
            task.stack_mut().push(value)?;
        }
        Opcode::Dim => {
            let stamp = pop_stamp(task)?;
            let value = task.context().datetime().days_in_month(stamp);
            task.stack_mut().push(value)?;
        }
        Opcode::Step(field, by) => {
            let stamp = pop_stamp(task)?;
            let result = task
                .context()
                .datetime()
                .add(stamp, field, by)
                .ok_or_else(|| date_error("field step"))?;
            task.stack_mut().push(result)?;
        }
        Opcode::Floor(field) => {
            let stamp = pop_stamp(task)?;
            let result = task
                .context()
                .datetime()
                .floor(stamp, field)
                .ok_or_else(|| date_error("floor"))?;
            task.stack_mut().push(result)?;
        }
        Opcode::Round(field) => {
            let stamp = pop_stamp(task)?;
            let result = task
                .context()
                .datetime()
                .round(stamp, field)
                .ok_or_else(|| date_error("round"))?;
            task.stack_mut().push(result)?;
        }
        Opcode::MjdOfStamp => {
            let stamp = pop_stamp(task)?;
            let mjd = task.context().datetime().mjd(stamp);
            task.stack_mut().push(mjd)?;
        }
        Opcode::StampOfMjd => {
            let mjd = task.stack_mut().pop_long()?;
            let stamp = task.context().datetime().from_mjd(mjd);
            task.stack_mut().push(stamp)?;
        }
        Opcode::Split => {
            let stamp = pop_stamp(task)?;
            let (year, month, day, hour, minute, seconds) =
                task.context().datetime().split(stamp);
            task.stack_mut().push(year)?;
            task.stack_mut().push(month)?;
            task.stack_mut().push(day)?;
            task.stack_mut().push(hour)?;
            task.stack_mut().push(minute)?;
            task.stack_mut().push(seconds)?;
        }
        Opcode::Join => {
            let seconds = super::pop_f64(task)?;
            let minute = task.stack_mut().pop_long()?;
            let hour = task.stack_mut().pop_long()?;
            let day = task.stack_mut().pop_long()?;
            let month = task.stack_mut().pop_long()?;
            let year = task.stack_mut().pop_long()?;
            let stamp = task
                .context()
                .datetime()
                .join(year, month, day, hour, minute, seconds)
                .ok_or_else(|| date_error("join"))?;
            task.stack_mut().push(stamp)?;
        }
        Opcode::Tz => {
            let value = task.stack_mut().pop()?;
            let name = match &value {
                Value::Null => None,
                Value::Str(s) => Some(s.as_str()),
                other => return Err(convert_failed("time zone", other)),
            };
            task.context_mut()
                .datetime_mut()
                .set_zone(name)
                .map_err(|e| ExecuteError::DateTimeFormat(e.to_string()))?;
        }
        Opcode::Raw => {
            let value = task.stack_mut().pop()?;
            let ticks = match value {
                Value::DateTime(stamp) => stamp.ticks(),
                Value::Elapsed(span) => span.ticks(),
                other => return Err(convert_failed("datetime", &other)),
            };
            task.stack_mut().push(ticks)?;
        }
        Opcode::FromStr => {
            let text = task.stack_mut().pop_str()?;
            let stamp = task
                .context()
                .datetime()
                .parse(&text)
                .ok_or_else(|| ExecuteError::DateTimeFormat(text))?;
            task.stack_mut().push(stamp)?;
        }
    }
    Ok(Flow::Proceed)
}

fn midnight(task: &Task<'_>) -> Result<Stamp, ExecuteError> {
    task.context()
        .datetime()
        .floor(Stamp::now(), TimeField::Day)
        .ok_or_else(|| date_error("midnight"))
}

fn pop_stamp(task: &mut Task<'_>) -> Result<Stamp, ExecuteError> {
    let value = task.stack_mut().pop()?;
    match value {
        Value::DateTime(stamp) => Ok(stamp),
        other => Err(convert_failed("datetime", &other)),
    }
}

fn pop_elapsed(task: &mut Task<'_>) -> Result<Elapsed, ExecuteError> {
    let value = task.stack_mut().pop()?;
    match value {
        Value::Elapsed(span) => Ok(span),
        other => Err(convert_failed("elapsed", &other)),
    }
}

fn date_error(what: &str) -> ExecuteError {
    ExecuteError::DateTimeFormat(format!("{what} is not representable"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::Compiler;
    use crate::params::Params;
    use crate::registry::Registry;
    use crate::task::Context;
    use std::sync::Arc;

    fn run(source: &str) -> Vec<Value> {
        let compiler =
            Compiler::new(Arc::new(Registry::with_defaults()), Params::new()).unwrap();
        let program = compiler.compile(source).unwrap();
        let mut context = Context::new();
        let mut task = crate::task::Task::new(&mut context, compiler);
        task.run(program.refs()).unwrap();
        task.stack().iter().cloned().collect()
    }

    #[test]
    fn field_access_through_string_parse() {
        assert_eq!(
            run("\"2001-09-09T01:46:40\" datetime year"),
            vec![Value::Long(2001)]
        );
        assert_eq!(
            run("\"2001-09-09T01:46:40\" datetime dow"),
            vec![Value::Long(7)]
        );
    }

    #[test]
    fn stamp_arithmetic() {
        let values = run(
            "\"2001-09-09T00:00:00\" datetime \"2001-09-08T00:00:00\" datetime -",
        );
        assert_eq!(values, vec![Value::Elapsed(Elapsed::from_seconds(86_400))]);
    }

    #[test]
    fn field_steps_use_their_field() {
        assert_eq!(
            run("\"2001-01-31T00:00:00\" datetime ++day day"),
            vec![Value::Long(1)]
        );
        assert_eq!(
            run("\"2001-01-31T00:00:00\" datetime ++month month"),
            vec![Value::Long(2)]
        );
        assert_eq!(
            run("\"2001-01-31T00:00:00\" datetime --year year"),
            vec![Value::Long(2000)]
        );
    }

    #[test]
    fn floor_and_round_words() {
        assert_eq!(
            run("\"2001-09-09T01:46:40\" datetime _hour minute"),
            vec![Value::Long(0)]
        );
        assert_eq!(
            run("\"2001-09-09T01:46:40\" datetime ~minute second"),
            vec![Value::Long(0)]
        );
    }

    #[test]
    fn mjd_both_directions() {
        assert_eq!(
            run("\"1970-01-01T00:00:00\" datetime mjd"),
            vec![Value::Long(40_587)]
        );
        assert_eq!(
            run("40587 mjd year"),
            vec![Value::Long(1970)]
        );
    }

    #[test]
    fn split_join_round_trip() {
        assert_eq!(
            run("\"2001-09-09T01:46:40.5\" datetime split join raw"),
            run("\"2001-09-09T01:46:40.5\" datetime raw")
        );
    }

    #[test]
    fn tz_changes_fields() {
        assert_eq!(
            run("\"America/New_York\" tz \"2001-09-09T01:46:40\" datetime day"),
            vec![Value::Long(9)]
        );
    }
}
