//! Built-in `core` test object.
//!
//! Generic actions that work against any [`Session`](super::session::Session):
//! logging, assertions, navigation and cookies. Enough to run case
//! documents without a custom action library.

use std::thread;
use std::time::Duration;

use serde_json::Value;

use super::registry::{
    ActionContext, ActionError, ActionLibrary, ActionRegistry, ActionResult, ParamShape,
    TestObjectBuilder,
};
use crate::definition::filter::value_text;

/// Name of the built-in test object.
pub const CORE_OBJECT: &str = "core";

/// Longest pause `wait` accepts, in milliseconds.
const MAX_WAIT_MS: u64 = 60_000;

/// Registers the `core` object.
pub struct CoreLibrary;

impl ActionLibrary for CoreLibrary {
    fn register(&self, registry: &mut ActionRegistry) {
        registry.register(
            TestObjectBuilder::new(CORE_OBJECT, CoreState::default)
                .action("log", ParamShape::Variadic, log)
                .action("assertEquals", ParamShape::Fixed(2), assert_equals)
                .action("assertNotEmpty", ParamShape::Fixed(1), assert_not_empty)
                .action("fail", ParamShape::Variadic, fail)
                .action("knownIssue", ParamShape::Variadic, known_issue)
                .action("navigate", ParamShape::Fixed(1), navigate)
                .action("assertUrl", ParamShape::Fixed(1), assert_url)
                .action("setCookie", ParamShape::Fixed(2), set_cookie)
                .action("assertCookie", ParamShape::Fixed(2), assert_cookie)
                .action("wait", ParamShape::Fixed(1), wait)
                .private_action("clearCookies", ParamShape::Variadic, clear_cookies)
                .build(),
        );
    }
}

/// Per-case state of the `core` object.
#[derive(Debug, Default)]
pub struct CoreState {
    assertions: usize,
}

fn log(_: &mut CoreState, ctx: &mut ActionContext<'_>, args: &[Value]) -> ActionResult {
    let line = args.iter().map(value_text).collect::<Vec<_>>().join(" ");
    ctx.log(line);
    Ok(())
}

fn assert_equals(state: &mut CoreState, ctx: &mut ActionContext<'_>, args: &[Value]) -> ActionResult {
    let [expected, actual] = params::<2>(args)?;
    state.assertions += 1;
    let (expected, actual) = (value_text(expected), value_text(actual));
    if expected != actual {
        return Err(ActionError::hard(format!(
            "Assertion #{} failed: expected '{}', got '{}'",
            state.assertions, expected, actual
        )));
    }
    ctx.log(format!("'{}' == '{}'", expected, actual));
    Ok(())
}

fn assert_not_empty(state: &mut CoreState, _: &mut ActionContext<'_>, args: &[Value]) -> ActionResult {
    let [value] = params::<1>(args)?;
    state.assertions += 1;
    if value_text(value).trim().is_empty() {
        return Err(ActionError::hard(format!(
            "Assertion #{} failed: value is empty",
            state.assertions
        )));
    }
    Ok(())
}

fn fail(_: &mut CoreState, _: &mut ActionContext<'_>, args: &[Value]) -> ActionResult {
    Err(ActionError::hard(message_or(args, "Failed by test case")))
}

fn known_issue(_: &mut CoreState, _: &mut ActionContext<'_>, args: &[Value]) -> ActionResult {
    Err(ActionError::known_issue(message_or(args, "Known issue")))
}

fn navigate(_: &mut CoreState, ctx: &mut ActionContext<'_>, args: &[Value]) -> ActionResult {
    let [url] = params::<1>(args)?;
    let url = value_text(url);
    ctx.session()?.navigate(&url)?;
    ctx.log(format!("Opened {}", url));
    Ok(())
}

fn assert_url(_: &mut CoreState, ctx: &mut ActionContext<'_>, args: &[Value]) -> ActionResult {
    let [expected] = params::<1>(args)?;
    let expected = value_text(expected);
    let current = ctx.session()?.current_url().unwrap_or_default();
    if current != expected {
        return Err(ActionError::hard(format!(
            "Expected URL '{}', current URL is '{}'",
            expected, current
        )));
    }
    Ok(())
}

fn set_cookie(_: &mut CoreState, ctx: &mut ActionContext<'_>, args: &[Value]) -> ActionResult {
    let [name, value] = params::<2>(args)?;
    let (name, value) = (value_text(name), value_text(value));
    ctx.session()?.set_cookie(&name, &value);
    Ok(())
}

fn assert_cookie(_: &mut CoreState, ctx: &mut ActionContext<'_>, args: &[Value]) -> ActionResult {
    let [name, expected] = params::<2>(args)?;
    let (name, expected) = (value_text(name), value_text(expected));
    match ctx.session()?.cookies().get(&name) {
        Some(value) if *value == expected => Ok(()),
        Some(value) => Err(ActionError::hard(format!(
            "Cookie '{}' is '{}', expected '{}'",
            name, value, expected
        ))),
        None => Err(ActionError::hard(format!("Cookie '{}' is not set", name))),
    }
}

fn wait(_: &mut CoreState, _: &mut ActionContext<'_>, args: &[Value]) -> ActionResult {
    let [time] = params::<1>(args)?;
    let millis = match time {
        Value::Number(n) => n.as_u64(),
        other => value_text(other).trim().parse().ok(),
    }
    .ok_or_else(|| ActionError::hard(format!("Invalid wait time '{}'", value_text(time))))?;

    thread::sleep(Duration::from_millis(millis.min(MAX_WAIT_MS)));
    Ok(())
}

fn clear_cookies(_: &mut CoreState, ctx: &mut ActionContext<'_>, _: &[Value]) -> ActionResult {
    ctx.session()?.clear_cookies();
    Ok(())
}

fn params<const N: usize>(args: &[Value]) -> Result<&[Value; N], ActionError> {
    args.try_into().map_err(|_| {
        ActionError::hard(format!("Expected {} parameters, got {}", N, args.len()))
    })
}

fn message_or(args: &[Value], default: &str) -> String {
    if args.is_empty() {
        default.to_string()
    } else {
        args.iter().map(value_text).collect::<Vec<_>>().join(" ")
    }
}
